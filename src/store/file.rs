use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt as _;

use super::DocumentStore;
use super::StoreError;
use super::check_key;

/// Documents stored as pretty-printed JSON files, one per key
///
/// Writes go to a temporary file of the same directory which is then renamed over the
/// destination, so an interrupted write never leaves a truncated document behind.
#[derive(Debug)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn document_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        check_key(key)?;
        Ok(self.data_dir.join(format!("{key}.json")))
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir).await?;
        let metadata = fs::metadata(&self.data_dir).await?;
        if metadata.permissions().readonly() {
            return Err(StoreError::Unavailable {
                message: format!("Data directory '{}' is read-only", self.data_dir.display()),
            });
        }
        Ok(())
    }
}

async fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let written = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, path).await
    }
    .await;
    if written.is_err() {
        fs::remove_file(&tmp_path).await.ok();
    }
    written
}

impl DocumentStore for FileStore {
    #[tracing::instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.document_path(key)?;
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&contents) {
            Ok(document) => Ok(Some(document)),
            Err(error) => {
                tracing::warn!(%error, path = %path.display(), "unreadable document, it will be reinitialized");
                Ok(None)
            }
        }
    }

    #[tracing::instrument(skip(self, value), err)]
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.document_path(key)?;
        fs::create_dir_all(&self.data_dir).await?;
        let mut contents = serde_json::to_vec_pretty(value)?;
        contents.push(b'\n');
        write_atomically(&path, &contents).await?;
        tracing::debug!(path = %path.display(), bytes = contents.len(), "document written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::models::Layout;
    use crate::store::Config;
    use crate::store::Store;
    use crate::store::load_or_initialize;

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn documents_are_pretty_printed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("data"));
        store
            .set("layout", &json!({ "items": [], "title": "Entrepôt" }))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(dir.path().join("data/layout.json")).unwrap();
        assert_eq!(
            contents,
            "{\n  \"items\": [],\n  \"title\": \"Entrepôt\"\n}\n"
        );
        assert_eq!(
            store.get("layout").await.unwrap(),
            Some(json!({ "items": [], "title": "Entrepôt" }))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.get("layout").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn corrupt_document_is_reinitialized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("layout.json"), "{\"items\": [").unwrap();
        let store = Store::new(Config::File {
            data_dir: dir.path().to_owned(),
        });

        let layout = load_or_initialize(&store, "layout", Layout::default_document)
            .await
            .unwrap();
        assert_eq!(layout, Layout::default_document());
        let contents = std::fs::read_to_string(dir.path().join("layout.json")).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&contents).unwrap(),
            Layout::default_document()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn interrupted_write_keeps_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let previous = json!({ "version": 3, "items": [{ "id": "p1" }] });
        store.set("layout", &previous).await.unwrap();

        // A crash between writing the temporary file and renaming it
        std::fs::write(dir.path().join(".layout.json.crashed.tmp"), "{\"vers").unwrap();

        assert_eq!(store.get("layout").await.unwrap(), Some(previous));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn failed_rename_removes_the_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let previous = json!({ "version": 3, "items": [{ "id": "p1" }] });
        store.set("layout", &previous).await.unwrap();

        // A non-empty directory cannot be replaced by a file
        let blocked = dir.path().join("state.json");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), "kept").unwrap();
        write_atomically(&blocked, b"{\"state\": null}\n")
            .await
            .unwrap_err();
        assert!(matches!(
            store.set("state", &json!({ "state": null })).await,
            Err(StoreError::Io(_))
        ));

        let mut files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        files.sort();
        assert_eq!(files, vec!["layout.json", "state.json"]);
        assert_eq!(std::fs::read_to_string(blocked.join("keep")).unwrap(), "kept");
        assert_eq!(store.get("layout").await.unwrap(), Some(previous));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn no_temporary_file_is_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        for version in 0..3 {
            store
                .set("layout", &json!({ "version": version, "items": [] }))
                .await
                .unwrap();
        }
        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec!["layout.json"]);
        assert_eq!(
            store.get("layout").await.unwrap().unwrap()["version"],
            json!(2)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn keys_cannot_escape_the_data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.set("../layout", &json!({})).await,
            Err(StoreError::InvalidKey { .. })
        ));
    }
}
