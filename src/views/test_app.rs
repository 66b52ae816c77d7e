//! Exposes [TestApp] and [TestAppBuilder] to ease the setup of the
//! test axum server and of its store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_extra::extract::cookie::Key;
use axum_test::TestRequest;
use axum_test::TestServer;
use common::tracing::NoopSpanExporter;
use common::tracing::SpanUploading;
use common::tracing::Stream;
use common::tracing::TracingConfig;
use common::tracing::create_tracing_subscriber;
use serde::de::DeserializeOwned;
use tempfile::TempDir;

use super::AppState;
use super::ServerConfig;
use super::app_router;
use crate::store;
use crate::store::Store;

pub(crate) struct TestAppBuilder {
    store_config: Option<store::Config>,
    file_store: bool,
    app_password: Option<String>,
    static_dir: Option<PathBuf>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            store_config: None,
            file_store: false,
            app_password: None,
            static_dir: None,
        }
    }

    pub fn store_config(mut self, store_config: store::Config) -> Self {
        self.store_config = Some(store_config);
        self
    }

    /// Stores documents as files of a temporary directory instead of a SQLite database
    pub fn file_store(mut self) -> Self {
        self.file_store = true;
        self
    }

    pub fn app_password(mut self, app_password: &str) -> Self {
        self.app_password = Some(app_password.to_owned());
        self
    }

    pub fn static_dir(mut self, static_dir: PathBuf) -> Self {
        self.static_dir = Some(static_dir);
        self
    }

    pub fn default_app() -> TestApp {
        TestAppBuilder::new().build()
    }

    pub fn build(self) -> TestApp {
        let data_dir = tempfile::tempdir().expect("temporary data directory should be created");
        let store_config = match self.store_config {
            Some(store_config) => store_config,
            None if self.file_store => store::Config::File {
                data_dir: data_dir.path().to_owned(),
            },
            None => store::Config::Sqlite {
                path: data_dir.path().join("palletmap.sqlite"),
            },
        };

        let config = ServerConfig {
            app_version: None,
            port: 0,
            address: String::default(),
            health_check_timeout: Duration::from_millis(500),
            store_config: store_config.clone(),
            app_password: self.app_password,
            session_secret: None,
            secure_cookies: false,
            static_dir: self.static_dir,
        };

        let tracing_config = TracingConfig {
            stream: Stream::Stdout,
            ansi: false,
            telemetry: None,
            directives: vec![],
            span_uploading: SpanUploading::Blocking,
        };
        let sub = create_tracing_subscriber(
            tracing_config,
            tracing_subscriber::filter::LevelFilter::TRACE,
            NoopSpanExporter,
        );
        let tracing_guard = tracing::subscriber::set_default(sub);

        let app_state = AppState {
            store: Arc::new(Store::new(store_config)),
            cookie_key: Key::generate(),
            health_check_timeout: config.health_check_timeout,
            config: Arc::new(config),
        };

        let server =
            TestServer::new(app_router(app_state)).expect("test server should build properly");

        TestApp {
            server,
            data_dir,
            tracing_guard,
        }
    }
}

pub(crate) struct TestApp {
    server: TestServer,
    #[expect(unused)] // the store files live there until the app is dropped
    data_dir: TempDir,
    #[expect(unused)] // included here to extend its lifetime, not meant to be used in any way
    tracing_guard: tracing::subscriber::DefaultGuard,
}

impl TestApp {
    pub async fn fetch(&self, req: TestRequest) -> TestResponse {
        tracing::trace!(request = ?req);
        let response = req.await;
        TestResponse::new(response)
    }

    pub fn get(&self, path: &str) -> TestRequest {
        self.server.get(&trim_path(path))
    }

    pub fn post(&self, path: &str) -> TestRequest {
        self.server.post(&trim_path(path))
    }

    pub fn put(&self, path: &str) -> TestRequest {
        self.server.put(&trim_path(path))
    }

    pub fn delete(&self, path: &str) -> TestRequest {
        self.server.delete(&trim_path(path))
    }
}

// For technical reasons, we had a hard time trying to configure the normalizing layer
// in the test server. Since we have control over the paths that are tested, we trim them here.
fn trim_path(path: &str) -> String {
    if let Some(path) = path.strip_suffix('/').filter(|path| !path.is_empty()) {
        path.to_owned()
    } else if path.contains("/?") {
        path.replace("/?", "?")
    } else {
        path.to_owned()
    }
}

pub struct TestResponse {
    inner: axum_test::TestResponse,
}

impl TestResponse {
    #[tracing::instrument(name = "Response", level = "debug", skip(inner), fields(status = ?inner.status_code()))]
    fn new(inner: axum_test::TestResponse) -> Self {
        tracing::trace!(response = ?inner);
        Self { inner }
    }

    #[track_caller]
    fn render_response_lossy(self) -> String {
        let text = self.inner.text();
        serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|json| serde_json::to_string_pretty(&json).ok())
            .unwrap_or(text)
    }

    #[track_caller]
    pub fn assert_status(self, expected_status: axum::http::StatusCode) -> Self {
        let actual_status = self.inner.status_code();
        if actual_status != expected_status {
            let body = self.render_response_lossy();
            pretty_assertions::assert_eq!(
                actual_status,
                expected_status,
                "unexpected status code body={body}"
            );
            unreachable!("should have already panicked")
        } else {
            self
        }
    }

    pub fn bytes(self) -> Vec<u8> {
        self.inner.into_bytes().into()
    }

    pub fn text(&self) -> String {
        self.inner.text()
    }

    #[track_caller]
    fn header(&self, name: &str) -> String {
        self.inner
            .header(name)
            .to_str()
            .unwrap_or_else(|_| panic!("{name} header should be valid UTF-8"))
            .to_string()
    }

    /// The target of a redirection
    #[track_caller]
    pub fn location(&self) -> String {
        self.header("Location")
    }

    #[track_caller]
    pub fn set_cookie(&self) -> String {
        self.header("Set-Cookie")
    }

    #[tracing::instrument(
        name = "Deserialization",
        level = "debug",
        skip(self),
        fields(response_status = ?self.inner.status_code())
    )]
    #[track_caller]
    pub fn json_into<T: DeserializeOwned>(self) -> T {
        let body = self.bytes();
        serde_json::from_slice(body.as_ref()).unwrap_or_else(|err| {
            tracing::error!(error = ?err, "Error deserializing test response into the desired type");
            let actual: serde_json::Value =
                serde_json::from_slice(body.as_ref()).unwrap_or_else(|err| {
                    tracing::error!(
                        error = ?err,
                        ?body,
                        "Failed to deserialize test response body into JSON"
                    );
                    panic!("could not deserialize test response into JSON");
                });
            let pretty = serde_json::to_string_pretty(&actual).unwrap();
            tracing::error!(body = %pretty, "Actual JSON value");
            panic!("could not deserialize test request");
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::trim_path;

    #[rstest]
    #[case::root("/", "/")]
    #[case::trailing_slash("/api/pallets/", "/api/pallets")]
    #[case::query("/api/search/?article=A", "/api/search?article=A")]
    #[case::untouched("/index.html", "/index.html")]
    fn trimmed_paths(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(trim_path(path), expected);
    }
}
