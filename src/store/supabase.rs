use std::time::Duration;

use chrono::Utc;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use super::DocumentStore;
use super::StoreError;
use super::check_key;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// PostgREST answers with one of these codes when the queried table does not exist
const MISSING_TABLE_CODES: [&str; 2] = ["PGRST205", "42P01"];

/// Documents stored in a key/value table of a Supabase project, through its REST API
///
/// The table is expected to exist: it can't be created over REST.
pub struct SupabaseStore {
    url: Url,
    service_key: String,
    table: String,
    client: Mutex<Option<reqwest::Client>>,
}

#[derive(serde::Deserialize)]
struct Row {
    v: Value,
}

impl SupabaseStore {
    pub fn new(url: Url, service_key: String, table: String) -> Self {
        Self {
            url,
            service_key,
            table,
            client: Mutex::new(None),
        }
    }

    /// `<url>/rest/v1/<table>`
    fn endpoint(&self) -> Result<Url, StoreError> {
        check_key(&self.table)?;
        let mut endpoint = self.url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|()| StoreError::Unavailable {
                message: format!("'{}' is not a valid Supabase URL", self.url),
            })?
            .pop_if_empty()
            .extend(["rest", "v1", self.table.as_str()]);
        Ok(endpoint)
    }

    async fn client(&self) -> Result<reqwest::Client, StoreError> {
        let mut client = self.client.lock().await;
        if let Some(client) = client.as_ref() {
            return Ok(client.clone());
        }
        let built = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        tracing::debug!(url = %self.url, table = %self.table, "Supabase client created");
        Ok(client.insert(built).clone())
    }

    fn authenticated(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    /// Turns PostgREST failures into store errors
    async fn check(&self, response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let code = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|error| error.get("code")?.as_str().map(str::to_owned));
        let missing_table = code
            .as_deref()
            .is_some_and(|code| MISSING_TABLE_CODES.contains(&code));
        if missing_table || status == StatusCode::NOT_FOUND {
            return Err(StoreError::Unavailable {
                message: format!(
                    "The Supabase table '{}' does not exist, create it with: {}",
                    self.table,
                    database::key_value_table_ddl(&self.table)
                ),
            });
        }
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(StoreError::Unavailable {
                message: format!("Supabase rejected the service key (status {status})"),
            });
        }
        Err(StoreError::Remote {
            status: status.as_u16(),
            body,
        })
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        let response = self
            .authenticated(client.get(self.endpoint()?))
            .query(&[("select", "k"), ("limit", "1")])
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    /// Drops the HTTP client, a new one is created if the store is used again
    pub async fn close(&self) {
        self.client.lock().await.take();
    }
}

impl DocumentStore for SupabaseStore {
    #[tracing::instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        check_key(key)?;
        let client = self.client().await?;
        let filter = format!("eq.{key}");
        let response = self
            .authenticated(client.get(self.endpoint()?))
            .query(&[("select", "v"), ("k", filter.as_str())])
            .send()
            .await?;
        let rows: Vec<Row> = self.check(response).await?.json().await?;
        Ok(rows.into_iter().next().map(|row| row.v))
    }

    #[tracing::instrument(skip(self, value), err)]
    async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        check_key(key)?;
        let client = self.client().await?;
        let rows = json!([{ "k": key, "v": value, "updated_at": Utc::now() }]);
        let response = self
            .authenticated(client.post(self.endpoint()?))
            .query(&[("on_conflict", "k")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }
}
