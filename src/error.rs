use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use colored::Colorize;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::result::Result as StdResult;
use tracing::error;
use tracing::warn;
use utoipa::ToSchema;

pub type Result<T, E = InternalError> = StdResult<T, E>;

/// Trait for all errors that can be returned by the HTTP API
pub trait PalletmapError: Error + Send + Sync {
    fn get_status(&self) -> StatusCode;

    fn get_type(&self) -> &str;

    fn context(&self) -> HashMap<String, Value> {
        Default::default()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(remote = "StatusCode")]
pub(crate) struct StatusCodeRemoteDef(#[serde(getter = "StatusCode::as_u16")] u16);

impl From<StatusCodeRemoteDef> for StatusCode {
    fn from(def: StatusCodeRemoteDef) -> Self {
        StatusCode::from_u16(def.0).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

pub(crate) fn default_status_code() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

/// The JSON payload of every failed API call
///
/// The human readable message is serialized under `error`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct InternalError {
    #[serde(with = "StatusCodeRemoteDef", default = "default_status_code")]
    #[schema(value_type = u16, minimum = 100, maximum = 599)]
    pub status: StatusCode,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(rename = "error")]
    pub message: String,
}

impl Error for InternalError {}

impl Display for InternalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl<T: PalletmapError> From<T> for InternalError {
    fn from(err: T) -> Self {
        InternalError {
            status: err.get_status(),
            error_type: err.get_type().to_owned(),
            context: err.context(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for InternalError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(
                "[{}] {}: {}",
                self.error_type.bold(),
                self.message,
                Backtrace::capture() // won't log unless RUST_BACKTRACE=1
            );
        } else {
            warn!("[{}] {}", self.error_type.bold(), self.message);
        }
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("pallet {id} is gone")]
    struct Gone {
        id: i64,
    }

    impl PalletmapError for Gone {
        fn get_status(&self) -> StatusCode {
            StatusCode::NOT_FOUND
        }

        fn get_type(&self) -> &str {
            "test:Gone"
        }

        fn context(&self) -> HashMap<String, Value> {
            [("id".to_owned(), json!(self.id))].into()
        }
    }

    #[test]
    fn error_payload_shape() {
        let error = InternalError::from(Gone { id: 4 });
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({
                "status": 404,
                "type": "test:Gone",
                "context": { "id": 4 },
                "error": "pallet 4 is gone",
            })
        );
    }
}
