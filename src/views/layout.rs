use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::Value;

use super::Acknowledged;
use super::JsonBody;
use crate::error::InternalError;
use crate::error::PalletmapError;
use crate::error::Result;
use crate::models::Layout;
use crate::models::layout::LAYOUT_KEY;
use crate::models::layout::LayoutError;
use crate::models::layout::validate_layout_document;
use crate::store::DocumentStore as _;
use crate::store::Store;
use crate::store::load_or_initialize;

impl PalletmapError for LayoutError {
    fn get_status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn get_type(&self) -> &str {
        match self {
            Self::NotAnObject => "layout:NotAnObject",
            Self::MissingItems => "layout:MissingItems",
        }
    }
}

/// Return the layout document, initializing it on first access
#[utoipa::path(
    get, path = "/api/layout", tag = "layout",
    responses(
        (status = 200, description = "The layout document", body = Layout),
        (status = 500, description = "The store failed", body = InternalError),
    )
)]
pub(in crate::views) async fn get_layout(State(store): State<Arc<Store>>) -> Result<Json<Value>> {
    let layout = load_or_initialize(&store, LAYOUT_KEY, Layout::default_document).await?;
    Ok(Json(layout))
}

/// Replace the layout document
///
/// `version`, `canvas` and `counters` are kept from the saved document when omitted.
#[utoipa::path(
    post, path = "/api/layout", tag = "layout",
    request_body = Layout,
    responses(
        (status = 200, description = "The layout was saved", body = Acknowledged),
        (status = 400, description = "The document is not an object or lacks items", body = InternalError),
    )
)]
pub(in crate::views) async fn save_layout(
    State(store): State<Arc<Store>>,
    JsonBody(document): JsonBody,
) -> Result<Json<Acknowledged>> {
    if !document.is_object() {
        return Err(LayoutError::NotAnObject.into());
    }
    let previous = store.get(LAYOUT_KEY).await?.unwrap_or(Value::Null);
    let layout = validate_layout_document(document, &previous)?;
    store.set(LAYOUT_KEY, &layout).await?;
    Ok(Acknowledged::ok())
}

/// Reset the layout document to its defaults
#[utoipa::path(
    post, path = "/api/reset", tag = "layout",
    responses(
        (status = 200, description = "The layout was reset", body = Acknowledged),
    )
)]
pub(in crate::views) async fn reset_layout(
    State(store): State<Arc<Store>>,
) -> Result<Json<Acknowledged>> {
    store.set(LAYOUT_KEY, &Layout::default_document()).await?;
    tracing::info!("layout reset");
    Ok(Acknowledged::ok())
}
