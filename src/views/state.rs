//! The opaque state blob owned by the client

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use super::Acknowledged;
use super::JsonBody;
use crate::error::InternalError;
use crate::error::PalletmapError;
use crate::error::Result;
use crate::models::Layout;
use crate::models::STATE_KEY;
use crate::store::DocumentStore as _;
use crate::store::Store;
use crate::store::load_or_initialize;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Missing 'state'")]
    MissingState,
}

impl PalletmapError for StateError {
    fn get_status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn get_type(&self) -> &str {
        "state:MissingState"
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(in crate::views) struct StateResponse {
    ok: bool,
    #[schema(value_type = Object)]
    state: Value,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(in crate::views) struct StateForm {
    /// Any JSON value, `null` included
    #[schema(value_type = Object)]
    state: Value,
}

/// Return the client state, initialized with an empty layout on first access
#[utoipa::path(
    get, path = "/api/state", tag = "state",
    responses(
        (status = 200, description = "The stored state", body = StateResponse),
        (status = 500, description = "The store is unreachable", body = InternalError),
    )
)]
pub(in crate::views) async fn get_state(
    State(store): State<Arc<Store>>,
) -> Result<Json<StateResponse>> {
    let state = load_or_initialize(&store, STATE_KEY, Layout::default_document).await?;
    Ok(Json(StateResponse { ok: true, state }))
}

/// Replace the client state
#[utoipa::path(
    post, path = "/api/state", tag = "state",
    request_body = StateForm,
    responses(
        (status = 200, description = "The state was saved", body = Acknowledged),
        (status = 400, description = "The body has no 'state' key", body = InternalError),
    )
)]
pub(in crate::views) async fn save_state(
    State(store): State<Arc<Store>>,
    JsonBody(body): JsonBody,
) -> Result<Json<Acknowledged>> {
    let state = body.get("state").ok_or(StateError::MissingState)?;
    store.set(STATE_KEY, state).await?;
    Ok(Acknowledged::ok())
}
