mod auth;
mod layout;
mod openapi;
mod pallets;
mod state;

#[cfg(test)]
mod test_app;

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::ServiceExt;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::FromRef;
use axum::extract::FromRequest;
use axum::extract::FromRequestParts;
use axum::extract::Path;
use axum::extract::Request;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use axum_extra::extract::cookie::Key;
use axum_tracing_opentelemetry::middleware::OtelAxumLayer;
use common::Version;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::timeout;
use tower::Layer as _;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::normalize_path::NormalizePath;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing::warn;
use utoipa::ToSchema;

pub use openapi::OpenApiRoot;

use crate::error::InternalError;
use crate::error::PalletmapError;
use crate::error::Result;
use crate::store;
use crate::store::Store;
use crate::store::StoreError;

fn service_router() -> Router<AppState> {
    Router::new()
        // service
        .route("/health", get(health))
        .route("/version", get(version))
        // session
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/logout", post(auth::logout))
        // layout document
        .route("/api/layout", get(layout::get_layout).post(layout::save_layout))
        .route("/api/reset", post(layout::reset_layout))
        .route("/api/state", get(state::get_state).post(state::save_state))
        // pallets
        .route("/api/pallets", get(pallets::list).post(pallets::create))
        .route("/api/pallets/{id}", delete(pallets::delete))
        .route("/api/pallets/{id}/articles", put(pallets::set_articles))
        .route("/api/search", get(pallets::search))
}

/// The routes, static files and middlewares shared by the server and the test app
fn app_router(app_state: AppState) -> Router<()> {
    let mut router = service_router();
    if let Some(static_dir) = &app_state.config.static_dir {
        router = router.fallback_service(ServeDir::new(static_dir));
    }
    router
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            auth::authentication_middleware,
        ))
        .layer(OtelAxumLayer::default())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// A JSON request body, read whatever its content type
///
/// Bodies that are not valid JSON are rejected with a `request:InvalidJson` error.
pub(in crate::views) struct JsonBody(pub Value);

#[derive(Debug, thiserror::Error)]
pub(in crate::views) enum RequestError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Invalid path parameter")]
    InvalidPath,
}

impl PalletmapError for RequestError {
    fn get_status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn get_type(&self) -> &str {
        match self {
            Self::InvalidJson => "request:InvalidJson",
            Self::InvalidPath => "request:InvalidPath",
        }
    }
}

impl<S: Send + Sync> FromRequest<S> for JsonBody {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;
        serde_json::from_slice(&bytes).map(Self).map_err(|error| {
            tracing::debug!(%error, "unparsable request body");
            InternalError::from(RequestError::InvalidJson).into_response()
        })
    }
}

/// A typed path parameter
///
/// Segments that do not parse are rejected with a `request:InvalidPath` error.
pub(in crate::views) struct PathParam<T>(pub T);

impl<S, T> FromRequestParts<S> for PathParam<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => {
                tracing::debug!(error = %rejection.body_text(), "unparsable path parameter");
                Err(InternalError::from(RequestError::InvalidPath).into_response())
            }
        }
    }
}

/// The acknowledgement returned by write operations
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(in crate::views) struct Acknowledged {
    ok: bool,
}

impl Acknowledged {
    pub(in crate::views) fn ok() -> Json<Self> {
        Json(Self { ok: true })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppHealthError {
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PalletmapError for AppHealthError {
    fn get_status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn get_type(&self) -> &str {
        match self {
            Self::Timeout => "app_health:Timeout",
            Self::Store(error) => error.get_type(),
        }
    }

    fn context(&self) -> HashMap<String, Value> {
        match self {
            Self::Timeout => Default::default(),
            Self::Store(error) => error.context(),
        }
    }
}

#[utoipa::path(
    get, path = "/health", tag = "service",
    responses(
        (status = 200, description = "Check if the service and its store are reachable", body = String),
        (status = 500, description = "The store is unreachable", body = InternalError),
    )
)]
pub(in crate::views) async fn health(
    State(AppState {
        store,
        health_check_timeout,
        ..
    }): State<AppState>,
) -> Result<&'static str> {
    check_health(&store, health_check_timeout).await?;
    Ok("ok")
}

pub async fn check_health(store: &Store, health_check_timeout: Duration) -> Result<()> {
    timeout(health_check_timeout, store.ping())
        .await
        .map_err(|_| AppHealthError::Timeout)?
        .map_err(AppHealthError::from)?;
    Ok(())
}

#[utoipa::path(
    get, path = "/version", tag = "service",
    responses(
        (status = 200, description = "Return the service version", body = Version),
    ),
)]
pub(in crate::views) async fn version(
    State(AppState { config, .. }): State<AppState>,
) -> Json<Version> {
    Json(Version {
        git_describe: config.app_version.clone(),
    })
}

pub struct ServerConfig {
    pub port: u16,
    pub address: String,
    pub health_check_timeout: Duration,
    pub store_config: store::Config,
    /// Enables the session gate when set
    pub app_password: Option<String>,
    /// Base64 encoded key signing the session cookies, a random one is used when unset
    pub session_secret: Option<String>,
    pub secure_cookies: bool,
    pub static_dir: Option<PathBuf>,
    pub app_version: Option<String>,
}

pub struct Server {
    app_state: AppState,
    router: NormalizePath<Router>,
}

/// The state of the whole service, available to all handlers
///
/// If only the store is needed, use `State<Arc<Store>>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<Store>,
    pub cookie_key: Key,
    pub health_check_timeout: Duration,
}

impl FromRef<AppState> for Arc<Store> {
    fn from_ref(input: &AppState) -> Self {
        input.store.clone()
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(input: &AppState) -> Self {
        input.cookie_key.clone()
    }
}

impl AppState {
    #[tracing::instrument(skip_all, level = "info", err, name = "AppState initialization")]
    fn init(config: ServerConfig) -> anyhow::Result<Self> {
        let cookie_key = auth::session_key(config.session_secret.as_deref())?;
        let store = Store::new(config.store_config.clone());
        info!(store = %store.kind(), "store selected");
        Ok(Self {
            store: Arc::new(store),
            cookie_key,
            health_check_timeout: config.health_check_timeout,
            config: Arc::new(config),
        })
    }
}

impl Server {
    #[tracing::instrument(skip_all, err, level = "info", name = "server initialization")]
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        info!("Building server...");
        let app_state = AppState::init(config)?;

        // Custom Bytes and String extractor configuration
        let request_payload_limit = RequestBodyLimitLayer::new(16 * 1024 * 1024); // 16MiB

        // Build CORS layer
        let cors = {
            let allowed_origin = env::var("PALLETMAP_ALLOWED_ORIGIN").ok();
            let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
            match allowed_origin {
                Some(origin) => cors.allow_origin(
                    origin
                        .parse::<axum::http::header::HeaderValue>()
                        .map_err(|_| anyhow::anyhow!("invalid allowed origin '{origin}'"))?,
                ),
                None => cors.allow_origin(Any),
            }
        };

        // Configure the axum router
        let router: Router<()> = tracing::debug_span!("router initialization")
            .in_scope(|| app_router(app_state.clone()))
            .layer(DefaultBodyLimit::disable())
            .layer(request_payload_limit)
            .layer(cors);
        let normalizing_router = NormalizePathLayer::trim_trailing_slash().layer(router);

        Ok(Self {
            app_state,
            router: normalizing_router,
        })
    }

    pub async fn start(self) -> std::io::Result<()> {
        let Self { app_state, router } = self;
        let ServerConfig {
            address,
            port,
            app_password,
            ..
        } = app_state.config.as_ref();

        if app_password.is_none() {
            warn!("no APP_PASSWORD set, the session gate is disabled");
        }

        info!(%address, port, "Running server...");
        let service = ServiceExt::<axum::extract::Request>::into_make_service(router);
        let listener = tokio::net::TcpListener::bind((address.as_str(), *port)).await?;
        let served = axum::serve(listener, service)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        app_state.store.close().await;
        served
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, stopping server");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::test_app::TestAppBuilder;
    use crate::store;

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn health() {
        let app = TestAppBuilder::default_app();
        let request = app.get("/health");
        let response = app.fetch(request).await.assert_status(StatusCode::OK);
        assert_eq!(response.text(), "ok");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn health_of_an_unreachable_store() {
        let app = TestAppBuilder::new()
            .store_config(store::Config::Supabase {
                url: url::Url::parse("http://127.0.0.1:1").unwrap(),
                service_key: "key".into(),
                table: "kv_store".into(),
            })
            .build();
        let request = app.get("/health");
        let response: HashMap<String, serde_json::Value> = app
            .fetch(request)
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR)
            .json_into();
        assert_eq!(response["status"], json!(500));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn version() {
        let app = TestAppBuilder::default_app();
        let request = app.get("/version");
        let response: HashMap<String, Option<String>> = app.fetch(request).await.json_into();
        assert!(response.contains_key("git_describe"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn unparsable_body() {
        let app = TestAppBuilder::default_app();
        let request = app.post("/api/layout").text("{\"items\": [");
        let response: serde_json::Value = app
            .fetch(request)
            .await
            .assert_status(StatusCode::BAD_REQUEST)
            .json_into();
        assert_eq!(response["type"], json!("request:InvalidJson"));
        assert_eq!(response["error"], json!("Invalid JSON"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn static_files_are_served() {
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("app.js"), "console.log('palletmap');").unwrap();
        let app = TestAppBuilder::new()
            .static_dir(static_dir.path().to_owned())
            .build();

        let response = app.fetch(app.get("/app.js")).await.assert_status(StatusCode::OK);
        assert_eq!(response.text(), "console.log('palletmap');");
        app.fetch(app.get("/missing.js"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
