//! Shared-password session gate
//!
//! When an `APP_PASSWORD` is configured, every route but the login, logout and service
//! endpoints requires a signed `palletmap_session` cookie, obtained by posting the
//! password to `/login`.

use axum::Extension;
use axum::Form;
use axum::extract::Request;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Html;
use axum::response::IntoResponse;
use axum::response::Redirect;
use axum::response::Response;
use axum_extra::extract::SignedCookieJar;
use axum_extra::extract::cookie::Cookie;
use axum_extra::extract::cookie::Key;
use axum_extra::extract::cookie::SameSite;
use base64ct::Base64;
use base64ct::Encoding as _;

use super::AppState;
use super::ServerConfig;
use crate::error::InternalError;
use crate::error::PalletmapError;

pub const SESSION_COOKIE: &str = "palletmap_session";

/// Paths reachable without a session
const PUBLIC_PATHS: [&str; 4] = ["/login", "/logout", "/health", "/version"];

/// Whether the issuer of a request went through the session gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authentication {
    /// No password is configured, every request is let through
    Disabled,
    /// The request carries a valid session cookie
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Unauthorized, a session is required")]
    Unauthorized,
}

impl PalletmapError for AuthError {
    fn get_status(&self) -> axum::http::StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn get_type(&self) -> &str {
        "auth:Unauthorized"
    }
}

/// The key signing session cookies
///
/// Decoded from `secret` (base64, at least 64 bytes) when provided, randomly generated
/// otherwise, in which case sessions don't survive a restart.
pub fn session_key(secret: Option<&str>) -> anyhow::Result<Key> {
    let Some(secret) = secret else {
        tracing::warn!("no SESSION_SECRET set, sessions are signed with a random key");
        return Ok(Key::generate());
    };
    let bytes = Base64::decode_vec(secret.trim())
        .map_err(|error| anyhow::anyhow!("SESSION_SECRET is not valid base64: {error}"))?;
    Key::try_from(bytes.as_slice()).map_err(|_| {
        anyhow::anyhow!(
            "SESSION_SECRET is too short: {} bytes, at least 64 expected",
            bytes.len()
        )
    })
}

fn authenticate(config: &ServerConfig, jar: &SignedCookieJar) -> Authentication {
    if config.app_password.is_none() {
        Authentication::Disabled
    } else if jar.get(SESSION_COOKIE).is_some() {
        Authentication::Authenticated
    } else {
        Authentication::Unauthenticated
    }
}

pub(super) async fn authentication_middleware(
    State(AppState { config, .. }): State<AppState>,
    jar: SignedCookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let authentication = authenticate(&config, &jar);
    let path = req.uri().path();
    let public = PUBLIC_PATHS
        .iter()
        .any(|public| path.trim_end_matches('/') == *public);
    if authentication == Authentication::Unauthenticated && !public {
        tracing::debug!(path, "request without session");
        return if path == "/api" || path.starts_with("/api/") {
            InternalError::from(AuthError::Unauthorized).into_response()
        } else {
            Redirect::to("/login").into_response()
        };
    }
    req.extensions_mut().insert(authentication);
    next.run(req).await
}

/// Compares the submitted password without bailing out on the first difference
fn password_matches(submitted: &str, expected: &str) -> bool {
    submitted.len() == expected.len()
        && submitted
            .bytes()
            .zip(expected.bytes())
            .fold(0, |difference, (a, b)| difference | (a ^ b))
            == 0
}

fn login_form(error: Option<&str>) -> Html<String> {
    let error = error
        .map(|error| format!("<p class=\"error\">{error}</p>"))
        .unwrap_or_default();
    Html(format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Palletmap · Login</title>
</head>
<body>
<form method="post" action="/login">
<h1>Palletmap</h1>
{error}
<label for="password">Password</label>
<input id="password" name="password" type="password" autofocus required>
<button type="submit">Log in</button>
</form>
</body>
</html>
"#
    ))
}

pub(super) async fn login_page(Extension(authentication): Extension<Authentication>) -> Response {
    match authentication {
        Authentication::Disabled | Authentication::Authenticated => {
            Redirect::to("/").into_response()
        }
        Authentication::Unauthenticated => login_form(None).into_response(),
    }
}

#[derive(Debug, serde::Deserialize)]
pub(super) struct LoginForm {
    #[serde(default)]
    password: String,
}

pub(super) async fn login(
    State(AppState { config, .. }): State<AppState>,
    jar: SignedCookieJar,
    Form(LoginForm { password }): Form<LoginForm>,
) -> Response {
    let Some(expected) = config.app_password.as_deref() else {
        return Redirect::to("/").into_response();
    };
    if !password_matches(&password, expected) {
        tracing::warn!("login attempt with a wrong password");
        return (
            StatusCode::UNAUTHORIZED,
            login_form(Some("Wrong password")),
        )
            .into_response();
    }
    let cookie = Cookie::build((SESSION_COOKIE, "authenticated"))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.secure_cookies);
    tracing::info!("session opened");
    (jar.add(cookie), Redirect::to("/")).into_response()
}

pub(super) async fn logout(jar: SignedCookieJar) -> Response {
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to("/login")).into_response()
}
