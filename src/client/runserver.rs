use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::store;
use crate::views;

#[derive(Args, Debug)]
#[command(about, long_about = "Launch the server")]
pub struct RunserverArgs {
    #[arg(long, env = "PALLETMAP_PORT", default_value_t = 8000)]
    pub(super) port: u16,
    #[arg(long, env = "PALLETMAP_ADDRESS", default_value_t = String::from("0.0.0.0"))]
    pub(super) address: String,
    /// Shared password required to use the application, the session gate is disabled when unset
    #[clap(long, env = "APP_PASSWORD", hide_env_values = true)]
    pub(super) app_password: Option<String>,
    /// Base64 encoded key (at least 64 bytes) signing the session cookies
    #[clap(long, env = "SESSION_SECRET", hide_env_values = true)]
    pub(super) session_secret: Option<String>,
    /// Only send the session cookie over HTTPS
    #[clap(long, env = "SECURE_COOKIES", default_value_t = false)]
    pub(super) secure_cookies: bool,
    /// Directory of the browser application, served on every path the API doesn't handle
    #[clap(long, env = "STATIC_DIR")]
    pub(super) static_dir: Option<PathBuf>,
    /// The timeout to use when performing the healthcheck, in milliseconds
    #[clap(long, env = "PALLETMAP_HEALTH_CHECK_TIMEOUT_MS", default_value_t = 1000)]
    pub(super) health_check_timeout_ms: u64,
}

/// Create and run the server
pub async fn runserver(
    RunserverArgs {
        port,
        address,
        app_password,
        session_secret,
        secure_cookies,
        static_dir,
        health_check_timeout_ms,
    }: RunserverArgs,
    store_config: store::Config,
    app_version: Option<String>,
) -> anyhow::Result<()> {
    let config = views::ServerConfig {
        port,
        address,
        health_check_timeout: Duration::from_millis(health_check_timeout_ms),
        store_config,
        app_password: app_password.filter(|password| !password.is_empty()),
        session_secret,
        secure_cookies,
        static_dir,
        app_version,
    };

    let server = views::Server::new(config)?;
    Ok(server.start().await?)
}
