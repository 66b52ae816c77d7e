pub mod healthcheck;
pub mod reset_layout;
pub mod runserver;
mod store_config;
mod telemetry_config;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use runserver::RunserverArgs;
pub use store_config::StoreConfig;
pub use telemetry_config::TelemetryConfig;
pub use telemetry_config::TelemetryKind;

use crate::views::OpenApiRoot;

#[derive(Parser, Debug)]
#[command(author, version)]
pub struct Client {
    #[command(flatten)]
    pub store_config: StoreConfig,
    #[command(flatten)]
    pub telemetry_config: TelemetryConfig,
    #[arg(long, env, value_enum, default_value_t = Color::Auto)]
    pub color: Color,
    /// Version reported by the `/version` endpoint
    #[clap(long, env = "PALLETMAP_GIT_DESCRIBE")]
    pub app_version: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Debug, Default, Clone)]
pub enum Color {
    Never,
    Always,
    #[default]
    Auto,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Runserver(Box<RunserverArgs>), // suppresses clippy lint about variant size
    #[command(about, long_about = "Prints the OpenApi of the service")]
    Openapi,
    #[command(about, long_about = "Replaces the stored layout with an empty one")]
    ResetLayout,
    #[command(about, long_about = "Checks that the configured store is reachable")]
    Healthcheck(healthcheck::HealthcheckArgs),
}

/// Prints the OpenApi to stdout
pub fn print_openapi() -> anyhow::Result<()> {
    let openapi = OpenApiRoot::build_openapi();
    print!("{}", serde_yaml::to_string(&openapi)?);
    Ok(())
}
