mod client;
mod error;
mod models;
mod store;
mod views;

use std::io::IsTerminal;
use std::process::exit;

use clap::Parser;
use client::Client;
use client::Color;
use client::Commands;
use client::TelemetryConfig;
use client::TelemetryKind;
use client::healthcheck::healthcheck_cmd;
use client::print_openapi;
use client::reset_layout::reset_layout_cmd;
use client::runserver::runserver;
use colored::Colorize;
use common::tracing::NoopSpanExporter;
use common::tracing::SpanUploading;
use common::tracing::Stream;
use common::tracing::TracingConfig;
use common::tracing::create_tracing_subscriber;
use opentelemetry_otlp::WithExportConfig as _;
use tracing::error;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(_) => (),
        Err(e) => {
            error!("{e:#}");
            eprintln!("{} {e:#}", "error:".red().bold());
            exit(2);
        }
    }
}

fn init_tracing(telemetry_config: TelemetryConfig, ansi: bool) -> anyhow::Result<()> {
    let tracing_config = |telemetry| TracingConfig {
        stream: Stream::Stderr,
        ansi,
        telemetry,
        directives: vec![],
        span_uploading: SpanUploading::BackgroundBatched,
    };
    let level = tracing_subscriber::filter::LevelFilter::INFO;
    match telemetry_config.telemetry_kind {
        TelemetryKind::None => {
            create_tracing_subscriber(tracing_config(None), level, NoopSpanExporter).try_init()?
        }
        TelemetryKind::Opentelemetry => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(telemetry_config.telemetry_endpoint.as_str())
                .build()?;
            create_tracing_subscriber(
                tracing_config(Some(telemetry_config.into())),
                level,
                exporter,
            )
            .try_init()?
        }
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let client = Client::parse();

    let ansi = match client.color {
        Color::Never => false,
        Color::Always => true,
        Color::Auto => std::io::stderr().is_terminal(),
    };
    colored::control::set_override(ansi);
    init_tracing(client.telemetry_config, ansi)?;

    match client.command {
        Commands::Runserver(args) => {
            let store_config = client.store_config.into_store_config()?;
            runserver(*args, store_config, client.app_version).await
        }
        Commands::Openapi => print_openapi(),
        Commands::ResetLayout => {
            reset_layout_cmd(client.store_config.into_store_config()?).await
        }
        Commands::Healthcheck(args) => {
            healthcheck_cmd(args, client.store_config.into_store_config()?).await
        }
    }
}
