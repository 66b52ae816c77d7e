use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SpanData;
use opentelemetry_sdk::trace::SpanExporter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use url::Url;

#[derive(Debug, PartialEq)]
pub enum Stream {
    Stderr,
    Stdout,
}

#[derive(Debug)]
pub struct Telemetry {
    pub service_name: String,
    pub endpoint: Url,
}

pub struct TracingConfig {
    pub stream: Stream,
    /// Whether the log lines should be colored
    pub ansi: bool,
    pub telemetry: Option<Telemetry>,
    pub directives: Vec<tracing_subscriber::filter::Directive>,
    pub span_uploading: SpanUploading,
}

pub enum SpanUploading {
    Blocking,
    BackgroundBatched,
}

/// Span exporter dropping everything it receives
///
/// Used when no telemetry backend is configured, and in tests.
#[derive(Debug, Default)]
pub struct NoopSpanExporter;

impl SpanExporter for NoopSpanExporter {
    fn export(&self, _: Vec<SpanData>) -> impl std::future::Future<Output = OTelSdkResult> + Send {
        std::future::ready(Ok(()))
    }
}

pub fn create_tracing_subscriber<T: SpanExporter + 'static>(
    tracing_config: TracingConfig,
    log_level: tracing_subscriber::filter::LevelFilter,
    exporter: T,
) -> impl tracing::Subscriber {
    let env_filter_layer = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let env_filter_layer = tracing_config
        .directives
        .into_iter()
        .fold(env_filter_layer, |env_filter_layer, directive| {
            env_filter_layer.add_directive(directive)
        });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(tracing_config.ansi)
        .with_target(true)
        .with_line_number(false);
    let fmt_layer = if tracing_config.stream == Stream::Stderr {
        fmt_layer.with_writer(std::io::stderr).boxed()
    } else {
        fmt_layer.boxed()
    };
    // https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/index.html#runtime-configuration-with-layers
    let telemetry_layer = tracing_config.telemetry.map(|telemetry| {
        let resource = Resource::builder()
            .with_service_name(telemetry.service_name.clone())
            .build();
        let provider =
            opentelemetry_sdk::trace::SdkTracerProvider::builder().with_resource(resource);
        let tracer = match tracing_config.span_uploading {
            SpanUploading::Blocking => provider.with_simple_exporter(exporter),
            SpanUploading::BackgroundBatched => provider.with_batch_exporter(exporter),
        }
        .build()
        .tracer(telemetry.service_name);

        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        tracing_opentelemetry::OpenTelemetryLayer::new(tracer)
    });

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter_layer)
        .with(fmt_layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_without_telemetry_records_events() {
        let config = TracingConfig {
            stream: Stream::Stderr,
            ansi: false,
            telemetry: None,
            directives: vec!["palletmap=debug".parse().unwrap()],
            span_uploading: SpanUploading::Blocking,
        };
        let subscriber = create_tracing_subscriber(
            config,
            tracing_subscriber::filter::LevelFilter::INFO,
            NoopSpanExporter,
        );
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("subscriber is installed");
        });
    }

    #[test]
    fn subscriber_with_telemetry_builds() {
        let config = TracingConfig {
            stream: Stream::Stdout,
            ansi: false,
            telemetry: Some(Telemetry {
                service_name: "palletmap-test".into(),
                endpoint: Url::parse("http://localhost:4317").unwrap(),
            }),
            directives: vec![],
            span_uploading: SpanUploading::Blocking,
        };
        let subscriber = create_tracing_subscriber(
            config,
            tracing_subscriber::filter::LevelFilter::TRACE,
            NoopSpanExporter,
        );
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("exported span");
            span.in_scope(|| tracing::debug!("inside"));
        });
    }
}
