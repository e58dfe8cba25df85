use crate::error::{Error, Result};

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const SERVICE_NAME: &str = "internallb-webhook";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn init_tracer_provider(url: &str, sample_ratio: f64) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(url)
        .build()
        .map_err(|e| Error::TelemetryError(format!("failed to build OTLP exporter: {e}")))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            sample_ratio,
        ))))
        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
        .build();
    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}

/// Install the global `tracing` subscriber.
///
/// `log_filter` is an `EnvFilter` directive such as `info,internallb=debug`. Spans are exported
/// through OTLP only when `tracing_url` is given.
pub async fn init(
    log_filter: &str,
    log_format: LogFormat,
    tracing_url: Option<&str>,
    sample_ratio: f64,
) -> Result<()> {
    let filter = EnvFilter::try_new(log_filter)
        .map_err(|e| Error::TelemetryError(format!("invalid log filter {log_filter}: {e}")))?;

    let otel = match tracing_url {
        Some(url) => {
            let tracer = init_tracer_provider(url, sample_ratio)?.tracer(SERVICE_NAME);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(otel);
    match log_format {
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    }
    .map_err(|e| Error::TelemetryError(format!("failed to install subscriber: {e}")))
}
