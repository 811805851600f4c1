//! Logging and distributed tracing
//!
//! Console (or JSON) logs always; spans are additionally exported over OTLP
//! when an endpoint is configured.
//!
//! ```text
//! codeagent → OTLP (gRPC) → OTel Collector → Tempo / Jaeger
//! ```

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,codeagent=debug";

/// Initialize the tracing subsystem
///
/// `LOG_FORMAT=json` switches console output to JSON lines.
///
/// # Arguments
/// * `service_name` - Name for the service in traces
/// * `otlp_endpoint` - OTLP collector URL; no spans are exported when `None`
///
/// # Example
/// ```ignore
/// init_tracing("codeagent", Some("http://localhost:4317"))?;
/// ```
pub fn init_tracing(
    service_name: &str,
    otlp_endpoint: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let (plain_layer, json_layer) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let otel_layer = match otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint);
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])))
                .install_batch(runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(plain_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init()?;

    tracing::debug!(
        service = service_name,
        otlp_endpoint = otlp_endpoint.unwrap_or("disabled"),
        json,
        "Tracing initialized"
    );
    Ok(())
}

/// Flush pending spans to the collector
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
