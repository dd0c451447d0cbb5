//! Logging and OpenTelemetry tracing
//!
//! Console output always goes through `tracing-subscriber`. When an OTLP
//! endpoint is given, spans (`agent_cycle`, `decision_call`,
//! `action_execution`) are also exported so a single query can be followed
//! across the decision model and the execution backend.
//!
//! # Architecture
//!
//! ```text
//! notebook-agent ──► stderr (pretty or JSON lines, RUST_LOG filter)
//!       │
//!       └──────► OTLP (gRPC) → OTel Collector → Tempo
//! ```
//!
//! The console format comes from `NOTEBOOK_AGENT_LOG_FORMAT` (`pretty` or
//! `json`). JSON lines carry the current span, so a log shipper can group
//! every line of one cycle by its `correlation_id` field.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default OTLP endpoint (OTel collector)
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Environment variable selecting the console format
pub const LOG_FORMAT_ENV: &str = "NOTEBOOK_AGENT_LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,notebook_agent=debug";

/// How log lines are written to stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines with the event target
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Parse a format name, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" | "compact" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Format named by `NOTEBOOK_AGENT_LOG_FORMAT`, `Pretty` when unset or unknown
    pub fn from_env() -> Self {
        match std::env::var(LOG_FORMAT_ENV) {
            Ok(value) => Self::parse(&value).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// stderr layer in the requested format
fn console_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Pretty => base.boxed(),
        LogFormat::Json => base
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    }
}

/// Initialize console logging only
///
/// Used when no collector is configured. Safe to call more than once; later
/// calls are ignored.
pub fn init_console_tracing() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(console_layer(LogFormat::from_env()))
        .try_init();
}

/// Initialize console logging plus OpenTelemetry export
///
/// This sets up:
/// - stderr logging in the format from `NOTEBOOK_AGENT_LOG_FORMAT`
/// - batched span export to the OTLP endpoint, tagged with the crate version
///
/// Fails if the exporter cannot be built or a global subscriber is already
/// installed; callers fall back to [`init_console_tracing`].
///
/// # Arguments
/// * `service_name` - Name for the service in traces
/// * `otlp_endpoint` - Optional OTLP endpoint URL (defaults to localhost:4317)
///
/// # Example
/// ```ignore
/// init_tracing("notebook-agent", Some("http://collector:4317"))?;
/// ```
pub fn init_tracing(
    service_name: &str,
    otlp_endpoint: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let endpoint = otlp_endpoint.unwrap_or(DEFAULT_OTLP_ENDPOINT);
    let format = LogFormat::from_env();

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio)?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(console_layer(format))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;

    tracing::info!(
        service = service_name,
        endpoint = endpoint,
        format = ?format,
        "OpenTelemetry tracing initialized"
    );

    Ok(())
}

/// Flush pending spans to the collector
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
    tracing::debug!("OpenTelemetry tracing shutdown complete");
}
