//! Logging initialization
//!
//! Installs a tracing subscriber with an env-driven filter and either JSON or
//! human-readable output. Library code only emits `tracing` events; binaries
//! and integration harnesses call [`init_telemetry`] once at startup.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,keel=debug,kube=info,reqwest=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output format for log lines
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Human-readable lines
    Text,
}

impl LogFormat {
    /// Parse `json` / `text`; anything else falls back to JSON
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "plain" => Self::Text,
            _ => Self::Json,
        }
    }
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on startup (e.g. "keel")
    pub service_name: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "keel".to_string(),
            format: std::env::var("KEEL_LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(LogFormat::Json),
        }
    }
}

/// Initialize logging with the given configuration
///
/// Fails if a global subscriber has already been installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };

    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");
    Ok(())
}
