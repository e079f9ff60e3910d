//! Observability for the Threshold edge gateway.
//!
//! - **Logging**: structured JSON (or pretty) logs via `tracing-subscriber`
//! - **Metrics**: Prometheus exposition via the `metrics` crate
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `threshold_requests_total` | Counter | `route`, `status` | Requests answered |
//! | `threshold_request_duration_seconds` | Histogram | `route` | End-to-end latency |
//! | `threshold_rate_limited_total` | Counter | `class` | Ceiling rejections |
//! | `threshold_backend_requests_total` | Counter | `backend`, `outcome` | Backend calls |
//! | `threshold_in_flight_requests` | Gauge | - | Requests in progress |
//!
//! # Example
//!
//! ```rust,ignore
//! use threshold_telemetry::{init_telemetry, install_panic_hook, LogConfig, MetricsConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_telemetry(&LogConfig::production(), &MetricsConfig::default())?;
//!     install_panic_hook();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{
    init_metrics, record_backend_call, record_rate_limited, record_request, BackendOutcome,
    InFlightGuard, MetricsConfig,
};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns the first subsystem error.
pub fn init_telemetry(log: &LogConfig, metrics: &MetricsConfig) -> TelemetryResult<()> {
    init_logging(log)?;
    init_metrics(metrics)?;
    Ok(())
}

/// Routes panics through `tracing` so they land in the structured log.
///
/// The previous hook still runs afterwards.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();

        tracing::error!(panic = %payload, %location, "unhandled panic");
        previous(info);
    }));
}
