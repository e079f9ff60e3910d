//! Prometheus metrics for the gateway.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `threshold_requests_total` | Counter | `route`, `status` |
//! | `threshold_request_duration_seconds` | Histogram | `route` |
//! | `threshold_rate_limited_total` | Counter | `class` |
//! | `threshold_backend_requests_total` | Counter | `backend`, `outcome` |
//! | `threshold_backend_duration_seconds` | Histogram | `backend` |
//! | `threshold_in_flight_requests` | Gauge | - |
//!
//! Recording functions are no-ops until a recorder is installed, so tests
//! and embedders that never call [`init_metrics`] pay nothing.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether the exporter runs.
    pub enabled: bool,

    /// Exporter listen address (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Installs the Prometheus recorder and spawns its HTTP listener.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for a bad address and
/// `TelemetryError::MetricsInit` if the recorder cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "metrics exporter stopped");
        }
    });
    tracing::info!(%addr, "metrics exporter listening");

    register_metric_descriptions();

    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!(
        "threshold_requests_total",
        "Requests answered by the gateway, by route and status"
    );
    describe_histogram!(
        "threshold_request_duration_seconds",
        "End-to-end request duration in seconds"
    );
    describe_counter!(
        "threshold_rate_limited_total",
        "Requests rejected by a rate ceiling, by class"
    );
    describe_counter!(
        "threshold_backend_requests_total",
        "Backend calls by outcome (success, error, timeout)"
    );
    describe_histogram!(
        "threshold_backend_duration_seconds",
        "Backend call duration in seconds"
    );
    describe_gauge!(
        "threshold_in_flight_requests",
        "Requests currently being processed"
    );
}

/// Records a completed request.
pub fn record_request(route: &str, status_code: u16, duration: Duration) {
    counter!(
        "threshold_requests_total",
        "route" => route.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        "threshold_request_duration_seconds",
        "route" => route.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records a rate-limit rejection.
pub fn record_rate_limited(class: &str) {
    counter!("threshold_rate_limited_total", "class" => class.to_string()).increment(1);
}

/// Outcome of one backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOutcome {
    /// A response was received (any status).
    Success,
    /// The call timed out.
    Timeout,
    /// Connection or protocol failure.
    Error,
}

impl BackendOutcome {
    /// Label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

/// Records one backend call.
pub fn record_backend_call(backend: &str, outcome: BackendOutcome, duration: Duration) {
    counter!(
        "threshold_backend_requests_total",
        "backend" => backend.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    histogram!(
        "threshold_backend_duration_seconds",
        "backend" => backend.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Tracks one in-flight request; decrements the gauge on drop.
#[derive(Debug)]
pub struct InFlightGuard(());

impl InFlightGuard {
    /// Increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!("threshold_in_flight_requests").increment(1.0);
        Self(())
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!("threshold_in_flight_requests").decrement(1.0);
    }
}
