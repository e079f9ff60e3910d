//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use serde::{Deserialize, Serialize};

/// Deployment environment.
///
/// Production hides error stacks and demands a signing secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development.
    #[default]
    Development,
    /// Automated tests.
    Test,
    /// Production.
    Production,
}

impl Environment {
    /// Returns `true` in production.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Server configuration section.
///
/// # Example
///
/// ```
/// use threshold_config::{Environment, ServerConfig};
///
/// let config = ServerConfig {
///     addr: "127.0.0.1:8080".to_string(),
///     environment: Environment::Production,
///     ..Default::default()
/// };
/// assert!(config.environment.is_production());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Deployment environment.
    #[serde(default)]
    pub environment: Environment,

    /// Largest accepted request body, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Read the client address from `x-forwarded-for` / `x-real-ip`.
    #[serde(default)]
    pub trust_proxy: bool,

    /// Graceful shutdown drain timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            environment: Environment::default(),
            max_body_bytes: default_max_body_bytes(),
            trust_proxy: false,
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Bearer token verification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Shared HMAC signing secret.
    #[serde(default)]
    pub jwt_secret: String,

    /// Clock skew tolerated on `exp`, in seconds.
    #[serde(default)]
    pub leeway_secs: u64,
}

/// What the rate limiter does when the shared counter store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Count in process memory until the store recovers.
    #[default]
    LocalFallback,
    /// Let the request through uncounted.
    FailOpen,
    /// Reject the request.
    FailClosed,
}

/// Counter store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateStoreConfig {
    /// Redis URL; in-memory counting when unset.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix for every counter key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Behavior on store failure.
    #[serde(default)]
    pub failure_policy: StoreFailurePolicy,
}

impl Default for RateStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            failure_policy: StoreFailurePolicy::default(),
        }
    }
}

fn default_key_prefix() -> String {
    "threshold:rl:".to_string()
}

/// Progressive slow-down settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SlowDownConfig {
    /// Enable the slow-down.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests per window served without delay.
    #[serde(default = "default_delay_after")]
    pub delay_after: u64,

    /// Delay added per request past `delay_after`, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Maximum delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for SlowDownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_after: default_delay_after(),
            delay_ms: default_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_delay_after() -> u64 {
    50
}

fn default_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    20_000
}

/// Rate limiting section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Fixed window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Ceiling for general traffic per window.
    #[serde(default = "default_general_max")]
    pub general_max: u64,

    /// Ceiling for authentication endpoints per window.
    #[serde(default = "default_auth_max")]
    pub auth_max: u64,

    /// Progressive slow-down.
    #[serde(default)]
    pub slow_down: SlowDownConfig,

    /// Counter store.
    #[serde(default)]
    pub store: RateStoreConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            general_max: default_general_max(),
            auth_max: default_auth_max(),
            slow_down: SlowDownConfig::default(),
            store: RateStoreConfig::default(),
        }
    }
}

fn default_window_secs() -> u64 {
    15 * 60
}

fn default_general_max() -> u64 {
    100
}

fn default_auth_max() -> u64 {
    5
}

/// Reverse proxy section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Retries after a transport failure, idempotent methods only.
    #[serde(default)]
    pub max_retries: u32,

    /// Idle pooled connections kept per backend host.
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

fn default_pool_max_idle() -> usize {
    32
}

/// One downstream service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Registry name referenced by route rules.
    pub name: String,

    /// Base URL (scheme, host, port, optional base path).
    pub url: String,

    /// Path prefix removed before forwarding.
    #[serde(default)]
    pub strip_prefix: Option<String>,

    /// Per-call timeout in milliseconds.
    #[serde(default = "default_backend_timeout")]
    pub timeout_ms: u64,
}

impl BackendConfig {
    /// Creates a backend entry with the default timeout and no prefix stripping.
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            strip_prefix: None,
            timeout_ms: default_backend_timeout(),
        }
    }
}

fn default_backend_timeout() -> u64 {
    5_000
}

pub(crate) fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig::new("identity", "http://127.0.0.1:3001"),
        BackendConfig::new("listings", "http://127.0.0.1:3002"),
        BackendConfig::new("search", "http://127.0.0.1:3003"),
        BackendConfig::new("messaging", "http://127.0.0.1:3004"),
    ]
}

/// Health aggregation section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    /// Timeout for each backend probe, in milliseconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Path probed on every backend.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout(),
            probe_path: default_probe_path(),
        }
    }
}

fn default_probe_timeout() -> u64 {
    3_000
}

fn default_probe_path() -> String {
    "/health".to_string()
}

/// CORS section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Enable CORS handling.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allowed browser origins; `*` allows any.
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,

    /// Send `access-control-allow-credentials: true`.
    #[serde(default = "default_true")]
    pub allow_credentials: bool,

    /// Preflight cache lifetime, in seconds.
    #[serde(default = "default_cors_max_age")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: default_origins(),
            allow_credentials: true,
            max_age_secs: default_cors_max_age(),
        }
    }
}

fn default_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_cors_max_age() -> u64 {
    86_400
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines.
    #[default]
    Json,
    /// Human-readable.
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Run the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter listen address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Telemetry section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name attached to every log line.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "threshold-gateway".to_string()
}

fn default_true() -> bool {
    true
}
