//! Root configuration type.

use crate::schema::{
    default_backends, AuthConfig, BackendConfig, CorsConfig, Environment, HealthConfig,
    LogFormat, ProxyConfig, RateLimitConfig, ServerConfig, TelemetryConfig,
};
use crate::ConfigError;
use serde::{Deserialize, Serialize};

/// Complete gateway configuration.
///
/// # Example
///
/// ```
/// use threshold_config::GatewayConfig;
///
/// let config = GatewayConfig::default();
/// assert_eq!(config.server.addr, "0.0.0.0:8080");
/// assert_eq!(config.backends.len(), 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Token verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Rate limiting and slow-down.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Outbound proxy behavior.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Backend registry.
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,

    /// Health aggregation.
    #[serde(default)]
    pub health: HealthConfig,

    /// Browser CORS policy.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            proxy: ProxyConfig::default(),
            backends: default_backends(),
            health: HealthConfig::default(),
            cors: CorsConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Looks up a backend by name.
    #[must_use]
    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - An address is not a socket address
    /// - The signing secret is empty in production
    /// - A backend URL is not an absolute http(s) URL, or a name is duplicated
    /// - A ceiling, window or timeout is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.addr",
                format!("invalid socket address: {}", self.server.addr),
            ));
        }

        if self.telemetry.metrics.enabled
            && self
                .telemetry
                .metrics
                .addr
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        if self.server.environment.is_production() && self.auth.jwt_secret.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "auth.jwt_secret",
                "must be set in production",
            ));
        }

        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::invalid_value("server.max_body_bytes", "must be > 0"));
        }

        let limits = &self.rate_limit;
        for (field, value) in [
            ("rate_limit.window_secs", limits.window_secs),
            ("rate_limit.general_max", limits.general_max),
            ("rate_limit.auth_max", limits.auth_max),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, "must be > 0"));
            }
        }

        if let Some(url) = &limits.store.redis_url {
            if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                return Err(ConfigError::invalid_value(
                    "rate_limit.store.redis_url",
                    format!("expected a redis:// or rediss:// URL, got {url}"),
                ));
            }
        }

        if self.health.probe_timeout_ms == 0 {
            return Err(ConfigError::invalid_value("health.probe_timeout_ms", "must be > 0"));
        }

        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.name.as_str()) {
                return Err(ConfigError::validation_error(format!(
                    "duplicate backend name: {}",
                    backend.name
                )));
            }
            validate_backend_url(backend)?;
            if backend.timeout_ms == 0 {
                return Err(ConfigError::invalid_value(
                    format!("backends.{}.timeout_ms", backend.name),
                    "must be > 0",
                ));
            }
            if let Some(prefix) = &backend.strip_prefix {
                if !prefix.starts_with('/') {
                    return Err(ConfigError::invalid_value(
                        format!("backends.{}.strip_prefix", backend.name),
                        "must start with '/'",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Checks that every backend name referenced by routing exists in the registry.
    pub fn validate_backend_refs<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        for name in names {
            if self.backend(name).is_none() {
                return Err(ConfigError::validation_error(format!(
                    "route references unknown backend: {name}"
                )));
            }
        }
        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// # Example
    ///
    /// ```
    /// use threshold_config::{GatewayConfig, LogFormat};
    ///
    /// let config = GatewayConfig::development();
    /// assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.server.environment = Environment::Development;
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config
    }

    /// Create a production configuration preset.
    ///
    /// The preset has no signing secret; one must be supplied before `validate` passes.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.server.environment = Environment::Production;
        config.server.trust_proxy = true;
        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.metrics.enabled = true;
        config
    }
}

fn validate_backend_url(backend: &BackendConfig) -> Result<(), ConfigError> {
    let field = format!("backends.{}.url", backend.name);
    let uri: http::Uri = backend
        .url
        .parse()
        .map_err(|e| ConfigError::invalid_value(&field, format!("{e}")))?;

    match uri.scheme_str() {
        Some("http" | "https") => {}
        _ => {
            return Err(ConfigError::invalid_value(
                &field,
                format!("expected an http(s) URL, got {}", backend.url),
            ))
        }
    }

    if uri.authority().is_none() {
        return Err(ConfigError::invalid_value(&field, "missing host"));
    }

    if uri.query().is_some() {
        return Err(ConfigError::invalid_value(&field, "must not carry a query string"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_server_addr() {
        let mut config = GatewayConfig::default();
        config.server.addr = "not an address".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.addr"));
    }

    #[test]
    fn test_validate_production_requires_secret() {
        let mut config = GatewayConfig::production();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = "s3cret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_ceiling() {
        let mut config = GatewayConfig::default();
        config.rate_limit.auth_max = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rate_limit.auth_max"));
    }

    #[test]
    fn test_validate_bad_backend_url() {
        let mut config = GatewayConfig::default();
        config.backends[0].url = "ftp://files.local".to_string();
        assert!(config.validate().is_err());

        config.backends[0].url = "/relative/only".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_backend() {
        let mut config = GatewayConfig::default();
        config.backends.push(BackendConfig::new("search", "http://other:1"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate backend name"));
    }

    #[test]
    fn test_validate_strip_prefix_must_be_absolute() {
        let mut config = GatewayConfig::default();
        config.backends[1].strip_prefix = Some("api".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_redis_url_scheme() {
        let mut config = GatewayConfig::default();
        config.rate_limit.store.redis_url = Some("http://cache:6379".to_string());
        assert!(config.validate().is_err());

        config.rate_limit.store.redis_url = Some("redis://cache:6379".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_backend_refs() {
        let config = GatewayConfig::default();
        assert!(config.validate_backend_refs(["identity", "search"]).is_ok());
        assert!(config.validate_backend_refs(["billing"]).is_err());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml = r#"
            [server]
            addr = "127.0.0.1:9000"
            environment = "test"

            [rate_limit]
            general_max = 10

            [[backends]]
            name = "identity"
            url = "http://identity:4000"
            strip_prefix = "/api"
            timeout_ms = 1500
        "#;

        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.addr, "127.0.0.1:9000");
        assert_eq!(config.server.environment, Environment::Test);
        assert_eq!(config.rate_limit.general_max, 10);
        assert_eq!(config.rate_limit.window_secs, 900);
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].strip_prefix.as_deref(), Some("/api"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            [server]
            listen = "0.0.0.0:1"
        "#;
        assert!(toml::from_str::<GatewayConfig>(toml).is_err());
    }
}
