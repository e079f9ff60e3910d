//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, `.env` and environment variables.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::schema::{BackendConfig, Environment, LogFormat, StoreFailurePolicy};
use crate::{ConfigError, GatewayConfig};

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. `.env` file
/// 4. Environment variables
///
/// # Example
///
/// ```no_run
/// use threshold_config::ConfigLoader;
///
/// # fn main() -> Result<(), threshold_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("threshold.toml")?
///     .with_dotenv()
///     .with_env_prefix("THRESHOLD")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: GatewayConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            env_prefix: None,
        }
    }

    /// Load configuration from a file.
    ///
    /// Supports TOML (.toml) and JSON (.json) formats, chosen by extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file does not exist, cannot be read, or
    /// does not parse.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string.
    ///
    /// # Example
    ///
    /// ```
    /// use threshold_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [server]
    ///     addr = "127.0.0.1:3000"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.addr, "127.0.0.1:3000");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`.
    /// For example, with prefix "THRESHOLD":
    /// - `THRESHOLD__SERVER__ADDR=0.0.0.0:9000`
    /// - `THRESHOLD__AUTH__JWT_SECRET=...`
    /// - `THRESHOLD__BACKENDS__SEARCH__URL=http://search:8080`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if one exists.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        let _ = dotenvy::dotenv();
        self
    }

    /// Finalize and return the loaded configuration.
    ///
    /// Applies environment variable overrides (if a prefix was set) and
    /// validates the final configuration.
    pub fn load(mut self) -> Result<GatewayConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    fn parse_file(content: &str, path: &Path) -> Result<GatewayConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        let env_vars: BTreeMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(&marker))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, &marker)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, marker: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(marker)
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["SERVER", "ADDR"] => config.server.addr = value.to_string(),
            ["SERVER", "ENVIRONMENT"] => {
                config.server.environment = Environment::from_str(value)
                    .map_err(|reason| ConfigError::env_parse_error(key, reason))?;
            }
            ["SERVER", "MAX_BODY_BYTES"] => config.server.max_body_bytes = parse(key, value)?,
            ["SERVER", "TRUST_PROXY"] => config.server.trust_proxy = parse_flag(key, value)?,
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse(key, value)?;
            }

            ["AUTH", "JWT_SECRET"] => config.auth.jwt_secret = value.to_string(),
            ["AUTH", "LEEWAY_SECS"] => config.auth.leeway_secs = parse(key, value)?,

            ["RATE_LIMIT", "WINDOW_SECS"] => config.rate_limit.window_secs = parse(key, value)?,
            ["RATE_LIMIT", "GENERAL_MAX"] => config.rate_limit.general_max = parse(key, value)?,
            ["RATE_LIMIT", "AUTH_MAX"] => config.rate_limit.auth_max = parse(key, value)?,
            ["RATE_LIMIT", "SLOW_DOWN", "ENABLED"] => {
                config.rate_limit.slow_down.enabled = parse_flag(key, value)?;
            }
            ["RATE_LIMIT", "SLOW_DOWN", "DELAY_AFTER"] => {
                config.rate_limit.slow_down.delay_after = parse(key, value)?;
            }
            ["RATE_LIMIT", "SLOW_DOWN", "DELAY_MS"] => {
                config.rate_limit.slow_down.delay_ms = parse(key, value)?;
            }
            ["RATE_LIMIT", "SLOW_DOWN", "MAX_DELAY_MS"] => {
                config.rate_limit.slow_down.max_delay_ms = parse(key, value)?;
            }
            ["RATE_LIMIT", "STORE", "REDIS_URL"] => {
                config.rate_limit.store.redis_url = non_empty(value);
            }
            ["RATE_LIMIT", "STORE", "KEY_PREFIX"] => {
                config.rate_limit.store.key_prefix = value.to_string();
            }
            ["RATE_LIMIT", "STORE", "FAILURE_POLICY"] => {
                config.rate_limit.store.failure_policy = match value.to_lowercase().as_str() {
                    "local_fallback" => StoreFailurePolicy::LocalFallback,
                    "fail_open" => StoreFailurePolicy::FailOpen,
                    "fail_closed" => StoreFailurePolicy::FailClosed,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'local_fallback', 'fail_open' or 'fail_closed'",
                        ))
                    }
                };
            }

            ["PROXY", "MAX_RETRIES"] => config.proxy.max_retries = parse(key, value)?,
            ["PROXY", "POOL_MAX_IDLE_PER_HOST"] => {
                config.proxy.pool_max_idle_per_host = parse(key, value)?;
            }

            ["HEALTH", "PROBE_TIMEOUT_MS"] => config.health.probe_timeout_ms = parse(key, value)?,
            ["HEALTH", "PROBE_PATH"] => config.health.probe_path = value.to_string(),

            ["CORS", "ENABLED"] => config.cors.enabled = parse_flag(key, value)?,
            ["CORS", "ALLOWED_ORIGINS"] => {
                config.cors.allowed_origins = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            ["CORS", "ALLOW_CREDENTIALS"] => {
                config.cors.allow_credentials = parse_flag(key, value)?;
            }

            ["TELEMETRY", "SERVICE_NAME"] => config.telemetry.service_name = value.to_string(),
            ["TELEMETRY", "LOGGING", "LEVEL"] => {
                config.telemetry.logging.level = value.to_string();
            }
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                config.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => return Err(ConfigError::env_parse_error(key, "expected 'json' or 'pretty'")),
                };
            }
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                config.telemetry.metrics.enabled = parse_flag(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => config.telemetry.metrics.addr = value.to_string(),

            ["BACKENDS", name, field] => {
                let name = name.to_lowercase();
                let index = match config.backends.iter().position(|b| b.name == name) {
                    Some(index) => index,
                    None => {
                        config.backends.push(BackendConfig::new(name, String::new()));
                        config.backends.len() - 1
                    }
                };
                let backend = &mut config.backends[index];
                match *field {
                    "URL" => backend.url = value.to_string(),
                    "STRIP_PREFIX" => backend.strip_prefix = non_empty(value),
                    "TIMEOUT_MS" => backend.timeout_ms = parse(key, value)?,
                    _ => return Err(ConfigError::env_parse_error(key, "unknown backend field")),
                }
            }

            // Unknown key - ignore
            _ => {}
        }

        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Each test uses its own prefix so parallel tests never see each other's variables.

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.server.addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/threshold.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/threshold.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.rate_limit.general_max, 100);
    }

    #[test]
    fn test_loader_with_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [server]
            addr = "127.0.0.1:7000"

            [proxy]
            max_retries = 2
            "#
        )
        .unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.server.addr, "127.0.0.1:7000");
        assert_eq!(config.proxy.max_retries, 2);
    }

    #[test]
    fn test_loader_with_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"rate_limit": {{"auth_max": 3}}}}"#).unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.rate_limit.auth_max, 3);
    }

    #[test]
    fn test_loader_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(ConfigLoader::new().with_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides_sections() {
        env::set_var("THRT_A__SERVER__ADDR", "127.0.0.1:9999");
        env::set_var("THRT_A__SERVER__ENVIRONMENT", "production");
        env::set_var("THRT_A__AUTH__JWT_SECRET", "from-env");
        env::set_var("THRT_A__RATE_LIMIT__GENERAL_MAX", "42");
        env::set_var("THRT_A__RATE_LIMIT__STORE__FAILURE_POLICY", "fail_open");
        env::set_var("THRT_A__CORS__ALLOWED_ORIGINS", "https://a.example, https://b.example");

        let config = ConfigLoader::new().with_env_prefix("thrt_a").load().unwrap();

        assert_eq!(config.server.addr, "127.0.0.1:9999");
        assert!(config.server.environment.is_production());
        assert_eq!(config.auth.jwt_secret, "from-env");
        assert_eq!(config.rate_limit.general_max, 42);
        assert_eq!(config.rate_limit.store.failure_policy, StoreFailurePolicy::FailOpen);
        assert_eq!(
            config.cors.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_env_overrides_backends() {
        env::set_var("THRT_B__BACKENDS__SEARCH__URL", "http://search.internal:8080");
        env::set_var("THRT_B__BACKENDS__SEARCH__TIMEOUT_MS", "750");
        env::set_var("THRT_B__BACKENDS__BILLING__URL", "http://billing:80");

        let config = ConfigLoader::new().with_env_prefix("THRT_B").load().unwrap();

        let search = config.backend("search").unwrap();
        assert_eq!(search.url, "http://search.internal:8080");
        assert_eq!(search.timeout_ms, 750);
        assert_eq!(config.backend("billing").unwrap().url, "http://billing:80");
    }

    #[test]
    fn test_env_parse_error() {
        env::set_var("THRT_C__PROXY__MAX_RETRIES", "many");
        let result = ConfigLoader::new().with_env_prefix("THRT_C").load();
        assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));
    }

    #[test]
    fn test_env_overrides_are_validated() {
        env::set_var("THRT_D__RATE_LIMIT__WINDOW_SECS", "0");
        let result = ConfigLoader::new().with_env_prefix("THRT_D").load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("On"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
