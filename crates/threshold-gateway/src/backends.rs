//! Backend registry.
//!
//! Static, read-only after startup: one [`Backend`] per configured
//! downstream service, looked up by the name route rules reference.

use std::sync::Arc;
use std::time::Duration;

use threshold_config::BackendConfig;

use crate::error::{ServerError, ServerResult};

/// One downstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    name: String,
    base_url: String,
    strip_prefix: Option<String>,
    timeout: Duration,
}

impl Backend {
    /// Builds a backend from its configuration entry.
    pub fn from_config(config: &BackendConfig) -> ServerResult<Self> {
        let uri: http::Uri = config
            .url
            .parse()
            .map_err(|e| ServerError::backend(&config.name, format!("invalid url: {e}")))?;
        if uri.authority().is_none() {
            return Err(ServerError::backend(&config.name, "url has no host"));
        }

        Ok(Self {
            name: config.name.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            strip_prefix: config
                .strip_prefix
                .as_deref()
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Path forwarded for an inbound `path`.
    ///
    /// The prefix is only removed on a segment boundary: with prefix `/api`,
    /// `/api/users` becomes `/users` but `/apiary` is left alone.
    pub fn upstream_path<'a>(&self, path: &'a str) -> std::borrow::Cow<'a, str> {
        let Some(prefix) = &self.strip_prefix else {
            return path.into();
        };
        match path.strip_prefix(prefix.as_str()) {
            Some("") => "/".into(),
            Some(rest) if rest.starts_with('/') => rest.into(),
            _ => path.into(),
        }
    }

    /// Absolute URL for an inbound path and optional query.
    pub fn url_for(&self, path: &str, query: Option<&str>) -> String {
        let path = self.upstream_path(path);
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.base_url, path, q),
            _ => format!("{}{}", self.base_url, path),
        }
    }
}

/// All configured backends, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
}

impl BackendRegistry {
    /// Builds the registry from configuration entries.
    pub fn from_config(configs: &[BackendConfig]) -> ServerResult<Self> {
        let backends = configs
            .iter()
            .map(|c| Backend::from_config(c).map(Arc::new))
            .collect::<ServerResult<Vec<_>>>()?;
        Ok(Self { backends })
    }

    /// Looks a backend up by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Backend>> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Iterates over the backends.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.backends.iter()
    }

    /// Number of backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns `true` if no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
