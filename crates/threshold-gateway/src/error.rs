//! Startup and server errors.
//!
//! Request-time failures are [`GatewayError`](threshold_core::GatewayError)s
//! rendered into the envelope. The errors here are the ones that stop the
//! process from starting or keep the listener from running.

use thiserror::Error;
use threshold_config::ConfigError;
use threshold_middleware::StoreError;

/// Errors building or running the gateway.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration failed to load or validate.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Failed to bind the listen address.
    #[error("Bind error: {0}")]
    Bind(String),

    /// I/O error while serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The outbound HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The shared rate-limit store is unreachable and the policy is `fail_closed`.
    #[error("Rate store error: {0}")]
    Store(#[from] StoreError),

    /// A backend entry is unusable.
    #[error("Invalid backend '{name}': {reason}")]
    Backend {
        /// Backend name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ServerError {
    /// Creates a backend error.
    pub fn backend(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for gateway startup and serving.
pub type ServerResult<T> = Result<T, ServerError>;
