//! Typed configuration for the Threshold edge gateway.
//!
//! - TOML and JSON configuration files
//! - `.env` files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → `.env` → env)
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! addr = "0.0.0.0:8080"
//! environment = "production"
//! max_body_bytes = 10485760
//! trust_proxy = true
//!
//! [auth]
//! jwt_secret = "change-me"
//!
//! [rate_limit]
//! window_secs = 900
//! general_max = 100
//! auth_max = 5
//!
//! [rate_limit.slow_down]
//! delay_after = 50
//! delay_ms = 500
//! max_delay_ms = 20000
//!
//! [rate_limit.store]
//! redis_url = "redis://127.0.0.1:6379"
//! failure_policy = "local_fallback"
//!
//! [[backends]]
//! name = "identity"
//! url = "http://identity:3001"
//! timeout_ms = 5000
//! ```
//!
//! # Environment Variable Overrides
//!
//! All values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `THRESHOLD__SERVER__ADDR=0.0.0.0:9000`
//! - `THRESHOLD__AUTH__JWT_SECRET=...`
//! - `THRESHOLD__RATE_LIMIT__STORE__REDIS_URL=redis://cache:6379`
//! - `THRESHOLD__BACKENDS__LISTINGS__URL=http://listings:3002`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::GatewayConfig;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::*;
