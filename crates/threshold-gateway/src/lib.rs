//! # Threshold Gateway
//!
//! The single public entry point of the platform. Every inbound request is
//! correlated, authenticated, rate limited and authorized by the
//! [`threshold_middleware`] pipeline, then either answered locally (health
//! and lifecycle probes) or proxied to one of the backend services.
//!
//! ```text
//! client ─► Server ─► Pipeline ─► Dispatcher ─┬─► ProxyClient ──────► identity | listings | search | messaging
//!           (body limit,          (8 stages)  ├─► HealthAggregator ─► GET {backend}/health, concurrently
//!            client ip)                       └─► /ready, /live, /version
//! ```
//!
//! ## Modules
//!
//! - [`routes`]: the default ordered route table
//! - [`backends`]: backend registry and path rewriting
//! - [`headers`]: hop-by-hop filtering, trust headers, client address
//! - [`proxy`]: request forwarding and response relay
//! - [`health`]: concurrent downstream probes
//! - [`gateway`]: pipeline assembly and terminal dispatch
//! - [`server`]: the hyper listener with graceful shutdown
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use threshold_config::GatewayConfig;
//! use threshold_gateway::{Gateway, Server};
//! use threshold_middleware::MemoryStore;
//!
//! # async fn run() -> Result<(), threshold_gateway::ServerError> {
//! let config = GatewayConfig::default();
//! let gateway = Gateway::from_config(&config, Arc::new(MemoryStore::new()))?;
//! Server::new(gateway, &config.server).run().await
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/threshold-gateway/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod backends;
pub mod error;
pub mod gateway;
pub mod headers;
pub mod health;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod shutdown;

pub use backends::{Backend, BackendRegistry};
pub use error::{ServerError, ServerResult};
pub use gateway::{connect_store, Gateway, VersionInfo};
pub use health::{BackendHealth, BackendStatus, HealthAggregator, HealthSnapshot, HealthStatus};
pub use proxy::{ForwardContext, ProxyClient};
pub use routes::default_route_table;
pub use server::Server;
pub use shutdown::{ConnectionTracker, ShutdownSignal};

/// Gateway version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
