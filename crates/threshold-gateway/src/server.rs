//! HTTP/1.1 listener.
//!
//! Accepts connections, buffers each request body up to the configured
//! limit, resolves the client address and hands the request to the
//! [`Gateway`]. On shutdown the listener stops accepting, open connections
//! finish their in-flight request, and the drain is bounded by
//! `shutdown_timeout_secs`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

use threshold_config::ServerConfig;
use threshold_core::GatewayError;
use threshold_middleware::Response;

use crate::error::{ServerError, ServerResult};
use crate::gateway::Gateway;
use crate::headers::{resolve_client_ip, PeerAddr};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// The gateway's HTTP server.
#[derive(Debug)]
pub struct Server {
    gateway: Arc<Gateway>,
    addr: String,
    max_body_bytes: usize,
    trust_proxy: bool,
    shutdown_timeout: Duration,
}

impl Server {
    /// Creates a server for `gateway` with the listener settings in `config`.
    pub fn new(gateway: Gateway, config: &ServerConfig) -> Self {
        Self {
            gateway: Arc::new(gateway),
            addr: config.addr.clone(),
            max_body_bytes: config.max_body_bytes,
            trust_proxy: config.trust_proxy,
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        }
    }

    /// The gateway this server dispatches to.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Serves until SIGTERM or SIGINT.
    pub async fn run(self) -> ServerResult<()> {
        let shutdown = ShutdownSignal::with_os_signals();
        self.run_with_shutdown(shutdown).await
    }

    /// Binds the configured address and serves until `shutdown` fires.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|e| ServerError::Bind(format!("invalid address '{}': {e}", self.addr)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("failed to bind {addr}: {e}")))?;

        self.serve(listener, shutdown).await
    }

    /// Serves connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, version = crate::VERSION, "gateway listening");

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&server);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, peer, shutdown).await;
                            drop(token);
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "failed to accept connection"),
                },
                () = shutdown.recv() => {
                    tracing::info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        server.gateway.set_ready(false);
        drop(listener);

        tracing::info!(
            active = tracker.active_connections(),
            timeout_secs = server.shutdown_timeout.as_secs(),
            "draining connections"
        );
        tokio::select! {
            () = tracker.wait_idle() => tracing::info!("all connections closed"),
            () = tokio::time::sleep(server.shutdown_timeout) => tracing::warn!(
                active = tracker.active_connections(),
                "drain timeout reached, abandoning open connections"
            ),
        }

        tracing::info!("gateway stopped");
        Ok(())
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: ShutdownSignal,
    ) {
        let io = TokioIo::new(stream);
        let server = Arc::clone(&self);
        let service = service_fn(move |request: http::Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.handle_request(request, peer).await) }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            () = shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
        };

        if let Err(e) = result {
            tracing::debug!(peer = %peer, error = %e, "connection closed with error");
        }
    }

    async fn handle_request(&self, request: http::Request<Incoming>, peer: SocketAddr) -> Response {
        let client_ip = resolve_client_ip(request.headers(), peer, self.trust_proxy);
        let span = tracing::info_span!(
            "request",
            http.method = %request.method(),
            http.path = %request.uri().path(),
            client_ip = %client_ip,
        );

        async move {
            let (mut parts, body) = request.into_parts();
            parts.extensions.insert(PeerAddr(peer));
            let body = match Limited::new(body, self.max_body_bytes).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    let error = if e.is::<LengthLimitError>() {
                        GatewayError::PayloadTooLarge {
                            limit: self.max_body_bytes,
                        }
                    } else {
                        GatewayError::validation(format!("failed to read request body: {e}"))
                    };
                    tracing::warn!(error = %error, "request rejected before dispatch");
                    return self.gateway.reject(&error, &parts.headers);
                }
            };

            let request = http::Request::from_parts(parts, Full::new(body));
            self.gateway.handle(request, client_ip).await
        }
        .instrument(span)
        .await
    }
}
