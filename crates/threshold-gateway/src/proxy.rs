//! Reverse proxy dispatch.
//!
//! Request and response mutation are pure functions,
//! [`build_forward_request`] and [`relay_response`], around one outbound
//! call made by [`ProxyClient`].

use std::net::IpAddr;
use std::time::Instant;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use reqwest::Client;

use threshold_config::ProxyConfig;
use threshold_core::{CorrelationId, GatewayError, Identity};
use threshold_middleware::{MiddlewareContext, Request, Response, ResponseExt};
use threshold_telemetry::{record_backend_call, BackendOutcome};

use crate::backends::Backend;
use crate::error::ServerResult;
use crate::headers::{
    append_forwarded_for, filter_headers_for_downstream, filter_headers_for_upstream,
    inject_trust_headers, PeerAddr,
};

/// The request-scoped facts forwarding needs.
#[derive(Debug, Clone)]
pub struct ForwardContext {
    /// Correlation id of the inbound request.
    pub correlation_id: CorrelationId,
    /// Authenticated caller, if any.
    pub identity: Option<Identity>,
    /// Resolved client address.
    pub client_ip: Option<IpAddr>,
}

impl ForwardContext {
    /// Snapshots the pipeline context.
    pub fn from_middleware(ctx: &MiddlewareContext) -> Self {
        Self {
            correlation_id: ctx.correlation_id().clone(),
            identity: ctx.identity().cloned(),
            client_ip: ctx.client_ip(),
        }
    }
}

/// A request ready to send to a backend.
#[derive(Debug, Clone)]
pub struct ForwardedRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute backend URL.
    pub url: String,
    /// Outbound headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Bytes,
}

/// Rewrites an inbound request for `backend`.
///
/// Strips the backend's prefix, removes hop-by-hop and spoofed trust
/// headers, then injects the correlation id and identity headers. The
/// connection peer (or, without one, the resolved client) is appended to
/// `x-forwarded-for`.
pub fn build_forward_request(
    ctx: &ForwardContext,
    backend: &Backend,
    parts: &http::request::Parts,
    body: Bytes,
) -> ForwardedRequest {
    let mut headers = filter_headers_for_upstream(&parts.headers);
    inject_trust_headers(&mut headers, &ctx.correlation_id, ctx.identity.as_ref());
    let hop = parts
        .extensions
        .get::<PeerAddr>()
        .map(|peer| peer.0.ip())
        .or(ctx.client_ip);
    append_forwarded_for(&mut headers, &parts.headers, hop);

    ForwardedRequest {
        method: parts.method.clone(),
        url: backend.url_for(parts.uri.path(), parts.uri.query()),
        headers,
        body,
    }
}

/// Builds the caller-facing response from a backend response.
///
/// Status and body are relayed unchanged; hop-by-hop headers are dropped.
pub fn relay_response(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Response {
    let mut response = http::Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = filter_headers_for_downstream(headers);
    response
}

/// Methods safe to send twice.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

/// Pooled HTTP client for backend calls.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: Client,
    max_retries: u32,
}

impl ProxyClient {
    /// Creates the client.
    pub fn new(config: &ProxyConfig) -> ServerResult<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    /// Forwards `request` to `backend` and relays the answer.
    ///
    /// A timeout or transport failure becomes a `BackendUnavailable`
    /// placeholder. Idempotent methods are retried up to `max_retries`
    /// times after a connection failure; timeouts are never retried.
    pub async fn forward(&self, ctx: &ForwardContext, backend: &Backend, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };
        let path = parts.uri.path().to_string();
        let forwarded = build_forward_request(ctx, backend, &parts, body);
        let attempts = if is_idempotent(&forwarded.method) {
            self.max_retries + 1
        } else {
            1
        };

        let mut attempt = 1;
        loop {
            tracing::info!(
                correlation_id = %ctx.correlation_id,
                http.method = %forwarded.method,
                http.path = %path,
                backend = backend.name(),
                url = %forwarded.url,
                attempt,
                "forwarding request"
            );

            let started = Instant::now();
            match self.send(backend, &forwarded).await {
                Ok((status, headers, body)) => {
                    let elapsed = started.elapsed();
                    record_backend_call(backend.name(), BackendOutcome::Success, elapsed);
                    #[allow(clippy::cast_possible_truncation)]
                    let duration_ms = elapsed.as_millis() as u64;
                    tracing::info!(
                        correlation_id = %ctx.correlation_id,
                        http.method = %forwarded.method,
                        http.path = %path,
                        backend = backend.name(),
                        url = %forwarded.url,
                        status = status.as_u16(),
                        duration_ms,
                        "backend responded"
                    );
                    return relay_response(status, &headers, body);
                }
                Err(e) => {
                    let outcome = if e.is_timeout() {
                        BackendOutcome::Timeout
                    } else {
                        BackendOutcome::Error
                    };
                    record_backend_call(backend.name(), outcome, started.elapsed());

                    if outcome == BackendOutcome::Error && attempt < attempts {
                        tracing::warn!(
                            correlation_id = %ctx.correlation_id,
                            backend = backend.name(),
                            attempt,
                            error = %e,
                            "backend call failed, retrying"
                        );
                        attempt += 1;
                        continue;
                    }

                    let reason = if outcome == BackendOutcome::Timeout {
                        format!("timed out after {}ms", backend.timeout().as_millis())
                    } else {
                        "connection failed".to_string()
                    };
                    return Response::from_error(GatewayError::backend_unavailable_with_source(
                        backend.name(),
                        reason,
                        e,
                    ));
                }
            }
        }
    }

    async fn send(
        &self,
        backend: &Backend,
        forwarded: &ForwardedRequest,
    ) -> Result<(StatusCode, HeaderMap, Bytes), reqwest::Error> {
        let mut builder = self
            .client
            .request(forwarded.method.clone(), &forwarded.url)
            .headers(forwarded.headers.clone())
            .timeout(backend.timeout());
        if !forwarded.body.is_empty() {
            builder = builder.body(forwarded.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok((status, headers, body))
    }
}
