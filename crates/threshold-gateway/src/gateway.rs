//! Gateway assembly and dispatch.
//!
//! [`Gateway`] owns the middleware pipeline and the terminal dispatcher
//! that runs once every stage has passed: proxy to a backend, or answer a
//! probe locally.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::{header, HeaderMap, HeaderValue, StatusCode};
use serde::Serialize;

use threshold_config::{GatewayConfig, RateLimitConfig, StoreFailurePolicy};
use threshold_core::{CorrelationId, GatewayError, RouteTable, RouteTarget, SuccessEnvelope};
use threshold_core::CORRELATION_ID_HEADER;
use threshold_middleware::stages::{
    AccessLogMiddleware, AuthenticationMiddleware, AuthorizationMiddleware, CorrelationMiddleware,
    CorsMiddleware, ErrorTranslationMiddleware, RateLimitMiddleware, RouteResolutionMiddleware,
};
use threshold_middleware::{
    MemoryStore, MiddlewareContext, Pipeline, RateStore, RedisStore, Request, Response,
    ResponseExt, TokenVerifier,
};

use crate::backends::BackendRegistry;
use crate::error::ServerResult;
use crate::health::HealthAggregator;
use crate::proxy::{ForwardContext, ProxyClient};
use crate::routes::default_route_table;

/// Longer inbound correlation ids are replaced.
const MAX_INBOUND_CORRELATION_LEN: usize = 128;

/// Body of `GET /version`.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    /// Package name.
    pub name: &'static str,
    /// Package version.
    pub version: &'static str,
}

impl VersionInfo {
    /// Build information of this binary.
    pub const fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: crate::VERSION,
        }
    }
}

/// The assembled gateway.
pub struct Gateway {
    pipeline: Pipeline,
    dispatcher: Arc<Dispatcher>,
    cors: CorsMiddleware,
    include_stack: bool,
}

impl Gateway {
    /// Builds the gateway with the default route table.
    pub fn from_config(config: &GatewayConfig, store: Arc<dyn RateStore>) -> ServerResult<Self> {
        Self::with_route_table(config, store, default_route_table())
    }

    /// Builds the gateway over a custom route table.
    ///
    /// Fails if a rule references a backend the configuration does not
    /// register.
    pub fn with_route_table(
        config: &GatewayConfig,
        store: Arc<dyn RateStore>,
        table: RouteTable,
    ) -> ServerResult<Self> {
        config.validate_backend_refs(table.backend_names())?;

        let backends = BackendRegistry::from_config(&config.backends)?;
        let proxy = ProxyClient::new(&config.proxy)?;
        let probe_client = reqwest::Client::builder().build()?;
        let health = HealthAggregator::new(probe_client, backends.clone(), &config.health);
        let include_stack = !config.server.environment.is_production();
        let cors = CorsMiddleware::from_config(&config.cors);

        let pipeline = Pipeline::builder()
            .stage(CorrelationMiddleware::new())
            .stage(AccessLogMiddleware::new())
            .stage(ErrorTranslationMiddleware::new(include_stack))
            .stage(cors.clone())
            .stage(RouteResolutionMiddleware::new(Arc::new(table)))
            .stage(AuthenticationMiddleware::new(TokenVerifier::new(
                &config.auth.jwt_secret,
                config.auth.leeway_secs,
            )))
            .stage(RateLimitMiddleware::new(&config.rate_limit, store))
            .stage(AuthorizationMiddleware::new())
            .build();

        tracing::info!(
            stages = ?pipeline.stage_names(),
            backends = backends.len(),
            "gateway assembled"
        );

        Ok(Self {
            pipeline,
            dispatcher: Arc::new(Dispatcher {
                proxy,
                backends,
                health,
                ready: AtomicBool::new(true),
            }),
            cors,
            include_stack,
        })
    }

    /// Runs one request through the pipeline and dispatches it.
    pub async fn handle(&self, request: Request, client_ip: IpAddr) -> Response {
        let ctx = MiddlewareContext::new().with_client_ip(client_ip);
        let dispatcher = Arc::clone(&self.dispatcher);

        self.pipeline
            .process(ctx, request, move |ctx, request| {
                let target = ctx.route().map(|m| m.rule.target.clone());
                let forward = ForwardContext::from_middleware(ctx);
                Box::pin(async move { dispatcher.dispatch(target, forward, request).await })
            })
            .await
    }

    /// Marks the gateway ready or draining. `/ready` answers 503 while not ready.
    pub fn set_ready(&self, ready: bool) {
        self.dispatcher.ready.store(ready, Ordering::SeqCst);
    }

    /// Returns `true` unless the gateway is draining.
    pub fn is_ready(&self) -> bool {
        self.dispatcher.ready.load(Ordering::SeqCst)
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.pipeline.stage_names()
    }

    /// Renders a failure for a request rejected before the pipeline ran.
    ///
    /// `headers` are the inbound request headers; the correlation id and
    /// CORS origin are taken from them.
    pub fn reject(&self, error: &GatewayError, headers: &HeaderMap) -> Response {
        let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let correlation_id = CorrelationId::from_header(
            header_str(CORRELATION_ID_HEADER).filter(|v| v.len() <= MAX_INBOUND_CORRELATION_LEN),
        );
        let envelope = error.to_envelope(&correlation_id, self.include_stack);
        let mut response = Response::json(error.status_code(), &envelope);
        if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
            response.headers_mut().insert(CORRELATION_ID_HEADER, value);
        }
        if let Some(secs) = error.retry_after_secs() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        self.cors.decorate_for(&mut response, header_str(header::ORIGIN.as_str()));
        response
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("stages", &self.pipeline.stage_names())
            .field("backends", &self.dispatcher.backends.len())
            .finish_non_exhaustive()
    }
}

struct Dispatcher {
    proxy: ProxyClient,
    backends: BackendRegistry,
    health: HealthAggregator,
    ready: AtomicBool,
}

impl Dispatcher {
    async fn dispatch(
        &self,
        target: Option<RouteTarget>,
        ctx: ForwardContext,
        request: Request,
    ) -> Response {
        let Some(target) = target else {
            return Response::from_error(GatewayError::internal("request reached dispatch unrouted"));
        };
        let correlation_id = &ctx.correlation_id;

        match target {
            RouteTarget::Backend(name) => match self.backends.get(&name) {
                Some(backend) => self.proxy.forward(&ctx, backend, request).await,
                None => Response::from_error(GatewayError::internal(format!(
                    "route references unregistered backend '{name}'"
                ))),
            },
            RouteTarget::Health => {
                let snapshot = self.health.check().await;
                Response::json(StatusCode::OK, &SuccessEnvelope::new(snapshot, correlation_id))
            }
            RouteTarget::Readiness => {
                if self.ready.load(Ordering::SeqCst) {
                    Response::json(
                        StatusCode::OK,
                        &SuccessEnvelope::message_only("ready", correlation_id),
                    )
                } else {
                    Response::from_error(GatewayError::backend_unavailable("gateway", "draining"))
                }
            }
            RouteTarget::Liveness => Response::json(
                StatusCode::OK,
                &SuccessEnvelope::message_only("alive", correlation_id),
            ),
            RouteTarget::Version => Response::json(
                StatusCode::OK,
                &SuccessEnvelope::new(VersionInfo::current(), correlation_id),
            ),
        }
    }
}

/// Opens the rate-limit counter store.
///
/// Without a Redis URL counters live in process memory. If Redis is
/// configured but unreachable, startup fails under `fail_closed` and falls
/// back to memory otherwise.
pub async fn connect_store(config: &RateLimitConfig) -> ServerResult<Arc<dyn RateStore>> {
    let Some(url) = config.store.redis_url.as_deref() else {
        tracing::info!("rate-limit counters held in process memory");
        return Ok(Arc::new(MemoryStore::new()));
    };

    match RedisStore::connect(url).await {
        Ok(store) => {
            tracing::info!("rate-limit counters held in redis");
            Ok(Arc::new(store))
        }
        Err(e) if config.store.failure_policy == StoreFailurePolicy::FailClosed => {
            tracing::error!(error = %e, "rate-limit store unreachable");
            Err(e.into())
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "rate-limit store unreachable, counting in process memory"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use threshold_config::BackendConfig;

    fn gateway() -> Gateway {
        Gateway::from_config(&GatewayConfig::default(), Arc::new(MemoryStore::new())).unwrap()
    }

    fn get(path: &str) -> Request {
        http::Request::builder()
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn localhost() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    #[test]
    fn test_unknown_backend_reference_fails_startup() {
        let mut config = GatewayConfig::default();
        config.backends = vec![BackendConfig::new("identity", "http://127.0.0.1:3001")];
        let err = Gateway::from_config(&config, Arc::new(MemoryStore::new())).unwrap_err();
        assert!(err.to_string().contains("unknown backend"));
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(
            gateway().stage_names(),
            vec![
                "correlation",
                "access_log",
                "error_translation",
                "cors",
                "route_resolution",
                "authentication",
                "rate_limit",
                "authorization",
            ]
        );
    }

    #[tokio::test]
    async fn test_liveness_and_version() {
        let gateway = gateway();

        let live = gateway.handle(get("/live"), localhost()).await;
        assert_eq!(live.status(), StatusCode::OK);
        let json = body_json(live).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "alive");

        let version = body_json(gateway.handle(get("/version"), localhost()).await).await;
        assert_eq!(version["data"]["version"], crate::VERSION);
        assert_eq!(version["data"]["name"], "threshold-gateway");
    }

    #[tokio::test]
    async fn test_readiness_follows_drain_state() {
        let gateway = gateway();
        assert_eq!(
            gateway.handle(get("/ready"), localhost()).await.status(),
            StatusCode::OK
        );

        gateway.set_ready(false);
        let response = gateway.handle(get("/ready"), localhost()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert!(json["correlationId"].is_string());
    }

    #[tokio::test]
    async fn test_reject_renders_envelope() {
        let mut inbound = HeaderMap::new();
        inbound.insert(CORRELATION_ID_HEADER, HeaderValue::from_static("c-1"));
        inbound.insert(header::ORIGIN, HeaderValue::from_static("http://localhost:3000"));

        let response = gateway().reject(&GatewayError::PayloadTooLarge { limit: 16 }, &inbound);
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers().get(CORRELATION_ID_HEADER).unwrap(), "c-1");
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "http://localhost:3000"
        );
        let json = body_json(response).await;
        assert_eq!(json["correlationId"], "c-1");
        assert_eq!(json["statusCode"], 413);
    }

    #[tokio::test]
    async fn test_memory_store_without_redis() {
        let store = connect_store(&RateLimitConfig::default()).await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn test_unreachable_redis() {
        let mut config = RateLimitConfig::default();
        config.store.redis_url = Some("redis://127.0.0.1:1".to_string());

        let store = connect_store(&config).await.unwrap();
        assert_eq!(store.name(), "memory");

        config.store.failure_policy = StoreFailurePolicy::FailClosed;
        assert!(connect_store(&config).await.is_err());
    }
}
