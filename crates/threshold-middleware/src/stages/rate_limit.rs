//! Rate limiting middleware.
//!
//! Fixed-window counting per caller and rate class:
//!
//! - The key is `<prefix><class>:user:<subject>` for authenticated callers
//!   and `<prefix><class>:ip:<addr>` otherwise
//! - Every counted request draws on the general ceiling. `auth` routes
//!   (login, registration) additionally draw on the stricter auth ceiling.
//!   `exempt` routes (probes) are not counted
//! - A request whose post-increment count exceeds any of its ceilings is
//!   rejected with `RateLimitExceeded` and never forwarded
//! - The `x-ratelimit-*` headers describe the binding ceiling: the one
//!   exceeded, otherwise the one with the fewest requests remaining
//! - Past the slow-down threshold, allowed requests are delayed by
//!   `delay_ms` per request over the threshold, capped at `max_delay_ms`
//!
//! ## Store failures
//!
//! When the store errors, `failure_policy` decides:
//!
//! | Policy | Behavior | Log level |
//! |--------|----------|-----------|
//! | `local_fallback` | count in a process-local store | warn |
//! | `fail_open` | forward uncounted | warn |
//! | `fail_closed` | reject with 503 | error |

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::store::{MemoryStore, RateStore, WindowCount};
use crate::types::{Request, Response, ResponseExt};
use http::HeaderValue;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use threshold_config::{RateLimitConfig, SlowDownConfig, StoreFailurePolicy};
use threshold_core::{GatewayError, RateClass};
use threshold_telemetry::metrics::record_rate_limited;

/// Rate limit header names.
pub mod headers {
    /// Maximum requests allowed in the window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Remaining requests in current window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Unix timestamp when the window resets.
    pub const RESET: &str = "x-ratelimit-reset";
    /// Seconds until the window resets.
    pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
}

/// Per-caller request ceilings with progressive slow-down.
pub struct RateLimitMiddleware {
    store: Arc<dyn RateStore>,
    fallback: MemoryStore,
    policy: StoreFailurePolicy,
    window: Duration,
    general_max: u64,
    auth_max: u64,
    slow_down: SlowDownConfig,
    key_prefix: String,
}

/// A counted request, as seen by the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Verdict {
    limit: u64,
    state: WindowCount,
}

impl Verdict {
    fn exceeded(&self) -> bool {
        self.state.count > self.limit
    }

    fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.state.count)
    }

    /// Whole seconds until reset, rounded up, at least one.
    fn reset_secs(&self) -> u64 {
        let reset = self.state.reset_after;
        (reset.as_secs() + u64::from(reset.subsec_nanos() > 0)).max(1)
    }
}

impl RateLimitMiddleware {
    /// Creates the stage counting in `store`.
    #[must_use]
    pub fn new(config: &RateLimitConfig, store: Arc<dyn RateStore>) -> Self {
        Self {
            store,
            fallback: MemoryStore::new(),
            policy: config.store.failure_policy,
            window: Duration::from_secs(config.window_secs),
            general_max: config.general_max,
            auth_max: config.auth_max,
            slow_down: config.slow_down.clone(),
            key_prefix: config.store.key_prefix.clone(),
        }
    }

    /// Ceilings a request of `class` counts against.
    fn ceilings(&self, class: RateClass) -> Vec<(RateClass, u64)> {
        match class {
            RateClass::Exempt => Vec::new(),
            RateClass::General => vec![(RateClass::General, self.general_max)],
            RateClass::Auth => vec![
                (RateClass::General, self.general_max),
                (RateClass::Auth, self.auth_max),
            ],
        }
    }

    /// Delay owed by the `count`-th request of a window.
    fn slow_down_delay(&self, count: u64) -> Option<Duration> {
        if !self.slow_down.enabled || count <= self.slow_down.delay_after {
            return None;
        }
        let over = count - self.slow_down.delay_after;
        let delay_ms = over
            .saturating_mul(self.slow_down.delay_ms)
            .min(self.slow_down.max_delay_ms);
        (delay_ms > 0).then(|| Duration::from_millis(delay_ms))
    }

    /// Increments `key`, applying the store failure policy.
    ///
    /// `Ok(None)` means the request goes through uncounted.
    async fn count(&self, key: &str) -> Result<Option<WindowCount>, GatewayError> {
        match self.store.increment(key, self.window).await {
            Ok(state) => Ok(Some(state)),
            Err(e) => match self.policy {
                StoreFailurePolicy::LocalFallback => {
                    tracing::warn!(store = self.store.name(), error = %e, "rate store unavailable, counting locally");
                    Ok(self.fallback.increment(key, self.window).await.ok())
                }
                StoreFailurePolicy::FailOpen => {
                    tracing::warn!(store = self.store.name(), error = %e, "rate store unavailable, request not counted");
                    Ok(None)
                }
                StoreFailurePolicy::FailClosed => {
                    tracing::error!(store = self.store.name(), error = %e, "rate store unavailable, rejecting request");
                    Err(GatewayError::backend_unavailable_with_source(
                        "rate-store",
                        "rate limit store unreachable",
                        e,
                    ))
                }
            },
        }
    }

    fn apply_headers(response: &mut Response, verdict: &Verdict) {
        let reset_secs = verdict.reset_secs();
        let reset_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + reset_secs;

        let headers = response.headers_mut();
        headers.insert(headers::LIMIT, HeaderValue::from(verdict.limit));
        headers.insert(headers::REMAINING, HeaderValue::from(verdict.remaining()));
        headers.insert(headers::RESET, HeaderValue::from(reset_at));
        headers.insert(headers::RESET_AFTER, HeaderValue::from(reset_secs));
    }
}

/// The verdict that decides the request: an exceeded ceiling (latest reset
/// first), else the ceiling with the fewest requests left.
fn binding(verdicts: &[(RateClass, Verdict)]) -> Option<(RateClass, Verdict)> {
    let exceeded = verdicts
        .iter()
        .filter(|(_, v)| v.exceeded())
        .max_by_key(|(_, v)| v.reset_secs());
    exceeded
        .or_else(|| verdicts.iter().min_by_key(|(_, v)| v.remaining()))
        .copied()
}

impl std::fmt::Debug for RateLimitMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitMiddleware")
            .field("store", &self.store.name())
            .field("policy", &self.policy)
            .field("window", &self.window)
            .field("general_max", &self.general_max)
            .field("auth_max", &self.auth_max)
            .finish_non_exhaustive()
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let class = ctx.route().map_or(RateClass::General, |m| m.rule.rate_class);
            let rate_key = ctx.rate_key();

            let mut verdicts = Vec::with_capacity(2);
            for (counted, limit) in self.ceilings(class) {
                let key = format!("{}{}:{}", self.key_prefix, counted.as_str(), rate_key);
                match self.count(&key).await {
                    Ok(Some(state)) => verdicts.push((counted, Verdict { limit, state })),
                    Ok(None) => {}
                    Err(e) => return Response::from_error(e),
                }
            }

            let Some((bound_by, verdict)) = binding(&verdicts) else {
                return next.run(ctx, request).await;
            };

            if verdict.exceeded() {
                record_rate_limited(bound_by.as_str());
                let mut response = Response::from_error(GatewayError::rate_limited(verdict.reset_secs()));
                Self::apply_headers(&mut response, &verdict);
                return response;
            }

            let general_count = verdicts
                .iter()
                .find(|(counted, _)| *counted == RateClass::General)
                .map(|(_, v)| v.state.count);
            if let Some(delay) = general_count.and_then(|count| self.slow_down_delay(count)) {
                tracing::debug!(key = %rate_key, count = ?general_count, delay = ?delay, "slowing down caller");
                tokio::time::sleep(delay).await;
            }

            let mut response = next.run(ctx, request).await;
            Self::apply_headers(&mut response, &verdict);
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::stages::RouteResolutionMiddleware;
    use crate::store::StoreError;
    use bytes::Bytes;
    use http::{header, StatusCode};
    use http_body_util::Full;
    use std::sync::atomic::{AtomicU64, Ordering};
    use threshold_core::{RouteRule, RouteTable, RouteTarget};

    struct BrokenStore;

    impl RateStore for BrokenStore {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn increment<'a>(
            &'a self,
            _key: &'a str,
            _window: Duration,
        ) -> BoxFuture<'a, Result<WindowCount, StoreError>> {
            Box::pin(async { Err(StoreError::Timeout(Duration::from_millis(250))) })
        }
    }

    fn config(general_max: u64, auth_max: u64, slow_down: bool) -> RateLimitConfig {
        let mut config = RateLimitConfig {
            general_max,
            auth_max,
            ..RateLimitConfig::default()
        };
        config.slow_down.enabled = slow_down;
        config
    }

    fn pipeline(limiter: RateLimitMiddleware) -> Pipeline {
        let table = Arc::new(RouteTable::new(vec![
            RouteRule::probe("/health", RouteTarget::Health),
            RouteRule::backend("/api/auth/*", "identity").rate_class(RateClass::Auth),
            RouteRule::backend("/api/properties/*", "listings"),
        ]));
        Pipeline::builder()
            .stage(RouteResolutionMiddleware::new(table))
            .stage(limiter)
            .build()
    }

    async fn send(pipeline: &Pipeline, path: &str, forwarded: &Arc<AtomicU64>) -> Response {
        let request = http::Request::builder()
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap();
        let ctx = MiddlewareContext::new().with_client_ip("198.51.100.4".parse().unwrap());
        let forwarded = Arc::clone(forwarded);
        pipeline
            .process(ctx, request, move |_ctx, _req| {
                forwarded.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Response::json(StatusCode::OK, &()) })
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_rejects_exactly_one_then_resets() {
        let pipeline = pipeline(RateLimitMiddleware::new(
            &config(3, 5, false),
            Arc::new(MemoryStore::new()),
        ));
        let forwarded = Arc::new(AtomicU64::new(0));

        let mut statuses = Vec::new();
        for _ in 0..4 {
            statuses.push(send(&pipeline, "/api/properties/9", &forwarded).await.status());
        }
        assert_eq!(
            statuses,
            vec![StatusCode::OK, StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );
        assert_eq!(forwarded.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(900)).await;
        let response = send(&pipeline, "/api/properties/9", &forwarded).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(headers::REMAINING).unwrap(), "2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_headers() {
        let pipeline = pipeline(RateLimitMiddleware::new(
            &config(1, 5, false),
            Arc::new(MemoryStore::new()),
        ));
        let forwarded = Arc::new(AtomicU64::new(0));

        let first = send(&pipeline, "/api/properties/9", &forwarded).await;
        assert_eq!(first.headers().get(headers::LIMIT).unwrap(), "1");
        assert_eq!(first.headers().get(headers::REMAINING).unwrap(), "0");

        let second = send(&pipeline, "/api/properties/9", &forwarded).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers().get(header::RETRY_AFTER).unwrap(), "900");
        assert_eq!(second.headers().get(headers::RESET_AFTER).unwrap(), "900");
        assert!(matches!(
            second.gateway_error(),
            Some(GatewayError::RateLimitExceeded { retry_after_secs: 900 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_ceiling_applies_on_top_of_general() {
        let pipeline = pipeline(RateLimitMiddleware::new(
            &config(100, 2, false),
            Arc::new(MemoryStore::new()),
        ));
        let forwarded = Arc::new(AtomicU64::new(0));

        let first = send(&pipeline, "/api/auth/login", &forwarded).await;
        assert_eq!(first.headers().get(headers::LIMIT).unwrap(), "2");
        assert_eq!(first.headers().get(headers::REMAINING).unwrap(), "1");
        send(&pipeline, "/api/auth/login", &forwarded).await;
        let third = send(&pipeline, "/api/auth/login", &forwarded).await;
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);

        // Three login attempts also drew on the general budget.
        let general = send(&pipeline, "/api/properties/1", &forwarded).await;
        assert_eq!(general.status(), StatusCode::OK);
        assert_eq!(general.headers().get(headers::LIMIT).unwrap(), "100");
        assert_eq!(general.headers().get(headers::REMAINING).unwrap(), "96");
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_and_general_share_general_budget() {
        let pipeline = pipeline(RateLimitMiddleware::new(
            &config(2, 5, false),
            Arc::new(MemoryStore::new()),
        ));
        let forwarded = Arc::new(AtomicU64::new(0));

        let mut statuses = Vec::new();
        for path in ["/api/auth/login", "/api/auth/login", "/api/properties/1"] {
            statuses.push(send(&pipeline, path, &forwarded).await.status());
        }
        assert_eq!(
            statuses,
            vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );

        let login = send(&pipeline, "/api/auth/login", &forwarded).await;
        assert_eq!(login.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(login.headers().get(headers::LIMIT).unwrap(), "2");
        assert_eq!(forwarded.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_are_exempt() {
        let pipeline = pipeline(RateLimitMiddleware::new(
            &config(1, 1, false),
            Arc::new(MemoryStore::new()),
        ));
        let forwarded = Arc::new(AtomicU64::new(0));

        for _ in 0..5 {
            let response = send(&pipeline, "/health", &forwarded).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(headers::LIMIT).is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_down_delays_after_threshold() {
        let mut cfg = config(10, 5, true);
        cfg.slow_down.delay_after = 2;
        cfg.slow_down.delay_ms = 500;
        cfg.slow_down.max_delay_ms = 800;
        let pipeline = pipeline(RateLimitMiddleware::new(&cfg, Arc::new(MemoryStore::new())));
        let forwarded = Arc::new(AtomicU64::new(0));

        let mut elapsed = Vec::new();
        for _ in 0..5 {
            let start = tokio::time::Instant::now();
            send(&pipeline, "/api/properties/1", &forwarded).await;
            elapsed.push(start.elapsed());
        }

        let millis: Vec<u128> = elapsed.iter().map(Duration::as_millis).collect();
        assert!(millis[0] < 1 && millis[1] < 1, "{millis:?}");
        assert!((500..=501).contains(&millis[2]), "{millis:?}");
        assert!((800..=801).contains(&millis[3]), "{millis:?}");
        assert!((800..=801).contains(&millis[4]), "{millis:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_down_never_overrides_rejection() {
        let mut cfg = config(2, 5, true);
        cfg.slow_down.delay_after = 1;
        let pipeline = pipeline(RateLimitMiddleware::new(&cfg, Arc::new(MemoryStore::new())));
        let forwarded = Arc::new(AtomicU64::new(0));

        send(&pipeline, "/api/properties/1", &forwarded).await;
        send(&pipeline, "/api/properties/1", &forwarded).await;

        let start = tokio::time::Instant::now();
        let rejected = send(&pipeline, "/api/properties/1", &forwarded).await;
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_policy_local_fallback_still_limits() {
        let mut cfg = config(1, 5, false);
        cfg.store.failure_policy = StoreFailurePolicy::LocalFallback;
        let pipeline = pipeline(RateLimitMiddleware::new(&cfg, Arc::new(BrokenStore)));
        let forwarded = Arc::new(AtomicU64::new(0));

        assert_eq!(send(&pipeline, "/api/properties/1", &forwarded).await.status(), StatusCode::OK);
        assert_eq!(
            send(&pipeline, "/api/properties/1", &forwarded).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_failure_policy_fail_open() {
        let mut cfg = config(1, 5, false);
        cfg.store.failure_policy = StoreFailurePolicy::FailOpen;
        let pipeline = pipeline(RateLimitMiddleware::new(&cfg, Arc::new(BrokenStore)));
        let forwarded = Arc::new(AtomicU64::new(0));

        for _ in 0..3 {
            let response = send(&pipeline, "/api/properties/1", &forwarded).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(headers::LIMIT).is_none());
        }
        assert_eq!(forwarded.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_policy_fail_closed() {
        let mut cfg = config(1, 5, false);
        cfg.store.failure_policy = StoreFailurePolicy::FailClosed;
        let pipeline = pipeline(RateLimitMiddleware::new(&cfg, Arc::new(BrokenStore)));
        let forwarded = Arc::new(AtomicU64::new(0));

        let response = send(&pipeline, "/api/properties/1", &forwarded).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(forwarded.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_slow_down_delay_curve() {
        let mut cfg = RateLimitConfig::default();
        cfg.slow_down.delay_after = 50;
        cfg.slow_down.delay_ms = 500;
        cfg.slow_down.max_delay_ms = 20_000;
        let limiter = RateLimitMiddleware::new(&cfg, Arc::new(MemoryStore::new()));

        assert_eq!(limiter.slow_down_delay(50), None);
        assert_eq!(limiter.slow_down_delay(51), Some(Duration::from_millis(500)));
        assert_eq!(limiter.slow_down_delay(60), Some(Duration::from_millis(5_000)));
        assert_eq!(limiter.slow_down_delay(500), Some(Duration::from_millis(20_000)));
    }
}
