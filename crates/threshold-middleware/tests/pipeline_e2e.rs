//! End-to-end pipeline integration tests.
//!
//! These tests run all 8 stages together in the gateway's order:
//!
//! 1. Correlation - Propagate or generate the correlation id
//! 2. Access Log - Log line and metrics
//! 3. Error Translation - Failure envelope
//! 4. CORS - Preflight handling
//! 5. Route Resolution - Route table lookup
//! 6. Authentication - Bearer verification
//! 7. Rate Limit - Per-caller ceilings
//! 8. Authorization - 401 / 403 enforcement

use bytes::Bytes;
use http::{header, Method, Request as HttpRequest, StatusCode};
use http_body_util::{BodyExt, Full};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use threshold_config::{CorsConfig, RateLimitConfig};
use threshold_core::{
    AuthRequirement, Claims, RateClass, Role, RouteRule, RouteTable, RouteTarget,
    CORRELATION_ID_HEADER,
};
use threshold_middleware::{
    context::MiddlewareContext,
    pipeline::{Pipeline, Stage},
    sign_token,
    stages::{
        rate_limit::headers as rate_headers, AccessLogMiddleware, AuthenticationMiddleware,
        AuthorizationMiddleware, CorrelationMiddleware, CorsMiddleware,
        ErrorTranslationMiddleware, RateLimitMiddleware, RouteResolutionMiddleware,
    },
    types::{Request, Response, ResponseExt},
    MemoryStore, TokenVerifier,
};

const SECRET: &str = "e2e-secret";
const UI: &str = "http://localhost:3000";

fn route_table() -> Arc<RouteTable> {
    Arc::new(RouteTable::new(vec![
        RouteRule::probe("/live", RouteTarget::Liveness),
        RouteRule::backend("/api/auth/*", "identity").rate_class(RateClass::Auth),
        RouteRule::backend("/api/users/*", "identity").auth(AuthRequirement::Required),
        RouteRule::backend("/api/admin/*", "identity")
            .auth(AuthRequirement::Required)
            .allow_roles([Role::Admin]),
        RouteRule::backend("/api/search/*", "search").auth(AuthRequirement::Optional),
    ]))
}

fn build_pipeline(general_max: u64) -> Pipeline {
    let rate_limit = RateLimitConfig {
        general_max,
        auth_max: 2,
        ..RateLimitConfig::default()
    };
    let cors = CorsConfig {
        enabled: true,
        allowed_origins: vec![UI.to_string()],
        allow_credentials: true,
        max_age_secs: 600,
    };

    Pipeline::builder()
        .stage(CorrelationMiddleware::new())
        .stage(AccessLogMiddleware::new())
        .stage(ErrorTranslationMiddleware::new(false))
        .stage(CorsMiddleware::from_config(&cors))
        .stage(RouteResolutionMiddleware::new(route_table()))
        .stage(AuthenticationMiddleware::new(TokenVerifier::new(SECRET, 0)))
        .stage(RateLimitMiddleware::new(&rate_limit, Arc::new(MemoryStore::new())))
        .stage(AuthorizationMiddleware::new())
        .build()
}

fn token(subject: &str, role: Role) -> String {
    #[allow(clippy::cast_possible_wrap)]
    let now = jsonwebtoken::get_current_timestamp() as i64;
    sign_token(
        &Claims {
            sub: subject.to_string(),
            email: format!("{subject}@example.com"),
            role,
            iat: now,
            exp: now + 900,
        },
        SECRET,
    )
    .unwrap()
}

fn make_request(method: Method, path: &str, headers: &[(&str, &str)]) -> Request {
    let mut builder = HttpRequest::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

async fn run(pipeline: &Pipeline, request: Request, hits: &Arc<AtomicUsize>) -> Response {
    let hits = Arc::clone(hits);
    let ctx = MiddlewareContext::new().with_client_ip("203.0.113.9".parse().unwrap());
    pipeline
        .process(ctx, request, move |_ctx, _req| {
            hits.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Response::json(StatusCode::OK, &serde_json::json!({"ok": true})) })
        })
        .await
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[test]
fn test_stage_order() {
    let pipeline = build_pipeline(10);
    let expected: Vec<&str> = Stage::all().iter().map(|s| s.name()).collect();
    assert_eq!(pipeline.stage_names(), expected);
}

#[tokio::test]
async fn test_success_carries_correlation_id() {
    let pipeline = build_pipeline(10);
    let hits = Arc::new(AtomicUsize::new(0));

    let response = run(
        &pipeline,
        make_request(Method::GET, "/api/search/homes", &[(CORRELATION_ID_HEADER, "trace-abc")]),
        &hits,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(CORRELATION_ID_HEADER).unwrap(), "trace-abc");
    assert_eq!(response.headers().get(rate_headers::LIMIT).unwrap(), "10");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failure_envelope_matches_header() {
    let pipeline = build_pipeline(10);
    let hits = Arc::new(AtomicUsize::new(0));

    let response = run(&pipeline, make_request(Method::GET, "/api/users/me", &[]), &hits).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let header_id = response
        .headers()
        .get(CORRELATION_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "MissingCredential");
    assert_eq!(json["statusCode"], 401);
    assert_eq!(json["correlationId"], header_id.as_str());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_route_is_404_envelope() {
    let pipeline = build_pipeline(10);
    let hits = Arc::new(AtomicUsize::new(0));

    let response = run(&pipeline, make_request(Method::GET, "/api/billing", &[]), &hits).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "RouteNotFound");
}

#[tokio::test]
async fn test_unauthenticated_requests_are_counted() {
    let pipeline = build_pipeline(2);
    let hits = Arc::new(AtomicUsize::new(0));

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = run(&pipeline, make_request(Method::GET, "/api/users/me", &[]), &hits).await;
        statuses.push(response.status());
    }

    assert_eq!(
        statuses,
        vec![StatusCode::UNAUTHORIZED, StatusCode::UNAUTHORIZED, StatusCode::TOO_MANY_REQUESTS]
    );
}

#[tokio::test]
async fn test_subjects_have_separate_budgets() {
    let pipeline = build_pipeline(1);
    let hits = Arc::new(AtomicUsize::new(0));
    let alice = format!("Bearer {}", token("alice", Role::Buyer));
    let bob = format!("Bearer {}", token("bob", Role::Buyer));

    let a1 = run(&pipeline, make_request(Method::GET, "/api/users/me", &[("authorization", &alice)]), &hits).await;
    let b1 = run(&pipeline, make_request(Method::GET, "/api/users/me", &[("authorization", &bob)]), &hits).await;
    let a2 = run(&pipeline, make_request(Method::GET, "/api/users/me", &[("authorization", &alice)]), &hits).await;

    assert_eq!(a1.status(), StatusCode::OK);
    assert_eq!(b1.status(), StatusCode::OK);
    assert_eq!(a2.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(a2.headers().get(header::RETRY_AFTER).unwrap(), "900");

    let json = body_json(a2).await;
    assert_eq!(json["error"], "RateLimitExceeded");
    assert_eq!(json["retryAfter"], 900);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_role_rejection_is_403() {
    let pipeline = build_pipeline(10);
    let hits = Arc::new(AtomicUsize::new(0));
    let bearer = format!("Bearer {}", token("carol", Role::SuperAdmin));

    let response = run(
        &pipeline,
        make_request(Method::GET, "/api/admin/users", &[("authorization", &bearer)]),
        &hits,
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "InsufficientRole");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_preflight_short_circuits_routing() {
    let pipeline = build_pipeline(10);
    let hits = Arc::new(AtomicUsize::new(0));

    let response = run(
        &pipeline,
        make_request(
            Method::OPTIONS,
            "/api/not-a-route",
            &[("origin", UI), ("access-control-request-method", "GET")],
        ),
        &hits,
    )
    .await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

fn explode() -> Response {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_handler_panic_is_internal_error() {
    let pipeline = build_pipeline(10);

    let response = pipeline
        .process(
            MiddlewareContext::new(),
            make_request(Method::GET, "/api/search/homes", &[]),
            |_ctx, _req| Box::pin(async { explode() }),
        )
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
    let json = body_json(response).await;
    assert_eq!(json["error"], "InternalError");
    assert!(json.get("stack").is_none());
}
