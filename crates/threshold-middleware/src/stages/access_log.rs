//! Access log middleware.
//!
//! Emits one structured log line and the request metrics for every
//! request, after the response status is final.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use threshold_telemetry::metrics::{record_request, InFlightGuard};

/// Logs and counts every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLogMiddleware;

impl AccessLogMiddleware {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for AccessLogMiddleware {
    fn name(&self) -> &'static str {
        "access_log"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let _in_flight = InFlightGuard::new();
            let method = request.method().clone();
            let path = request.uri().path().to_string();

            let response = next.run(ctx, request).await;

            let status = response.status();
            let elapsed = ctx.elapsed();
            let route = ctx
                .route()
                .map_or("unmatched", |m| m.rule.target.label())
                .to_string();
            let subject_id = ctx.identity().map_or("-", |i| i.subject_id.as_str());

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = elapsed.as_millis() as u64;

            tracing::info!(
                correlation_id = %ctx.correlation_id(),
                http.method = %method,
                http.path = %path,
                route = %route,
                status = status.as_u16(),
                subject_id,
                duration_ms,
                "request completed"
            );
            record_request(&route, status.as_u16(), elapsed);

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::types::ResponseExt;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;

    #[tokio::test]
    async fn test_response_is_untouched() {
        let pipeline = Pipeline::builder().stage(AccessLogMiddleware::new()).build();
        let request = http::Request::builder()
            .uri("/live")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = pipeline
            .process(MiddlewareContext::new(), request, |_ctx, _req| {
                Box::pin(async { Response::json(StatusCode::CREATED, &()) })
            })
            .await;

        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
