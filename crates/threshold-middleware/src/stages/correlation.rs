//! Correlation id middleware.
//!
//! Adopts the inbound `x-correlation-id` or mints a UUID, opens the request
//! span, and always echoes the id on the response. It never rejects.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use http::HeaderValue;
use threshold_core::{CorrelationId, CORRELATION_ID_HEADER};
use tracing::Instrument;

/// Longest inbound id that is adopted as-is.
const MAX_INBOUND_LEN: usize = 128;

/// Propagates the correlation id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationMiddleware;

impl CorrelationMiddleware {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn extract(request: &Request) -> CorrelationId {
        let inbound = request
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.len() <= MAX_INBOUND_LEN);
        CorrelationId::from_header(inbound)
    }
}

impl Middleware for CorrelationMiddleware {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let correlation_id = Self::extract(&request);
            ctx.set_correlation_id(correlation_id.clone());

            let span = tracing::info_span!(
                "request",
                correlation_id = %correlation_id,
                http.method = %request.method(),
                http.path = %request.uri().path(),
            );

            let mut response = next.run(ctx, request).instrument(span).await;

            if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
                response.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
            response
        })
    }
}
