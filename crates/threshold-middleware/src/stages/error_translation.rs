//! Error translation middleware.
//!
//! Every failure produced below this stage arrives as a placeholder response
//! carrying a [`GatewayError`]. This stage logs it with the request's
//! correlation id, path, method and subject, then replaces the body with the
//! failure envelope:
//!
//! ```json
//! {
//!   "success": false,
//!   "error": "InsufficientRole",
//!   "message": "role 'buyer' is not permitted to access this resource",
//!   "statusCode": 403,
//!   "timestamp": "2024-05-01T12:00:00Z",
//!   "correlationId": "3f1c..."
//! }
//! ```
//!
//! A panic below this stage is caught and rendered as `InternalError`.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Failure, Request, Response, ResponseExt};
use bytes::Bytes;
use futures_util::FutureExt;
use http::{header, HeaderValue, Method};
use http_body_util::Full;
use std::panic::AssertUnwindSafe;
use threshold_core::GatewayError;

/// Renders failures into the envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTranslationMiddleware {
    /// Attach the error chain to envelopes. Never set in production.
    include_stack: bool,
}

impl ErrorTranslationMiddleware {
    /// Creates the stage; `include_stack` must be `false` in production.
    #[must_use]
    pub const fn new(include_stack: bool) -> Self {
        Self { include_stack }
    }

    fn log_failure(ctx: &MiddlewareContext, method: &Method, path: &str, error: &GatewayError) {
        let subject_id = ctx.identity().map_or("-", |i| i.subject_id.as_str());

        if error.status_code().is_server_error() {
            tracing::error!(
                correlation_id = %ctx.correlation_id(),
                http.method = %method,
                http.path = %path,
                subject_id,
                code = %error.code(),
                error = %error.stack_trace(),
                "request failed"
            );
        } else {
            tracing::warn!(
                correlation_id = %ctx.correlation_id(),
                http.method = %method,
                http.path = %path,
                subject_id,
                code = %error.code(),
                error = %error,
                "request rejected"
            );
        }
    }

    fn render(&self, ctx: &MiddlewareContext, mut response: Response, failure: Failure) -> Response {
        let envelope = failure
            .0
            .to_envelope(ctx.correlation_id(), self.include_stack);

        match serde_json::to_vec(&envelope) {
            Ok(body) => {
                *response.body_mut() = Full::new(Bytes::from(body));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize failure envelope");
            }
        }

        response.extensions_mut().insert(failure);
        response
    }
}

impl Middleware for ErrorTranslationMiddleware {
    fn name(&self) -> &'static str {
        "error_translation"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let method = request.method().clone();
            let path = request.uri().path().to_string();

            let mut response = match AssertUnwindSafe(next.run(ctx, request))
                .catch_unwind()
                .await
            {
                Ok(response) => response,
                Err(_) => Response::from_error(GatewayError::internal("request processing panicked")),
            };

            match response.extensions_mut().remove::<Failure>() {
                Some(failure) => {
                    Self::log_failure(ctx, &method, &path, &failure.0);
                    self.render(ctx, response, failure)
                }
                None => response,
            }
        })
    }
}
