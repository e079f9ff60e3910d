//! Common types used throughout the middleware pipeline.

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use std::sync::Arc;
use threshold_core::GatewayError;

/// The HTTP request type used in the middleware pipeline.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the middleware pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// A failure attached to a placeholder response.
///
/// Stages never render error bodies themselves. They return a response
/// carrying this extension and the error translation stage turns it into
/// the failure envelope.
#[derive(Debug, Clone)]
pub struct Failure(pub Arc<GatewayError>);

/// Extension trait for building pipeline responses.
pub trait ResponseExt {
    /// Serializes `body` as JSON with the given status.
    fn json<T: Serialize>(status: StatusCode, body: &T) -> Response;

    /// Creates a placeholder response carrying `error`.
    fn from_error(error: GatewayError) -> Response;

    /// Returns the failure attached by [`ResponseExt::from_error`], if any.
    fn gateway_error(&self) -> Option<&GatewayError>;
}

impl ResponseExt for Response {
    fn json<T: Serialize>(status: StatusCode, body: &T) -> Response {
        match serde_json::to_vec(body) {
            Ok(bytes) => http::Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(bytes)))
                .expect("failed to build JSON response"),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response body");
                http::Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                    .body(Full::new(Bytes::from_static(b"internal error")))
                    .expect("failed to build error response")
            }
        }
    }

    fn from_error(error: GatewayError) -> Response {
        let mut response = http::Response::builder()
            .status(error.status_code())
            .body(Full::new(Bytes::new()))
            .expect("failed to build error response");

        if let Some(secs) = error.retry_after_secs() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response.extensions_mut().insert(Failure(Arc::new(error)));
        response
    }

    fn gateway_error(&self) -> Option<&GatewayError> {
        self.extensions().get::<Failure>().map(|f| f.0.as_ref())
    }
}
