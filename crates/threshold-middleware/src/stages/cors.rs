//! CORS (Cross-Origin Resource Sharing) middleware.
//!
//! Answers browser preflights without touching the route table and adds
//! the allow-origin headers to responses for listed origins, failures
//! included.
//!
//! ## Preflight Requests
//!
//! An `OPTIONS` request carrying both `Origin` and
//! `Access-Control-Request-Method` is a preflight. A listed origin gets a
//! `204 No Content` with the allowed methods and headers; anything else fails
//! with `CorsRejected` (403), rendered by the error translation stage.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use bytes::Bytes;
use http::{header, HeaderValue, Method, StatusCode};
use http_body_util::Full;
use std::collections::HashSet;
use threshold_config::CorsConfig;
use threshold_core::GatewayError;

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Access-Control-Expose-Headers` header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Access-Control-Request-Method` header (preflight).
    pub const REQUEST_METHOD: &str = "access-control-request-method";
    /// `Access-Control-Request-Headers` header (preflight).
    pub const REQUEST_HEADERS: &str = "access-control-request-headers";
}

const ALLOWED_METHODS: &str = "GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS";
const ALLOWED_HEADERS: [&str; 3] = ["content-type", "authorization", "x-correlation-id"];
const EXPOSED_HEADERS: &str = "x-correlation-id, x-ratelimit-limit, x-ratelimit-remaining, \
                               x-ratelimit-reset, retry-after";

/// The set of origins a browser may call from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Any origin (`*` in the configured list).
    Any,
    /// Exactly these origins.
    List(HashSet<String>),
}

impl AllowedOrigins {
    /// Checks if an origin is allowed.
    #[must_use]
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.contains(origin),
        }
    }
}

/// Handles preflights and decorates cross-origin responses.
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    enabled: bool,
    origins: AllowedOrigins,
    allow_credentials: bool,
    max_age_secs: u64,
}

impl CorsMiddleware {
    /// Builds the stage from configuration.
    #[must_use]
    pub fn from_config(config: &CorsConfig) -> Self {
        let origins = if config.allowed_origins.iter().any(|o| o == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(config.allowed_origins.iter().cloned().collect())
        };

        Self {
            enabled: config.enabled,
            origins,
            allow_credentials: config.allow_credentials,
            max_age_secs: config.max_age_secs,
        }
    }

    fn is_preflight(request: &Request) -> bool {
        request.method() == Method::OPTIONS
            && request.headers().contains_key(header::ORIGIN)
            && request.headers().contains_key(headers::REQUEST_METHOD)
    }

    fn origin(request: &Request) -> Option<String> {
        request
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    /// Echoes the caller's origin; with credentials the wildcard is not allowed.
    fn allow_origin_value(&self, origin: &str) -> Option<HeaderValue> {
        match (&self.origins, self.allow_credentials) {
            (AllowedOrigins::Any, false) => Some(HeaderValue::from_static("*")),
            _ => HeaderValue::from_str(origin).ok(),
        }
    }

    fn handle_preflight(&self, request: &Request) -> Response {
        let origin = match Self::origin(request) {
            Some(origin) if self.origins.is_allowed(&origin) => origin,
            Some(origin) => {
                return Response::from_error(GatewayError::cors_rejected(format!(
                    "origin '{origin}' not allowed"
                )))
            }
            None => return Response::from_error(GatewayError::cors_rejected("origin not readable")),
        };

        if let Some(requested) = request.headers().get(headers::REQUEST_HEADERS) {
            let requested = requested.to_str().unwrap_or_default();
            for name in requested.split(',').map(|h| h.trim().to_ascii_lowercase()) {
                if !name.is_empty() && !ALLOWED_HEADERS.contains(&name.as_str()) {
                    return Response::from_error(GatewayError::cors_rejected(format!(
                        "header '{name}' not allowed"
                    )));
                }
            }
        }

        let mut builder = http::Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header(headers::ALLOW_METHODS, ALLOWED_METHODS)
            .header(headers::ALLOW_HEADERS, ALLOWED_HEADERS.join(", "))
            .header(headers::MAX_AGE, self.max_age_secs.to_string())
            .header(
                header::VARY,
                "Origin, Access-Control-Request-Method, Access-Control-Request-Headers",
            );

        if let Some(value) = self.allow_origin_value(&origin) {
            builder = builder.header(headers::ALLOW_ORIGIN, value);
        }
        if self.allow_credentials {
            builder = builder.header(headers::ALLOW_CREDENTIALS, "true");
        }

        builder
            .body(Full::new(Bytes::new()))
            .expect("valid preflight response")
    }

    /// Adds the allow-origin headers for `origin` if it is listed.
    ///
    /// Used for responses produced outside the pipeline.
    pub fn decorate_for(&self, response: &mut Response, origin: Option<&str>) {
        if !self.enabled {
            return;
        }
        if let Some(origin) = origin.filter(|o| self.origins.is_allowed(o)) {
            self.decorate(response, origin);
        }
    }

    fn decorate(&self, response: &mut Response, origin: &str) {
        let Some(value) = self.allow_origin_value(origin) else {
            return;
        };
        let headers = response.headers_mut();
        headers.insert(headers::ALLOW_ORIGIN, value);
        if self.allow_credentials {
            headers.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        headers.insert(headers::EXPOSE_HEADERS, HeaderValue::from_static(EXPOSED_HEADERS));
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if !self.enabled {
                return next.run(ctx, request).await;
            }

            if Self::is_preflight(&request) {
                return self.handle_preflight(&request);
            }

            let origin = Self::origin(&request);
            let mut response = next.run(ctx, request).await;
            self.decorate_for(&mut response, origin.as_deref());
            response
        })
    }
}
