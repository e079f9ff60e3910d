//! Gateway error taxonomy.
//!
//! Every failure the gateway can surface to a caller is a [`GatewayError`].
//! Each variant maps to exactly one [`ErrorCode`] and one HTTP status:
//!
//! | Variant | Code | Status |
//! |---|---|---|
//! | `MissingCredential` | `MissingCredential` | 401 |
//! | `MalformedCredential` | `MalformedCredential` | 401 |
//! | `InvalidCredential` | `InvalidCredential` | 401 |
//! | `ExpiredCredential` | `ExpiredCredential` | 401 |
//! | `InsufficientRole` | `InsufficientRole` | 403 |
//! | `CorsRejected` | `CorsRejected` | 403 |
//! | `RouteNotFound` | `RouteNotFound` | 404 |
//! | `PayloadTooLarge` | `PayloadTooLarge` | 413 |
//! | `RateLimitExceeded` | `RateLimitExceeded` | 429 |
//! | `Validation` | `ValidationError` | 400 |
//! | `BackendUnavailable` | `BackendUnavailable` | 503 |
//! | `Internal` | `InternalError` | 500 |

use crate::correlation::CorrelationId;
use crate::envelope::FailureEnvelope;
use crate::identity::Role;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use thiserror::Error;

/// Result type alias using [`GatewayError`].
pub type GatewayResult<T> = Result<T, GatewayError>;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Machine-readable error code rendered in the `error` field of a failure envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No `Authorization` header.
    MissingCredential,
    /// `Authorization` header without a bearer token.
    MalformedCredential,
    /// Signature or claim verification failed.
    InvalidCredential,
    /// Token past its expiry.
    ExpiredCredential,
    /// Role outside the route's allowed set.
    InsufficientRole,
    /// Browser preflight from an origin or with headers outside the allow list.
    CorsRejected,
    /// No route rule matched.
    RouteNotFound,
    /// Request body over the configured limit.
    PayloadTooLarge,
    /// Rate ceiling exceeded.
    RateLimitExceeded,
    /// Request rejected as invalid.
    ValidationError,
    /// Backend timed out or refused the connection.
    BackendUnavailable,
    /// Anything unclassified.
    InternalError,
}

impl ErrorCode {
    /// Returns the fixed HTTP status for this code.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredential
            | Self::MalformedCredential
            | Self::InvalidCredential
            | Self::ExpiredCredential => StatusCode::UNAUTHORIZED,
            Self::InsufficientRole | Self::CorsRejected => StatusCode::FORBIDDEN,
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the code as it appears on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCredential => "MissingCredential",
            Self::MalformedCredential => "MalformedCredential",
            Self::InvalidCredential => "InvalidCredential",
            Self::ExpiredCredential => "ExpiredCredential",
            Self::InsufficientRole => "InsufficientRole",
            Self::CorsRejected => "CorsRejected",
            Self::RouteNotFound => "RouteNotFound",
            Self::PayloadTooLarge => "PayloadTooLarge",
            Self::RateLimitExceeded => "RateLimitExceeded",
            Self::ValidationError => "ValidationError",
            Self::BackendUnavailable => "BackendUnavailable",
            Self::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure surfaced to the caller.
///
/// # Example
///
/// ```
/// use threshold_core::{ErrorCode, GatewayError};
/// use http::StatusCode;
///
/// let err = GatewayError::backend_unavailable("listings", "connection refused");
/// assert_eq!(err.code(), ErrorCode::BackendUnavailable);
/// assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
/// ```
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The route requires a credential and none was sent.
    #[error("authentication required: no credential provided")]
    MissingCredential,

    /// The `Authorization` header has no bearer token segment.
    #[error("malformed credential: expected 'Bearer <token>'")]
    MalformedCredential,

    /// The token failed signature or claim verification.
    #[error("invalid credential: {reason}")]
    InvalidCredential {
        /// What failed.
        reason: String,
        /// Underlying verification error.
        #[source]
        source: Option<BoxError>,
    },

    /// The token is past its expiry.
    #[error("credential has expired")]
    ExpiredCredential,

    /// The caller's role is not allowed on this route.
    #[error("role '{role}' is not permitted to access this resource")]
    InsufficientRole {
        /// The caller's role.
        role: Role,
        /// Roles the route accepts.
        allowed: Vec<Role>,
    },

    /// A cross-origin preflight was refused.
    #[error("cross-origin request rejected: {reason}")]
    CorsRejected {
        /// Which origin or header was refused.
        reason: String,
    },

    /// No route rule matched the request.
    #[error("no route matches {method} {path}")]
    RouteNotFound {
        /// Request method.
        method: Method,
        /// Request path.
        path: String,
    },

    /// Request body exceeded the configured limit.
    #[error("request body exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Limit in bytes.
        limit: usize,
    },

    /// The caller exceeded its request ceiling for the current window.
    #[error("too many requests, retry after {retry_after_secs} seconds")]
    RateLimitExceeded {
        /// Seconds until the window resets.
        retry_after_secs: u64,
    },

    /// The request was rejected as invalid.
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable error message.
        message: String,
    },

    /// The backend timed out or could not be reached.
    #[error("backend '{backend}' is unavailable: {reason}")]
    BackendUnavailable {
        /// Backend name.
        backend: String,
        /// Short description of the transport failure.
        reason: String,
        /// Underlying transport error.
        #[source]
        source: Option<BoxError>,
    },

    /// Any unclassified failure.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// Underlying error (never rendered in production).
        #[source]
        source: Option<BoxError>,
    },
}

impl GatewayError {
    /// Creates an invalid-credential error.
    #[must_use]
    pub fn invalid_credential(reason: impl Into<String>) -> Self {
        Self::InvalidCredential {
            reason: reason.into(),
            source: None,
        }
    }

    /// Creates an invalid-credential error with its verification source.
    pub fn invalid_credential_with_source(
        reason: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::InvalidCredential {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an insufficient-role error.
    #[must_use]
    pub fn insufficient_role(role: Role, allowed: &[Role]) -> Self {
        Self::InsufficientRole {
            role,
            allowed: allowed.to_vec(),
        }
    }

    /// Creates a CORS rejection.
    #[must_use]
    pub fn cors_rejected(reason: impl Into<String>) -> Self {
        Self::CorsRejected {
            reason: reason.into(),
        }
    }

    /// Creates a route-not-found error.
    #[must_use]
    pub fn route_not_found(method: &Method, path: impl Into<String>) -> Self {
        Self::RouteNotFound {
            method: method.clone(),
            path: path.into(),
        }
    }

    /// Creates a rate-limit error.
    #[must_use]
    pub const fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimitExceeded { retry_after_secs }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a backend-unavailable error.
    #[must_use]
    pub fn backend_unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Creates a backend-unavailable error keeping the transport error as source.
    pub fn backend_unavailable_with_source(
        backend: impl Into<String>,
        reason: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the machine-readable code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MissingCredential => ErrorCode::MissingCredential,
            Self::MalformedCredential => ErrorCode::MalformedCredential,
            Self::InvalidCredential { .. } => ErrorCode::InvalidCredential,
            Self::ExpiredCredential => ErrorCode::ExpiredCredential,
            Self::InsufficientRole { .. } => ErrorCode::InsufficientRole,
            Self::CorsRejected { .. } => ErrorCode::CorsRejected,
            Self::RouteNotFound { .. } => ErrorCode::RouteNotFound,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::RateLimitExceeded { .. } => ErrorCode::RateLimitExceeded,
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.code().status_code()
    }

    /// Returns `true` for the 401 family.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential
                | Self::MalformedCredential
                | Self::InvalidCredential { .. }
                | Self::ExpiredCredential
        )
    }

    /// Returns the retry hint for rate-limit errors.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Renders the error and its source chain, one cause per line.
    #[must_use]
    pub fn stack_trace(&self) -> String {
        let mut trace = format!("{}: {self}", self.code());
        let mut source = self.source();
        while let Some(cause) = source {
            trace.push_str("\n    caused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        trace
    }

    /// Converts this error to the failure envelope returned to callers.
    ///
    /// `include_stack` must be `false` in production.
    #[must_use]
    pub fn to_envelope(
        &self,
        correlation_id: &CorrelationId,
        include_stack: bool,
    ) -> FailureEnvelope {
        FailureEnvelope {
            success: false,
            error: self.code(),
            message: self.to_string(),
            status_code: self.status_code().as_u16(),
            timestamp: chrono::Utc::now(),
            correlation_id: correlation_id.clone(),
            retry_after: self.retry_after_secs(),
            stack: include_stack.then(|| self.stack_trace()),
        }
    }
}
