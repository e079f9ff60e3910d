//! # Threshold Core
//!
//! Core types shared by every crate of the Threshold edge gateway.
//!
//! - [`CorrelationId`] - Per-request identifier echoed on every response
//! - [`Identity`] / [`Claims`] - Authenticated caller derived from a bearer token
//! - [`Role`] - Closed set of caller roles
//! - [`GatewayError`] - Failure taxonomy with its fixed `(code, status)` mapping
//! - [`SuccessEnvelope`] / [`FailureEnvelope`] - The single response body shape
//! - [`RouteRule`] / [`RouteTable`] - Ordered, first-match route declarations

#![doc(html_root_url = "https://docs.rs/threshold-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod correlation;
mod envelope;
mod error;
mod identity;
pub mod route;

pub use correlation::{CorrelationId, CORRELATION_ID_HEADER};
pub use envelope::{FailureEnvelope, SuccessEnvelope};
pub use error::{ErrorCode, GatewayError, GatewayResult};
pub use identity::{Claims, Identity, Role, UnknownRole};
pub use route::{AuthRequirement, RateClass, RouteMatch, RouteRule, RouteTable, RouteTarget};
