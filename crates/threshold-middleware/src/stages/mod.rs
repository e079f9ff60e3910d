//! Pipeline stages.
//!
//! Every request passes through these stages in a fixed order:
//!
//! 1. [`correlation`] - Propagate or generate the correlation id
//! 2. [`access_log`] - One log line and request metrics per request
//! 3. [`error_translation`] - Render failures as the failure envelope
//! 4. [`cors`] - Answer preflights, decorate cross-origin responses
//! 5. [`route_resolution`] - First-match route lookup
//! 6. [`authentication`] - Verify bearer credentials
//! 7. [`rate_limit`] - Per-caller ceilings and slow-down
//! 8. [`authorization`] - Credential requirement and role list

pub mod access_log;
pub mod authentication;
pub mod authorization;
pub mod correlation;
pub mod cors;
pub mod error_translation;
pub mod rate_limit;
pub mod route_resolution;

pub use access_log::AccessLogMiddleware;
pub use authentication::AuthenticationMiddleware;
pub use authorization::AuthorizationMiddleware;
pub use correlation::CorrelationMiddleware;
pub use cors::CorsMiddleware;
pub use error_translation::ErrorTranslationMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use route_resolution::RouteResolutionMiddleware;
