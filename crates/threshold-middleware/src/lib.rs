//! # Threshold Middleware
//!
//! The fixed-order request pipeline of the Threshold edge gateway.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → Correlation → AccessLog → ErrorTranslation → Cors
//!         → RouteResolution → Authentication → RateLimit → Authorization → Handler
//! ```
//!
//! | Stage | Middleware         | Purpose                                   |
//! |-------|--------------------|-------------------------------------------|
//! | 1     | Correlation        | Propagate or generate `x-correlation-id`  |
//! | 2     | Access Log         | Structured log line and request metrics   |
//! | 3     | Error Translation  | Failure envelope, panic containment       |
//! | 4     | CORS               | Preflights and allow-origin headers       |
//! | 5     | Route Resolution   | First-match route table lookup            |
//! | 6     | Authentication     | Bearer token verification                 |
//! | 7     | Rate Limit         | Fixed-window ceilings and slow-down       |
//! | 8     | Authorization      | 401 for missing credentials, 403 for role |
//!
//! Stages signal failure by returning [`ResponseExt::from_error`]; only the
//! error translation stage renders bodies.
//!
//! ## Example
//!
//! ```
//! use threshold_middleware::pipeline::Stage;
//!
//! let stages = Stage::all();
//! assert_eq!(stages.len(), 8);
//! assert_eq!(stages[0].name(), "correlation");
//! assert_eq!(stages[7].name(), "authorization");
//! ```

#![doc(html_root_url = "https://docs.rs/threshold-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use auth::{sign_token, AuthError, TokenVerifier};
pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder, Stage};
pub use store::{MemoryStore, RateStore, RedisStore, StoreError, WindowCount};
pub use types::{Failure, Request, Response, ResponseExt};
