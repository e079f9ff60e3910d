//! Fixed-order middleware pipeline.
//!
//! ## Pipeline Stages
//!
//! 1. **Correlation** - Adopt or mint the correlation id, open the request span
//! 2. **Access Log** - One log line and metrics per request
//! 3. **Error Translation** - Render failures into the envelope
//! 4. **CORS** - Answer preflights, decorate browser responses
//! 5. **Route Resolution** - First-match lookup in the route table
//! 6. **Authentication** - Verify the bearer credential if the route asks for one
//! 7. **Rate Limit** - Count, slow down, or reject per caller
//! 8. **Authorization** - Enforce required credentials and role membership
//!
//! Authentication runs before rate limiting so authenticated callers are
//! counted per subject. Rejection for a missing or bad credential is deferred
//! to authorization, so those requests are still counted.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use std::sync::Arc;

/// A type-erased stage.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The assembled pipeline. Immutable after [`PipelineBuilder::build`].
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs `request` through every stage and then `handler`.
    pub async fn process<H>(
        &self,
        mut ctx: MiddlewareContext,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let next = self.build_chain(handler);
        next.run(&mut ctx, request).await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns the names of all stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage. Stages run in the order they are added.
    #[must_use]
    pub fn stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

/// The stages of the gateway pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Correlation id propagation.
    Correlation = 1,
    /// Access log and request metrics.
    AccessLog = 2,
    /// Failure envelope rendering.
    ErrorTranslation = 3,
    /// Browser CORS.
    Cors = 4,
    /// Route table lookup.
    RouteResolution = 5,
    /// Bearer credential verification.
    Authentication = 6,
    /// Rate ceilings and slow-down.
    RateLimit = 7,
    /// Required-credential and role checks.
    Authorization = 8,
}

impl Stage {
    /// Returns the stage name, matching [`Middleware::name`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Correlation => "correlation",
            Self::AccessLog => "access_log",
            Self::ErrorTranslation => "error_translation",
            Self::Cors => "cors",
            Self::RouteResolution => "route_resolution",
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::Authorization => "authorization",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Stage; 8] {
        [
            Self::Correlation,
            Self::AccessLog,
            Self::ErrorTranslation,
            Self::Cors,
            Self::RouteResolution,
            Self::Authentication,
            Self::RateLimit,
            Self::Authorization,
        ]
    }
}
