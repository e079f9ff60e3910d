//! Route resolution middleware.
//!
//! Looks the request up in the ordered route table. The first matching rule
//! is stored in the context for the stages below; no match is a
//! `RouteNotFound` failure and nothing further runs.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use std::sync::Arc;
use threshold_core::{GatewayError, RouteTable};

/// First-match route lookup.
#[derive(Debug, Clone)]
pub struct RouteResolutionMiddleware {
    table: Arc<RouteTable>,
}

impl RouteResolutionMiddleware {
    /// Creates the stage over `table`.
    #[must_use]
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }
}

impl Middleware for RouteResolutionMiddleware {
    fn name(&self) -> &'static str {
        "route_resolution"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let path = request.uri().path();
            match self.table.match_route(request.method(), path) {
                Some(matched) => {
                    tracing::debug!(
                        rule = matched.index,
                        pattern = matched.rule.pattern(),
                        target = matched.rule.target.label(),
                        "route matched"
                    );
                    ctx.set_route(matched);
                    next.run(ctx, request).await
                }
                None => Response::from_error(GatewayError::route_not_found(request.method(), path)),
            }
        })
    }
}
