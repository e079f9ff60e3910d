//! Authorization middleware.
//!
//! Enforces the route's credential requirement and role list:
//!
//! - A `required` route without an identity fails with the credential error
//!   recorded by the authentication stage (or `MissingCredential`), status 401
//! - A route with a non-empty role list rejects callers whose role is not in
//!   it with `InsufficientRole`, status 403
//!
//! Roles are compared by exact membership. `super-admin` does not imply
//! `admin`.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};
use std::sync::Arc;
use threshold_core::{AuthRequirement, GatewayError};

/// Role and credential enforcement.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationMiddleware;

impl AuthorizationMiddleware {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn check(ctx: &mut MiddlewareContext) -> Result<(), GatewayError> {
        let Some(matched) = ctx.route() else {
            return Ok(());
        };
        let rule = Arc::clone(&matched.rule);
        let needs_identity = rule.auth == AuthRequirement::Required || !rule.allowed_roles.is_empty();

        let Some(role) = ctx.identity().map(|identity| identity.role) else {
            if needs_identity {
                return Err(ctx
                    .take_credential_error()
                    .unwrap_or(GatewayError::MissingCredential));
            }
            return Ok(());
        };

        if !rule.allowed_roles.is_empty() && !rule.allowed_roles.contains(&role) {
            return Err(GatewayError::insufficient_role(role, &rule.allowed_roles));
        }
        Ok(())
    }
}

impl Middleware for AuthorizationMiddleware {
    fn name(&self) -> &'static str {
        "authorization"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match Self::check(ctx) {
                Ok(()) => next.run(ctx, request).await,
                Err(e) => Response::from_error(e),
            }
        })
    }
}
