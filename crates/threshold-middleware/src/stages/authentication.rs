//! Authentication middleware.
//!
//! Reads the bearer credential on routes whose rule asks for one:
//!
//! | Rule | Credential valid | Credential absent or bad |
//! |------|------------------|--------------------------|
//! | `none` | not read | not read |
//! | `optional` | identity set | anonymous, failure dropped |
//! | `required` | identity set | failure recorded for authorization |
//!
//! This stage never rejects on its own. Required-credential failures are
//! enforced by the authorization stage, after the request was counted by
//! the rate limiter.

use crate::auth::TokenVerifier;
use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use threshold_core::{AuthRequirement, GatewayError};

/// Verifies bearer credentials.
#[derive(Debug, Clone)]
pub struct AuthenticationMiddleware {
    verifier: TokenVerifier,
}

impl AuthenticationMiddleware {
    /// Creates the stage with `verifier`.
    #[must_use]
    pub fn new(verifier: TokenVerifier) -> Self {
        Self { verifier }
    }
}

impl Middleware for AuthenticationMiddleware {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let requirement = ctx
                .route()
                .map_or(AuthRequirement::None, |m| m.rule.auth);

            if requirement != AuthRequirement::None {
                match self.verifier.authenticate(request.headers()) {
                    Ok(identity) => {
                        tracing::debug!(
                            subject_id = %identity.subject_id,
                            role = %identity.role,
                            "credential verified"
                        );
                        ctx.set_identity(identity);
                    }
                    Err(e) if requirement == AuthRequirement::Required => {
                        ctx.set_credential_error(GatewayError::from(e));
                    }
                    Err(e) => {
                        tracing::debug!(reason = %e, "optional credential ignored");
                    }
                }
            }

            next.run(ctx, request).await
        })
    }
}
