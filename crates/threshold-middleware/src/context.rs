//! Per-request pipeline state.
//!
//! The [`MiddlewareContext`] is created by the server for every inbound
//! request and enriched stage by stage: correlation id first, then the
//! matched route, then the caller identity.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use threshold_core::{CorrelationId, GatewayError, Identity, RouteMatch};

/// Context that flows through the middleware pipeline.
///
/// # Example
///
/// ```
/// use threshold_middleware::MiddlewareContext;
///
/// let ctx = MiddlewareContext::new().with_client_ip("10.0.0.7".parse().unwrap());
/// assert_eq!(ctx.rate_key(), "ip:10.0.0.7");
/// assert!(ctx.identity().is_none());
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    correlation_id: CorrelationId,

    /// Resolved client address (socket peer or forwarded, per server policy).
    client_ip: Option<IpAddr>,

    route: Option<RouteMatch>,

    identity: Option<Identity>,

    /// Why a presented credential was rejected, kept for routes that require one.
    credential_error: Option<GatewayError>,

    started_at: Instant,

    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a context with a fresh correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            client_ip: None,
            route: None,
            identity: None,
            credential_error: None,
            started_at: Instant::now(),
            extensions: HashMap::new(),
        }
    }

    /// Sets the client address.
    #[must_use]
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Sets the correlation id. Only the correlation stage calls this.
    pub fn set_correlation_id(&mut self, correlation_id: CorrelationId) {
        self.correlation_id = correlation_id;
    }

    /// Returns the client address, if known.
    #[must_use]
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// Returns the matched route.
    #[must_use]
    pub fn route(&self) -> Option<&RouteMatch> {
        self.route.as_ref()
    }

    /// Sets the matched route.
    pub fn set_route(&mut self, route: RouteMatch) {
        self.route = Some(route);
    }

    /// Returns the authenticated caller, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Sets the authenticated caller.
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    /// Records why the presented credential was rejected.
    pub fn set_credential_error(&mut self, error: GatewayError) {
        self.credential_error = Some(error);
    }

    /// Takes the recorded credential rejection, if any.
    pub fn take_credential_error(&mut self) -> Option<GatewayError> {
        self.credential_error.take()
    }

    /// Rate-limit key: `user:<id>` with an identity, else `ip:<addr>`.
    #[must_use]
    pub fn rate_key(&self) -> String {
        match (&self.identity, self.client_ip) {
            (Some(identity), _) => identity.rate_key(),
            (None, Some(ip)) => format!("ip:{ip}"),
            (None, None) => "ip:unknown".to_string(),
        }
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stores a typed extension value.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}
