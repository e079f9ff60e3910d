//! The gateway's route table.
//!
//! Order is precedence: the first matching rule wins, so every specific
//! rule sits above the wildcard that would otherwise swallow it.

use http::Method;
use threshold_core::{AuthRequirement, RateClass, Role, RouteRule, RouteTable, RouteTarget};

/// Roles allowed to manage listings.
const LISTING_MANAGERS: [Role; 2] = [Role::Agent, Role::Admin];

/// Roles allowed on the admin surface.
const ADMIN_TIER: [Role; 2] = [Role::Admin, Role::SuperAdmin];

/// Builds the default route table.
pub fn default_route_table() -> RouteTable {
    use AuthRequirement::{Optional, Required};

    RouteTable::new(vec![
        // Probes
        RouteRule::probe("/health", RouteTarget::Health),
        RouteRule::probe("/ready", RouteTarget::Readiness),
        RouteRule::probe("/live", RouteTarget::Liveness),
        RouteRule::probe("/version", RouteTarget::Version),
        // Identity
        RouteRule::backend("/api/auth/*", "identity").rate_class(RateClass::Auth),
        RouteRule::backend("/api/users/*", "identity").auth(Required),
        RouteRule::backend("/api/admin/*", "identity")
            .auth(Required)
            .allow_roles(ADMIN_TIER),
        // Listings: management rules before the public wildcard
        RouteRule::backend("/api/properties/create", "listings")
            .auth(Required)
            .allow_roles(LISTING_MANAGERS),
        RouteRule::backend("/api/properties/*/edit", "listings")
            .auth(Required)
            .allow_roles(LISTING_MANAGERS),
        RouteRule::backend("/api/properties/*/delete", "listings")
            .auth(Required)
            .allow_roles(LISTING_MANAGERS),
        RouteRule::backend("/api/properties", "listings")
            .methods([Method::GET, Method::HEAD])
            .auth(Optional),
        RouteRule::backend("/api/properties/*", "listings")
            .methods([Method::GET, Method::HEAD])
            .auth(Optional),
        RouteRule::backend("/api/favorites/*", "listings").auth(Required),
        // Messaging
        RouteRule::backend("/api/chat/*", "messaging").auth(Required),
        RouteRule::backend("/api/conversations/*", "messaging").auth(Required),
        RouteRule::backend("/api/messages/*", "messaging").auth(Required),
        // Search
        RouteRule::backend("/api/search/*", "search").auth(Optional),
    ])
}
