//! Route rules and the ordered route table.
//!
//! The route table is the gateway's authorization matrix: an explicit,
//! ordered list of [`RouteRule`]s evaluated top to bottom, first match wins.
//! More specific rules (for example `/api/properties/create`) must be declared
//! before the wildcard that contains them (`/api/properties/*`).
//!
//! ## Pattern syntax
//!
//! Patterns are `/`-separated segments:
//!
//! - a literal segment matches itself exactly
//! - `*` in the middle of a pattern matches exactly one segment
//! - `*` as the last segment matches the remainder of the path, including
//!   nothing at all (`/api/auth/*` matches `/api/auth` and `/api/auth/a/b`)
//!
//! Empty segments are ignored, so trailing slashes never change the result.
//!
//! # Example
//!
//! ```
//! use http::Method;
//! use threshold_core::{AuthRequirement, Role, RouteRule, RouteTable};
//!
//! let table = RouteTable::new(vec![
//!     RouteRule::backend("/api/properties/create", "listings")
//!         .auth(AuthRequirement::Required)
//!         .allow_roles([Role::Agent, Role::Admin]),
//!     RouteRule::backend("/api/properties/*", "listings").auth(AuthRequirement::Optional),
//! ]);
//!
//! let matched = table.match_route(&Method::POST, "/api/properties/create").unwrap();
//! assert_eq!(matched.index, 0);
//! ```

use crate::identity::Role;
use http::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Authentication level a route demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequirement {
    /// No credential is read.
    #[default]
    None,
    /// A valid credential is used if present; failures are ignored.
    Optional,
    /// A valid credential is mandatory.
    Required,
}

/// Which rate ceiling a route counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateClass {
    /// Not rate limited (probes).
    Exempt,
    /// The general ceiling.
    #[default]
    General,
    /// The stricter authentication-endpoint ceiling.
    Auth,
}

impl RateClass {
    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exempt => "exempt",
            Self::General => "general",
            Self::Auth => "auth",
        }
    }
}

/// What handles a matched request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum RouteTarget {
    /// Forward to the named backend.
    Backend(String),
    /// Aggregated backend health.
    Health,
    /// Readiness probe.
    Readiness,
    /// Liveness probe.
    Liveness,
    /// Build information.
    Version,
}

impl RouteTarget {
    /// Returns the backend name, if this target proxies.
    #[must_use]
    pub fn backend_name(&self) -> Option<&str> {
        match self {
            Self::Backend(name) => Some(name),
            _ => None,
        }
    }

    /// Returns a short label used in logs and metrics.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Backend(name) => name,
            Self::Health => "health",
            Self::Readiness => "ready",
            Self::Liveness => "live",
            Self::Version => "version",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    One,
    Rest,
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let last = parts.len().saturating_sub(1);
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| match *part {
            "*" if i == last => Segment::Rest,
            "*" => Segment::One,
            literal => Segment::Literal(literal.to_string()),
        })
        .collect()
}

/// One entry of the route table.
///
/// Per-route behavior is carried entirely by typed fields; the middleware
/// pipeline reads them uniformly for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pattern: String,
    segments: Vec<Segment>,
    /// Accepted methods; empty accepts any method.
    pub methods: Vec<Method>,
    /// Handler of matched requests.
    pub target: RouteTarget,
    /// Authentication level.
    pub auth: AuthRequirement,
    /// Roles allowed through; empty allows any authenticated role.
    pub allowed_roles: Vec<Role>,
    /// Rate ceiling.
    pub rate_class: RateClass,
}

impl RouteRule {
    /// Creates a rule for `pattern` dispatching to `target`.
    ///
    /// Defaults: any method, no authentication, no role restriction,
    /// general rate class.
    #[must_use]
    pub fn new(pattern: impl Into<String>, target: RouteTarget) -> Self {
        let pattern = pattern.into();
        Self {
            segments: parse_pattern(&pattern),
            pattern,
            methods: Vec::new(),
            target,
            auth: AuthRequirement::None,
            allowed_roles: Vec::new(),
            rate_class: RateClass::General,
        }
    }

    /// Creates a rule forwarding to the named backend.
    #[must_use]
    pub fn backend(pattern: impl Into<String>, backend: impl Into<String>) -> Self {
        Self::new(pattern, RouteTarget::Backend(backend.into()))
    }

    /// Creates an exempt, unauthenticated `GET` probe rule.
    #[must_use]
    pub fn probe(pattern: impl Into<String>, target: RouteTarget) -> Self {
        Self::new(pattern, target)
            .methods([Method::GET, Method::HEAD])
            .rate_class(RateClass::Exempt)
    }

    /// Restricts the rule to the given methods.
    #[must_use]
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    /// Sets the authentication requirement.
    #[must_use]
    pub fn auth(mut self, auth: AuthRequirement) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the allowed roles.
    #[must_use]
    pub fn allow_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.allowed_roles = roles.into_iter().collect();
        self
    }

    /// Sets the rate class.
    #[must_use]
    pub fn rate_class(mut self, rate_class: RateClass) -> Self {
        self.rate_class = rate_class;
        self
    }

    /// Returns the pattern as declared.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns `true` if the rule accepts `method`.
    #[must_use]
    pub fn accepts_method(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    /// Returns `true` if the pattern matches `path`. Query strings must be removed first.
    #[must_use]
    pub fn matches_path(&self, path: &str) -> bool {
        let mut parts = path.split('/').filter(|s| !s.is_empty());
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::One => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(literal) => match parts.next() {
                    Some(part) if part == literal => {}
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }

    /// Returns `true` if the rule matches both method and path.
    #[must_use]
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.accepts_method(method) && self.matches_path(path)
    }
}

/// A successful route lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Position of the rule in the table.
    pub index: usize,
    /// The matched rule.
    pub rule: Arc<RouteRule>,
}

/// The ordered, immutable route table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<Arc<RouteRule>>,
}

impl RouteTable {
    /// Creates a table from rules in precedence order.
    #[must_use]
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self {
            rules: rules.into_iter().map(Arc::new).collect(),
        }
    }

    /// Returns the first rule matching `method` and `path`.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(method, path))
            .map(|(index, rule)| RouteMatch {
                index,
                rule: Arc::clone(rule),
            })
    }

    /// Iterates over the rules in precedence order.
    pub fn rules(&self) -> impl Iterator<Item = &RouteRule> {
        self.rules.iter().map(AsRef::as_ref)
    }

    /// Returns the number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the table has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Names of every backend referenced by the table.
    #[must_use]
    pub fn backend_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .rules
            .iter()
            .filter_map(|rule| rule.target.backend_name())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
