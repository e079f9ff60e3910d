//! Caller identity and roles.
//!
//! The gateway never looks a caller up in a user store. Everything it knows
//! about a caller comes from the claims of a verified bearer token.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// The closed set of roles a caller may hold.
///
/// There is no hierarchy between roles: `SuperAdmin` does not imply `Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// A buyer browsing and saving listings.
    Buyer,
    /// An agent publishing listings.
    Agent,
    /// A platform administrator.
    Admin,
    /// Full platform access.
    SuperAdmin,
}

impl Role {
    /// All roles, in declaration order.
    pub const ALL: [Self; 4] = [Self::Buyer, Self::Agent, Self::Admin, Self::SuperAdmin];

    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Agent => "agent",
            Self::Admin => "admin",
            Self::SuperAdmin => "super-admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a role name outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Claims carried inside a signed bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user) id.
    pub sub: String,
    /// Subject email address.
    pub email: String,
    /// Subject role.
    pub role: Role,
    /// Issued-at, seconds since the Unix epoch.
    pub iat: i64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

/// The authenticated caller of the current request.
///
/// Built once from verified [`Claims`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Subject id.
    pub subject_id: String,
    /// Email address.
    pub email: String,
    /// Role.
    pub role: Role,
    /// Issued-at, seconds since the Unix epoch.
    pub issued_at: i64,
    /// Expiry, seconds since the Unix epoch.
    pub expires_at: i64,
}

impl Identity {
    /// Returns the rate-limit key for this caller.
    #[must_use]
    pub fn rate_key(&self) -> String {
        format!("user:{}", self.subject_id)
    }

    /// Returns `true` if the caller's role is one of `roles`.
    #[must_use]
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            subject_id: claims.sub,
            email: claims.email,
            role: claims.role,
            issued_at: claims.iat,
            expires_at: claims.exp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(role: Role) -> Identity {
        Identity {
            subject_id: "u-1".to_string(),
            email: "u1@example.com".to_string(),
            role,
            issued_at: 0,
            expires_at: 60,
        }
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::SuperAdmin).unwrap(), "\"super-admin\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"agent\"").unwrap(),
            Role::Agent
        );
    }

    #[test]
    fn test_role_from_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!(
            "guest".parse::<Role>(),
            Err(UnknownRole("guest".to_string()))
        );
    }

    #[test]
    fn test_unknown_role_fails_claims_decoding() {
        let json = r#"{"sub":"u","email":"e","role":"guest","iat":0,"exp":1}"#;
        assert!(serde_json::from_str::<Claims>(json).is_err());
    }

    #[test]
    fn test_identity_from_claims() {
        let claims = Claims {
            sub: "u-9".to_string(),
            email: "nine@example.com".to_string(),
            role: Role::Agent,
            iat: 10,
            exp: 20,
        };
        let identity = Identity::from(claims);
        assert_eq!(identity.subject_id, "u-9");
        assert_eq!(identity.role, Role::Agent);
        assert_eq!(identity.expires_at, 20);
    }

    #[test]
    fn test_rate_key() {
        assert_eq!(identity(Role::Buyer).rate_key(), "user:u-1");
    }

    #[test]
    fn test_membership_has_no_hierarchy() {
        let super_admin = identity(Role::SuperAdmin);
        assert!(!super_admin.has_any_role(&[Role::Admin]));
        assert!(super_admin.has_any_role(&[Role::Admin, Role::SuperAdmin]));
    }
}
