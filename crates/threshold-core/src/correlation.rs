//! Correlation identifiers.
//!
//! A [`CorrelationId`] ties together every log line the gateway and its
//! backends emit for one logical request. It is read from the inbound
//! `x-correlation-id` header when present and generated otherwise.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the correlation id in both directions.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Opaque per-request identifier.
///
/// Inbound values are accepted verbatim (trimmed) so a caller can stitch
/// gateway logs to its own. Generated values are random 128-bit UUIDs.
///
/// # Example
///
/// ```
/// use threshold_core::CorrelationId;
///
/// let inbound = CorrelationId::from_header(Some("abc-123"));
/// assert_eq!(inbound.as_str(), "abc-123");
///
/// let fresh = CorrelationId::from_header(Some("   "));
/// assert_eq!(fresh.as_str().len(), 36);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Uses the inbound header value if it is non-empty, otherwise generates one.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => Self(v.to_string()),
            _ => Self::new(),
        }
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}
