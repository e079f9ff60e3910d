//! Response envelopes.
//!
//! Every body the gateway itself produces is one of two shapes:
//!
//! ```text
//! {success: true,  data?, message?, timestamp, correlationId}
//! {success: false, error, message, statusCode, timestamp, correlationId, retryAfter?, stack?}
//! ```
//!
//! Proxied backend bodies are relayed unchanged and never wrapped.

use crate::correlation::CorrelationId;
use crate::error::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessEnvelope<T> {
    /// Always `true`.
    pub success: bool,
    /// Payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Optional human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the envelope was built.
    pub timestamp: DateTime<Utc>,
    /// Correlation id of the request.
    pub correlation_id: CorrelationId,
}

impl<T> SuccessEnvelope<T> {
    /// Wraps `data` in a success envelope.
    #[must_use]
    pub fn new(data: T, correlation_id: &CorrelationId) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now(),
            correlation_id: correlation_id.clone(),
        }
    }

    /// Adds a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl SuccessEnvelope<()> {
    /// A success envelope carrying only a message.
    #[must_use]
    pub fn message_only(message: impl Into<String>, correlation_id: &CorrelationId) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            timestamp: Utc::now(),
            correlation_id: correlation_id.clone(),
        }
    }
}

/// Failure body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEnvelope {
    /// Always `false`.
    pub success: bool,
    /// Machine-readable code.
    pub error: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// HTTP status, repeated in the body.
    pub status_code: u16,
    /// When the envelope was built.
    pub timestamp: DateTime<Utc>,
    /// Correlation id of the request.
    pub correlation_id: CorrelationId,
    /// Seconds to wait before retrying, on rate-limit failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Error chain, outside production only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayError;

    #[test]
    fn test_success_shape() {
        let id = CorrelationId::from_header(Some("c-1"));
        let envelope = SuccessEnvelope::new(serde_json::json!({"k": 1}), &id);
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["k"], 1);
        assert_eq!(json["correlationId"], "c-1");
        assert!(json.get("message").is_none());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_message_only_shape() {
        let id = CorrelationId::new();
        let json =
            serde_json::to_value(SuccessEnvelope::message_only("alive", &id)).unwrap();
        assert_eq!(json["message"], "alive");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_failure_shape() {
        let id = CorrelationId::from_header(Some("c-2"));
        let envelope = GatewayError::MissingCredential.to_envelope(&id, false);
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "MissingCredential");
        assert_eq!(json["statusCode"], 401);
        assert_eq!(json["correlationId"], "c-2");
        assert!(json.get("stack").is_none());
        assert!(json.get("retryAfter").is_none());
    }
}
