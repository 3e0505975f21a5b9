//! Error types for the transformation core.
//!
//! All fallible operations in the crate return [`ProxyError`]. Each variant
//! carries enough information to build the structured `{type, code?, message}`
//! envelope that goes back to the client; the mapping to the envelope lives
//! here so the embedding server never has to interpret variants itself.

use serde_json::{json, Value};
use thiserror::Error;

use super::error_types::*;

/// Main error type for the transformation core.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Malformed JSON inside a stream frame. The streaming layer skips the
    /// frame and keeps the session alive; this only surfaces for buffered
    /// payloads.
    #[error("Decode failure: {0}")]
    Decode(String),

    /// No transformer registered for the requested protocol.
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Content that cannot be represented on the target wire. Callers are
    /// expected to drop and log rather than fail the request.
    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),

    /// The scripting runtime raised while running a provider hook.
    #[error("Script error: {0}")]
    Script(String),

    /// Upstream I/O failed. Retry is the dispatcher's concern.
    #[error("Upstream transport error: {0}")]
    Upstream(String),

    /// Upstream did not answer in time.
    #[error("Upstream timeout")]
    Timeout,

    /// The client request is structurally invalid for its protocol.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// JSON serialization failures on our side of the wire.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProxyError {
    /// Wire error type for the client-facing envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::Decode(_) => ERROR_TYPE_API,
            ProxyError::UnknownProtocol(_) => ERROR_TYPE_INVALID_REQUEST,
            ProxyError::UnsupportedContent(_) => ERROR_TYPE_INVALID_REQUEST,
            ProxyError::Script(_) => ERROR_TYPE_API,
            ProxyError::Upstream(_) => ERROR_TYPE_API,
            ProxyError::Timeout => ERROR_TYPE_TIMEOUT,
            ProxyError::InvalidRequest(_) => ERROR_TYPE_INVALID_REQUEST,
            ProxyError::Serialization(_) => ERROR_TYPE_API,
        }
    }

    /// Optional machine-readable code for the envelope.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            ProxyError::Decode(_) => Some(ERROR_CODE_DECODE),
            ProxyError::Script(_) => Some(ERROR_CODE_SCRIPT),
            ProxyError::Upstream(_) | ProxyError::Timeout => Some(ERROR_CODE_PROVIDER),
            _ => None,
        }
    }

    /// Structured `{type, code?, message}` envelope returned to clients.
    pub fn to_client_json(&self) -> Value {
        let mut envelope = json!({
            "type": self.error_type(),
            "message": self.to_string(),
        });
        if let Some(code) = self.error_code() {
            envelope["code"] = json!(code);
        }
        envelope
    }
}

/// Convenience type alias for Results using [`ProxyError`].
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProxyError::UnknownProtocol("ftp".into());
        assert_eq!(err.to_string(), "Unknown protocol: ftp");

        let err = ProxyError::Timeout;
        assert_eq!(err.to_string(), "Upstream timeout");
    }

    #[test]
    fn test_error_type_mapping() {
        assert_eq!(
            ProxyError::UnknownProtocol("x".into()).error_type(),
            "invalid_request_error"
        );
        assert_eq!(ProxyError::Timeout.error_type(), "timeout_error");
        assert_eq!(ProxyError::Script("boom".into()).error_type(), "api_error");
        assert_eq!(
            ProxyError::Upstream("reset".into()).error_type(),
            "api_error"
        );
    }

    #[test]
    fn test_client_envelope_shape() {
        let envelope = ProxyError::Script("hook failed".into()).to_client_json();
        assert_eq!(envelope["type"], "api_error");
        assert_eq!(envelope["code"], "script_error");
        assert!(envelope["message"]
            .as_str()
            .unwrap()
            .contains("hook failed"));
    }

    #[test]
    fn test_client_envelope_without_code() {
        let envelope = ProxyError::InvalidRequest("missing model".into()).to_client_json();
        assert_eq!(envelope["type"], "invalid_request_error");
        assert!(envelope.get("code").is_none());
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<Value>("not json").unwrap_err();
        let err: ProxyError = json_err.into();
        assert!(matches!(err, ProxyError::Serialization(_)));
    }
}
