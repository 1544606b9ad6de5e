//! Error types for the session layer.

use std::time::Duration;

use ocpp_protocol::{CallError, ProtocolError, ValidationError};
use ocpp_transport::TransportError;

/// Errors returned to code that drives a session.
///
/// Per-message problems (a malformed frame, a failed handler) never show
/// up here; the session answers or logs those itself and stays open.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session has already started closing.
    #[error("session is not connected")]
    NotConnected,

    /// The session closed while the operation was in progress.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer didn't answer a Call in time. The pending entry has been
    /// removed; a late answer will be dropped.
    #[error("no response to call {unique_id} within {timeout:?}")]
    Timeout { unique_id: String, timeout: Duration },

    /// The peer answered with a CallError.
    #[error("peer returned {0}")]
    CallError(CallError),

    /// A request or response payload failed its schema.
    #[error("invalid payload: {0}")]
    Validation(#[from] ValidationError),

    /// The outbound queue stayed full for the whole enqueue timeout.
    #[error("outbound queue full")]
    QueueFull,

    /// A correlation id is already waiting for an answer.
    #[error("duplicate unique id {0}")]
    DuplicateId(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocpp_protocol::ErrorCode;

    #[test]
    fn test_timeout_display_includes_id_and_duration() {
        let err = SessionError::Timeout {
            unique_id: "abc".into(),
            timeout: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "no response to call abc within 2s");
    }

    #[test]
    fn test_from_validation_error() {
        let err: SessionError =
            ValidationError::formation("payload must be a JSON object").into();
        assert!(matches!(
            err,
            SessionError::Validation(ref v) if v.code == ErrorCode::FormationViolation
        ));
    }

    #[test]
    fn test_call_error_display() {
        let err = SessionError::CallError(CallError::new(
            "1",
            ErrorCode::NotSupported,
            "nope",
        ));
        assert_eq!(err.to_string(), "peer returned NotSupported (1): nope");
    }
}
