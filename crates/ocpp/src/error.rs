//! Unified error type for the `ocpp` crate.

use ocpp_protocol::{ProtocolError, ValidationError};
use ocpp_session::SessionError;
use ocpp_transport::TransportError;

/// Top-level error that wraps the errors of every layer.
///
/// When using the `ocpp` crate you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant lets `?` convert them automatically.
#[derive(Debug, thiserror::Error)]
pub enum OcppError {
    /// Binding, accepting, connecting, or reading and writing frames.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encoding or decoding an OCPP-J message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A payload that doesn't match its action's schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Calls, timeouts, and session lifecycle.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A builder was given settings it can't work with.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocpp_protocol::ErrorCode;
    use std::time::Duration;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let ocpp_err: OcppError = err.into();
        assert!(matches!(ocpp_err, OcppError::Transport(_)));
        assert!(ocpp_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_validation_error() {
        let err = ValidationError::occurence("missing field `idTag`");
        let ocpp_err: OcppError = err.into();
        assert!(matches!(
            ocpp_err,
            OcppError::Validation(ref v) if v.code == ErrorCode::OccurenceConstraintViolation
        ));
    }

    #[test]
    fn test_from_session_error_keeps_message() {
        let err = SessionError::Timeout {
            unique_id: "abc".into(),
            timeout: Duration::from_secs(30),
        };
        let ocpp_err: OcppError = err.into();
        assert!(matches!(ocpp_err, OcppError::Session(_)));
        assert!(ocpp_err.to_string().contains("abc"));
    }

    #[test]
    fn test_config_error_display() {
        let err = OcppError::Config("charge point id is required".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: charge point id is required"
        );
    }
}
