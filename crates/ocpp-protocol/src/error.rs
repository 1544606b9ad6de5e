//! Error types for the protocol layer.
//!
//! Two kinds of failure live here:
//!
//! - [`ProtocolError`]: the frame itself is broken (not JSON, not an
//!   array, wrong arity, unknown type id) or could not be encoded.
//! - [`ValidationError`]: the frame is fine, but its payload doesn't
//!   satisfy the action's schema.
//!
//! Both carry the OCPP [`ErrorCode`] that should go back to the peer.

use crate::{CallError, ErrorCode, MessageType, UNKNOWN_ID};

/// Errors that can occur while encoding or decoding OCPP-J frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed. This is a bug in the caller's payload type,
    /// not a runtime condition, so it is always propagated.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The inbound frame is structurally invalid.
    ///
    /// `unique_id` is whatever correlation id could be salvaged;
    /// `message_type` is known if position 0 was readable.
    #[error("malformed frame ({code}): {description}")]
    Malformed {
        unique_id: Option<String>,
        message_type: Option<MessageType>,
        code: ErrorCode,
        description: String,
    },
}

impl ProtocolError {
    pub(crate) fn malformed(
        unique_id: Option<String>,
        message_type: Option<MessageType>,
        code: ErrorCode,
        description: impl Into<String>,
    ) -> Self {
        Self::Malformed {
            unique_id,
            message_type,
            code,
            description: description.into(),
        }
    }

    /// The salvaged correlation id, if any.
    pub fn unique_id(&self) -> Option<&str> {
        match self {
            Self::Malformed { unique_id, .. } => unique_id.as_deref(),
            Self::Encode(_) => None,
        }
    }

    /// Returns `true` if the peer is owed a CallError for this frame.
    ///
    /// Responses are never answered, so a broken CallResult/CallError
    /// only gets logged. Frames whose type is unknown may have been
    /// calls and do get an answer.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Self::Malformed {
                message_type: None | Some(MessageType::Call),
                ..
            }
        )
    }

    /// Builds the CallError owed to the peer, addressed to the salvaged
    /// id or to [`UNKNOWN_ID`].
    pub fn to_call_error(&self) -> Option<CallError> {
        match self {
            Self::Malformed {
                unique_id,
                code,
                description,
                ..
            } if self.expects_reply() => Some(CallError::new(
                unique_id.as_deref().unwrap_or(UNKNOWN_ID),
                code.clone(),
                description.clone(),
            )),
            _ => None,
        }
    }
}

/// A payload that doesn't satisfy its action's schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {description}")]
pub struct ValidationError {
    pub code: ErrorCode,
    pub description: String,
}

impl ValidationError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn formation(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::FormationViolation, description)
    }

    pub fn property(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::PropertyConstraintViolation, description)
    }

    pub fn occurence(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::OccurenceConstraintViolation, description)
    }

    pub fn type_constraint(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::TypeConstraintViolation, description)
    }

    /// Classifies a serde failure into the closest OCPP violation.
    ///
    /// serde_json doesn't expose a structured error kind for data
    /// errors, so this goes by the message prefix.
    pub fn from_serde(err: &serde_json::Error) -> Self {
        let msg = err.to_string();
        if msg.starts_with("missing field") {
            Self::occurence(msg)
        } else if msg.starts_with("invalid type") {
            Self::type_constraint(msg)
        } else if msg.starts_with("unknown variant")
            || msg.starts_with("invalid value")
            || msg.starts_with("invalid length")
        {
            Self::property(msg)
        } else {
            Self::formation(msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    #[allow(dead_code)]
    struct Probe {
        count: u32,
        kind: Kind,
    }

    #[derive(Debug, serde::Deserialize)]
    enum Kind {
        A,
    }

    fn probe(v: serde_json::Value) -> ValidationError {
        let err = serde_json::from_value::<Probe>(v).unwrap_err();
        ValidationError::from_serde(&err)
    }

    #[test]
    fn test_from_serde_missing_field_is_occurence() {
        let err = probe(serde_json::json!({ "kind": "A" }));
        assert_eq!(err.code, ErrorCode::OccurenceConstraintViolation);
    }

    #[test]
    fn test_from_serde_wrong_type_is_type_constraint() {
        let err = probe(serde_json::json!({ "count": "x", "kind": "A" }));
        assert_eq!(err.code, ErrorCode::TypeConstraintViolation);
    }

    #[test]
    fn test_from_serde_unknown_variant_is_property() {
        let err = probe(serde_json::json!({ "count": 1, "kind": "B" }));
        assert_eq!(err.code, ErrorCode::PropertyConstraintViolation);
    }

    #[test]
    fn test_to_call_error_uses_sentinel_when_id_unknown() {
        let err = ProtocolError::malformed(
            None,
            None,
            ErrorCode::FormationViolation,
            "Invalid JSON format",
        );
        let reply = err.to_call_error().expect("reply owed");
        assert_eq!(reply.unique_id, UNKNOWN_ID);
        assert_eq!(reply.error_code, ErrorCode::FormationViolation);
    }

    #[test]
    fn test_to_call_error_none_for_broken_response() {
        let err = ProtocolError::malformed(
            Some("7".into()),
            Some(MessageType::CallResult),
            ErrorCode::FormationViolation,
            "bad",
        );
        assert!(!err.expects_reply());
        assert!(err.to_call_error().is_none());
    }
}
