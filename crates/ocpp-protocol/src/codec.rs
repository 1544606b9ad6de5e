//! Codec trait and the OCPP-J JSON array codec.
//!
//! A codec turns a [`Message`] into the text that goes into a WebSocket
//! frame and back. Decoding is strict about frame shape and lenient about
//! payloads: the payload of a well-formed frame is handed up as raw JSON,
//! and schema checks happen later, once the action is known.

use serde_json::Value;

use crate::{
    Call, CallError, CallResult, ErrorCode, Message, MessageType,
    ProtocolError,
};

const INVALID_JSON: &str = "Invalid JSON format";

/// Converts messages to and from their wire form.
///
/// `Send + Sync + 'static` so one codec can be shared by every session.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a message into the text of a single frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if a payload can't be serialized.
    fn encode(&self, message: &Message) -> Result<String, ProtocolError>;

    /// Parses the bytes of a single frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Malformed` carrying the OCPP error code owed
    /// to the peer and whatever correlation id could be recovered.
    fn decode(&self, data: &[u8]) -> Result<Message, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// The standard OCPP-J codec: JSON arrays inside text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<String, ProtocolError> {
        let frame = match message {
            Message::Call(c) => Value::Array(vec![
                Value::from(MessageType::Call.id()),
                Value::String(c.unique_id.clone()),
                Value::String(c.action.clone()),
                c.payload.clone(),
            ]),
            Message::CallResult(r) => Value::Array(vec![
                Value::from(MessageType::CallResult.id()),
                Value::String(r.unique_id.clone()),
                r.payload.clone(),
            ]),
            Message::CallError(e) => Value::Array(vec![
                Value::from(MessageType::CallError.id()),
                Value::String(e.unique_id.clone()),
                Value::String(e.error_code.to_string()),
                Value::String(e.error_description.clone()),
                e.error_details.clone(),
            ]),
        };
        serde_json::to_string(&frame).map_err(ProtocolError::Encode)
    }

    fn decode(&self, data: &[u8]) -> Result<Message, ProtocolError> {
        let value: Value = serde_json::from_slice(data).map_err(|_| {
            ProtocolError::malformed(
                None,
                None,
                ErrorCode::FormationViolation,
                INVALID_JSON,
            )
        })?;

        let Value::Array(mut items) = value else {
            return Err(ProtocolError::malformed(
                None,
                None,
                ErrorCode::FormationViolation,
                INVALID_JSON,
            ));
        };

        if !(3..=5).contains(&items.len()) {
            return Err(ProtocolError::malformed(
                None,
                None,
                ErrorCode::FormationViolation,
                INVALID_JSON,
            ));
        }

        let Some(message_type) =
            items[0].as_u64().and_then(MessageType::from_id)
        else {
            let unique_id = items[1].as_str().map(str::to_string);
            return Err(ProtocolError::malformed(
                unique_id,
                None,
                ErrorCode::ProtocolError,
                format!("Invalid message type: {}", items[0]),
            ));
        };

        let unique_id = match &items[1] {
            Value::String(id) => id.clone(),
            other => {
                return Err(ProtocolError::malformed(
                    None,
                    Some(message_type),
                    ErrorCode::FormationViolation,
                    format!("Invalid unique id: {other}"),
                ));
            }
        };

        let fail = |description: String| {
            ProtocolError::malformed(
                Some(unique_id.clone()),
                Some(message_type),
                ErrorCode::FormationViolation,
                description,
            )
        };

        match message_type {
            MessageType::Call => {
                if items.len() != 4 {
                    return Err(fail(format!(
                        "Call expects 4 elements, got {}",
                        items.len()
                    )));
                }
                let payload = items.pop().unwrap_or(Value::Null);
                let Value::String(action) = items.swap_remove(2) else {
                    return Err(fail("Call action must be a string".into()));
                };
                Ok(Message::Call(Call {
                    unique_id,
                    action,
                    payload,
                }))
            }
            MessageType::CallResult => {
                if items.len() != 3 {
                    return Err(fail(format!(
                        "CallResult expects 3 elements, got {}",
                        items.len()
                    )));
                }
                let payload = items.pop().unwrap_or(Value::Null);
                Ok(Message::CallResult(CallResult { unique_id, payload }))
            }
            MessageType::CallError => {
                if items.len() < 4 {
                    return Err(fail(format!(
                        "CallError expects 4 or 5 elements, got {}",
                        items.len()
                    )));
                }
                let error_details = if items.len() == 5 {
                    items.pop().unwrap_or(Value::Null)
                } else {
                    Value::Null
                };
                let (Value::String(description), Value::String(code)) =
                    (items.swap_remove(3), items.swap_remove(2))
                else {
                    return Err(fail(
                        "CallError code and description must be strings"
                            .into(),
                    ));
                };
                let Ok(error_code) = code.parse::<ErrorCode>();
                Ok(Message::CallError(CallError {
                    unique_id,
                    error_code,
                    error_description: description,
                    error_details,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(s: &str) -> Result<Message, ProtocolError> {
        JsonCodec.decode(s.as_bytes())
    }

    fn malformed(err: ProtocolError) -> (Option<String>, ErrorCode) {
        match err {
            ProtocolError::Malformed {
                unique_id, code, ..
            } => (unique_id, code),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_call_is_four_element_array() {
        let msg = Message::Call(Call::new(
            "19223201",
            "BootNotification",
            json!({ "chargePointVendor": "VendorX" }),
        ));
        let text = JsonCodec.encode(&msg).unwrap();
        assert_eq!(
            text,
            r#"[2,"19223201","BootNotification",{"chargePointVendor":"VendorX"}]"#
        );
    }

    #[test]
    fn test_encode_call_result_is_three_element_array() {
        let msg = Message::CallResult(CallResult::new(
            "19223201",
            json!({ "status": "Accepted" }),
        ));
        let text = JsonCodec.encode(&msg).unwrap();
        assert_eq!(text, r#"[3,"19223201",{"status":"Accepted"}]"#);
    }

    #[test]
    fn test_encode_call_error_is_five_element_array() {
        let msg = Message::CallError(CallError::new(
            "162376037",
            ErrorCode::NotSupported,
            "SetDisplayMessageRequest not implemented",
        ));
        let text = JsonCodec.encode(&msg).unwrap();
        assert_eq!(
            text,
            r#"[4,"162376037","NotSupported","SetDisplayMessageRequest not implemented",{}]"#
        );
    }

    #[test]
    fn test_decode_of_encode_returns_same_message() {
        let messages = [
            Message::Call(Call::new("a", "Heartbeat", json!({}))),
            Message::CallResult(CallResult::new(
                "b",
                json!({ "currentTime": "2024-01-01T00:00:00Z" }),
            )),
            Message::CallError(
                CallError::new("c", ErrorCode::GenericError, "nope")
                    .with_details(json!({ "hint": 1 })),
            ),
        ];
        for msg in messages {
            let text = JsonCodec.encode(&msg).unwrap();
            assert_eq!(decode(&text).unwrap(), msg);
        }
    }

    #[test]
    fn test_decode_call() {
        let msg = decode(r#"[2,"42","Heartbeat",{}]"#).unwrap();
        assert_eq!(msg, Message::Call(Call::new("42", "Heartbeat", json!({}))));
    }

    #[test]
    fn test_decode_call_error_without_details_defaults_to_null() {
        let msg = decode(r#"[4,"9","InternalError","oops"]"#).unwrap();
        let Message::CallError(e) = msg else {
            panic!("expected CallError");
        };
        assert_eq!(e.error_code, ErrorCode::InternalError);
        assert_eq!(e.error_description, "oops");
        assert_eq!(e.error_details, Value::Null);
    }

    #[test]
    fn test_decode_call_error_keeps_unknown_code() {
        let msg = decode(r#"[4,"9","RpcFrameworkError","x",{}]"#).unwrap();
        let Message::CallError(e) = msg else {
            panic!("expected CallError");
        };
        assert_eq!(e.error_code, ErrorCode::Other("RpcFrameworkError".into()));
    }

    #[test]
    fn test_decode_invalid_json_is_formation_violation_without_id() {
        let err = decode("[2, \"1\", ").unwrap_err();
        assert!(err.expects_reply());
        let (id, code) = malformed(err);
        assert_eq!(id, None);
        assert_eq!(code, ErrorCode::FormationViolation);
    }

    #[test]
    fn test_decode_non_array_is_formation_violation() {
        let (id, code) = malformed(decode(r#"{"a":1}"#).unwrap_err());
        assert_eq!(id, None);
        assert_eq!(code, ErrorCode::FormationViolation);
    }

    #[test]
    fn test_decode_wrong_length_is_formation_violation() {
        let (_, code) = malformed(decode(r#"[2,"1"]"#).unwrap_err());
        assert_eq!(code, ErrorCode::FormationViolation);

        let (_, code) =
            malformed(decode(r#"[2,"1","A",{},{},{}]"#).unwrap_err());
        assert_eq!(code, ErrorCode::FormationViolation);
    }

    #[test]
    fn test_decode_unknown_type_is_protocol_error_with_id() {
        let err = decode(r#"[7,"abc",{}]"#).unwrap_err();
        assert!(err.expects_reply());
        let reply = err.to_call_error().unwrap();
        assert_eq!(reply.unique_id, "abc");
        assert_eq!(reply.error_code, ErrorCode::ProtocolError);
    }

    #[test]
    fn test_decode_non_string_id_is_formation_violation_without_id() {
        let err = decode(r#"[2,17,"Heartbeat",{}]"#).unwrap_err();
        let reply = err.to_call_error().unwrap();
        assert_eq!(reply.unique_id, crate::UNKNOWN_ID);
        assert_eq!(reply.error_code, ErrorCode::FormationViolation);
    }

    #[test]
    fn test_decode_call_with_wrong_arity_keeps_id() {
        let err = decode(r#"[2,"5","Heartbeat"]"#).unwrap_err();
        assert_eq!(err.unique_id(), Some("5"));
        assert!(err.expects_reply());
    }

    #[test]
    fn test_decode_call_with_non_string_action_keeps_id() {
        let err = decode(r#"[2,"5",12,{}]"#).unwrap_err();
        let (id, code) = malformed(err);
        assert_eq!(id.as_deref(), Some("5"));
        assert_eq!(code, ErrorCode::FormationViolation);
    }

    #[test]
    fn test_decode_broken_call_result_owes_no_reply() {
        let err = decode(r#"[3,"5",{},{}]"#).unwrap_err();
        assert_eq!(err.unique_id(), Some("5"));
        assert!(!err.expects_reply());
    }

    #[test]
    fn test_decode_call_error_with_non_string_code_owes_no_reply() {
        let err = decode(r#"[4,"5",500,"x",{}]"#).unwrap_err();
        assert!(!err.expects_reply());
        assert!(err.to_call_error().is_none());
    }
}
