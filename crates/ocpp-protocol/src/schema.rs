//! Payload typing and schema validation.
//!
//! The codec only checks frame shape. Whether `{"idTag": 5}` is a valid
//! `Authorize` request is decided here, by two layers:
//!
//! - [`Action`] binds an action name to typed request/response structs,
//!   so callers and handlers work with Rust types rather than raw JSON.
//! - [`PayloadSchema`] validates raw payloads by action name. The session
//!   engine holds one per sub-protocol and consults it for every inbound
//!   request and every outbound response.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ValidationError;

/// Semantic checks that serde can't express (string lengths, ranges).
///
/// The default accepts everything.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl Validate for Value {}

/// A typed OCPP operation.
///
/// Implemented by zero-sized marker types, one per action name:
///
/// ```ignore
/// pub struct Heartbeat;
///
/// impl Action for Heartbeat {
///     const NAME: &'static str = "Heartbeat";
///     type Request = HeartbeatRequest;
///     type Response = HeartbeatResponse;
/// }
/// ```
pub trait Action: Send + Sync + 'static {
    /// The action string that travels in position 2 of a Call.
    const NAME: &'static str;

    type Request: Serialize + DeserializeOwned + Validate + Send + 'static;
    type Response: Serialize + DeserializeOwned + Validate + Send + 'static;
}

/// Deserializes and validates a payload.
///
/// # Errors
/// Returns the violation matching what went wrong: a missing field, a
/// wrong type, an out-of-range value, or a failed [`Validate`] check.
pub fn decode_payload<T>(payload: &Value) -> Result<T, ValidationError>
where
    T: DeserializeOwned + Validate,
{
    let value =
        T::deserialize(payload).map_err(|e| ValidationError::from_serde(&e))?;
    value.validate()?;
    Ok(value)
}

/// Validates and serializes a payload.
///
/// # Errors
/// Returns the [`Validate`] failure, or a `FormationViolation` if the
/// value doesn't serialize.
pub fn encode_payload<T>(value: &T) -> Result<Value, ValidationError>
where
    T: Serialize + Validate,
{
    value.validate()?;
    serde_json::to_value(value)
        .map_err(|e| ValidationError::formation(e.to_string()))
}

// ---------------------------------------------------------------------------
// PayloadSchema
// ---------------------------------------------------------------------------

/// Validates raw payloads for one protocol version.
///
/// Object safe, so sessions hold it as `Arc<dyn PayloadSchema>`.
/// Unknown actions pass: whether an action is supported is the router's
/// decision, not the schema's.
pub trait PayloadSchema: Send + Sync + 'static {
    /// The WebSocket sub-protocol this schema belongs to, e.g. `ocpp1.6`.
    fn subprotocol(&self) -> &str;

    /// Checks the payload of an inbound or outbound Call.
    fn validate_request(
        &self,
        action: &str,
        payload: &Value,
    ) -> Result<(), ValidationError>;

    /// Checks the payload of a CallResult answering `action`.
    fn validate_response(
        &self,
        action: &str,
        payload: &Value,
    ) -> Result<(), ValidationError>;
}

/// A schema that only requires payloads to be JSON objects.
#[derive(Debug, Clone)]
pub struct PermissiveSchema {
    subprotocol: String,
}

impl PermissiveSchema {
    pub fn new(subprotocol: impl Into<String>) -> Self {
        Self {
            subprotocol: subprotocol.into(),
        }
    }

    fn require_object(payload: &Value) -> Result<(), ValidationError> {
        if payload.is_object() {
            Ok(())
        } else {
            Err(ValidationError::formation("payload must be a JSON object"))
        }
    }
}

impl PayloadSchema for PermissiveSchema {
    fn subprotocol(&self) -> &str {
        &self.subprotocol
    }

    fn validate_request(
        &self,
        _action: &str,
        payload: &Value,
    ) -> Result<(), ValidationError> {
        Self::require_object(payload)
    }

    fn validate_response(
        &self,
        _action: &str,
        payload: &Value,
    ) -> Result<(), ValidationError> {
        Self::require_object(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    impl Validate for Ping {
        fn validate(&self) -> Result<(), ValidationError> {
            if self.seq > 10 {
                return Err(ValidationError::property("seq must be <= 10"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_decode_payload_valid() {
        let p: Ping = decode_payload(&json!({ "seq": 3 })).unwrap();
        assert_eq!(p, Ping { seq: 3 });
    }

    #[test]
    fn test_decode_payload_runs_validate() {
        let err = decode_payload::<Ping>(&json!({ "seq": 11 })).unwrap_err();
        assert_eq!(err.code, ErrorCode::PropertyConstraintViolation);
    }

    #[test]
    fn test_decode_payload_missing_field_is_occurence() {
        let err = decode_payload::<Ping>(&json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::OccurenceConstraintViolation);
    }

    #[test]
    fn test_encode_payload_refuses_invalid_value() {
        let err = encode_payload(&Ping { seq: 99 }).unwrap_err();
        assert_eq!(err.code, ErrorCode::PropertyConstraintViolation);
        assert_eq!(encode_payload(&Ping { seq: 1 }).unwrap(), json!({ "seq": 1 }));
    }

    #[test]
    fn test_permissive_schema_requires_object() {
        let schema = PermissiveSchema::new("ocpp2.0.1");
        assert_eq!(schema.subprotocol(), "ocpp2.0.1");
        assert!(schema.validate_request("Any", &json!({})).is_ok());
        let err = schema.validate_response("Any", &json!([1])).unwrap_err();
        assert_eq!(err.code, ErrorCode::FormationViolation);
    }
}
