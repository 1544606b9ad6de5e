//! Core OCPP-J wire types.
//!
//! Every frame on the wire is a JSON array whose first element is the
//! message type id:
//!
//! ```text
//! [2, "<uniqueId>", "<action>", {payload}]                     Call
//! [3, "<uniqueId>", {payload}]                                 CallResult
//! [4, "<uniqueId>", "<errorCode>", "<description>", {details}] CallError
//! ```
//!
//! Payloads are kept as [`serde_json::Value`] at this level. Turning them
//! into typed structs is the job of the [`Action`](crate::Action) and
//! [`PayloadSchema`](crate::PayloadSchema) layers, because a CallResult
//! doesn't say which action it answers.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::ValidationError;

/// Correlation id used when the real one could not be recovered from a
/// malformed frame.
pub const UNKNOWN_ID: &str = "-1";

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The numeric discriminant in position 0 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    /// Maps the wire number to a message type.
    pub fn from_id(id: u64) -> Option<Self> {
        match id {
            2 => Some(Self::Call),
            3 => Some(Self::CallResult),
            4 => Some(Self::CallError),
            _ => None,
        }
    }

    /// The wire number.
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "Call"),
            Self::CallResult => write!(f, "CallResult"),
            Self::CallError => write!(f, "CallError"),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// The `errorCode` of a CallError.
///
/// Covers the OCPP 1.6 vocabulary. Codes outside it (e.g. from a newer
/// protocol version) are preserved verbatim in [`ErrorCode::Other`] so
/// nothing is lost when relaying them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Requested action is not known by the receiver.
    NotImplemented,
    /// Requested action is recognized but not supported by the receiver.
    NotSupported,
    /// An internal error occurred while processing the action.
    InternalError,
    /// Payload for the action is incomplete.
    ProtocolError,
    /// The action could not be processed for security reasons.
    SecurityError,
    /// Payload is syntactically incorrect or doesn't conform to the schema.
    FormationViolation,
    /// A field contains a value outside its allowed range.
    PropertyConstraintViolation,
    /// A required field is missing or a field occurs too often.
    ///
    /// Spelled as in OCPP 1.6.
    OccurenceConstraintViolation,
    /// The same code as spelled from OCPP 2.0 on.
    OccurrenceConstraintViolation,
    /// A field has the wrong data type.
    TypeConstraintViolation,
    /// Any other error.
    GenericError,
    /// A code this crate doesn't know.
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            Self::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
            Self::Other(code) => code,
        }
    }

    /// Spells the occurrence code the way `subprotocol` expects it.
    /// `ocpp1.x` (or no sub-protocol) gets `Occurence`, anything newer
    /// gets `Occurrence`. Other codes pass through.
    pub fn for_subprotocol(self, subprotocol: Option<&str>) -> Self {
        let legacy = subprotocol.is_none_or(|p| p.starts_with("ocpp1."));
        match self {
            Self::OccurenceConstraintViolation
            | Self::OccurrenceConstraintViolation
                if legacy =>
            {
                Self::OccurenceConstraintViolation
            }
            Self::OccurenceConstraintViolation
            | Self::OccurrenceConstraintViolation => {
                Self::OccurrenceConstraintViolation
            }
            other => other,
        }
    }
}

impl FromStr for ErrorCode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NotImplemented" => Self::NotImplemented,
            "NotSupported" => Self::NotSupported,
            "InternalError" => Self::InternalError,
            "ProtocolError" => Self::ProtocolError,
            "SecurityError" => Self::SecurityError,
            "FormationViolation" => Self::FormationViolation,
            "PropertyConstraintViolation" => Self::PropertyConstraintViolation,
            "OccurenceConstraintViolation" => Self::OccurenceConstraintViolation,
            "OccurrenceConstraintViolation" => {
                Self::OccurrenceConstraintViolation
            }
            "TypeConstraintViolation" => Self::TypeConstraintViolation,
            "GenericError" => Self::GenericError,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        let Ok(code) = s.parse::<ErrorCode>();
        Ok(code)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A request: `[2, uniqueId, action, payload]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub unique_id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    pub fn new(
        unique_id: impl Into<String>,
        action: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }
}

/// A success response: `[3, uniqueId, payload]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub unique_id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(unique_id: impl Into<String>, payload: Value) -> Self {
        Self {
            unique_id: unique_id.into(),
            payload,
        }
    }
}

/// A failure response:
/// `[4, uniqueId, errorCode, errorDescription, errorDetails]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub unique_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    /// Creates a CallError with empty (`{}`) details.
    pub fn new(
        unique_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(Default::default()),
        }
    }

    /// Attaches structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.error_details = details;
        self
    }

    /// Builds the reply owed for a payload that failed validation.
    pub fn from_validation(
        unique_id: impl Into<String>,
        err: &ValidationError,
    ) -> Self {
        Self::new(unique_id, err.code.clone(), err.description.clone())
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.error_code, self.unique_id, self.error_description
        )
    }
}

/// Any decoded OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl Message {
    /// The correlation id carried by every message.
    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call(c) => &c.unique_id,
            Self::CallResult(r) => &r.unique_id,
            Self::CallError(e) => &e.unique_id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Call(_) => MessageType::Call,
            Self::CallResult(_) => MessageType::CallResult,
            Self::CallError(_) => MessageType::CallError,
        }
    }
}

impl From<Call> for Message {
    fn from(c: Call) -> Self {
        Self::Call(c)
    }
}

impl From<CallResult> for Message {
    fn from(r: CallResult) -> Self {
        Self::CallResult(r)
    }
}

impl From<CallError> for Message {
    fn from(e: CallError) -> Self {
        Self::CallError(e)
    }
}
