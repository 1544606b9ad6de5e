//! A reference OCPP 1.6 dialect.
//!
//! Covers the four operations every charge point sends on its own
//! initiative: `BootNotification`, `Heartbeat`, `StatusNotification`, and
//! `Authorize`. Payloads follow the 1.6 JSON schemas: camelCase fields,
//! `CiString` length limits, and closed enums for statuses.
//!
//! Timestamps are kept as RFC 3339 strings; formatting them is left to
//! the application.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Action, PayloadSchema, Validate, ValidationError, decode_payload};

/// The sub-protocol name negotiated for this dialect.
pub const SUBPROTOCOL: &str = "ocpp1.6";

fn check_len(
    field: &str,
    value: &str,
    max: usize,
) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::property(format!(
            "{field} exceeds {max} characters"
        )));
    }
    Ok(())
}

fn check_opt_len(
    field: &str,
    value: &Option<String>,
    max: usize,
) -> Result<(), ValidationError> {
    match value {
        Some(v) => check_len(field, v, max),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// BootNotification
// ---------------------------------------------------------------------------

pub struct BootNotification;

impl Action for BootNotification {
    const NAME: &'static str = "BootNotification";
    type Request = BootNotificationRequest;
    type Response = BootNotificationResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BootNotificationRequest {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_box_serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
}

impl BootNotificationRequest {
    pub fn new(
        vendor: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            charge_point_vendor: vendor.into(),
            charge_point_model: model.into(),
            charge_point_serial_number: None,
            charge_box_serial_number: None,
            firmware_version: None,
            iccid: None,
            imsi: None,
            meter_type: None,
            meter_serial_number: None,
        }
    }
}

impl Validate for BootNotificationRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        check_len("chargePointVendor", &self.charge_point_vendor, 20)?;
        check_len("chargePointModel", &self.charge_point_model, 20)?;
        check_opt_len(
            "chargePointSerialNumber",
            &self.charge_point_serial_number,
            25,
        )?;
        check_opt_len(
            "chargeBoxSerialNumber",
            &self.charge_box_serial_number,
            25,
        )?;
        check_opt_len("firmwareVersion", &self.firmware_version, 50)?;
        check_opt_len("iccid", &self.iccid, 20)?;
        check_opt_len("imsi", &self.imsi, 20)?;
        check_opt_len("meterType", &self.meter_type, 25)?;
        check_opt_len("meterSerialNumber", &self.meter_serial_number, 25)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BootNotificationResponse {
    pub status: RegistrationStatus,
    pub current_time: String,
    /// Heartbeat interval in seconds.
    pub interval: i32,
}

impl Validate for BootNotificationResponse {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.interval < 0 {
            return Err(ValidationError::property(
                "interval must not be negative",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

pub struct Heartbeat;

impl Action for Heartbeat {
    const NAME: &'static str = "Heartbeat";
    type Request = HeartbeatRequest;
    type Response = HeartbeatResponse;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatRequest {}

impl Validate for HeartbeatRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeartbeatResponse {
    pub current_time: String,
}

impl Validate for HeartbeatResponse {}

// ---------------------------------------------------------------------------
// StatusNotification
// ---------------------------------------------------------------------------

pub struct StatusNotification;

impl Action for StatusNotification {
    const NAME: &'static str = "StatusNotification";
    type Request = StatusNotificationRequest;
    type Response = StatusNotificationResponse;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEVSE,
    SuspendedEV,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointErrorCode {
    ConnectorLockFailure,
    EVCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    NoError,
    OtherError,
    OverCurrentFailure,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    OverVoltage,
    WeakSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StatusNotificationRequest {
    pub connector_id: u32,
    pub error_code: ChargePointErrorCode,
    pub status: ChargePointStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_error_code: Option<String>,
}

impl Validate for StatusNotificationRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        check_opt_len("info", &self.info, 50)?;
        check_opt_len("vendorId", &self.vendor_id, 255)?;
        check_opt_len("vendorErrorCode", &self.vendor_error_code, 50)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusNotificationResponse {}

impl Validate for StatusNotificationResponse {}

// ---------------------------------------------------------------------------
// Authorize
// ---------------------------------------------------------------------------

pub struct Authorize;

impl Action for Authorize {
    const NAME: &'static str = "Authorize";
    type Request = AuthorizeRequest;
    type Response = AuthorizeResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthorizeRequest {
    pub id_tag: String,
}

impl Validate for AuthorizeRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        check_len("idTag", &self.id_tag, 20)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IdTagInfo {
    pub status: AuthorizationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
}

impl IdTagInfo {
    pub fn new(status: AuthorizationStatus) -> Self {
        Self {
            status,
            expiry_date: None,
            parent_id_tag: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthorizeResponse {
    pub id_tag_info: IdTagInfo,
}

impl Validate for AuthorizeResponse {
    fn validate(&self) -> Result<(), ValidationError> {
        check_opt_len("parentIdTag", &self.id_tag_info.parent_id_tag, 20)
    }
}

// ---------------------------------------------------------------------------
// Closed enums
// ---------------------------------------------------------------------------

/// Every request this dialect knows, parsed and validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Request16 {
    BootNotification(BootNotificationRequest),
    Heartbeat(HeartbeatRequest),
    StatusNotification(StatusNotificationRequest),
    Authorize(AuthorizeRequest),
}

impl Request16 {
    /// Parses a request payload. `Ok(None)` means the action isn't part
    /// of this dialect.
    pub fn parse(
        action: &str,
        payload: &Value,
    ) -> Result<Option<Self>, ValidationError> {
        let parsed = match action {
            BootNotification::NAME => {
                Self::BootNotification(decode_payload(payload)?)
            }
            Heartbeat::NAME => Self::Heartbeat(decode_payload(payload)?),
            StatusNotification::NAME => {
                Self::StatusNotification(decode_payload(payload)?)
            }
            Authorize::NAME => Self::Authorize(decode_payload(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::BootNotification(_) => BootNotification::NAME,
            Self::Heartbeat(_) => Heartbeat::NAME,
            Self::StatusNotification(_) => StatusNotification::NAME,
            Self::Authorize(_) => Authorize::NAME,
        }
    }
}

/// Every response this dialect knows, parsed and validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Response16 {
    BootNotification(BootNotificationResponse),
    Heartbeat(HeartbeatResponse),
    StatusNotification(StatusNotificationResponse),
    Authorize(AuthorizeResponse),
}

impl Response16 {
    /// Parses the response to `action`. `Ok(None)` means the action isn't
    /// part of this dialect.
    pub fn parse(
        action: &str,
        payload: &Value,
    ) -> Result<Option<Self>, ValidationError> {
        let parsed = match action {
            BootNotification::NAME => {
                Self::BootNotification(decode_payload(payload)?)
            }
            Heartbeat::NAME => Self::Heartbeat(decode_payload(payload)?),
            StatusNotification::NAME => {
                Self::StatusNotification(decode_payload(payload)?)
            }
            Authorize::NAME => Self::Authorize(decode_payload(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }
}

/// Validates payloads against the 1.6 definitions above.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ocpp16Schema;

impl PayloadSchema for Ocpp16Schema {
    fn subprotocol(&self) -> &str {
        SUBPROTOCOL
    }

    fn validate_request(
        &self,
        action: &str,
        payload: &Value,
    ) -> Result<(), ValidationError> {
        Request16::parse(action, payload).map(|_| ())
    }

    fn validate_response(
        &self,
        action: &str,
        payload: &Value,
    ) -> Result<(), ValidationError> {
        Response16::parse(action, payload).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorCode, encode_payload};
    use serde_json::json;

    #[test]
    fn test_boot_notification_request_camel_case() {
        let mut req = BootNotificationRequest::new("VendorX", "ModelY");
        req.firmware_version = Some("1.2.3".into());
        let v = encode_payload(&req).unwrap();
        assert_eq!(
            v,
            json!({
                "chargePointVendor": "VendorX",
                "chargePointModel": "ModelY",
                "firmwareVersion": "1.2.3"
            })
        );
    }

    #[test]
    fn test_request16_parse_boot_notification() {
        let parsed = Request16::parse(
            "BootNotification",
            &json!({ "chargePointVendor": "V", "chargePointModel": "M" }),
        )
        .unwrap()
        .unwrap();
        assert_eq!(parsed.action(), "BootNotification");
        assert_eq!(
            parsed,
            Request16::BootNotification(BootNotificationRequest::new("V", "M"))
        );
    }

    #[test]
    fn test_request16_parse_unknown_action_is_none() {
        let parsed = Request16::parse("DataTransfer", &json!({})).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_ci_string_too_long_is_property_violation() {
        let err = Ocpp16Schema
            .validate_request(
                "Authorize",
                &json!({ "idTag": "ABCDEFGHIJKLMNOPQRSTUVWXYZ" }),
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PropertyConstraintViolation);
    }

    #[test]
    fn test_missing_required_field_is_occurence_violation() {
        let err = Ocpp16Schema
            .validate_request(
                "BootNotification",
                &json!({ "chargePointVendor": "V" }),
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::OccurenceConstraintViolation);
    }

    #[test]
    fn test_wrong_type_is_type_constraint_violation() {
        let err = Ocpp16Schema
            .validate_request(
                "StatusNotification",
                &json!({
                    "connectorId": "one",
                    "errorCode": "NoError",
                    "status": "Available"
                }),
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TypeConstraintViolation);
    }

    #[test]
    fn test_unknown_enum_value_is_property_violation() {
        let err = Ocpp16Schema
            .validate_response(
                "BootNotification",
                &json!({
                    "status": "Maybe",
                    "currentTime": "2024-01-01T00:00:00Z",
                    "interval": 300
                }),
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PropertyConstraintViolation);
    }

    #[test]
    fn test_heartbeat_accepts_empty_object() {
        assert!(Ocpp16Schema.validate_request("Heartbeat", &json!({})).is_ok());
        assert!(
            Ocpp16Schema
                .validate_response(
                    "Heartbeat",
                    &json!({ "currentTime": "2024-01-01T00:00:00Z" })
                )
                .is_ok()
        );
    }

    #[test]
    fn test_negative_interval_is_rejected() {
        let err = Ocpp16Schema
            .validate_response(
                "BootNotification",
                &json!({
                    "status": "Accepted",
                    "currentTime": "2024-01-01T00:00:00Z",
                    "interval": -5
                }),
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PropertyConstraintViolation);
    }

    #[test]
    fn test_schema_subprotocol() {
        assert_eq!(Ocpp16Schema.subprotocol(), "ocpp1.6");
    }
}
