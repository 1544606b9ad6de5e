//! OCPP-J wire protocol.
//!
//! This crate defines what travels inside a WebSocket text frame:
//!
//! - **Types** ([`Message`], [`Call`], [`CallResult`], [`CallError`],
//!   [`ErrorCode`]): the three OCPP-J message kinds.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): strict frame parsing and
//!   encoding.
//! - **Schemas** ([`Action`], [`PayloadSchema`], [`Validate`]): typed
//!   payloads and per-version validation.
//! - **Errors** ([`ProtocolError`], [`ValidationError`]).
//!
//! The [`v16`] module carries a reference OCPP 1.6 dialect.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about connections or sessions. It
//! turns text into messages and back:
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Session (correlation, dispatch)
//! ```

mod codec;
mod error;
mod schema;
mod types;
pub mod v16;

pub use codec::{Codec, JsonCodec};
pub use error::{ProtocolError, ValidationError};
pub use schema::{
    Action, PayloadSchema, PermissiveSchema, Validate, decode_payload,
    encode_payload,
};
pub use types::{
    Call, CallError, CallResult, ErrorCode, Message, MessageType, UNKNOWN_ID,
};
