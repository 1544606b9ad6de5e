//! # ocpp
//!
//! OCPP-J (OCPP over WebSocket) for central systems and charge points.
//!
//! Both sides of an OCPP connection can send Calls at any time. This crate
//! runs one session per connection. The session correlates answers to
//! outgoing Calls, dispatches incoming Calls to your handlers, and keeps
//! the connection alive.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocpp::prelude::*;
//! use ocpp::v16::{BootNotification, BootNotificationResponse, RegistrationStatus};
//!
//! # async fn run() -> Result<(), OcppError> {
//! let router = Router::builder()
//!     .on(BootNotification, |session, req| async move {
//!         tracing::info!(peer = session.peer_id(), vendor = %req.charge_point_vendor, "boot");
//!         Ok(BootNotificationResponse {
//!             status: RegistrationStatus::Accepted,
//!             current_time: "2024-01-01T00:00:00Z".into(),
//!             interval: 300,
//!         })
//!     })
//!     .build();
//!
//! CentralSystem::builder()
//!     .bind("0.0.0.0:8887")
//!     .router(router)
//!     .build()
//!     .await?
//!     .run()
//!     .await
//! # }
//! ```
//!
//! ## Crates
//!
//! - [`transport`]: the `Connection` trait, WebSocket and in-memory pairs.
//! - [`protocol`]: messages, the JSON codec, error codes, schemas.
//! - [`session`]: the session engine, router, and registry.

mod client;
mod error;
mod server;

pub use client::{ChargePoint, ChargePointBuilder};
pub use error::OcppError;
pub use server::{
    CentralSystem, CentralSystemBuilder, DuplicatePolicy, SessionCallback,
};

pub use ocpp_protocol as protocol;
pub use ocpp_protocol::v16;
pub use ocpp_session as session;
pub use ocpp_transport as transport;

/// Everything needed to write a central system or a charge point.
pub mod prelude {
    pub use crate::{
        CentralSystem, CentralSystemBuilder, ChargePoint, ChargePointBuilder,
        DuplicatePolicy, OcppError,
    };
    pub use ocpp_protocol::{
        Action, ErrorCode, PayloadSchema, PermissiveSchema, Validate,
    };
    pub use ocpp_session::{
        AllowAll, Authenticator, DispatchPolicy, HandlerError, Router,
        SessionConfig, SessionError, SessionHandle, SessionRegistry,
        ValidationPolicy,
    };
    pub use ocpp_transport::{Rejection, UpgradeRequest};
}
