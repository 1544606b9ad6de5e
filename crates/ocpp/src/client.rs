//! `ChargePoint` builder: the client side of OCPP-J.
//!
//! A charge point dials the central system at `{url}/{id}`, offers its
//! sub-protocols, and runs a client-role session over the result. The
//! session pings on its own; see [`SessionConfig::for_client`].

use std::sync::Arc;

use ocpp_protocol::v16::Ocpp16Schema;
use ocpp_protocol::{Action, PayloadSchema};
use ocpp_session::{
    Role, Router, SessionConfig, SessionContext, SessionError, SessionHandle,
};
use serde_json::Value;

use crate::OcppError;

/// Builder for connecting a charge point.
///
/// ```rust,no_run
/// use ocpp::prelude::*;
/// use ocpp::v16::{BootNotification, BootNotificationRequest};
///
/// # async fn run() -> Result<(), OcppError> {
/// let cp = ChargePoint::builder()
///     .id("CP-1")
///     .connect("ws://127.0.0.1:8887/ocpp")
///     .await?;
/// let boot = cp
///     .call::<BootNotification>(BootNotificationRequest::new("VendorX", "ModelY"))
///     .await?;
/// println!("registration: {:?}", boot.status);
/// # Ok(())
/// # }
/// ```
pub struct ChargePointBuilder {
    id: Option<String>,
    schemas: Vec<Arc<dyn PayloadSchema>>,
    router: Router,
    session_config: SessionConfig,
}

impl ChargePointBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            schemas: Vec::new(),
            router: Router::builder().build(),
            session_config: SessionConfig::for_client(),
        }
    }

    /// The charge point identity, appended to the URL on connect.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds a sub-protocol to offer, most preferred first. Without any
    /// call the client offers `ocpp1.6` with [`Ocpp16Schema`].
    pub fn schema(mut self, schema: impl PayloadSchema + 'static) -> Self {
        self.schemas.push(Arc::new(schema));
        self
    }

    /// Sets the handlers for Calls coming from the central system.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Connects and starts the session.
    ///
    /// # Errors
    /// - [`OcppError::Config`] if no id was set or it contains `/`.
    /// - [`OcppError::Transport`] if the connection or the handshake fails,
    ///   including when the server accepts none of the offered protocols.
    pub async fn connect(self, url: &str) -> Result<ChargePoint, OcppError> {
        let id = match self.id {
            Some(id) if !id.is_empty() && !id.contains('/') => id,
            Some(id) => {
                return Err(OcppError::Config(format!(
                    "invalid charge point id {id:?}"
                )));
            }
            None => {
                return Err(OcppError::Config("charge point id is required".into()));
            }
        };
        let schemas = if self.schemas.is_empty() {
            vec![Arc::new(Ocpp16Schema) as Arc<dyn PayloadSchema>]
        } else {
            self.schemas
        };
        let offered: Vec<String> = schemas
            .iter()
            .map(|s| s.subprotocol().to_string())
            .collect();

        let endpoint = format!("{}/{}", url.trim_end_matches('/'), id);
        let conn = ocpp_transport::connect(&endpoint, &offered).await?;
        let subprotocol = conn.subprotocol().map(str::to_string);
        let schema = subprotocol
            .as_deref()
            .and_then(|proto| schemas.iter().find(|s| s.subprotocol() == proto))
            .or_else(|| schemas.first())
            .cloned()
            .ok_or_else(|| OcppError::Config("no schema configured".into()))?;
        if subprotocol.is_none() {
            tracing::warn!(
                %endpoint,
                fallback = schema.subprotocol(),
                "server selected no sub-protocol"
            );
        }

        let ctx = SessionContext::new(Arc::new(self.router), schema)
            .with_config(self.session_config);
        let session = SessionHandle::spawn(conn, id, subprotocol, Role::Client, ctx);
        tracing::info!(
            %endpoint,
            subprotocol = session.subprotocol().unwrap_or("-"),
            "charge point connected"
        );
        Ok(ChargePoint { session })
    }
}

impl Default for ChargePointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected charge point.
#[derive(Debug, Clone)]
pub struct ChargePoint {
    session: SessionHandle,
}

impl ChargePoint {
    pub fn builder() -> ChargePointBuilder {
        ChargePointBuilder::new()
    }

    pub fn id(&self) -> &str {
        self.session.peer_id()
    }

    /// The underlying session, for everything not mirrored here.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Sends a typed Call to the central system.
    pub async fn call<A: Action>(
        &self,
        request: A::Request,
    ) -> Result<A::Response, SessionError> {
        self.session.call::<A>(request).await
    }

    pub async fn call_raw(
        &self,
        action: &str,
        payload: Value,
    ) -> Result<Value, SessionError> {
        self.session.call_raw(action, payload).await
    }

    /// Closes the connection and waits until the session is gone.
    pub async fn disconnect(&self) {
        self.session.shutdown();
        self.session.closed().await;
    }
}
