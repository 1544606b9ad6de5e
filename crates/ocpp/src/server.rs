//! `CentralSystem` builder and accept loop.
//!
//! The server side of OCPP-J. It ties the layers together:
//! transport (upgrade) → authenticator → session → registry.
//!
//! Each accepted TCP connection is upgraded on its own task. The charge
//! point id comes from the last segment of the request path
//! (`ws://host/ocpp/CP-1` → `CP-1`), and the negotiated sub-protocol
//! picks the payload schema the session validates with.

use std::future::Future;
use std::sync::Arc;

use ocpp_protocol::v16::Ocpp16Schema;
use ocpp_protocol::{PayloadSchema, PermissiveSchema};
use ocpp_session::{
    AllowAll, Authenticator, Role, Router, SessionConfig, SessionContext,
    SessionHandle, SessionRegistry,
};
use ocpp_transport::{
    PendingUpgrade, Rejection, UpgradeRequest, WebSocketTransport,
};

use crate::OcppError;

/// What to do when a charge point connects while a session with the same
/// id is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Refuse the new connection with HTTP 409. The open session stays.
    #[default]
    RejectNew,
    /// Accept the new connection and shut the old session down.
    ReplaceOld,
}

/// Runs for each session as it connects or after it has closed.
pub type SessionCallback = Arc<dyn Fn(SessionHandle) + Send + Sync>;

/// Shared server state passed to each upgrade task.
struct ServerState {
    router: Arc<Router>,
    schemas: Vec<Arc<dyn PayloadSchema>>,
    session_config: SessionConfig,
    authenticator: Arc<dyn Authenticator>,
    duplicate_policy: DuplicatePolicy,
    registry: SessionRegistry,
    on_connect: Option<SessionCallback>,
    on_disconnect: Option<SessionCallback>,
}

impl ServerState {
    /// The pre-upgrade gate: id present, authenticator happy, no
    /// duplicate (under [`DuplicatePolicy::RejectNew`]).
    fn admit(&self, request: &UpgradeRequest) -> Result<(), Rejection> {
        let Some(peer_id) = request.last_path_segment() else {
            return Err(Rejection::bad_request("missing charge point id"));
        };
        self.authenticator.authorize(request)?;
        if self.duplicate_policy == DuplicatePolicy::RejectNew
            && self.registry.is_connected(peer_id)
        {
            return Err(Rejection::new(409, "charge point already connected"));
        }
        Ok(())
    }

    fn schema_for(&self, subprotocol: Option<&str>) -> Arc<dyn PayloadSchema> {
        subprotocol
            .and_then(|proto| {
                self.schemas.iter().find(|s| s.subprotocol() == proto)
            })
            .or_else(|| self.schemas.first())
            .cloned()
            .unwrap_or_else(|| {
                Arc::new(PermissiveSchema::new(subprotocol.unwrap_or_default()))
            })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a central system.
///
/// # Example
///
/// ```rust,no_run
/// use ocpp::prelude::*;
/// use ocpp::v16::{Heartbeat, HeartbeatResponse};
///
/// # async fn run() -> Result<(), OcppError> {
/// let router = Router::builder()
///     .on(Heartbeat, |_session, _req| async {
///         Ok(HeartbeatResponse { current_time: "2024-01-01T00:00:00Z".into() })
///     })
///     .build();
///
/// let server = CentralSystem::builder()
///     .bind("0.0.0.0:8887")
///     .router(router)
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct CentralSystemBuilder {
    bind_addr: String,
    schemas: Vec<Arc<dyn PayloadSchema>>,
    router: Router,
    session_config: SessionConfig,
    authenticator: Arc<dyn Authenticator>,
    duplicate_policy: DuplicatePolicy,
    on_connect: Option<SessionCallback>,
    on_disconnect: Option<SessionCallback>,
}

impl CentralSystemBuilder {
    /// Creates a builder with default settings: `127.0.0.1:8887`, the
    /// OCPP 1.6 schema, no handlers, and every charge point admitted.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8887".to_string(),
            schemas: Vec::new(),
            router: Router::builder().build(),
            session_config: SessionConfig::for_server(),
            authenticator: Arc::new(AllowAll),
            duplicate_policy: DuplicatePolicy::default(),
            on_connect: None,
            on_disconnect: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Adds a supported sub-protocol and the schema that validates it.
    ///
    /// Call once per protocol version, most preferred first. Without any
    /// call the server speaks `ocpp1.6` with [`Ocpp16Schema`].
    pub fn schema(mut self, schema: impl PayloadSchema + 'static) -> Self {
        self.schemas.push(Arc::new(schema));
        self
    }

    /// Sets the handlers for Calls coming from charge points.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Sets the configuration every session starts with.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the pre-upgrade authenticator.
    pub fn authenticator(mut self, authenticator: impl Authenticator) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Runs once a session is registered.
    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn(SessionHandle) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Runs once a session has closed and left the registry.
    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: Fn(SessionHandle) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }

    /// Binds the listener.
    ///
    /// # Errors
    /// [`OcppError::Transport`] if the address can't be bound.
    pub async fn build(self) -> Result<CentralSystem, OcppError> {
        let schemas = if self.schemas.is_empty() {
            vec![Arc::new(Ocpp16Schema) as Arc<dyn PayloadSchema>]
        } else {
            self.schemas
        };
        let subprotocols = schemas
            .iter()
            .map(|s| s.subprotocol().to_string())
            .collect();
        let transport =
            WebSocketTransport::bind(&self.bind_addr, subprotocols).await?;

        let state = Arc::new(ServerState {
            router: Arc::new(self.router),
            schemas,
            session_config: self.session_config,
            authenticator: self.authenticator,
            duplicate_policy: self.duplicate_policy,
            registry: SessionRegistry::new(),
            on_connect: self.on_connect,
            on_disconnect: self.on_disconnect,
        });

        Ok(CentralSystem { transport, state })
    }
}

impl Default for CentralSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A bound central system.
///
/// Call [`run()`](Self::run) to start accepting charge points. Grab a
/// [`registry()`](Self::registry) clone first to reach sessions from
/// elsewhere.
pub struct CentralSystem {
    transport: WebSocketTransport,
    state: Arc<ServerState>,
}

impl CentralSystem {
    pub fn builder() -> CentralSystemBuilder {
        CentralSystemBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The registry of connected charge points. Cheap to clone.
    pub fn registry(&self) -> &SessionRegistry {
        &self.state.registry
    }

    /// The open session for `peer_id`, if any.
    pub fn session(&self, peer_id: &str) -> Option<SessionHandle> {
        self.state.registry.load(peer_id)
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), OcppError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `signal` resolves, then shuts every
    /// session down and waits for them to close.
    pub async fn run_until(
        self,
        signal: impl Future<Output = ()>,
    ) -> Result<(), OcppError> {
        tracing::info!(addr = ?self.local_addr().ok(), "central system running");
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(accept_charge_point(pending, state));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("central system stopping");
        self.state.registry.shutdown_all().await;
        Ok(())
    }

    /// Shuts down every connected session and waits until all are closed.
    /// The accept loop keeps running.
    pub async fn shutdown_all(&self) {
        self.state.registry.shutdown_all().await;
    }
}

/// Upgrades one connection and turns it into a registered session.
async fn accept_charge_point(pending: PendingUpgrade, state: Arc<ServerState>) {
    let remote_addr = pending.remote_addr();
    let gate_state = Arc::clone(&state);
    let gate = move |req: &UpgradeRequest| gate_state.admit(req);
    let conn = match pending.upgrade(gate).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::debug!(%remote_addr, error = %e, "upgrade failed");
            return;
        }
    };

    let request = conn.upgrade_request();
    let Some(peer_id) = request.last_path_segment().map(str::to_string) else {
        return;
    };
    let subprotocol = request.subprotocol.clone();
    let ctx = SessionContext {
        router: Arc::clone(&state.router),
        schema: state.schema_for(subprotocol.as_deref()),
        config: state.session_config.clone(),
        registry: Some(state.registry.clone()),
    };

    let session =
        SessionHandle::spawn(conn, peer_id.clone(), subprotocol, Role::Server, ctx);

    match state.duplicate_policy {
        DuplicatePolicy::RejectNew => {
            // Lost a race with another connection for the same id.
            if let Err(session) = state.registry.try_store(&peer_id, session.clone()) {
                tracing::warn!(peer = %peer_id, "duplicate connection, closing the new one");
                session.shutdown();
                return;
            }
        }
        DuplicatePolicy::ReplaceOld => {
            if let Some(old) = state.registry.store(&peer_id, session.clone()) {
                if !old.same_session(&session) {
                    tracing::info!(
                        peer = %peer_id,
                        old_session = %old.id(),
                        "replacing existing session"
                    );
                    old.shutdown();
                }
            }
        }
    }

    // Closed before it was stored: its own cleanup ran too early.
    if !session.is_connected() {
        state.registry.delete_if_same(&peer_id, &session);
        return;
    }

    if let Some(on_connect) = &state.on_connect {
        (**on_connect)(session.clone());
    }
    if let Some(on_disconnect) = state.on_disconnect.clone() {
        tokio::spawn(async move {
            session.closed().await;
            (*on_disconnect)(session);
        });
    }
}
