//! The connection session: one peer, two pumps, and a supervisor.
//!
//! ```text
//!              ┌────────────── SessionHandle (cheap to clone) ─────────────┐
//!              │ call() ──► pending table ──► outbound queue ──┐           │
//!              └──────────────────────────────────────────────┼───────────┘
//!                                                             ▼
//!  conn.recv() ──► read pump ──► router ──► reply ──► outbound queue ──► write pump ──► conn.send()
//!                     │                                                     ▲
//!                     └──── ping ──► control channel (pong) ────────────────┘
//! ```
//!
//! - The **read pump** is the only reader. It decodes frames, dispatches
//!   Calls, and completes pending entries for CallResults and CallErrors.
//!   It never writes to the connection.
//! - The **write pump** is the only writer. It serves, in priority order,
//!   the shutdown signal, pong replies, the ping ticker, and the outbound
//!   queue. The WebSocket transport drops the pong and lets tungstenite
//!   answer the ping while reading.
//! - The **supervisor** waits for both pumps, then leaves the registry
//!   and publishes [`SessionState::Closed`].
//!
//! Pending calls fail the moment the session leaves `Open`, and a handler
//! still running inline on the read pump is dropped, so teardown never
//! waits on application code.
//!
//! A session closes when either pump stops: the peer closed, a read or
//! write deadline passed, the transport failed, or someone called
//! [`SessionHandle::shutdown`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ocpp_protocol::{
    Action, Call, CallError, CallResult, Codec, ErrorCode, JsonCodec,
    Message, PayloadSchema, ValidationError, decode_payload, encode_payload,
};
use ocpp_transport::{Connection, ConnectionId, Frame};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    DispatchPolicy, HandlerError, PendingCalls, Role, Router, SessionConfig,
    SessionError, SessionRegistry, ValidationPolicy,
};

/// Room for pong replies waiting on the write pump.
const CONTROL_CAPACITY: usize = 8;

// ---------------------------------------------------------------------------
// SessionState / SessionContext
// ---------------------------------------------------------------------------

/// Lifecycle of a session. Only ever moves forward.
///
/// ```text
/// Open ──(peer close, error, deadline, shutdown)──► Closing ──(pumps done)──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Everything a session needs from the application, passed in at
/// construction.
#[derive(Clone)]
pub struct SessionContext {
    pub router: Arc<Router>,
    pub schema: Arc<dyn PayloadSchema>,
    pub config: SessionConfig,
    /// When set, the session removes itself from this registry on close.
    pub registry: Option<SessionRegistry>,
}

impl SessionContext {
    pub fn new(router: Arc<Router>, schema: Arc<dyn PayloadSchema>) -> Self {
        Self {
            router,
            schema,
            config: SessionConfig::default(),
            registry: None,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: SessionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("actions", &self.router.actions())
            .field("subprotocol", &self.schema.subprotocol())
            .field("config", &self.config)
            .field("registry", &self.registry.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// A frame waiting for the write pump. `sent` fires once it's written.
struct Outbound {
    text: String,
    sent: Option<oneshot::Sender<()>>,
}

struct Shared {
    session_id: ConnectionId,
    peer_id: String,
    subprotocol: Option<String>,
    role: Role,
    ctx: SessionContext,
    codec: JsonCodec,
    outbound: mpsc::Sender<Outbound>,
    control: mpsc::Sender<Frame>,
    pending: PendingCalls,
    /// Serializes encode + enqueue of outgoing Calls.
    call_lock: Mutex<()>,
    state: watch::Sender<SessionState>,
    extras: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// A handle to a running session.
///
/// Clones share the same session. The session keeps running while its
/// connection is alive, whether or not any handle is still held.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Starts a session on an established connection.
    ///
    /// Spawns the read pump, the write pump, and the supervisor onto the
    /// current Tokio runtime and returns immediately.
    pub fn spawn<C: Connection>(
        conn: C,
        peer_id: impl Into<String>,
        subprotocol: Option<String>,
        role: Role,
        ctx: SessionContext,
    ) -> Self {
        let conn = Arc::new(conn);
        let (outbound_tx, outbound_rx) =
            mpsc::channel(ctx.config.outbound_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (state_tx, _) = watch::channel(SessionState::Open);

        let session = Self {
            shared: Arc::new(Shared {
                session_id: conn.id(),
                peer_id: peer_id.into(),
                subprotocol,
                role,
                ctx,
                codec: JsonCodec,
                outbound: outbound_tx,
                control: control_tx,
                pending: PendingCalls::new(),
                call_lock: Mutex::new(()),
                state: state_tx,
                extras: RwLock::new(HashMap::new()),
            }),
        };

        let span = tracing::info_span!(
            "session",
            peer = %session.peer_id(),
            session_id = %session.id(),
        );
        let read = tokio::spawn(
            read_pump(Arc::clone(&conn), session.clone())
                .instrument(span.clone()),
        );
        let write = tokio::spawn(
            write_pump(
                Arc::clone(&conn),
                session.clone(),
                outbound_rx,
                control_rx,
            )
            .instrument(span.clone()),
        );
        tokio::spawn(
            supervise(conn, session.clone(), read, write)
                .instrument(span.clone()),
        );

        span.in_scope(|| {
            tracing::info!(
                role = ?role,
                subprotocol = session.subprotocol().unwrap_or("-"),
                "session opened"
            );
        });
        session
    }

    /// Identifier of the underlying connection.
    pub fn id(&self) -> ConnectionId {
        self.shared.session_id
    }

    /// The charge point id this session talks to (or as).
    pub fn peer_id(&self) -> &str {
        &self.shared.peer_id
    }

    /// The negotiated WebSocket sub-protocol, e.g. `ocpp1.6`.
    pub fn subprotocol(&self) -> Option<&str> {
        self.shared.subprotocol.as_deref()
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Returns `true` while the session is [`SessionState::Open`].
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Number of calls still waiting for an answer.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    /// Returns `true` if both handles refer to the same session.
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Sends a typed Call and waits for the typed response.
    ///
    /// # Errors
    /// - [`SessionError::Validation`] if the request or the response
    ///   fails validation.
    /// - [`SessionError::CallError`] if the peer answered with a CallError.
    /// - [`SessionError::Timeout`] if no answer came in time.
    /// - [`SessionError::NotConnected`] / [`SessionError::ConnectionClosed`]
    ///   if the session is, or starts, closing.
    /// - [`SessionError::QueueFull`] if the outbound queue stayed full.
    pub async fn call<A: Action>(
        &self,
        request: A::Request,
    ) -> Result<A::Response, SessionError> {
        let payload = encode_payload(&request)?;
        let response = self.call_raw(A::NAME, payload).await?;
        Ok(decode_payload(&response)?)
    }

    /// Sends a Call with a raw payload and waits for the raw response.
    ///
    /// Both payloads are checked against the session's schema.
    pub async fn call_raw(
        &self,
        action: &str,
        payload: Value,
    ) -> Result<Value, SessionError> {
        let shared = &self.shared;
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        shared.ctx.schema.validate_request(action, &payload)?;

        let unique_id = Uuid::new_v4().to_string();
        let rx = shared.pending.register(&unique_id, action)?;
        // Closing may have started (and the table been failed) since the
        // first check.
        if !self.is_connected() {
            shared.pending.cancel(&unique_id);
            return Err(SessionError::NotConnected);
        }

        let message = Message::Call(Call::new(&unique_id, action, payload));
        let text = match shared.codec.encode(&message) {
            Ok(text) => text,
            Err(e) => {
                shared.pending.cancel(&unique_id);
                return Err(e.into());
            }
        };
        let enqueued = {
            let _guard = shared.call_lock.lock().await;
            self.enqueue(text, None).await
        };
        if let Err(e) = enqueued {
            shared.pending.cancel(&unique_id);
            return Err(e);
        }
        tracing::debug!(%unique_id, %action, "call queued");

        let timeout = shared.ctx.config.response_timeout;
        match time::timeout(timeout, rx).await {
            Err(_) => {
                shared.pending.cancel(&unique_id);
                tracing::warn!(%unique_id, %action, ?timeout, "call timed out");
                Err(SessionError::Timeout { unique_id, timeout })
            }
            // Sender dropped by fail_all.
            Ok(Err(_)) => Err(SessionError::ConnectionClosed),
            Ok(Ok(Err(call_error))) => Err(SessionError::CallError(call_error)),
            Ok(Ok(Ok(response))) => {
                shared.ctx.schema.validate_response(action, &response)?;
                Ok(response)
            }
        }
    }

    /// Starts closing the session. Returns immediately; await
    /// [`closed`](Self::closed) to wait for the teardown.
    ///
    /// Frames already queued are still written, then a Close frame is
    /// sent. Calls still waiting fail with
    /// [`SessionError::ConnectionClosed`].
    pub fn shutdown(&self) {
        if self.begin_close() {
            tracing::info!(
                peer = %self.peer_id(),
                session_id = %self.id(),
                "session shutdown requested"
            );
        }
    }

    /// Waits until the session is fully [`SessionState::Closed`].
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Stores an application value on the session, one per type.
    pub fn set_extra<T: Any + Send + Sync>(&self, value: T) {
        self.shared
            .extras
            .write()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a clone of the stored value of type `T`.
    pub fn extra<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.shared
            .extras
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn remove_extra<T: Any + Send + Sync>(&self) -> Option<T> {
        self.shared
            .extras
            .write()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    // -- internals ---------------------------------------------------------

    /// Moves `Open` to `Closing` and fails every pending call. Returns
    /// `false` if already past `Open`.
    fn begin_close(&self) -> bool {
        let moved = self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Open {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });
        if moved {
            let failed = self.shared.pending.fail_all();
            if failed > 0 {
                tracing::debug!(failed_calls = failed, "pending calls failed");
            }
        }
        moved
    }

    async fn enqueue(
        &self,
        text: String,
        sent: Option<oneshot::Sender<()>>,
    ) -> Result<(), SessionError> {
        let timeout = self.shared.ctx.config.enqueue_timeout;
        self.shared
            .outbound
            .send_timeout(Outbound { text, sent }, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SessionError::QueueFull,
                SendTimeoutError::Closed(_) => SessionError::ConnectionClosed,
            })
    }

    async fn send_control(&self, frame: Frame) -> Result<(), SessionError> {
        let timeout = self.shared.ctx.config.enqueue_timeout;
        self.shared
            .control
            .send_timeout(frame, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SessionError::QueueFull,
                SendTimeoutError::Closed(_) => SessionError::ConnectionClosed,
            })
    }

    /// Encodes and enqueues a reply. Failures are logged, never returned:
    /// a reply that can't be sent must not stop the read pump.
    async fn reply(
        &self,
        message: Message,
        sent: Option<oneshot::Sender<()>>,
    ) -> bool {
        let message = match message {
            Message::CallError(mut error) => {
                error.error_code =
                    error.error_code.for_subprotocol(self.subprotocol());
                Message::CallError(error)
            }
            other => other,
        };
        let text = match self.shared.codec.encode(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(
                    unique_id = message.unique_id(),
                    error = %e,
                    "failed to encode reply"
                );
                return false;
            }
        };
        match self.enqueue(text, sent).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    unique_id = message.unique_id(),
                    error = %e,
                    "reply dropped"
                );
                false
            }
        }
    }

    async fn handle_inbound(
        &self,
        data: &[u8],
        limiter: Option<&Arc<Semaphore>>,
        seq: &mut u64,
    ) {
        let message = match self.shared.codec.decode(data) {
            Ok(message) => message,
            Err(err) => {
                match err.to_call_error() {
                    Some(reply) => {
                        tracing::warn!(
                            unique_id = %reply.unique_id,
                            error = %err,
                            "malformed frame"
                        );
                        self.reply(reply.into(), None).await;
                    }
                    None => {
                        tracing::warn!(
                            unique_id = err.unique_id().unwrap_or("-"),
                            error = %err,
                            "malformed response dropped"
                        );
                    }
                }
                return;
            }
        };

        match message {
            Message::Call(call) => {
                *seq += 1;
                let seq = *seq;
                match limiter {
                    None => self.dispatch(call, seq).await,
                    Some(limiter) => {
                        let Ok(permit) =
                            Arc::clone(limiter).acquire_owned().await
                        else {
                            return;
                        };
                        let session = self.clone();
                        tokio::spawn(
                            async move {
                                session.dispatch(call, seq).await;
                                drop(permit);
                            }
                            .in_current_span(),
                        );
                    }
                }
            }
            Message::CallResult(result) => {
                match self
                    .shared
                    .pending
                    .complete(&result.unique_id, Ok(result.payload))
                {
                    Some(action) => tracing::debug!(
                        unique_id = %result.unique_id,
                        %action,
                        "call result received"
                    ),
                    None => tracing::warn!(
                        unique_id = %result.unique_id,
                        "unmatched call result dropped"
                    ),
                }
            }
            Message::CallError(error) => {
                let unique_id = error.unique_id.clone();
                match self.shared.pending.complete(&unique_id, Err(error)) {
                    Some(action) => tracing::debug!(
                        %unique_id,
                        %action,
                        "call error received"
                    ),
                    None => tracing::warn!(
                        %unique_id,
                        "unmatched call error dropped"
                    ),
                }
            }
        }
    }

    async fn dispatch(&self, call: Call, seq: u64) {
        let span = tracing::debug_span!(
            "call",
            seq,
            unique_id = %call.unique_id,
            action = %call.action,
        );
        self.dispatch_inner(call).instrument(span).await;
    }

    async fn dispatch_inner(&self, call: Call) {
        let Call {
            unique_id,
            action,
            payload,
        } = call;
        let ctx = &self.shared.ctx;

        let Some(route) = ctx.router.get(&action).cloned() else {
            tracing::debug!("action not supported");
            let error = CallError::new(
                &unique_id,
                ErrorCode::NotSupported,
                format!("Action {action} is not supported"),
            );
            self.reply(error.into(), None).await;
            return;
        };

        if let Err(err) = ctx.schema.validate_request(&action, &payload) {
            self.reject_request(&unique_id, err).await;
            return;
        }

        let request = route.after.as_ref().map(|_| payload.clone());
        let response = match (*route.handler)(self.clone(), payload).await {
            Ok(response) => response,
            Err(HandlerError::Call {
                code,
                description,
                details,
            }) => {
                tracing::debug!(%code, %description, "handler returned error");
                let error = CallError::new(&unique_id, code, description)
                    .with_details(details);
                self.reply(error.into(), None).await;
                return;
            }
            Err(HandlerError::InvalidRequest(err)) => {
                self.reject_request(&unique_id, err).await;
                return;
            }
            Err(HandlerError::InvalidResponse(err)) => {
                self.reject_response(&unique_id, err).await;
                return;
            }
        };

        if let Err(err) = ctx.schema.validate_response(&action, &response) {
            self.reject_response(&unique_id, err).await;
            return;
        }

        let (Some(after), Some(request)) = (route.after, request) else {
            self.reply(CallResult::new(&unique_id, response).into(), None)
                .await;
            return;
        };

        let (sent_tx, sent_rx) = oneshot::channel();
        let result = CallResult::new(&unique_id, response.clone());
        if !self.reply(result.into(), Some(sent_tx)).await {
            return;
        }
        let session = self.clone();
        let delay = ctx.config.after_handler_delay;
        tokio::spawn(
            async move {
                if sent_rx.await.is_err() {
                    tracing::debug!("result never written, skipping after-handler");
                    return;
                }
                time::sleep(delay).await;
                if let Err(e) = (*after)(session, request, response).await {
                    tracing::warn!(error = %e, "after-handler failed");
                }
            }
            .in_current_span(),
        );
    }

    async fn reject_request(&self, unique_id: &str, err: ValidationError) {
        match self.shared.ctx.config.validation {
            ValidationPolicy::Reply => {
                tracing::warn!(error = %err, "request failed validation");
                let error = CallError::from_validation(unique_id, &err);
                self.reply(error.into(), None).await;
            }
            ValidationPolicy::Suppress => {
                tracing::warn!(
                    error = %err,
                    "request failed validation, no reply sent"
                );
            }
        }
    }

    async fn reject_response(&self, unique_id: &str, err: ValidationError) {
        match self.shared.ctx.config.validation {
            ValidationPolicy::Reply => {
                tracing::error!(error = %err, "handler response failed validation");
                let error = CallError::new(
                    unique_id,
                    ErrorCode::InternalError,
                    "response failed validation",
                );
                self.reply(error.into(), None).await;
            }
            ValidationPolicy::Suppress => {
                tracing::error!(
                    error = %err,
                    "handler response failed validation, no reply sent"
                );
            }
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id())
            .field("peer_id", &self.peer_id())
            .field("subprotocol", &self.subprotocol())
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pumps
// ---------------------------------------------------------------------------

/// Resolves once the session has left `Open`.
async fn wait_closing(rx: &mut watch::Receiver<SessionState>) {
    let _ = rx.wait_for(|s| *s != SessionState::Open).await;
}

async fn read_pump<C: Connection>(conn: Arc<C>, session: SessionHandle) {
    let config = &session.shared.ctx.config;
    let mut state_rx = session.shared.state.subscribe();
    let limiter = match config.dispatch {
        DispatchPolicy::Sequential => None,
        DispatchPolicy::Concurrent { max_in_flight } => {
            Some(Arc::new(Semaphore::new(max_in_flight.max(1))))
        }
    };
    let mut seq = 0u64;

    loop {
        let received = tokio::select! {
            _ = wait_closing(&mut state_rx) => break,
            received = time::timeout(config.pong_wait, conn.recv()) => received,
        };

        let frame = match received {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                tracing::info!("peer closed the connection");
                break;
            }
            Ok(Err(e)) if e.is_closed() => {
                tracing::info!(error = %e, "connection closed");
                break;
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "read failed");
                break;
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?config.pong_wait,
                    "read deadline exceeded, peer presumed dead"
                );
                break;
            }
        };

        let data = match frame {
            Frame::Text(text) => text.into_bytes(),
            Frame::Binary(data) => {
                tracing::debug!(len = data.len(), "binary frame, decoding as text");
                data
            }
            Frame::Ping(payload) => {
                if let Err(e) = session.send_control(Frame::Pong(payload)).await {
                    tracing::warn!(error = %e, "pong dropped");
                }
                continue;
            }
            Frame::Pong(_) => {
                tracing::trace!("pong received");
                continue;
            }
            Frame::Close => {
                tracing::info!("peer sent close");
                break;
            }
        };

        // An inline handler or a wait for a dispatch permit must not hold
        // the pump past shutdown.
        tokio::select! {
            _ = wait_closing(&mut state_rx) => {
                tracing::debug!("inbound call abandoned, session closing");
                break;
            }
            _ = session.handle_inbound(&data, limiter.as_ref(), &mut seq) => {}
        }
    }

    session.begin_close();
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Writes one frame under the write deadline. Returns `false` if the
/// session must close.
async fn write<C: Connection>(conn: &C, frame: Frame, deadline: Duration) -> bool {
    match time::timeout(deadline, conn.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) if e.is_closed() => {
            tracing::info!(error = %e, "connection closed while writing");
            false
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "write failed");
            false
        }
        Err(_) => {
            tracing::error!(timeout = ?deadline, "write deadline exceeded");
            false
        }
    }
}

async fn write_pump<C: Connection>(
    conn: Arc<C>,
    session: SessionHandle,
    mut outbound: mpsc::Receiver<Outbound>,
    mut control: mpsc::Receiver<Frame>,
) {
    let config = &session.shared.ctx.config;
    let deadline = config.write_timeout;
    let mut state_rx = session.shared.state.subscribe();
    let mut ticker = match (session.role(), config.ping_interval) {
        (Role::Client, Some(period)) => {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        }
        _ => None,
    };

    loop {
        tokio::select! {
            biased;

            _ = wait_closing(&mut state_rx) => {
                // Flush what callers already queued, then say goodbye.
                while let Ok(Outbound { text, sent }) = outbound.try_recv() {
                    if !write(&*conn, Frame::Text(text), deadline).await {
                        break;
                    }
                    if let Some(sent) = sent {
                        let _ = sent.send(());
                    }
                }
                break;
            }
            Some(frame) = control.recv() => {
                if !write(&*conn, frame, deadline).await {
                    break;
                }
            }
            _ = next_tick(&mut ticker) => {
                tracing::trace!("sending ping");
                if !write(&*conn, Frame::Ping(Vec::new()), deadline).await {
                    break;
                }
            }
            item = outbound.recv() => {
                let Some(Outbound { text, sent }) = item else {
                    break;
                };
                if !write(&*conn, Frame::Text(text), deadline).await {
                    break;
                }
                if let Some(sent) = sent {
                    let _ = sent.send(());
                }
            }
        }
    }

    session.begin_close();
    match time::timeout(deadline, conn.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "close frame not sent"),
        Err(_) => tracing::debug!("close frame timed out"),
    }
}

async fn supervise<C: Connection>(
    conn: Arc<C>,
    session: SessionHandle,
    read: JoinHandle<()>,
    write: JoinHandle<()>,
) {
    let (read, write) = tokio::join!(read, write);
    if let Err(e) = read {
        tracing::error!(error = %e, "read pump panicked");
    }
    if let Err(e) = write {
        tracing::error!(error = %e, "write pump panicked");
    }
    // A panicked pump skips its own cleanup.
    session.begin_close();
    let _ = time::timeout(session.shared.ctx.config.write_timeout, conn.close())
        .await;

    let failed = session.shared.pending.fail_all();
    if let Some(registry) = &session.shared.ctx.registry {
        registry.delete_if_same(session.peer_id(), &session);
    }
    session.shared.state.send_replace(SessionState::Closed);
    tracing::info!(failed_calls = failed, "session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocpp_protocol::PermissiveSchema;
    use ocpp_transport::MemConnection;

    fn context() -> SessionContext {
        SessionContext::new(
            Arc::new(Router::builder().build()),
            Arc::new(PermissiveSchema::new("ocpp1.6")),
        )
    }

    #[tokio::test]
    async fn test_spawn_exposes_identity() {
        let (conn, _peer) = MemConnection::pair();
        let conn_id = conn.id();

        let session = SessionHandle::spawn(
            conn,
            "CP-1",
            Some("ocpp1.6".into()),
            Role::Server,
            context(),
        );

        assert_eq!(session.id(), conn_id);
        assert_eq!(session.peer_id(), "CP-1");
        assert_eq!(session.subprotocol(), Some("ocpp1.6"));
        assert_eq!(session.role(), Role::Server);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_extras_store_one_value_per_type() {
        let (conn, _peer) = MemConnection::pair();
        let session =
            SessionHandle::spawn(conn, "CP-1", None, Role::Server, context());

        assert_eq!(session.extra::<u32>(), None);
        session.set_extra(7u32);
        session.set_extra(String::from("tenant-a"));

        assert_eq!(session.extra::<u32>(), Some(7));
        assert_eq!(session.extra::<String>().as_deref(), Some("tenant-a"));
        assert_eq!(session.remove_extra::<u32>(), Some(7));
        assert_eq!(session.extra::<u32>(), None);
    }

    #[tokio::test]
    async fn test_shutdown_reaches_closed() {
        let (conn, peer) = MemConnection::pair();
        let session =
            SessionHandle::spawn(conn, "CP-1", None, Role::Server, context());

        session.shutdown();
        session.closed().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_connected());
        // The peer sees the close.
        assert_eq!(peer.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_call_raw_after_close_returns_not_connected() {
        let (conn, _peer) = MemConnection::pair();
        let session =
            SessionHandle::spawn(conn, "CP-1", None, Role::Server, context());
        session.shutdown();
        session.closed().await;

        let result = session.call_raw("Heartbeat", serde_json::json!({})).await;

        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_same_session_compares_identity() {
        let (a, _a_peer) = MemConnection::pair();
        let (b, _b_peer) = MemConnection::pair();
        let one = SessionHandle::spawn(a, "CP-1", None, Role::Server, context());
        let two = SessionHandle::spawn(b, "CP-1", None, Role::Server, context());

        assert!(one.same_session(&one.clone()));
        assert!(!one.same_session(&two));
    }
}
