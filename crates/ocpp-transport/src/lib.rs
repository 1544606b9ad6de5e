//! Transport abstraction layer for OCPP-J.
//!
//! Provides the [`Connection`] trait: a full-duplex, frame-oriented pipe
//! between two peers. The session engine above only ever sees [`Frame`]s;
//! it doesn't know whether they travel over a WebSocket or an in-memory
//! channel.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`,
//!   including the server-side upgrade with sub-protocol negotiation and
//!   the client-side connect.
//!
//! [`MemConnection`] is always available and is what most session tests
//! run on.

mod error;
mod mem;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use mem::MemConnection;
#[cfg(feature = "websocket")]
pub use websocket::{
    ClientConnection, PendingUpgrade, Rejection, UpgradeRequest,
    WebSocketConnection, WebSocketTransport, connect,
};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A single unit travelling over a [`Connection`].
///
/// OCPP-J messages are always carried in `Text` frames. `Ping`/`Pong` are
/// the liveness control frames; `Close` asks the peer to end the
/// connection and is only ever sent, never returned by `recv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// Returns `true` for `Ping`, `Pong`, and `Close`.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ping(_) | Self::Pong(_) | Self::Close)
    }
}

/// A single connection that can send and receive frames.
///
/// Implementations must allow one task to be blocked in [`recv`] while
/// another task calls [`send`]; the session's read and write pumps rely
/// on that.
///
/// The methods return `impl Future + Send` (rather than being plain
/// `async fn`) so that generic code can move them into `tokio::spawn`.
///
/// [`recv`]: Connection::recv
/// [`send`]: Connection::send
pub trait Connection: Send + Sync + 'static {
    /// Sends one frame to the remote peer.
    fn send(
        &self,
        frame: Frame,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Frame>, TransportError>> + Send;

    /// Closes the connection. Closing twice is not an error.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_next_connection_id_is_unique() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_frame_is_control() {
        assert!(Frame::Ping(vec![]).is_control());
        assert!(Frame::Pong(vec![1]).is_control());
        assert!(Frame::Close.is_control());
        assert!(!Frame::Text("[]".into()).is_control());
        assert!(!Frame::Binary(vec![]).is_control());
    }
}
