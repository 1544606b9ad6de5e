/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed, either by the peer or locally.
    ///
    /// This is the "expected" way for a connection to end and is not
    /// logged as a failure by higher layers.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending a frame failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving a frame failed (abnormal closure, protocol violation).
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting TCP connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The WebSocket upgrade handshake failed or was rejected.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Connecting to a remote endpoint failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
}

impl TransportError {
    /// Returns `true` if this error represents a normal, expected closure.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_))
    }
}
