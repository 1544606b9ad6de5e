//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The stream is split into its sink and stream halves, each behind its
//! own lock, so a reader parked in `recv` never blocks a writer.
//!
//! Pings are answered by tungstenite itself while reading. Incoming pings
//! still surface as [`Frame::Ping`] so a session sees the peer is alive,
//! but an explicit [`Frame::Pong`] is never written.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::{
    HeaderValue, StatusCode, header::SEC_WEBSOCKET_PROTOCOL,
};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Frame, TransportError, next_connection_id};

/// Upper bound for a single HTTP upgrade handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection type produced by [`connect`].
pub type ClientConnection = WebSocketConnection<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Upgrade metadata
// ---------------------------------------------------------------------------

/// What the server knows about a peer before the upgrade completes.
///
/// Handed to the pre-upgrade gate, and kept on the resulting
/// [`WebSocketConnection`].
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Request path, e.g. `/ocpp/CP-001`.
    pub path: String,
    /// Remote socket address.
    pub remote_addr: Option<SocketAddr>,
    /// Sub-protocols the client offered, in the client's order.
    pub offered_subprotocols: Vec<String>,
    /// The sub-protocol the server selected, if any.
    pub subprotocol: Option<String>,
    /// Request headers (name lowercased).
    pub headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Returns the first header value with the given (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the last non-empty path segment.
    ///
    /// OCPP-J puts the charge point identity there:
    /// `ws://host/ocpp/CP-001` → `CP-001`.
    pub fn last_path_segment(&self) -> Option<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).next_back()
    }
}

/// An HTTP-level refusal returned by the pre-upgrade gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub reason: String,
}

impl Rejection {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(401, reason)
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(400, reason)
    }
}

fn error_response(rejection: &Rejection) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(rejection.reason.clone()));
    *resp.status_mut() = StatusCode::from_u16(rejection.status)
        .unwrap_or(StatusCode::BAD_REQUEST);
    resp
}

/// Picks the first server-supported protocol that the client offered.
fn negotiate(supported: &[String], offered: &[String]) -> Option<String> {
    supported
        .iter()
        .find(|s| offered.iter().any(|o| o == *s))
        .cloned()
}

fn parse_offered(req: &Request) -> Vec<String> {
    req.headers()
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// A WebSocket listener that performs the OCPP-J upgrade.
pub struct WebSocketTransport {
    listener: TcpListener,
    subprotocols: Arc<[String]>,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    ///
    /// `subprotocols` is the server's preference-ordered list of
    /// supported sub-protocols (e.g. `["ocpp1.6"]`). An empty list means
    /// "don't negotiate".
    pub async fn bind(
        addr: &str,
        subprotocols: Vec<String>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, ?subprotocols, "WebSocket transport listening");
        Ok(Self {
            listener,
            subprotocols: subprotocols.into(),
        })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for the next TCP connection.
    ///
    /// The upgrade itself happens in [`PendingUpgrade::upgrade`], so the
    /// accept loop can hand it off to its own task and never stall on a
    /// slow client.
    pub async fn accept(&self) -> Result<PendingUpgrade, TransportError> {
        let (stream, remote_addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::debug!(%remote_addr, "accepted TCP connection");
        Ok(PendingUpgrade {
            stream,
            remote_addr,
            subprotocols: Arc::clone(&self.subprotocols),
        })
    }
}

/// A TCP connection that has not been upgraded yet.
pub struct PendingUpgrade {
    stream: TcpStream,
    remote_addr: SocketAddr,
    subprotocols: Arc<[String]>,
}

impl PendingUpgrade {
    /// Returns the remote address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Runs the WebSocket handshake.
    ///
    /// Sub-protocol negotiation happens first; a client that offers none
    /// of the supported protocols is refused with 400. Then `gate` sees
    /// the request and may refuse it. The whole handshake is bounded by
    /// a fixed timeout.
    pub async fn upgrade<F>(
        self,
        gate: F,
    ) -> Result<WebSocketConnection, TransportError>
    where
        F: FnOnce(&UpgradeRequest) -> Result<(), Rejection> + Send + Unpin,
    {
        let remote_addr = self.remote_addr;
        let supported = self.subprotocols;
        let mut accepted: Option<UpgradeRequest> = None;

        let callback = |req: &Request, mut resp: Response| {
            let offered = parse_offered(req);
            let subprotocol = negotiate(&supported, &offered);
            if !supported.is_empty() && subprotocol.is_none() {
                tracing::debug!(
                    %remote_addr, ?offered, "no supported sub-protocol offered"
                );
                return Err(error_response(&Rejection::bad_request(
                    "unsupported sub-protocol",
                )));
            }

            let upgrade = UpgradeRequest {
                path: req.uri().path().to_string(),
                remote_addr: Some(remote_addr),
                offered_subprotocols: offered,
                subprotocol: subprotocol.clone(),
                headers: req
                    .headers()
                    .iter()
                    .filter_map(|(k, v)| {
                        v.to_str()
                            .ok()
                            .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
                    })
                    .collect(),
            };

            if let Err(rejection) = gate(&upgrade) {
                tracing::info!(
                    %remote_addr,
                    path = %upgrade.path,
                    status = rejection.status,
                    reason = %rejection.reason,
                    "upgrade rejected"
                );
                return Err(error_response(&rejection));
            }

            if let Some(proto) = &subprotocol {
                match HeaderValue::from_str(proto) {
                    Ok(value) => {
                        resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                    }
                    Err(_) => {
                        return Err(error_response(&Rejection::bad_request(
                            "invalid sub-protocol",
                        )));
                    }
                }
            }

            accepted = Some(upgrade);
            Ok(resp)
        };

        let ws = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            tokio_tungstenite::accept_hdr_async(self.stream, callback),
        )
        .await
        .map_err(|_| TransportError::Handshake("handshake timed out".into()))?
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let upgrade = accepted.ok_or_else(|| {
            TransportError::Handshake("handshake completed without request".into())
        })?;

        let conn = WebSocketConnection::new(ws, upgrade);
        tracing::debug!(
            id = %conn.id(),
            %remote_addr,
            path = %conn.upgrade.path,
            subprotocol = ?conn.upgrade.subprotocol,
            "WebSocket upgrade complete"
        );
        Ok(conn)
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Connects to `url`, offering `subprotocols` in order.
///
/// The negotiated protocol is available via
/// [`WebSocketConnection::subprotocol`].
pub async fn connect(
    url: &str,
    subprotocols: &[String],
) -> Result<ClientConnection, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

    if !subprotocols.is_empty() {
        let value = HeaderValue::from_str(&subprotocols.join(", "))
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    let path = request.uri().path().to_string();
    let (ws, response) = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::connect_async(request),
    )
    .await
    .map_err(|_| TransportError::ConnectFailed("handshake timed out".into()))?
    .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

    let subprotocol = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let upgrade = UpgradeRequest {
        path,
        remote_addr: None,
        offered_subprotocols: subprotocols.to_vec(),
        subprotocol,
        headers: Vec::new(),
    };
    let conn = WebSocketConnection::new(ws, upgrade);
    tracing::debug!(id = %conn.id(), url, subprotocol = ?conn.subprotocol(), "connected");
    Ok(conn)
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A single WebSocket connection.
pub struct WebSocketConnection<S = TcpStream> {
    id: ConnectionId,
    upgrade: UpgradeRequest,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(ws: WebSocketStream<S>, upgrade: UpgradeRequest) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: next_connection_id(),
            upgrade,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }

    /// The negotiated sub-protocol, if any.
    pub fn subprotocol(&self) -> Option<&str> {
        self.upgrade.subprotocol.as_deref()
    }

    /// The request that produced this connection.
    pub fn upgrade_request(&self) -> &UpgradeRequest {
        &self.upgrade
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close => Message::Close(None),
    }
}

fn send_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::ConnectionClosed(e.to_string())
        }
        other => TransportError::SendFailed(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            other,
        )),
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// `Pong` frames are dropped: tungstenite already answers every ping
    /// it reads, and a second pong would only duplicate it.
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if let Frame::Pong(_) = frame {
            tracing::trace!("pong left to tungstenite");
            return Ok(());
        }
        self.sink
            .lock()
            .await
            .send(to_message(frame))
            .await
            .map_err(send_error)
    }

    async fn recv(&self) -> Result<Option<Frame>, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::Text(text.as_str().to_string())));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Frame::Binary(data.to_vec())));
                }
                Some(Ok(Message::Ping(data))) => {
                    return Ok(Some(Frame::Ping(data.to_vec())));
                }
                Some(Ok(Message::Pong(data))) => {
                    return Ok(Some(Frame::Pong(data.to_vec())));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        match self.sink.lock().await.close().await {
            Ok(()) => Ok(()),
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(send_error(e)),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_negotiate_prefers_server_order() {
        let supported = strings(&["ocpp2.0.1", "ocpp1.6"]);
        let offered = strings(&["ocpp1.6", "ocpp2.0.1"]);
        assert_eq!(
            negotiate(&supported, &offered),
            Some("ocpp2.0.1".to_string())
        );
    }

    #[test]
    fn test_negotiate_no_overlap_returns_none() {
        let supported = strings(&["ocpp1.6"]);
        let offered = strings(&["ocpp2.0.1"]);
        assert_eq!(negotiate(&supported, &offered), None);
    }

    #[test]
    fn test_last_path_segment_extracts_identity() {
        let req = UpgradeRequest {
            path: "/ocpp/CP-001/".into(),
            remote_addr: None,
            offered_subprotocols: vec![],
            subprotocol: None,
            headers: vec![("authorization".into(), "Basic abc".into())],
        };
        assert_eq!(req.last_path_segment(), Some("CP-001"));
        assert_eq!(req.header("Authorization"), Some("Basic abc"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn test_last_path_segment_root_is_none() {
        let req = UpgradeRequest {
            path: "/".into(),
            remote_addr: None,
            offered_subprotocols: vec![],
            subprotocol: None,
            headers: vec![],
        };
        assert_eq!(req.last_path_segment(), None);
    }

    #[test]
    fn test_error_response_uses_rejection_status() {
        let resp = error_response(&Rejection::unauthorized("nope"));
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.body().as_deref(), Some("nope"));
    }
}
