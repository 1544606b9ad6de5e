//! In-memory connection pair.
//!
//! Two [`MemConnection`]s wired back to back through bounded channels.
//! Frames sent on one side come out of `recv` on the other, in order.
//! Useful for exercising the session engine without sockets.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::{Connection, ConnectionId, Frame, TransportError, next_connection_id};

const DEFAULT_CAPACITY: usize = 64;

/// One end of an in-memory connection pair.
#[derive(Debug)]
pub struct MemConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    rx: Mutex<mpsc::Receiver<Frame>>,
    closed: AtomicBool,
}

impl MemConnection {
    /// Creates a connected pair with the default channel capacity.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a connected pair whose channels hold at most `capacity`
    /// frames in each direction.
    ///
    /// A small capacity with a peer that never reads makes `send` block,
    /// which is how tests provoke write deadlines.
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(capacity.max(1));
        let (tx_b, rx_b) = mpsc::channel(capacity.max(1));

        let a = Self {
            id: next_connection_id(),
            tx: tx_b,
            rx: Mutex::new(rx_a),
            closed: AtomicBool::new(false),
        };
        let b = Self {
            id: next_connection_id(),
            tx: tx_a,
            rx: Mutex::new(rx_b),
            closed: AtomicBool::new(false),
        };
        (a, b)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Connection for MemConnection {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(
                "local side closed".into(),
            ));
        }
        self.tx.send(frame).await.map_err(|_| {
            TransportError::ConnectionClosed("peer dropped".into())
        })
    }

    async fn recv(&self) -> Result<Option<Frame>, TransportError> {
        if self.is_closed() {
            return Ok(None);
        }
        let frame = self.rx.lock().await.recv().await;
        match frame {
            Some(Frame::Close) | None => {
                self.closed.store(true, Ordering::Release);
                Ok(None)
            }
            Some(frame) => Ok(Some(frame)),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Best effort: the peer may already be gone.
            let _ = self.tx.try_send(Frame::Close);
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_send_recv_preserves_order() {
        let (a, b) = MemConnection::pair();

        a.send(Frame::Text("one".into())).await.unwrap();
        a.send(Frame::Ping(vec![1])).await.unwrap();
        a.send(Frame::Text("two".into())).await.unwrap();

        assert_eq!(b.recv().await.unwrap(), Some(Frame::Text("one".into())));
        assert_eq!(b.recv().await.unwrap(), Some(Frame::Ping(vec![1])));
        assert_eq!(b.recv().await.unwrap(), Some(Frame::Text("two".into())));
    }

    #[tokio::test]
    async fn test_close_makes_peer_recv_none() {
        let (a, b) = MemConnection::pair();

        a.close().await.unwrap();

        assert_eq!(b.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_after_close_returns_connection_closed() {
        let (a, _b) = MemConnection::pair();
        a.close().await.unwrap();

        let err = a.send(Frame::Text("late".into())).await.unwrap_err();

        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_dropped_peer_reports_closed() {
        let (a, b) = MemConnection::pair();
        drop(b);

        let err = a.send(Frame::Text("x".into())).await.unwrap_err();
        assert!(err.is_closed());
        assert_eq!(a.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ids_differ_between_ends() {
        let (a, b) = MemConnection::pair();
        assert_ne!(a.id(), b.id());
    }
}
