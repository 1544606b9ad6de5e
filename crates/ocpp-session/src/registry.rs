//! The session registry: which charge point is connected right now.
//!
//! The central system keeps one registry for all its sessions. Entries are
//! added by the server after a successful upgrade and removed by the
//! session itself when it closes.
//!
//! # Concurrency note
//!
//! Unlike most of the session engine, the registry is shared by every
//! connection task, so it sits behind a `parking_lot::RwLock`. No lock is
//! ever held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::SessionHandle;

/// Maps charge point ids to live sessions. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a session, returning the one it replaced.
    pub fn store(
        &self,
        peer_id: impl Into<String>,
        session: SessionHandle,
    ) -> Option<SessionHandle> {
        let peer_id = peer_id.into();
        tracing::info!(peer = %peer_id, session_id = %session.id(), "session registered");
        self.sessions.write().insert(peer_id, session)
    }

    /// Stores a session unless a connected one is already registered
    /// under `peer_id`, in which case the new session is handed back.
    ///
    /// A registered session that is already closing doesn't count; it is
    /// replaced.
    pub fn try_store(
        &self,
        peer_id: impl Into<String>,
        session: SessionHandle,
    ) -> Result<(), SessionHandle> {
        let peer_id = peer_id.into();
        let mut sessions = self.sessions.write();
        if sessions.get(&peer_id).is_some_and(SessionHandle::is_connected) {
            return Err(session);
        }
        tracing::info!(peer = %peer_id, session_id = %session.id(), "session registered");
        sessions.insert(peer_id, session);
        Ok(())
    }

    pub fn load(&self, peer_id: &str) -> Option<SessionHandle> {
        self.sessions.read().get(peer_id).cloned()
    }

    /// Returns `true` if a connected session is registered for `peer_id`.
    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.sessions
            .read()
            .get(peer_id)
            .is_some_and(SessionHandle::is_connected)
    }

    pub fn delete(&self, peer_id: &str) -> Option<SessionHandle> {
        let removed = self.sessions.write().remove(peer_id);
        if removed.is_some() {
            tracing::info!(peer = %peer_id, "session deregistered");
        }
        removed
    }

    /// Removes the entry for `peer_id` only if it is `session`.
    ///
    /// A session that was replaced by a newer connection with the same id
    /// must not evict its successor when it finally closes.
    pub fn delete_if_same(&self, peer_id: &str, session: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write();
        let same = sessions
            .get(peer_id)
            .is_some_and(|current| current.same_session(session));
        if same {
            sessions.remove(peer_id);
            tracing::info!(peer = %peer_id, session_id = %session.id(), "session deregistered");
        }
        same
    }

    /// Registered charge point ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of every registered session.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions.read().values().cloned().collect()
    }

    /// Shuts down every registered session and waits until all are closed.
    pub async fn shutdown_all(&self) {
        let sessions = self.sessions();
        tracing::info!(count = sessions.len(), "shutting down all sessions");
        for session in &sessions {
            session.shutdown();
        }
        for session in &sessions {
            session.closed().await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Registry bookkeeping, run against real sessions on in-memory
    //! connections.

    use super::*;
    use crate::{Role, Router, SessionContext};
    use ocpp_protocol::PermissiveSchema;
    use ocpp_transport::MemConnection;

    // -- Helpers ----------------------------------------------------------

    /// Spawns a server-role session and returns it with its peer end,
    /// which must be kept alive for the session to stay open.
    fn spawn(
        peer_id: &str,
        registry: &SessionRegistry,
    ) -> (SessionHandle, MemConnection) {
        let (conn, peer) = MemConnection::pair();
        let ctx = SessionContext::new(
            Arc::new(Router::builder().build()),
            Arc::new(PermissiveSchema::new("ocpp1.6")),
        )
        .with_registry(registry.clone());
        (
            SessionHandle::spawn(conn, peer_id, None, Role::Server, ctx),
            peer,
        )
    }

    // =====================================================================
    // store() / load()
    // =====================================================================

    #[tokio::test]
    async fn test_store_then_load_returns_same_session() {
        let registry = SessionRegistry::new();
        let (session, _peer) = spawn("CP-1", &registry);

        assert!(registry.store("CP-1", session.clone()).is_none());

        let loaded = registry.load("CP-1").expect("should be registered");
        assert!(loaded.same_session(&session));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(), vec!["CP-1".to_string()]);
    }

    #[tokio::test]
    async fn test_store_returns_replaced_session() {
        let registry = SessionRegistry::new();
        let (old, _p1) = spawn("CP-1", &registry);
        let (new, _p2) = spawn("CP-1", &registry);

        registry.store("CP-1", old.clone());
        let replaced = registry.store("CP-1", new.clone()).expect("old entry");

        assert!(replaced.same_session(&old));
        assert!(registry.load("CP-1").unwrap().same_session(&new));
    }

    #[test]
    fn test_load_unknown_returns_none() {
        let registry = SessionRegistry::new();
        assert!(registry.load("nope").is_none());
        assert!(registry.is_empty());
    }

    // =====================================================================
    // try_store()
    // =====================================================================

    #[tokio::test]
    async fn test_try_store_rejects_while_connected() {
        let registry = SessionRegistry::new();
        let (first, _p1) = spawn("CP-1", &registry);
        let (second, _p2) = spawn("CP-1", &registry);
        registry.try_store("CP-1", first.clone()).unwrap();

        let rejected = registry.try_store("CP-1", second.clone()).unwrap_err();

        assert!(rejected.same_session(&second));
        assert!(registry.load("CP-1").unwrap().same_session(&first));
    }

    #[tokio::test]
    async fn test_try_store_replaces_closing_session() {
        let registry = SessionRegistry::new();
        let (first, _p1) = spawn("CP-1", &registry);
        let (second, _p2) = spawn("CP-1", &registry);
        registry.try_store("CP-1", first.clone()).unwrap();
        first.shutdown();

        registry.try_store("CP-1", second.clone()).unwrap();

        assert!(registry.load("CP-1").unwrap().same_session(&second));
    }

    // =====================================================================
    // delete() / delete_if_same()
    // =====================================================================

    #[tokio::test]
    async fn test_delete_if_same_keeps_newer_session() {
        let registry = SessionRegistry::new();
        let (old, _p1) = spawn("CP-1", &registry);
        let (new, _p2) = spawn("CP-1", &registry);
        registry.store("CP-1", new.clone());

        assert!(!registry.delete_if_same("CP-1", &old));
        assert!(registry.load("CP-1").unwrap().same_session(&new));

        assert!(registry.delete_if_same("CP-1", &new));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_removes_itself() {
        let registry = SessionRegistry::new();
        let (session, peer) = spawn("CP-1", &registry);
        registry.store("CP-1", session.clone());

        // Peer goes away; the session notices and deregisters.
        drop(peer);
        session.closed().await;

        assert!(registry.load("CP-1").is_none());
    }

    #[tokio::test]
    async fn test_delete_returns_entry() {
        let registry = SessionRegistry::new();
        let (session, _peer) = spawn("CP-1", &registry);
        registry.store("CP-1", session);

        assert!(registry.delete("CP-1").is_some());
        assert!(registry.delete("CP-1").is_none());
    }

    // =====================================================================
    // shutdown_all()
    // =====================================================================

    #[tokio::test]
    async fn test_shutdown_all_closes_and_empties() {
        let registry = SessionRegistry::new();
        let (a, _pa) = spawn("CP-A", &registry);
        let (b, _pb) = spawn("CP-B", &registry);
        registry.store("CP-A", a.clone());
        registry.store("CP-B", b.clone());

        registry.shutdown_all().await;

        assert!(!a.is_connected());
        assert!(!b.is_connected());
        assert!(registry.is_empty());
    }
}
