//! The pending-call table: correlation ids waiting for an answer.
//!
//! Each outgoing Call registers its id here and gets a oneshot receiver.
//! When the read pump sees a CallResult or CallError it removes the entry
//! and only then delivers, so an answer is delivered at most once no
//! matter how it races with a timeout or a shutdown.

use std::collections::HashMap;

use ocpp_protocol::CallError;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::SessionError;

/// What the peer answered: the CallResult payload or its CallError.
pub type CallOutcome = Result<Value, CallError>;

#[derive(Debug)]
struct PendingCall {
    action: String,
    tx: oneshot::Sender<CallOutcome>,
}

/// Correlation table for one session.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<String, PendingCall>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call and returns the receiver its answer will arrive on.
    ///
    /// If the receiver yields `Err(RecvError)`, the entry was failed by
    /// [`fail_all`](Self::fail_all): the session closed.
    ///
    /// # Errors
    /// [`SessionError::DuplicateId`] if `unique_id` is already waiting.
    pub fn register(
        &self,
        unique_id: &str,
        action: &str,
    ) -> Result<oneshot::Receiver<CallOutcome>, SessionError> {
        let mut calls = self.calls.lock();
        if calls.contains_key(unique_id) {
            return Err(SessionError::DuplicateId(unique_id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        calls.insert(
            unique_id.to_string(),
            PendingCall {
                action: action.to_string(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Delivers an answer. Returns the action of the matched call, or
    /// `None` if nothing was waiting for `unique_id`.
    pub fn complete(
        &self,
        unique_id: &str,
        outcome: CallOutcome,
    ) -> Option<String> {
        // Removed under the lock, delivered outside it.
        let entry = self.calls.lock().remove(unique_id)?;
        // The caller may have given up already; that's fine.
        let _ = entry.tx.send(outcome);
        Some(entry.action)
    }

    /// Removes an entry without delivering anything.
    pub fn cancel(&self, unique_id: &str) -> bool {
        self.calls.lock().remove(unique_id).is_some()
    }

    /// Drops every entry, waking all waiters with a closed channel.
    /// Returns how many there were.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.calls.lock().drain().collect();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}
