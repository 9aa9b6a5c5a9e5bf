use crate::protocol::{Action, CallId, Outcome, TrustTier};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::oneshot;

/// One outstanding call. Dropping it without sending abandons the call.
#[derive(Debug)]
pub struct PendingCall {
    pub action: Action,
    pub tier: TrustTier,
    pub created_at: Instant,
    pub(crate) settle: oneshot::Sender<Outcome>,
}

impl PendingCall {
    /// Settles the waiting reply. Returns `false` when nobody is waiting.
    pub fn settle(self, outcome: Outcome) -> bool {
        self.settle.send(outcome).is_ok()
    }
}

/// Identifier → pending call, owned by one provider instance.
///
/// Lookup and removal happen under one lock, so of two concurrent deliveries
/// for the same identifier exactly one obtains the entry.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<CallId, PendingCall>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: CallId, call: PendingCall) {
        let previous = self.entries.lock().insert(id, call);
        debug_assert!(previous.is_none(), "call identifier reused while pending");
    }

    /// Removes and returns the entry for `id`.
    pub fn take(&self, id: &CallId) -> Option<PendingCall> {
        self.entries.lock().remove(id)
    }

    pub fn contains(&self, id: &CallId) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<CallId> {
        let mut ids: Vec<CallId> = self.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}
