//! Thread-safe client registry and unauthenticated set.

use std::sync::Arc;

use dashmap::DashMap;

use crate::common::time::now_ts_ms;

use super::client::ClientRecord;

/// Mapping from client identity to its live record, plus the subset of
/// identities still pending shared-secret authentication with the timestamp
/// they were first seen.
#[derive(Default)]
pub(crate) struct Registry {
    clients: DashMap<String, Arc<ClientRecord>>,
    unauthenticated: DashMap<String, u64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning any displaced record under the same
    /// identity. The caller disposes the displaced one.
    pub fn insert(&self, record: Arc<ClientRecord>) -> Option<Arc<ClientRecord>> {
        self.clients
            .insert(record.identity().to_string(), record)
    }

    pub fn get(&self, identity: &str) -> Option<Arc<ClientRecord>> {
        self.clients.get(identity).map(|r| Arc::clone(&r))
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.clients.contains_key(identity)
    }

    /// Snapshot of live identities; order unspecified.
    pub fn identities(&self) -> Vec<String> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of live records.
    pub fn records(&self) -> Vec<Arc<ClientRecord>> {
        self.clients.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Remove the entry for `identity` only if it still holds `record`.
    /// A record displaced by a reconnect must not tear down its replacement.
    pub fn remove_if_current(&self, identity: &str, record: &Arc<ClientRecord>) -> bool {
        self.clients
            .remove_if(identity, |_, v| Arc::ptr_eq(v, record))
            .is_some()
    }

    pub fn mark_unauthenticated(&self, identity: &str) {
        self.unauthenticated
            .insert(identity.to_string(), now_ts_ms());
    }

    pub fn is_unauthenticated(&self, identity: &str) -> bool {
        self.unauthenticated.contains_key(identity)
    }

    pub fn clear_unauthenticated(&self, identity: &str) {
        self.unauthenticated.remove(identity);
    }

    /// Identities unauthenticated for longer than `grace_ms`.
    pub fn expired_unauthenticated(&self, grace_ms: u64) -> Vec<String> {
        let now = now_ts_ms();
        self.unauthenticated
            .iter()
            .filter(|e| now.saturating_sub(*e.value()) >= grace_ms)
            .map(|e| e.key().clone())
            .collect()
    }
}
