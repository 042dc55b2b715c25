use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::{abiencode::types::Hash, channel::SignedState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Durable evidence: every fully signed state a participant ever held.
///
/// The newest one is the participant's only recourse in a dispute, so
/// [StateStore::persist] must not return before the state is safe.
pub trait StateStore: Send + Sync {
    fn persist(&self, state: SignedState) -> Result<(), StoreError>;

    /// The fully signed state with the highest nonce.
    fn latest(&self, channel_id: Hash) -> Option<SignedState>;

    /// All fully signed states, oldest first.
    fn history(&self, channel_id: Hash) -> Vec<SignedState>;
}

/// A [StateStore] that forgets everything when dropped.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<Hash, Vec<SignedState>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn persist(&self, state: SignedState) -> Result<(), StoreError> {
        let mut states = self.states.write();
        let history = states.entry(state.channel_id()).or_default();
        match history.binary_search_by_key(&state.nonce(), |s| s.nonce()) {
            // Re-persisting is a no-op. A different state with a known nonce
            // is kept next to the first one, both are evidence.
            Ok(pos) if history[pos] == state => {}
            Ok(pos) | Err(pos) => history.insert(pos, state),
        }
        Ok(())
    }

    fn latest(&self, channel_id: Hash) -> Option<SignedState> {
        self.states
            .read()
            .get(&channel_id)
            .and_then(|h| h.last().cloned())
    }

    fn history(&self, channel_id: Hash) -> Vec<SignedState> {
        self.states
            .read()
            .get(&channel_id)
            .cloned()
            .unwrap_or_default()
    }
}
