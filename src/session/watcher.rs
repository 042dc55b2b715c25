use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use super::{Phase, StateStore};
use crate::{
    abiencode::types::Hash,
    channel::{ChannelRecord, ChannelStatus},
    ledger::{Ledger, LedgerError, LedgerEvent},
};

/// Watches the ledger for challenges against one channel and answers stale
/// ones with the newest state from the store.
///
/// It shares only the store and the phase with its session, so it keeps
/// running while the session waits for a countersignature.
pub struct DisputeWatcher<L: Ledger, S: StateStore> {
    ledger: Arc<L>,
    store: Arc<S>,
    phase: Arc<RwLock<Phase>>,
    channel_id: Hash,
    /// First nonce of the watched incarnation.
    base_nonce: u64,
    events: broadcast::Receiver<LedgerEvent>,
}

impl<L: Ledger, S: StateStore> core::fmt::Debug for DisputeWatcher<L, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DisputeWatcher")
            .field("channel_id", &self.channel_id)
            .field("base_nonce", &self.base_nonce)
            .finish()
    }
}

impl<L: Ledger, S: StateStore> DisputeWatcher<L, S> {
    pub(super) fn new(
        ledger: Arc<L>,
        store: Arc<S>,
        phase: Arc<RwLock<Phase>>,
        channel_id: Hash,
        base_nonce: u64,
    ) -> Self {
        let events = ledger.subscribe();
        Self {
            ledger,
            store,
            phase,
            channel_id,
            base_nonce,
            events,
        }
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.write() = phase;
    }

    /// Runs until the channel is closed on the ledger or the ledger goes away.
    pub async fn run(mut self) {
        // A challenge may have started before we subscribed.
        if self.resync() {
            return;
        }
        loop {
            match self.events.recv().await {
                Ok(event) if event.channel_id() == self.channel_id => {
                    if self.on_event(&event) {
                        return;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(channel = ?self.channel_id, missed, "Missed ledger events, resyncing");
                    if self.resync() {
                        return;
                    }
                }
                Err(RecvError::Closed) => {
                    warn!(channel = ?self.channel_id, "Ledger event stream ended");
                    return;
                }
            }
        }
    }

    /// Handles one event for our channel. Returns true once the channel is
    /// settled.
    fn on_event(&self, event: &LedgerEvent) -> bool {
        match event {
            LedgerEvent::ChallengeStarted { nonce, expiry, .. }
            | LedgerEvent::CounterChallenged { nonce, expiry, .. } => {
                self.set_phase(Phase::Disputing);
                self.respond(*nonce, *expiry);
                false
            }
            LedgerEvent::Closed { nonce, .. } | LedgerEvent::ChallengeFinalized { nonce, .. }
                if *nonce >= self.base_nonce =>
            {
                info!(channel = ?self.channel_id, nonce, "Channel settled, watcher done");
                self.set_phase(Phase::Closed);
                true
            }
            _ => false,
        }
    }

    /// Reads the record directly instead of relying on events.
    fn resync(&self) -> bool {
        let record = self.ledger.get_state(self.channel_id);
        match (record.status, record.challenge_expiry()) {
            (ChannelStatus::Challenged, Some(expiry)) => {
                self.set_phase(Phase::Disputing);
                self.respond(record.recorded_nonce, expiry);
                false
            }
            // A Closed record from an earlier incarnation is not a reason
            // to stop.
            (ChannelStatus::Closed, _) if self.settled_this_incarnation(&record) => {
                self.set_phase(Phase::Closed);
                true
            }
            _ => false,
        }
    }

    fn settled_this_incarnation(&self, record: &ChannelRecord) -> bool {
        record
            .last_finalized_state
            .as_ref()
            .map_or(false, |s| s.nonce() >= self.base_nonce)
    }

    /// Counters a challenge at `submitted` nonce if we hold something newer
    /// and the window is still open.
    fn respond(&self, submitted: u64, expiry: u64) {
        let latest = match self.store.latest(self.channel_id) {
            Some(latest) if latest.nonce() > submitted => latest,
            _ => {
                debug!(channel = ?self.channel_id, submitted, "Challenge is up to date");
                return;
            }
        };
        let now = self.ledger.now();
        if now >= expiry {
            error!(
                channel = ?self.channel_id,
                submitted,
                ours = latest.nonce(),
                "Stale challenge noticed after the window closed"
            );
            return;
        }
        match self.ledger.counter_challenge(self.channel_id, &latest) {
            Ok(()) => info!(
                channel = ?self.channel_id,
                submitted,
                ours = latest.nonce(),
                "Countered stale challenge"
            ),
            // Someone else already submitted this or something newer.
            Err(LedgerError::StaleNonce { .. }) => {}
            Err(e) => error!(channel = ?self.channel_id, error = %e, "Counter-challenge failed"),
        }
    }
}
