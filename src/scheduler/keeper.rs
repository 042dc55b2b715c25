use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    watch,
};
use tracing::{debug, info, warn};

use super::DisputeScheduler;
use crate::{
    abiencode::types::Hash,
    channel::ChannelStatus,
    ledger::{Ledger, LedgerError, LedgerEvent},
};

/// Finalizes expired challenges. Finalization is permissionless, so the
/// keeper needs no key.
pub struct Keeper<L: Ledger> {
    ledger: Arc<L>,
    scheduler: Arc<Mutex<DisputeScheduler>>,
    interval: Duration,
    events: broadcast::Receiver<LedgerEvent>,
}

impl<L: Ledger> core::fmt::Debug for Keeper<L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Keeper")
            .field("interval", &self.interval)
            .field("tracked", &self.scheduler.lock().len())
            .finish()
    }
}

impl<L: Ledger> Keeper<L> {
    pub fn new(ledger: Arc<L>, scheduler: Arc<Mutex<DisputeScheduler>>, interval: Duration) -> Self {
        let events = ledger.subscribe();
        Self {
            ledger,
            scheduler,
            interval,
            events,
        }
    }

    pub fn scheduler(&self) -> Arc<Mutex<DisputeScheduler>> {
        self.scheduler.clone()
    }

    /// Finalizes everything that is due now. Returns the channels that got
    /// finalized by this call.
    pub fn tick(&self) -> Vec<Hash> {
        let now = self.ledger.now();
        let (due, watch) = {
            let scheduler = self.scheduler.lock();
            (
                scheduler.due_for_finalization(now),
                scheduler.due_for_watch(now),
            )
        };
        for id in watch {
            warn!(channel = ?id, "Challenge against us expires soon");
        }

        let mut finalized = Vec::new();
        for id in due {
            match self.ledger.finalize_challenge(id) {
                Ok(()) => {
                    info!(channel = ?id, "Finalized challenge");
                    self.scheduler.lock().untrack(id);
                    finalized.push(id);
                }
                Err(LedgerError::InvalidChannelState { status, .. })
                    if status != ChannelStatus::Challenged =>
                {
                    debug!(channel = ?id, ?status, "Nothing to finalize");
                    self.scheduler.lock().untrack(id);
                }
                Err(e) => warn!(channel = ?id, error = %e, "Finalization failed, will retry"),
            }
        }
        finalized
    }

    /// Rebuilds the deadlines of all registered channels from the ledger,
    /// for when events were lost.
    pub fn resync(&self) {
        let ids = self.scheduler.lock().registered();
        for id in ids {
            let record = self.ledger.get_state(id);
            let mut scheduler = self.scheduler.lock();
            match (record.status, record.challenge_expiry()) {
                (ChannelStatus::Challenged, Some(expiry)) => {
                    let local = scheduler
                        .deadline(id)
                        .map_or(false, |d| d.initiated_locally);
                    scheduler.track(id, expiry, local);
                }
                _ => {
                    scheduler.untrack(id);
                }
            }
        }
    }

    /// Polls until `shutdown` turns true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick();
                }
                event = self.events.recv() => match event {
                    Ok(event) => self.scheduler.lock().observe(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Keeper missed ledger events, resyncing");
                        self.resync();
                    }
                    Err(RecvError::Closed) => return,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Keeper shutting down");
                        return;
                    }
                }
            }
        }
    }
}
