//! Challenge deadline bookkeeping.
//!
//! The scheduler has no authority: it only tells which channels are due.
//! Finalization still goes through the ledger, see [Keeper].

mod keeper;

pub use keeper::Keeper;

use std::collections::{HashMap, HashSet};

use crate::{abiencode::types::Hash, ledger::LedgerEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Deadline {
    pub expiry: u64,
    /// We started the challenge, so there is nothing to defend.
    pub initiated_locally: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DisputeScheduler {
    /// Seconds before a foreign challenge expires at which it is reported by
    /// [DisputeScheduler::due_for_watch].
    watch_margin: u64,
    /// Channels we have a stake in.
    registered: HashSet<Hash>,
    deadlines: HashMap<Hash, Deadline>,
}

impl DisputeScheduler {
    pub fn new(watch_margin: u64) -> Self {
        Self {
            watch_margin,
            ..Default::default()
        }
    }

    /// Start following challenges on `id` seen through [Self::observe].
    pub fn register(&mut self, id: Hash) {
        self.registered.insert(id);
    }

    pub fn registered(&self) -> Vec<Hash> {
        self.registered.iter().copied().collect()
    }

    pub fn unregister(&mut self, id: Hash) {
        self.registered.remove(&id);
        self.deadlines.remove(&id);
    }

    /// Records a challenge directly, e.g. right after our own
    /// `start_challenge` returned its expiry.
    pub fn track(&mut self, id: Hash, expiry: u64, initiated_locally: bool) {
        self.registered.insert(id);
        self.deadlines.insert(
            id,
            Deadline {
                expiry,
                initiated_locally,
            },
        );
    }

    pub fn untrack(&mut self, id: Hash) -> Option<Deadline> {
        self.deadlines.remove(&id)
    }

    pub fn deadline(&self, id: Hash) -> Option<Deadline> {
        self.deadlines.get(&id).copied()
    }

    /// Updates deadlines from a ledger event for a registered channel. A
    /// challenge we did not [Self::track] ourselves counts as foreign.
    pub fn observe(&mut self, event: &LedgerEvent) {
        let id = event.channel_id();
        if !self.registered.contains(&id) {
            return;
        }
        match event {
            LedgerEvent::ChallengeStarted { expiry, .. }
            | LedgerEvent::CounterChallenged { expiry, .. } => {
                self.deadlines
                    .entry(id)
                    .and_modify(|d| d.expiry = *expiry)
                    .or_insert(Deadline {
                        expiry: *expiry,
                        initiated_locally: false,
                    });
            }
            LedgerEvent::Closed { .. } | LedgerEvent::ChallengeFinalized { .. } => {
                self.deadlines.remove(&id);
            }
            LedgerEvent::Opened { .. } => {}
        }
    }

    /// Channels whose window has passed, earliest deadline first.
    pub fn due_for_finalization(&self, now: u64) -> Vec<Hash> {
        self.sorted(|d| now >= d.expiry)
    }

    /// Foreign challenges whose window closes within the watch margin.
    pub fn due_for_watch(&self, now: u64) -> Vec<Hash> {
        self.sorted(|d| {
            !d.initiated_locally && now < d.expiry && d.expiry - now <= self.watch_margin
        })
    }

    pub fn next_deadline(&self) -> Option<(Hash, u64)> {
        self.deadlines
            .iter()
            .min_by_key(|(id, d)| (d.expiry, **id))
            .map(|(id, d)| (*id, d.expiry))
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    fn sorted(&self, pred: impl Fn(&Deadline) -> bool) -> Vec<Hash> {
        let mut due: Vec<_> = self
            .deadlines
            .iter()
            .filter(|(_, d)| pred(*d))
            .map(|(id, d)| (d.expiry, *id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> Hash {
        Hash([b; 32])
    }

    #[test]
    fn finalization_is_due_at_expiry() {
        let mut s = DisputeScheduler::new(10);
        s.track(id(1), 100, true);
        s.track(id(2), 50, false);
        assert!(s.due_for_finalization(49).is_empty());
        assert_eq!(s.due_for_finalization(50), [id(2)]);
        assert_eq!(s.due_for_finalization(100), [id(2), id(1)]);
        assert_eq!(s.next_deadline(), Some((id(2), 50)));
    }

    #[test]
    fn watch_only_reports_foreign_challenges_near_expiry() {
        let mut s = DisputeScheduler::new(10);
        s.track(id(1), 100, true);
        s.track(id(2), 100, false);
        assert!(s.due_for_watch(89).is_empty());
        assert_eq!(s.due_for_watch(90), [id(2)]);
        assert_eq!(s.due_for_watch(99), [id(2)]);
        assert!(s.due_for_watch(100).is_empty());
    }

    #[test]
    fn observe_follows_registered_channels_only() {
        let mut s = DisputeScheduler::new(10);
        s.register(id(1));
        s.observe(&LedgerEvent::ChallengeStarted {
            channel_id: id(1),
            nonce: 3,
            expiry: 70,
        });
        s.observe(&LedgerEvent::ChallengeStarted {
            channel_id: id(2),
            nonce: 1,
            expiry: 60,
        });
        assert_eq!(
            s.deadline(id(1)),
            Some(Deadline {
                expiry: 70,
                initiated_locally: false
            })
        );
        assert_eq!(s.deadline(id(2)), None);

        s.observe(&LedgerEvent::ChallengeFinalized {
            channel_id: id(1),
            nonce: 3,
            payout: [1.into(), 2.into()],
        });
        assert!(s.is_empty());
    }

    #[test]
    fn observe_keeps_local_flag() {
        let mut s = DisputeScheduler::new(10);
        s.track(id(1), 70, true);
        s.observe(&LedgerEvent::CounterChallenged {
            channel_id: id(1),
            nonce: 4,
            expiry: 70,
        });
        assert_eq!(s.deadline(id(1)).map(|d| d.initiated_locally), Some(true));
        assert_eq!(s.untrack(id(1)).map(|d| d.expiry), Some(70));
        assert_eq!(s.next_deadline(), None);
    }
}
