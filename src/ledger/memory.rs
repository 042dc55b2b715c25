use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{AssetTransfer, Clock, Ledger, LedgerError, LedgerEvent};
use crate::{
    abiencode::types::{Address, Hash, U256},
    adjudicator::{adjudicate, AdjudicationError},
    channel::{ChannelParams, ChannelRecord, ChannelStatus, Dispute, SignedState, PARTICIPANTS},
    config::ChannelConfig,
};

/// Buffered events per subscriber before slow receivers start lagging.
const EVENT_CAPACITY: usize = 256;

/// A custody ledger kept in memory.
///
/// Each channel record sits behind its own mutex. The map lock is only held
/// to look up or insert that mutex, so operations on different channels never
/// wait on each other.
pub struct InMemoryLedger<T: AssetTransfer, C: Clock> {
    config: ChannelConfig,
    token: T,
    clock: C,
    channels: RwLock<HashMap<Hash, Arc<Mutex<ChannelRecord>>>>,
    events: broadcast::Sender<LedgerEvent>,
}

impl<T: AssetTransfer, C: Clock> core::fmt::Debug for InMemoryLedger<T, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("config", &self.config)
            .field("channels", &self.channels.read().len())
            .finish()
    }
}

impl<T: AssetTransfer, C: Clock> InMemoryLedger<T, C> {
    pub fn new(config: ChannelConfig, token: T, clock: C) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            token,
            clock,
            channels: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn entry(&self, id: Hash) -> Arc<Mutex<ChannelRecord>> {
        if let Some(entry) = self.channels.read().get(&id) {
            return entry.clone();
        }
        self.channels
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(ChannelRecord::uninitialized(id))))
            .clone()
    }

    fn existing(&self, id: Hash) -> Option<Arc<Mutex<ChannelRecord>>> {
        self.channels.read().get(&id).cloned()
    }

    /// Like [Self::existing], for operations that need an opened channel.
    /// Unknown ids are never inserted.
    fn known(&self, id: Hash) -> Result<Arc<Mutex<ChannelRecord>>, LedgerError> {
        self.existing(id).ok_or(LedgerError::InvalidChannelState {
            id,
            status: ChannelStatus::Uninitialized,
        })
    }

    fn emit(&self, event: LedgerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn check_deposits(&self, deposit_a: U256, deposit_b: U256) -> Result<U256, LedgerError> {
        let minimum = self.config.min_deposit;
        for deposit in [deposit_a, deposit_b] {
            if !deposit.is_zero() && deposit < minimum {
                return Err(LedgerError::BelowMinimumDeposit { deposit, minimum });
            }
        }
        let total = deposit_a
            .checked_add(deposit_b)
            .ok_or(LedgerError::Overflow)?;
        if total < minimum {
            return Err(LedgerError::BelowMinimumDeposit {
                deposit: total,
                minimum,
            });
        }
        Ok(total)
    }

    /// Moves both deposits into custody. If the second transfer fails the
    /// first one is paid back.
    fn lock_deposits(
        &self,
        params: &ChannelParams,
        deposits: [U256; PARTICIPANTS],
    ) -> Result<(), LedgerError> {
        self.transfer_in(params.asset, params.party_a, deposits[0])?;
        if let Err(e) = self.transfer_in(params.asset, params.party_b, deposits[1]) {
            if let Err(refund) = self.transfer_out(params.asset, params.party_a, deposits[0]) {
                error!(?refund, party = ?params.party_a, "Refunding deposit failed");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Pays both balances out of custody. If the second payout fails the
    /// first one is taken back so the channel keeps its funds.
    fn pay_out(
        &self,
        params: &ChannelParams,
        balances: [U256; PARTICIPANTS],
    ) -> Result<(), LedgerError> {
        self.transfer_out(params.asset, params.party_a, balances[0])?;
        if let Err(e) = self.transfer_out(params.asset, params.party_b, balances[1]) {
            if let Err(reclaim) = self.transfer_in(params.asset, params.party_a, balances[0]) {
                error!(?reclaim, party = ?params.party_a, "Reclaiming payout failed");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn transfer_in(
        &self,
        asset: Address,
        from: Address,
        amount: U256,
    ) -> Result<(), super::TransferError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.token.transfer_in(asset, from, amount)
    }

    fn transfer_out(
        &self,
        asset: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), super::TransferError> {
        if amount.is_zero() {
            return Ok(());
        }
        self.token.transfer_out(asset, to, amount)
    }
}

fn require_status(record: &ChannelRecord, status: ChannelStatus) -> Result<(), LedgerError> {
    if record.status != status {
        return Err(LedgerError::InvalidChannelState {
            id: record.channel_id,
            status: record.status,
        });
    }
    Ok(())
}

/// Checks that `state` is valid evidence for the current incarnation of
/// `record`: same channel, signed by both participants, distributing exactly
/// what the channel holds and not older than anything recorded.
fn check_evidence(record: &ChannelRecord, state: &SignedState) -> Result<ChannelParams, LedgerError> {
    let params = record.params.ok_or(LedgerError::InvalidChannelState {
        id: record.channel_id,
        status: record.status,
    })?;
    if state.channel_id() != record.channel_id {
        return Err(LedgerError::ChannelIdMismatch {
            expected: record.channel_id,
            got: state.channel_id(),
        });
    }
    state
        .verify(&params)
        .map_err(|signer| LedgerError::BadSignature { signer })?;
    let distributed = state.state.total();
    if distributed != Some(record.held) {
        return Err(LedgerError::BalanceMismatch {
            distributed,
            held: record.held,
        });
    }
    if state.nonce() < record.recorded_nonce {
        return Err(LedgerError::StaleNonce {
            submitted: state.nonce(),
            recorded: record.recorded_nonce,
        });
    }
    Ok(params)
}

/// Marks `record` Closed with `state` as the final outcome.
fn close(record: &mut ChannelRecord, state: SignedState) {
    record.status = ChannelStatus::Closed;
    record.deposit_a = U256::zero();
    record.deposit_b = U256::zero();
    record.held = U256::zero();
    record.recorded_nonce = state.nonce();
    record.dispute = None;
    record.last_finalized_state = Some(state);
}

impl<T: AssetTransfer, C: Clock> Ledger for InMemoryLedger<T, C> {
    fn config(&self) -> ChannelConfig {
        self.config.clone()
    }

    fn now(&self) -> u64 {
        self.clock.now()
    }

    fn open(
        &self,
        params: ChannelParams,
        deposit_a: U256,
        deposit_b: U256,
    ) -> Result<Hash, LedgerError> {
        if params.party_a == params.party_b {
            return Err(LedgerError::InvalidParticipants);
        }
        let held = self.check_deposits(deposit_a, deposit_b)?;
        let id = params.channel_id();

        let entry = self.entry(id);
        let mut record = entry.lock();
        let base_nonce = match record.status {
            ChannelStatus::Uninitialized => 0,
            ChannelStatus::Closed => record
                .last_finalized_state
                .as_ref()
                .map_or(Some(0), |s| s.nonce().checked_add(1))
                .ok_or(LedgerError::Overflow)?,
            status => return Err(LedgerError::InvalidChannelState { id, status }),
        };

        self.lock_deposits(&params, [deposit_a, deposit_b])?;

        let last_finalized_state = record.last_finalized_state.take();
        *record = ChannelRecord {
            channel_id: id,
            params: Some(params),
            status: ChannelStatus::Open,
            deposit_a,
            deposit_b,
            held,
            base_nonce,
            recorded_nonce: base_nonce,
            challenge_period: self.config.challenge_period,
            min_deposit: self.config.min_deposit,
            dispute: None,
            last_finalized_state,
        };
        info!(channel = ?id, base_nonce, %deposit_a, %deposit_b, "Channel opened");
        self.emit(LedgerEvent::Opened {
            channel_id: id,
            base_nonce,
            deposit_a,
            deposit_b,
        });
        Ok(id)
    }

    fn cooperative_close(&self, id: Hash, state: &SignedState) -> Result<(), LedgerError> {
        let entry = self.known(id)?;
        let mut record = entry.lock();
        require_status(&record, ChannelStatus::Open)?;
        let params = check_evidence(&record, state).map_err(|e| {
            warn!(channel = ?id, error = %e, "Cooperative close rejected");
            e
        })?;

        let payout = state.state.balances();
        self.pay_out(&params, payout)?;
        close(&mut record, state.clone());

        info!(channel = ?id, nonce = state.nonce(), "Channel closed cooperatively");
        self.emit(LedgerEvent::Closed {
            channel_id: id,
            nonce: state.nonce(),
            payout,
        });
        Ok(())
    }

    fn start_challenge(&self, id: Hash, state: &SignedState) -> Result<u64, LedgerError> {
        let entry = self.known(id)?;
        let mut record = entry.lock();
        require_status(&record, ChannelStatus::Open)?;
        check_evidence(&record, state).map_err(|e| {
            warn!(channel = ?id, error = %e, "Challenge rejected");
            e
        })?;

        let opened_at = self.clock.now();
        let expiry = opened_at.saturating_add(record.challenge_period);
        record.status = ChannelStatus::Challenged;
        record.recorded_nonce = state.nonce();
        record.dispute = Some(Dispute {
            submitted_state: state.clone(),
            opened_at,
            expiry,
        });

        info!(channel = ?id, nonce = state.nonce(), expiry, "Challenge started");
        self.emit(LedgerEvent::ChallengeStarted {
            channel_id: id,
            nonce: state.nonce(),
            expiry,
        });
        Ok(expiry)
    }

    fn counter_challenge(&self, id: Hash, state: &SignedState) -> Result<(), LedgerError> {
        let entry = self.known(id)?;
        let mut record = entry.lock();
        require_status(&record, ChannelStatus::Challenged)?;
        let (stored, expiry) = match &record.dispute {
            Some(d) => (d.submitted_state.clone(), d.expiry),
            None => {
                return Err(LedgerError::InvalidChannelState {
                    id,
                    status: record.status,
                })
            }
        };
        let now = self.clock.now();
        if now >= expiry {
            return Err(LedgerError::ChallengeWindowExpired { expiry, now });
        }
        check_evidence(&record, state).map_err(|e| {
            warn!(channel = ?id, error = %e, "Counter-challenge rejected");
            e
        })?;

        let winner = adjudicate(&stored, state).map_err(|e| match e {
            AdjudicationError::Conflict { nonce } => {
                error!(
                    channel = ?id,
                    nonce,
                    stored = ?stored.state.hash(),
                    submitted = ?state.state.hash(),
                    "Two different fully signed states with the same nonce"
                );
                LedgerError::AdjudicationConflict { nonce }
            }
            AdjudicationError::ChannelMismatch(expected, got) => {
                LedgerError::ChannelIdMismatch { expected, got }
            }
        })?;
        if winner.nonce() <= stored.nonce() {
            debug!(channel = ?id, nonce = state.nonce(), "Counter-challenge is not newer");
            return Err(LedgerError::StaleNonce {
                submitted: state.nonce(),
                recorded: stored.nonce(),
            });
        }

        record.recorded_nonce = state.nonce();
        if let Some(dispute) = record.dispute.as_mut() {
            dispute.submitted_state = state.clone();
        }

        info!(channel = ?id, nonce = state.nonce(), expiry, "Challenge countered");
        self.emit(LedgerEvent::CounterChallenged {
            channel_id: id,
            nonce: state.nonce(),
            expiry,
        });
        Ok(())
    }

    fn finalize_challenge(&self, id: Hash) -> Result<(), LedgerError> {
        let entry = self.known(id)?;
        let mut record = entry.lock();
        require_status(&record, ChannelStatus::Challenged)?;
        let (params, dispute) = match (record.params, record.dispute.clone()) {
            (Some(params), Some(dispute)) => (params, dispute),
            _ => {
                return Err(LedgerError::InvalidChannelState {
                    id,
                    status: record.status,
                })
            }
        };
        let now = self.clock.now();
        if now < dispute.expiry {
            return Err(LedgerError::ChallengeWindowActive {
                expiry: dispute.expiry,
                now,
            });
        }

        let state = dispute.submitted_state;
        let payout = state.state.balances();
        self.pay_out(&params, payout)?;
        let nonce = state.nonce();
        close(&mut record, state);

        info!(channel = ?id, nonce, "Challenge finalized");
        self.emit(LedgerEvent::ChallengeFinalized {
            channel_id: id,
            nonce,
            payout,
        });
        Ok(())
    }

    fn get_state(&self, id: Hash) -> ChannelRecord {
        match self.existing(id) {
            Some(entry) => entry.lock().clone(),
            None => ChannelRecord::uninitialized(id),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }
}
