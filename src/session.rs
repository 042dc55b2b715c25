//! Per-participant channel client.
//!
//! A [ChannelSession] is an explicit state machine: every suspension point
//! (waiting for the counterparty's signature, waiting for the ledger) is a
//! phase or a pending slot, never a hidden callback.
//!
//! ```text
//! Idle --open/join--> Opening --both initial sigs--> Active
//! Active --force_close / observed challenge--> Disputing --finalize--> Closed
//! Active --cooperative close--> Closed
//! ```

mod store;
mod watcher;

pub use store::{MemoryStateStore, StateStore, StoreError};
pub use watcher::DisputeWatcher;

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    abiencode::types::{Address, Hash, Signature, U256},
    channel::{
        counterparty, ChannelParams, ChannelStatus, Delta, PartIdx, SignedState, State,
        StateError, PARTICIPANTS,
    },
    ledger::{Ledger, LedgerError},
    messages::{
        ChannelUpdate, CloseAccepted, CloseRequest, InitialSignature, ParticipantMessage,
        UpdateAccepted, UpdateRejected,
    },
    sig,
    wire::{MessageBus, SendError},
    TipClient,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    /// Open on the ledger, initial state not yet signed by both.
    Opening,
    Active,
    /// A challenge is running on the ledger.
    Disputing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("not allowed in phase {0:?}")]
    InvalidPhase(Phase),
    #[error("{0:?} is not a participant of the channel")]
    NotAParticipant(Address),
    #[error("channel is {0:?} on the ledger")]
    ChannelNotOpen(ChannelStatus),
    #[error("proposal with nonce {0} is still pending")]
    ProposalPending(u64),
    #[error("no pending proposal")]
    NoPendingProposal,
    #[error("a cooperative close is in progress")]
    CloseInProgress,
    #[error("no cooperative close was requested")]
    NoCloseRequested,
    #[error("message is for channel {got:?}, not {expected:?}")]
    ChannelIdMismatch { expected: Hash, got: Hash },
    #[error("expected nonce {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },
    #[error("signature of participant {signer} does not verify")]
    InvalidSignature { signer: PartIdx },
    #[error("update was proposed by participant {0}, expected the counterparty")]
    WrongActor(PartIdx),
    #[error("update distributes {got:?}, channel holds {expected:?}")]
    BalanceMismatch {
        expected: Option<U256>,
        got: Option<U256>,
    },
    #[error("participant {0} would pay without having proposed the update")]
    PayerMismatch(PartIdx),
    #[error("both sides proposed nonce {nonce}")]
    UpdateCollision { nonce: u64 },
    #[error("no fully signed state yet")]
    NoState,
    #[error("invalid state transition: {0}")]
    State(#[from] StateError),
    #[error("signing failed: {0}")]
    Signing(#[from] sig::Error),
    #[error("ledger rejected the call: {0}")]
    Ledger(#[from] LedgerError),
    #[error("sending failed: {0}")]
    Send(#[from] SendError),
    #[error("persisting failed: {0}")]
    Store(#[from] StoreError),
}

/// Signatures collected for the initial state of the incarnation.
#[derive(Debug, Clone)]
struct InitialSigning {
    state: State,
    sigs: [Option<Signature>; PARTICIPANTS],
}

/// One participant's view of a channel.
pub struct ChannelSession<'cl, B: MessageBus, L: Ledger, S: StateStore> {
    client: &'cl TipClient<B>,
    ledger: Arc<L>,
    store: Arc<S>,
    params: ChannelParams,
    part_idx: PartIdx,
    channel_id: Hash,
    /// Shared with the [DisputeWatcher], which may move it to Disputing or
    /// Closed at any time.
    phase: Arc<RwLock<Phase>>,
    initial: Option<InitialSigning>,
    /// First nonce of the incarnation we joined. States below it belong to
    /// an earlier incarnation of the same channel id.
    base_nonce: Option<u64>,
    /// Our proposal waiting for the countersignature. Never evidence.
    pending: Option<ChannelUpdate>,
    /// Nonce of the state both sides agreed to settle.
    closing: Option<u64>,
}

impl<'cl, B: MessageBus, L: Ledger, S: StateStore> core::fmt::Debug
    for ChannelSession<'cl, B, L, S>
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelSession")
            .field("channel_id", &self.channel_id)
            .field("part_idx", &self.part_idx)
            .field("phase", &self.phase())
            .field("pending", &self.pending.as_ref().map(|u| u.state.nonce()))
            .field("closing", &self.closing)
            .finish()
    }
}

impl<'cl, B: MessageBus, L: Ledger, S: StateStore> ChannelSession<'cl, B, L, S> {
    pub fn new(
        client: &'cl TipClient<B>,
        ledger: Arc<L>,
        store: Arc<S>,
        params: ChannelParams,
        part_idx: PartIdx,
    ) -> Self {
        debug_assert!(part_idx < PARTICIPANTS);
        ChannelSession {
            client,
            ledger,
            store,
            channel_id: params.channel_id(),
            params,
            part_idx,
            phase: Arc::new(RwLock::new(Phase::Idle)),
            initial: None,
            base_nonce: None,
            pending: None,
            closing: None,
        }
    }

    pub fn channel_id(&self) -> Hash {
        self.channel_id
    }

    pub fn params(&self) -> ChannelParams {
        self.params
    }

    pub fn part_idx(&self) -> PartIdx {
        self.part_idx
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    fn set_phase(&self, phase: Phase) {
        let mut current = self.phase.write();
        if *current != phase {
            debug!(channel = ?self.channel_id, from = ?*current, to = ?phase, "Phase change");
            *current = phase;
        }
    }

    fn require_phase(&self, phase: Phase) -> Result<(), SessionError> {
        match self.phase() {
            p if p == phase => Ok(()),
            p => Err(SessionError::InvalidPhase(p)),
        }
    }

    fn peer_idx(&self) -> PartIdx {
        counterparty(self.part_idx)
    }

    fn peer(&self) -> Address {
        self.params.participant(self.peer_idx())
    }

    fn check_channel(&self, got: Hash) -> Result<(), SessionError> {
        if got != self.channel_id {
            return Err(SessionError::ChannelIdMismatch {
                expected: self.channel_id,
                got,
            });
        }
        Ok(())
    }

    fn send(&self, msg: ParticipantMessage) -> Result<(), SessionError> {
        Ok(self.client.send(&self.peer(), msg)?)
    }

    /// The newest fully signed state, the one we would take to the ledger.
    pub fn last_accepted(&self) -> Option<SignedState> {
        self.store.latest(self.channel_id)
    }

    /// Every fully signed state of this channel, oldest first.
    pub fn history(&self) -> Vec<SignedState> {
        self.store.history(self.channel_id)
    }

    pub fn pending(&self) -> Option<&ChannelUpdate> {
        self.pending.as_ref()
    }

    fn latest(&self) -> Result<SignedState, SessionError> {
        self.last_accepted().ok_or(SessionError::NoState)
    }

    /// Opens the channel on the ledger with our funds. Our side must be able
    /// to pay both deposits; with the single-funder policy the other one is
    /// usually zero.
    pub fn open(&mut self, deposit_a: U256, deposit_b: U256) -> Result<Hash, SessionError> {
        self.require_phase(Phase::Idle)?;
        let id = self.ledger.open(self.params, deposit_a, deposit_b)?;
        self.join()?;
        Ok(id)
    }

    /// Picks up a channel the counterparty opened.
    pub fn join(&mut self) -> Result<(), SessionError> {
        self.require_phase(Phase::Idle)?;
        let record = self.ledger.get_state(self.channel_id);
        if record.status != ChannelStatus::Open {
            return Err(SessionError::ChannelNotOpen(record.status));
        }
        let state = State::initial(
            self.channel_id,
            record.base_nonce,
            record.deposit_a,
            record.deposit_b,
        );
        debug!(channel = ?self.channel_id, nonce = state.nonce(), "Initial state built");
        self.base_nonce = Some(record.base_nonce);
        self.initial = Some(InitialSigning {
            state,
            sigs: [None; PARTICIPANTS],
        });
        self.set_phase(Phase::Opening);
        Ok(())
    }

    /// Signs the initial state and sends the signature to the counterparty.
    pub fn sign_initial(&mut self) -> Result<InitialSignature, SessionError> {
        self.require_phase(Phase::Opening)?;
        let initial = self.initial.as_mut().ok_or(SessionError::NoState)?;
        let sig = initial.state.sign(&self.client.signer)?;
        initial.sigs[self.part_idx] = Some(sig);
        let msg = InitialSignature {
            channel_id: self.channel_id,
            nonce: initial.state.nonce(),
            sig,
        };
        self.send(ParticipantMessage::InitialSignature(msg.clone()))?;
        self.try_activate()?;
        Ok(msg)
    }

    pub fn add_initial_signature(&mut self, msg: InitialSignature) -> Result<(), SessionError> {
        self.require_phase(Phase::Opening)?;
        self.check_channel(msg.channel_id)?;
        let peer_idx = self.peer_idx();
        let peer = self.peer();
        let initial = self.initial.as_mut().ok_or(SessionError::NoState)?;
        if msg.nonce != initial.state.nonce() {
            return Err(SessionError::InvalidNonce {
                expected: initial.state.nonce(),
                got: msg.nonce,
            });
        }
        if !initial.state.is_signed_by(&msg.sig, peer) {
            return Err(SessionError::InvalidSignature { signer: peer_idx });
        }
        initial.sigs[peer_idx] = Some(msg.sig);
        self.try_activate()
    }

    fn try_activate(&mut self) -> Result<(), SessionError> {
        let signed = match &self.initial {
            Some(InitialSigning {
                state,
                sigs: [Some(a), Some(b)],
            }) => SignedState {
                state: state.clone(),
                sigs: [*a, *b],
            },
            _ => return Ok(()),
        };
        self.store.persist(signed)?;
        self.initial = None;
        self.set_phase(Phase::Active);
        info!(channel = ?self.channel_id, part = self.part_idx, "Channel active");
        Ok(())
    }

    /// Proposes paying `delta.amount` from `delta.payer` to the other side.
    pub fn propose(&mut self, delta: Delta) -> Result<ChannelUpdate, SessionError> {
        self.propose_with_data(delta, Vec::new())
    }

    /// Like [Self::propose], attaching opaque `app_data` (e.g. the hash of a
    /// tip message) to the new state.
    pub fn propose_with_data(
        &mut self,
        delta: Delta,
        app_data: Vec<u8>,
    ) -> Result<ChannelUpdate, SessionError> {
        self.require_phase(Phase::Active)?;
        if let Some(pending) = &self.pending {
            return Err(SessionError::ProposalPending(pending.state.nonce()));
        }
        if self.closing.is_some() {
            return Err(SessionError::CloseInProgress);
        }
        if delta.payer != self.part_idx {
            return Err(SessionError::PayerMismatch(delta.payer));
        }
        let latest = self.latest()?;
        let mut state = latest.state.apply(delta)?;
        state.set_app_data(app_data)?;
        let sig = state.sign(&self.client.signer)?;
        let update = ChannelUpdate {
            state,
            actor_idx: self.part_idx,
            sig,
        };

        debug!(channel = ?self.channel_id, nonce = update.state.nonce(), "Proposing update");
        // Kept even if sending fails, see `resend_pending`.
        self.pending = Some(update.clone());
        self.send(ParticipantMessage::ChannelUpdate(update.clone()))?;
        Ok(update)
    }

    /// Sends the pending proposal again, e.g. after a transport error.
    pub fn resend_pending(&self) -> Result<(), SessionError> {
        let pending = self.pending.clone().ok_or(SessionError::NoPendingProposal)?;
        self.send(ParticipantMessage::ChannelUpdate(pending))
    }

    /// Gives up on the pending proposal, e.g. after the proposal timeout.
    /// The last accepted state is unchanged.
    pub fn abandon_proposal(&mut self) -> Option<ChannelUpdate> {
        let pending = self.pending.take();
        if let Some(p) = &pending {
            debug!(channel = ?self.channel_id, nonce = p.state.nonce(), "Proposal abandoned");
        }
        pending
    }

    /// Countersigns a proposal of the counterparty and replies with the
    /// signature.
    pub fn accept(&mut self, update: ChannelUpdate) -> Result<UpdateAccepted, SessionError> {
        self.require_phase(Phase::Active)?;
        if self.closing.is_some() {
            return Err(SessionError::CloseInProgress);
        }
        self.check_channel(update.state.channel_id())?;
        let peer_idx = self.peer_idx();
        if update.actor_idx != peer_idx {
            return Err(SessionError::WrongActor(update.actor_idx));
        }
        let latest = self.latest()?;

        // A retransmission of what we already countersigned: answer again.
        if update.state == latest.state {
            let reply = UpdateAccepted {
                channel_id: self.channel_id,
                nonce: latest.nonce(),
                sig: latest.sigs[self.part_idx],
            };
            self.send(ParticipantMessage::UpdateAccepted(reply.clone()))?;
            return Ok(reply);
        }

        let expected = latest.nonce().checked_add(1).ok_or(StateError::NonceOverflow)?;
        if update.state.nonce() != expected {
            return Err(SessionError::InvalidNonce {
                expected,
                got: update.state.nonce(),
            });
        }
        if !update.state.is_signed_by(&update.sig, self.peer()) {
            return Err(SessionError::InvalidSignature { signer: peer_idx });
        }
        if update.state.total() != latest.state.total() {
            return Err(SessionError::BalanceMismatch {
                expected: latest.state.total(),
                got: update.state.total(),
            });
        }
        // Only the proposer may pay. Our balance never goes down through
        // someone else's proposal.
        if update.state.balances()[self.part_idx] < latest.state.balances()[self.part_idx] {
            warn!(channel = ?self.channel_id, nonce = update.state.nonce(), "Update debits us, rejecting");
            self.reject(&update, "update debits the receiver")?;
            return Err(SessionError::PayerMismatch(self.part_idx));
        }

        if let Some(pending) = &self.pending {
            if pending.state.nonce() == update.state.nonce() {
                // Both proposed the same nonce. Party A's proposal wins.
                if self.part_idx == 0 {
                    let nonce = update.state.nonce();
                    warn!(channel = ?self.channel_id, nonce, "Update collision, rejecting theirs");
                    self.send(ParticipantMessage::UpdateRejected(UpdateRejected {
                        channel_id: self.channel_id,
                        nonce,
                        reason: "update collision".into(),
                    }))?;
                    return Err(SessionError::UpdateCollision { nonce });
                }
                warn!(channel = ?self.channel_id, nonce = pending.state.nonce(), "Update collision, dropping ours");
                self.pending = None;
            }
        }

        let sig = update.state.sign(&self.client.signer)?;
        let mut sigs = [Signature::default(); PARTICIPANTS];
        sigs[self.part_idx] = sig;
        sigs[peer_idx] = update.sig;
        let nonce = update.state.nonce();
        self.store.persist(SignedState {
            state: update.state,
            sigs,
        })?;
        debug!(channel = ?self.channel_id, nonce, "Update accepted");

        let reply = UpdateAccepted {
            channel_id: self.channel_id,
            nonce,
            sig,
        };
        self.send(ParticipantMessage::UpdateAccepted(reply.clone()))?;
        Ok(reply)
    }

    /// Declines a proposal of the counterparty.
    pub fn reject(&self, update: &ChannelUpdate, reason: &str) -> Result<(), SessionError> {
        self.check_channel(update.state.channel_id())?;
        self.send(ParticipantMessage::UpdateRejected(UpdateRejected {
            channel_id: self.channel_id,
            nonce: update.state.nonce(),
            reason: reason.into(),
        }))
    }

    /// Completes our pending proposal with the counterparty's signature.
    pub fn handle_accepted(&mut self, msg: UpdateAccepted) -> Result<SignedState, SessionError> {
        self.check_channel(msg.channel_id)?;
        let pending = self.pending.as_ref().ok_or(SessionError::NoPendingProposal)?;
        if msg.nonce != pending.state.nonce() {
            return Err(SessionError::InvalidNonce {
                expected: pending.state.nonce(),
                got: msg.nonce,
            });
        }
        let peer_idx = self.peer_idx();
        if !pending.state.is_signed_by(&msg.sig, self.peer()) {
            return Err(SessionError::InvalidSignature { signer: peer_idx });
        }
        let mut sigs = [Signature::default(); PARTICIPANTS];
        sigs[self.part_idx] = pending.sig;
        sigs[peer_idx] = msg.sig;
        let signed = SignedState {
            state: pending.state.clone(),
            sigs,
        };
        self.store.persist(signed.clone())?;
        self.pending = None;
        debug!(channel = ?self.channel_id, nonce = signed.nonce(), "Proposal countersigned");
        Ok(signed)
    }

    pub fn handle_rejected(&mut self, msg: UpdateRejected) -> Result<(), SessionError> {
        self.check_channel(msg.channel_id)?;
        match &self.pending {
            Some(p) if p.state.nonce() == msg.nonce => {
                info!(channel = ?self.channel_id, nonce = msg.nonce, reason = %msg.reason, "Proposal rejected");
                self.pending = None;
                Ok(())
            }
            _ => Err(SessionError::NoPendingProposal),
        }
    }

    /// Asks the counterparty to settle the last accepted state.
    pub fn request_cooperative_close(&mut self) -> Result<CloseRequest, SessionError> {
        self.require_phase(Phase::Active)?;
        if let Some(pending) = &self.pending {
            return Err(SessionError::ProposalPending(pending.state.nonce()));
        }
        let nonce = self.latest()?.nonce();
        let msg = CloseRequest {
            channel_id: self.channel_id,
            nonce,
        };
        self.send(ParticipantMessage::CloseRequest(msg.clone()))?;
        self.closing = Some(nonce);
        info!(channel = ?self.channel_id, nonce, "Cooperative close requested");
        Ok(msg)
    }

    /// Agrees to settle. From now on no update is proposed or accepted.
    pub fn respond_to_close(&mut self, req: CloseRequest) -> Result<CloseAccepted, SessionError> {
        self.require_phase(Phase::Active)?;
        self.check_channel(req.channel_id)?;
        let latest = self.latest()?.nonce();
        if req.nonce != latest {
            return Err(SessionError::InvalidNonce {
                expected: latest,
                got: req.nonce,
            });
        }
        // Never countersigned, so it cannot be part of the final state.
        self.abandon_proposal();
        self.closing = Some(latest);
        let msg = CloseAccepted {
            channel_id: self.channel_id,
            nonce: latest,
        };
        self.send(ParticipantMessage::CloseAccepted(msg.clone()))?;
        Ok(msg)
    }

    /// Submits the agreed state to the ledger.
    pub fn handle_close_accepted(&mut self, msg: CloseAccepted) -> Result<(), SessionError> {
        self.require_phase(Phase::Active)?;
        self.check_channel(msg.channel_id)?;
        let closing = self.closing.ok_or(SessionError::NoCloseRequested)?;
        if msg.nonce != closing {
            return Err(SessionError::InvalidNonce {
                expected: closing,
                got: msg.nonce,
            });
        }
        let latest = self.latest()?;
        self.ledger.cooperative_close(self.channel_id, &latest)?;
        self.set_phase(Phase::Closed);
        info!(channel = ?self.channel_id, nonce = latest.nonce(), "Channel settled cooperatively");
        Ok(())
    }

    /// Checks the ledger and moves to Closed if the channel is settled there.
    pub fn confirm_closed(&mut self) -> Result<(), SessionError> {
        match self.ledger.get_state(self.channel_id).status {
            ChannelStatus::Closed => {
                self.closing = None;
                self.pending = None;
                self.set_phase(Phase::Closed);
                Ok(())
            }
            status => Err(SessionError::ChannelNotOpen(status)),
        }
    }

    /// Takes the last accepted state to the ledger without the counterparty.
    /// If a challenge is already running, counters it instead when our
    /// state is newer. Returns the challenge expiry.
    pub fn force_close(&mut self) -> Result<u64, SessionError> {
        match self.phase() {
            Phase::Active | Phase::Disputing => {}
            p => return Err(SessionError::InvalidPhase(p)),
        }
        let latest = self.latest()?;
        let record = self.ledger.get_state(self.channel_id);
        let expiry = match (record.status, record.challenge_expiry()) {
            (ChannelStatus::Open, _) => self.ledger.start_challenge(self.channel_id, &latest)?,
            (ChannelStatus::Challenged, Some(expiry)) => {
                if latest.nonce() > record.recorded_nonce {
                    self.ledger.counter_challenge(self.channel_id, &latest)?;
                }
                expiry
            }
            (status, _) => return Err(SessionError::ChannelNotOpen(status)),
        };
        self.pending = None;
        self.set_phase(Phase::Disputing);
        info!(channel = ?self.channel_id, nonce = latest.nonce(), expiry, "Force close");
        Ok(expiry)
    }

    /// Finalizes the challenge once its window has passed. Succeeds as well
    /// if someone else already finalized it.
    pub fn finalize(&mut self) -> Result<(), SessionError> {
        self.require_phase(Phase::Disputing)?;
        match self.ledger.finalize_challenge(self.channel_id) {
            Ok(()) => {}
            Err(LedgerError::InvalidChannelState {
                status: ChannelStatus::Closed,
                ..
            }) => debug!(channel = ?self.channel_id, "Already finalized"),
            Err(e) => return Err(e.into()),
        }
        self.set_phase(Phase::Closed);
        Ok(())
    }

    /// The background task that defends this channel against stale
    /// challenges. It subscribes to the ledger right away, so no event after
    /// this call is missed. Only available once the session knows which
    /// incarnation it belongs to, i.e. after `open` or `join`.
    pub fn watcher(&self) -> Result<DisputeWatcher<L, S>, SessionError> {
        let base_nonce = self
            .base_nonce
            .ok_or(SessionError::InvalidPhase(self.phase()))?;
        Ok(DisputeWatcher::new(
            self.ledger.clone(),
            self.store.clone(),
            self.phase.clone(),
            self.channel_id,
            base_nonce,
        ))
    }

    /// Dispatches a message from the counterparty to the matching handler.
    pub fn handle(&mut self, msg: ParticipantMessage) -> Result<(), SessionError> {
        match msg {
            ParticipantMessage::InitialSignature(m) => self.add_initial_signature(m),
            ParticipantMessage::ChannelUpdate(m) => self.accept(m).map(drop),
            ParticipantMessage::UpdateAccepted(m) => self.handle_accepted(m).map(drop),
            ParticipantMessage::UpdateRejected(m) => self.handle_rejected(m),
            ParticipantMessage::CloseRequest(m) => self.respond_to_close(m).map(drop),
            ParticipantMessage::CloseAccepted(m) => self.handle_close_accepted(m),
        }
    }
}
