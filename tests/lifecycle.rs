//! End to end runs of two participants talking protobuf frames to each other
//! and settling on the in-memory ledger.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use tipchannel::{
    channel::{ChannelParams, ChannelStatus, Delta},
    config::ChannelConfig,
    ledger::{InMemoryLedger, InMemoryToken, Ledger, LedgerError, ManualClock},
    scheduler::{DisputeScheduler, Keeper},
    session::{ChannelSession, MemoryStateStore, Phase},
    sig::Signer,
    wire::{BytesBus, ProtoBufEncodingLayer, SendError},
    Address, TipClient, U256,
};

const PERIOD: u64 = 100;

type Wire = ProtoBufEncodingLayer<Frames>;
type TestLedger = InMemoryLedger<Arc<InMemoryToken>, Arc<ManualClock>>;
type Session<'cl> = ChannelSession<'cl, Wire, TestLedger, MemoryStateStore>;

#[derive(Debug, Clone, Default)]
struct Frames(Arc<Mutex<VecDeque<(Address, Vec<u8>)>>>);

impl BytesBus for Frames {
    fn send_to_participant(
        &self,
        _sender: &Address,
        recipient: &Address,
        msg: &[u8],
    ) -> Result<(), SendError> {
        self.0.lock().push_back((*recipient, msg.to_vec()));
        Ok(())
    }
}

struct Setup {
    frames: Frames,
    ledger: Arc<TestLedger>,
    token: Arc<InMemoryToken>,
    clock: Arc<ManualClock>,
    alice: TipClient<Wire>,
    bob: TipClient<Wire>,
    params: ChannelParams,
}

impl Setup {
    fn new(seed: u64) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let mut rng = StdRng::seed_from_u64(seed);
        let frames = Frames::default();
        let alice = TipClient::new(Wire::new(frames.clone()), Signer::new(&mut rng));
        let bob = TipClient::new(Wire::new(frames.clone()), Signer::new(&mut rng));
        let params = ChannelParams {
            party_a: alice.address(),
            party_b: bob.address(),
            asset: rng.gen(),
            salt: rng.gen(),
        };
        let token = Arc::new(InMemoryToken::new());
        token.mint(params.asset, alice.address(), 100.into());
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = Arc::new(InMemoryLedger::new(
            ChannelConfig {
                min_deposit: 10.into(),
                challenge_period: PERIOD,
            },
            token.clone(),
            clock.clone(),
        ));
        Setup {
            frames,
            ledger,
            token,
            clock,
            alice,
            bob,
            params,
        }
    }

    /// Opens 100/0 and exchanges initial signatures.
    fn open(&self) -> (Session<'_>, Session<'_>) {
        let mut a = self
            .alice
            .session(self.ledger.clone(), Arc::new(MemoryStateStore::new()), self.params)
            .unwrap();
        let mut b = self
            .bob
            .session(self.ledger.clone(), Arc::new(MemoryStateStore::new()), self.params)
            .unwrap();
        a.open(100.into(), 0.into()).unwrap();
        b.join().unwrap();
        a.sign_initial().unwrap();
        b.sign_initial().unwrap();
        self.pump(&mut a, &mut b);
        assert_eq!(a.phase(), Phase::Active);
        assert_eq!(b.phase(), Phase::Active);
        (a, b)
    }

    /// Delivers frames until the wire is quiet.
    fn pump<'cl>(&self, a: &mut Session<'cl>, b: &mut Session<'cl>) {
        loop {
            let Some((recipient, frame)) = self.frames.0.lock().pop_front() else {
                return;
            };
            let (sender, to, msg) = Wire::decode(&frame).unwrap();
            assert_eq!(to, recipient);
            let session = if recipient == self.alice.address() {
                &mut *a
            } else {
                &mut *b
            };
            assert_ne!(sender, recipient);
            session.handle(msg).unwrap();
        }
    }

    fn tip<'cl>(&self, a: &mut Session<'cl>, b: &mut Session<'cl>, amount: u64) {
        a.propose(Delta::from_a(amount.into())).unwrap();
        self.pump(a, b);
    }

    fn balances(&self) -> [U256; 2] {
        [
            self.token.balance_of(self.params.asset, self.alice.address()),
            self.token.balance_of(self.params.asset, self.bob.address()),
        ]
    }
}

#[test]
fn cooperative_close_pays_latest_balances() {
    let s = Setup::new(1);
    let (mut a, mut b) = s.open();
    s.tip(&mut a, &mut b, 10);
    s.tip(&mut a, &mut b, 5);
    assert_eq!(b.last_accepted().unwrap().nonce(), 2);

    a.request_cooperative_close().unwrap();
    s.pump(&mut a, &mut b);
    b.confirm_closed().unwrap();

    assert_eq!(s.balances(), [85.into(), 15.into()]);
    let record = s.ledger.get_state(a.channel_id());
    assert_eq!(record.status, ChannelStatus::Closed);
    assert!(record.held.is_zero());
    assert_eq!(s.token.custody_balance(s.params.asset), U256::zero());
}

#[test]
fn unilateral_close_pays_latest_balances() {
    let s = Setup::new(2);
    let (mut a, mut b) = s.open();
    s.tip(&mut a, &mut b, 10);
    s.tip(&mut a, &mut b, 5);

    // A disappears, B closes alone.
    let expiry = b.force_close().unwrap();
    assert_eq!(expiry, s.ledger.now() + PERIOD);
    s.clock.set(expiry - 1);
    assert!(b.finalize().is_err());
    s.clock.set(expiry);
    b.finalize().unwrap();

    assert_eq!(s.balances(), [85.into(), 15.into()]);
}

#[test]
fn stale_challenge_loses_to_newer_state() {
    let s = Setup::new(3);
    let (mut a, mut b) = s.open();
    s.tip(&mut a, &mut b, 10);
    s.tip(&mut a, &mut b, 5);

    // A tries to settle at 90/10.
    let stale = a.history()[1].clone();
    let expiry = s.ledger.start_challenge(a.channel_id(), &stale).unwrap();
    s.clock.advance(PERIOD / 2);
    assert_eq!(b.force_close(), Ok(expiry));

    s.clock.set(expiry);
    s.ledger.finalize_challenge(a.channel_id()).unwrap();
    assert_eq!(s.balances(), [85.into(), 15.into()]);
}

#[test]
fn resubmitting_changes_nothing() {
    let s = Setup::new(4);
    let (mut a, mut b) = s.open();
    s.tip(&mut a, &mut b, 10);

    let latest = a.last_accepted().unwrap();
    let expiry = s.ledger.start_challenge(a.channel_id(), &latest).unwrap();
    let before = s.ledger.get_state(a.channel_id());

    s.clock.advance(1);
    assert_eq!(
        s.ledger.counter_challenge(a.channel_id(), &latest),
        Err(LedgerError::StaleNonce {
            submitted: 1,
            recorded: 1
        })
    );
    assert_eq!(s.ledger.get_state(a.channel_id()), before);
    assert_eq!(before.challenge_expiry(), Some(expiry));
}

#[test]
fn custody_matches_open_channels() {
    let s = Setup::new(5);
    let (mut a, mut b) = s.open();
    s.tip(&mut a, &mut b, 30);

    // A second channel between the same pair, funded by B from its side.
    let params = ChannelParams {
        salt: StdRng::seed_from_u64(50).gen(),
        ..s.params
    };
    s.token.mint(params.asset, s.bob.address(), 40.into());
    let second = s.ledger.open(params, 0.into(), 40.into()).unwrap();
    assert_ne!(second, a.channel_id());

    let held = s.ledger.get_state(a.channel_id()).held + s.ledger.get_state(second).held;
    assert_eq!(held, 140.into());
    assert_eq!(s.token.custody_balance(s.params.asset), held);

    a.request_cooperative_close().unwrap();
    s.pump(&mut a, &mut b);
    assert_eq!(s.token.custody_balance(s.params.asset), 40.into());
    assert_eq!(s.balances(), [70.into(), 30.into()]);
}

#[test]
fn reopened_channel_ignores_old_states() {
    let s = Setup::new(6);
    let (mut a, mut b) = s.open();
    s.tip(&mut a, &mut b, 10);
    s.tip(&mut a, &mut b, 10);
    let old = a.history()[1].clone();
    a.request_cooperative_close().unwrap();
    s.pump(&mut a, &mut b);

    let id = s.ledger.open(s.params, 80.into(), 0.into()).unwrap();
    assert_eq!(id, a.channel_id());
    let record = s.ledger.get_state(id);
    assert_eq!(record.base_nonce, 3);
    assert!(matches!(
        s.ledger.start_challenge(id, &old),
        Err(LedgerError::StaleNonce { .. }) | Err(LedgerError::BalanceMismatch { .. })
    ));
}

#[tokio::test]
async fn watcher_defends_a_passive_party() {
    let s = Setup::new(7);
    let (mut a, mut b) = s.open();
    s.tip(&mut a, &mut b, 10);
    s.tip(&mut a, &mut b, 5);

    let watcher = tokio::spawn(b.watcher().unwrap().run());
    let stale = a.history()[1].clone();
    let expiry = s.ledger.start_challenge(a.channel_id(), &stale).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while s.ledger.get_state(a.channel_id()).recorded_nonce != 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(b.phase(), Phase::Disputing);

    s.clock.set(expiry);
    s.ledger.finalize_challenge(a.channel_id()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b.phase(), Phase::Closed);
    assert_eq!(s.balances(), [85.into(), 15.into()]);
}

#[tokio::test]
async fn keeper_finalizes_after_the_window() {
    let s = Setup::new(8);
    let (mut a, mut b) = s.open();
    s.tip(&mut a, &mut b, 25);

    let scheduler = Arc::new(Mutex::new(DisputeScheduler::new(10)));
    let expiry = b.force_close().unwrap();
    scheduler.lock().track(b.channel_id(), expiry, true);
    let keeper = Keeper::new(s.ledger.clone(), scheduler.clone(), Duration::from_millis(5));
    let (stop, shutdown) = watch::channel(false);
    let handle = tokio::spawn(keeper.run(shutdown));

    s.clock.set(expiry);
    tokio::time::timeout(Duration::from_secs(5), async {
        while s.ledger.get_state(b.channel_id()).status != ChannelStatus::Closed {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    stop.send(true).unwrap();
    handle.await.unwrap();

    assert!(scheduler.lock().is_empty());
    assert_eq!(s.balances(), [75.into(), 25.into()]);
}
