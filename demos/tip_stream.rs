//! Walkthrough: Alice streams tips to Bob over protobuf frames, they close
//! cooperatively, reopen, and then Alice tries to cheat with an old state.
//!
//! Run with `RUST_LOG=tipchannel=debug cargo run --example tip_stream` to see
//! what the library logs along the way.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tipchannel::{
    channel::{ChannelParams, ChannelStatus, Delta},
    config::Config,
    ledger::{Clock, InMemoryLedger, InMemoryToken, Ledger, ManualClock},
    scheduler::{DisputeScheduler, Keeper},
    session::{ChannelSession, MemoryStateStore, Phase},
    sig::Signer,
    wire::{BytesBus, ProtoBufEncodingLayer, SendError},
    Address, TipClient,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
[channel]
min_deposit = "10"
challenge_period = 3600

[session]
watch_margin = 300
keeper_interval_ms = 10
"#;

/// Stands in for one TCP connection per peer.
#[derive(Debug, Clone, Default)]
struct Frames(Arc<Mutex<VecDeque<(Address, Vec<u8>)>>>);

impl BytesBus for Frames {
    fn send_to_participant(
        &self,
        sender: &Address,
        recipient: &Address,
        msg: &[u8],
    ) -> Result<(), SendError> {
        println!("  {:?} -> {:?}: {} bytes", sender, recipient, msg.len());
        self.0.lock().push_back((*recipient, msg.to_vec()));
        Ok(())
    }
}

type Wire = ProtoBufEncodingLayer<Frames>;
type DemoLedger = InMemoryLedger<Arc<InMemoryToken>, Arc<ManualClock>>;
type Session<'cl> = ChannelSession<'cl, Wire, DemoLedger, MemoryStateStore>;

fn pump<'cl>(frames: &Frames, alice: &mut Session<'cl>, bob: &mut Session<'cl>) {
    let alice_addr = alice.params().party_a;
    loop {
        let Some((recipient, frame)) = frames.0.lock().pop_front() else {
            return;
        };
        let (_, _, msg) = Wire::decode(&frame).expect("peer sent garbage");
        let session = if recipient == alice_addr {
            &mut *alice
        } else {
            &mut *bob
        };
        if let Err(e) = session.handle(msg) {
            println!("  rejected: {}", e);
        }
    }
}

macro_rules! print_bold {
    ($($arg:tt)*) => {
        print!("\x1b[1m");
        print!($($arg)*);
        println!("\x1b[0m");
    };
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_toml_str(CONFIG).expect("invalid demo config");
    let mut rng = StdRng::seed_from_u64(0);
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
    token.mint(params.asset, alice.address(), 1_000.into());
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let ledger = Arc::new(InMemoryLedger::new(
        config.channel.clone(),
        token.clone(),
        clock.clone(),
    ));
    let balances = || {
        [
            token.balance_of(params.asset, alice.address()),
            token.balance_of(params.asset, bob.address()),
        ]
    };

    print_bold!("Opening a channel funded by Alice");
    let alice_store = Arc::new(MemoryStateStore::new());
    let bob_store = Arc::new(MemoryStateStore::new());
    let mut a = alice
        .session(ledger.clone(), alice_store.clone(), params)
        .expect("Alice is a participant");
    let mut b = bob
        .session(ledger.clone(), bob_store.clone(), params)
        .expect("Bob is a participant");
    a.open(500.into(), 0.into()).expect("open failed");
    b.join().expect("join failed");
    a.sign_initial().expect("signing failed");
    b.sign_initial().expect("signing failed");
    pump(&frames, &mut a, &mut b);

    print_bold!("Streaming tips");
    for amount in [5u64, 10, 20, 1] {
        a.propose(Delta::from_a(amount.into())).expect("proposal failed");
        pump(&frames, &mut a, &mut b);
        let latest = b.last_accepted().expect("no state");
        println!("  nonce {}: {:?}", latest.nonce(), latest.state.balances());
    }

    print_bold!("Closing cooperatively");
    a.request_cooperative_close().expect("close request failed");
    pump(&frames, &mut a, &mut b);
    b.confirm_closed().expect("channel not closed");
    println!("  payouts: {:?}", balances());

    print_bold!("Reopening the same channel");
    let mut a = alice
        .session(ledger.clone(), alice_store.clone(), params)
        .expect("Alice is a participant");
    let mut b = bob
        .session(ledger.clone(), bob_store.clone(), params)
        .expect("Bob is a participant");
    a.open(400.into(), 0.into()).expect("reopen failed");
    b.join().expect("join failed");
    a.sign_initial().expect("signing failed");
    b.sign_initial().expect("signing failed");
    pump(&frames, &mut a, &mut b);
    println!(
        "  base nonce {}",
        ledger.get_state(a.channel_id()).base_nonce
    );
    for amount in [50u64, 50] {
        a.propose(Delta::from_a(amount.into())).expect("proposal failed");
        pump(&frames, &mut a, &mut b);
    }

    print_bold!("Alice challenges with an outdated state, Bob's watcher answers");
    let watcher = tokio::spawn(b.watcher().expect("channel is open").run());
    let scheduler = Arc::new(Mutex::new(DisputeScheduler::new(config.session.watch_margin)));
    scheduler.lock().register(b.channel_id());
    let keeper = Keeper::new(
        ledger.clone(),
        scheduler,
        Duration::from_millis(config.session.keeper_interval_ms),
    );
    let (stop, shutdown) = watch::channel(false);
    let keeper = tokio::spawn(keeper.run(shutdown));

    let history = a.history();
    let stale = history
        .iter()
        .rev()
        .nth(1)
        .cloned()
        .expect("need two states");
    ledger
        .start_challenge(a.channel_id(), &stale)
        .expect("challenge rejected");
    while ledger.get_state(a.channel_id()).recorded_nonce == stale.nonce() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    println!(
        "  recorded nonce is now {}",
        ledger.get_state(a.channel_id()).recorded_nonce
    );

    print_bold!("Waiting out the challenge window");
    clock.advance(config.channel.challenge_period);
    println!("  now {}", clock.now());
    while ledger.get_state(a.channel_id()).status != ChannelStatus::Closed {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    watcher.await.expect("watcher panicked");
    let _ = stop.send(true);
    keeper.await.expect("keeper panicked");

    assert_eq!(b.phase(), Phase::Closed);
    println!("  payouts: {:?}", balances());
}
