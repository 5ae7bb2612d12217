//! Pre-defined conversation scenarios
//!
//! Includes the canonical Alice/Bob exchange and runs over hostile channels.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, ensure};
use tracing::info;

use qubee_crypto::{IdentityKeyPair, StorageKey};
use qubee_ratchet::EngineConfig;
use qubee_storage::{EncryptedSessionStore, InMemorySessionStore, RedbSessionStore, RedbStoreConfig, SessionStore};

use crate::simulation::{Party, SimConfig, Simulation};
use crate::types::Direction;

/// Store type used by the in-memory scenarios
pub type MemoryStore = Arc<InMemorySessionStore>;

/// Store type used by the restart scenario, so Bob can be parked on a
/// throwaway store while his database is closed and reopened
pub type DynStore = Arc<dyn SessionStore>;

async fn in_memory_pair(config: SimConfig, engine: &EngineConfig) -> anyhow::Result<Simulation<MemoryStore>> {
    let alice = Party::new("alice", engine.clone(), Arc::new(InMemorySessionStore::new()))?;
    let bob = Party::new("bob", engine.clone(), Arc::new(InMemorySessionStore::new()))?;
    Simulation::establish(config, alice, bob).await
}

/// Run the canonical Alice/Bob exchange:
///
/// ```text
/// Alice initiates with Bob's prekey bundle, Bob accepts
/// Alice sends "hello"; Bob decrypts it and replies "hi" (Bob's first ratchet step)
/// Alice decrypts "hi", then sends m1, m2, m3 (Alice's ratchet step on m1)
/// The transport delivers m3 first, then m1 and m2
/// Every message decrypts exactly once and both roots agree after a final exchange
/// ```
pub async fn run_alice_bob_scenario(engine: &EngineConfig) -> anyhow::Result<Simulation<MemoryStore>> {
    info!("=== Running Alice/Bob Scenario ===");
    let mut sim = in_memory_pair(SimConfig::reliable(), engine).await?;

    println!("\n--- Step 1: Alice says hello ---");
    let hello = sim.send_message(Direction::AliceToBob, b"hello").await?;
    sim.deliver_message(hello).await?;
    println!("  {}", sim.summary());

    println!("\n--- Step 2: Bob replies (first ratchet step) ---");
    let hi = sim.send_message(Direction::BobToAlice, b"hi").await?;
    sim.deliver_message(hi).await?;
    println!("  {}", sim.summary());

    println!("\n--- Step 3: Alice sends m1, m2, m3 ---");
    let m1 = sim.send_message(Direction::AliceToBob, b"m1").await?;
    let m2 = sim.send_message(Direction::AliceToBob, b"m2").await?;
    let m3 = sim.send_message(Direction::AliceToBob, b"m3").await?;

    println!("\n--- Step 4: Transport delivers m3 before m1 and m2 ---");
    for id in [m3, m1, m2] {
        sim.deliver_message(id).await?;
    }
    println!("  {}", sim.summary());

    sim.sync().await?;
    ensure!(sim.stats.messages_delivered == 5, "expected 5 deliveries, got {}", sim.stats.messages_delivered);
    ensure!(sim.violations.is_empty(), "violations: {:?}", sim.violations);

    println!("\n--- Result: every message delivered once, sessions in sync ---");
    Ok(sim)
}

/// Run a random conversation over a lossy, reordering, tampering channel
pub async fn run_hostile_channel_scenario(
    config: SimConfig,
    engine: &EngineConfig,
) -> anyhow::Result<Simulation<MemoryStore>> {
    info!(
        ticks = config.ticks,
        loss = config.loss_probability,
        tamper = config.tamper_probability,
        "=== Running Hostile Channel Scenario ==="
    );
    let mut sim = in_memory_pair(config, engine).await?;

    sim.run().await?;
    sim.sync().await?;

    println!("  {}", sim.summary());
    println!("  average latency: {:.2} ticks", sim.stats.average_latency());
    Ok(sim)
}

/// Flip a bit in every message for a burst, then continue cleanly
///
/// Every tampered envelope must be rejected and leave the session usable.
pub async fn run_tamper_scenario(engine: &EngineConfig, burst: u64) -> anyhow::Result<Simulation<MemoryStore>> {
    info!(burst, "=== Running Tamper Scenario ===");
    let mut sim = in_memory_pair(
        SimConfig {
            ticks: burst,
            send_probability: 1.0,
            tamper_probability: 1.0,
            ..SimConfig::reliable()
        },
        engine,
    )
    .await?;

    println!("\n--- Phase 1: every message tampered ---");
    sim.run().await?;
    println!("  {}", sim.summary());
    ensure!(
        sim.stats.tamper_rejected == sim.stats.messages_tampered,
        "{} of {} tampered messages rejected",
        sim.stats.tamper_rejected,
        sim.stats.messages_tampered
    );

    println!("\n--- Phase 2: clean channel ---");
    sim.config.tamper_probability = 0.0;
    for _ in 0..burst {
        sim.step().await?;
    }
    sim.flush().await?;
    sim.sync().await?;
    println!("  {}", sim.summary());

    Ok(sim)
}

/// Restart Bob halfway through, reloading his sessions from an encrypted
/// redb file under `data_dir`
pub async fn run_restart_scenario(
    config: SimConfig,
    engine: &EngineConfig,
    data_dir: &Path,
) -> anyhow::Result<Simulation<DynStore>> {
    info!(dir = %data_dir.display(), "=== Running Restart Scenario ===");
    let salt = [7u8; 16];
    let open_store = |name: &str| -> anyhow::Result<DynStore> {
        let redb = RedbSessionStore::open(RedbStoreConfig {
            db_path: data_dir.join(format!("{}.redb", name)),
        })
        .with_context(|| format!("opening {} store", name))?;
        let key = StorageKey::derive(format!("{} passphrase", name).as_bytes(), &salt)?;
        let store: DynStore = Arc::new(EncryptedSessionStore::new(redb, key));
        Ok(store)
    };

    let alice = Party::new("alice", engine.clone(), open_store("alice")?)?;
    let bob_identity = Arc::new(IdentityKeyPair::generate()?);
    let bob = Party::with_identity("bob", engine.clone(), Arc::clone(&bob_identity), open_store("bob")?)?;

    let half = config.ticks / 2;
    let mut sim = Simulation::establish(config, alice, bob).await?;

    println!("\n--- Phase 1: {} ticks ---", half);
    for _ in 0..half {
        sim.step().await?;
    }
    println!("  {}", sim.summary());

    println!("\n--- Phase 2: Bob restarts ---");
    // redb refuses a second handle on the same file, so the old one closes first
    let parked = Party::with_identity(
        "bob",
        engine.clone(),
        Arc::clone(&bob_identity),
        Arc::new(InMemorySessionStore::new()) as DynStore,
    )?;
    drop(sim.replace_bob(parked));
    let reopened = Party::with_identity("bob", engine.clone(), bob_identity, open_store("bob")?)?;
    drop(sim.replace_bob(reopened));

    println!("\n--- Phase 3: remaining ticks ---");
    while sim.tick < sim.config.ticks {
        sim.step().await?;
    }
    sim.flush().await?;
    sim.sync().await?;
    println!("  {}", sim.summary());

    Ok(sim)
}
