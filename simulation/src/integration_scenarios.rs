//! Integration scenarios exercising the full Qubee stack
//!
//! These runs combine:
//! - qubee-ratchet (SessionManager, handshake, hybrid ratchet)
//! - qubee-storage (in-memory, redb and encrypted stores)
//! - qubee-logging (session context around every operation)

use std::collections::HashSet;
use std::sync::Arc;

use qubee_ratchet::EngineConfig;
use qubee_storage::InMemorySessionStore;

use crate::scenarios;
use crate::simulation::{Party, SimConfig, Simulation};
use crate::types::{Direction, RejectReason, SimEvent};

async fn pair(config: SimConfig, engine: EngineConfig) -> Simulation<Arc<InMemorySessionStore>> {
    let alice = Party::new("alice", engine.clone(), Arc::new(InMemorySessionStore::new())).unwrap();
    let bob = Party::new("bob", engine, Arc::new(InMemorySessionStore::new())).unwrap();
    Simulation::establish(config, alice, bob).await.unwrap()
}

#[tokio::test]
async fn test_alice_bob_scenario() {
    let sim = scenarios::run_alice_bob_scenario(&EngineConfig::default())
        .await
        .unwrap();

    assert_eq!(sim.stats.messages_sent, 5);
    assert_eq!(sim.stats.messages_delivered, 5);
    assert!(sim.stats.max_epoch >= 2);
    assert_eq!(sim.in_flight(), 0);
}

#[tokio::test]
async fn test_reliable_channel_delivers_everything() {
    let mut sim = pair(
        SimConfig {
            ticks: 30,
            seed: Some(1),
            ..SimConfig::reliable()
        },
        EngineConfig::default(),
    )
    .await;

    sim.run().await.unwrap();

    assert!(sim.stats.messages_sent > 0);
    assert_eq!(sim.stats.messages_delivered, sim.stats.messages_sent);
    assert!(sim.violations.is_empty(), "{:?}", sim.violations);
    assert!(
        !sim.event_log
            .iter()
            .any(|event| matches!(event, SimEvent::Rejected { .. }))
    );
}

#[tokio::test]
async fn test_hostile_channel_keeps_guarantees() {
    for seed in 0..4 {
        let mut sim = pair(
            SimConfig {
                ticks: 60,
                send_probability: 0.7,
                loss_probability: 0.15,
                tamper_probability: 0.1,
                duplicate_probability: 0.1,
                reorder_probability: 0.4,
                max_delay: 6,
                seed: Some(seed),
            },
            EngineConfig::default().with_rekey_every(2),
        )
        .await;

        sim.run().await.unwrap();
        sim.sync().await.unwrap();
        assert!(sim.violations.is_empty(), "seed {}: {:?}", seed, sim.violations);

        // Every message that was neither lost nor corrupted arrived
        let lost_or_tampered: HashSet<_> = sim
            .event_log
            .iter()
            .filter_map(|event| match event {
                SimEvent::Dropped { id, .. } | SimEvent::Tampered { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        let delivered: HashSet<_> = sim
            .event_log
            .iter()
            .filter_map(|event| match event {
                SimEvent::Delivered { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        for event in &sim.event_log {
            if let SimEvent::Sent { id, .. } = event {
                assert!(
                    lost_or_tampered.contains(id) || delivered.contains(id),
                    "seed {}: message {} vanished",
                    seed,
                    id
                );
            }
        }
    }
}

#[tokio::test]
async fn test_duplicates_rejected_as_replays() {
    let mut sim = pair(
        SimConfig {
            ticks: 15,
            send_probability: 1.0,
            duplicate_probability: 1.0,
            seed: Some(5),
            ..SimConfig::reliable()
        },
        EngineConfig::default(),
    )
    .await;

    sim.run().await.unwrap();

    assert_eq!(sim.stats.duplicates_injected, sim.stats.messages_sent);
    assert_eq!(sim.stats.replays_rejected, sim.stats.duplicates_injected);
    assert_eq!(sim.stats.messages_delivered, sim.stats.messages_sent);
    assert!(sim.violations.is_empty(), "{:?}", sim.violations);
}

#[tokio::test]
async fn test_gap_beyond_window_reported() {
    let mut sim = pair(
        SimConfig::reliable(),
        EngineConfig::default().with_skipped_key_cache_limit(2),
    )
    .await;

    let mut ids = Vec::new();
    for i in 0..6u8 {
        ids.push(sim.send_message(Direction::AliceToBob, &[i]).await.unwrap());
    }

    // Five keys would have to be skipped to reach the last one
    sim.deliver_message(ids[5]).await.unwrap();
    assert_eq!(sim.stats.out_of_window, 1);
    assert_eq!(sim.stats.messages_delivered, 0);

    // The session is untouched, so in-order delivery of the rest still works
    for &id in &ids[..5] {
        sim.deliver_message(id).await.unwrap();
    }
    assert_eq!(sim.stats.messages_delivered, 5);
    assert!(sim.violations.is_empty(), "{:?}", sim.violations);
    assert!(sim.event_log.iter().any(|event| matches!(
        event,
        SimEvent::Rejected {
            reason: RejectReason::OutOfWindow,
            ..
        }
    )));
}

#[tokio::test]
async fn test_tamper_scenario() {
    let sim = scenarios::run_tamper_scenario(&EngineConfig::default(), 8)
        .await
        .unwrap();

    assert!(sim.stats.messages_tampered > 0);
    assert_eq!(sim.stats.tamper_rejected, sim.stats.messages_tampered);
    assert!(sim.stats.messages_delivered > 0);
    assert!(sim.violations.is_empty(), "{:?}", sim.violations);
}

#[tokio::test]
async fn test_restart_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let sim = scenarios::run_restart_scenario(
        SimConfig {
            ticks: 20,
            seed: Some(11),
            ..SimConfig::default()
        },
        &EngineConfig::default(),
        dir.path(),
    )
    .await
    .unwrap();

    assert!(sim.stats.messages_delivered > 0);
    assert!(sim.violations.is_empty(), "{:?}", sim.violations);
    assert!(dir.path().join("bob.redb").exists());
}

#[tokio::test]
async fn test_same_seed_same_channel() {
    let config = SimConfig {
        ticks: 25,
        seed: Some(99),
        ..SimConfig::default()
    };

    let mut first = pair(config.clone(), EngineConfig::default()).await;
    let mut second = pair(config, EngineConfig::default()).await;
    first.run().await.unwrap();
    second.run().await.unwrap();

    assert_eq!(first.stats.messages_sent, second.stats.messages_sent);
    assert_eq!(first.stats.messages_dropped, second.stats.messages_dropped);
    assert_eq!(first.stats.messages_tampered, second.stats.messages_tampered);
    assert_eq!(first.stats.duplicates_injected, second.stats.duplicates_injected);
    assert_eq!(first.stats.messages_delayed, second.stats.messages_delayed);
}

#[tokio::test]
async fn test_invalid_channel_config_rejected() {
    let alice = Party::new("alice", EngineConfig::default(), Arc::new(InMemorySessionStore::new())).unwrap();
    let bob = Party::new("bob", EngineConfig::default(), Arc::new(InMemorySessionStore::new())).unwrap();
    let config = SimConfig {
        tamper_probability: -0.1,
        ..SimConfig::default()
    };

    assert!(Simulation::establish(config, alice, bob).await.is_err());
}
