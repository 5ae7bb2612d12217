//! Simulation engine for Qubee conversations
//!
//! Implements a discrete-time channel between two session managers with:
//! - Random sends in both directions
//! - Loss, bit-flip tampering, duplication and delayed (reordered) delivery
//! - A running check of the engine's delivery guarantees

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use qubee_core::PeerId;
use qubee_crypto::IdentityKeyPair;
use qubee_logging::SessionContextGuard;
use qubee_ratchet::{EncryptedEnvelope, EngineConfig, SessionManager};
use qubee_storage::SessionStore;

use crate::types::*;

/// Configuration for the simulated channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Ticks to run before the final flush
    pub ticks: u64,
    /// Probability each side sends a message on a given tick
    pub send_probability: f64,
    /// Probability a message is lost
    pub loss_probability: f64,
    /// Probability a message has one bit flipped in transit
    pub tamper_probability: f64,
    /// Probability the channel delivers a second copy later
    pub duplicate_probability: f64,
    /// Probability a message is held back for a random delay
    pub reorder_probability: f64,
    /// Longest delay, in ticks, for a held-back message
    pub max_delay: u64,
    /// Seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ticks: 100,
            send_probability: 0.5,
            loss_probability: 0.05,
            tamper_probability: 0.02,
            duplicate_probability: 0.02,
            reorder_probability: 0.2,
            max_delay: 5,
            seed: None,
        }
    }
}

impl SimConfig {
    /// A perfect channel: no loss, tampering, duplication or delay
    pub fn reliable() -> Self {
        Self {
            loss_probability: 0.0,
            tamper_probability: 0.0,
            duplicate_probability: 0.0,
            reorder_probability: 0.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, p) in [
            ("send_probability", self.send_probability),
            ("loss_probability", self.loss_probability),
            ("tamper_probability", self.tamper_probability),
            ("duplicate_probability", self.duplicate_probability),
            ("reorder_probability", self.reorder_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                anyhow::bail!("{} must be within [0, 1], got {}", name, p);
            }
        }
        Ok(())
    }
}

/// Simulation statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub messages_tampered: u64,
    pub duplicates_injected: u64,
    pub messages_delayed: u64,
    pub tamper_rejected: u64,
    pub replays_rejected: u64,
    pub out_of_window: u64,
    /// Total delivery latency (ticks from send to delivery)
    pub total_delivery_latency: u64,
    /// Highest sending epoch reached by either side
    pub max_epoch: u32,
}

impl SimStats {
    pub fn average_latency(&self) -> f64 {
        if self.messages_delivered == 0 {
            0.0
        } else {
            self.total_delivery_latency as f64 / self.messages_delivered as f64
        }
    }
}

/// One side of the conversation
pub struct Party<S: SessionStore> {
    pub id: PeerId,
    pub identity: Arc<IdentityKeyPair>,
    pub manager: SessionManager<S>,
}

impl<S: SessionStore> Party<S> {
    /// Create a party with a fresh identity
    pub fn new(name: &str, config: EngineConfig, store: S) -> anyhow::Result<Self> {
        let identity = Arc::new(IdentityKeyPair::generate()?);
        Self::with_identity(name, config, identity, store)
    }

    /// Create a party around an existing identity (for restarts)
    pub fn with_identity(
        name: &str,
        config: EngineConfig,
        identity: Arc<IdentityKeyPair>,
        store: S,
    ) -> anyhow::Result<Self> {
        let manager = SessionManager::new(config, Arc::clone(&identity), store)?;
        Ok(Self {
            id: PeerId::new(name)?,
            identity,
            manager,
        })
    }
}

/// The simulation state
pub struct Simulation<S: SessionStore> {
    /// Current simulation tick
    pub tick: u64,
    pub config: SimConfig,
    alice: Party<S>,
    bob: Party<S>,
    in_flight: Vec<InFlight>,
    plaintexts: HashMap<MessageId, Vec<u8>>,
    delivered: HashSet<MessageId>,
    next_id: MessageId,
    rng: StdRng,
    /// Global event log (all events)
    pub event_log: Vec<SimEvent>,
    pub stats: SimStats,
    pub violations: Vec<Violation>,
}

impl<S: SessionStore> Simulation<S> {
    /// Run the handshake (Alice initiates) and set up the channel
    pub async fn establish(config: SimConfig, alice: Party<S>, bob: Party<S>) -> anyhow::Result<Self> {
        config.validate()?;

        let bundle = bob.manager.generate_prekey_bundle()?;
        let handshake = alice
            .manager
            .initiate_session(&bob.id, &bob.manager.public_identity(), &bundle)
            .await
            .context("alice failed to initiate")?;
        let session_id = bob
            .manager
            .accept_session(&alice.id, &alice.manager.public_identity(), &handshake)
            .await
            .context("bob failed to accept")?;
        info!(session = %session_id.short_id(), "session established");

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            tick: 0,
            config,
            alice,
            bob,
            in_flight: Vec::new(),
            plaintexts: HashMap::new(),
            delivered: HashSet::new(),
            next_id: 0,
            rng,
            event_log: Vec::new(),
            stats: SimStats::default(),
            violations: Vec::new(),
        })
    }

    pub fn alice(&self) -> &Party<S> {
        &self.alice
    }

    pub fn bob(&self) -> &Party<S> {
        &self.bob
    }

    /// Swap in a replacement for Bob, e.g. after a simulated restart
    pub fn replace_bob(&mut self, bob: Party<S>) -> Party<S> {
        std::mem::replace(&mut self.bob, bob)
    }

    /// Messages still held by the channel
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn sides(&self, direction: Direction) -> (&Party<S>, &Party<S>) {
        match direction {
            Direction::AliceToBob => (&self.alice, &self.bob),
            Direction::BobToAlice => (&self.bob, &self.alice),
        }
    }

    /// Encrypt a message and hand it to the channel
    pub async fn send_message(&mut self, direction: Direction, payload: &[u8]) -> anyhow::Result<MessageId> {
        let id = self.next_id;
        self.next_id += 1;

        let (sender, receiver) = self.sides(direction);
        let _ctx = SessionContextGuard::new(&receiver.id, None);
        let envelope = sender.manager.encrypt_message(&receiver.id, payload).await?;
        let epoch = sender.manager.session_info(&receiver.id).await?.send_epoch;

        self.plaintexts.insert(id, payload.to_vec());
        self.stats.messages_sent += 1;
        self.stats.max_epoch = self.stats.max_epoch.max(epoch);
        self.event_log.push(SimEvent::Sent {
            tick: self.tick,
            id,
            direction,
            epoch,
        });
        trace!(id, %direction, epoch, "message sent");

        self.transmit(id, direction, envelope.to_bytes());
        Ok(id)
    }

    /// Apply the channel's faults and queue the wire bytes
    fn transmit(&mut self, id: MessageId, direction: Direction, mut wire: Vec<u8>) {
        if self.rng.random_bool(self.config.loss_probability) {
            self.stats.messages_dropped += 1;
            self.event_log.push(SimEvent::Dropped { tick: self.tick, id });
            debug!(id, "message lost");
            return;
        }

        let tampered = !wire.is_empty() && self.rng.random_bool(self.config.tamper_probability);
        if tampered {
            let bit = self.rng.random_range(0..wire.len() * 8);
            wire[bit / 8] ^= 1 << (bit % 8);
            self.stats.messages_tampered += 1;
            self.event_log.push(SimEvent::Tampered { tick: self.tick, id });
            debug!(id, bit, "bit flipped in transit");
        }

        let delay = self.random_delay();
        if self.rng.random_bool(self.config.duplicate_probability) {
            let replay_delay = delay + 1 + self.rng.random_range(0..=self.config.max_delay);
            self.in_flight.push(InFlight {
                id,
                direction,
                wire: wire.clone(),
                deliver_at: self.tick + replay_delay,
                tampered,
                duplicate: true,
            });
            self.stats.duplicates_injected += 1;
            self.event_log.push(SimEvent::Duplicated { tick: self.tick, id });
        }

        self.in_flight.push(InFlight {
            id,
            direction,
            wire,
            deliver_at: self.tick + delay,
            tampered,
            duplicate: false,
        });
    }

    fn random_delay(&mut self) -> u64 {
        if self.config.max_delay > 0 && self.rng.random_bool(self.config.reorder_probability) {
            self.stats.messages_delayed += 1;
            self.rng.random_range(1..=self.config.max_delay)
        } else {
            0
        }
    }

    /// Advance one tick: random sends, then delivery of everything due
    pub async fn step(&mut self) -> anyhow::Result<()> {
        self.tick += 1;

        for direction in Direction::BOTH {
            if self.rng.random_bool(self.config.send_probability) {
                let payload = format!("{} #{} at tick {}", direction, self.next_id, self.tick);
                self.send_message(direction, payload.as_bytes()).await?;
            }
        }

        let due = self.take_due(false);
        self.deliver_all(due).await
    }

    /// Run the configured number of ticks, then drain the channel
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!(ticks = self.config.ticks, "running simulation");
        for _ in 0..self.config.ticks {
            self.step().await?;
        }
        self.flush().await
    }

    /// Deliver everything still in flight, regardless of delay
    pub async fn flush(&mut self) -> anyhow::Result<()> {
        let due = self.take_due(true);
        self.deliver_all(due).await
    }

    fn take_due(&mut self, everything: bool) -> Vec<InFlight> {
        let tick = self.tick;
        let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|item| everything || item.deliver_at <= tick);
        self.in_flight = waiting;

        // Messages arriving on the same tick come in any order
        if self.config.reorder_probability > 0.0 {
            due.shuffle(&mut self.rng);
        } else {
            due.sort_by_key(|item| item.deliver_at);
        }
        due
    }

    /// Deliver every in-flight copy of one message right now
    ///
    /// Returns how many copies were handed over.
    pub async fn deliver_message(&mut self, id: MessageId) -> anyhow::Result<usize> {
        let (copies, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|item| item.id == id);
        self.in_flight = waiting;

        let count = copies.len();
        self.deliver_all(copies).await?;
        Ok(count)
    }

    async fn deliver_all(&mut self, items: Vec<InFlight>) -> anyhow::Result<()> {
        for item in items {
            self.deliver(item).await?;
        }
        Ok(())
    }

    /// Hand one wire envelope to its receiver and check the outcome
    async fn deliver(&mut self, item: InFlight) -> anyhow::Result<()> {
        let (sender, receiver) = self.sides(item.direction);
        let _ctx = SessionContextGuard::new(&sender.id, None);

        let result = match EncryptedEnvelope::from_bytes(&item.wire) {
            Ok(envelope) => receiver.manager.decrypt_message(&sender.id, &envelope).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(plaintext) => {
                let latency = self.sent_tick(item.id).map(|sent| self.tick - sent).unwrap_or(0);
                if item.tampered {
                    self.violations.push(Violation::TamperAccepted(item.id));
                }
                if !self.delivered.insert(item.id) {
                    self.violations.push(Violation::DoubleDelivery(item.id));
                }
                if self.plaintexts.get(&item.id) != Some(&plaintext) {
                    self.violations.push(Violation::WrongPlaintext(item.id));
                }
                self.stats.messages_delivered += 1;
                self.stats.total_delivery_latency += latency;
                self.event_log.push(SimEvent::Delivered {
                    tick: self.tick,
                    id: item.id,
                    latency,
                });
            }
            Err(e) if e.is_retryable() => {
                return Err(anyhow::Error::new(e).context(format!("storage failure delivering {}", item.id)));
            }
            Err(e) => {
                let reason = RejectReason::from(&e);
                self.record_rejection(&item, &reason);
                self.event_log.push(SimEvent::Rejected {
                    tick: self.tick,
                    id: item.id,
                    reason,
                });
            }
        }
        Ok(())
    }

    fn record_rejection(&mut self, item: &InFlight, reason: &RejectReason) {
        if item.tampered {
            self.stats.tamper_rejected += 1;
            return;
        }

        let expected = match reason {
            RejectReason::Replay => {
                self.stats.replays_rejected += 1;
                // The other copy must already have been accepted
                self.delivered.contains(&item.id)
            }
            RejectReason::OutOfWindow => {
                self.stats.out_of_window += 1;
                true
            }
            _ => false,
        };

        if !expected {
            warn!(id = item.id, ?reason, "untouched message rejected");
            self.violations
                .push(Violation::UnexpectedRejection(item.id, reason.clone()));
        }
    }

    fn sent_tick(&self, id: MessageId) -> Option<u64> {
        self.event_log.iter().find_map(|event| match event {
            SimEvent::Sent { tick, id: sent, .. } if *sent == id => Some(*tick),
            _ => None,
        })
    }

    /// Exchange one clean message each way
    ///
    /// Afterwards both sides have completed a ratchet step on each other's
    /// latest keys, whatever the channel did before.
    pub async fn sync(&mut self) -> anyhow::Result<()> {
        for direction in Direction::BOTH {
            let id = self.next_id;
            self.next_id += 1;

            let (sender, receiver) = self.sides(direction);
            let envelope = sender.manager.encrypt_message(&receiver.id, b"sync").await?;
            let plaintext = receiver.manager.decrypt_message(&sender.id, &envelope).await?;
            if plaintext != b"sync" {
                self.violations.push(Violation::WrongPlaintext(id));
            }
        }
        Ok(())
    }

    /// One-line summary of the run so far
    pub fn summary(&self) -> String {
        format!(
            "Tick {}: sent={} delivered={} dropped={} tampered={} (rejected {}) \
             duplicates={} (rejected {}) out_of_window={} in_flight={} max_epoch={} violations={}",
            self.tick,
            self.stats.messages_sent,
            self.stats.messages_delivered,
            self.stats.messages_dropped,
            self.stats.messages_tampered,
            self.stats.tamper_rejected,
            self.stats.duplicates_injected,
            self.stats.replays_rejected,
            self.stats.out_of_window,
            self.in_flight.len(),
            self.stats.max_epoch,
            self.violations.len(),
        )
    }
}

impl<S: SessionStore> std::fmt::Debug for Simulation<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("tick", &self.tick)
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
