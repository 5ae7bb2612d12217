//! # Qubee Simulation
//!
//! Drives two [`SessionManager`](qubee_ratchet::SessionManager)s through a
//! simulated transport that loses, delays, duplicates and corrupts envelopes,
//! and checks the engine's delivery guarantees while it runs.
//!
//! ## Architecture
//!
//! - **Types** (`types.rs`): Directions, in-flight envelopes, events, violations
//! - **Simulation** (`simulation.rs`): Discrete-time channel and delivery checks
//! - **Scenarios** (`scenarios.rs`): Pre-built runs (Alice/Bob, hostile channel, tamper, restart)
//! - **Config** (`config.rs`): TOML file combining engine, channel and logging settings
//!
//! ## Guarantees checked
//!
//! 1. A modified envelope never decrypts
//! 2. A message decrypts at most once, to exactly what was sent
//! 3. An untouched message is only refused as a replay of an accepted copy,
//!    or because it fell outside the skipped-key window
//!
//! ## Example
//!
//! ```rust,no_run
//! use qubee_ratchet::EngineConfig;
//! use qubee_simulation::{SimConfig, scenarios};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let sim = scenarios::run_hostile_channel_scenario(
//!     SimConfig { seed: Some(7), ..SimConfig::default() },
//!     &EngineConfig::default(),
//! )
//! .await?;
//! assert!(sim.violations.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod scenarios;
pub mod simulation;
pub mod types;

#[cfg(test)]
mod integration_scenarios;

// Re-export main types
pub use config::RunConfig;
pub use simulation::{Party, SimConfig, SimStats, Simulation};
pub use types::{Direction, InFlight, MessageId, RejectReason, SimEvent, Violation};
