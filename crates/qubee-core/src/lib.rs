//! # Qubee Core
//!
//! Identifiers and small shared types for the Qubee session engine.
//!
//! ## Key Types
//!
//! - [`PeerId`]: Opaque identifier the transport layer uses for a remote peer
//! - [`SessionId`]: Unique identifier for one pairwise ratchet session
//! - [`Timestamp`]: Unix-millisecond timestamps used in envelopes and key records

pub mod error;
pub mod identity;
pub mod time;

// Re-export main types
pub use error::*;
pub use identity::*;
pub use time::*;
