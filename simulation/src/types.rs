//! Core data structures for the conversation simulation

use std::fmt;

use qubee_ratchet::RatchetError;

/// Identifier for a simulated message, assigned in send order
pub type MessageId = u64;

/// Which way a message travels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    AliceToBob,
    BobToAlice,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::AliceToBob, Direction::BobToAlice];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::AliceToBob => write!(f, "alice->bob"),
            Direction::BobToAlice => write!(f, "bob->alice"),
        }
    }
}

/// A wire envelope travelling through the simulated channel
#[derive(Debug, Clone)]
pub struct InFlight {
    pub id: MessageId,
    pub direction: Direction,
    pub wire: Vec<u8>,
    /// Tick at which the channel hands it to the receiver
    pub deliver_at: u64,
    /// The wire bytes were modified in transit
    pub tampered: bool,
    /// This copy is a duplicate injected by the channel
    pub duplicate: bool,
}

/// Why the receiver refused a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Authentication,
    Replay,
    OutOfWindow,
    Malformed,
    Other(String),
}

impl From<&RatchetError> for RejectReason {
    fn from(err: &RatchetError) -> Self {
        match err {
            RatchetError::Authentication => RejectReason::Authentication,
            RatchetError::Replay { .. } => RejectReason::Replay,
            RatchetError::OutOfWindow { .. } => RejectReason::OutOfWindow,
            RatchetError::InvalidEnvelope(_) => RejectReason::Malformed,
            other => RejectReason::Other(other.to_string()),
        }
    }
}

/// Everything that happens on the channel, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Sent {
        tick: u64,
        id: MessageId,
        direction: Direction,
        epoch: u32,
    },
    Dropped {
        tick: u64,
        id: MessageId,
    },
    Tampered {
        tick: u64,
        id: MessageId,
    },
    Duplicated {
        tick: u64,
        id: MessageId,
    },
    Delivered {
        tick: u64,
        id: MessageId,
        latency: u64,
    },
    Rejected {
        tick: u64,
        id: MessageId,
        reason: RejectReason,
    },
}

/// A broken engine guarantee observed during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A modified envelope decrypted
    TamperAccepted(MessageId),
    /// A message decrypted more than once
    DoubleDelivery(MessageId),
    /// Decryption returned something other than what was sent
    WrongPlaintext(MessageId),
    /// An untouched message inside the window was refused
    UnexpectedRejection(MessageId, RejectReason),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::TamperAccepted(id) => write!(f, "tampered message {} was accepted", id),
            Violation::DoubleDelivery(id) => write!(f, "message {} decrypted twice", id),
            Violation::WrongPlaintext(id) => write!(f, "message {} decrypted to the wrong plaintext", id),
            Violation::UnexpectedRejection(id, reason) => {
                write!(f, "message {} unexpectedly rejected: {:?}", id, reason)
            }
        }
    }
}
