//! # Qubee Storage
//!
//! The contract the session engine uses to persist state, plus three
//! backends.
//!
//! The engine hands this crate opaque blobs: a serialized ratchet session per
//! peer and one exported identity. Backends never interpret them.
//!
//! ## Features
//!
//! - **SessionStore / IdentityStore traits**: load/save/delete by peer id
//! - **InMemorySessionStore**: `DashMap`-backed, for tests and simulation
//! - **RedbSessionStore**: on-disk tables in a single redb file
//! - **EncryptedSessionStore**: wraps any store and seals blobs at rest
//!
//! ## Example
//!
//! ```rust,ignore
//! use qubee_core::PeerId;
//! use qubee_storage::{InMemorySessionStore, SessionStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemorySessionStore::new();
//!     let peer = PeerId::new("bob").unwrap();
//!
//!     store.save(&peer, b"opaque session blob").await.unwrap();
//!     assert!(store.load(&peer).await.unwrap().is_some());
//!     store.delete(&peer).await.unwrap();
//! }
//! ```

pub mod encrypted;
pub mod error;
pub mod memory;
pub mod redb_store;

pub use encrypted::EncryptedSessionStore;
pub use error::{StorageError, StorageResult};
pub use memory::InMemorySessionStore;
pub use redb_store::{RedbSessionStore, RedbStoreConfig};

use std::sync::Arc;

use async_trait::async_trait;
use qubee_core::PeerId;

/// Persistence for serialized ratchet sessions, keyed by peer
///
/// The engine calls [`SessionStore::save`] after every state-changing
/// operation and only reports success once it returns `Ok`. An
/// implementation must therefore not acknowledge a save it has not made
/// durable (to whatever degree the backend offers).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the stored blob for a peer
    ///
    /// Returns `Ok(None)` when no session exists.
    async fn load(&self, peer: &PeerId) -> StorageResult<Option<Vec<u8>>>;

    /// Store (or replace) the blob for a peer
    ///
    /// # Errors
    ///
    /// Returns an error if the backend could not persist the blob. The
    /// caller keeps its previous in-memory state in that case.
    async fn save(&self, peer: &PeerId, blob: &[u8]) -> StorageResult<()>;

    /// Remove a peer's session
    ///
    /// Returns whether anything was removed.
    async fn delete(&self, peer: &PeerId) -> StorageResult<bool>;

    /// List every peer that has a stored session
    async fn peers(&self) -> StorageResult<Vec<PeerId>>;
}

/// Persistence for the local exported identity
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Load the exported identity, if one was saved
    async fn load_identity(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Replace the exported identity
    async fn save_identity(&self, blob: &[u8]) -> StorageResult<()>;
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    async fn load(&self, peer: &PeerId) -> StorageResult<Option<Vec<u8>>> {
        (**self).load(peer).await
    }

    async fn save(&self, peer: &PeerId, blob: &[u8]) -> StorageResult<()> {
        (**self).save(peer, blob).await
    }

    async fn delete(&self, peer: &PeerId) -> StorageResult<bool> {
        (**self).delete(peer).await
    }

    async fn peers(&self) -> StorageResult<Vec<PeerId>> {
        (**self).peers().await
    }
}

#[async_trait]
impl<S: IdentityStore + ?Sized> IdentityStore for Arc<S> {
    async fn load_identity(&self) -> StorageResult<Option<Vec<u8>>> {
        (**self).load_identity().await
    }

    async fn save_identity(&self, blob: &[u8]) -> StorageResult<()> {
        (**self).save_identity(blob).await
    }
}
