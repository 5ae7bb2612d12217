//! In-memory storage implementation
//!
//! Suitable for tests and the simulation binary. Nothing survives a process
//! restart, but a clone of the `Arc` can be handed to a fresh engine to model
//! one.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use qubee_core::PeerId;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::StorageResult;
use crate::{IdentityStore, SessionStore};

/// In-memory implementation of [`SessionStore`] and [`IdentityStore`]
///
/// Uses `DashMap` for concurrent access to per-peer blobs.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<PeerId, Vec<u8>>,
    identity: RwLock<Option<Vec<u8>>>,
    /// Total number of successful saves (for tests asserting persistence)
    saves: AtomicUsize,
}

impl InMemorySessionStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of peers with a stored session
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of successful saves since creation
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, peer: &PeerId) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.sessions.get(peer).map(|blob| blob.value().clone()))
    }

    async fn save(&self, peer: &PeerId, blob: &[u8]) -> StorageResult<()> {
        trace!(peer = %peer.short_id(), len = blob.len(), "Saving session blob");
        self.sessions.insert(peer.clone(), blob.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, peer: &PeerId) -> StorageResult<bool> {
        let removed = self.sessions.remove(peer).is_some();
        if removed {
            debug!(peer = %peer.short_id(), "Deleted session blob");
        }
        Ok(removed)
    }

    async fn peers(&self) -> StorageResult<Vec<PeerId>> {
        let mut peers: Vec<PeerId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        Ok(peers)
    }
}

#[async_trait]
impl IdentityStore for InMemorySessionStore {
    async fn load_identity(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.identity.read().await.clone())
    }

    async fn save_identity(&self, blob: &[u8]) -> StorageResult<()> {
        *self.identity.write().await = Some(blob.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let store = InMemorySessionStore::new();
        let bob = peer("bob");

        assert!(store.load(&bob).await.unwrap().is_none());

        store.save(&bob, b"v1").await.unwrap();
        store.save(&bob, b"v2").await.unwrap();
        assert_eq!(store.load(&bob).await.unwrap().unwrap(), b"v2");
        assert_eq!(store.save_count(), 2);

        assert!(store.delete(&bob).await.unwrap());
        assert!(!store.delete(&bob).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_peers_sorted() {
        let store = InMemorySessionStore::new();
        store.save(&peer("zed"), b"z").await.unwrap();
        store.save(&peer("amy"), b"a").await.unwrap();

        let peers = store.peers().await.unwrap();
        assert_eq!(peers, vec![peer("amy"), peer("zed")]);
    }

    #[tokio::test]
    async fn test_identity_roundtrip() {
        let store = InMemorySessionStore::new();
        assert!(store.load_identity().await.unwrap().is_none());

        store.save_identity(b"identity").await.unwrap();
        assert_eq!(store.load_identity().await.unwrap().unwrap(), b"identity");
    }
}
