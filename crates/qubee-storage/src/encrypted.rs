//! Encrypted-at-rest wrapper for any [`SessionStore`]
//!
//! Session blobs contain root, chain and skipped message keys. This wrapper
//! seals each blob under a [`StorageKey`] before it reaches the inner store,
//! binding it to the peer id so a blob copied to another peer's slot fails
//! to open.

use async_trait::async_trait;
use qubee_core::PeerId;
use qubee_crypto::StorageKey;
use tracing::warn;

use crate::error::{StorageError, StorageResult};
use crate::{IdentityStore, SessionStore};

const IDENTITY_AAD: &[u8] = b"qubee/identity";

/// Seals blobs with a [`StorageKey`] before delegating to `S`
pub struct EncryptedSessionStore<S> {
    inner: S,
    key: StorageKey,
}

impl<S> EncryptedSessionStore<S> {
    pub fn new(inner: S, key: StorageKey) -> Self {
        Self { inner, key }
    }

    /// Access the wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn session_aad(peer: &PeerId) -> Vec<u8> {
        let mut aad = b"qubee/session/".to_vec();
        aad.extend_from_slice(peer.as_bytes());
        aad
    }

    fn open(&self, aad: &[u8], sealed: &[u8]) -> StorageResult<Vec<u8>> {
        self.key.open(aad, sealed).map_err(|e| {
            warn!(error = %e, "Stored blob failed authentication");
            StorageError::Sealing(e.to_string())
        })
    }
}

impl<S> std::fmt::Debug for EncryptedSessionStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedSessionStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: SessionStore> SessionStore for EncryptedSessionStore<S> {
    async fn load(&self, peer: &PeerId) -> StorageResult<Option<Vec<u8>>> {
        match self.inner.load(peer).await? {
            Some(sealed) => Ok(Some(self.open(&Self::session_aad(peer), &sealed)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, peer: &PeerId, blob: &[u8]) -> StorageResult<()> {
        let sealed = self.key.seal(&Self::session_aad(peer), blob)?;
        self.inner.save(peer, &sealed).await
    }

    async fn delete(&self, peer: &PeerId) -> StorageResult<bool> {
        self.inner.delete(peer).await
    }

    async fn peers(&self) -> StorageResult<Vec<PeerId>> {
        self.inner.peers().await
    }
}

#[async_trait]
impl<S: IdentityStore> IdentityStore for EncryptedSessionStore<S> {
    async fn load_identity(&self) -> StorageResult<Option<Vec<u8>>> {
        match self.inner.load_identity().await? {
            Some(sealed) => Ok(Some(self.open(IDENTITY_AAD, &sealed)?)),
            None => Ok(None),
        }
    }

    async fn save_identity(&self, blob: &[u8]) -> StorageResult<()> {
        let sealed = self.key.seal(IDENTITY_AAD, blob)?;
        self.inner.save_identity(&sealed).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use qubee_crypto::SecretKey;

    use super::*;
    use crate::InMemorySessionStore;

    fn key() -> StorageKey {
        StorageKey::from_key(SecretKey::from_bytes([42u8; 32]))
    }

    #[tokio::test]
    async fn test_roundtrip_and_ciphertext_at_rest() {
        let inner = Arc::new(InMemorySessionStore::new());
        let store = EncryptedSessionStore::new(Arc::clone(&inner), key());
        let bob = PeerId::new("bob").unwrap();

        store.save(&bob, b"plain session blob").await.unwrap();

        let raw = inner.load(&bob).await.unwrap().unwrap();
        assert!(!raw.windows(5).any(|w| w == b"plain"));
        assert_eq!(store.load(&bob).await.unwrap().unwrap(), b"plain session blob");
    }

    #[tokio::test]
    async fn test_swapped_blob_rejected() {
        let inner = Arc::new(InMemorySessionStore::new());
        let store = EncryptedSessionStore::new(Arc::clone(&inner), key());
        let bob = PeerId::new("bob").unwrap();
        let eve = PeerId::new("eve").unwrap();

        store.save(&bob, b"bob's session").await.unwrap();
        let raw = inner.load(&bob).await.unwrap().unwrap();
        inner.save(&eve, &raw).await.unwrap();

        assert!(matches!(store.load(&eve).await, Err(StorageError::Sealing(_))));
    }

    #[tokio::test]
    async fn test_identity_sealed() {
        let inner = Arc::new(InMemorySessionStore::new());
        let store = EncryptedSessionStore::new(Arc::clone(&inner), key());

        store.save_identity(b"identity export").await.unwrap();
        assert_ne!(inner.load_identity().await.unwrap().unwrap(), b"identity export");
        assert_eq!(store.load_identity().await.unwrap().unwrap(), b"identity export");
    }
}
