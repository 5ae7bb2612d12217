//! End-to-end conversations through `SessionManager`
//!
//! Covers establishment, out-of-order delivery, tampering, replay,
//! persistence across restarts and storage failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use qubee_core::PeerId;
use qubee_crypto::{IdentityKeyPair, StorageKey};
use qubee_ratchet::{EncryptedEnvelope, EngineConfig, RatchetError, SessionManager, SessionState};
use qubee_storage::{
    EncryptedSessionStore, IdentityStore, InMemorySessionStore, RedbSessionStore, RedbStoreConfig, SessionStore,
    StorageError, StorageResult,
};
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

struct Party<S: SessionStore> {
    id: PeerId,
    manager: SessionManager<S>,
}

fn party(name: &str, config: EngineConfig) -> Party<Arc<InMemorySessionStore>> {
    let identity = Arc::new(IdentityKeyPair::generate().unwrap());
    Party {
        id: PeerId::new(name).unwrap(),
        manager: SessionManager::new(config, identity, Arc::new(InMemorySessionStore::new())).unwrap(),
    }
}

async fn connect<A: SessionStore, B: SessionStore>(initiator: &Party<A>, responder: &Party<B>) {
    let bundle = responder.manager.generate_prekey_bundle().unwrap();
    let handshake = initiator
        .manager
        .initiate_session(&responder.id, &responder.manager.public_identity(), &bundle)
        .await
        .unwrap();
    responder
        .manager
        .accept_session(&initiator.id, &initiator.manager.public_identity(), &handshake)
        .await
        .unwrap();
}

/// Send through the wire codec, as a transport would
async fn send<A: SessionStore, B: SessionStore>(from: &Party<A>, to: &Party<B>, text: &[u8]) -> Vec<u8> {
    from.manager.encrypt_message(&to.id, text).await.unwrap().to_bytes()
}

async fn receive<A: SessionStore, B: SessionStore>(
    from: &Party<A>,
    to: &Party<B>,
    wire: &[u8],
) -> Result<Vec<u8>, RatchetError> {
    let envelope = EncryptedEnvelope::from_bytes(wire)?;
    to.manager.decrypt_message(&from.id, &envelope).await
}

/// Store whose saves can be switched off
#[derive(Default)]
struct FlakyStore {
    inner: InMemorySessionStore,
    fail_saves: AtomicBool,
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn load(&self, peer: &PeerId) -> StorageResult<Option<Vec<u8>>> {
        self.inner.load(peer).await
    }

    async fn save(&self, peer: &PeerId, blob: &[u8]) -> StorageResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Io("disk full".to_string()));
        }
        self.inner.save(peer, blob).await
    }

    async fn delete(&self, peer: &PeerId) -> StorageResult<bool> {
        self.inner.delete(peer).await
    }

    async fn peers(&self) -> StorageResult<Vec<PeerId>> {
        self.inner.peers().await
    }
}

/// Store whose saves can be made to hang, either before or after committing
#[derive(Default)]
struct StallingStore {
    inner: InMemorySessionStore,
    hang_before_commit: AtomicBool,
    hang_after_commit: AtomicBool,
}

#[async_trait]
impl SessionStore for StallingStore {
    async fn load(&self, peer: &PeerId) -> StorageResult<Option<Vec<u8>>> {
        self.inner.load(peer).await
    }

    async fn save(&self, peer: &PeerId, blob: &[u8]) -> StorageResult<()> {
        if self.hang_before_commit.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.save(peer, blob).await?;
        if self.hang_after_commit.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn delete(&self, peer: &PeerId) -> StorageResult<bool> {
        self.inner.delete(peer).await
    }

    async fn peers(&self) -> StorageResult<Vec<PeerId>> {
        self.inner.peers().await
    }
}

fn stalling_party(name: &str) -> Party<Arc<StallingStore>> {
    Party {
        id: PeerId::new(name).unwrap(),
        manager: SessionManager::new(
            EngineConfig::default(),
            Arc::new(IdentityKeyPair::generate().unwrap()),
            Arc::new(StallingStore::default()),
        )
        .unwrap(),
    }
}

// ============================================================================
// Establishment and ordering
// ============================================================================

#[tokio::test]
async fn test_alice_and_bob() {
    let alice = party("alice", EngineConfig::default());
    let bob = party("bob", EngineConfig::default());
    connect(&alice, &bob).await;

    let wire = send(&alice, &bob, b"hello").await;
    assert_eq!(receive(&alice, &bob, &wire).await.unwrap(), b"hello");

    let wire = send(&bob, &alice, b"hi").await;
    assert_eq!(receive(&bob, &alice, &wire).await.unwrap(), b"hi");

    // Three messages, the third delivered first
    let m1 = send(&alice, &bob, b"message 1").await;
    let m2 = send(&alice, &bob, b"message 2").await;
    let m3 = send(&alice, &bob, b"message 3").await;

    assert_eq!(receive(&alice, &bob, &m3).await.unwrap(), b"message 3");
    assert_eq!(bob.manager.session_info(&alice.id).await.unwrap().skipped_keys, 2);
    assert_eq!(receive(&alice, &bob, &m1).await.unwrap(), b"message 1");
    assert_eq!(receive(&alice, &bob, &m2).await.unwrap(), b"message 2");
    assert_eq!(bob.manager.session_info(&alice.id).await.unwrap().skipped_keys, 0);

    let info = alice.manager.session_info(&bob.id).await.unwrap();
    assert_eq!(info.state, SessionState::Active);
    assert_eq!(info.send_counter, 4);
}

#[tokio::test]
async fn test_reverse_order_delivery() {
    let alice = party("alice", EngineConfig::default());
    let bob = party("bob", EngineConfig::default());
    connect(&alice, &bob).await;

    let mut wires = Vec::new();
    for i in 0..20u8 {
        wires.push((i, send(&alice, &bob, &[i; 8]).await));
    }
    for (i, wire) in wires.iter().rev() {
        assert_eq!(receive(&alice, &bob, wire).await.unwrap(), vec![*i; 8]);
    }
}

#[tokio::test]
async fn test_late_message_from_previous_epoch() {
    let alice = party("alice", EngineConfig::default());
    let bob = party("bob", EngineConfig::default());
    connect(&alice, &bob).await;

    let early = send(&alice, &bob, b"epoch 0, delayed").await;
    let wire = send(&alice, &bob, b"epoch 0").await;
    receive(&alice, &bob, &wire).await.unwrap();

    let wire = send(&bob, &alice, b"reply").await;
    receive(&bob, &alice, &wire).await.unwrap();

    // Alice steps; Bob caches nothing new but still holds the key for `early`
    let wire = send(&alice, &bob, b"epoch 1").await;
    receive(&alice, &bob, &wire).await.unwrap();
    assert_eq!(bob.manager.session_info(&alice.id).await.unwrap().receive_epoch, 1);

    assert_eq!(receive(&alice, &bob, &early).await.unwrap(), b"epoch 0, delayed");
}

#[tokio::test]
async fn test_step_message_lost() {
    let alice = party("alice", EngineConfig::default());
    let bob = party("bob", EngineConfig::default());
    connect(&alice, &bob).await;

    let wire = send(&alice, &bob, b"a").await;
    receive(&alice, &bob, &wire).await.unwrap();

    // Bob's first message (which performs his step) never arrives
    let _lost = send(&bob, &alice, b"lost").await;
    let wire = send(&bob, &alice, b"second").await;
    assert_eq!(receive(&bob, &alice, &wire).await.unwrap(), b"second");
    assert_eq!(alice.manager.session_info(&bob.id).await.unwrap().skipped_keys, 1);
}

#[tokio::test]
async fn test_concurrent_sends_do_not_desync() {
    let alice = party("alice", EngineConfig::default());
    let bob = party("bob", EngineConfig::default());
    connect(&alice, &bob).await;

    let wire = send(&alice, &bob, b"start").await;
    receive(&alice, &bob, &wire).await.unwrap();
    let wire = send(&bob, &alice, b"start").await;
    receive(&bob, &alice, &wire).await.unwrap();

    // Both sides send before seeing each other's messages
    let from_alice: Vec<_> = send_batch(&alice, &bob, 3).await;
    let from_bob: Vec<_> = send_batch(&bob, &alice, 3).await;

    for wire in &from_bob {
        receive(&bob, &alice, wire).await.unwrap();
    }
    for wire in &from_alice {
        receive(&alice, &bob, wire).await.unwrap();
    }

    // And the conversation carries on
    let wire = send(&alice, &bob, b"still fine").await;
    assert_eq!(receive(&alice, &bob, &wire).await.unwrap(), b"still fine");
    let wire = send(&bob, &alice, b"yes").await;
    assert_eq!(receive(&bob, &alice, &wire).await.unwrap(), b"yes");
}

async fn send_batch<A: SessionStore, B: SessionStore>(from: &Party<A>, to: &Party<B>, n: u8) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for i in 0..n {
        out.push(send(from, to, &[i]).await);
    }
    out
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_any_bit_flip_is_rejected_and_state_unchanged() {
    let alice = party("alice", EngineConfig::default());
    let bob = party("bob", EngineConfig::default());
    connect(&alice, &bob).await;

    let envelope = alice.manager.encrypt_message(&bob.id, b"integrity").await.unwrap();
    let before = bob.manager.store().load(&alice.id).await.unwrap().unwrap();
    let saves = bob.manager.store().save_count();

    for i in 0..envelope.header.len() * 8 {
        let mut tampered = envelope.clone();
        tampered.header[i / 8] ^= 1 << (i % 8);
        assert!(
            matches!(
                bob.manager.decrypt_message(&alice.id, &tampered).await,
                Err(RatchetError::Authentication)
            ),
            "header bit {} accepted",
            i
        );
    }
    for i in 0..envelope.ciphertext.len() * 8 {
        let mut tampered = envelope.clone();
        tampered.ciphertext[i / 8] ^= 1 << (i % 8);
        assert!(
            matches!(
                bob.manager.decrypt_message(&alice.id, &tampered).await,
                Err(RatchetError::Authentication)
            ),
            "ciphertext bit {} accepted",
            i
        );
    }
    let mut tampered = envelope.clone();
    tampered.timestamp.0 ^= 1;
    assert!(matches!(
        bob.manager.decrypt_message(&alice.id, &tampered).await,
        Err(RatchetError::Authentication)
    ));

    let after = bob.manager.store().load(&alice.id).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(bob.manager.store().save_count(), saves);

    // The genuine envelope still decrypts
    assert_eq!(
        bob.manager.decrypt_message(&alice.id, &envelope).await.unwrap(),
        b"integrity"
    );
}

#[tokio::test]
async fn test_replay_rejected() {
    let alice = party("alice", EngineConfig::default());
    let bob = party("bob", EngineConfig::default());
    connect(&alice, &bob).await;

    let wire = send(&alice, &bob, b"once").await;
    receive(&alice, &bob, &wire).await.unwrap();
    assert!(matches!(
        receive(&alice, &bob, &wire).await,
        Err(RatchetError::Replay { counter: 0 })
    ));
}

#[tokio::test]
async fn test_gap_beyond_cache_is_out_of_window() {
    let config = EngineConfig::default().with_skipped_key_cache_limit(10);
    let alice = party("alice", config.clone());
    let bob = party("bob", config);
    connect(&alice, &bob).await;

    let mut last = Vec::new();
    for _ in 0..12 {
        last = send(&alice, &bob, b"x").await;
    }
    assert!(matches!(
        receive(&alice, &bob, &last).await,
        Err(RatchetError::OutOfWindow { counter: 11 })
    ));
}

#[tokio::test]
async fn test_sealed_sender_between_managers() {
    let config = EngineConfig::default().with_sealed_sender(true);
    let alice = party("alice", config.clone());
    let bob = party("bob", config);
    connect(&alice, &bob).await;

    let envelope = alice.manager.encrypt_message(&bob.id, b"it was me").await.unwrap();
    assert!(envelope.is_signed());

    let mut stripped = envelope.clone();
    stripped.signature.clear();
    assert!(matches!(
        bob.manager.decrypt_message(&alice.id, &stripped).await,
        Err(RatchetError::Authentication)
    ));
    assert_eq!(
        bob.manager.decrypt_message(&alice.id, &envelope).await.unwrap(),
        b"it was me"
    );
}

#[tokio::test]
async fn test_truncated_wire_is_invalid_envelope() {
    let alice = party("alice", EngineConfig::default());
    let bob = party("bob", EngineConfig::default());
    connect(&alice, &bob).await;

    let wire = send(&alice, &bob, b"cut").await;
    assert!(matches!(
        receive(&alice, &bob, &wire[..wire.len() - 1]).await,
        Err(RatchetError::InvalidEnvelope(_))
    ));
}

// ============================================================================
// Lifecycle and persistence
// ============================================================================

#[tokio::test]
async fn test_closed_session() {
    let alice = party("alice", EngineConfig::default());
    let bob = party("bob", EngineConfig::default());
    connect(&alice, &bob).await;

    let wire = send(&alice, &bob, b"bye").await;
    bob.manager.close_session(&alice.id).await.unwrap();

    assert!(bob.manager.store().load(&alice.id).await.unwrap().is_none());
    assert!(matches!(
        receive(&alice, &bob, &wire).await,
        Err(RatchetError::SessionClosed)
    ));
    assert!(matches!(
        bob.manager.encrypt_message(&alice.id, b"x").await,
        Err(RatchetError::SessionClosed)
    ));
    assert!(!bob.manager.has_session(&alice.id).await.unwrap());

    // A fresh handshake replaces the closed session
    let bundle = alice.manager.generate_prekey_bundle().unwrap();
    let handshake = bob
        .manager
        .initiate_session(&alice.id, &alice.manager.public_identity(), &bundle)
        .await
        .unwrap();
    alice.manager.close_session(&bob.id).await.unwrap();
    alice
        .manager
        .accept_session(&bob.id, &bob.manager.public_identity(), &handshake)
        .await
        .unwrap();
    let wire = send(&bob, &alice, b"again").await;
    assert_eq!(receive(&bob, &alice, &wire).await.unwrap(), b"again");
}

#[tokio::test]
async fn test_failed_save_leaves_session_untouched() {
    let alice = party("alice", EngineConfig::default());
    let bob = Party {
        id: PeerId::new("bob").unwrap(),
        manager: SessionManager::new(
            EngineConfig::default(),
            Arc::new(IdentityKeyPair::generate().unwrap()),
            Arc::new(FlakyStore::default()),
        )
        .unwrap(),
    };
    connect(&alice, &bob).await;

    let wire = send(&alice, &bob, b"first try").await;
    let before = bob.manager.session_info(&alice.id).await.unwrap();

    bob.manager.store().fail_saves.store(true, Ordering::SeqCst);
    assert!(matches!(
        receive(&alice, &bob, &wire).await,
        Err(RatchetError::Storage(_))
    ));
    assert!(matches!(
        bob.manager.encrypt_message(&alice.id, b"nope").await,
        Err(RatchetError::Storage(_))
    ));
    assert_eq!(bob.manager.session_info(&alice.id).await.unwrap(), before);

    // Retrying after the store recovers delivers the same message
    bob.manager.store().fail_saves.store(false, Ordering::SeqCst);
    assert_eq!(receive(&alice, &bob, &wire).await.unwrap(), b"first try");
}

#[tokio::test]
async fn test_decrypt_cancelled_after_commit_is_redelivered() {
    let alice = party("alice", EngineConfig::default());
    let bob = stalling_party("bob");
    connect(&alice, &bob).await;

    let wire = send(&alice, &bob, b"do not lose me").await;
    let envelope = EncryptedEnvelope::from_bytes(&wire).unwrap();

    bob.manager.store().hang_after_commit.store(true, Ordering::SeqCst);
    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        bob.manager.decrypt_message(&alice.id, &envelope),
    )
    .await;
    assert!(cancelled.is_err());
    bob.manager.store().hang_after_commit.store(false, Ordering::SeqCst);

    // The store already holds the advanced state
    assert_eq!(bob.manager.session_info(&alice.id).await.unwrap().receive_counter, 1);

    assert_eq!(receive(&alice, &bob, &wire).await.unwrap(), b"do not lose me");
    assert!(matches!(
        receive(&alice, &bob, &wire).await,
        Err(RatchetError::Replay { .. })
    ));

    let wire = send(&alice, &bob, b"next").await;
    assert_eq!(receive(&alice, &bob, &wire).await.unwrap(), b"next");
}

#[tokio::test]
async fn test_decrypt_cancelled_before_commit_leaves_state() {
    let alice = party("alice", EngineConfig::default());
    let bob = stalling_party("bob");
    connect(&alice, &bob).await;

    let wire = send(&alice, &bob, b"try again").await;
    let envelope = EncryptedEnvelope::from_bytes(&wire).unwrap();
    let before = bob.manager.session_info(&alice.id).await.unwrap();

    bob.manager.store().hang_before_commit.store(true, Ordering::SeqCst);
    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        bob.manager.decrypt_message(&alice.id, &envelope),
    )
    .await;
    assert!(cancelled.is_err());
    bob.manager.store().hang_before_commit.store(false, Ordering::SeqCst);

    assert_eq!(bob.manager.session_info(&alice.id).await.unwrap(), before);
    assert_eq!(receive(&alice, &bob, &wire).await.unwrap(), b"try again");
    assert!(matches!(
        receive(&alice, &bob, &wire).await,
        Err(RatchetError::Replay { .. })
    ));
}

#[tokio::test]
async fn test_cancelled_decrypt_on_redb_store_is_not_lost() {
    let dir = TempDir::new().unwrap();
    let alice = party("alice", EngineConfig::default());
    let bob = Party {
        id: PeerId::new("bob").unwrap(),
        manager: SessionManager::new(
            EngineConfig::default(),
            Arc::new(IdentityKeyPair::generate().unwrap()),
            RedbSessionStore::open(RedbStoreConfig {
                db_path: dir.path().join("bob.redb"),
            })
            .unwrap(),
        )
        .unwrap(),
    };
    connect(&alice, &bob).await;

    let wire = send(&alice, &bob, b"hello from alice").await;
    let envelope = EncryptedEnvelope::from_bytes(&wire).unwrap();

    // One poll starts the save on the blocking pool, then the call is dropped
    match tokio::time::timeout(Duration::ZERO, bob.manager.decrypt_message(&alice.id, &envelope)).await {
        Ok(delivered) => assert_eq!(delivered.unwrap(), b"hello from alice"),
        Err(_) => assert_eq!(receive(&alice, &bob, &wire).await.unwrap(), b"hello from alice"),
    }
    assert!(matches!(
        receive(&alice, &bob, &wire).await,
        Err(RatchetError::Replay { .. })
    ));
}

#[tokio::test]
async fn test_restart_with_encrypted_redb_store() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("bob.redb");
    let salt = [42u8; 16];

    let open = || {
        let redb = RedbSessionStore::open(RedbStoreConfig {
            db_path: db_path.clone(),
        })
        .unwrap();
        let key = StorageKey::derive(b"correct horse battery staple", &salt).unwrap();
        EncryptedSessionStore::new(redb, key)
    };

    let alice = party("alice", EngineConfig::default());
    let pending;
    {
        let store = open();
        let identity = IdentityKeyPair::generate().unwrap();
        store.save_identity(identity.export().as_slice()).await.unwrap();

        let bob = Party {
            id: PeerId::new("bob").unwrap(),
            manager: SessionManager::new(EngineConfig::default(), Arc::new(identity), store).unwrap(),
        };
        connect(&alice, &bob).await;

        let wire = send(&alice, &bob, b"before restart").await;
        receive(&alice, &bob, &wire).await.unwrap();
        let wire = send(&bob, &alice, b"ack").await;
        receive(&bob, &alice, &wire).await.unwrap();

        pending = send(&alice, &bob, b"sent while bob was down").await;
    }

    let store = open();
    let exported = store.load_identity().await.unwrap().unwrap();
    let identity = IdentityKeyPair::import(&exported).unwrap();
    let bob = Party {
        id: PeerId::new("bob").unwrap(),
        manager: SessionManager::new(EngineConfig::default(), Arc::new(identity), store).unwrap(),
    };

    let info = bob.manager.session_info(&alice.id).await.unwrap();
    assert_eq!(info.receive_counter, 1);
    assert_eq!(info.send_epoch, 1);

    assert_eq!(
        receive(&alice, &bob, &pending).await.unwrap(),
        b"sent while bob was down"
    );
    let wire = send(&bob, &alice, b"back online").await;
    assert_eq!(receive(&bob, &alice, &wire).await.unwrap(), b"back online");
}

#[tokio::test]
async fn test_many_peers_in_parallel() {
    let hub = Arc::new(party("hub", EngineConfig::default()));
    let mut spokes = Vec::new();
    for i in 0..8 {
        let spoke = party(&format!("spoke-{}", i), EngineConfig::default());
        connect(&spoke, &hub).await;
        spokes.push(Arc::new(spoke));
    }

    let mut tasks = Vec::new();
    for spoke in &spokes {
        let hub = hub.clone();
        let spoke = spoke.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..10u8 {
                let wire = send(&spoke, &hub, &[round]).await;
                assert_eq!(receive(&spoke, &hub, &wire).await.unwrap(), vec![round]);
                let wire = send(&hub, &spoke, &[round, round]).await;
                assert_eq!(receive(&hub, &spoke, &wire).await.unwrap(), vec![round, round]);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(hub.manager.peers().await.unwrap().len(), 8);
}
