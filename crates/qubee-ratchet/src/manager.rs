//! Per-peer session management with persistence
//!
//! [`SessionManager`] owns the local identity, outstanding prekeys and one
//! slot per peer. Each slot sits behind its own `tokio::sync::Mutex`, so
//! operations on one peer serialize while different peers run in parallel.
//! Slots exist only while a session is live in memory; lookups that find
//! nothing leave no trace behind.
//!
//! Every state change follows the same transaction: take the live session
//! out of its slot, advance a copy, save the copy, and only then put it back.
//! A failed save restores the previous state. A cancelled save leaves the
//! slot empty so the next operation reloads whatever the store holds, which
//! keeps memory from ever lagging behind the store.
//!
//! A decrypt cancelled while its save is in flight cannot tell whether the
//! store committed. Its plaintext stays parked in the slot, and a redelivery
//! of the identical envelope that the reloaded session refuses is answered
//! from there exactly once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use qubee_core::{PeerId, SessionId};
use qubee_crypto::{IdentityKeyPair, PublicIdentity, SecureBytes};
use qubee_storage::SessionStore;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::envelope::EncryptedEnvelope;
use crate::error::{RatchetError, RatchetResult};
use crate::handshake::{HandshakeMessage, PrekeyBundle, PrekeySecrets};
use crate::session::{RatchetSession, SessionInfo, SessionState};

/// Parked plaintexts kept per peer before the oldest is dropped
const MAX_PARKED_PLAINTEXTS: usize = 16;

#[derive(Default)]
struct SlotState {
    session: Option<RatchetSession>,
    /// Plaintexts of decrypts cancelled during their save
    parked: VecDeque<(EncryptedEnvelope, SecureBytes)>,
}

impl SlotState {
    fn is_vacant(&self) -> bool {
        self.session.is_none() && self.parked.is_empty()
    }

    fn park(&mut self, envelope: &EncryptedEnvelope, plaintext: &[u8]) {
        if self.parked.len() >= MAX_PARKED_PLAINTEXTS {
            warn!("Dropping oldest parked plaintext");
            self.parked.pop_front();
        }
        self.parked
            .push_back((envelope.clone(), SecureBytes::new(plaintext.to_vec())));
    }

    fn unpark(&mut self, envelope: &EncryptedEnvelope) -> Option<SecureBytes> {
        let index = self.parked.iter().position(|(parked, _)| parked == envelope)?;
        self.parked.remove(index).map(|(_, plaintext)| plaintext)
    }
}

type SessionSlot = Arc<Mutex<SlotState>>;

/// Entry point for establishing and using pairwise sessions
pub struct SessionManager<S: SessionStore> {
    config: EngineConfig,
    identity: Arc<IdentityKeyPair>,
    store: S,
    sessions: DashMap<PeerId, SessionSlot>,
    prekeys: DashMap<u32, PrekeySecrets>,
    next_prekey_id: AtomicU32,
}

impl<S: SessionStore> SessionManager<S> {
    /// Create a manager
    ///
    /// # Errors
    ///
    /// [`RatchetError::Config`] if `config` fails validation.
    pub fn new(config: EngineConfig, identity: Arc<IdentityKeyPair>, store: S) -> RatchetResult<Self> {
        config.validate()?;
        info!(
            identity = %identity.public_identity().fingerprint(),
            rekey_every = config.rekey_every_n_messages,
            sealed_sender = config.sealed_sender_enabled,
            "Session manager created"
        );
        Ok(Self {
            config,
            identity,
            store,
            sessions: DashMap::new(),
            prekeys: DashMap::new(),
            next_prekey_id: AtomicU32::new(1),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn public_identity(&self) -> PublicIdentity {
        self.identity.public_identity()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of prekeys published but not yet consumed
    pub fn pending_prekeys(&self) -> usize {
        self.prekeys.len()
    }

    // ========================================================================
    // Establishment
    // ========================================================================

    /// Publish a fresh one-time prekey
    ///
    /// The secret half stays in this manager until a handshake consumes it.
    pub fn generate_prekey_bundle(&self) -> RatchetResult<PrekeyBundle> {
        let prekey_id = self.next_prekey_id.fetch_add(1, Ordering::Relaxed);
        let (secrets, bundle) = PrekeySecrets::generate(prekey_id, &self.identity)?;
        self.prekeys.insert(prekey_id, secrets);
        debug!(prekey_id, "Generated prekey bundle");
        Ok(bundle)
    }

    /// Start a session with `peer` from its prekey bundle
    ///
    /// Returns the handshake message to deliver to the peer.
    #[instrument(skip(self, peer_identity, bundle), fields(peer = %peer.short_id(), prekey_id = bundle.prekey_id))]
    pub async fn initiate_session(
        &self,
        peer: &PeerId,
        peer_identity: &PublicIdentity,
        bundle: &PrekeyBundle,
    ) -> RatchetResult<HandshakeMessage> {
        let slot = self.slot(peer);
        let result = self.initiate_in(peer, &slot, peer_identity, bundle).await;
        self.release(peer, &slot);
        result
    }

    async fn initiate_in(
        &self,
        peer: &PeerId,
        slot: &SessionSlot,
        peer_identity: &PublicIdentity,
        bundle: &PrekeyBundle,
    ) -> RatchetResult<HandshakeMessage> {
        let mut guard = slot.lock().await;
        self.ensure_vacant(peer, &mut guard.session).await?;

        let (session, message) = RatchetSession::initiate(&self.identity, peer.clone(), peer_identity, bundle)
            .inspect_err(|e| warn!(error = %e, "Rejected prekey bundle"))?;
        self.persist(peer, &session).await?;

        info!(session = %session.session_id().short_id(), "Session initiated");
        guard.session = Some(session);
        Ok(message)
    }

    /// Complete a session from the initiator's handshake
    ///
    /// The referenced prekey is consumed only if the handshake verifies and
    /// the new session is saved.
    #[instrument(skip(self, peer_identity, message), fields(peer = %peer.short_id(), prekey_id = message.prekey_id))]
    pub async fn accept_session(
        &self,
        peer: &PeerId,
        peer_identity: &PublicIdentity,
        message: &HandshakeMessage,
    ) -> RatchetResult<SessionId> {
        let slot = self.slot(peer);
        let result = self.accept_in(peer, &slot, peer_identity, message).await;
        self.release(peer, &slot);
        result
    }

    async fn accept_in(
        &self,
        peer: &PeerId,
        slot: &SessionSlot,
        peer_identity: &PublicIdentity,
        message: &HandshakeMessage,
    ) -> RatchetResult<SessionId> {
        let mut guard = slot.lock().await;
        self.ensure_vacant(peer, &mut guard.session).await?;

        let Some((prekey_id, prekey)) = self.prekeys.remove(&message.prekey_id) else {
            warn!("Handshake references an unknown prekey");
            return Err(RatchetError::Handshake(format!(
                "unknown prekey {}",
                message.prekey_id
            )));
        };

        let result = match RatchetSession::accept(&self.identity, peer.clone(), peer_identity, &prekey, message) {
            Ok(session) => self.persist(peer, &session).await.map(|()| session),
            Err(e) => Err(e),
        };

        match result {
            Ok(session) => {
                drop(prekey);
                let session_id = session.session_id();
                info!(session = %session_id.short_id(), "Session accepted");
                guard.session = Some(session);
                Ok(session_id)
            }
            Err(e) => {
                if e.is_security_failure() {
                    warn!(error = %e, "Rejected handshake");
                }
                self.prekeys.insert(prekey_id, prekey);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    /// Encrypt `plaintext` for `peer`
    ///
    /// The advanced state is saved before the envelope is returned. If the
    /// call is cancelled during the save the counter may already be spent;
    /// the peer then sees an ordinary gap.
    #[instrument(skip(self, plaintext), fields(peer = %peer.short_id(), len = plaintext.len()))]
    pub async fn encrypt_message(&self, peer: &PeerId, plaintext: &[u8]) -> RatchetResult<EncryptedEnvelope> {
        let slot = self.slot(peer);
        let result = self.encrypt_in(peer, &slot, plaintext).await;
        self.release(peer, &slot);
        result
    }

    async fn encrypt_in(&self, peer: &PeerId, slot: &SessionSlot, plaintext: &[u8]) -> RatchetResult<EncryptedEnvelope> {
        let mut guard = slot.lock().await;
        let live = self.checkout(peer, &mut guard.session).await?;

        let (next, envelope) = match live.prepare_encrypt(plaintext, &self.config, &self.identity) {
            Ok(prepared) => prepared,
            Err(e) => {
                guard.session = Some(live);
                return Err(e);
            }
        };

        match self.persist(peer, &next).await {
            Ok(()) => {
                guard.session = Some(next);
                Ok(envelope)
            }
            Err(e) => {
                warn!(error = %e, "Failed to save session; message not sent");
                guard.session = Some(live);
                Err(e)
            }
        }
    }

    /// Decrypt an envelope from `peer`
    ///
    /// On any error the stored and in-memory session are unchanged. A call
    /// cancelled during its save loses nothing: delivering the same
    /// envelope again yields the plaintext once.
    #[instrument(skip(self, envelope), fields(peer = %peer.short_id()))]
    pub async fn decrypt_message(&self, peer: &PeerId, envelope: &EncryptedEnvelope) -> RatchetResult<Vec<u8>> {
        let slot = self.slot(peer);
        let result = self.decrypt_in(peer, &slot, envelope).await;
        self.release(peer, &slot);
        result
    }

    async fn decrypt_in(&self, peer: &PeerId, slot: &SessionSlot, envelope: &EncryptedEnvelope) -> RatchetResult<Vec<u8>> {
        let mut guard = slot.lock().await;
        let state = &mut *guard;
        let live = self.checkout(peer, &mut state.session).await?;

        let (next, plaintext) = match live.prepare_decrypt(envelope, &self.config) {
            Ok(prepared) => prepared,
            Err(e) => {
                state.session = Some(live);
                if let Some(parked) = state.unpark(envelope) {
                    debug!("Redelivered plaintext of a cancelled decrypt");
                    return Ok(parked.as_slice().to_vec());
                }
                if e.is_security_failure() {
                    warn!(error = %e, "Rejected message");
                } else {
                    debug!(error = %e, "Could not decrypt message");
                }
                return Err(e);
            }
        };

        // A parked copy from a cancel that never reached the store is stale
        state.unpark(envelope);

        // Stays parked only if this future is dropped inside the save
        state.park(envelope, &plaintext);
        let saved = self.persist(peer, &next).await;
        state.unpark(envelope);

        match saved {
            Ok(()) => {
                state.session = Some(next);
                Ok(plaintext)
            }
            Err(e) => {
                warn!(error = %e, "Failed to save session; message not delivered");
                state.session = Some(live);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close the session with `peer` and delete its stored state
    ///
    /// The closed session stays in memory so later operations report
    /// [`RatchetError::SessionClosed`]; a new handshake may replace it.
    #[instrument(skip(self), fields(peer = %peer.short_id()))]
    pub async fn close_session(&self, peer: &PeerId) -> RatchetResult<()> {
        let slot = self.slot(peer);
        let result = self.close_in(peer, &slot).await;
        self.release(peer, &slot);
        result
    }

    async fn close_in(&self, peer: &PeerId, slot: &SessionSlot) -> RatchetResult<()> {
        let mut guard = slot.lock().await;
        let mut session = self.checkout(peer, &mut guard.session).await?;

        session.close();
        guard.session = Some(session);
        guard.parked.clear();
        self.store.delete(peer).await?;
        info!("Session closed");
        Ok(())
    }

    /// Snapshot of the session with `peer`
    pub async fn session_info(&self, peer: &PeerId) -> RatchetResult<SessionInfo> {
        let slot = self.slot(peer);
        let result = self.info_in(peer, &slot).await;
        self.release(peer, &slot);
        result
    }

    async fn info_in(&self, peer: &PeerId, slot: &SessionSlot) -> RatchetResult<SessionInfo> {
        let mut guard = slot.lock().await;
        let session = self.checkout(peer, &mut guard.session).await?;
        let info = session.info();
        guard.session = Some(session);
        Ok(info)
    }

    /// Code to compare with `peer` out of band to rule out a substituted identity
    pub async fn safety_code(&self, peer: &PeerId) -> RatchetResult<String> {
        let slot = self.slot(peer);
        let result = self.safety_code_in(peer, &slot).await;
        self.release(peer, &slot);
        result
    }

    async fn safety_code_in(&self, peer: &PeerId, slot: &SessionSlot) -> RatchetResult<String> {
        let mut guard = slot.lock().await;
        let session = self.checkout(peer, &mut guard.session).await?;
        let peer_identity = session.peer_identity();
        guard.session = Some(session);
        Ok(self.identity.public_identity().safety_code(&peer_identity?))
    }

    /// Whether a usable (not closed) session with `peer` exists
    pub async fn has_session(&self, peer: &PeerId) -> RatchetResult<bool> {
        match self.session_info(peer).await {
            Ok(info) => Ok(info.state != SessionState::Closed),
            Err(RatchetError::SessionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Peers with a stored session
    pub async fn peers(&self) -> RatchetResult<Vec<PeerId>> {
        Ok(self.store.peers().await?)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn slot(&self, peer: &PeerId) -> SessionSlot {
        self.sessions.entry(peer.clone()).or_default().clone()
    }

    /// Drop `slot` from the map if it holds nothing and no other task has it
    ///
    /// Runs under the map's shard lock, so nobody can clone the slot between
    /// the check and the removal.
    fn release(&self, peer: &PeerId, slot: &SessionSlot) {
        let released = self
            .sessions
            .remove_if(peer, |_, current| {
                Arc::ptr_eq(current, slot)
                    && Arc::strong_count(current) == 2
                    && current.try_lock().is_ok_and(|state| state.is_vacant())
            })
            .is_some();
        if released {
            debug!(peer = %peer.short_id(), "Released empty session slot");
        }
    }

    /// Take the live session out of its slot, loading it if needed
    async fn checkout(&self, peer: &PeerId, slot: &mut Option<RatchetSession>) -> RatchetResult<RatchetSession> {
        if let Some(session) = slot.take() {
            return Ok(session);
        }
        match self.store.load(peer).await? {
            Some(blob) => {
                let session = RatchetSession::from_bytes(&blob)?;
                debug!(session = %session.session_id().short_id(), "Loaded session from store");
                Ok(session)
            }
            None => Err(RatchetError::SessionNotFound(peer.to_string())),
        }
    }

    async fn ensure_vacant(&self, peer: &PeerId, slot: &mut Option<RatchetSession>) -> RatchetResult<()> {
        match self.checkout(peer, slot).await {
            Ok(existing) => {
                let closed = existing.is_closed();
                *slot = Some(existing);
                if closed {
                    Ok(())
                } else {
                    Err(RatchetError::SessionExists(peer.to_string()))
                }
            }
            Err(RatchetError::SessionNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, peer: &PeerId, session: &RatchetSession) -> RatchetResult<()> {
        let blob = session.to_bytes()?;
        self.store.save(peer, blob.as_slice()).await?;
        Ok(())
    }
}

impl<S: SessionStore> std::fmt::Debug for SessionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("identity", &self.identity)
            .field("sessions", &self.sessions.len())
            .field("prekeys", &self.prekeys.len())
            .finish_non_exhaustive()
    }
}
