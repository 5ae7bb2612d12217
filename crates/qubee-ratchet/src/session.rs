//! Hybrid double ratchet session
//!
//! Every message advances a symmetric chain ([`derive_next`]). Whenever a side
//! sends after seeing a fresh ratchet key from its peer (and has sent at
//! least `rekey_every_n_messages` on its current chain), it performs a hybrid
//! step: a new X25519 agreement *and* a Kyber768 encapsulation are mixed into
//! the root key. Counters are global per direction; the header carries the
//! counter where the sender's current chain began so the receiver can cache
//! the tail of the previous chain before stepping.
//!
//! Operations come in two flavours. [`RatchetSession::prepare_encrypt`] and
//! [`RatchetSession::prepare_decrypt`] take `&self` and return the next state
//! alongside their output; nothing changes until the caller swaps it in.
//! [`RatchetSession::encrypt`] and [`RatchetSession::decrypt`] do the swap
//! immediately.

use std::collections::BTreeMap;

use qubee_core::{PeerId, SessionId, Timestamp};
use qubee_crypto::{
    ChainKey, DH_PUBLIC_KEY_SIZE, EphemeralKeyPair, HybridSignature, IdentityKeyPair, KEM_PUBLIC_KEY_SIZE,
    KemKeyPair, MessageKey, PublicIdentity, RootKey, SecretKey, SecureBytes, aead, derive_next, encapsulate,
    kdf_root,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use zeroize::Zeroize;

use crate::config::EngineConfig;
use crate::envelope::EncryptedEnvelope;
use crate::error::{RatchetError, RatchetResult};
use crate::handshake::{self, Established, HandshakeMessage, PrekeyBundle, PrekeySecrets};
use crate::header::{MessageHeader, StepMaterial};

/// Leading byte of every serialized session blob
pub const SESSION_FORMAT_VERSION: u8 = 1;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Handshake complete, no message exchanged yet
    Established,
    Active,
    /// Secrets wiped; every operation fails
    Closed,
}

/// Which side of the handshake this session was
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

/// Non-secret snapshot of a session, for diagnostics and UIs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub peer_id: PeerId,
    pub role: Role,
    pub state: SessionState,
    pub send_counter: u32,
    pub receive_counter: u32,
    pub send_epoch: u32,
    pub receive_epoch: u32,
    pub skipped_keys: usize,
    pub created_at: Timestamp,
    pub last_used_at: Timestamp,
}

/// Ratchet state shared with one peer
#[derive(Clone, Serialize, Deserialize)]
pub struct RatchetSession {
    /// Local identifier; the peer assigns its own
    session_id: SessionId,
    peer_id: PeerId,
    peer_identity: Vec<u8>,
    role: Role,
    state: SessionState,

    root_key: RootKey,
    header_key: SecretKey,
    sending_chain_key: Option<ChainKey>,
    receiving_chain_key: Option<ChainKey>,

    /// Next counter to assign on send
    send_counter: u32,
    /// Next counter expected on the receiving chain
    receive_counter: u32,
    send_epoch: u32,
    receive_epoch: u32,
    /// Counter at which the current sending chain began
    chain_start: u32,
    sent_on_chain: u32,
    /// Set once a new peer ratchet key arrives; cleared by our next step
    pending_turn: bool,

    ratchet_key_pair: Option<EphemeralKeyPair>,
    peer_ratchet_key: Option<[u8; DH_PUBLIC_KEY_SIZE]>,
    kem_key_pair: Option<KemKeyPair>,
    peer_kem_public_key: Vec<u8>,
    unacked_step: Option<StepMaterial>,

    skipped_message_keys: BTreeMap<u32, MessageKey>,
    /// Every counter below this had its cached key evicted
    eviction_floor: u32,

    created_at: Timestamp,
    last_used_at: Timestamp,
}

impl RatchetSession {
    /// Start a session from a peer's published prekey bundle
    ///
    /// # Errors
    ///
    /// [`RatchetError::Handshake`] if the bundle is not signed by
    /// `peer_identity` or carries malformed keys.
    pub fn initiate(
        identity: &IdentityKeyPair,
        peer_id: PeerId,
        peer_identity: &PublicIdentity,
        bundle: &PrekeyBundle,
    ) -> RatchetResult<(Self, HandshakeMessage)> {
        let (established, message) = handshake::initiate(identity, peer_identity, bundle)?;
        let session = Self::from_established(peer_id, peer_identity, Role::Initiator, established);
        Ok((session, message))
    }

    /// Complete a session from an initiator's handshake message
    ///
    /// The prekey is only borrowed; the caller discards it once this
    /// succeeds so a forged handshake cannot burn it.
    pub fn accept(
        identity: &IdentityKeyPair,
        peer_id: PeerId,
        peer_identity: &PublicIdentity,
        prekey: &PrekeySecrets,
        message: &HandshakeMessage,
    ) -> RatchetResult<Self> {
        let established = handshake::respond(identity, peer_identity, prekey, message)?;
        Ok(Self::from_established(peer_id, peer_identity, Role::Responder, established))
    }

    fn from_established(
        peer_id: PeerId,
        peer_identity: &PublicIdentity,
        role: Role,
        established: Established,
    ) -> Self {
        let Established {
            secrets,
            ratchet_key_pair,
            kem_key_pair,
            peer_ratchet_key,
            peer_kem_public_key,
        } = established;

        let (sending_chain_key, receiving_chain_key) = match role {
            Role::Initiator => (Some(secrets.initiator_chain), None),
            Role::Responder => (None, Some(secrets.initiator_chain)),
        };
        let now = Timestamp::now();

        Self {
            session_id: SessionId::generate(),
            peer_id,
            peer_identity: peer_identity.to_bytes(),
            role,
            state: SessionState::Established,
            root_key: secrets.root_key,
            header_key: secrets.header_key,
            sending_chain_key,
            receiving_chain_key,
            send_counter: 0,
            receive_counter: 0,
            send_epoch: 0,
            receive_epoch: 0,
            chain_start: 0,
            sent_on_chain: 0,
            // The responder has no sending chain yet and steps on its first send
            pending_turn: role == Role::Responder,
            ratchet_key_pair,
            peer_ratchet_key,
            kem_key_pair,
            peer_kem_public_key,
            unacked_step: None,
            skipped_message_keys: BTreeMap::new(),
            eviction_floor: 0,
            created_at: now,
            last_used_at: now,
        }
    }

    // ========================================================================
    // Send
    // ========================================================================

    /// Encrypt into a new state without modifying `self`
    ///
    /// `identity` signs the envelope when sealed sender is enabled.
    pub fn prepare_encrypt(
        &self,
        plaintext: &[u8],
        config: &EngineConfig,
        identity: &IdentityKeyPair,
    ) -> RatchetResult<(Self, EncryptedEnvelope)> {
        self.ensure_open()?;
        let mut next = self.clone();

        if next.sending_chain_key.is_none()
            || (next.pending_turn && next.sent_on_chain >= config.rekey_every_n_messages)
        {
            next.step_sending()?;
        }

        let counter = next.send_counter;
        let following = counter.checked_add(1).ok_or(RatchetError::CounterExhausted)?;
        let Some(chain_key) = next.sending_chain_key.as_ref() else {
            return Err(RatchetError::InvalidKey("no sending chain".to_string()));
        };
        let (chain_key, message_key) = derive_next(chain_key);
        next.sending_chain_key = Some(chain_key);
        next.send_counter = following;
        next.sent_on_chain = next.sent_on_chain.saturating_add(1);

        let ratchet_key = next
            .ratchet_key_pair
            .as_ref()
            .map(EphemeralKeyPair::public_key)
            .ok_or_else(|| RatchetError::InvalidKey("no local ratchet key".to_string()))?;
        let header = MessageHeader {
            epoch: next.send_epoch,
            counter,
            chain_start: next.chain_start,
            acked_epoch: next.receive_epoch,
            ratchet_key,
            step: next.unacked_step.clone(),
        }
        .seal(&next.header_key)?;

        let timestamp = Timestamp::now();
        let associated_data = EncryptedEnvelope::associated_data(&header, timestamp);
        let ciphertext = aead::seal(&message_key, u64::from(counter), &associated_data, plaintext)?;

        let mut envelope = EncryptedEnvelope {
            header,
            ciphertext,
            signature: Vec::new(),
            timestamp,
        };
        if config.sealed_sender_enabled {
            envelope.signature = identity.sign(&envelope.signing_payload()).to_bytes().to_vec();
        }

        next.state = SessionState::Active;
        next.last_used_at = timestamp;
        trace!(peer = %next.peer_id, counter, epoch = next.send_epoch, "Encrypted message");
        Ok((next, envelope))
    }

    /// Encrypt and advance this session in place
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        config: &EngineConfig,
        identity: &IdentityKeyPair,
    ) -> RatchetResult<EncryptedEnvelope> {
        let (next, envelope) = self.prepare_encrypt(plaintext, config, identity)?;
        *self = next;
        Ok(envelope)
    }

    /// Hybrid step on the sending side: fresh X25519 + Kyber into the root
    fn step_sending(&mut self) -> RatchetResult<()> {
        let peer_ratchet_key = self
            .peer_ratchet_key
            .ok_or_else(|| RatchetError::InvalidKey("no peer ratchet key to step against".to_string()))?;

        let ratchet_key_pair = EphemeralKeyPair::generate()?;
        let dh_secret = ratchet_key_pair.diffie_hellman(&peer_ratchet_key)?;
        let (kem_secret, kem_ciphertext) = encapsulate(&self.peer_kem_public_key)?;
        let kem_key_pair = KemKeyPair::generate()?;
        let (root_key, chain_key) = kdf_root(&self.root_key, &dh_secret, &kem_secret)?;

        self.send_epoch = self.send_epoch.checked_add(1).ok_or(RatchetError::CounterExhausted)?;
        self.root_key = root_key;
        self.sending_chain_key = Some(chain_key);
        self.chain_start = self.send_counter;
        self.sent_on_chain = 0;
        self.pending_turn = false;
        self.unacked_step = Some(StepMaterial {
            kem_ciphertext,
            kem_public_key: kem_key_pair.public_key().to_vec(),
        });
        self.ratchet_key_pair = Some(ratchet_key_pair);
        self.kem_key_pair = Some(kem_key_pair);

        debug!(
            peer = %self.peer_id,
            epoch = self.send_epoch,
            chain_start = self.chain_start,
            "Ratchet step (send)"
        );
        Ok(())
    }

    // ========================================================================
    // Receive
    // ========================================================================

    /// Decrypt into a new state without modifying `self`
    ///
    /// # Errors
    ///
    /// - [`RatchetError::Authentication`]: header tag, AEAD tag or sealed
    ///   sender signature did not verify
    /// - [`RatchetError::Replay`]: the message was already received
    /// - [`RatchetError::OutOfWindow`]: its key was evicted, or the gap to
    ///   it exceeds the skipped-key cache
    /// - [`RatchetError::InvalidEnvelope`]: authenticated but inconsistent
    ///   with this session
    pub fn prepare_decrypt(
        &self,
        envelope: &EncryptedEnvelope,
        config: &EngineConfig,
    ) -> RatchetResult<(Self, Vec<u8>)> {
        self.ensure_open()?;
        let header = MessageHeader::open(&envelope.header, &self.header_key)?;
        if config.sealed_sender_enabled || envelope.is_signed() {
            self.verify_sender(envelope)?;
        }

        let mut next = self.clone();
        let message_key = next.message_key_for(&header, config.skipped_key_cache_limit)?;

        let associated_data = EncryptedEnvelope::associated_data(&envelope.header, envelope.timestamp);
        let plaintext = aead::open(
            &message_key,
            u64::from(header.counter),
            &associated_data,
            &envelope.ciphertext,
        )?;

        if header.acked_epoch >= next.send_epoch {
            next.unacked_step = None;
        }
        next.state = SessionState::Active;
        next.last_used_at = Timestamp::now();
        trace!(peer = %next.peer_id, counter = header.counter, epoch = header.epoch, "Decrypted message");
        Ok((next, plaintext))
    }

    /// Decrypt and advance this session in place
    ///
    /// On error the session is unchanged.
    pub fn decrypt(&mut self, envelope: &EncryptedEnvelope, config: &EngineConfig) -> RatchetResult<Vec<u8>> {
        let (next, plaintext) = self.prepare_decrypt(envelope, config)?;
        *self = next;
        Ok(plaintext)
    }

    fn verify_sender(&self, envelope: &EncryptedEnvelope) -> RatchetResult<()> {
        let peer = PublicIdentity::from_bytes(&self.peer_identity)?;
        let signature =
            HybridSignature::from_bytes(envelope.signature.clone()).map_err(|_| RatchetError::Authentication)?;
        if !peer.verify(&envelope.signing_payload(), &signature) {
            return Err(RatchetError::Authentication);
        }
        Ok(())
    }

    /// Find or derive the key for `header`, stepping the root if the header
    /// opens the peer's next epoch
    fn message_key_for(&mut self, header: &MessageHeader, cache_limit: u32) -> RatchetResult<MessageKey> {
        let counter = header.counter;

        if counter < self.receive_counter {
            return match self.skipped_message_keys.remove(&counter) {
                Some(key) => Ok(key),
                None if counter < self.eviction_floor => Err(RatchetError::OutOfWindow { counter }),
                None => Err(RatchetError::Replay { counter }),
            };
        }

        if header.epoch > self.receive_epoch && header.epoch - self.receive_epoch == 1 {
            let step = header.step.as_ref().ok_or_else(|| {
                RatchetError::InvalidEnvelope("new epoch without step material".to_string())
            })?;
            if header.chain_start < self.receive_counter || counter < header.chain_start {
                return Err(RatchetError::InvalidEnvelope("chain start out of order".to_string()));
            }

            let from = if self.receiving_chain_key.is_some() {
                self.receive_counter
            } else {
                header.chain_start
            };
            if counter - from > cache_limit {
                return Err(RatchetError::OutOfWindow { counter });
            }

            self.skip_to(header.chain_start, cache_limit);
            self.step_receiving(header, step)?;
            self.receive_counter = header.chain_start;
        } else if header.epoch == self.receive_epoch {
            if self.receiving_chain_key.is_none() || self.peer_ratchet_key != Some(header.ratchet_key) {
                return Err(RatchetError::InvalidEnvelope(
                    "ratchet key does not match the current epoch".to_string(),
                ));
            }
            if counter - self.receive_counter > cache_limit {
                return Err(RatchetError::OutOfWindow { counter });
            }
        } else {
            return Err(RatchetError::InvalidEnvelope(format!(
                "unexpected epoch {} (receiving epoch {})",
                header.epoch, self.receive_epoch
            )));
        }

        self.skip_to(counter, cache_limit);
        let Some(chain_key) = self.receiving_chain_key.as_ref() else {
            return Err(RatchetError::InvalidEnvelope("no receiving chain".to_string()));
        };
        let (chain_key, message_key) = derive_next(chain_key);
        self.receiving_chain_key = Some(chain_key);
        self.receive_counter = counter.checked_add(1).ok_or(RatchetError::CounterExhausted)?;
        Ok(message_key)
    }

    /// Cache keys for every counter in `receive_counter..until`, evicting the
    /// oldest entries beyond `cache_limit`
    fn skip_to(&mut self, until: u32, cache_limit: u32) {
        let Some(mut chain_key) = self.receiving_chain_key.take() else {
            return;
        };
        while self.receive_counter < until {
            let (next, message_key) = derive_next(&chain_key);
            self.skipped_message_keys.insert(self.receive_counter, message_key);
            chain_key = next;
            self.receive_counter += 1;
        }
        self.receiving_chain_key = Some(chain_key);

        while self.skipped_message_keys.len() > cache_limit as usize {
            if let Some((evicted, _)) = self.skipped_message_keys.pop_first() {
                self.eviction_floor = self.eviction_floor.max(evicted.saturating_add(1));
            }
        }
    }

    /// Mirror the peer's hybrid step
    fn step_receiving(&mut self, header: &MessageHeader, step: &StepMaterial) -> RatchetResult<()> {
        if step.kem_public_key.len() != KEM_PUBLIC_KEY_SIZE {
            return Err(RatchetError::InvalidEnvelope("step KEM key has the wrong length".to_string()));
        }
        let ratchet_key_pair = self
            .ratchet_key_pair
            .as_ref()
            .ok_or_else(|| RatchetError::InvalidEnvelope("peer stepped before our first ratchet key".to_string()))?;
        let kem_key_pair = self
            .kem_key_pair
            .as_ref()
            .ok_or_else(|| RatchetError::InvalidEnvelope("no local KEM key for this step".to_string()))?;

        let dh_secret = ratchet_key_pair.diffie_hellman(&header.ratchet_key)?;
        let kem_secret = kem_key_pair.decapsulate(&step.kem_ciphertext)?;
        let (root_key, chain_key) = kdf_root(&self.root_key, &dh_secret, &kem_secret)?;

        self.root_key = root_key;
        self.receiving_chain_key = Some(chain_key);
        self.receive_epoch = header.epoch;
        self.peer_ratchet_key = Some(header.ratchet_key);
        self.peer_kem_public_key = step.kem_public_key.clone();
        self.pending_turn = true;

        debug!(
            peer = %self.peer_id,
            epoch = self.receive_epoch,
            chain_start = header.chain_start,
            "Ratchet step (receive)"
        );
        Ok(())
    }

    // ========================================================================
    // Lifecycle and persistence
    // ========================================================================

    /// Wipe all secrets and mark the session closed
    pub fn close(&mut self) {
        self.root_key.zeroize();
        self.header_key.zeroize();
        self.sending_chain_key = None;
        self.receiving_chain_key = None;
        self.ratchet_key_pair = None;
        self.kem_key_pair = None;
        self.unacked_step = None;
        self.skipped_message_keys.clear();
        self.state = SessionState::Closed;
        debug!(peer = %self.peer_id, session = %self.session_id.short_id(), "Session closed");
    }

    fn ensure_open(&self) -> RatchetResult<()> {
        if self.state == SessionState::Closed {
            return Err(RatchetError::SessionClosed);
        }
        Ok(())
    }

    /// Serialize into an opaque, versioned blob
    pub fn to_bytes(&self) -> RatchetResult<SecureBytes> {
        let blob = postcard::to_extend(self, vec![SESSION_FORMAT_VERSION])?;
        Ok(SecureBytes::new(blob))
    }

    pub fn from_bytes(bytes: &[u8]) -> RatchetResult<Self> {
        match bytes.split_first() {
            Some((&SESSION_FORMAT_VERSION, body)) => Ok(postcard::from_bytes(body)?),
            Some((version, _)) => Err(RatchetError::Serialization(format!(
                "unsupported session format version {}",
                version
            ))),
            None => Err(RatchetError::Serialization("empty session blob".to_string())),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn peer_identity(&self) -> RatchetResult<PublicIdentity> {
        Ok(PublicIdentity::from_bytes(&self.peer_identity)?)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn send_counter(&self) -> u32 {
        self.send_counter
    }

    pub fn receive_counter(&self) -> u32 {
        self.receive_counter
    }

    pub fn send_epoch(&self) -> u32 {
        self.send_epoch
    }

    pub fn receive_epoch(&self) -> u32 {
        self.receive_epoch
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped_message_keys.len()
    }

    /// Current root key
    ///
    /// Use with caution: exposing it compromises every future message until
    /// the next ratchet step. Intended for tests and key verification.
    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn last_used_at(&self) -> Timestamp {
        self.last_used_at
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id,
            peer_id: self.peer_id.clone(),
            role: self.role,
            state: self.state,
            send_counter: self.send_counter,
            receive_counter: self.receive_counter,
            send_epoch: self.send_epoch,
            receive_epoch: self.receive_epoch,
            skipped_keys: self.skipped_message_keys.len(),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}

impl std::fmt::Debug for RatchetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetSession")
            .field("session_id", &self.session_id.short_id())
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("send_counter", &self.send_counter)
            .field("receive_counter", &self.receive_counter)
            .field("send_epoch", &self.send_epoch)
            .field("receive_epoch", &self.receive_epoch)
            .field("skipped_keys", &self.skipped_message_keys.len())
            .finish_non_exhaustive()
    }
}
