//! Peer and session context injection
//!
//! A [`SessionContextGuard`] records which peer (and, once established, which
//! session) the current thread is working on. While the guard lives, a
//! `session` span carrying `peer_id`, `session_id` and `instance_id` is
//! entered, so every event emitted inside the operation is stamped with them
//! by the console and JSONL formatters.

use std::cell::RefCell;

use qubee_core::{PeerId, SessionId};
use tracing::span::EnteredSpan;
use uuid::Uuid;

/// Context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContextData {
    /// Short form of the remote peer identifier
    pub peer_id: String,
    /// Short form of the session identifier, if one exists yet
    pub session_id: Option<String>,
    /// Unique instance ID for the local engine
    pub instance_id: Uuid,
}

thread_local! {
    static SESSION_CONTEXT: RefCell<Option<SessionContextData>> = const { RefCell::new(None) };
}

/// RAII guard for peer and session context
///
/// Restores the previous context (if any) when dropped.
///
/// # Example
///
/// ```
/// use qubee_core::PeerId;
/// use qubee_logging::SessionContextGuard;
///
/// let peer = PeerId::new("bob").unwrap();
/// let _guard = SessionContextGuard::new(&peer, None);
///
/// // Events in this scope carry peer_id = "bob"
/// tracing::info!("sending message");
/// ```
pub struct SessionContextGuard {
    previous: Option<SessionContextData>,
    _span: EnteredSpan,
}

impl SessionContextGuard {
    /// Set the context for the current thread with a fresh instance ID
    pub fn new(peer: &PeerId, session: Option<&SessionId>) -> Self {
        Self::with_instance_id(peer, session, Uuid::new_v4())
    }

    /// Set the context with a specific instance ID
    ///
    /// Useful when one engine instance should keep the same ID across
    /// operations and restarts.
    pub fn with_instance_id(peer: &PeerId, session: Option<&SessionId>, instance_id: Uuid) -> Self {
        let data = SessionContextData {
            peer_id: peer.short_id().to_string(),
            session_id: session.map(SessionId::short_id),
            instance_id,
        };

        let previous = SESSION_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data.clone()));

        // Created after the thread-local is set so the layer sees it
        let span = tracing::info_span!(
            "session",
            peer_id = %data.peer_id,
            session_id = data.session_id.as_deref().unwrap_or("-"),
            instance_id = %data.instance_id,
        );

        Self {
            previous,
            _span: span.entered(),
        }
    }

    /// Get the current context (if any)
    pub fn current() -> Option<SessionContextData> {
        SESSION_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    /// Get the current peer ID (if set)
    pub fn current_peer_id() -> Option<String> {
        Self::current().map(|ctx| ctx.peer_id)
    }

    /// Get the current session ID (if set)
    pub fn current_session_id() -> Option<String> {
        Self::current().and_then(|ctx| ctx.session_id)
    }
}

impl Drop for SessionContextGuard {
    fn drop(&mut self) {
        SESSION_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with a peer/session context in place
///
/// ```
/// use qubee_core::PeerId;
///
/// let peer = PeerId::new("alice").unwrap();
/// let answer = qubee_logging::with_session_context!(&peer, None, { 40 + 2 });
/// assert_eq!(answer, 42);
/// ```
#[macro_export]
macro_rules! with_session_context {
    ($peer:expr, $session:expr, $body:block) => {{
        let _guard = $crate::context::SessionContextGuard::new($peer, $session);
        $body
    }};
}
