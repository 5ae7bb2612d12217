//! Stress tests for session context handling
//!
//! High-volume and multi-threaded use of `SessionContextGuard`, as when many
//! peers are served concurrently by one engine.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use qubee_core::{PeerId, SessionId};
use qubee_logging::SessionContextGuard;

/// Each thread sees only its own context while all threads switch at once
#[test]
fn test_concurrent_session_contexts() {
    const NUM_THREADS: usize = 32;
    const ITERATIONS: usize = 200;

    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let start = Instant::now();

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let peer = PeerId::new(format!("peer-{}", thread_id)).unwrap();
                let session = SessionId::generate();
                barrier.wait();

                for _ in 0..ITERATIONS {
                    let _guard = SessionContextGuard::new(&peer, Some(&session));
                    let ctx = SessionContextGuard::current().unwrap();
                    assert_eq!(ctx.peer_id, peer.short_id());
                    assert_eq!(ctx.session_id, Some(session.short_id()));
                }

                assert!(SessionContextGuard::current().is_none());
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    println!(
        "Completed {} context operations across {} threads in {:?}",
        NUM_THREADS * ITERATIONS,
        NUM_THREADS,
        start.elapsed()
    );
}

/// Rapid alternation between two peers restores cleanly every time
#[test]
fn test_rapid_context_switching() {
    const NUM_SWITCHES: usize = 10_000;

    let alice = PeerId::new("alice").unwrap();
    let bob = PeerId::new("bob").unwrap();

    for i in 0..NUM_SWITCHES {
        let (peer, expected) = if i % 2 == 0 { (&alice, "alice") } else { (&bob, "bob") };
        let _guard = SessionContextGuard::new(peer, None);
        assert_eq!(SessionContextGuard::current_peer_id().as_deref(), Some(expected));
    }

    assert!(SessionContextGuard::current().is_none());
}

/// Deeply nested guards unwind in order
#[test]
fn test_deep_nesting_unwinds() {
    const DEPTH: usize = 100;

    let peers: Vec<_> = (0..DEPTH)
        .map(|i| PeerId::new(format!("p{}", i)).unwrap())
        .collect();

    let mut guards = Vec::with_capacity(DEPTH);
    for peer in &peers {
        guards.push(SessionContextGuard::new(peer, None));
        assert_eq!(SessionContextGuard::current_peer_id().unwrap(), peer.short_id());
    }

    for i in (0..DEPTH).rev() {
        assert_eq!(SessionContextGuard::current_peer_id().unwrap(), peers[i].short_id());
        drop(guards.pop());
    }

    assert!(SessionContextGuard::current().is_none());
}
