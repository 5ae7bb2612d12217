//! Session engine benchmarks
//!
//! - Handshake (bundle generation, initiate, accept)
//! - Encrypt/decrypt on a running chain
//! - Full hybrid ratchet round trip (two steps)
//!
//! Run with: cargo bench -p qubee-ratchet

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use qubee_core::PeerId;
use qubee_crypto::IdentityKeyPair;
use qubee_ratchet::{EngineConfig, PrekeySecrets, RatchetSession};

fn establish(alice: &IdentityKeyPair, bob: &IdentityKeyPair) -> (RatchetSession, RatchetSession) {
    let (prekey, bundle) = PrekeySecrets::generate(1, bob).unwrap();
    let (initiator, handshake) = RatchetSession::initiate(
        alice,
        PeerId::new("bob").unwrap(),
        &bob.public_identity(),
        &bundle,
    )
    .unwrap();
    let responder = RatchetSession::accept(
        bob,
        PeerId::new("alice").unwrap(),
        &alice.public_identity(),
        &prekey,
        &handshake,
    )
    .unwrap();
    (initiator, responder)
}

fn bench_handshake(c: &mut Criterion) {
    let mut group = c.benchmark_group("handshake");
    let alice = IdentityKeyPair::generate().unwrap();
    let bob = IdentityKeyPair::generate().unwrap();

    group.bench_function("prekey_bundle", |b| {
        b.iter(|| PrekeySecrets::generate(black_box(1), &bob).unwrap())
    });

    group.bench_function("initiate_and_accept", |b| {
        b.iter(|| establish(black_box(&alice), black_box(&bob)))
    });

    group.finish();
}

fn bench_chain_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_messages");
    let config = EngineConfig::default();
    let alice_identity = IdentityKeyPair::generate().unwrap();
    let bob_identity = IdentityKeyPair::generate().unwrap();
    let (alice, bob) = establish(&alice_identity, &bob_identity);

    for size in [256usize, 4096] {
        let message = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encrypt_{}b", size), |b| {
            b.iter(|| alice.prepare_encrypt(black_box(&message), &config, &alice_identity).unwrap())
        });

        let (_, envelope) = alice.prepare_encrypt(&message, &config, &alice_identity).unwrap();
        group.bench_function(format!("decrypt_{}b", size), |b| {
            b.iter(|| bob.prepare_decrypt(black_box(&envelope), &config).unwrap())
        });
    }

    group.finish();
}

fn bench_hybrid_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("hybrid_step");
    let config = EngineConfig::default();
    let alice_identity = IdentityKeyPair::generate().unwrap();
    let bob_identity = IdentityKeyPair::generate().unwrap();
    let (mut alice, mut bob) = establish(&alice_identity, &bob_identity);

    let envelope = alice.encrypt(b"warm up", &config, &alice_identity).unwrap();
    bob.decrypt(&envelope, &config).unwrap();

    // Each iteration performs two hybrid steps (Bob's and Alice's)
    group.bench_function("round_trip", |b| {
        b.iter_batched(
            || (alice.clone(), bob.clone()),
            |(mut alice, mut bob)| {
                let envelope = bob.encrypt(b"ping", &config, &bob_identity).unwrap();
                alice.decrypt(&envelope, &config).unwrap();
                let envelope = alice.encrypt(b"pong", &config, &alice_identity).unwrap();
                bob.decrypt(&envelope, &config).unwrap();
                (alice, bob)
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_handshake, bench_chain_messages, bench_hybrid_round_trip);
criterion_main!(benches);
