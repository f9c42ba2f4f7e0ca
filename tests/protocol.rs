//! End-to-end batch-OLE runs over in-process duplex channels.
//!
//! Both drivers are generic over their streams, so a full two-party batch
//! runs inside one test process: three `tokio::io::duplex` pairs stand in
//! for the three TCP streams, with small freshly generated code artifacts.
//! Decode failures inside the vector-OLE layer are expected occasionally and
//! exercised by the retry path; they never fail a run.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use vecole::batch::{run_alice, run_bob, AliceOutcome, PeerChannels, ProtocolContext, Statistics};
use vecole::field::Zp;
use vecole::goldreich::GoldreichGraph;
use vecole::luby::{create_lt_code, RobustSolitonDistribution};
use vecole::net::Channel;
use vecole::sparse::FastSparseLinearCode;

fn test_context(seed: u64) -> ProtocolContext {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = RobustSolitonDistribution::new(256, 0.9, 0.01);
    let luby = create_lt_code(&dist, &mut rng);
    let mut sparse = FastSparseLinearCode {
        k: 16,
        d: 8,
        u: 24,
        v: luby.output_symbol_size(),
        entries: Vec::new(),
    };
    sparse.resample(&mut rng);
    let mut graph = GoldreichGraph {
        input_length: 8,
        output_length: 12,
        a: 3,
        b: 3,
        storage: Vec::new(),
    };
    graph.resample(&mut rng);
    ProtocolContext::new(luby, sparse, graph).expect("test artifacts must fit together")
}

async fn run_batch_ole(
    ctx: Arc<ProtocolContext>,
    x: Vec<Zp>,
    a: Vec<Zp>,
    b: Vec<Zp>,
    batches: usize,
) -> (AliceOutcome, Statistics) {
    let (alice_keys, bob_keys) = tokio::io::duplex(1 << 20);
    let (alice_ole, bob_ole) = tokio::io::duplex(1 << 20);
    let (alice_unblind, bob_unblind) = tokio::io::duplex(1 << 20);

    let alice_channels = PeerChannels::new(
        Channel::new(alice_keys),
        Channel::new(alice_ole),
        Channel::new(alice_unblind),
    );
    let bob_channels = PeerChannels::new(
        Channel::new(bob_keys),
        Channel::new(bob_ole),
        Channel::new(bob_unblind),
    );

    let bob_ctx = ctx.clone();
    let bob = tokio::spawn(async move {
        run_bob(bob_ctx, Arc::new(a), Arc::new(b), bob_channels, batches)
            .await
            .expect("bob's run must complete")
    });
    let outcome = run_alice(ctx, Arc::new(x), alice_channels, batches)
        .await
        .expect("alice's run must complete");
    let bob_stats = bob.await.expect("bob's task must not panic");
    (outcome, bob_stats)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_ole_on_random_inputs() {
    let ctx = Arc::new(test_context(200));
    let m = ctx.batch_length();
    let mut rng = StdRng::seed_from_u64(201);

    let mut x = vec![Zp::ZERO; m];
    let mut a = vec![Zp::ZERO; m];
    let mut b = vec![Zp::ZERO; m];
    Zp::fill_uniform(&mut x, &mut rng);
    Zp::fill_uniform(&mut a, &mut rng);
    Zp::fill_uniform(&mut b, &mut rng);

    let (outcome, bob_stats) =
        run_batch_ole(ctx.clone(), x.clone(), a.clone(), b.clone(), 1).await;

    for i in 0..m {
        assert_eq!(outcome.z[i], a[i] * x[i] + b[i], "mismatch at position {i}");
    }
    // Every required chunk was eventually delivered on both sides.
    assert!(outcome.statistics.successful_vector_ole >= ctx.vector_ole_per_batch());
    assert_eq!(
        outcome.statistics.successful_vector_ole,
        bob_stats.successful_vector_ole
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_ole_on_constant_inputs() {
    let ctx = Arc::new(test_context(210));
    let m = ctx.batch_length();

    // x = (1,1,…), a = (2,2,…), b = (3,3,…) ⇒ z = (5,5,…).
    let x = vec![Zp::ONE; m];
    let a = vec![Zp::new(2); m];
    let b = vec![Zp::new(3); m];
    let (outcome, _) = run_batch_ole(ctx, x, a, b, 1).await;
    assert!(outcome.z.iter().all(|&z| z == Zp::new(5)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batch_ole_with_negative_one_inputs() {
    let ctx = Arc::new(test_context(220));
    let m = ctx.batch_length();

    // x = (−1,…), a = (1,…), b = (0,…) ⇒ z = (−1,…).
    let x = vec![-Zp::ONE; m];
    let a = vec![Zp::ONE; m];
    let b = vec![Zp::ZERO; m];
    let (outcome, _) = run_batch_ole(ctx, x, a, b, 1).await;
    assert!(outcome.z.iter().all(|&z| z == -Zp::ONE));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batches_are_sequential_and_independent() {
    let ctx = Arc::new(test_context(230));
    let m = ctx.batch_length();
    let mut rng = StdRng::seed_from_u64(231);

    let mut x = vec![Zp::ZERO; m];
    let mut a = vec![Zp::ZERO; m];
    let mut b = vec![Zp::ZERO; m];
    Zp::fill_uniform(&mut x, &mut rng);
    Zp::fill_uniform(&mut a, &mut rng);
    Zp::fill_uniform(&mut b, &mut rng);

    // Three batches of the same inputs; the final output is still a·x + b
    // even though every batch used a fresh seed, blinding and key pairs.
    let (outcome, _) = run_batch_ole(ctx, x.clone(), a.clone(), b.clone(), 3).await;
    for i in 0..m {
        assert_eq!(outcome.z[i], a[i] * x[i] + b[i], "mismatch at position {i}");
    }
}
