//! Batch-OLE driver
//!
//! Amortizes many OLEs per seed: a single `s ∈ Z_p^k` expands through the
//! Goldreich PRG into `G(s) ∈ Z_p^m`, and one batch computes the whole
//! vector `z = a·x + b` as `z = u + v` with
//!
//! - `u = a·G(s) + c`, learned by Alice through a garbled evaluation of the
//!   PRG circuit (`c` is Bob's fresh blinding), and
//! - `v = a·D + b − c` for the cleartext offset `D = x − G(s)`.
//!
//! Each side runs three concurrent channel tasks per batch and joins them
//! at batch end:
//!
//! | stream | purpose                                                    |
//! |--------|------------------------------------------------------------|
//! | S1     | Bob streams his finished keys `coef·a_i + intercept` (then |
//! |        | the `c` keys) to Alice                                     |
//! | S2     | vector-OLEs delivering Alice's keys `coef·s_i + intercept`,|
//! |        | one per chunk of up to `w` key pairs per seed position     |
//! | S3     | the `D`/`v` roundtrip stripping the PRG blinding           |
//!
//! A channel failure is recorded against that channel and aborts the run at
//! the join; the other tasks finish their current exchange undisturbed.
//! Failed vector-OLEs are *not* errors; the same chunk is retried with
//! fresh randomness.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{error, info};

use crate::circuit::TwoPartyCircuit;
use crate::field::Zp;
use crate::garble::{self, Configuration, GarbleError, KeyPairs, Keys};
use crate::goldreich::GoldreichGraph;
use crate::luby::LtCode;
use crate::net::{Channel, ChannelError, BYE_BYE, HELLO};
use crate::sparse::FastSparseLinearCode;
use crate::vecole::{alice_attempt, bob_attempt, AliceOleBuffers, BobOleBuffers};

/// Everything both drivers share and treat as read-only during a batch.
pub struct ProtocolContext {
    pub luby: LtCode,
    pub sparse: FastSparseLinearCode,
    pub graph: GoldreichGraph,
    /// The compiled `a·G(s) + c` circuit.
    pub circuit: TwoPartyCircuit,
    /// Permanent key-pair counts for `circuit`.
    pub config: Configuration,
}

/// Context assembly failure.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("LT code has {luby} outputs but the sparse code's lower part has {sparse} rows")]
    CodeMismatch { luby: usize, sparse: usize },
    #[error(transparent)]
    Garble(#[from] GarbleError),
}

impl ProtocolContext {
    /// Check the codes against each other, build the PRG circuit and
    /// configure it.
    pub fn new(
        luby: LtCode,
        sparse: FastSparseLinearCode,
        graph: GoldreichGraph,
    ) -> Result<Self, InitError> {
        if luby.output_symbol_size() != sparse.v {
            return Err(InitError::CodeMismatch {
                luby: luby.output_symbol_size(),
                sparse: sparse.v,
            });
        }
        info!("building the pseudorandom-OLE circuit");
        let circuit = graph.masked_ole_circuit();
        let mut config = Configuration::default();
        garble::configure(&circuit, &mut config)?;
        info!(
            gates = circuit.gates.len(),
            alice_keys = config.alice_encoding.iter().sum::<usize>(),
            bob_keys = config.bob_encoding.iter().sum::<usize>(),
            "circuit configured"
        );
        Ok(ProtocolContext { luby, sparse, graph, circuit, config })
    }

    /// `k`: the PRG seed length (Alice's input count).
    pub fn seed_length(&self) -> usize {
        self.graph.input_length
    }

    /// `m`: OLEs per batch (the PRG output length).
    pub fn batch_length(&self) -> usize {
        self.graph.output_length
    }

    /// Total Alice-side key pairs per batch.
    pub fn alice_key_length(&self) -> usize {
        self.config.alice_encoding.iter().sum()
    }

    /// Total Bob-side key pairs per batch.
    pub fn bob_key_length(&self) -> usize {
        self.config.bob_encoding.iter().sum()
    }

    /// Vector-OLE invocations a batch needs when every attempt succeeds.
    pub fn vector_ole_per_batch(&self) -> usize {
        let w = self.luby.input_symbol_size;
        self.config
            .alice_encoding
            .iter()
            .map(|&count| count.div_ceil(w))
            .sum()
    }
}

/// Per-run counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct Statistics {
    pub successful_vector_ole: usize,
    pub unsuccessful_vector_ole: usize,
    pub total_time: Duration,
}

impl Statistics {
    /// Log the summary table the way the protocol reports it.
    pub fn log_summary(&self, ctx: &ProtocolContext, batches: usize) {
        let seconds = self.total_time.as_secs_f64();
        let attempts = self.successful_vector_ole + self.unsuccessful_vector_ole;
        let millis_per_vector_ole =
            if attempts == 0 { 0.0 } else { seconds * 1e3 / attempts as f64 };
        let micros_per_ole = seconds * 1e6 / (batches * ctx.batch_length()) as f64;
        info!(
            total_minutes = seconds / 60.0,
            seconds_per_batch = seconds / batches as f64,
            millis_per_vector_ole,
            micros_per_ole,
            vector_ole_per_batch = ctx.vector_ole_per_batch(),
            alice_key_length = ctx.alice_key_length(),
            bob_key_length = ctx.bob_key_length(),
            failed_vector_ole = self.unsuccessful_vector_ole,
            successful_vector_ole = self.successful_vector_ole,
            "statistics"
        );
    }
}

/// The three protocol streams of one peer.
pub struct PeerChannels<S> {
    /// S1: Bob's key stream.
    pub keys: Channel<S>,
    /// S2: vector-OLE traffic.
    pub vector_ole: Channel<S>,
    /// S3: the `D`/`v` exchange.
    pub unblinding: Channel<S>,
}

impl<S> PeerChannels<S> {
    pub fn new(keys: Channel<S>, vector_ole: Channel<S>, unblinding: Channel<S>) -> Self {
        PeerChannels { keys, vector_ole, unblinding }
    }
}

/// Alice's side of connection setup: accept the peer on all three ports
/// concurrently, each with its own endianness handshake.
pub async fn alice_accept(ports: [u16; 3]) -> Result<PeerChannels<TcpStream>, ChannelError> {
    let (keys, vector_ole, unblinding) = tokio::try_join!(
        crate::net::listen_for_peer(ports[0]),
        crate::net::listen_for_peer(ports[1]),
        crate::net::listen_for_peer(ports[2]),
    )?;
    Ok(PeerChannels::new(keys, vector_ole, unblinding))
}

/// Bob's side of connection setup.
pub async fn bob_connect(
    addr: Ipv4Addr,
    ports: [u16; 3],
) -> Result<PeerChannels<TcpStream>, ChannelError> {
    let (keys, vector_ole, unblinding) = tokio::try_join!(
        crate::net::connect_to_peer(addr, ports[0]),
        crate::net::connect_to_peer(addr, ports[1]),
        crate::net::connect_to_peer(addr, ports[2]),
    )?;
    Ok(PeerChannels::new(keys, vector_ole, unblinding))
}

/// A batch run aborted; the variant names the channel at fault.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("bob key transfer: {0}")]
    KeyTransfer(#[source] ChannelError),
    #[error("vector OLE: {0}")]
    VectorOle(#[source] ChannelError),
    #[error("eliminating cryptographic blinding: {0}")]
    Unblinding(#[source] ChannelError),
    #[error(transparent)]
    Garble(#[from] GarbleError),
}

/// Alice's result: her output vector (from the final batch) and counters.
pub struct AliceOutcome {
    pub z: Vec<Zp>,
    pub statistics: Statistics,
}

// ---------------------------------------------------------------------------
// Alice
// ---------------------------------------------------------------------------

async fn alice_keys_task<S>(
    mut channel: Channel<S>,
    mut bob_keys: Vec<Vec<Zp>>,
) -> Result<(Channel<S>, Vec<Vec<Zp>>), ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.expect_tag(HELLO, "hello").await?;
    for keys in bob_keys.iter_mut() {
        channel.recv_elements(keys).await?;
    }
    channel.expect_tag(BYE_BYE, "bye-bye").await?;
    Ok((channel, bob_keys))
}

async fn alice_vecole_task<S>(
    mut channel: Channel<S>,
    ctx: Arc<ProtocolContext>,
    seed: Arc<Vec<Zp>>,
    mut alice_keys: Vec<Vec<Zp>>,
) -> Result<(Channel<S>, Vec<Vec<Zp>>, Statistics), ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let w = ctx.luby.input_symbol_size;
    let mut buffers = AliceOleBuffers::new(&ctx.sparse, &ctx.luby);
    let mut stats = Statistics::default();
    channel.expect_tag(HELLO, "hello").await?;
    for (i, &x) in seed.iter().enumerate() {
        let total = ctx.config.alice_encoding[i];
        let mut done = 0usize;
        while done < total {
            if alice_attempt(&mut channel, &ctx.sparse, &ctx.luby, x, &mut buffers).await? {
                let take = (total - done).min(w);
                alice_keys[i][done..done + take].copy_from_slice(&buffers.result()[..take]);
                done += take;
                stats.successful_vector_ole += 1;
            } else {
                stats.unsuccessful_vector_ole += 1;
            }
        }
    }
    channel.expect_tag(BYE_BYE, "bye-bye").await?;
    Ok((channel, alice_keys, stats))
}

async fn alice_unblinding_task<S>(
    mut channel: Channel<S>,
    ctx: Arc<ProtocolContext>,
    x: Arc<Vec<Zp>>,
    seed: Arc<Vec<Zp>>,
    mut dv: Vec<Zp>,
) -> Result<(Channel<S>, Vec<Zp>), ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.send_tag(HELLO).await?;
    // D = x − G(s), sent in the clear; G(s) already blinds x.
    ctx.graph.expand(&seed, &mut dv);
    for (d, &xv) in dv.iter_mut().zip(x.iter()) {
        *d = xv - *d;
    }
    channel.send_elements(&dv).await?;
    // v = a·D + b − c comes back in the same buffer.
    channel.recv_elements(&mut dv).await?;
    channel.expect_tag(BYE_BYE, "bye-bye").await?;
    Ok((channel, dv))
}

/// Run `batches` batch-OLEs as Alice. Returns the output of the final batch
/// (every batch reuses the same input vector `x`).
pub async fn run_alice<S>(
    ctx: Arc<ProtocolContext>,
    x: Arc<Vec<Zp>>,
    channels: PeerChannels<S>,
    batches: usize,
) -> Result<AliceOutcome, BatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let k = ctx.seed_length();
    let m = ctx.batch_length();
    let mut keys = Keys::default();
    keys.apply_configuration(&ctx.config);
    let mut surrogate = ctx.config.clone();
    let mut stats = Statistics::default();
    let mut u_vec = vec![Zp::ZERO; m];
    let mut z = vec![Zp::ZERO; m];

    let PeerChannels { keys: ch_keys, vector_ole: ch_ole, unblinding: ch_unblind } = channels;
    let mut ch_keys = Some(ch_keys);
    let mut ch_ole = Some(ch_ole);
    let mut ch_unblind = Some(ch_unblind);
    let mut dv = Some(vec![Zp::ZERO; m]);

    info!(batches, m, "executing batch OLEs");
    let started = Instant::now();
    for _ in 0..batches {
        let mut seed = vec![Zp::ZERO; k];
        Zp::fill_uniform(&mut seed, &mut StdRng::from_entropy());
        let seed = Arc::new(seed);

        let bob_keys = std::mem::take(&mut keys.bob_encoding);
        let alice_keys = std::mem::take(&mut keys.alice_encoding);

        let keys_join = tokio::spawn(alice_keys_task(
            ch_keys.take().expect("channel consumed without being restored"),
            bob_keys,
        ));
        let ole_join = tokio::spawn(alice_vecole_task(
            ch_ole.take().expect("channel consumed without being restored"),
            ctx.clone(),
            seed.clone(),
            alice_keys,
        ));
        let unblind_join = tokio::spawn(alice_unblinding_task(
            ch_unblind.take().expect("channel consumed without being restored"),
            ctx.clone(),
            x.clone(),
            seed.clone(),
            dv.take().expect("dv consumed without being restored"),
        ));
        let (keys_result, ole_result, unblind_result) =
            tokio::join!(keys_join, ole_join, unblind_join);

        let mut failure: Option<BatchError> = None;
        match keys_result.expect("key transfer task panicked") {
            Ok((channel, returned)) => {
                ch_keys = Some(channel);
                keys.bob_encoding = returned;
            }
            Err(e) => {
                error!("error on bob key transfer: {e}");
                failure.get_or_insert(BatchError::KeyTransfer(e));
            }
        }
        match ole_result.expect("vector-OLE task panicked") {
            Ok((channel, returned, batch_stats)) => {
                ch_ole = Some(channel);
                keys.alice_encoding = returned;
                stats.successful_vector_ole += batch_stats.successful_vector_ole;
                stats.unsuccessful_vector_ole += batch_stats.unsuccessful_vector_ole;
            }
            Err(e) => {
                error!("error on vector OLE: {e}");
                failure.get_or_insert(BatchError::VectorOle(e));
            }
        }
        match unblind_result.expect("unblinding task panicked") {
            Ok((channel, returned)) => {
                ch_unblind = Some(channel);
                dv = Some(returned);
            }
            Err(e) => {
                error!("error on eliminating cryptographic blinding: {e}");
                failure.get_or_insert(BatchError::Unblinding(e));
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        // All of Bob's keys are in; decode u and strip the blinding.
        surrogate.reset_preserve_configuration();
        garble::ungarble(&ctx.circuit, &mut surrogate, &keys, &mut u_vec)?;
        let dv_ref = dv.as_ref().expect("dv consumed without being restored");
        for ((z_slot, &u), &v) in z.iter_mut().zip(&u_vec).zip(dv_ref) {
            *z_slot = u + v;
        }
    }
    stats.total_time = started.elapsed();
    info!("finished executing batch OLEs");
    Ok(AliceOutcome { z, statistics: stats })
}

// ---------------------------------------------------------------------------
// Bob
// ---------------------------------------------------------------------------

/// Elements buffered per send on the key stream.
const KEY_BUFFER_LEN: usize = 1 << 21;

async fn bob_keys_task<S>(
    mut channel: Channel<S>,
    ctx: Arc<ProtocolContext>,
    keypairs: Arc<KeyPairs>,
    a: Arc<Vec<Zp>>,
    c: Arc<Vec<Zp>>,
) -> Result<Channel<S>, ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.send_tag(HELLO).await?;
    let m = ctx.batch_length();
    let mut buffer: Vec<Zp> = Vec::with_capacity(KEY_BUFFER_LEN.min(ctx.bob_key_length()));
    let mut index = 0usize;
    for inputs in [&a, &c] {
        for &value in inputs.iter().take(m) {
            let coefficients = &keypairs.bob_coefficient[index];
            let intercepts = &keypairs.bob_intercept[index];
            for (&coef, &inte) in coefficients.iter().zip(intercepts) {
                if buffer.len() == KEY_BUFFER_LEN {
                    channel.send_elements(&buffer).await?;
                    buffer.clear();
                }
                buffer.push(coef * value + inte);
            }
            index += 1;
        }
    }
    channel.send_elements(&buffer).await?;
    channel.send_tag(BYE_BYE).await?;
    Ok(channel)
}

async fn bob_vecole_task<S>(
    mut channel: Channel<S>,
    ctx: Arc<ProtocolContext>,
    keypairs: Arc<KeyPairs>,
) -> Result<(Channel<S>, Statistics), ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let w = ctx.luby.input_symbol_size;
    let mut buffers = BobOleBuffers::new(&ctx.sparse, &ctx.luby);
    let mut rng = StdRng::from_entropy();
    let mut stats = Statistics::default();
    channel.send_tag(HELLO).await?;
    for i in 0..ctx.seed_length() {
        let coefficients = &keypairs.alice_coefficient[i];
        let intercepts = &keypairs.alice_intercept[i];
        let total = coefficients.len();
        let mut done = 0usize;
        while done < total {
            let take = (total - done).min(w);
            let delivered = bob_attempt(
                &mut channel,
                &ctx.sparse,
                &ctx.luby,
                &coefficients[done..done + take],
                &intercepts[done..done + take],
                &mut buffers,
                &mut rng,
            )
            .await?;
            if delivered {
                done += take;
                stats.successful_vector_ole += 1;
            } else {
                stats.unsuccessful_vector_ole += 1;
            }
        }
    }
    channel.send_tag(BYE_BYE).await?;
    Ok((channel, stats))
}

async fn bob_unblinding_task<S>(
    mut channel: Channel<S>,
    a: Arc<Vec<Zp>>,
    b: Arc<Vec<Zp>>,
    c: Arc<Vec<Zp>>,
    mut dv: Vec<Zp>,
) -> Result<(Channel<S>, Vec<Zp>), ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.expect_tag(HELLO, "hello").await?;
    channel.recv_elements(&mut dv).await?;
    for (i, slot) in dv.iter_mut().enumerate() {
        *slot = a[i] * *slot + (b[i] - c[i]);
    }
    channel.send_elements(&dv).await?;
    channel.send_tag(BYE_BYE).await?;
    Ok((channel, dv))
}

/// Run `batches` batch-OLEs as Bob.
pub async fn run_bob<S>(
    ctx: Arc<ProtocolContext>,
    a: Arc<Vec<Zp>>,
    b: Arc<Vec<Zp>>,
    channels: PeerChannels<S>,
    batches: usize,
) -> Result<Statistics, BatchError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let m = ctx.batch_length();
    let mut keypairs = KeyPairs::default();
    keypairs.apply_configuration(&ctx.config);
    let mut surrogate = ctx.config.clone();
    let mut stats = Statistics::default();

    let PeerChannels { keys: ch_keys, vector_ole: ch_ole, unblinding: ch_unblind } = channels;
    let mut ch_keys = Some(ch_keys);
    let mut ch_ole = Some(ch_ole);
    let mut ch_unblind = Some(ch_unblind);
    let mut dv = Some(vec![Zp::ZERO; m]);

    info!(batches, m, "executing batch OLEs");
    let started = Instant::now();
    for _ in 0..batches {
        // Sample c on the blocking pool while garbling runs here.
        let c_sampling = tokio::task::spawn_blocking(move || {
            let mut rng = StdRng::from_entropy();
            let mut c = vec![Zp::ZERO; m];
            Zp::fill_uniform(&mut c, &mut rng);
            c
        });
        surrogate.reset_preserve_configuration();
        garble::garble(&ctx.circuit, &mut surrogate, &mut keypairs, &mut StdRng::from_entropy())?;
        let c = Arc::new(c_sampling.await.expect("sampler task panicked"));
        let keypairs_shared = Arc::new(std::mem::take(&mut keypairs));

        let keys_join = tokio::spawn(bob_keys_task(
            ch_keys.take().expect("channel consumed without being restored"),
            ctx.clone(),
            keypairs_shared.clone(),
            a.clone(),
            c.clone(),
        ));
        let ole_join = tokio::spawn(bob_vecole_task(
            ch_ole.take().expect("channel consumed without being restored"),
            ctx.clone(),
            keypairs_shared.clone(),
        ));
        let unblind_join = tokio::spawn(bob_unblinding_task(
            ch_unblind.take().expect("channel consumed without being restored"),
            a.clone(),
            b.clone(),
            c.clone(),
            dv.take().expect("dv consumed without being restored"),
        ));
        let (keys_result, ole_result, unblind_result) =
            tokio::join!(keys_join, ole_join, unblind_join);

        keypairs = Arc::try_unwrap(keypairs_shared)
            .ok()
            .expect("key pairs still referenced after batch join");

        let mut failure: Option<BatchError> = None;
        match keys_result.expect("key transfer task panicked") {
            Ok(channel) => ch_keys = Some(channel),
            Err(e) => {
                error!("error on bob key transfer: {e}");
                failure.get_or_insert(BatchError::KeyTransfer(e));
            }
        }
        match ole_result.expect("vector-OLE task panicked") {
            Ok((channel, batch_stats)) => {
                ch_ole = Some(channel);
                stats.successful_vector_ole += batch_stats.successful_vector_ole;
                stats.unsuccessful_vector_ole += batch_stats.unsuccessful_vector_ole;
            }
            Err(e) => {
                error!("error on vector OLE: {e}");
                failure.get_or_insert(BatchError::VectorOle(e));
            }
        }
        match unblind_result.expect("unblinding task panicked") {
            Ok((channel, returned)) => {
                ch_unblind = Some(channel);
                dv = Some(returned);
            }
            Err(e) => {
                error!("error on eliminating cryptographic blinding: {e}");
                failure.get_or_insert(BatchError::Unblinding(e));
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
    }
    stats.total_time = started.elapsed();
    info!("finished executing batch OLEs");
    Ok(stats)
}
