//! Vector Oblivious Linear Evaluation
//!
//! One roundtrip realizing `(Alice: x, Bob: a, b) → (Alice: x·a + b)` for a
//! scalar `x` and length-`w` vectors, over the composite codeword of the
//! sparse code (upper `u` symbols) and the LT code (lower `v` symbols):
//!
//! 1. Bob encodes `(r, a)` with a quarter of each part erased, overwrites
//!    the erased positions with uniform noise and sends the result.
//! 2. Alice multiplies by `x`, adds a fresh encoding of `(r', b')` on top
//!    and sends it back twice, because the second copy stands in for a
//!    real oblivious transfer (a correctness-preserving but **non-secure**
//!    placeholder; a hardened deployment replaces it with an OT).
//! 3. Bob recovers `x·r + r'` from the kept upper symbols by Gaussian
//!    elimination, strips it from the lower symbols and peels the LT code
//!    to get `x·a + b'`. On any decode failure he reports it and both sides
//!    retry the whole exchange with fresh randomness.
//! 4. Bob returns `x·a + b' + b`; Alice subtracts her `b'`.
//!
//! Both sides overlap their random-vector sampling with the socket wait via
//! blocking-pool helpers, matching the driver's concurrency model.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use crate::erasure::erase_subset_exact;
use crate::field::Zp;
use crate::luby::LtCode;
use crate::net::{Channel, ChannelError, VEC_OLE_FAIL, VEC_OLE_SUCCESS};
use crate::sparse::FastSparseLinearCode;

/// Sample a uniform vector on the blocking pool while the caller waits on
/// the socket.
fn sample_uniform_vector(len: usize) -> JoinHandle<Vec<Zp>> {
    tokio::task::spawn_blocking(move || {
        let mut rng = StdRng::from_entropy();
        let mut out = vec![Zp::ZERO; len];
        Zp::fill_uniform(&mut out, &mut rng);
        out
    })
}

/// Alice-side reusable buffers for one vector-OLE channel.
pub struct AliceOleBuffers {
    /// The `u + v` codeword in flight.
    codeword: Vec<Zp>,
    /// Bob's final message; holds `x·a + b` after a successful attempt.
    message: Vec<Zp>,
}

impl AliceOleBuffers {
    pub fn new(sparse: &FastSparseLinearCode, luby: &LtCode) -> Self {
        AliceOleBuffers {
            codeword: vec![Zp::ZERO; sparse.u + sparse.v],
            message: vec![Zp::ZERO; luby.input_symbol_size],
        }
    }

    /// The result of the last successful attempt: `x·a + b`, length `w`.
    pub fn result(&self) -> &[Zp] {
        &self.message
    }
}

/// Run one attempt as Alice. Returns `Ok(true)` when Bob decoded and
/// [`AliceOleBuffers::result`] holds `x·a + b`; `Ok(false)` asks the caller
/// to retry the same attempt with fresh randomness.
pub async fn alice_attempt<S>(
    channel: &mut Channel<S>,
    sparse: &FastSparseLinearCode,
    luby: &LtCode,
    x: Zp,
    buffers: &mut AliceOleBuffers,
) -> Result<bool, ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let u = sparse.u;
    let w = luby.input_symbol_size;

    // Sample r' and b' while E(r,a)+e is in flight.
    let sampled_r = sample_uniform_vector(sparse.k);
    let sampled_b = sample_uniform_vector(w);
    channel.recv_elements(&mut buffers.codeword).await?;

    // x·(E(r,a)+e), then + E(r',b') on top: E(xr+r', xa+b') + x·e.
    for e in &mut buffers.codeword {
        *e *= x;
    }
    let r_prime = sampled_r.await.expect("sampler task panicked");
    sparse.encode_both_parts(&mut buffers.codeword, std::iter::repeat(true), &r_prime);
    let b_prime = sampled_b.await.expect("sampler task panicked");
    luby.encode(&mut buffers.codeword[u..], std::iter::repeat(true), &b_prime);

    // Emulated OT: the first copy is the decoy Bob discards unread.
    channel.send_elements(&buffers.codeword).await?;
    channel.send_elements(&buffers.codeword).await?;

    match channel.recv_tag().await? {
        VEC_OLE_FAIL => Ok(false),
        VEC_OLE_SUCCESS => {
            channel.recv_elements(&mut buffers.message).await?;
            for (m, bp) in buffers.message.iter_mut().zip(&b_prime) {
                *m -= *bp;
            }
            Ok(true)
        }
        _ => Err(ChannelError::BadTag("vector-OLE status")),
    }
}

/// Bob-side reusable buffers for one vector-OLE channel.
pub struct BobOleBuffers {
    codeword: Vec<Zp>,
    /// The `a` chunk padded to `w`; the decode target afterwards.
    message: Vec<Zp>,
    not_noisy: Vec<bool>,
    solved: Vec<bool>,
    /// Scratch for the Gaussian elimination.
    matrix: Vec<Zp>,
    /// Decoding clone; the pristine LT code is never consumed.
    surrogate: LtCode,
}

impl BobOleBuffers {
    pub fn new(sparse: &FastSparseLinearCode, luby: &LtCode) -> Self {
        BobOleBuffers {
            codeword: vec![Zp::ZERO; sparse.u + sparse.v],
            message: vec![Zp::ZERO; luby.input_symbol_size],
            not_noisy: vec![true; sparse.u + sparse.v],
            solved: vec![false; luby.input_symbol_size],
            matrix: vec![Zp::ZERO; sparse.u * (sparse.k + 1)],
            surrogate: LtCode::default(),
        }
    }
}

/// Run one attempt as Bob with inputs `a = a_chunk` and `b = b_chunk`
/// (zero-padded to `w` when the chunk is short). Returns `Ok(true)` after a
/// successful decode-and-reply, `Ok(false)` after reporting a decode
/// failure to Alice.
pub async fn bob_attempt<S, R>(
    channel: &mut Channel<S>,
    sparse: &FastSparseLinearCode,
    luby: &LtCode,
    a_chunk: &[Zp],
    b_chunk: &[Zp],
    buffers: &mut BobOleBuffers,
    rng: &mut R,
) -> Result<bool, ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: Rng + Send,
{
    let u = sparse.u;
    let v = sparse.v;
    let w = luby.input_symbol_size;

    let sampled_r = sample_uniform_vector(sparse.k);

    // The erasure pattern e: a quarter of each codeword part.
    buffers.not_noisy.fill(true);
    erase_subset_exact(&mut buffers.not_noisy[..u], u / 4, rng);
    erase_subset_exact(&mut buffers.not_noisy[u..], v / 4, rng);

    buffers.codeword.fill(Zp::ZERO);
    // Stale tail data must not leak into the codeword.
    buffers.message[..a_chunk.len()].copy_from_slice(a_chunk);
    buffers.message[a_chunk.len()..].fill(Zp::ZERO);

    let mut r = sampled_r.await.expect("sampler task panicked");
    sparse.encode_both_parts(&mut buffers.codeword, buffers.not_noisy.iter().copied(), &r);
    luby.encode(
        &mut buffers.codeword[u..],
        buffers.not_noisy[u..].iter().copied(),
        &buffers.message,
    );
    for (e, &kept) in buffers.codeword.iter_mut().zip(&buffers.not_noisy) {
        if !kept {
            *e = Zp::uniform(rng);
        }
    }

    channel.send_elements(&buffers.codeword).await?;
    // Emulated OT: discard the decoy copy.
    channel.skip_elements(u + v).await?;
    channel.recv_elements(&mut buffers.codeword).await?;

    // Phase 1: xr + r' from the kept upper symbols.
    buffers.matrix.fill(Zp::ZERO);
    let upper_ok = sparse.decode_from_upper_part_destructive(
        &buffers.codeword[..u],
        &buffers.not_noisy[..u],
        &mut r,
        &mut buffers.matrix,
    );
    if !upper_ok {
        channel.send_tag(VEC_OLE_FAIL).await?;
        return Ok(false);
    }

    // Phase 2: strip E(xr+r', 0) from the lower symbols, then peel.
    for z in &mut r {
        *z = -*z;
    }
    sparse.encode_lower_part(
        &mut buffers.codeword[u..],
        buffers.not_noisy[u..].iter().copied(),
        &r,
    );
    buffers.solved.fill(false);
    buffers.surrogate.clone_from(luby);
    let (codeword_lower, not_noisy_lower) = (&mut buffers.codeword[u..], &buffers.not_noisy[u..]);
    let lower_ok = buffers.surrogate.decode_destructive(
        &mut buffers.solved,
        &mut buffers.message,
        not_noisy_lower,
        codeword_lower,
    );
    if !lower_ok {
        channel.send_tag(VEC_OLE_FAIL).await?;
        return Ok(false);
    }

    channel.send_tag(VEC_OLE_SUCCESS).await?;
    for (m, &bv) in buffers.message.iter_mut().zip(b_chunk) {
        *m += bv;
    }
    channel.send_elements(&buffers.message[..w]).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::luby::{create_lt_code, RobustSolitonDistribution};
    use crate::net::Channel;

    fn test_codes(rng: &mut StdRng) -> (FastSparseLinearCode, LtCode) {
        let dist = RobustSolitonDistribution::new(256, 0.9, 0.01);
        let luby = create_lt_code(&dist, rng);
        let mut sparse = FastSparseLinearCode {
            k: 16,
            d: 8,
            u: 24,
            v: luby.output_symbol_size(),
            entries: Vec::new(),
        };
        sparse.resample(rng);
        (sparse, luby)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn vector_ole_delivers_xa_plus_b() {
        let mut rng = StdRng::seed_from_u64(100);
        let (sparse, luby) = test_codes(&mut rng);
        let w = luby.input_symbol_size;

        let x = Zp::uniform(&mut rng);
        let mut a = vec![Zp::ZERO; w];
        Zp::fill_uniform(&mut a, &mut rng);
        let mut b = vec![Zp::ZERO; w];
        Zp::fill_uniform(&mut b, &mut rng);

        let (alice_stream, bob_stream) = tokio::io::duplex(1 << 20);
        let (sparse_b, luby_b) = (sparse.clone(), luby.clone());
        let (a_b, b_b) = (a.clone(), b.clone());

        let bob = tokio::spawn(async move {
            let mut channel = Channel::new(bob_stream);
            let mut buffers = BobOleBuffers::new(&sparse_b, &luby_b);
            let mut rng = StdRng::from_entropy();
            loop {
                let done = bob_attempt(
                    &mut channel, &sparse_b, &luby_b, &a_b, &b_b, &mut buffers, &mut rng,
                )
                .await
                .unwrap();
                if done {
                    break;
                }
            }
        });

        let mut channel = Channel::new(alice_stream);
        let mut buffers = AliceOleBuffers::new(&sparse, &luby);
        let mut result = vec![Zp::ZERO; w];
        loop {
            if alice_attempt(&mut channel, &sparse, &luby, x, &mut buffers).await.unwrap() {
                result.copy_from_slice(buffers.result());
                break;
            }
        }
        bob.await.unwrap();

        for i in 0..w {
            assert_eq!(result[i], x * a[i] + b[i], "mismatch at {i}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn short_chunks_are_zero_padded() {
        let mut rng = StdRng::seed_from_u64(101);
        let (sparse, luby) = test_codes(&mut rng);
        let w = luby.input_symbol_size;
        let chunk = w / 3;

        let x = Zp::uniform(&mut rng);
        let mut a = vec![Zp::ZERO; chunk];
        Zp::fill_uniform(&mut a, &mut rng);
        let mut b = vec![Zp::ZERO; chunk];
        Zp::fill_uniform(&mut b, &mut rng);

        let (alice_stream, bob_stream) = tokio::io::duplex(1 << 20);
        let (sparse_b, luby_b) = (sparse.clone(), luby.clone());
        let (a_b, b_b) = (a.clone(), b.clone());

        let bob = tokio::spawn(async move {
            let mut channel = Channel::new(bob_stream);
            let mut buffers = BobOleBuffers::new(&sparse_b, &luby_b);
            let mut rng = StdRng::from_entropy();
            while !bob_attempt(
                &mut channel, &sparse_b, &luby_b, &a_b, &b_b, &mut buffers, &mut rng,
            )
            .await
            .unwrap()
            {}
        });

        let mut channel = Channel::new(alice_stream);
        let mut buffers = AliceOleBuffers::new(&sparse, &luby);
        while !alice_attempt(&mut channel, &sparse, &luby, x, &mut buffers).await.unwrap() {}
        bob.await.unwrap();

        for i in 0..chunk {
            assert_eq!(buffers.result()[i], x * a[i] + b[i]);
        }
    }
}
