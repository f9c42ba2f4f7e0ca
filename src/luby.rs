//! Luby Transform code under the robust soliton distribution
//!
//! The LT code is the lower half of the vector-OLE codeword: `w` cleartext
//! symbols are expanded into `v` output symbols, each the sum of a small,
//! degree-distributed subset of the inputs. Encoding is additive (it
//! accumulates on top of whatever the caller already wrote, so it can stack
//! on another code's output) and gated per position by a keep-mask.
//!
//! Decoding is the classic two-round peeling process and is *destructive*:
//! it consumes the bins and storage of the code it runs on, so callers keep
//! a pristine copy and decode on a clone ([`LtCode::clone_from`] reuses the
//! clone's allocations across decode passes).
//!
//! ## Degree distribution
//!
//! [`RobustSolitonDistribution`] caches the derived quantities `R`, `k/R`,
//! `β` and the output symbol count `v = round(k·β)` rounded up to a multiple
//! of four. Edit `k`, `c` or `δ`, then call
//! [`RobustSolitonDistribution::invalidate_cache`] before reading them.

use std::collections::BTreeSet;
use std::io::{self, Write};

use rand::Rng;

use crate::field::Zp;
use crate::textio::{self, TextError, TokenStream};

/// The robust soliton distribution μ of Luby's LT codes.
#[derive(Clone, Debug)]
pub struct RobustSolitonDistribution {
    /// `k`: the number of input symbols (`w` in the vector-OLE).
    pub input_symbol_size: usize,
    /// The constant `c` of the robust part.
    pub c: f64,
    /// The failure-probability target `δ`.
    pub delta: f64,
    r_cached: f64,
    k_over_r_cached: usize,
    beta_cached: f64,
    output_symbol_size_cached: usize,
}

impl RobustSolitonDistribution {
    /// Build a distribution and prime its cache.
    pub fn new(input_symbol_size: usize, c: f64, delta: f64) -> Self {
        let mut dist = RobustSolitonDistribution {
            input_symbol_size,
            c,
            delta,
            r_cached: 0.0,
            k_over_r_cached: 0,
            beta_cached: 0.0,
            output_symbol_size_cached: 0,
        };
        dist.invalidate_cache();
        dist
    }

    /// Recompute the cached quantities after `k`, `c` or `δ` changed.
    pub fn invalidate_cache(&mut self) {
        let k = self.input_symbol_size as f64;
        self.r_cached = self.c * (k / self.delta).ln() * k.sqrt();
        self.k_over_r_cached = (k / self.r_cached + 0.5) as usize;
        let mut beta = (self.r_cached / self.delta).ln();
        for i in (1..self.k_over_r_cached).rev() {
            beta += 1.0 / i as f64;
        }
        self.beta_cached = 1.0 + beta * self.r_cached / k;
        let mut v = (k * self.beta_cached + 0.5) as usize;
        v += (4 - (v & 3)) & 3;
        self.output_symbol_size_cached = v;
    }

    /// `v`: the number of output symbols, a multiple of 4.
    #[inline]
    pub fn output_symbol_size(&self) -> usize {
        self.output_symbol_size_cached
    }

    /// The ideal soliton component ρ(i); `i` is 1-based.
    pub fn rho(&self, i: usize) -> f64 {
        if i == 1 {
            1.0 / self.input_symbol_size as f64
        } else if i > self.input_symbol_size {
            0.0
        } else {
            1.0 / i as f64 / (i - 1) as f64
        }
    }

    /// The robust addition τ(i).
    pub fn tau(&self, i: usize) -> f64 {
        let k = self.input_symbol_size as f64;
        if i < self.k_over_r_cached {
            self.r_cached / i as f64 / k
        } else if i > self.k_over_r_cached {
            0.0
        } else {
            self.r_cached * (self.r_cached / self.delta).ln() / k
        }
    }

    /// The normalized distribution μ(i) = (ρ(i) + τ(i)) / β.
    pub fn mu(&self, i: usize) -> f64 {
        (self.rho(i) + self.tau(i)) / self.beta_cached
    }

    /// Invert the CDF of μ at `r ∈ [0, 1]`: walk the cumulative sum until it
    /// meets `r`. Clamps to 1 below and to `k` above.
    pub fn sample_degree(&self, r: f64) -> usize {
        if r >= 1.0 {
            return self.input_symbol_size;
        }
        if r <= 0.0 {
            return 1;
        }
        let mut degree = 0usize;
        let mut partial = 0.0;
        while partial < r && degree != self.input_symbol_size {
            degree += 1;
            partial += self.mu(degree);
        }
        degree.max(1)
    }
}

/// One output symbol: `degree` input indices starting at `index` in the
/// packed storage of the owning code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LubyBin {
    pub index: usize,
    pub degree: usize,
}

/// An LT code: `v` bins over a packed index storage.
#[derive(Clone, Debug, Default)]
pub struct LtCode {
    /// `w`: the cleartext length.
    pub input_symbol_size: usize,
    pub bins: Vec<LubyBin>,
    pub storage: Vec<usize>,
}

impl LtCode {
    /// `v`: the number of output symbols.
    #[inline]
    pub fn output_symbol_size(&self) -> usize {
        self.bins.len()
    }

    /// Accumulate the codeword of `decoded` into `encoded`, skipping
    /// positions whose `not_noisy` flag is false. `encoded` may already hold
    /// another code's output; this adds on top of it.
    pub fn encode<I>(&self, encoded: &mut [Zp], not_noisy: I, decoded: &[Zp])
    where
        I: IntoIterator<Item = bool>,
    {
        for ((bin, e), kept) in self.bins.iter().zip(encoded.iter_mut()).zip(not_noisy) {
            if kept {
                for &idx in &self.storage[bin.index..bin.index + bin.degree] {
                    *e += decoded[idx];
                }
            }
        }
    }

    /// Belief-propagation decoding under erasures. Consumes this code's bins
    /// and storage and the `encoded` buffer; run it on a clone.
    ///
    /// `solved` must come in all-false with length `w`; on success every
    /// entry is true and `decoded` holds the cleartext. Returns false when
    /// peeling stalls, in which case the caller retries with fresh randomness.
    pub fn decode_destructive(
        &mut self,
        solved: &mut [bool],
        decoded: &mut [Zp],
        not_noisy: &[bool],
        encoded: &mut [Zp],
    ) -> bool {
        let total = solved.len();
        let mut remaining = total;
        // Surviving bins live in [0..len); discarding moves the last
        // survivor into the current slot.
        let mut len = self.bins.len();
        let mut slot = 0usize;

        // Round 1: release degree-1 bins and half-solved degree-2 bins,
        // drop erased positions. The keep-mask is consumed with two cursors:
        // from the front while the previous slot was kept, from the back
        // when the previous slot was refilled from the back.
        let (mut front, mut back) = (0usize, not_noisy.len());
        let mut was_advancing = true;
        while front != back {
            let kept = if was_advancing {
                let flag = not_noisy[front];
                front += 1;
                flag
            } else {
                back -= 1;
                not_noisy[back]
            };
            let mut advance = false;
            if kept {
                let bin = self.bins[slot];
                if bin.degree == 1 {
                    let t = self.storage[bin.index];
                    if !solved[t] {
                        solved[t] = true;
                        remaining -= 1;
                        decoded[t] = encoded[slot];
                    }
                } else if bin.degree == 2 {
                    let t1 = self.storage[bin.index];
                    let t2 = self.storage[bin.index + 1];
                    if solved[t1] && !solved[t2] {
                        solved[t2] = true;
                        remaining -= 1;
                        decoded[t2] = encoded[slot] - decoded[t1];
                    } else if !solved[t1] && solved[t2] {
                        solved[t1] = true;
                        remaining -= 1;
                        decoded[t1] = encoded[slot] - decoded[t2];
                    } else if !solved[t1] && !solved[t2] {
                        advance = true;
                    }
                } else if bin.degree > 2 {
                    advance = true;
                }
            }
            if advance {
                slot += 1;
            } else {
                len -= 1;
                self.bins[slot] = self.bins[len];
                encoded[slot] = encoded[len];
            }
            was_advancing = advance;
        }

        // Round 2: repeatedly peel solved symbols out of the surviving bins
        // until a pass releases nothing new.
        let mut new_release = remaining != total;
        while new_release && remaining != 0 {
            new_release = false;
            let mut slot = 0usize;
            while slot < len {
                let begin = self.bins[slot].index;
                let mut end = begin + self.bins[slot].degree;
                let mut i = begin;
                while i < end {
                    let t = self.storage[i];
                    if solved[t] {
                        encoded[slot] -= decoded[t];
                        end -= 1;
                        self.storage[i] = self.storage[end];
                    } else {
                        i += 1;
                    }
                }
                let mut new_degree = end - begin;
                if new_degree == 1 {
                    let t = self.storage[begin];
                    solved[t] = true;
                    remaining -= 1;
                    decoded[t] = encoded[slot];
                    new_release = true;
                    new_degree = 0;
                }
                if new_degree != 0 {
                    self.bins[slot].degree = new_degree;
                    slot += 1;
                } else {
                    len -= 1;
                    self.bins[slot] = self.bins[len];
                    encoded[slot] = encoded[len];
                }
            }
        }
        remaining == 0
    }

    /// Serialize: `w v`, the `v` degrees, then one line of indices per bin.
    pub fn save_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "{} {}", self.input_symbol_size, self.bins.len())?;
        let degrees: Vec<usize> = self.bins.iter().map(|bin| bin.degree).collect();
        textio::write_usize_line(w, &degrees)?;
        for bin in &self.bins {
            textio::write_usize_line(w, &self.storage[bin.index..bin.index + bin.degree])?;
        }
        Ok(())
    }

    /// Deserialize; the packed offsets are recomputed from the degrees.
    pub fn load_from(ts: &mut TokenStream) -> Result<LtCode, TextError> {
        let input_symbol_size = ts.next_usize()?;
        let output_symbol_size = ts.next_usize()?;
        let mut bins = Vec::with_capacity(output_symbol_size);
        let mut total_degree = 0usize;
        for _ in 0..output_symbol_size {
            let degree = ts.next_usize()?;
            bins.push(LubyBin { index: total_degree, degree });
            total_degree += degree;
        }
        let mut storage = vec![0usize; total_degree];
        ts.fill_usize(&mut storage)?;
        Ok(LtCode { input_symbol_size, bins, storage })
    }
}

/// Draw a fresh LT code from the distribution: per output symbol, sample a
/// degree from μ, then that many distinct input indices.
pub fn create_lt_code<R: Rng + ?Sized>(dist: &RobustSolitonDistribution, rng: &mut R) -> LtCode {
    let k = dist.input_symbol_size;
    let v = dist.output_symbol_size();
    let mut code = LtCode {
        input_symbol_size: k,
        bins: Vec::with_capacity(v),
        storage: Vec::new(),
    };
    let mut current_bin = BTreeSet::new();
    for _ in 0..v {
        let degree = dist.sample_degree(rng.gen::<f64>());
        current_bin.clear();
        while current_bin.len() != degree {
            current_bin.insert(rng.gen_range(0..k));
        }
        code.bins.push(LubyBin { index: code.storage.len(), degree });
        code.storage.extend(current_bin.iter().copied());
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erasure::erase_subset_exact;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_distribution(k: usize) -> RobustSolitonDistribution {
        RobustSolitonDistribution::new(k, 0.9, 0.01)
    }

    #[test]
    fn cache_is_consistent() {
        let dist = test_distribution(256);
        let v = dist.output_symbol_size();
        assert_eq!(v % 4, 0);
        assert!(v > 256, "output symbols must exceed input symbols");
        // μ is a probability distribution up to rounding.
        let mass: f64 = (1..=256).map(|i| dist.mu(i)).sum();
        assert!((mass - 1.0).abs() < 0.05, "μ mass {mass} too far from 1");
    }

    #[test]
    fn sample_degree_clamps() {
        let dist = test_distribution(64);
        assert_eq!(dist.sample_degree(-1.0), 1);
        assert_eq!(dist.sample_degree(0.0), 1);
        assert_eq!(dist.sample_degree(1.0), 64);
        assert_eq!(dist.sample_degree(2.0), 64);
        for i in 0..10 {
            let d = dist.sample_degree(i as f64 / 10.0);
            assert!((1..=64).contains(&d));
        }
    }

    fn roundtrip_once(rng: &mut StdRng, erased: usize) -> bool {
        let dist = test_distribution(256);
        let code = create_lt_code(&dist, rng);
        let w = code.input_symbol_size;
        let v = code.output_symbol_size();

        let mut plain = vec![Zp::ZERO; w];
        Zp::fill_uniform(&mut plain, rng);
        let mut not_noisy = vec![true; v];
        erase_subset_exact(&mut not_noisy, erased, rng);

        let mut encoded = vec![Zp::ZERO; v];
        code.encode(&mut encoded, not_noisy.iter().copied(), &plain);

        let mut surrogate = code.clone();
        let mut solved = vec![false; w];
        let mut decoded = vec![Zp::ZERO; w];
        let ok = surrogate.decode_destructive(&mut solved, &mut decoded, &not_noisy, &mut encoded);
        if ok {
            assert_eq!(decoded, plain, "successful decode must return the cleartext");
            assert!(solved.iter().all(|&s| s));
        }
        ok
    }

    #[test]
    fn decode_without_erasures_always_succeeds() {
        let mut rng = StdRng::seed_from_u64(40);
        for _ in 0..5 {
            assert!(roundtrip_once(&mut rng, 0));
        }
    }

    #[test]
    fn decode_under_quarter_erasure_mostly_succeeds() {
        let mut rng = StdRng::seed_from_u64(41);
        let dist = test_distribution(256);
        let quarter = dist.output_symbol_size() / 4;
        let successes = (0..20).filter(|_| roundtrip_once(&mut rng, quarter)).count();
        assert!(successes >= 10, "only {successes}/20 decodes succeeded");
    }

    #[test]
    fn encode_is_additive() {
        let mut rng = StdRng::seed_from_u64(42);
        let dist = test_distribution(64);
        let code = create_lt_code(&dist, &mut rng);
        let v = code.output_symbol_size();
        let mut plain = vec![Zp::ZERO; 64];
        Zp::fill_uniform(&mut plain, &mut rng);

        let mut base = vec![Zp::ZERO; v];
        Zp::fill_uniform(&mut base, &mut rng);
        let mut stacked = base.clone();
        code.encode(&mut stacked, std::iter::repeat(true), &plain);

        let mut fresh = vec![Zp::ZERO; v];
        code.encode(&mut fresh, std::iter::repeat(true), &plain);
        for ((s, b), f) in stacked.iter().zip(&base).zip(&fresh) {
            assert_eq!(*s, *b + *f);
        }
    }

    #[test]
    fn persistence_round_trip() {
        let mut rng = StdRng::seed_from_u64(43);
        let dist = test_distribution(64);
        let code = create_lt_code(&dist, &mut rng);

        let mut buf = Vec::new();
        code.save_to(&mut buf).unwrap();
        let mut ts = TokenStream::from_reader(buf.as_slice()).unwrap();
        let reloaded = LtCode::load_from(&mut ts).unwrap();

        assert_eq!(reloaded.input_symbol_size, code.input_symbol_size);
        assert_eq!(reloaded.bins, code.bins);
        assert_eq!(reloaded.storage, code.storage);
    }
}
