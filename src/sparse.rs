//! Fast sparse linear code over `Z_p`
//!
//! A random matrix with `u + v` rows of exactly `d` nonzero entries each,
//! over `k` columns. The upper `u` rows form an erasure-decodable code (by
//! Gaussian elimination on the kept rows); the lower `v` rows extend the
//! codeword so the partner LT code can ride on top of it. Entries are stored
//! flattened, `d` per row, upper rows first.

use std::collections::BTreeSet;
use std::io::{self, Write};

use rand::Rng;

use crate::field::Zp;
use crate::textio::{TextError, TokenStream};

/// One nonzero matrix entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SparseEntry {
    pub column: u32,
    pub value: Zp,
}

/// The code: parameters and the flattened entry table of length
/// `(u + v) · d`. Every row has `d` distinct columns.
#[derive(Clone, Debug, Default)]
pub struct FastSparseLinearCode {
    pub k: usize,
    pub d: usize,
    pub u: usize,
    pub v: usize,
    pub entries: Vec<SparseEntry>,
}

fn encode_rows<I>(d: usize, entries: &[SparseEntry], encoded: &mut [Zp], not_noisy: I, decoded: &[Zp])
where
    I: IntoIterator<Item = bool>,
{
    let mut cursor = 0usize;
    for (e, kept) in encoded.iter_mut().zip(not_noisy) {
        if kept {
            for entry in &entries[cursor..cursor + d] {
                *e += entry.value * decoded[entry.column as usize];
            }
        }
        // The cursor advances past skipped rows too.
        cursor += d;
    }
}

impl FastSparseLinearCode {
    /// Redraw every entry: per row, `d` distinct uniform columns with
    /// uniform nonzero values.
    pub fn resample<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.entries.clear();
        self.entries.reserve((self.u + self.v) * self.d);
        let mut dedup = BTreeSet::new();
        for _ in 0..self.u + self.v {
            dedup.clear();
            for _ in 0..self.d {
                let column = loop {
                    let candidate = rng.gen_range(0..self.k as u32);
                    if dedup.insert(candidate) {
                        break candidate;
                    }
                };
                self.entries.push(SparseEntry { column, value: Zp::uniform_nonzero(rng) });
            }
        }
    }

    /// Accumulate all `u + v` codeword rows of `decoded` into `encoded`,
    /// skipping rows whose keep flag is false.
    pub fn encode_both_parts<I>(&self, encoded: &mut [Zp], not_noisy: I, decoded: &[Zp])
    where
        I: IntoIterator<Item = bool>,
    {
        debug_assert_eq!(encoded.len(), self.u + self.v);
        encode_rows(self.d, &self.entries, encoded, not_noisy, decoded);
    }

    /// The restriction of [`Self::encode_both_parts`] to the upper `u` rows.
    pub fn encode_upper_part<I>(&self, encoded: &mut [Zp], not_noisy: I, decoded: &[Zp])
    where
        I: IntoIterator<Item = bool>,
    {
        debug_assert_eq!(encoded.len(), self.u);
        encode_rows(self.d, &self.entries[..self.u * self.d], encoded, not_noisy, decoded);
    }

    /// The restriction to the lower `v` rows.
    pub fn encode_lower_part<I>(&self, encoded: &mut [Zp], not_noisy: I, decoded: &[Zp])
    where
        I: IntoIterator<Item = bool>,
    {
        debug_assert_eq!(encoded.len(), self.v);
        encode_rows(self.d, &self.entries[self.u * self.d..], encoded, not_noisy, decoded);
    }

    /// Recover the `k` message symbols from the kept upper codeword
    /// positions by Gaussian elimination.
    ///
    /// `matrix` is the caller's scratch for the augmented system and must
    /// hold at least `(#kept rows) · (k + 1)` zeroed elements. Returns false
    /// when fewer than `k` rows survive or the system is singular.
    pub fn decode_from_upper_part_destructive(
        &self,
        encoded: &[Zp],
        not_noisy: &[bool],
        decoded: &mut [Zp],
        matrix: &mut [Zp],
    ) -> bool {
        let k = self.k;
        let cols = k + 1;
        let mut valid_rows = 0usize;
        let mut cursor = 0usize;
        for row in 0..self.u {
            if not_noisy[row] {
                let base = valid_rows * cols;
                for entry in &self.entries[cursor..cursor + self.d] {
                    matrix[base + entry.column as usize] += entry.value;
                }
                matrix[base + k] += encoded[row];
                valid_rows += 1;
            }
            cursor += self.d;
        }
        if valid_rows < k {
            return false;
        }

        // Forward elimination to row echelon form.
        for pivot in 0..k {
            if matrix[pivot * cols + pivot].is_zero() {
                let swap_with = (pivot + 1..valid_rows)
                    .find(|&row| !matrix[row * cols + pivot].is_zero());
                match swap_with {
                    Some(row) => {
                        for col in 0..cols {
                            matrix.swap(pivot * cols + col, row * cols + col);
                        }
                    }
                    None => return false,
                }
            }
            let inv = match matrix[pivot * cols + pivot].inverse() {
                Some(inv) => inv,
                None => return false,
            };
            for col in pivot..cols {
                matrix[pivot * cols + col] *= inv;
            }
            if pivot + 1 == k {
                break;
            }
            for row in pivot + 1..valid_rows {
                if !matrix[row * cols + pivot].is_zero() {
                    let leading = matrix[row * cols + pivot];
                    for col in pivot + 1..cols {
                        let pivot_value = matrix[pivot * cols + col];
                        matrix[row * cols + col] -= leading * pivot_value;
                    }
                    matrix[row * cols + pivot] = Zp::ZERO;
                }
            }
        }

        // Back substitution on the augmented column.
        for pivot in (1..k).rev() {
            for row in (0..pivot).rev() {
                if !matrix[row * cols + pivot].is_zero() {
                    let coefficient = matrix[row * cols + pivot];
                    let solved = matrix[pivot * cols + k];
                    matrix[row * cols + k] -= coefficient * solved;
                }
            }
        }

        for (i, slot) in decoded.iter_mut().enumerate().take(k) {
            *slot = matrix[i * cols + k];
        }
        true
    }

    /// [`Self::decode_from_upper_part_destructive`] with self-managed
    /// scratch storage.
    pub fn decode_from_upper_part(
        &self,
        encoded: &[Zp],
        not_noisy: &[bool],
        decoded: &mut [Zp],
    ) -> bool {
        let mut matrix = vec![Zp::ZERO; self.u * (self.k + 1)];
        self.decode_from_upper_part_destructive(encoded, not_noisy, decoded, &mut matrix)
    }

    /// Serialize: `k d u v count`, then one `(column, value)` record per
    /// entry.
    pub fn save_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(
            w,
            "{} {} {} {} {}",
            self.k,
            self.d,
            self.u,
            self.v,
            self.entries.len()
        )?;
        for entry in &self.entries {
            writeln!(w, "{} {}", entry.column, entry.value)?;
        }
        Ok(())
    }

    /// Deserialize a code saved by [`Self::save_to`].
    pub fn load_from(ts: &mut TokenStream) -> Result<FastSparseLinearCode, TextError> {
        let k = ts.next_usize()?;
        let d = ts.next_usize()?;
        let u = ts.next_usize()?;
        let v = ts.next_usize()?;
        let count = ts.next_usize()?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let column = ts.next_u64()? as u32;
            let value = ts.next_zp()?;
            entries.push(SparseEntry { column, value });
        }
        Ok(FastSparseLinearCode { k, d, u, v, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erasure::erase_subset_exact;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_code(rng: &mut StdRng) -> FastSparseLinearCode {
        let mut code = FastSparseLinearCode { k: 16, d: 8, u: 24, v: 40, entries: Vec::new() };
        code.resample(rng);
        code
    }

    #[test]
    fn resample_shape() {
        let mut rng = StdRng::seed_from_u64(50);
        let code = test_code(&mut rng);
        assert_eq!(code.entries.len(), (code.u + code.v) * code.d);
        for row in code.entries.chunks(code.d) {
            let columns: BTreeSet<u32> = row.iter().map(|e| e.column).collect();
            assert_eq!(columns.len(), code.d, "row columns must be distinct");
            for entry in row {
                assert!((entry.column as usize) < code.k);
                assert!(!entry.value.is_zero());
            }
        }
    }

    #[test]
    fn two_phase_roundtrip() {
        let mut rng = StdRng::seed_from_u64(51);
        let code = test_code(&mut rng);
        let (k, u, v) = (code.k, code.u, code.v);
        let mut successes = 0usize;
        for _ in 0..20 {
            let mut not_noisy = vec![true; u + v];
            erase_subset_exact(&mut not_noisy[..u], u / 4, &mut rng);
            erase_subset_exact(&mut not_noisy[u..], v / 4, &mut rng);
            let (upper_mask, lower_mask) = not_noisy.split_at(u);
            let mut plain = vec![Zp::ZERO; k];
            Zp::fill_uniform(&mut plain, &mut rng);

            let mut encoded = vec![Zp::ZERO; u + v];
            code.encode_both_parts(&mut encoded, not_noisy.iter().copied(), &plain);

            let mut decoded = vec![Zp::ZERO; k];
            if !code.decode_from_upper_part(&encoded[..u], upper_mask, &mut decoded) {
                continue;
            }
            assert_eq!(decoded, plain, "phase 1 must return the message");

            // Phase 2: re-encoding the negated message cancels every kept
            // lower position.
            for z in &mut decoded {
                *z = -*z;
            }
            code.encode_lower_part(&mut encoded[u..], lower_mask.iter().copied(), &decoded);
            for (e, &kept) in encoded[u..].iter().zip(lower_mask) {
                if kept {
                    assert!(e.is_zero(), "phase 2 must derandomize kept lower rows");
                }
            }
            successes += 1;
        }
        assert!(successes >= 15, "only {successes}/20 decodes succeeded");
    }

    #[test]
    fn all_noisy_encode_is_zero() {
        let mut rng = StdRng::seed_from_u64(52);
        let code = test_code(&mut rng);
        let mut plain = vec![Zp::ZERO; code.k];
        Zp::fill_uniform(&mut plain, &mut rng);
        let mut encoded = vec![Zp::ZERO; code.u + code.v];
        code.encode_both_parts(&mut encoded, std::iter::repeat(false), &plain);
        assert!(encoded.iter().all(|e| e.is_zero()));
    }

    #[test]
    fn decode_fails_with_too_few_rows() {
        let mut rng = StdRng::seed_from_u64(53);
        let code = test_code(&mut rng);
        let encoded = vec![Zp::ZERO; code.u];
        // Keep fewer rows than k.
        let mut not_noisy = vec![false; code.u];
        for flag in not_noisy.iter_mut().take(code.k - 1) {
            *flag = true;
        }
        let mut decoded = vec![Zp::ZERO; code.k];
        assert!(!code.decode_from_upper_part(&encoded, &not_noisy, &mut decoded));
    }

    #[test]
    fn persistence_round_trip() {
        let mut rng = StdRng::seed_from_u64(54);
        let code = test_code(&mut rng);
        let mut buf = Vec::new();
        code.save_to(&mut buf).unwrap();
        let mut ts = TokenStream::from_reader(buf.as_slice()).unwrap();
        let reloaded = FastSparseLinearCode::load_from(&mut ts).unwrap();
        assert_eq!(reloaded.k, code.k);
        assert_eq!(reloaded.d, code.d);
        assert_eq!(reloaded.u, code.u);
        assert_eq!(reloaded.v, code.v);
        assert_eq!(reloaded.entries, code.entries);
    }
}
