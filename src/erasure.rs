//! Exact-`k` uniform erasure
//!
//! Clears exactly `count` still-set positions of a boolean keep-mask, chosen
//! uniformly without replacement. The rejection strategy needs no side
//! storage and never touches positions outside the mask; its expected cost
//! is `O(n log n / (n − k))` draws, which is cheap at the erasure fractions
//! the protocol uses (one quarter of the codeword).

use rand::Rng;

/// Erase exactly `count` positions from `not_erased`, each chosen uniformly
/// among the positions that are still `true`.
///
/// `count` must not exceed the number of set positions; otherwise the
/// rejection loop cannot terminate.
pub fn erase_subset_exact<R: Rng + ?Sized>(not_erased: &mut [bool], count: usize, rng: &mut R) {
    debug_assert!(
        count <= not_erased.iter().filter(|&&kept| kept).count(),
        "cannot erase more positions than are set"
    );
    let n = not_erased.len();
    let mut remaining = count;
    while remaining != 0 {
        let candidate = rng.gen_range(0..n);
        if not_erased[candidate] {
            not_erased[candidate] = false;
            remaining -= 1;
        }
    }
}
