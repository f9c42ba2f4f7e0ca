//! Prime field `Z_p` with `p = 2^32 − 5`
//!
//! Elements are stored as a single `u32` normalized into `[0, p)`; the
//! constructor reduces any raw word, so a [`Zp`] is a valid residue by
//! construction. All binary operations widen to `u64` before reducing, which
//! keeps the arithmetic overflow-free without a bignum dependency.
//!
//! Inversion runs the extended Euclidean algorithm on `u32` pairs, tracking
//! only the magnitude of the Bézout coefficient and recovering its sign from
//! the iteration parity. It returns `None` when the running remainder hits 0
//! before 1; for a prime modulus that only happens for the zero element,
//! which has no inverse; callers never legitimately invert zero.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use rand::Rng;

/// The modulus: the largest prime below `2^32`.
pub const P: u32 = 4_294_967_291;

/// A normalized residue modulo [`P`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Zp(u32);

impl Zp {
    /// The additive identity.
    pub const ZERO: Zp = Zp(0);
    /// The multiplicative identity.
    pub const ONE: Zp = Zp(1);

    /// Reduce a raw word into the field.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Zp(raw % P)
    }

    /// The normalized representative in `[0, p)`.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Multiplicative inverse, or `None` for zero.
    pub fn inverse(self) -> Option<Zp> {
        if self.0 == 0 {
            return None;
        }
        // Remainder sequence r_i and the magnitude of the coefficient of
        // `self` in r_i; the coefficient's sign alternates with the parity
        // of the iteration, so it never needs to be stored.
        let (mut r0, mut r1) = (P, self.0);
        let (mut c0, mut c1) = (0u64, 1u64);
        let mut negated = false;
        while r1 > 1 {
            let q = r0 / r1;
            let r2 = r0 - q * r1;
            let c2 = c0 + u64::from(q) * c1;
            r0 = r1;
            r1 = r2;
            c0 = c1;
            c1 = c2;
            negated = !negated;
            if r1 == 0 {
                return None;
            }
        }
        let c = (c1 % u64::from(P)) as u32;
        Some(if negated { Zp(P - c) } else { Zp(c) })
    }

    /// A uniform field element.
    #[inline]
    pub fn uniform<R: Rng + ?Sized>(rng: &mut R) -> Zp {
        Zp(rng.gen_range(0..P))
    }

    /// A uniform element of `Z_p \ {0}`.
    #[inline]
    pub fn uniform_nonzero<R: Rng + ?Sized>(rng: &mut R) -> Zp {
        Zp(rng.gen_range(1..P))
    }

    /// Fill a slice with uniform field elements.
    pub fn fill_uniform<R: Rng + ?Sized>(out: &mut [Zp], rng: &mut R) {
        for z in out {
            *z = Zp::uniform(rng);
        }
    }
}

impl From<u32> for Zp {
    #[inline]
    fn from(raw: u32) -> Self {
        Zp::new(raw)
    }
}

impl Add for Zp {
    type Output = Zp;
    #[inline]
    fn add(self, rhs: Zp) -> Zp {
        Zp(((u64::from(self.0) + u64::from(rhs.0)) % u64::from(P)) as u32)
    }
}

impl Sub for Zp {
    type Output = Zp;
    #[inline]
    fn sub(self, rhs: Zp) -> Zp {
        // p − b + a stays below 2^33, so a u64 intermediate suffices.
        Zp(((u64::from(P) - u64::from(rhs.0) + u64::from(self.0)) % u64::from(P)) as u32)
    }
}

impl Mul for Zp {
    type Output = Zp;
    #[inline]
    fn mul(self, rhs: Zp) -> Zp {
        Zp(((u64::from(self.0) * u64::from(rhs.0)) % u64::from(P)) as u32)
    }
}

impl Neg for Zp {
    type Output = Zp;
    #[inline]
    fn neg(self) -> Zp {
        if self.0 == 0 {
            Zp(0)
        } else {
            Zp(P - self.0)
        }
    }
}

impl AddAssign for Zp {
    #[inline]
    fn add_assign(&mut self, rhs: Zp) {
        *self = *self + rhs;
    }
}

impl SubAssign for Zp {
    #[inline]
    fn sub_assign(&mut self, rhs: Zp) {
        *self = *self - rhs;
    }
}

impl MulAssign for Zp {
    #[inline]
    fn mul_assign(&mut self, rhs: Zp) {
        *self = *self * rhs;
    }
}

impl Sum for Zp {
    fn sum<I: Iterator<Item = Zp>>(iter: I) -> Zp {
        iter.fold(Zp::ZERO, |acc, z| acc + z)
    }
}

impl fmt::Debug for Zp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Zp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn construction_normalizes() {
        assert_eq!(Zp::new(P), Zp::ZERO);
        assert_eq!(Zp::new(P.wrapping_add(7)), Zp::new(7));
        assert_eq!(Zp::new(u32::MAX), Zp::new(4));
    }

    #[test]
    fn additive_laws() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..200 {
            let a = Zp::uniform(&mut rng);
            let b = Zp::uniform(&mut rng);
            let c = Zp::uniform(&mut rng);
            assert_eq!((a + b) + c, a + (b + c));
            assert_eq!(a + b, b + a);
            assert_eq!(a + (-a), Zp::ZERO);
            assert_eq!(a - b, a + (-b));
        }
    }

    #[test]
    fn distributivity() {
        let mut rng = StdRng::seed_from_u64(18);
        for _ in 0..200 {
            let a = Zp::uniform(&mut rng);
            let b = Zp::uniform(&mut rng);
            let c = Zp::uniform(&mut rng);
            assert_eq!(a * (b + c), a * b + a * c);
        }
    }

    #[test]
    fn inversion() {
        assert_eq!(Zp::ZERO.inverse(), None);
        assert_eq!(Zp::ONE.inverse(), Some(Zp::ONE));
        assert_eq!(Zp::new(P - 1).inverse(), Some(Zp::new(P - 1)));
        let mut rng = StdRng::seed_from_u64(19);
        for _ in 0..500 {
            let a = Zp::uniform_nonzero(&mut rng);
            let inv = a.inverse().expect("nonzero element must invert");
            assert_eq!(a * inv, Zp::ONE);
        }
    }

    #[test]
    fn subtraction_avoids_wraparound() {
        let small = Zp::new(3);
        let large = Zp::new(P - 2);
        assert_eq!(small - large, Zp::new(5));
        assert_eq!(large - small, Zp::new(P - 5));
    }
}
