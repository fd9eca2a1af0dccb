//! Difficulty targets and the conversions between their encodings.
//!
//! Targets show up in three forms: the compact 32-bit `nBits` encoding
//! carried in block headers, 256-bit hashes compared against targets as
//! little-endian integers, and arbitrary-precision rationals used when
//! difficulties are expressed relative to the network's proof-of-work
//! limit (`difficulty = powLimit / target`).

use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;
use num_traits::Zero;

/// Difficulty data shared by every client of one miner class on an
/// endpoint. Immutable once the endpoint is up.
#[derive(Debug, Clone)]
pub struct DifficultyInfo {
    /// Pool difficulty assigned to the client, `powLimit / target`.
    pub difficulty: BigRational,

    /// Raw 256-bit pool target for the client.
    pub target: BigRational,

    /// Network proof-of-work limit.
    pub pow_limit: BigRational,
}

impl DifficultyInfo {
    /// Build difficulty info from a proof-of-work limit and a pool target.
    ///
    /// A zero target yields a zero difficulty rather than dividing by zero;
    /// endpoints never configure one, but a corrupted config should not
    /// take the process down.
    pub fn from_targets(pow_limit: &BigUint, target: &BigUint) -> Self {
        let pow_limit = rational(pow_limit.clone());
        let target = rational(target.clone());
        let difficulty = if target.is_zero() {
            BigRational::zero()
        } else {
            &pow_limit / &target
        };
        Self {
            difficulty,
            target,
            pow_limit,
        }
    }
}

/// Expand the compact `nBits` representation into a big integer.
///
/// The compact format packs a sign bit, a base-256 exponent, and a 23-bit
/// mantissa into a u32. Like a signed base-256 version of scientific
/// notation: the result is `(-1)^sign * mantissa * 256^(exponent-3)`.
pub fn compact_to_big(compact: u32) -> BigInt {
    let mantissa = compact & 0x007f_ffff;
    let negative = compact & 0x0080_0000 != 0;
    let exponent = compact >> 24;

    let magnitude = if exponent <= 3 {
        BigInt::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigInt::from(mantissa) << (8 * (exponent - 3))
    };

    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Interpret a block hash as the 256-bit integer it represents.
///
/// Hashes are little-endian on the wire, so the last byte is the most
/// significant when comparing against a target.
pub fn hash_to_big(hash: &[u8; 32]) -> BigUint {
    BigUint::from_bytes_le(hash)
}

/// Lift an unsigned big integer into a rational.
pub fn rational(value: BigUint) -> BigRational {
    BigRational::from_integer(BigInt::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::{One, Signed};

    #[test]
    fn compact_small_exponents() {
        assert_eq!(compact_to_big(0x0100_3456), BigInt::from(0x00));
        assert_eq!(compact_to_big(0x0112_3456), BigInt::from(0x12));
        assert_eq!(compact_to_big(0x0200_8000), BigInt::from(0x80));
    }

    #[test]
    fn compact_large_exponents() {
        assert_eq!(compact_to_big(0x0412_3456), BigInt::from(0x1234_5600u64));
        assert_eq!(compact_to_big(0x0500_9234), BigInt::from(0x9234_0000u64));
    }

    #[test]
    fn compact_sign_bit() {
        assert_eq!(compact_to_big(0x0492_3456), BigInt::from(-0x1234_5600i64));
        assert!(compact_to_big(0x0492_3456).is_negative());
    }

    #[test]
    fn compact_unit_target() {
        // exponent 1, mantissa 0x010000 shifted down to 1
        assert_eq!(compact_to_big(0x0101_0000), BigInt::one());
    }

    #[test]
    fn hash_little_endian() {
        let mut hash = [0u8; 32];
        hash[0] = 0x01;
        assert_eq!(hash_to_big(&hash), BigUint::one());

        hash[0] = 0;
        hash[31] = 0x01;
        assert_eq!(hash_to_big(&hash), BigUint::one() << 248);
    }

    #[test]
    fn difficulty_ratio() {
        let pow_limit = BigUint::from(1024u32);
        let target = BigUint::from(4u32);
        let info = DifficultyInfo::from_targets(&pow_limit, &target);
        assert_eq!(info.difficulty, BigRational::from_integer(256.into()));
    }

    #[test]
    fn zero_target_yields_zero_difficulty() {
        let info = DifficultyInfo::from_targets(&BigUint::from(1024u32), &BigUint::zero());
        assert!(info.difficulty.is_zero());
    }
}
