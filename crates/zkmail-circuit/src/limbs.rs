//! big integer limb decomposition and reduction constants
//!
//! limbs are least-significant first. the circuit reads every limb as a
//! field element, so they are rendered as decimal strings in the ABI.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::config::{CircuitConfig, ReductionParam};
use crate::{Error, Result};

/// the only public exponent the circuit's exponentiation is unrolled for
pub const RSA_EXPONENT: u32 = 65537;

/// split `n` into `count` limbs of `bits` bits
pub fn split_limbs(n: &BigUint, bits: usize, count: usize) -> Result<Vec<BigUint>> {
    if n.bits() as usize > bits * count {
        return Err(Error::ShapeMismatch(format!(
            "{}-bit value does not fit {} limbs of {} bits",
            n.bits(),
            count,
            bits
        )));
    }
    let mask = (BigUint::one() << bits) - 1u32;
    let mut rest = n.clone();
    let mut limbs = Vec::with_capacity(count);
    for _ in 0..count {
        limbs.push(&rest & &mask);
        rest >>= bits;
    }
    Ok(limbs)
}

/// inverse of [`split_limbs`]; trailing zero padding is harmless
pub fn join_limbs(limbs: &[BigUint], bits: usize) -> BigUint {
    limbs
        .iter()
        .rev()
        .fold(BigUint::zero(), |acc, limb| (acc << bits) + limb)
}

/// `R = 2^(limb_bits * limb_count)`
pub fn montgomery_radix(config: &CircuitConfig) -> BigUint {
    BigUint::one() << config.max_modulus_bits()
}

/// the constant the circuit expects next to the modulus
pub fn reduction_constant(n: &BigUint, config: &CircuitConfig) -> Result<BigUint> {
    if n.is_zero() || n == &BigUint::one() {
        return Err(Error::ShapeMismatch("modulus must be greater than one".into()));
    }
    match config.reduction {
        ReductionParam::Montgomery => {
            if !n.bit(0) {
                return Err(Error::ShapeMismatch("montgomery reduction needs an odd modulus".into()));
            }
            let r = montgomery_radix(config);
            Ok((&r * &r) % n)
        }
        ReductionParam::Barrett => {
            let shift = 2 * n.bits() as usize + 4;
            Ok((BigUint::one() << shift) / n)
        }
    }
}

/// `-N^{-1} mod R`, by Newton iteration on the 2-adic inverse
pub fn montgomery_n_prime(n: &BigUint, config: &CircuitConfig) -> Result<BigUint> {
    if !n.bit(0) {
        return Err(Error::ShapeMismatch("montgomery reduction needs an odd modulus".into()));
    }
    let k = config.max_modulus_bits();
    let r = montgomery_radix(config);
    let mask = &r - 1u32;
    let two = BigUint::from(2u32);

    // every odd n is its own inverse mod 2^3; each step doubles the precision
    let mut inv = n & &BigUint::from(7u32);
    let mut precision = 3;
    while precision < k {
        let prod = (n * &inv) & &mask;
        // inv * (2 - n*inv) mod R, keeping the subtraction non-negative
        let correction = (&two + &r - prod) & &mask;
        inv = (&inv * correction) & &mask;
        precision *= 2;
    }
    Ok((&r - inv) & mask)
}

/// modulus and reduction constant in circuit layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKeyLimbs {
    pub modulus: Vec<BigUint>,
    pub redc: Vec<BigUint>,
}

impl RsaPublicKeyLimbs {
    pub fn from_modulus(n: &BigUint, config: &CircuitConfig) -> Result<Self> {
        let redc = reduction_constant(n, config)?;
        Ok(Self {
            modulus: to_slots(n, config)?,
            redc: to_slots(&redc, config)?,
        })
    }

    pub fn modulus_value(&self, config: &CircuitConfig) -> BigUint {
        join_limbs(&self.modulus, config.limb_bits)
    }

    pub fn redc_value(&self, config: &CircuitConfig) -> BigUint {
        join_limbs(&self.redc, config.limb_bits)
    }
}

/// limbs plus the configured padding slot
pub fn to_slots(value: &BigUint, config: &CircuitConfig) -> Result<Vec<BigUint>> {
    let mut limbs = split_limbs(value, config.limb_bits, config.limb_count)?;
    if config.key_padding_slot {
        limbs.push(BigUint::zero());
    }
    Ok(limbs)
}

/// decimal strings as they appear in the ABI json
pub fn to_decimal_strings(limbs: &[BigUint]) -> Vec<String> {
    limbs.iter().map(|l| l.to_str_radix(10)).collect()
}

pub fn from_decimal_strings(values: &[String]) -> Result<Vec<BigUint>> {
    values
        .iter()
        .map(|s| {
            BigUint::parse_bytes(s.as_bytes(), 10)
                .ok_or_else(|| Error::ShapeMismatch(format!("limb {:?} is not a decimal integer", s)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_modulus() -> BigUint {
        // odd 2048-bit value
        (BigUint::one() << 2047usize) + BigUint::from(0x1234_5678_9abc_def1u64)
    }

    #[test]
    fn test_split_join_roundtrip() {
        let n = sample_modulus();
        let limbs = split_limbs(&n, 121, 17).unwrap();
        assert_eq!(limbs.len(), 17);
        assert!(limbs.iter().all(|l| l.bits() <= 121));
        assert_eq!(join_limbs(&limbs, 121), n);
        assert_eq!(limbs[0], BigUint::from(0x1234_5678_9abc_def1u64));
    }

    #[test]
    fn test_value_too_large() {
        let n = BigUint::one() << 2057usize;
        assert!(matches!(split_limbs(&n, 121, 17), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_padding_slot() {
        let config = CircuitConfig::default();
        let key = RsaPublicKeyLimbs::from_modulus(&sample_modulus(), &config).unwrap();
        assert_eq!(key.modulus.len(), 18);
        assert_eq!(key.redc.len(), 18);
        assert!(key.modulus[17].is_zero());
        assert_eq!(key.modulus_value(&config), sample_modulus());
    }

    #[test]
    fn test_montgomery_constant() {
        let config = CircuitConfig::default();
        let n = sample_modulus();
        let redc = reduction_constant(&n, &config).unwrap();
        let r = montgomery_radix(&config);
        assert_eq!(redc, (&r * &r) % &n);
        assert_ne!(redc, n);
        assert!(redc < n);
    }

    #[test]
    fn test_n_prime() {
        let config = CircuitConfig::default();
        let n = sample_modulus();
        let n_prime = montgomery_n_prime(&n, &config).unwrap();
        let r = montgomery_radix(&config);
        // n * n' == -1 mod R
        assert_eq!((&n * &n_prime + 1u32) % &r, BigUint::zero());
    }

    #[test]
    fn test_barrett_constant() {
        let config = CircuitConfig {
            reduction: ReductionParam::Barrett,
            ..Default::default()
        };
        let n = sample_modulus();
        let mu = reduction_constant(&n, &config).unwrap();
        assert_eq!(mu, (BigUint::one() << 4100usize) / &n);
    }

    #[test]
    fn test_even_modulus_rejected() {
        let config = CircuitConfig::default();
        let n = BigUint::one() << 2047usize;
        assert!(reduction_constant(&n, &config).is_err());
    }

    #[test]
    fn test_decimal_strings() {
        let limbs = vec![BigUint::from(42u32), BigUint::zero()];
        let strings = to_decimal_strings(&limbs);
        assert_eq!(strings, vec!["42", "0"]);
        assert_eq!(from_decimal_strings(&strings).unwrap(), limbs);
    }
}
