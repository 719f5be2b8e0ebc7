//! signature rows
//!
//! the slice of a witness that holds the modulus, the reduction constant,
//! the signature, the header digest and the modular exponentiation chain,
//! in the order the standard program writes them. none of these words carry
//! header or body bytes, so a transparent backend may open them.
//!
//! [`SignatureRows::check`] is the constraint system over these rows: every
//! chain step, the PKCS#1 encoding of the header digest, and the link to
//! the `pubkey_hash` and `email_nullifier` public inputs.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use crate::config::{CircuitConfig, ReductionParam};
use crate::limbs::{join_limbs, reduction_constant};
use crate::public::{byte_len, to_fixed_be, PublicInputs};
use crate::{Error, Result};

/// DER prefix of a SHA-256 DigestInfo
pub(crate) const SHA256_DIGEST_INFO: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];

/// squarings of 65537 = 2^16 + 1
const SQUARINGS: usize = 16;
const WORDS_PER_LIMB: usize = 4;
const DIGEST_WORDS: usize = 8;

/// limb layout the rows were written with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowShape {
    pub limb_bits: u32,
    pub limb_count: u32,
    pub key_padding_slot: bool,
    pub reduction: ReductionParam,
}

impl RowShape {
    pub fn of(config: &CircuitConfig) -> Self {
        Self {
            limb_bits: config.limb_bits as u32,
            limb_count: config.limb_count as u32,
            key_padding_slot: config.key_padding_slot,
            reduction: config.reduction,
        }
    }

    /// the config fields the rows depend on, everything else default
    pub fn config(&self) -> CircuitConfig {
        CircuitConfig {
            limb_bits: self.limb_bits as usize,
            limb_count: self.limb_count as usize,
            key_padding_slot: self.key_padding_slot,
            reduction: self.reduction,
            ..Default::default()
        }
    }

    pub fn limb_array_length(&self) -> usize {
        self.limb_count as usize + usize::from(self.key_padding_slot)
    }

    /// values in the exponentiation chain
    pub fn chain_length(&self) -> usize {
        match self.reduction {
            // entry, squarings, final multiply, exit
            ReductionParam::Montgomery => SQUARINGS + 3,
            ReductionParam::Barrett => SQUARINGS + 1,
        }
    }

    pub fn word_count(&self) -> usize {
        let key = 3 * self.limb_array_length() * WORDS_PER_LIMB;
        let chain = self.chain_length() * self.limb_count as usize * WORDS_PER_LIMB;
        key + DIGEST_WORDS + chain
    }

    fn validate(&self) -> Result<()> {
        if self.limb_bits == 0 || self.limb_bits > 128 || self.limb_count == 0 {
            return Err(Error::ShapeMismatch(format!(
                "row shape {}x{} bits",
                self.limb_count, self.limb_bits
            )));
        }
        Ok(())
    }
}

/// decoded signature rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRows {
    pub modulus: BigUint,
    pub redc: BigUint,
    pub signature: BigUint,
    pub header_digest: [u8; 32],
    pub chain: Vec<BigUint>,
}

impl SignatureRows {
    /// `words` must be exactly `shape.word_count()` long
    pub fn decode(words: &[u32], shape: &RowShape) -> Result<Self> {
        shape.validate()?;
        if words.len() != shape.word_count() {
            return Err(Error::ShapeMismatch(format!(
                "{} signature row words, shape needs {}",
                words.len(),
                shape.word_count()
            )));
        }
        let mut r = WordReader {
            words,
            pos: 0,
            bits: shape.limb_bits as usize,
        };
        let array = shape.limb_array_length();
        let modulus = r.slots(array, shape.key_padding_slot)?;
        let redc = r.slots(array, shape.key_padding_slot)?;
        let signature = r.slots(array, shape.key_padding_slot)?;
        let header_digest = r.digest();
        let chain = (0..shape.chain_length())
            .map(|_| r.value(shape.limb_count as usize))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            modulus,
            redc,
            signature,
            header_digest,
            chain,
        })
    }

    /// every row constraint, plus the two public inputs the rows determine
    pub fn check(&self, shape: &RowShape, public: &PublicInputs) -> Result<()> {
        shape.validate()?;
        let config = shape.config();
        let n = &self.modulus;
        if n.is_zero() || !n.bit(0) || n.bits() as usize > config.max_modulus_bits() {
            return Err(Error::witness("modulus is not an odd value within the limbs"));
        }
        if PublicInputs::pubkey_hash_of(n) != public.pubkey_hash {
            return Err(Error::witness("modulus does not hash to pubkey_hash"));
        }
        if self.redc != reduction_constant(n, &config)? {
            return Err(Error::witness("reduction constant does not match the modulus"));
        }
        if &self.signature >= n {
            return Err(Error::witness("signature not reduced modulo n"));
        }
        if PublicInputs::nullifier_of(&self.signature, n) != public.email_nullifier {
            return Err(Error::witness("signature does not hash to email_nullifier"));
        }
        if self.chain.len() != shape.chain_length() {
            return Err(Error::witness("exponentiation chain has the wrong length"));
        }
        if let Some(i) = self.chain.iter().position(|x| x >= n) {
            return Err(Error::witness(format!("chain value {} not reduced", i)));
        }

        let result = match shape.reduction {
            ReductionParam::Montgomery => self.check_montgomery(&config)?,
            ReductionParam::Barrett => self.check_plain()?,
        };
        let expected = pkcs1_sha256(&self.header_digest, byte_len(n))
            .ok_or_else(|| Error::witness("modulus too small for sha256 pkcs1 encoding"))?;
        if to_fixed_be(result, byte_len(n)) != expected {
            return Err(Error::witness("rsa signature does not match header digest"));
        }
        Ok(())
    }

    /// out * R == a * b (mod n) for every step
    fn check_montgomery(&self, config: &CircuitConfig) -> Result<&BigUint> {
        let n = &self.modulus;
        let radix = BigUint::one() << config.max_modulus_bits();
        let step = |i: usize, a: &BigUint, b: &BigUint| -> Result<()> {
            if (&self.chain[i] * &radix) % n != (a * b) % n {
                return Err(Error::witness(format!("montgomery step {} does not hold", i)));
            }
            Ok(())
        };
        let base = &self.chain[0];
        step(0, &self.signature, &self.redc)?;
        for i in 1..=SQUARINGS {
            step(i, &self.chain[i - 1], &self.chain[i - 1])?;
        }
        step(SQUARINGS + 1, &self.chain[SQUARINGS], base)?;
        step(SQUARINGS + 2, &self.chain[SQUARINGS + 1], &BigUint::one())?;
        Ok(&self.chain[SQUARINGS + 2])
    }

    /// out == a * b (mod n) for every step
    fn check_plain(&self) -> Result<&BigUint> {
        let n = &self.modulus;
        let step = |i: usize, a: &BigUint, b: &BigUint| -> Result<()> {
            if self.chain[i] != (a * b) % n {
                return Err(Error::witness(format!("modmul step {} does not hold", i)));
            }
            Ok(())
        };
        step(0, &self.signature, &self.signature)?;
        for i in 1..SQUARINGS {
            step(i, &self.chain[i - 1], &self.chain[i - 1])?;
        }
        step(SQUARINGS, &self.chain[SQUARINGS - 1], &self.signature)?;
        Ok(&self.chain[SQUARINGS])
    }
}

/// EMSA-PKCS1-v1_5 encoding of a sha256 digest for a `k` byte modulus
pub(crate) fn pkcs1_sha256(hash: &[u8; 32], k: usize) -> Option<Vec<u8>> {
    let pad = k.checked_sub(3 + SHA256_DIGEST_INFO.len() + 32)?;
    let mut out = Vec::with_capacity(k);
    out.extend_from_slice(&[0x00, 0x01]);
    out.extend(std::iter::repeat(0xff).take(pad));
    out.push(0x00);
    out.extend_from_slice(&SHA256_DIGEST_INFO);
    out.extend_from_slice(hash);
    Some(out)
}

struct WordReader<'a> {
    words: &'a [u32],
    pos: usize,
    bits: usize,
}

impl WordReader<'_> {
    fn limb(&mut self) -> Result<BigUint> {
        let limb = BigUint::from_slice(&self.words[self.pos..self.pos + WORDS_PER_LIMB]);
        self.pos += WORDS_PER_LIMB;
        if limb.bits() as usize > self.bits {
            return Err(Error::witness(format!("limb exceeds {} bits", self.bits)));
        }
        Ok(limb)
    }

    fn value(&mut self, count: usize) -> Result<BigUint> {
        let limbs = (0..count).map(|_| self.limb()).collect::<Result<Vec<_>>>()?;
        Ok(join_limbs(&limbs, self.bits))
    }

    /// a limb array, padding slot included
    fn slots(&mut self, count: usize, padded: bool) -> Result<BigUint> {
        let value_limbs = count - usize::from(padded);
        let value = self.value(value_limbs)?;
        if padded && !self.limb()?.is_zero() {
            return Err(Error::witness("padding slot is not zero"));
        }
        Ok(value)
    }

    fn digest(&mut self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (chunk, word) in out.chunks_mut(4).zip(&self.words[self.pos..self.pos + DIGEST_WORDS]) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        self.pos += DIGEST_WORDS;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_for_default_shape() {
        let shape = RowShape::of(&CircuitConfig::default());
        // three padded limb arrays, a digest, 19 chain values of 17 limbs
        assert_eq!(shape.word_count(), 3 * 18 * 4 + 8 + 19 * 17 * 4);
        let barrett = RowShape {
            reduction: ReductionParam::Barrett,
            ..shape
        };
        assert_eq!(barrett.chain_length(), 17);
    }

    #[test]
    fn test_pkcs1_layout() {
        let em = pkcs1_sha256(&[0xab; 32], 256).unwrap();
        assert_eq!(em.len(), 256);
        assert_eq!(&em[..3], &[0x00, 0x01, 0xff]);
        assert_eq!(em[256 - 32 - 19 - 1], 0x00);
        assert_eq!(&em[256 - 32..], &[0xab; 32]);
        assert!(pkcs1_sha256(&[0; 32], 50).is_none());
    }

    #[test]
    fn test_all_zero_rows_fail() {
        let shape = RowShape::of(&CircuitConfig::default());
        let rows = SignatureRows::decode(&vec![0u32; shape.word_count()], &shape).unwrap();
        let public = PublicInputs {
            pubkey_hash: [0; 32],
            email_nullifier: [0x42; 32],
            header_length: 7,
            body_hash_index: 3,
        };
        assert!(matches!(
            rows.check(&shape, &public),
            Err(Error::WitnessGenerationFailed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_length_and_wide_limbs() {
        let shape = RowShape::of(&CircuitConfig::default());
        assert!(matches!(
            SignatureRows::decode(&[0u32; 16], &shape),
            Err(Error::ShapeMismatch(_))
        ));
        let mut words = vec![0u32; shape.word_count()];
        // fourth word of the first limb holds bits 96..128, past 121
        words[3] = u32::MAX;
        assert!(SignatureRows::decode(&words, &shape).is_err());
    }
}
