//! public outputs of the email circuit

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// values a verifier sees; everything else stays in the witness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicInputs {
    /// sha256 of the big-endian modulus
    #[serde(with = "hex")]
    pub pubkey_hash: [u8; 32],
    /// sha256 of the signature; one proof per email
    #[serde(with = "hex")]
    pub email_nullifier: [u8; 32],
    pub header_length: u32,
    pub body_hash_index: u32,
}

impl PublicInputs {
    pub fn pubkey_hash_of(modulus: &BigUint) -> [u8; 32] {
        Sha256::digest(modulus.to_bytes_be()).into()
    }

    /// the signature is hashed at the modulus width, leading zeros included
    pub fn nullifier_of(signature: &BigUint, modulus: &BigUint) -> [u8; 32] {
        Sha256::digest(to_fixed_be(signature, byte_len(modulus))).into()
    }

    /// 32-byte big-endian words in consumer order:
    /// pubkey_hash, email_nullifier, header_length, body_hash_index
    pub fn to_words(&self) -> [[u8; 32]; 4] {
        [
            self.pubkey_hash,
            self.email_nullifier,
            u32_word(self.header_length),
            u32_word(self.body_hash_index),
        ]
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_words().concat()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 128 {
            return None;
        }
        let word = |i: usize| -> [u8; 32] {
            let mut w = [0u8; 32];
            w.copy_from_slice(&bytes[i * 32..(i + 1) * 32]);
            w
        };
        let scalar = |w: [u8; 32]| -> Option<u32> {
            if w[..28].iter().any(|&b| b != 0) {
                return None;
            }
            Some(u32::from_be_bytes([w[28], w[29], w[30], w[31]]))
        };
        Some(Self {
            pubkey_hash: word(0),
            email_nullifier: word(1),
            header_length: scalar(word(2))?,
            body_hash_index: scalar(word(3))?,
        })
    }
}

fn u32_word(v: u32) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[28..].copy_from_slice(&v.to_be_bytes());
    w
}

pub(crate) fn byte_len(n: &BigUint) -> usize {
    ((n.bits() + 7) / 8) as usize
}

/// big-endian, left padded to `len`
pub(crate) fn to_fixed_be(n: &BigUint, len: usize) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    if bytes.len() >= len {
        return bytes;
    }
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(&bytes);
    out
}
