//! circuit input layout built from a verified DKIM record

use num_bigint::BigUint;
use serde_json::{json, Map, Value};
use tracing::debug;
use zkmail_dkim::{DkimRecord, Sequence};

use crate::bounded::BoundedVec;
use crate::config::CircuitConfig;
use crate::limbs::{from_decimal_strings, to_decimal_strings, to_slots, RsaPublicKeyLimbs, RSA_EXPONENT};
use crate::{Error, Result};

/// ABI input names, in declaration order
pub mod names {
    pub const HEADER_STORAGE: &str = "header.storage";
    pub const HEADER_LEN: &str = "header.len";
    pub const BODY_STORAGE: &str = "body.storage";
    pub const BODY_LEN: &str = "body.len";
    pub const PUBKEY_MODULUS: &str = "pubkey.modulus";
    pub const PUBKEY_REDC: &str = "pubkey.redc";
    pub const SIGNATURE: &str = "signature";
    pub const BODY_HASH_INDEX: &str = "body_hash_index";
    pub const DKIM_HEADER_INDEX: &str = "dkim_header_sequence.index";
    pub const DKIM_HEADER_LENGTH: &str = "dkim_header_sequence.length";
}

/// everything the circuit consumes for one email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitInputs {
    pub header: BoundedVec,
    pub body: BoundedVec,
    pub pubkey: RsaPublicKeyLimbs,
    pub signature: Vec<BigUint>,
    pub body_hash_index: usize,
    pub dkim_header_sequence: Sequence,
}

impl CircuitInputs {
    /// lay out a verified record; size violations are reported, never truncated
    pub fn build(record: &DkimRecord, config: &CircuitConfig) -> Result<Self> {
        if record.body.len() > config.max_body_length {
            return Err(Error::BodyTooLarge {
                len: record.body.len(),
                max: config.max_body_length,
            });
        }
        if record.header.len() > config.max_header_length {
            return Err(Error::HeaderTooLarge {
                len: record.header.len(),
                max: config.max_header_length,
            });
        }
        let header = BoundedVec::wrap(&record.header, config.max_header_length).ok_or(
            Error::HeaderTooLarge {
                len: record.header.len(),
                max: config.max_header_length,
            },
        )?;
        let body = BoundedVec::wrap(&record.body, config.max_body_length).ok_or(
            Error::BodyTooLarge {
                len: record.body.len(),
                max: config.max_body_length,
            },
        )?;

        if BigUint::from_bytes_be(&record.exponent_bytes()) != BigUint::from(RSA_EXPONENT) {
            return Err(Error::ShapeMismatch(format!(
                "public exponent must be {}",
                RSA_EXPONENT
            )));
        }

        let modulus = BigUint::from_bytes_be(&record.modulus_bytes());
        let pubkey = RsaPublicKeyLimbs::from_modulus(&modulus, config)?;
        let signature = to_slots(&BigUint::from_bytes_be(&record.signature), config)?;

        if record.dkim_field.length > config.max_dkim_field_length {
            return Err(Error::ShapeMismatch(format!(
                "dkim field is {} bytes (max {})",
                record.dkim_field.length, config.max_dkim_field_length
            )));
        }
        if record.dkim_field.end() > record.header.len() || record.body_hash_index >= record.header.len() {
            return Err(Error::ShapeMismatch("header offsets outside the header".into()));
        }

        debug!(
            "circuit inputs: header {}/{} body {}/{} bh@{} dkim@{}+{}",
            header.len(),
            header.capacity(),
            body.len(),
            body.capacity(),
            record.body_hash_index,
            record.dkim_field.index,
            record.dkim_field.length
        );

        Ok(Self {
            header,
            body,
            pubkey,
            signature,
            body_hash_index: record.body_hash_index,
            dkim_header_sequence: record.dkim_field,
        })
    }

    /// the input map keyed by ABI name
    ///
    /// byte arrays are decimal numbers per byte, limbs are decimal strings,
    /// scalars are numbers.
    pub fn to_abi_json(&self) -> Value {
        let mut map = Map::new();
        map.insert(names::HEADER_STORAGE.into(), json!(self.header.storage()));
        map.insert(names::HEADER_LEN.into(), json!(self.header.len()));
        map.insert(names::BODY_STORAGE.into(), json!(self.body.storage()));
        map.insert(names::BODY_LEN.into(), json!(self.body.len()));
        map.insert(names::PUBKEY_MODULUS.into(), json!(to_decimal_strings(&self.pubkey.modulus)));
        map.insert(names::PUBKEY_REDC.into(), json!(to_decimal_strings(&self.pubkey.redc)));
        map.insert(names::SIGNATURE.into(), json!(to_decimal_strings(&self.signature)));
        map.insert(names::BODY_HASH_INDEX.into(), json!(self.body_hash_index));
        map.insert(names::DKIM_HEADER_INDEX.into(), json!(self.dkim_header_sequence.index));
        map.insert(names::DKIM_HEADER_LENGTH.into(), json!(self.dkim_header_sequence.length));
        Value::Object(map)
    }

    /// inverse of [`CircuitInputs::to_abi_json`]; shapes are checked by `execute`
    pub fn from_abi_json(value: &Value) -> Result<Self> {
        let field = |name: &str| {
            value
                .get(name)
                .ok_or_else(|| Error::ShapeMismatch(format!("input {} missing", name)))
        };
        let scalar = |name: &str| -> Result<usize> {
            field(name)?
                .as_u64()
                .map(|v| v as usize)
                .ok_or_else(|| Error::ShapeMismatch(format!("input {} is not an integer", name)))
        };
        let bytes = |name: &str| -> Result<Vec<u8>> {
            serde_json::from_value(field(name)?.clone())
                .map_err(|e| Error::ShapeMismatch(format!("input {}: {}", name, e)))
        };
        let limbs = |name: &str| -> Result<Vec<BigUint>> {
            let strings: Vec<String> = serde_json::from_value(field(name)?.clone())
                .map_err(|e| Error::ShapeMismatch(format!("input {}: {}", name, e)))?;
            from_decimal_strings(&strings)
        };
        let bounded = |storage: &str, len: &str| -> Result<BoundedVec> {
            BoundedVec::from_parts(bytes(storage)?, scalar(len)?)
                .ok_or_else(|| Error::ShapeMismatch(format!("{} exceeds {}", len, storage)))
        };

        Ok(Self {
            header: bounded(names::HEADER_STORAGE, names::HEADER_LEN)?,
            body: bounded(names::BODY_STORAGE, names::BODY_LEN)?,
            pubkey: RsaPublicKeyLimbs {
                modulus: limbs(names::PUBKEY_MODULUS)?,
                redc: limbs(names::PUBKEY_REDC)?,
            },
            signature: limbs(names::SIGNATURE)?,
            body_hash_index: scalar(names::BODY_HASH_INDEX)?,
            dkim_header_sequence: Sequence {
                index: scalar(names::DKIM_HEADER_INDEX)?,
                length: scalar(names::DKIM_HEADER_LENGTH)?,
            },
        })
    }
}
