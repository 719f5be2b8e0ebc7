//! circuit shape configuration
//!
//! every size, limb width and padding decision the circuit depends on lives
//! here. the input builder, the circuit definition and the witness generator
//! all read the same record so they cannot drift apart.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const SCHEMA_VERSION: u32 = 1;

/// precomputed constant that accompanies the modulus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReductionParam {
    /// `R^2 mod N` with `R = 2^(limb_bits * limb_count)`
    #[default]
    Montgomery,
    /// `floor(2^(2 * bits(N) + 4) / N)`
    Barrett,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub max_header_length: usize,
    pub max_body_length: usize,
    /// bits per limb
    pub limb_bits: usize,
    /// limbs carrying the value (padding slot excluded)
    pub limb_count: usize,
    /// append one zero slot to modulus, redc and signature arrays
    pub key_padding_slot: bool,
    pub reduction: ReductionParam,
    /// largest DKIM-Signature field the circuit will locate
    pub max_dkim_field_length: usize,
    pub schema_version: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            max_header_length: 1024,
            max_body_length: 25216,
            limb_bits: 121,
            limb_count: 17,
            key_padding_slot: true,
            reduction: ReductionParam::Montgomery,
            max_dkim_field_length: 1024,
            schema_version: SCHEMA_VERSION,
        }
    }
}

impl CircuitConfig {
    /// length of the limb arrays the circuit declares
    pub fn limb_array_length(&self) -> usize {
        self.limb_count + usize::from(self.key_padding_slot)
    }

    /// largest modulus the limbs can hold
    pub fn max_modulus_bits(&self) -> usize {
        self.limb_bits * self.limb_count
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(Error::ShapeMismatch(format!(
                "config schema version {} (expected {})",
                self.schema_version, SCHEMA_VERSION
            )));
        }
        if self.limb_bits == 0 || self.limb_bits > 128 {
            return Err(Error::ShapeMismatch(format!(
                "limb width {} outside 1..=128",
                self.limb_bits
            )));
        }
        if self.max_modulus_bits() < 2048 {
            return Err(Error::ShapeMismatch(format!(
                "{} x {}-bit limbs cannot hold a 2048-bit modulus",
                self.limb_count, self.limb_bits
            )));
        }
        if self.max_header_length == 0 || self.max_body_length == 0 {
            return Err(Error::ShapeMismatch("zero header or body capacity".into()));
        }
        if self.max_dkim_field_length > self.max_header_length {
            return Err(Error::ShapeMismatch(
                "dkim field capacity exceeds header capacity".into(),
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::ShapeMismatch(format!("bad config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = CircuitConfig::default();
        config.validate().unwrap();
        assert_eq!(config.limb_array_length(), 18);
        assert_eq!(config.max_modulus_bits(), 2057);
    }

    #[test]
    fn test_too_few_limbs_rejected() {
        let config = CircuitConfig {
            limb_count: 16,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CircuitConfig::from_json(r#"{"max_body_length": 4096, "reduction": "barrett"}"#).unwrap();
        assert_eq!(config.max_body_length, 4096);
        assert_eq!(config.reduction, ReductionParam::Barrett);
        assert_eq!(config.limb_count, 17);
    }
}
