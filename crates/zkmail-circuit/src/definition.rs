//! circuit definition asset: program bytecode plus declared ABI

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::bytecode::Program;
use crate::config::CircuitConfig;
use crate::inputs::names;
use crate::{Error, Result};

pub const CIRCUIT_NAME: &str = "email_verify";
pub const CIRCUIT_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbiType {
    U8,
    U32,
    Field,
    Bytes32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: AbiType,
    #[serde(rename = "arrayLength", default, skip_serializing_if = "Option::is_none")]
    pub array_length: Option<usize>,
}

impl AbiParam {
    fn scalar(name: &str, ty: AbiType) -> Self {
        Self {
            name: name.into(),
            ty,
            array_length: None,
        }
    }

    fn array(name: &str, ty: AbiType, len: usize) -> Self {
        Self {
            name: name.into(),
            ty,
            array_length: Some(len),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abi {
    pub inputs: Vec<AbiParam>,
    #[serde(default)]
    pub outputs: Vec<AbiParam>,
}

impl Abi {
    /// the ABI the input builder produces for `config`
    pub fn for_config(config: &CircuitConfig) -> Self {
        let limbs = config.limb_array_length();
        Self {
            inputs: vec![
                AbiParam::array(names::HEADER_STORAGE, AbiType::U8, config.max_header_length),
                AbiParam::scalar(names::HEADER_LEN, AbiType::U32),
                AbiParam::array(names::BODY_STORAGE, AbiType::U8, config.max_body_length),
                AbiParam::scalar(names::BODY_LEN, AbiType::U32),
                AbiParam::array(names::PUBKEY_MODULUS, AbiType::Field, limbs),
                AbiParam::array(names::PUBKEY_REDC, AbiType::Field, limbs),
                AbiParam::array(names::SIGNATURE, AbiType::Field, limbs),
                AbiParam::scalar(names::BODY_HASH_INDEX, AbiType::U32),
                AbiParam::scalar(names::DKIM_HEADER_INDEX, AbiType::U32),
                AbiParam::scalar(names::DKIM_HEADER_LENGTH, AbiType::U32),
            ],
            outputs: vec![
                AbiParam::scalar("pubkey_hash", AbiType::Bytes32),
                AbiParam::scalar("email_nullifier", AbiType::Bytes32),
                AbiParam::scalar("header_length", AbiType::U32),
                AbiParam::scalar("body_hash_index", AbiType::U32),
            ],
        }
    }

    pub fn input(&self, name: &str) -> Option<&AbiParam> {
        self.inputs.iter().find(|p| p.name == name)
    }
}

/// on-disk shape
#[derive(Serialize, Deserialize)]
struct CircuitFile {
    name: String,
    version: String,
    bytecode: String,
    abi: Abi,
}

/// a loaded, decoded circuit; read-only once constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitDefinition {
    pub name: String,
    pub version: String,
    pub bytecode: Vec<u8>,
    pub abi: Abi,
    program: Program,
}

impl CircuitDefinition {
    /// the email verification circuit for `config`
    pub fn standard(config: &CircuitConfig) -> Self {
        let program = Program::email_verify();
        Self {
            name: CIRCUIT_NAME.into(),
            version: CIRCUIT_VERSION.into(),
            bytecode: program.encode(),
            abi: Abi::for_config(config),
            program,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: CircuitFile = serde_json::from_str(json)
            .map_err(|e| Error::InvalidCircuit(format!("bad circuit json: {}", e)))?;
        let bytecode = STANDARD
            .decode(file.bytecode.as_bytes())
            .map_err(|e| Error::InvalidCircuit(format!("bytecode is not base64: {}", e)))?;
        let program = Program::decode(&bytecode)?;
        Ok(Self {
            name: file.name,
            version: file.version,
            bytecode,
            abi: file.abi,
            program,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        let file = CircuitFile {
            name: self.name.clone(),
            version: self.version.clone(),
            bytecode: STANDARD.encode(&self.bytecode),
            abi: self.abi.clone(),
        };
        serde_json::to_string_pretty(&file)
            .map_err(|e| Error::InvalidCircuit(format!("encode circuit: {}", e)))
    }

    /// read, decode and check against `config`
    pub fn load(path: impl AsRef<Path>, config: &CircuitConfig) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidCircuit(format!("{}: {}", path.display(), e)))?;
        let definition = Self::from_json(&json)?;
        definition.validate(config)?;
        info!(
            "loaded circuit {} v{} ({} ops) from {}",
            definition.name,
            definition.version,
            definition.program.ops.len(),
            path.display()
        );
        Ok(definition)
    }

    /// every declared input must match what the builder emits for `config`
    pub fn validate(&self, config: &CircuitConfig) -> Result<()> {
        config.validate()?;
        let expected = Abi::for_config(config);

        for want in &expected.inputs {
            let got = self
                .abi
                .input(&want.name)
                .ok_or_else(|| Error::ShapeMismatch(format!("circuit has no input {}", want.name)))?;
            if got.ty != want.ty {
                return Err(Error::ShapeMismatch(format!(
                    "{}: circuit type {:?}, config expects {:?}",
                    want.name, got.ty, want.ty
                )));
            }
            if got.array_length != want.array_length {
                return Err(Error::ShapeMismatch(format!(
                    "{}: circuit length {:?}, config expects {:?}",
                    want.name, got.array_length, want.array_length
                )));
            }
        }
        if let Some(extra) = self
            .abi
            .inputs
            .iter()
            .find(|p| expected.input(&p.name).is_none())
        {
            return Err(Error::ShapeMismatch(format!("unexpected circuit input {}", extra.name)));
        }
        Ok(())
    }

    /// binds proofs to this exact circuit
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"zkmail-circuit-v1");
        for part in [self.name.as_bytes(), self.version.as_bytes(), self.bytecode.as_slice()] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        for param in self.abi.inputs.iter().chain(&self.abi.outputs) {
            hasher.update((param.name.len() as u64).to_le_bytes());
            hasher.update(param.name.as_bytes());
            hasher.update([param.ty as u8]);
            hasher.update((param.array_length.unwrap_or(0) as u64).to_le_bytes());
        }
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let config = CircuitConfig::default();
        let circuit = CircuitDefinition::standard(&config);
        let json = circuit.to_json().unwrap();
        assert!(json.contains("\"arrayLength\": 25216"));
        let back = CircuitDefinition::from_json(&json).unwrap();
        assert_eq!(back, circuit);
        assert_eq!(back.digest(), circuit.digest());
        back.validate(&config).unwrap();
    }

    #[test]
    fn test_limb_count_drift_detected() {
        let circuit = CircuitDefinition::standard(&CircuitConfig::default());
        let config = CircuitConfig {
            key_padding_slot: false,
            ..Default::default()
        };
        assert!(matches!(circuit.validate(&config), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_body_capacity_drift_detected() {
        let circuit = CircuitDefinition::standard(&CircuitConfig {
            max_body_length: 4096,
            ..Default::default()
        });
        let err = circuit.validate(&CircuitConfig::default()).unwrap_err();
        assert!(err.to_string().contains("body.storage"));
    }

    #[test]
    fn test_bad_bytecode_is_invalid_circuit() {
        let json = r#"{"name":"x","version":"1","bytecode":"!!!","abi":{"inputs":[]}}"#;
        assert!(matches!(CircuitDefinition::from_json(json), Err(Error::InvalidCircuit(_))));
        let json = r#"{"name":"x","version":"1","bytecode":"AAAA","abi":{"inputs":[]}}"#;
        assert!(matches!(CircuitDefinition::from_json(json), Err(Error::InvalidCircuit(_))));
    }

    #[test]
    fn test_digest_changes_with_abi() {
        let a = CircuitDefinition::standard(&CircuitConfig::default());
        let b = CircuitDefinition::standard(&CircuitConfig {
            max_header_length: 2048,
            ..Default::default()
        });
        assert_ne!(a.digest(), b.digest());
    }
}
