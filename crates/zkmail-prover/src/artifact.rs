//! proof artifact handed to consumers
//!
//! binary layout, integers little-endian:
//!
//! ```text
//! "ZKMP" | u16 version | u16 name len | backend name
//!        | circuit digest (32) | public inputs (128)
//!        | u8 has claim | claim digest (32, zero without a claim)
//!        | u32 proof len | proof
//! ```

use serde::{Deserialize, Serialize};
use zkmail_circuit::{PublicInputs, Statement};

use crate::{Error, Result};

pub const ARTIFACT_MAGIC: &[u8; 4] = b"ZKMP";
pub const ARTIFACT_VERSION: u16 = 2;

const PUBLIC_INPUTS_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofArtifact {
    #[serde(with = "hex")]
    pub proof: Vec<u8>,
    pub public_inputs: PublicInputs,
    /// digest of the payment claim the proof is bound to
    #[serde(default, with = "opt_hex", skip_serializing_if = "Option::is_none")]
    pub claim_digest: Option<[u8; 32]>,
    #[serde(with = "hex")]
    pub circuit_digest: [u8; 32],
    pub backend: String,
}

mod opt_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<[u8; 32]>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(digest) => s.serialize_some(&hex::encode(digest)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[u8; 32]>, D::Error> {
        let Some(text) = Option::<String>::deserialize(d)? else {
            return Ok(None);
        };
        let mut digest = [0u8; 32];
        hex::decode_to_slice(&text, &mut digest).map_err(serde::de::Error::custom)?;
        Ok(Some(digest))
    }
}

impl ProofArtifact {
    /// what the proof must attest to
    pub fn statement(&self) -> Statement {
        Statement {
            public: self.public_inputs,
            claim_digest: self.claim_digest,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let name = self.backend.as_bytes();
        let name_len = u16::try_from(name.len())
            .map_err(|_| Error::Serialization("backend name too long".into()))?;
        let proof_len = u32::try_from(self.proof.len())
            .map_err(|_| Error::Serialization("proof too long".into()))?;

        let mut out =
            Vec::with_capacity(4 + 2 + 2 + name.len() + 32 + PUBLIC_INPUTS_LEN + 33 + 4 + self.proof.len());
        out.extend_from_slice(ARTIFACT_MAGIC);
        out.extend_from_slice(&ARTIFACT_VERSION.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&self.circuit_digest);
        out.extend_from_slice(&self.public_inputs.to_bytes());
        out.push(u8::from(self.claim_digest.is_some()));
        out.extend_from_slice(&self.claim_digest.unwrap_or_default());
        out.extend_from_slice(&proof_len.to_le_bytes());
        out.extend_from_slice(&self.proof);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader { bytes, pos: 0 };
        if r.take(4)? != ARTIFACT_MAGIC {
            return Err(Error::Serialization("not a proof artifact".into()));
        }
        let version = u16::from_le_bytes(r.array()?);
        if version != ARTIFACT_VERSION {
            return Err(Error::Serialization(format!("unsupported artifact version {}", version)));
        }
        let name_len = u16::from_le_bytes(r.array()?) as usize;
        let backend = std::str::from_utf8(r.take(name_len)?)
            .map_err(|_| Error::Serialization("backend name is not utf-8".into()))?
            .to_string();
        let circuit_digest: [u8; 32] = r.array()?;
        let public_inputs = PublicInputs::from_bytes(r.take(PUBLIC_INPUTS_LEN)?)
            .ok_or_else(|| Error::Serialization("malformed public inputs".into()))?;
        let has_claim: [u8; 1] = r.array()?;
        let digest: [u8; 32] = r.array()?;
        let claim_digest = match has_claim[0] {
            0 if digest == [0u8; 32] => None,
            1 => Some(digest),
            _ => return Err(Error::Serialization("malformed claim digest".into())),
        };
        let proof_len = u32::from_le_bytes(r.array()?) as usize;
        let proof = r.take(proof_len)?.to_vec();
        if r.pos != bytes.len() {
            return Err(Error::Serialization("trailing bytes after proof".into()));
        }
        Ok(Self {
            proof,
            public_inputs,
            claim_digest,
            circuit_digest,
            backend,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let out = self
            .bytes
            .get(self.pos..self.pos.saturating_add(n))
            .ok_or_else(|| Error::Serialization("truncated artifact".into()))?;
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
