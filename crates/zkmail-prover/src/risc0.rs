//! risc0 zkVM backend
//!
//! the guest re-runs input decoding, witness execution and claim
//! extraction, and commits the resulting [`Journal`]. the receipt proves
//! the whole statement without revealing the email.

use std::time::Instant;

use risc0_zkvm::{default_prover, ExecutorEnv, Receipt};
use tracing::{debug, info, warn};
use zkmail_circuit::{CircuitDefinition, ExecutionRequest, Journal, Statement};
use zkmail_methods::{ZKMAIL_GUEST_ELF, ZKMAIL_GUEST_ID};

use crate::backend::{ProvingBackend, ProvingJob};
use crate::cancel::CancelToken;
use crate::error::{BackendFault, Error, Result};

pub const BACKEND_NAME: &str = "risc0-zkvm-v1";

#[derive(Debug, Default, Clone, Copy)]
pub struct Risc0Backend;

impl Risc0Backend {
    pub fn new() -> Self {
        Self
    }

    fn matches(circuit: &CircuitDefinition, statement: &Statement, journal: &Journal) -> bool {
        journal.circuit_digest == circuit.digest() && &journal.statement == statement
    }
}

impl ProvingBackend for Risc0Backend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn prove(&self, circuit: &CircuitDefinition, job: &ProvingJob<'_>, cancel: &CancelToken) -> Result<Vec<u8>> {
        cancel.check()?;
        let request = ExecutionRequest::new(circuit, job.config, job.inputs)?;
        let frame = serde_json::to_vec(&request)?;
        let env = ExecutorEnv::builder()
            .write_frame(&frame)
            .build()
            .map_err(|e| Error::backend(BackendFault::Unavailable, format!("executor env: {}", e)))?;

        let start = Instant::now();
        let receipt = default_prover()
            .prove(env, ZKMAIL_GUEST_ELF)
            .map_err(|e| Error::backend(BackendFault::Internal, format!("zkvm prove: {}", e)))?
            .receipt;
        info!(
            "zkvm proof in {:?} (journal {} bytes)",
            start.elapsed(),
            receipt.journal.bytes.len()
        );
        cancel.check()?;

        let journal: Journal = receipt
            .journal
            .decode()
            .map_err(|e| Error::backend(BackendFault::Internal, format!("journal: {}", e)))?;
        if !Self::matches(circuit, &job.statement, &journal) {
            return Err(Error::backend(
                BackendFault::Internal,
                "guest committed a different statement than the host derived",
            ));
        }
        Ok(bincode::serialize(&receipt)?)
    }

    fn verify(&self, circuit: &CircuitDefinition, statement: &Statement, proof: &[u8]) -> Result<bool> {
        let receipt: Receipt = bincode::deserialize(proof)
            .map_err(|e| Error::InvalidProof(format!("undecodable receipt: {}", e)))?;
        if let Err(e) = receipt.verify(ZKMAIL_GUEST_ID) {
            warn!("receipt verification failed: {}", e);
            return Ok(false);
        }
        let journal: Journal = match receipt.journal.decode() {
            Ok(journal) => journal,
            Err(e) => {
                debug!("journal does not decode: {}", e);
                return Ok(false);
            }
        };
        Ok(Self::matches(circuit, statement, &journal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkmail_circuit::PublicInputs;

    #[test]
    fn test_garbage_receipt_is_invalid_proof() {
        let statement = Statement::new(PublicInputs {
            pubkey_hash: [0; 32],
            email_nullifier: [0x42; 32],
            header_length: 7,
            body_hash_index: 3,
        });
        let circuit = CircuitDefinition::standard(&Default::default());
        assert!(matches!(
            Risc0Backend::new().verify(&circuit, &statement, &[1, 2, 3]),
            Err(Error::InvalidProof(_))
        ));
    }
}
