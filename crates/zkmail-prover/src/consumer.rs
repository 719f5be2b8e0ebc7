//! where finished proofs go
//!
//! an escrow contract, a relayer or a settlement service implements
//! [`ProofConsumer`]; [`LocalVerifier`] is the in-process consumer.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;
use zkmail_circuit::{CircuitDefinition, PaymentClaim};

use crate::artifact::ProofArtifact;
use crate::backend::ProvingBackend;
use crate::{Error, Result};

#[async_trait]
pub trait ProofConsumer: Send + Sync {
    async fn submit(&self, artifact: &ProofArtifact, claim: Option<&PaymentClaim>) -> Result<()>;
}

/// re-verifies proofs, pins signing keys, refuses replayed emails and
/// claims the proof is not bound to
pub struct LocalVerifier {
    circuit: Arc<CircuitDefinition>,
    backend: Arc<dyn ProvingBackend>,
    trusted_keys: HashSet<[u8; 32]>,
    nullifiers: Mutex<HashSet<[u8; 32]>>,
}

impl LocalVerifier {
    pub fn new(circuit: Arc<CircuitDefinition>, backend: Arc<dyn ProvingBackend>) -> Self {
        Self {
            circuit,
            backend,
            trusted_keys: HashSet::new(),
            nullifiers: Mutex::new(HashSet::new()),
        }
    }

    /// once any key is trusted, proofs under other keys are rejected
    pub fn trust_pubkey_hash(mut self, pubkey_hash: [u8; 32]) -> Self {
        self.trusted_keys.insert(pubkey_hash);
        self
    }

    pub fn accepted(&self) -> usize {
        self.nullifiers.lock().len()
    }
}

#[async_trait]
impl ProofConsumer for LocalVerifier {
    async fn submit(&self, artifact: &ProofArtifact, claim: Option<&PaymentClaim>) -> Result<()> {
        let public = &artifact.public_inputs;
        if !self.trusted_keys.is_empty() && !self.trusted_keys.contains(&public.pubkey_hash) {
            return Err(Error::Rejected(format!(
                "untrusted signing key {}",
                hex::encode(public.pubkey_hash)
            )));
        }
        if artifact.backend != self.backend.name() || artifact.circuit_digest != self.circuit.digest() {
            return Err(Error::Rejected("artifact is for another circuit or backend".into()));
        }
        if let Some(claim) = claim {
            if claim.amount_micros == 0 {
                return Err(Error::Rejected("zero amount claim".into()));
            }
            if artifact.claim_digest != Some(claim.digest()) {
                return Err(Error::Rejected("claim does not match the one the proof is bound to".into()));
            }
        }
        if !self
            .backend
            .verify(&self.circuit, &artifact.statement(), &artifact.proof)?
        {
            return Err(Error::InvalidProof("proof does not verify".into()));
        }
        if !self.nullifiers.lock().insert(public.email_nullifier) {
            return Err(Error::Rejected(format!(
                "email {} already used",
                hex::encode(public.email_nullifier)
            )));
        }
        match claim {
            Some(c) => info!(
                "accepted proof: {:?} {} micro {} with {}",
                c.direction, c.amount_micros, c.currency, c.counterparty
            ),
            None => info!("accepted proof {}", hex::encode(public.email_nullifier)),
        }
        Ok(())
    }
}
