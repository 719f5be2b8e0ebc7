//! email to proof orchestration

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use zkmail_circuit::{derive_statement, execute, CircuitConfig, CircuitDefinition, CircuitInputs, Witness};
use zkmail_dkim::{DkimRecord, KeyResolver, RawEmail, Verifier};

use crate::artifact::ProofArtifact;
use crate::backend::{ProvingBackend, ProvingJob};
use crate::cancel::CancelToken;
use crate::error::{BackendFault, Error, Result};

/// one circuit, one backend, one key source; cheap to clone and share
/// between concurrent requests
#[derive(Clone)]
pub struct Pipeline {
    circuit: Arc<CircuitDefinition>,
    config: Arc<CircuitConfig>,
    backend: Arc<dyn ProvingBackend>,
    verifier: Verifier,
}

impl Pipeline {
    /// fails when the circuit's declared inputs disagree with `config`
    pub fn new(
        circuit: Arc<CircuitDefinition>,
        config: CircuitConfig,
        backend: Arc<dyn ProvingBackend>,
        resolver: Arc<dyn KeyResolver>,
    ) -> Result<Self> {
        circuit.validate(&config)?;
        info!(
            "pipeline ready: circuit {} v{}, backend {}",
            circuit.name,
            circuit.version,
            backend.name()
        );
        Ok(Self {
            circuit,
            config: Arc::new(config),
            backend,
            verifier: Verifier::new(resolver),
        })
    }

    /// only accept signatures from `domain`
    pub fn with_expected_domain(mut self, domain: impl Into<String>) -> Self {
        self.verifier = self.verifier.with_expected_domain(domain);
        self
    }

    pub fn with_key_timeout(mut self, timeout: Duration) -> Self {
        self.verifier = self.verifier.with_timeout(timeout);
        self
    }

    pub fn circuit(&self) -> &CircuitDefinition {
        &self.circuit
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn ProvingBackend {
        self.backend.as_ref()
    }

    pub async fn extract(&self, raw: &RawEmail) -> Result<DkimRecord> {
        let record = self.verifier.verify(raw).await?;
        info!(
            "dkim verified for {} (selector {}, {} bit key)",
            record.domain,
            record.selector,
            record.modulus_bits()
        );
        Ok(record)
    }

    pub fn build_inputs(&self, record: &DkimRecord) -> Result<CircuitInputs> {
        Ok(CircuitInputs::build(record, &self.config)?)
    }

    pub fn generate_witness(&self, inputs: &CircuitInputs, cancel: &CancelToken) -> Result<Witness> {
        cancel.check()?;
        let start = Instant::now();
        let witness = execute(&self.circuit, &self.config, inputs)?;
        debug!("witness: {} words in {:?}", witness.len(), start.elapsed());
        Ok(witness)
    }

    /// binds the payment claim the signed body carries, when there is one
    pub fn prove_witness(
        &self,
        inputs: &CircuitInputs,
        witness: &Witness,
        cancel: &CancelToken,
    ) -> Result<ProofArtifact> {
        cancel.check()?;
        let start = Instant::now();
        let job = ProvingJob {
            config: &self.config,
            inputs,
            witness,
            statement: derive_statement(witness, inputs),
        };
        let proof = self.backend.prove(&self.circuit, &job, cancel)?;
        info!(
            "proved with {} in {:?} ({} bytes)",
            self.backend.name(),
            start.elapsed(),
            proof.len()
        );
        Ok(ProofArtifact {
            proof,
            public_inputs: job.statement.public,
            claim_digest: job.statement.claim_digest,
            circuit_digest: self.circuit.digest(),
            backend: self.backend.name().to_string(),
        })
    }

    /// witness then proof; blocking
    pub fn prove_inputs(&self, inputs: &CircuitInputs, cancel: &CancelToken) -> Result<ProofArtifact> {
        let witness = self.generate_witness(inputs, cancel)?;
        self.prove_witness(inputs, &witness, cancel)
    }

    /// the whole pipeline; the cpu bound part runs on the blocking pool
    pub async fn run(&self, raw: &RawEmail, cancel: &CancelToken) -> Result<ProofArtifact> {
        cancel.check()?;
        let record = self.extract(raw).await?;
        let inputs = self.build_inputs(&record)?;
        cancel.check()?;

        let pipeline = self.clone();
        let token = cancel.clone();
        let result = tokio::task::spawn_blocking(move || pipeline.prove_inputs(&inputs, &token))
            .await
            .map_err(|e| Error::backend(BackendFault::Internal, format!("proving task failed: {}", e)))?;

        match &result {
            Err(Error::Cancelled) => info!("proof for {} cancelled", record.domain),
            Err(e) => warn!("proof for {} failed: {}", record.domain, e),
            Ok(_) => {}
        }
        result
    }

    /// check an artifact against this pipeline's circuit and backend
    pub fn verify(&self, artifact: &ProofArtifact) -> Result<bool> {
        if artifact.backend != self.backend.name() {
            return Err(Error::InvalidProof(format!(
                "artifact from backend {}, expected {}",
                artifact.backend,
                self.backend.name()
            )));
        }
        if artifact.circuit_digest != self.circuit.digest() {
            debug!("artifact was produced for another circuit");
            return Ok(false);
        }
        self.backend
            .verify(&self.circuit, &artifact.statement(), &artifact.proof)
    }
}
