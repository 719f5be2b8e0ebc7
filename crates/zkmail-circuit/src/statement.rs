//! what a proof attests to
//!
//! a [`Statement`] is the public inputs plus, for payment emails, the
//! digest of the [`PaymentClaim`] read from the signed body. the
//! [`ExecutionRequest`] is everything a zkVM guest needs to re-derive a
//! statement on its own; the guest commits the resulting [`Journal`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::claim::PaymentClaim;
use crate::config::CircuitConfig;
use crate::definition::CircuitDefinition;
use crate::inputs::CircuitInputs;
use crate::public::PublicInputs;
use crate::witness::{execute, Witness};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Statement {
    pub public: PublicInputs,
    pub claim_digest: Option<[u8; 32]>,
}

impl Statement {
    pub fn new(public: PublicInputs) -> Self {
        Self {
            public,
            claim_digest: None,
        }
    }

    pub fn with_claim(mut self, claim: &PaymentClaim) -> Self {
        self.claim_digest = Some(claim.digest());
        self
    }

    /// public inputs, a presence byte, then the claim digest or zeros
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.public.to_bytes();
        out.push(u8::from(self.claim_digest.is_some()));
        out.extend_from_slice(&self.claim_digest.unwrap_or_default());
        out
    }
}

/// the statement an execution proves for one set of inputs
///
/// a body without a recognisable payment yields a statement without a claim.
pub fn derive_statement(witness: &Witness, inputs: &CircuitInputs) -> Statement {
    let statement = Statement::new(witness.public);
    match PaymentClaim::from_inputs(inputs) {
        Ok(claim) => statement.with_claim(&claim),
        Err(e) => {
            debug!("no claim bound to the statement: {}", e);
            statement
        }
    }
}

/// guest output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub circuit_digest: [u8; 32],
    pub statement: Statement,
}

/// guest input: the circuit asset, the shape config and the ABI input map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub circuit: String,
    pub config: CircuitConfig,
    pub inputs: Value,
}

impl ExecutionRequest {
    pub fn new(circuit: &CircuitDefinition, config: &CircuitConfig, inputs: &CircuitInputs) -> Result<Self> {
        Ok(Self {
            circuit: circuit.to_json()?,
            config: config.clone(),
            inputs: inputs.to_abi_json(),
        })
    }

    /// decode, execute and derive the statement; fails on any broken constraint
    pub fn run(&self) -> Result<Journal> {
        let circuit = CircuitDefinition::from_json(&self.circuit)?;
        circuit.validate(&self.config)?;
        let inputs = CircuitInputs::from_abi_json(&self.inputs)?;
        let witness = execute(&circuit, &self.config, &inputs)?;
        Ok(Journal {
            circuit_digest: circuit.digest(),
            statement: derive_statement(&witness, &inputs),
        })
    }
}
