//! the seam between witness generation and a concrete proof system

use zkmail_circuit::{CircuitConfig, CircuitDefinition, CircuitInputs, Statement, Witness};

use crate::cancel::CancelToken;
use crate::Result;

/// everything one proof is built from
///
/// backends that prove the witness directly read `witness`; backends that
/// re-execute the circuit inside a VM read `inputs` and `config`. both must
/// end up attesting to `statement`.
#[derive(Debug, Clone, Copy)]
pub struct ProvingJob<'a> {
    pub config: &'a CircuitConfig,
    pub inputs: &'a CircuitInputs,
    pub witness: &'a Witness,
    pub statement: Statement,
}

/// a proof system that can prove and check circuit executions
///
/// implementations are shared across concurrent requests and must not keep
/// per-proof state. `prove` should poll `cancel` during long phases and
/// return `Error::Cancelled` once it is set.
pub trait ProvingBackend: Send + Sync {
    /// recorded in artifacts; `verify` refuses artifacts from other backends
    fn name(&self) -> &str;

    fn prove(&self, circuit: &CircuitDefinition, job: &ProvingJob<'_>, cancel: &CancelToken) -> Result<Vec<u8>>;

    /// `Ok(false)` for a well-formed proof that does not check out
    fn verify(&self, circuit: &CircuitDefinition, statement: &Statement, proof: &[u8]) -> Result<bool>;
}
