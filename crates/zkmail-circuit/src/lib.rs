//! circuit side of the email proof pipeline
//!
//! turns a verified [`zkmail_dkim::DkimRecord`] into the fixed-shape inputs
//! the email circuit declares, and executes the circuit program to obtain a
//! witness and its public outputs. the payment a body describes and the
//! [`Statement`] a proof attests to are derived here too, so a zkVM guest
//! can re-derive them from the inputs alone.
//!
//! all shapes come from one [`CircuitConfig`]; a circuit definition whose
//! ABI disagrees with it is rejected at load time.

pub mod bounded;
pub mod bytecode;
pub mod claim;
pub mod config;
pub mod definition;
pub mod error;
pub mod inputs;
pub mod limbs;
pub mod public;
pub mod rows;
pub mod statement;
pub mod witness;

#[cfg(test)]
mod proptests;

pub use bounded::BoundedVec;
pub use bytecode::{Op, OutputKind, Program, Slot};
pub use claim::{Direction, PaymentClaim};
pub use config::{CircuitConfig, ReductionParam};
pub use definition::{Abi, AbiParam, AbiType, CircuitDefinition};
pub use error::{Error, Result};
pub use inputs::CircuitInputs;
pub use limbs::{join_limbs, reduction_constant, split_limbs, RsaPublicKeyLimbs};
pub use public::PublicInputs;
pub use rows::{RowShape, SignatureRows};
pub use statement::{derive_statement, ExecutionRequest, Journal, Statement};
pub use witness::{execute, Witness};
