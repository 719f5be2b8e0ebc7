//! error types for input building and witness execution

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("body too large: {len} bytes (max {max})")]
    BodyTooLarge { len: usize, max: usize },

    #[error("header too large: {len} bytes (max {max})")]
    HeaderTooLarge { len: usize, max: usize },

    /// inputs or configuration disagree with the circuit's declared shapes
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// a circuit constraint does not hold for the given inputs
    #[error("witness generation failed: {0}")]
    WitnessGenerationFailed(String),

    /// circuit asset could not be decoded
    #[error("invalid circuit: {0}")]
    InvalidCircuit(String),

    /// the signed body carries no recognisable payment
    #[error("claim: {0}")]
    Claim(String),
}

impl Error {
    pub(crate) fn witness(msg: impl Into<String>) -> Self {
        Error::WitnessGenerationFailed(msg.into())
    }
}
