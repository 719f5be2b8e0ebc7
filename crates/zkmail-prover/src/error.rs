//! pipeline level errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// why a proving backend failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFault {
    /// backend could not be initialized or reached; needs an operator
    Unavailable,
    /// ran out of memory, threads or similar
    ResourceExhausted,
    Internal,
}

impl std::fmt::Display for BackendFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendFault::Unavailable => write!(f, "unavailable"),
            BackendFault::ResourceExhausted => write!(f, "resource exhausted"),
            BackendFault::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Dkim(#[from] zkmail_dkim::Error),

    #[error(transparent)]
    Circuit(#[from] zkmail_circuit::Error),

    #[error("proving backend error ({fault}): {reason}")]
    ProvingBackendError { fault: BackendFault, reason: String },

    #[error("proof generation cancelled")]
    Cancelled,

    #[error("invalid proof: {0}")]
    InvalidProof(String),

    #[error("rejected by consumer: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn backend(fault: BackendFault, reason: impl Into<String>) -> Self {
        Error::ProvingBackendError {
            fault,
            reason: reason.into(),
        }
    }

    /// false only for faults that need operator intervention
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::ProvingBackendError {
                fault: BackendFault::Unavailable,
                ..
            }
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
