//! error types for dkim extraction and verification

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// structural problem with the message or its DKIM-Signature field
    #[error("malformed email: {0}")]
    MalformedEmail(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// body hash mismatch or failed rsa check
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    /// key lookup failed, timed out or returned an unusable record
    #[error("key resolution failed: {0}")]
    KeyResolutionFailed(String),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedEmail(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::SignatureInvalid(msg.into())
    }
}
