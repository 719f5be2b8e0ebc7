//! proving stage of the email proof pipeline
//!
//! [`Pipeline`] takes a raw email through DKIM verification, circuit input
//! layout, witness generation and proving, and hands back a
//! [`ProofArtifact`]. proof systems plug in through [`ProvingBackend`];
//! the built-in [`CommitmentBackend`] commits to the whole witness under
//! salted merkle leaves and opens only the signature rows, which it checks
//! against the public inputs. it hides the email but binds `header_length`,
//! `body_hash_index` and the claim digest only through the transcript seal;
//! the `risc0` feature adds `Risc0Backend`, which re-executes the circuit in
//! a zkVM and proves the whole statement.
//!
//! ```no_run
//! use std::sync::Arc;
//! use zkmail_circuit::{CircuitConfig, CircuitDefinition};
//! use zkmail_dkim::{RawEmail, StaticKeyResolver};
//! use zkmail_prover::{CancelToken, CommitmentBackend, Pipeline};
//!
//! # async fn demo(eml: Vec<u8>, key_record: &str) -> zkmail_prover::Result<()> {
//! let config = CircuitConfig::default();
//! let circuit = Arc::new(CircuitDefinition::standard(&config));
//! let resolver = StaticKeyResolver::new().with_record("example.com", "sel1", key_record);
//! let pipeline = Pipeline::new(circuit, config, Arc::new(CommitmentBackend::new()), Arc::new(resolver))?;
//!
//! let artifact = pipeline.run(&RawEmail::new(eml), &CancelToken::new()).await?;
//! assert!(pipeline.verify(&artifact)?);
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod backend;
pub mod cancel;
pub mod commitment;
pub mod consumer;
pub mod error;
pub mod merkle;
pub mod pipeline;
#[cfg(feature = "risc0")]
pub mod risc0;
pub mod transcript;

pub use artifact::ProofArtifact;
pub use backend::{ProvingBackend, ProvingJob};
pub use cancel::CancelToken;
pub use commitment::CommitmentBackend;
pub use consumer::{LocalVerifier, ProofConsumer};
pub use error::{BackendFault, Error, Result};
pub use pipeline::Pipeline;
#[cfg(feature = "risc0")]
pub use risc0::Risc0Backend;
pub use zkmail_circuit::{Direction, PaymentClaim, Statement};
