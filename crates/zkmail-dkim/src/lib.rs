//! DKIM extraction and verification for email proofs
//!
//! Verifies the DKIM-Signature of a raw `.eml` message (RFC 6376) and returns
//! the signed material byte-exact, ready to be laid out as circuit inputs:
//!
//! - canonicalized header bytes, exactly as hashed for the signature
//! - canonicalized body bytes, exactly as hashed for `bh=`
//! - offset of the `bh=` value and of the DKIM-Signature field inside the header
//! - the signer's RSA public key and the signature
//!
//! # Features
//!
//! - `dns`: resolve keys with TXT lookups via `trust-dns-resolver`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zkmail_dkim::{RawEmail, StaticKeyResolver, Verifier};
//!
//! let resolver = StaticKeyResolver::new().with_record("example.com", "sel1", txt_record);
//! let verifier = Verifier::new(Arc::new(resolver)).with_expected_domain("example.com");
//! let record = verifier.verify(&RawEmail::new(eml_bytes)).await?;
//! println!("bh= at {}", record.body_hash_index);
//! ```

pub mod canonicalize;
pub mod error;
pub mod key;
pub mod message;
pub mod signature;
pub mod tag_list;
pub mod verify;

pub use canonicalize::{Canonicalization, CanonicalizationPair};
pub use error::{Error, Result};
pub use key::{
    key_record_name, resolve_with_timeout, DkimKeyRecord, KeyResolver, StaticKeyResolver,
    DEFAULT_RESOLVE_TIMEOUT,
};
#[cfg(feature = "dns")]
pub use key::DnsKeyResolver;
pub use message::{parse_header_fields, split_message, HeaderField, RawEmail};
pub use signature::{DkimSignature, SigningAlgorithm};
pub use verify::{DkimRecord, Sequence, Verifier};

pub use rsa;
pub use rsa::RsaPublicKey;
