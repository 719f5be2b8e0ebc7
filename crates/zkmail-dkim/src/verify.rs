//! DKIM verification and extraction of the signed material

use std::sync::Arc;
use std::time::Duration;

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::canonicalize::{canonicalize_body, canonicalize_header_field, CanonicalizationPair};
use crate::key::{resolve_with_timeout, KeyResolver, DEFAULT_RESOLVE_TIMEOUT};
use crate::message::{parse_header_fields, split_message, HeaderField, RawEmail};
use crate::signature::{strip_signature_value, DkimSignature, DKIM_SIGNATURE_FIELD};
use crate::{Error, Result};

/// byte range inside the signed header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sequence {
    pub index: usize,
    pub length: usize,
}

impl Sequence {
    pub fn end(&self) -> usize {
        self.index + self.length
    }
}

/// output of a successful verification
///
/// `header` and `body` are the canonicalized bytes exactly as they were fed
/// to the hashes, so an in-circuit recomputation sees the same input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkimRecord {
    pub header: Vec<u8>,
    pub body: Vec<u8>,
    /// offset of the `bh=` value inside `header`
    pub body_hash_index: usize,
    /// the DKIM-Signature field (b= emptied) inside `header`
    pub dkim_field: Sequence,
    pub public_key: RsaPublicKey,
    pub signature: Vec<u8>,
    pub domain: String,
    pub selector: String,
    pub canonicalization: CanonicalizationPair,
}

impl DkimRecord {
    /// big-endian modulus bytes
    pub fn modulus_bytes(&self) -> Vec<u8> {
        self.public_key.n().to_bytes_be()
    }

    pub fn exponent_bytes(&self) -> Vec<u8> {
        self.public_key.e().to_bytes_be()
    }

    pub fn modulus_bits(&self) -> usize {
        self.public_key.n().bits()
    }

    /// the bytes of the `bh=` value (base64, 44 chars for sha256)
    pub fn body_hash_b64(&self) -> &[u8] {
        let end = (self.body_hash_index + 44).min(self.header.len());
        &self.header[self.body_hash_index..end]
    }
}

/// verifies DKIM signatures against keys from a [`KeyResolver`]
#[derive(Clone)]
pub struct Verifier {
    resolver: Arc<dyn KeyResolver>,
    expected_domain: Option<String>,
    timeout: Duration,
}

impl Verifier {
    pub fn new(resolver: Arc<dyn KeyResolver>) -> Self {
        Self {
            resolver,
            expected_domain: None,
            timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// only consider signatures with `d=` equal to `domain`
    pub fn with_expected_domain(mut self, domain: impl Into<String>) -> Self {
        self.expected_domain = Some(domain.into().to_ascii_lowercase());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// verify the first acceptable signature and return its record
    ///
    /// signatures are tried in header order. when none verifies, the error
    /// of the last one tried is returned.
    pub async fn verify(&self, email: &RawEmail) -> Result<DkimRecord> {
        let (block, body) = split_message(email.as_bytes())?;
        let fields = parse_header_fields(block)?;
        debug!("header block {} bytes, {} fields, body {} bytes", block.len(), fields.len(), body.len());

        let candidates: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name_eq(DKIM_SIGNATURE_FIELD))
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return Err(Error::malformed("no DKIM-Signature header"));
        }

        let mut last_err = None;
        for idx in candidates {
            let value = String::from_utf8_lossy(fields[idx].value);
            let sig = match DkimSignature::parse(&value) {
                Ok(sig) => sig,
                Err(e) => {
                    warn!("skipping unparsable DKIM-Signature: {}", e);
                    last_err = Some(e);
                    continue;
                }
            };
            if let Some(ref expected) = self.expected_domain {
                if &sig.domain != expected {
                    debug!("skipping signature for d={}", sig.domain);
                    continue;
                }
            }
            match self.verify_signature(&fields, idx, &sig, body).await {
                Ok(record) => {
                    info!(
                        "dkim pass d={} s={} c={} header={}B body={}B",
                        record.domain,
                        record.selector,
                        record.canonicalization,
                        record.header.len(),
                        record.body.len()
                    );
                    return Ok(record);
                }
                Err(e) => {
                    warn!("dkim fail d={} s={}: {}", sig.domain, sig.selector, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| match self.expected_domain {
            Some(ref d) => Error::malformed(format!("no DKIM-Signature for domain {}", d)),
            None => Error::malformed("no usable DKIM-Signature"),
        }))
    }

    async fn verify_signature(
        &self,
        fields: &[HeaderField<'_>],
        dkim_idx: usize,
        sig: &DkimSignature,
        body: &[u8],
    ) -> Result<DkimRecord> {
        let canon = sig.canonicalization;

        let mut canonical_body = canonicalize_body(canon.body, body);
        if let Some(limit) = sig.body_length {
            if limit > canonical_body.len() {
                return Err(Error::malformed(format!(
                    "l={} exceeds canonical body length {}",
                    limit,
                    canonical_body.len()
                )));
            }
            canonical_body.truncate(limit);
        }
        let body_hash = Sha256::digest(&canonical_body);
        if body_hash.as_slice() != sig.body_hash.as_slice() {
            return Err(Error::invalid("body hash mismatch"));
        }

        let (header, dkim_field) = signed_header(fields, dkim_idx, sig, canon);
        let body_hash_index = find_body_hash_value(&header[dkim_field.index..dkim_field.end()])
            .map(|i| dkim_field.index + i)
            .ok_or_else(|| Error::malformed("bh= tag not found in canonical DKIM field"))?;

        let key = resolve_with_timeout(self.resolver.as_ref(), &sig.domain, &sig.selector, self.timeout)
            .await?;
        if key.is_testing() {
            debug!("key for {} is in testing mode", sig.domain);
        }
        let public_key = key.public_key;

        check_signature(&public_key, &header, &sig.signature)?;

        Ok(DkimRecord {
            header,
            body: canonical_body,
            body_hash_index,
            dkim_field,
            public_key,
            signature: sig.signature.clone(),
            domain: sig.domain.clone(),
            selector: sig.selector.clone(),
            canonicalization: canon,
        })
    }
}

/// build the header hash input and locate the DKIM field inside it
fn signed_header(
    fields: &[HeaderField<'_>],
    dkim_idx: usize,
    sig: &DkimSignature,
    canon: CanonicalizationPair,
) -> (Vec<u8>, Sequence) {
    let mut header = Vec::new();
    let mut used = vec![false; fields.len()];

    for name in &sig.signed_headers {
        // bottom-up; a name with no unused instance left contributes nothing
        let found = fields
            .iter()
            .enumerate()
            .rev()
            .find(|(i, f)| !used[*i] && f.name_eq(name));
        if let Some((i, field)) = found {
            used[i] = true;
            canonicalize_header_field(canon.header, field.name, field.value, &mut header);
            header.extend_from_slice(b"\r\n");
        }
    }

    let dkim = &fields[dkim_idx];
    let index = header.len();
    let stripped = strip_signature_value(dkim.value);
    canonicalize_header_field(canon.header, dkim.name, &stripped, &mut header);
    let length = header.len() - index;

    (header, Sequence { index, length })
}

/// offset of the first byte of the `bh=` value within a canonical DKIM field
fn find_body_hash_value(field: &[u8]) -> Option<usize> {
    let colon = field.iter().position(|&b| b == b':')?;
    let mut offset = colon + 1;
    for spec in field[colon + 1..].split(|&b| b == b';') {
        if let Some(eq) = spec.iter().position(|&b| b == b'=') {
            let name: Vec<u8> = spec[..eq]
                .iter()
                .copied()
                .filter(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
                .collect();
            if name == b"bh" {
                let skip = spec[eq + 1..]
                    .iter()
                    .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
                    .count();
                return Some(offset + eq + 1 + skip);
            }
        }
        offset += spec.len() + 1;
    }
    None
}

fn check_signature(key: &RsaPublicKey, header: &[u8], signature: &[u8]) -> Result<()> {
    if signature.len() > key.size() {
        return Err(Error::invalid(format!(
            "signature is {} bytes, key is {}",
            signature.len(),
            key.size()
        )));
    }
    if &BigUint::from_bytes_be(signature) >= key.n() {
        return Err(Error::invalid("signature is not reduced modulo n"));
    }

    let hashed = Sha256::digest(header);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, signature)
        .map_err(|e| Error::invalid(format!("rsa verification failed: {}", e)))
}
