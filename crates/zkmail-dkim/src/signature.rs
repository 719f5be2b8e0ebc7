//! DKIM-Signature field parsing

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::canonicalize::{Canonicalization, CanonicalizationPair};
use crate::tag_list::{strip_fws, TagList};
use crate::{Error, Result};

pub const DKIM_SIGNATURE_FIELD: &str = "DKIM-Signature";

/// signing algorithm from the `a=` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    RsaSha256,
}

impl SigningAlgorithm {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rsa-sha256" => Ok(Self::RsaSha256),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// parsed DKIM-Signature tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkimSignature {
    pub algorithm: SigningAlgorithm,
    pub canonicalization: CanonicalizationPair,
    /// signing domain (`d=`), lowercased
    pub domain: String,
    /// selector (`s=`)
    pub selector: String,
    /// signed header names (`h=`) in signing order
    pub signed_headers: Vec<String>,
    /// decoded `bh=`
    pub body_hash: Vec<u8>,
    /// decoded `b=`
    pub signature: Vec<u8>,
    /// `l=` body length limit
    pub body_length: Option<usize>,
    /// `i=` agent or user identifier
    pub identity: Option<String>,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

impl DkimSignature {
    /// parse the value of a DKIM-Signature field (everything after the colon)
    pub fn parse(value: &str) -> Result<Self> {
        let tags = TagList::parse(value)?;

        let version = tags.require("v")?;
        if version != "1" {
            return Err(Error::malformed(format!("unsupported DKIM version v={}", version)));
        }

        let algorithm = SigningAlgorithm::parse(tags.require("a")?)?;

        let canonicalization = match tags.get("c") {
            None => CanonicalizationPair::default(),
            Some(c) => parse_canonicalization(c)?,
        };

        let domain = tags.require("d")?.to_ascii_lowercase();
        let selector = tags.require("s")?.to_string();
        if domain.is_empty() || selector.is_empty() {
            return Err(Error::malformed("empty d= or s= tag"));
        }

        let signed_headers: Vec<String> = tags
            .require("h")?
            .split(':')
            .map(|h| strip_fws(h))
            .filter(|h| !h.is_empty())
            .collect();
        if !signed_headers.iter().any(|h| h.eq_ignore_ascii_case("from")) {
            return Err(Error::malformed("h= does not cover the From field"));
        }

        let body_hash = decode_base64_tag(tags.require("bh")?, "bh")?;
        let signature = decode_base64_tag(tags.require("b")?, "b")?;
        if signature.is_empty() {
            return Err(Error::malformed("empty b= tag"));
        }

        let body_length = tags
            .get("l")
            .map(|l| {
                l.parse::<usize>()
                    .map_err(|_| Error::malformed(format!("invalid l= tag: {}", l)))
            })
            .transpose()?;

        let timestamp = parse_u64_tag(&tags, "t")?;
        let expiration = parse_u64_tag(&tags, "x")?;
        if let (Some(t), Some(x)) = (timestamp, expiration) {
            if x < t {
                return Err(Error::malformed("x= earlier than t="));
            }
        }

        let identity = tags.get("i").map(|i| i.to_string());
        if let Some(ref i) = identity {
            let at_domain = i.rsplit('@').next().unwrap_or("").to_ascii_lowercase();
            if at_domain != domain && !at_domain.ends_with(&format!(".{}", domain)) {
                return Err(Error::malformed("i= is not within the signing domain"));
            }
        }

        Ok(Self {
            algorithm,
            canonicalization,
            domain,
            selector,
            signed_headers,
            body_hash,
            signature,
            body_length,
            identity,
            timestamp,
            expiration,
        })
    }
}

fn parse_canonicalization(c: &str) -> Result<CanonicalizationPair> {
    let (h, b) = match c.split_once('/') {
        Some((h, b)) => (h, Some(b)),
        None => (c, None),
    };
    let header = Canonicalization::parse(h)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("canonicalization {}", h)))?;
    let body = match b {
        None => Canonicalization::Simple,
        Some(b) => Canonicalization::parse(b)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("canonicalization {}", b)))?,
    };
    Ok(CanonicalizationPair { header, body })
}

fn decode_base64_tag(value: &str, name: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(strip_fws(value))
        .map_err(|e| Error::malformed(format!("{}= is not valid base64: {}", name, e)))
}

fn parse_u64_tag(tags: &TagList, name: &str) -> Result<Option<u64>> {
    tags.get(name)
        .map(|v| {
            v.parse::<u64>()
                .map_err(|_| Error::malformed(format!("invalid {}= tag: {}", name, v)))
        })
        .transpose()
}

/// return the field value with the `b=` tag value removed
///
/// the surrounding tag structure (and all other whitespace) is kept, so the
/// result canonicalizes to exactly what the signer hashed.
pub fn strip_signature_value(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for (i, spec) in value.split(|&b| b == b';').enumerate() {
        if i > 0 {
            out.push(b';');
        }
        match spec.iter().position(|&b| b == b'=') {
            Some(eq) if is_b_tag(&spec[..eq]) => out.extend_from_slice(&spec[..=eq]),
            _ => out.extend_from_slice(spec),
        }
    }
    out
}

fn is_b_tag(name: &[u8]) -> bool {
    let trimmed: Vec<u8> = name
        .iter()
        .copied()
        .filter(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .collect();
    trimmed == b"b"
}
