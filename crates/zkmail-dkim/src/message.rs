//! raw message handling
//!
//! the verifier never re-serializes anything: header fields are kept as the
//! exact byte ranges they occupy in the input so that the bytes handed to the
//! circuit are the bytes that were signed.

use crate::{Error, Result};

const CRLF: &[u8] = b"\r\n";

/// one `.eml` file, read once and consumed by the verifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEmail {
    bytes: Vec<u8>,
}

impl RawEmail {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// rewrite lone LF terminators to CRLF
    ///
    /// exports from mail clients frequently drop the CR. this is an explicit
    /// opt-in step; the verifier itself rejects bare LF input.
    pub fn normalize_line_endings(self) -> Self {
        let mut out = Vec::with_capacity(self.bytes.len() + self.bytes.len() / 32);
        let mut prev = 0u8;
        for &b in &self.bytes {
            if b == b'\n' && prev != b'\r' {
                out.push(b'\r');
            }
            out.push(b);
            prev = b;
        }
        Self { bytes: out }
    }
}

impl From<Vec<u8>> for RawEmail {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&str> for RawEmail {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes().to_vec())
    }
}

/// split at the first empty line
///
/// the header slice keeps the CRLF that terminates its last field, the body
/// starts right after the separating empty line.
pub fn split_message(raw: &[u8]) -> Result<(&[u8], &[u8])> {
    if raw.is_empty() {
        return Err(Error::malformed("empty message"));
    }
    if let Some(pos) = bare_lf(raw) {
        return Err(Error::malformed(format!(
            "bare LF at byte {}, normalize to CRLF before verifying",
            pos
        )));
    }

    // an empty line directly at the start means there are no headers at all
    if raw.starts_with(CRLF) {
        return Err(Error::malformed("message has no header fields"));
    }

    match find(raw, b"\r\n\r\n") {
        Some(pos) => Ok((&raw[..pos + 2], &raw[pos + 4..])),
        None => {
            if raw.ends_with(CRLF) {
                Ok((raw, &[]))
            } else {
                Err(Error::malformed("header block is not CRLF terminated"))
            }
        }
    }
}

/// a header field as it appears in the header block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderField<'a> {
    /// field name exactly as written (no trailing whitespace removal)
    pub name: &'a [u8],
    /// everything after the colon, folding included, without the final CRLF
    pub value: &'a [u8],
    /// byte offset of the field within the header block
    pub offset: usize,
}

impl<'a> HeaderField<'a> {
    /// name with surrounding whitespace removed
    pub fn trimmed_name(&self) -> &'a [u8] {
        trim_wsp(self.name)
    }

    pub fn name_eq(&self, other: &str) -> bool {
        self.trimmed_name().eq_ignore_ascii_case(other.as_bytes())
    }

    /// the original field bytes including the terminating CRLF
    pub fn raw(&self, block: &'a [u8]) -> &'a [u8] {
        let end = self.offset + self.name.len() + 1 + self.value.len() + 2;
        &block[self.offset..end]
    }
}

/// parse a CRLF-terminated header block into fields
///
/// continuation lines (starting with SP or HTAB) are kept inside the value.
pub fn parse_header_fields(block: &[u8]) -> Result<Vec<HeaderField<'_>>> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < block.len() {
        let start = pos;
        // find the end of this field: a CRLF not followed by WSP
        let mut end = None;
        let mut cursor = pos;
        while let Some(rel) = find(&block[cursor..], CRLF) {
            let crlf_at = cursor + rel;
            let next = block.get(crlf_at + 2).copied();
            if matches!(next, Some(b' ') | Some(b'\t')) {
                cursor = crlf_at + 2;
                continue;
            }
            end = Some(crlf_at);
            break;
        }
        let end = end.ok_or_else(|| Error::malformed("unterminated header field"))?;
        let line = &block[start..end];

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| Error::malformed("header field without colon"))?;
        let name = &line[..colon];
        if trim_wsp(name).is_empty() || name.iter().any(|&b| b == b'\r' || b == b'\n') {
            return Err(Error::malformed("invalid header field name"));
        }

        fields.push(HeaderField {
            name,
            value: &line[colon + 1..],
            offset: start,
        });
        pos = end + 2;
    }

    Ok(fields)
}

/// offset of the first LF not preceded by CR
fn bare_lf(raw: &[u8]) -> Option<usize> {
    raw.iter()
        .enumerate()
        .position(|(i, &b)| b == b'\n' && (i == 0 || raw[i - 1] != b'\r'))
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub(crate) fn is_wsp(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

pub(crate) fn trim_wsp(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| !is_wsp(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| !is_wsp(b)).map_or(start, |p| p + 1);
    &bytes[start..end]
}
