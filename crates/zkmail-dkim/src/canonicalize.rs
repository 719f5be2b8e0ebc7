//! header and body canonicalization (RFC 6376 §3.4)
//!
//! both algorithms are whitespace and order sensitive. any deviation changes
//! the hashed bytes, which in turn changes what the circuit receives.

use crate::message::{is_wsp, trim_wsp};

/// canonicalization algorithm for one half of the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Canonicalization {
    #[default]
    Simple,
    Relaxed,
}

impl Canonicalization {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "relaxed" => Some(Self::Relaxed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

/// `c=` tag value: header algorithm / body algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanonicalizationPair {
    pub header: Canonicalization,
    pub body: Canonicalization,
}

impl std::fmt::Display for CanonicalizationPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.header.as_str(), self.body.as_str())
    }
}

/// append one canonicalized header field to `out`, without a trailing CRLF
///
/// `name` and `value` are the raw halves around the first colon.
pub fn canonicalize_header_field(
    canon: Canonicalization,
    name: &[u8],
    value: &[u8],
    out: &mut Vec<u8>,
) {
    match canon {
        Canonicalization::Simple => {
            out.extend_from_slice(name);
            out.push(b':');
            out.extend_from_slice(value);
        }
        Canonicalization::Relaxed => {
            out.extend(trim_wsp(name).iter().map(|b| b.to_ascii_lowercase()));
            out.push(b':');

            // unfold, then collapse every WSP run to one SP
            let mut collapsed = Vec::with_capacity(value.len());
            let mut in_wsp = false;
            let mut i = 0;
            while i < value.len() {
                let b = value[i];
                if b == b'\r' && value.get(i + 1) == Some(&b'\n') {
                    i += 2;
                    continue;
                }
                if is_wsp(b) {
                    if !in_wsp {
                        collapsed.push(b' ');
                    }
                    in_wsp = true;
                } else {
                    collapsed.push(b);
                    in_wsp = false;
                }
                i += 1;
            }
            out.extend_from_slice(trim_wsp(&collapsed));
        }
    }
}

/// canonicalize a message body
pub fn canonicalize_body(canon: Canonicalization, body: &[u8]) -> Vec<u8> {
    match canon {
        Canonicalization::Simple => simple_body(body),
        Canonicalization::Relaxed => relaxed_body(body),
    }
}

fn simple_body(body: &[u8]) -> Vec<u8> {
    let mut end = body.len();
    while end >= 4 && &body[end - 4..end] == b"\r\n\r\n" {
        end -= 2;
    }
    let body = &body[..end];
    if body.is_empty() {
        return b"\r\n".to_vec();
    }
    let mut out = body.to_vec();
    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn relaxed_body(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut lines = split_lines(body).peekable();

    while let Some(line) = lines.next() {
        let mut in_wsp = false;
        let mut buf = Vec::with_capacity(line.len());
        for &b in line {
            if is_wsp(b) {
                if !in_wsp {
                    buf.push(b' ');
                }
                in_wsp = true;
            } else {
                buf.push(b);
                in_wsp = false;
            }
        }
        if buf.last() == Some(&b' ') {
            buf.pop();
        }
        out.extend_from_slice(&buf);
        if lines.peek().is_some() {
            out.extend_from_slice(b"\r\n");
        }
    }

    while out.ends_with(b"\r\n") {
        out.truncate(out.len() - 2);
    }
    if !out.is_empty() {
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// split on CRLF; a body ending in CRLF yields a final empty segment
fn split_lines(body: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = Some(body);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.windows(2).position(|w| w == b"\r\n") {
            Some(pos) => {
                rest = Some(&current[pos + 2..]);
                Some(&current[..pos])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}
