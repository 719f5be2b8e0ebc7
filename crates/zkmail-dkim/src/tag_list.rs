//! tag=value lists (RFC 6376 §3.2)
//!
//! shared by the DKIM-Signature field and the `_domainkey` TXT record.

use crate::{Error, Result};

/// ordered tag list with duplicate detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagList {
    tags: Vec<(String, String)>,
}

impl TagList {
    /// parse a tag list; whitespace around names and values is dropped,
    /// whitespace inside values is kept for the caller to interpret
    pub fn parse(input: &str) -> Result<Self> {
        let mut tags: Vec<(String, String)> = Vec::new();

        for spec in input.split(';') {
            let spec = trim_fws(spec);
            if spec.is_empty() {
                // trailing semicolon is allowed
                continue;
            }
            let (name, value) = spec
                .split_once('=')
                .ok_or_else(|| Error::malformed(format!("tag without '=': {}", spec)))?;
            let name = trim_fws(name);
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
                return Err(Error::malformed(format!("invalid tag name: {:?}", name)));
            }
            if tags.iter().any(|(n, _)| n == name) {
                return Err(Error::malformed(format!("duplicate tag: {}", name)));
            }
            tags.push((name.to_string(), trim_fws(value).to_string()));
        }

        Ok(Self { tags })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| Error::malformed(format!("missing required tag {}=", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

fn trim_fws(s: &str) -> &str {
    s.trim_matches(|c: char| c == ' ' || c == '\t' || c == '\r' || c == '\n')
}

/// remove all folding whitespace (for base64 and other opaque values)
pub fn strip_fws(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect()
}
