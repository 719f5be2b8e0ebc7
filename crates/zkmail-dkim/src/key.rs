//! DKIM public key records and key resolution

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use tracing::{debug, warn};

use crate::tag_list::{strip_fws, TagList};
use crate::{Error, Result};

/// smallest modulus accepted for verification
pub const MIN_KEY_BITS: usize = 1024;

/// default bound on a single key lookup
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// parsed `_domainkey` TXT record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkimKeyRecord {
    pub public_key: RsaPublicKey,
    /// `t=` flags, e.g. `y` for testing mode
    pub flags: Vec<String>,
}

impl DkimKeyRecord {
    pub fn parse(record: &str) -> Result<Self> {
        let tags = TagList::parse(record)
            .map_err(|e| Error::KeyResolutionFailed(format!("bad key record: {}", e)))?;

        if let Some(v) = tags.get("v") {
            if v != "DKIM1" {
                return Err(Error::KeyResolutionFailed(format!("unsupported key record version {}", v)));
            }
        }

        let key_type = tags.get("k").unwrap_or("rsa");
        if !key_type.eq_ignore_ascii_case("rsa") {
            return Err(Error::UnsupportedAlgorithm(format!("key type {}", key_type)));
        }

        if let Some(h) = tags.get("h") {
            if !h.split(':').any(|alg| strip_fws(alg).eq_ignore_ascii_case("sha256")) {
                return Err(Error::UnsupportedAlgorithm(format!("key restricted to h={}", h)));
            }
        }

        let p = strip_fws(
            tags.get("p")
                .ok_or_else(|| Error::KeyResolutionFailed("key record has no p= tag".into()))?,
        );
        if p.is_empty() {
            return Err(Error::KeyResolutionFailed("key has been revoked (empty p=)".into()));
        }

        let der = STANDARD
            .decode(p.as_bytes())
            .map_err(|e| Error::KeyResolutionFailed(format!("p= is not valid base64: {}", e)))?;
        let public_key = RsaPublicKey::from_public_key_der(&der)
            .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
            .map_err(|e| Error::KeyResolutionFailed(format!("p= is not an RSA key: {}", e)))?;

        let bits = public_key.n().bits();
        if bits < MIN_KEY_BITS {
            return Err(Error::UnsupportedAlgorithm(format!("{}-bit RSA key", bits)));
        }

        let flags = tags
            .get("t")
            .map(|t| t.split(':').map(strip_fws).filter(|f| !f.is_empty()).collect())
            .unwrap_or_default();

        Ok(Self { public_key, flags })
    }

    pub fn is_testing(&self) -> bool {
        self.flags.iter().any(|f| f == "y")
    }
}

/// DNS name holding the key for `selector` at `domain`
pub fn key_record_name(domain: &str, selector: &str) -> String {
    format!("{}._domainkey.{}", selector, domain)
}

/// source of DKIM public keys
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, domain: &str, selector: &str) -> Result<DkimKeyRecord>;
}

/// resolve with an upper bound on latency
pub async fn resolve_with_timeout(
    resolver: &dyn KeyResolver,
    domain: &str,
    selector: &str,
    timeout: Duration,
) -> Result<DkimKeyRecord> {
    debug!("resolving {}", key_record_name(domain, selector));
    match tokio::time::timeout(timeout, resolver.resolve(domain, selector)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("key lookup for {} timed out after {:?}", key_record_name(domain, selector), timeout);
            Err(Error::KeyResolutionFailed(format!(
                "lookup of {} timed out",
                key_record_name(domain, selector)
            )))
        }
    }
}

/// in-memory keys, used for supplied key material and offline runs
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver {
    records: HashMap<String, String>,
}

impl StaticKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// register the raw TXT record text for `selector._domainkey.domain`
    pub fn insert(&mut self, domain: &str, selector: &str, record: impl Into<String>) {
        self.records
            .insert(key_record_name(&domain.to_ascii_lowercase(), selector), record.into());
    }

    pub fn with_record(mut self, domain: &str, selector: &str, record: impl Into<String>) -> Self {
        self.insert(domain, selector, record);
        self
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn resolve(&self, domain: &str, selector: &str) -> Result<DkimKeyRecord> {
        let name = key_record_name(&domain.to_ascii_lowercase(), selector);
        let record = self
            .records
            .get(&name)
            .ok_or_else(|| Error::KeyResolutionFailed(format!("no key record for {}", name)))?;
        DkimKeyRecord::parse(record)
    }
}

#[cfg(feature = "dns")]
pub use dns::DnsKeyResolver;

#[cfg(feature = "dns")]
mod dns {
    use super::*;
    use trust_dns_resolver::TokioAsyncResolver;

    /// TXT lookups through the system resolver configuration
    pub struct DnsKeyResolver {
        resolver: TokioAsyncResolver,
    }

    impl DnsKeyResolver {
        pub fn from_system_conf() -> Result<Self> {
            let resolver = TokioAsyncResolver::tokio_from_system_conf()
                .map_err(|e| Error::KeyResolutionFailed(format!("resolver setup: {}", e)))?;
            Ok(Self { resolver })
        }

        pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
            Self { resolver }
        }
    }

    #[async_trait]
    impl KeyResolver for DnsKeyResolver {
        async fn resolve(&self, domain: &str, selector: &str) -> Result<DkimKeyRecord> {
            let name = key_record_name(domain, selector);
            let lookup = self
                .resolver
                .txt_lookup(name.as_str())
                .await
                .map_err(|e| Error::KeyResolutionFailed(format!("{}: {}", name, e)))?;

            // a record may be split into several character-strings
            let mut last_err = None;
            for txt in lookup.iter() {
                let data: Vec<u8> = txt.txt_data().iter().flat_map(|s| s.iter().copied()).collect();
                let text = String::from_utf8_lossy(&data);
                match DkimKeyRecord::parse(&text) {
                    Ok(record) => return Ok(record),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err
                .unwrap_or_else(|| Error::KeyResolutionFailed(format!("{}: no TXT records", name))))
        }
    }
}
