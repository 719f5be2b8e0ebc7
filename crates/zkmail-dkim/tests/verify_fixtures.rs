//! end-to-end verification against the signed fixtures

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use zkmail_dkim::{
    Canonicalization, DkimKeyRecord, Error, KeyResolver, RawEmail, StaticKeyResolver, Verifier,
};

const RELAXED: &[u8] = include_bytes!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../tests/fixtures/payment_relaxed.eml"
));
const SIMPLE: &[u8] = include_bytes!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../tests/fixtures/payment_simple.eml"
));
const KEY_RECORD: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../tests/fixtures/sel1._domainkey.example.com.txt"
));

fn verifier() -> Verifier {
    let resolver = StaticKeyResolver::new().with_record("example.com", "sel1", KEY_RECORD);
    Verifier::new(Arc::new(resolver))
}

fn replace_once(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let pos = haystack
        .windows(from.len())
        .position(|w| w == from)
        .expect("pattern present in fixture");
    let mut out = haystack[..pos].to_vec();
    out.extend_from_slice(to);
    out.extend_from_slice(&haystack[pos + from.len()..]);
    out
}

#[tokio::test]
async fn test_relaxed_fixture_verifies() {
    let record = verifier().verify(&RawEmail::new(RELAXED)).await.unwrap();

    assert_eq!(record.domain, "example.com");
    assert_eq!(record.selector, "sel1");
    assert_eq!(record.canonicalization.header, Canonicalization::Relaxed);
    assert_eq!(record.canonicalization.body, Canonicalization::Relaxed);

    assert_eq!(record.header.len(), 581);
    assert_eq!(record.dkim_field.index, 345);
    assert_eq!(record.dkim_field.length, 236);
    assert_eq!(record.body_hash_index, 533);
    assert_eq!(record.body_hash_b64(), b"CvbOXAiWcydUBcO5Fc3HRzEVrfUF+vaVWiFLnKYthT8=");
    assert!(record.header[record.dkim_field.index..].starts_with(b"dkim-signature:v=1;"));
    assert!(record.header.ends_with(b"b="));

    assert_eq!(record.body.len(), 158);
    assert!(record.body.starts_with(b"Bonjour Alice,\r\n\r\n"));
    assert_eq!(
        hex::encode(Sha256::digest(&record.header)),
        "a7f48f559c49e3aa015cb04a70c5810b38e3933e2d25f067e98c441ef36c8edb"
    );

    assert_eq!(record.modulus_bits(), 2048);
    assert_eq!(record.exponent_bytes(), vec![0x01, 0x00, 0x01]);
    assert_eq!(record.signature.len(), 256);
}

#[tokio::test]
async fn test_simple_fixture_verifies() {
    let record = verifier().verify(&RawEmail::new(SIMPLE)).await.unwrap();

    assert_eq!(record.canonicalization.to_string(), "simple/simple");
    assert_eq!(record.header.len(), 355);
    assert_eq!(record.dkim_field.index, 174);
    assert_eq!(record.dkim_field.end(), 355);
    assert_eq!(record.body_hash_index, 305);
    assert_eq!(record.body_hash_b64(), b"e0SvpC8JcRmN78qPqpwkd9G73jN7T6smModXvJCH4LQ=");
    assert!(record.header[174..].starts_with(b"DKIM-Signature: v=1;"));
    // one of the two trailing empty lines is dropped by simple canonicalization
    assert_eq!(record.body.len(), 103);
    assert!(record.body.ends_with(b"9AB12345CD678901E\r\n"));
}

#[tokio::test]
async fn test_body_tamper_is_signature_invalid() {
    let tampered = replace_once(RELAXED, b"20,00", b"90,00");
    let err = verifier().verify(&RawEmail::new(tampered)).await.unwrap_err();
    assert!(matches!(err, Error::SignatureInvalid(_)), "{err}");
}

#[tokio::test]
async fn test_body_whitespace_change_tolerated_by_relaxed() {
    let reflowed = replace_once(RELAXED, b"Bonjour Alice,   ", b"Bonjour \tAlice,");
    assert!(verifier().verify(&RawEmail::new(reflowed)).await.is_ok());
}

#[tokio::test]
async fn test_header_tamper_is_signature_invalid() {
    let tampered = replace_once(SIMPLE, b"Subject: You sent a payment", b"Subject: You sent a paymenT");
    let err = verifier().verify(&RawEmail::new(tampered)).await.unwrap_err();
    assert!(matches!(err, Error::SignatureInvalid(_)), "{err}");

    let tampered = replace_once(RELAXED, b"bob@example.org", b"eve@example.org");
    let err = verifier().verify(&RawEmail::new(tampered)).await.unwrap_err();
    assert!(matches!(err, Error::SignatureInvalid(_)), "{err}");
}

#[tokio::test]
async fn test_unsigned_header_change_is_ignored() {
    let changed = replace_once(RELAXED, b"X-Mailer:   escrow-fixture", b"X-Mailer: other");
    assert!(verifier().verify(&RawEmail::new(changed)).await.is_ok());
}

#[tokio::test]
async fn test_missing_signature_is_malformed() {
    let email = RawEmail::from("From: a@example.com\r\nSubject: hi\r\n\r\nbody\r\n");
    let err = verifier().verify(&email).await.unwrap_err();
    assert!(matches!(err, Error::MalformedEmail(_)));
}

#[tokio::test]
async fn test_rsa_sha1_is_unsupported() {
    let downgraded = replace_once(SIMPLE, b"a=rsa-sha256", b"a=rsa-sha1");
    let err = verifier().verify(&RawEmail::new(downgraded)).await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
}

#[tokio::test]
async fn test_bare_lf_needs_normalization() {
    let lf: Vec<u8> = {
        let text = String::from_utf8_lossy(SIMPLE).replace("\r\n", "\n");
        text.into_bytes()
    };
    let err = verifier().verify(&RawEmail::new(lf.clone())).await.unwrap_err();
    assert!(matches!(err, Error::MalformedEmail(_)));

    let normalized = RawEmail::new(lf).normalize_line_endings();
    assert!(verifier().verify(&normalized).await.is_ok());
}

#[tokio::test]
async fn test_expected_domain_filters_signatures() {
    let err = verifier()
        .with_expected_domain("paypal.com")
        .verify(&RawEmail::new(RELAXED))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedEmail(_)));

    assert!(verifier()
        .with_expected_domain("EXAMPLE.com")
        .verify(&RawEmail::new(RELAXED))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_falls_through_to_second_signature() {
    let mut email = b"DKIM-Signature: v=1; a=rsa-sha256; d=example.com; s=gone; h=from; bh=AAAA; b=AQID\r\n".to_vec();
    email.extend_from_slice(SIMPLE);
    let record = verifier().verify(&RawEmail::new(email)).await.unwrap();
    assert_eq!(record.selector, "sel1");
}

#[tokio::test]
async fn test_unknown_selector_fails_resolution() {
    let resolver = StaticKeyResolver::new().with_record("example.com", "other", KEY_RECORD);
    let err = Verifier::new(Arc::new(resolver))
        .verify(&RawEmail::new(SIMPLE))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::KeyResolutionFailed(_)));
}

struct SlowResolver;

#[async_trait]
impl KeyResolver for SlowResolver {
    async fn resolve(&self, _domain: &str, _selector: &str) -> zkmail_dkim::Result<DkimKeyRecord> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        DkimKeyRecord::parse(KEY_RECORD)
    }
}

#[tokio::test(start_paused = true)]
async fn test_resolver_timeout_is_key_resolution_failed() {
    let err = Verifier::new(Arc::new(SlowResolver))
        .with_timeout(Duration::from_secs(2))
        .verify(&RawEmail::new(RELAXED))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::KeyResolutionFailed(_)));
}
