//! end to end runs over the signed fixtures

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use zkmail_circuit::{CircuitConfig, CircuitDefinition};
use zkmail_dkim::{RawEmail, StaticKeyResolver};
use zkmail_prover::commitment::CommitmentProof;
use zkmail_prover::{
    BackendFault, CancelToken, CommitmentBackend, Direction, Error, LocalVerifier, PaymentClaim,
    Pipeline, ProofArtifact, ProofConsumer, ProvingBackend, ProvingJob, Statement,
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

/// commitment backend that counts calls and can cancel mid-proof
#[derive(Default)]
struct CountingBackend {
    inner: CommitmentBackend,
    proves: AtomicUsize,
    cancel_inside: bool,
}

impl ProvingBackend for CountingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn prove(&self, circuit: &CircuitDefinition, job: &ProvingJob<'_>, cancel: &CancelToken) -> zkmail_prover::Result<Vec<u8>> {
        self.proves.fetch_add(1, Ordering::SeqCst);
        if self.cancel_inside {
            cancel.cancel();
        }
        self.inner.prove(circuit, job, cancel)
    }

    fn verify(&self, circuit: &CircuitDefinition, statement: &Statement, proof: &[u8]) -> zkmail_prover::Result<bool> {
        self.inner.verify(circuit, statement, proof)
    }
}

fn pipeline_with(config: CircuitConfig, backend: Arc<dyn ProvingBackend>) -> Pipeline {
    let circuit = Arc::new(CircuitDefinition::standard(&config));
    let resolver = StaticKeyResolver::new().with_record("example.com", "sel1", KEY_RECORD);
    Pipeline::new(circuit, config, backend, Arc::new(resolver)).unwrap()
}

fn pipeline() -> Pipeline {
    pipeline_with(CircuitConfig::default(), Arc::new(CommitmentBackend::new()))
}

#[tokio::test]
async fn test_relaxed_end_to_end() {
    let pipeline = pipeline();
    let artifact = pipeline
        .run(&RawEmail::new(RELAXED), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(artifact.public_inputs.header_length, 581);
    assert_eq!(artifact.public_inputs.body_hash_index, 533);
    assert_eq!(artifact.backend, "merkle-commitment-v2");
    assert_eq!(artifact.circuit_digest, pipeline.circuit().digest());
    assert!(pipeline.verify(&artifact).unwrap());
}

#[tokio::test]
async fn test_simple_end_to_end() {
    let pipeline = pipeline();
    let artifact = pipeline
        .run(&RawEmail::new(SIMPLE), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(artifact.public_inputs.header_length, 355);
    assert_eq!(artifact.public_inputs.body_hash_index, 305);
    assert!(pipeline.verify(&artifact).unwrap());
}

#[tokio::test]
async fn test_artifact_bytes_still_verify() {
    let pipeline = pipeline();
    let artifact = pipeline
        .run(&RawEmail::new(RELAXED), &CancelToken::new())
        .await
        .unwrap();
    let back = ProofArtifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap();
    assert_eq!(back, artifact);
    assert!(pipeline.verify(&back).unwrap());
    let json = ProofArtifact::from_json(&artifact.to_json().unwrap()).unwrap();
    assert!(pipeline.verify(&json).unwrap());
}

#[tokio::test]
async fn test_tampered_artifact_fails() {
    let pipeline = pipeline();
    let artifact = pipeline
        .run(&RawEmail::new(RELAXED), &CancelToken::new())
        .await
        .unwrap();

    let mut public = artifact.clone();
    public.public_inputs.header_length += 1;
    assert!(!pipeline.verify(&public).unwrap());

    let mut claim = artifact.clone();
    claim.claim_digest = None;
    assert!(!pipeline.verify(&claim).unwrap());

    let mut proof = artifact.clone();
    let last = proof.proof.len() - 1;
    proof.proof[last] ^= 0xff;
    assert!(!matches!(pipeline.verify(&proof), Ok(true)));

    let mut backend = artifact;
    backend.backend = "groth16".into();
    assert!(matches!(pipeline.verify(&backend), Err(Error::InvalidProof(_))));
}

#[tokio::test]
async fn test_tampered_header_never_reaches_prover() {
    let counting = Arc::new(CountingBackend::default());
    let pipeline = pipeline_with(CircuitConfig::default(), counting.clone());
    let tampered: Vec<u8> = String::from_utf8_lossy(RELAXED)
        .replacen("From: Alice Payer", "From: Alice Payor", 1)
        .into_bytes();
    let err = pipeline
        .run(&RawEmail::new(tampered), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Dkim(zkmail_dkim::Error::SignatureInvalid(_))), "{err}");
    assert_eq!(counting.proves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oversized_body_never_reaches_prover() {
    let counting = Arc::new(CountingBackend::default());
    let config = CircuitConfig {
        max_body_length: 100,
        ..Default::default()
    };
    let pipeline = pipeline_with(config, counting.clone());
    let err = pipeline
        .run(&RawEmail::new(RELAXED), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Circuit(zkmail_circuit::Error::BodyTooLarge { len: 158, max: 100 })
    ));
    assert_eq!(counting.proves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_between_witness_and_proof() {
    let counting = Arc::new(CountingBackend::default());
    let pipeline = pipeline_with(CircuitConfig::default(), counting.clone());
    let record = pipeline.extract(&RawEmail::new(RELAXED)).await.unwrap();
    let inputs = pipeline.build_inputs(&record).unwrap();

    let cancel = CancelToken::new();
    let witness = pipeline.generate_witness(&inputs, &cancel).unwrap();
    cancel.cancel();
    assert!(matches!(pipeline.prove_witness(&inputs, &witness, &cancel), Err(Error::Cancelled)));
    assert_eq!(counting.proves.load(Ordering::SeqCst), 0);

    // the shared circuit is still usable
    let artifact = pipeline.prove_inputs(&inputs, &CancelToken::new()).unwrap();
    assert!(pipeline.verify(&artifact).unwrap());
}

#[tokio::test]
async fn test_cancel_during_proving() {
    let counting = Arc::new(CountingBackend {
        cancel_inside: true,
        ..Default::default()
    });
    let pipeline = pipeline_with(CircuitConfig::default(), counting.clone());
    let err = pipeline
        .run(&RawEmail::new(RELAXED), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(err.is_recoverable());
    assert_eq!(counting.proves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = pipeline().run(&RawEmail::new(SIMPLE), &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn test_concurrent_requests_share_pipeline() {
    let pipeline = pipeline();
    let a = pipeline.clone();
    let b = pipeline.clone();
    let (ra, rb) = tokio::join!(
        async move { a.run(&RawEmail::new(RELAXED), &CancelToken::new()).await },
        async move { b.run(&RawEmail::new(SIMPLE), &CancelToken::new()).await },
    );
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_ne!(ra.public_inputs.email_nullifier, rb.public_inputs.email_nullifier);
    assert!(pipeline.verify(&ra).unwrap());
    assert!(pipeline.verify(&rb).unwrap());
}

#[tokio::test]
async fn test_mismatched_circuit_rejected_at_construction() {
    let circuit = Arc::new(CircuitDefinition::standard(&CircuitConfig::default()));
    let config = CircuitConfig {
        max_header_length: 2048,
        ..Default::default()
    };
    let result = Pipeline::new(
        circuit,
        config,
        Arc::new(CommitmentBackend::new()),
        Arc::new(StaticKeyResolver::new()),
    );
    assert!(matches!(
        result,
        Err(Error::Circuit(zkmail_circuit::Error::ShapeMismatch(_)))
    ));
}

#[tokio::test]
async fn test_payment_claims_from_fixtures() {
    let pipeline = pipeline();

    let record = pipeline.extract(&RawEmail::new(RELAXED)).await.unwrap();
    let claim = PaymentClaim::extract(&record).unwrap();
    assert_eq!(claim.direction, Direction::Sent);
    assert_eq!(claim.counterparty, "Bob Seller");
    assert_eq!(claim.amount_micros, 20_000_000);
    assert_eq!(claim.currency, "EUR");
    assert_eq!(claim.transaction_id.as_deref(), Some("7XK12345AB678901C"));

    let record = pipeline.extract(&RawEmail::new(SIMPLE)).await.unwrap();
    let claim = PaymentClaim::extract(&record).unwrap();
    assert_eq!(claim.direction, Direction::Sent);
    assert_eq!(claim.counterparty, "Carol Merchant");
    assert_eq!(claim.amount_micros, 1_234_560_000);
    assert_eq!(claim.currency, "USD");
    assert_eq!(claim.transaction_id.as_deref(), Some("9AB12345CD678901E"));
}

#[tokio::test]
async fn test_local_verifier_refuses_replay() {
    let pipeline = pipeline();
    let artifact = pipeline
        .run(&RawEmail::new(RELAXED), &CancelToken::new())
        .await
        .unwrap();
    let record = pipeline.extract(&RawEmail::new(RELAXED)).await.unwrap();
    let claim = PaymentClaim::extract(&record).unwrap();

    let consumer = LocalVerifier::new(
        Arc::new(pipeline.circuit().clone()),
        Arc::new(CommitmentBackend::new()),
    )
    .trust_pubkey_hash(artifact.public_inputs.pubkey_hash);

    consumer.submit(&artifact, Some(&claim)).await.unwrap();
    assert!(matches!(
        consumer.submit(&artifact, Some(&claim)).await,
        Err(Error::Rejected(_))
    ));
    assert_eq!(consumer.accepted(), 1);
}

#[tokio::test]
async fn test_local_verifier_pins_keys() {
    let pipeline = pipeline();
    let artifact = pipeline
        .run(&RawEmail::new(SIMPLE), &CancelToken::new())
        .await
        .unwrap();
    let consumer = LocalVerifier::new(
        Arc::new(pipeline.circuit().clone()),
        Arc::new(CommitmentBackend::new()),
    )
    .trust_pubkey_hash([0u8; 32]);
    let err = consumer.submit(&artifact, None).await.unwrap_err();
    assert!(err.to_string().contains("untrusted signing key"));
}

#[tokio::test]
async fn test_proof_bound_to_its_nullifier() {
    let pipeline = pipeline();
    let artifact = pipeline
        .run(&RawEmail::new(RELAXED), &CancelToken::new())
        .await
        .unwrap();
    let mut forged = artifact.clone();
    forged.public_inputs.email_nullifier = [0x42; 32];
    assert!(!pipeline.verify(&forged).unwrap());

    let mut key = artifact;
    key.public_inputs.pubkey_hash[0] ^= 1;
    assert!(!pipeline.verify(&key).unwrap());
}

#[tokio::test]
async fn test_openings_hold_no_email_bytes() {
    let pipeline = pipeline();
    let record = pipeline.extract(&RawEmail::new(RELAXED)).await.unwrap();
    let inputs = pipeline.build_inputs(&record).unwrap();
    let artifact = pipeline.prove_inputs(&inputs, &CancelToken::new()).unwrap();
    let proof: CommitmentProof = bincode::deserialize(&artifact.proof).unwrap();
    assert!(!proof.openings.is_empty());

    let words: Vec<u32> = proof.openings.iter().flat_map(|o| o.leaf.iter().copied()).collect();
    let mut opened = HashSet::new();
    for bytes in [
        words.iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<u8>>(),
        words.iter().flat_map(|w| w.to_be_bytes()).collect::<Vec<u8>>(),
    ] {
        opened.extend(bytes.windows(8).map(|w| w.to_vec()));
    }
    for secret in [inputs.header.as_slice(), inputs.body.as_slice()] {
        assert!(secret.len() > 8);
        assert!(secret.windows(8).all(|w| !opened.contains(w)));
    }

    // equal rows under fresh salts commit to different roots
    let again = pipeline.prove_inputs(&inputs, &CancelToken::new()).unwrap();
    let again: CommitmentProof = bincode::deserialize(&again.proof).unwrap();
    assert_ne!(again.root, proof.root);
}

#[tokio::test]
async fn test_artifact_carries_claim_digest() {
    let pipeline = pipeline();
    for raw in [RELAXED, SIMPLE] {
        let artifact = pipeline
            .run(&RawEmail::new(raw), &CancelToken::new())
            .await
            .unwrap();
        let record = pipeline.extract(&RawEmail::new(raw)).await.unwrap();
        let claim = PaymentClaim::extract(&record).unwrap();
        assert_eq!(artifact.claim_digest, Some(claim.digest()));
    }
}

#[tokio::test]
async fn test_local_verifier_rejects_foreign_claim() {
    let pipeline = pipeline();
    let artifact = pipeline
        .run(&RawEmail::new(RELAXED), &CancelToken::new())
        .await
        .unwrap();
    let consumer = LocalVerifier::new(
        Arc::new(pipeline.circuit().clone()),
        Arc::new(CommitmentBackend::new()),
    );

    let inflated = PaymentClaim {
        direction: Direction::Received,
        counterparty: "Mallory".into(),
        amount_micros: 1_000_000_000_000_000_000,
        currency: "USD".into(),
        transaction_id: None,
    };
    let err = consumer.submit(&artifact, Some(&inflated)).await.unwrap_err();
    assert!(matches!(err, Error::Rejected(_)), "{err}");

    // same email, only the amount bumped
    let record = pipeline.extract(&RawEmail::new(RELAXED)).await.unwrap();
    let genuine = PaymentClaim::extract(&record).unwrap();
    let bumped = PaymentClaim {
        amount_micros: genuine.amount_micros + 1,
        ..genuine.clone()
    };
    assert!(matches!(
        consumer.submit(&artifact, Some(&bumped)).await,
        Err(Error::Rejected(_))
    ));

    // a claim against an artifact that binds none
    let mut unbound = artifact.clone();
    unbound.claim_digest = None;
    assert!(matches!(
        consumer.submit(&unbound, Some(&genuine)).await,
        Err(Error::Rejected(_))
    ));
    assert!(matches!(
        consumer.submit(&unbound, None).await,
        Err(Error::InvalidProof(_))
    ));
    assert_eq!(consumer.accepted(), 0);

    consumer.submit(&artifact, Some(&genuine)).await.unwrap();
    assert_eq!(consumer.accepted(), 1);
}

#[test]
fn test_unavailable_backend_is_unrecoverable() {
    let err = Error::backend(BackendFault::Unavailable, "no device");
    assert!(!err.is_recoverable());
}
