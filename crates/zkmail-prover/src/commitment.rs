//! transparent salted merkle commitment backend
//!
//! commits to every witness word in a sha256 merkle tree whose leaves are
//! salted from a secret seed, so unopened leaves reveal nothing. the only
//! leaves ever opened are the ones holding the signature rows (modulus,
//! reduction constant, signature, header digest and exponentiation chain),
//! laid out so no opened leaf shares words with the header or body.
//!
//! the verifier authenticates those leaves against the root and checks the
//! full row constraint system against the public inputs: the modulus hashes
//! to `pubkey_hash`, the signature hashes to `email_nullifier`, every chain
//! step holds and the result is the PKCS#1 encoding of the header digest.
//! a proof therefore shows a valid signature by the pinned key. it does not
//! show that the hidden header and body match that digest, nor the claim or
//! `header_length`/`body_hash_index`; those are sealed into the transcript
//! but only the zkVM backend proves them.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zkmail_circuit::inputs::names;
use zkmail_circuit::{CircuitDefinition, RowShape, SignatureRows, Statement};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::backend::{ProvingBackend, ProvingJob};
use crate::cancel::CancelToken;
use crate::error::{BackendFault, Error, Result};
use crate::merkle::{hash_leaf, leaf_salt, verify_path, Hash, MerkleTree};
use crate::transcript::ProofTranscript;

pub const BACKEND_NAME: &str = "merkle-commitment-v2";
/// witness words per leaf
pub const LEAF_WORDS: usize = 16;
/// leaves hashed between cancellation checks
const HASH_BATCH: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opening {
    pub index: u32,
    pub salt: Hash,
    pub leaf: Vec<u32>,
    pub path: Vec<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentProof {
    pub root: Hash,
    pub leaf_count: u32,
    pub word_count: u64,
    pub shape: RowShape,
    /// first witness word of the signature rows
    pub rows_offset: u64,
    /// every leaf of the signature rows, in order
    pub openings: Vec<Opening>,
    pub seal: [u8; 32],
}

#[derive(Debug, Clone, Default)]
pub struct CommitmentBackend;

impl CommitmentBackend {
    pub fn new() -> Self {
        Self
    }
}

fn leaves_in(words: usize) -> usize {
    words.div_ceil(LEAF_WORDS)
}

/// leaf boundaries: the words before the signature rows, the rows, the rest.
/// each segment starts a fresh leaf so no leaf straddles the rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LeafLayout {
    rows_start: usize,
    rows_end: usize,
    word_count: usize,
}

impl LeafLayout {
    fn new(word_count: usize, rows_start: usize, rows_len: usize) -> Option<Self> {
        let rows_end = rows_start.checked_add(rows_len)?;
        (rows_end <= word_count).then_some(Self {
            rows_start,
            rows_end,
            word_count,
        })
    }

    fn segments(&self) -> [(usize, usize); 3] {
        [
            (0, self.rows_start),
            (self.rows_start, self.rows_end),
            (self.rows_end, self.word_count),
        ]
    }

    fn used_leaves(&self) -> usize {
        self.segments().iter().map(|&(s, e)| leaves_in(e - s)).sum()
    }

    fn leaf_count(&self) -> usize {
        self.used_leaves().max(1).next_power_of_two()
    }

    fn row_leaves(&self) -> std::ops::Range<usize> {
        let first = leaves_in(self.rows_start);
        first..first + leaves_in(self.rows_end - self.rows_start)
    }

    /// zero padded; leaves past the last segment are all zero
    fn leaf_words(&self, words: &[u32], leaf: usize) -> Vec<u32> {
        let mut out = vec![0u32; LEAF_WORDS];
        let mut first = 0;
        for (start, end) in self.segments() {
            let n = leaves_in(end - start);
            if leaf < first + n {
                let from = start + (leaf - first) * LEAF_WORDS;
                let to = (from + LEAF_WORDS).min(end);
                out[..to - from].copy_from_slice(&words[from..to]);
                return out;
            }
            first += n;
        }
        out
    }
}

fn hash_leaves(words: &[u32], layout: &LeafLayout, seed: &Hash, cancel: &CancelToken) -> Result<Vec<Hash>> {
    let leaf_count = layout.leaf_count();
    let leaf = |i: usize| hash_leaf(&leaf_salt(seed, i), &layout.leaf_words(words, i));
    let mut hashes = Vec::with_capacity(leaf_count);
    let mut start = 0;
    while start < leaf_count {
        cancel.check()?;
        let end = (start + HASH_BATCH).min(leaf_count);

        #[cfg(feature = "parallel")]
        let batch: Vec<Hash> = (start..end).into_par_iter().map(leaf).collect();
        #[cfg(not(feature = "parallel"))]
        let batch: Vec<Hash> = (start..end).map(leaf).collect();

        hashes.extend(batch);
        start = end;
    }
    Ok(hashes)
}

impl CommitmentBackend {
    /// commit and open without looking at the rows
    fn commit(&self, circuit: &CircuitDefinition, job: &ProvingJob<'_>, cancel: &CancelToken) -> Result<Vec<u8>> {
        let witness = job.witness;
        if witness.is_empty() {
            return Err(Error::backend(BackendFault::Internal, "empty witness"));
        }
        let shape = RowShape::of(job.config);
        let layout = LeafLayout::new(witness.len(), witness.signature_rows.start, shape.word_count())
            .ok_or_else(|| Error::backend(BackendFault::Internal, "signature rows outside the witness"))?;
        let word_count = witness.len() as u64;
        let rows_offset = layout.rows_start as u64;
        let leaf_count = layout.leaf_count();
        let leaf_count_u32 = u32::try_from(leaf_count)
            .map_err(|_| Error::backend(BackendFault::ResourceExhausted, "witness too large"))?;

        let mut transcript = ProofTranscript::new(&circuit.digest(), &job.statement, &shape, word_count);
        let seed = transcript.salt_seed(&witness.words);
        let hashes = hash_leaves(&witness.words, &layout, &seed, cancel)?;
        let tree = MerkleTree::from_leaf_hashes(hashes)
            .ok_or_else(|| Error::backend(BackendFault::Internal, "leaf count not a power of two"))?;
        cancel.check()?;

        let root = tree.root();
        transcript.append_commitment(&root, leaf_count_u32, rows_offset);
        let mut openings = Vec::with_capacity(layout.row_leaves().len());
        for index in layout.row_leaves() {
            let opening = Opening {
                index: index as u32,
                salt: leaf_salt(&seed, index),
                leaf: layout.leaf_words(&witness.words, index),
                path: tree.auth_path(index),
            };
            transcript.append_opening(opening.index, &opening.salt, &opening.leaf);
            openings.push(opening);
        }

        let proof = CommitmentProof {
            root,
            leaf_count: leaf_count_u32,
            word_count,
            shape,
            rows_offset,
            openings,
            seal: transcript.seal(),
        };
        let bytes = bincode::serialize(&proof)?;
        info!(
            "committed {} witness words in {} leaves, opened {} row leaves, {} proof bytes",
            word_count,
            leaf_count,
            proof.openings.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    fn check(&self, circuit: &CircuitDefinition, statement: &Statement, proof: &CommitmentProof) -> bool {
        let declared = circuit
            .abi
            .input(names::PUBKEY_MODULUS)
            .and_then(|p| p.array_length);
        if declared != Some(proof.shape.limb_array_length()) {
            debug!("row shape does not match the circuit's limb arrays");
            return false;
        }
        let layout = match LeafLayout::new(
            proof.word_count as usize,
            proof.rows_offset as usize,
            proof.shape.word_count(),
        ) {
            Some(layout) if layout.leaf_count() == proof.leaf_count as usize => layout,
            _ => {
                debug!("commitment layout does not match {} words", proof.word_count);
                return false;
            }
        };
        let depth = layout.leaf_count().trailing_zeros() as usize;

        let expected: Vec<usize> = layout.row_leaves().collect();
        if expected.len() != proof.openings.len() {
            debug!("expected {} openings, got {}", expected.len(), proof.openings.len());
            return false;
        }
        let mut transcript = ProofTranscript::new(&circuit.digest(), statement, &proof.shape, proof.word_count);
        transcript.append_commitment(&proof.root, proof.leaf_count, proof.rows_offset);

        let mut words = Vec::with_capacity(expected.len() * LEAF_WORDS);
        for (&index, opening) in expected.iter().zip(&proof.openings) {
            if opening.index as usize != index
                || opening.leaf.len() != LEAF_WORDS
                || opening.path.len() != depth
            {
                debug!("opening {} does not match leaf {}", opening.index, index);
                return false;
            }
            if !verify_path(&proof.root, hash_leaf(&opening.salt, &opening.leaf), index, &opening.path) {
                debug!("authentication path for leaf {} fails", index);
                return false;
            }
            transcript.append_opening(opening.index, &opening.salt, &opening.leaf);
            words.extend_from_slice(&opening.leaf);
        }
        if transcript.seal() != proof.seal {
            debug!("seal does not match the statement");
            return false;
        }

        let rows_len = proof.shape.word_count();
        if words[rows_len..].iter().any(|&w| w != 0) {
            debug!("row leaf padding is not zero");
            return false;
        }
        let checked = SignatureRows::decode(&words[..rows_len], &proof.shape)
            .and_then(|rows| rows.check(&proof.shape, &statement.public));
        if let Err(e) = checked {
            debug!("signature rows fail: {}", e);
            return false;
        }
        true
    }
}

impl ProvingBackend for CommitmentBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    /// refuses witnesses whose signature rows do not satisfy the constraints
    fn prove(&self, circuit: &CircuitDefinition, job: &ProvingJob<'_>, cancel: &CancelToken) -> Result<Vec<u8>> {
        let shape = RowShape::of(job.config);
        let words = job
            .witness
            .signature_row_words()
            .ok_or_else(|| Error::backend(BackendFault::Internal, "signature rows outside the witness"))?;
        SignatureRows::decode(words, &shape)?.check(&shape, &job.statement.public)?;
        self.commit(circuit, job, cancel)
    }

    fn verify(&self, circuit: &CircuitDefinition, statement: &Statement, proof: &[u8]) -> Result<bool> {
        let proof: CommitmentProof = bincode::deserialize(proof)
            .map_err(|e| Error::InvalidProof(format!("undecodable commitment proof: {}", e)))?;
        Ok(self.check(circuit, statement, &proof))
    }
}
