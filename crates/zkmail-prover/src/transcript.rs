//! merlin transcript for the commitment backend
//!
//! the prover seeds its leaf salts from the transcript rng, keyed with the
//! witness and fresh OS randomness. prover and verifier both absorb the
//! statement, the commitment and every opening and squeeze the seal.

use merlin::{Transcript, TranscriptRng};
use rand::RngCore;
use zkmail_circuit::{ReductionParam, RowShape, Statement};

use crate::merkle::Hash;

pub const DOMAIN: &[u8] = b"zkmail-v2";

pub struct ProofTranscript {
    transcript: Transcript,
}

impl ProofTranscript {
    /// binds everything a verifier knows before the commitment
    pub fn new(circuit_digest: &[u8; 32], statement: &Statement, shape: &RowShape, word_count: u64) -> Self {
        let mut transcript = Transcript::new(DOMAIN);
        transcript.append_message(b"circuit", circuit_digest);
        transcript.append_message(b"statement", &statement.to_bytes());
        transcript.append_u64(b"limb_bits", shape.limb_bits as u64);
        transcript.append_u64(b"limb_count", shape.limb_count as u64);
        transcript.append_u64(b"padding_slot", u64::from(shape.key_padding_slot));
        transcript.append_u64(
            b"reduction",
            match shape.reduction {
                ReductionParam::Montgomery => 0,
                ReductionParam::Barrett => 1,
            },
        );
        transcript.append_u64(b"word_count", word_count);
        Self { transcript }
    }

    pub fn append_commitment(&mut self, root: &Hash, leaf_count: u32, rows_offset: u64) {
        self.transcript.append_message(b"merkle_root", root);
        self.transcript.append_u64(b"leaf_count", leaf_count as u64);
        self.transcript.append_u64(b"rows_offset", rows_offset);
    }

    pub fn append_opening(&mut self, index: u32, salt: &Hash, words: &[u32]) {
        self.transcript.append_u64(b"leaf", index as u64);
        self.transcript.append_message(b"salt", salt);
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.transcript.append_message(b"words", &bytes);
    }

    pub fn seal(&mut self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.transcript.challenge_bytes(b"seal", &mut out);
        out
    }

    /// prover side secret; never leaves the prover
    pub fn salt_seed(&self, witness: &[u32]) -> Hash {
        let bytes: Vec<u8> = witness.iter().flat_map(|w| w.to_le_bytes()).collect();
        let mut rng: TranscriptRng = self
            .transcript
            .build_rng()
            .rekey_with_witness_bytes(b"witness", &bytes)
            .finalize(&mut rand::thread_rng());
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        seed
    }
}
