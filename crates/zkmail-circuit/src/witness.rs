//! witness generation
//!
//! runs the circuit program over a set of inputs. every check the circuit
//! enforces is enforced here as well, so a witness only exists for inputs
//! that satisfy all constraints.

use std::ops::Range;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::bytecode::{Op, OutputKind, Slot};
use crate::config::{CircuitConfig, ReductionParam};
use crate::definition::CircuitDefinition;
use crate::inputs::CircuitInputs;
use crate::limbs::{join_limbs, montgomery_n_prime, montgomery_radix, reduction_constant, RSA_EXPONENT};
use crate::public::{byte_len, to_fixed_be, PublicInputs};
use crate::rows::{pkcs1_sha256, RowShape};
use crate::{Error, Result};

const DKIM_FIELD_NAME: &[u8] = b"dkim-signature";
const BODY_HASH_B64_LEN: usize = 44;

/// full assignment produced by one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    /// inputs, intermediates and digests as 32-bit words, in program order
    pub words: Vec<u32>,
    pub public: PublicInputs,
    /// where the [`crate::rows::SignatureRows`] sit inside `words`
    pub signature_rows: Range<usize>,
}

impl Witness {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// `None` when the range lies outside `words`
    pub fn signature_row_words(&self) -> Option<&[u32]> {
        self.words.get(self.signature_rows.clone())
    }
}

/// execute `circuit` on `inputs`
pub fn execute(
    circuit: &CircuitDefinition,
    config: &CircuitConfig,
    inputs: &CircuitInputs,
) -> Result<Witness> {
    let mut exec = Execution::new(config, inputs)?;
    for (pc, op) in circuit.program().ops.iter().enumerate() {
        exec.step(op).map_err(|e| match e {
            Error::WitnessGenerationFailed(msg) => Error::witness(format!("op {} {:?}: {}", pc, op, msg)),
            other => other,
        })?;
    }
    let witness = exec.finish()?;
    debug!("witness: {} words", witness.words.len());
    Ok(witness)
}

/// constraint failures inside a step are wrapped with the op position by `execute`
type StepResult = Result<()>;

fn fail<T>(msg: impl Into<String>) -> Result<T> {
    Err(Error::witness(msg))
}

struct Execution<'a> {
    config: &'a CircuitConfig,
    inputs: &'a CircuitInputs,
    modulus: BigUint,
    signature: BigUint,
    words: Vec<u32>,
    registers: [Option<[u8; 32]>; 256],
    pubkey_hash: Option<[u8; 32]>,
    email_nullifier: Option<[u8; 32]>,
    header_length: Option<u32>,
    body_hash_index: Option<u32>,
    rows_start: Option<usize>,
    rows_end: Option<usize>,
}

impl<'a> Execution<'a> {
    fn new(config: &'a CircuitConfig, inputs: &'a CircuitInputs) -> Result<Self> {
        let expected = config.limb_array_length();
        for (name, limbs) in [
            ("modulus", &inputs.pubkey.modulus),
            ("redc", &inputs.pubkey.redc),
            ("signature", &inputs.signature),
        ] {
            if limbs.len() != expected {
                return Err(Error::witness(format!(
                    "{} has {} limbs, circuit declares {}",
                    name,
                    limbs.len(),
                    expected
                )));
            }
        }
        Ok(Self {
            config,
            inputs,
            modulus: join_limbs(&inputs.pubkey.modulus, config.limb_bits),
            signature: join_limbs(&inputs.signature, config.limb_bits),
            words: Vec::new(),
            registers: [None; 256],
            pubkey_hash: None,
            email_nullifier: None,
            header_length: None,
            body_hash_index: None,
            rows_start: None,
            rows_end: None,
        })
    }

    fn step(&mut self, op: &Op) -> StepResult {
        match *op {
            Op::CheckBounded(slot) => self.check_bounded(slot),
            Op::CheckLimbs(slot) => self.check_limbs(slot),
            Op::CheckReduction => self.check_reduction(),
            Op::Sha256 { slot, dst } => {
                let digest: [u8; 32] = Sha256::digest(self.slot_bytes(slot)).into();
                self.push_digest(&digest);
                self.registers[dst as usize] = Some(digest);
                Ok(())
            }
            Op::RsaVerify { digest } => {
                let hash = self.register(digest)?;
                self.rsa_verify(&hash)?;
                self.rows_end = Some(self.words.len());
                Ok(())
            }
            Op::CheckBodyHash { digest } => {
                let hash = self.register(digest)?;
                self.check_body_hash(&hash)
            }
            Op::CheckDkimField => self.check_dkim_field(),
            Op::Output(kind) => {
                self.output(kind);
                Ok(())
            }
        }
    }

    fn finish(self) -> Result<Witness> {
        let missing = |what: &str| Error::witness(format!("program never outputs {}", what));
        let public = PublicInputs {
            pubkey_hash: self.pubkey_hash.ok_or_else(|| missing("pubkey_hash"))?,
            email_nullifier: self.email_nullifier.ok_or_else(|| missing("email_nullifier"))?,
            header_length: self.header_length.ok_or_else(|| missing("header_length"))?,
            body_hash_index: self.body_hash_index.ok_or_else(|| missing("body_hash_index"))?,
        };
        let signature_rows = match (self.rows_start, self.rows_end) {
            (Some(start), Some(end)) if end - start == RowShape::of(self.config).word_count() => start..end,
            _ => return fail("program does not write the signature rows contiguously"),
        };
        Ok(Witness {
            words: self.words,
            public,
            signature_rows,
        })
    }

    fn register(&self, r: u8) -> Result<[u8; 32]> {
        self.registers[r as usize]
            .ok_or_else(|| Error::witness(format!("register {} read before write", r)))
    }

    fn limbs(&self, slot: Slot) -> Result<&'a [BigUint]> {
        let inputs: &'a CircuitInputs = self.inputs;
        match slot {
            Slot::Modulus => Ok(&inputs.pubkey.modulus),
            Slot::Redc => Ok(&inputs.pubkey.redc),
            Slot::Signature => Ok(&inputs.signature),
            Slot::Header | Slot::Body => Err(Error::ShapeMismatch(format!("{:?} is not a limb array", slot))),
        }
    }

    fn slot_bytes(&self, slot: Slot) -> Vec<u8> {
        match slot {
            Slot::Header => self.inputs.header.as_slice().to_vec(),
            Slot::Body => self.inputs.body.as_slice().to_vec(),
            Slot::Modulus => self.modulus.to_bytes_be(),
            Slot::Redc => join_limbs(&self.inputs.pubkey.redc, self.config.limb_bits).to_bytes_be(),
            Slot::Signature => to_fixed_be(&self.signature, byte_len(&self.modulus)),
        }
    }

    fn check_bounded(&mut self, slot: Slot) -> StepResult {
        let (vec, capacity) = match slot {
            Slot::Header => (&self.inputs.header, self.config.max_header_length),
            Slot::Body => (&self.inputs.body, self.config.max_body_length),
            other => return Err(Error::ShapeMismatch(format!("{:?} is not a byte array", other))),
        };
        if vec.capacity() != capacity {
            return fail(format!("capacity {} != declared {}", vec.capacity(), capacity));
        }
        if !vec.is_well_formed() {
            return fail("non-zero bytes past the length");
        }
        for chunk in vec.storage().chunks(4) {
            let mut w = [0u8; 4];
            w[..chunk.len()].copy_from_slice(chunk);
            self.words.push(u32::from_le_bytes(w));
        }
        self.words.push(vec.len() as u32);
        Ok(())
    }

    fn check_limbs(&mut self, slot: Slot) -> StepResult {
        let limbs = self.limbs(slot)?;
        for (i, limb) in limbs.iter().enumerate() {
            if limb.bits() as usize > self.config.limb_bits {
                return fail(format!("limb {} exceeds {} bits", i, self.config.limb_bits));
            }
        }
        if self.config.key_padding_slot && limbs.last().map_or(true, |l| !l.is_zero()) {
            return fail("padding slot is not zero");
        }
        if slot == Slot::Modulus {
            self.rows_start = Some(self.words.len());
        }
        for limb in limbs {
            self.push_limb(limb);
        }
        Ok(())
    }

    fn check_reduction(&mut self) -> StepResult {
        let redc = join_limbs(&self.inputs.pubkey.redc, self.config.limb_bits);
        let expected = reduction_constant(&self.modulus, self.config)?;
        if redc != expected {
            return fail("reduction constant does not match the modulus");
        }
        Ok(())
    }

    fn rsa_verify(&mut self, hash: &[u8; 32]) -> StepResult {
        if self.signature >= self.modulus {
            return fail("signature not reduced modulo n");
        }
        let result = match self.config.reduction {
            ReductionParam::Montgomery => self.modexp_montgomery()?,
            ReductionParam::Barrett => self.modexp_plain()?,
        };

        let k = byte_len(&self.modulus);
        let expected = match pkcs1_sha256(hash, k) {
            Some(em) => em,
            None => return fail("modulus too small for sha256 pkcs1 encoding"),
        };
        if to_fixed_be(&result, k) != expected {
            return fail("rsa signature does not match header digest");
        }
        Ok(())
    }

    /// s^65537 mod n in Montgomery form, redc providing the entry conversion
    fn modexp_montgomery(&mut self) -> Result<BigUint> {
        let n_prime = montgomery_n_prime(&self.modulus, self.config)?;
        let ctx = Montgomery {
            n: self.modulus.clone(),
            n_prime,
            k: self.config.max_modulus_bits(),
            mask: montgomery_radix(self.config) - 1u32,
        };
        let redc = join_limbs(&self.inputs.pubkey.redc, self.config.limb_bits);

        let base = ctx.mul(&self.signature, &redc);
        self.push_limbs_of(&base);
        let mut acc = base.clone();
        for _ in 0..16 {
            acc = ctx.mul(&acc, &acc);
            self.push_limbs_of(&acc);
        }
        acc = ctx.mul(&acc, &base);
        self.push_limbs_of(&acc);
        let result = ctx.mul(&acc, &BigUint::one());
        self.push_limbs_of(&result);
        Ok(result)
    }

    fn modexp_plain(&mut self) -> Result<BigUint> {
        let mut acc = self.signature.clone();
        for _ in 0..16 {
            acc = (&acc * &acc) % &self.modulus;
            self.push_limbs_of(&acc);
        }
        let result = (&acc * &self.signature) % &self.modulus;
        self.push_limbs_of(&result);
        if result != self.signature.modpow(&BigUint::from(RSA_EXPONENT), &self.modulus) {
            return fail("square and multiply chain diverges from s^e mod n");
        }
        Ok(result)
    }

    fn check_body_hash(&mut self, hash: &[u8; 32]) -> StepResult {
        let header = self.inputs.header.as_slice();
        let idx = self.inputs.body_hash_index;
        let encoded = STANDARD.encode(hash);
        let window = header
            .get(idx..idx + BODY_HASH_B64_LEN)
            .ok_or_else(|| Error::witness(format!("body_hash_index {} past header end", idx)))?;
        if window != encoded.as_bytes() {
            return fail("body hash in header does not match body");
        }
        self.words.push(idx as u32);
        Ok(())
    }

    fn check_dkim_field(&mut self) -> StepResult {
        let seq = self.inputs.dkim_header_sequence;
        let header = self.inputs.header.as_slice();
        if seq.length > self.config.max_dkim_field_length {
            return fail(format!("dkim field length {} over capacity", seq.length));
        }
        let field = header
            .get(seq.index..seq.end())
            .ok_or_else(|| Error::witness("dkim header sequence outside the header"))?;
        if seq.index != 0 && !header[..seq.index].ends_with(b"\r\n") {
            return fail("dkim header sequence does not start a field");
        }
        let name_ok = field.len() > DKIM_FIELD_NAME.len()
            && field[..DKIM_FIELD_NAME.len()].eq_ignore_ascii_case(DKIM_FIELD_NAME)
            && matches!(field[DKIM_FIELD_NAME.len()], b':' | b' ' | b'\t');
        if !name_ok {
            return fail("dkim header sequence is not a DKIM-Signature field");
        }
        let bh = self.inputs.body_hash_index;
        if bh < seq.index + 3 || bh + BODY_HASH_B64_LEN > seq.end() {
            return fail("bh= value lies outside the DKIM-Signature field");
        }
        if &header[bh - 3..bh] != b"bh=" {
            return fail("body_hash_index does not point at a bh= value");
        }
        self.words.push(seq.index as u32);
        self.words.push(seq.length as u32);
        Ok(())
    }

    fn output(&mut self, kind: OutputKind) {
        match kind {
            OutputKind::PubkeyHash => {
                self.pubkey_hash = Some(PublicInputs::pubkey_hash_of(&self.modulus));
            }
            OutputKind::EmailNullifier => {
                self.email_nullifier = Some(PublicInputs::nullifier_of(&self.signature, &self.modulus));
            }
            OutputKind::HeaderLength => {
                let len = self.inputs.header.len() as u32;
                self.words.push(len);
                self.header_length = Some(len);
            }
            OutputKind::BodyHashIndex => {
                let idx = self.inputs.body_hash_index as u32;
                self.words.push(idx);
                self.body_hash_index = Some(idx);
            }
        }
    }

    fn push_digest(&mut self, digest: &[u8; 32]) {
        for chunk in digest.chunks(4) {
            self.words.push(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
    }

    /// one limb as four little-endian words
    fn push_limb(&mut self, limb: &BigUint) {
        let mut digits = limb.to_u32_digits();
        digits.resize(4, 0);
        self.words.extend_from_slice(&digits[..4]);
    }

    fn push_limbs_of(&mut self, value: &BigUint) {
        let bits = self.config.limb_bits;
        let mask = (BigUint::one() << bits) - 1u32;
        let mut rest = value.clone();
        for _ in 0..self.config.limb_count {
            let limb = &rest & &mask;
            self.push_limb(&limb);
            rest >>= bits;
        }
    }
}

struct Montgomery {
    n: BigUint,
    n_prime: BigUint,
    k: usize,
    mask: BigUint,
}

impl Montgomery {
    /// a * b * R^-1 mod n
    fn mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        let t = a * b;
        let m = ((&t & &self.mask) * &self.n_prime) & &self.mask;
        let u = (t + m * &self.n) >> self.k;
        if u >= self.n {
            u - &self.n
        } else {
            u
        }
    }
}
