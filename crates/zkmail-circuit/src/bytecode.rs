//! circuit program encoding
//!
//! layout: magic `ZKMC`, u16 LE format version, u16 LE op count, then one
//! byte tag per op followed by its operands.

use crate::{Error, Result};

pub const MAGIC: &[u8; 4] = b"ZKMC";
pub const FORMAT_VERSION: u16 = 1;

/// input array an op reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Header,
    Body,
    Modulus,
    Redc,
    Signature,
}

impl Slot {
    fn code(self) -> u8 {
        match self {
            Slot::Header => 0,
            Slot::Body => 1,
            Slot::Modulus => 2,
            Slot::Redc => 3,
            Slot::Signature => 4,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Slot::Header,
            1 => Slot::Body,
            2 => Slot::Modulus,
            3 => Slot::Redc,
            4 => Slot::Signature,
            other => return Err(Error::InvalidCircuit(format!("unknown slot {}", other))),
        })
    }

    pub fn is_bytes(self) -> bool {
        matches!(self, Slot::Header | Slot::Body)
    }
}

/// public output an op exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    PubkeyHash,
    EmailNullifier,
    HeaderLength,
    BodyHashIndex,
}

impl OutputKind {
    fn code(self) -> u8 {
        match self {
            OutputKind::PubkeyHash => 0,
            OutputKind::EmailNullifier => 1,
            OutputKind::HeaderLength => 2,
            OutputKind::BodyHashIndex => 3,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => OutputKind::PubkeyHash,
            1 => OutputKind::EmailNullifier,
            2 => OutputKind::HeaderLength,
            3 => OutputKind::BodyHashIndex,
            other => return Err(Error::InvalidCircuit(format!("unknown output {}", other))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// capacity, length and zero padding of a byte array
    CheckBounded(Slot),
    /// limb widths and padding slot of a limb array
    CheckLimbs(Slot),
    /// redc matches the modulus
    CheckReduction,
    /// digest of a slot into a register
    Sha256 { slot: Slot, dst: u8 },
    /// signature^e mod n is a PKCS#1 v1.5 encoding of the register
    RsaVerify { digest: u8 },
    /// base64 of the register sits at body_hash_index in the header
    CheckBodyHash { digest: u8 },
    /// the dkim header sequence is a DKIM-Signature field covering bh=
    CheckDkimField,
    Output(OutputKind),
}

impl Op {
    fn tag(&self) -> u8 {
        match self {
            Op::CheckBounded(_) => 0x01,
            Op::CheckLimbs(_) => 0x02,
            Op::CheckReduction => 0x03,
            Op::Sha256 { .. } => 0x04,
            Op::RsaVerify { .. } => 0x05,
            Op::CheckBodyHash { .. } => 0x06,
            Op::CheckDkimField => 0x07,
            Op::Output(_) => 0x08,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub ops: Vec<Op>,
}

impl Program {
    /// the email verification program
    pub fn email_verify() -> Self {
        use Op::*;
        Self {
            ops: vec![
                CheckBounded(Slot::Header),
                CheckBounded(Slot::Body),
                CheckLimbs(Slot::Modulus),
                CheckLimbs(Slot::Redc),
                CheckLimbs(Slot::Signature),
                CheckReduction,
                Sha256 { slot: Slot::Header, dst: 0 },
                RsaVerify { digest: 0 },
                Sha256 { slot: Slot::Body, dst: 1 },
                CheckBodyHash { digest: 1 },
                CheckDkimField,
                Output(OutputKind::PubkeyHash),
                Output(OutputKind::EmailNullifier),
                Output(OutputKind::HeaderLength),
                Output(OutputKind::BodyHashIndex),
            ],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.ops.len() * 3);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.ops.len() as u16).to_le_bytes());
        for op in &self.ops {
            out.push(op.tag());
            match *op {
                Op::CheckBounded(slot) | Op::CheckLimbs(slot) => out.push(slot.code()),
                Op::Sha256 { slot, dst } => {
                    out.push(slot.code());
                    out.push(dst);
                }
                Op::RsaVerify { digest } | Op::CheckBodyHash { digest } => out.push(digest),
                Op::Output(kind) => out.push(kind.code()),
                Op::CheckReduction | Op::CheckDkimField => {}
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader { bytes, pos: 0 };
        if r.take(4)? != MAGIC {
            return Err(Error::InvalidCircuit("bad bytecode magic".into()));
        }
        let version = r.u16()?;
        if version != FORMAT_VERSION {
            return Err(Error::InvalidCircuit(format!("bytecode format {}", version)));
        }
        let count = r.u16()? as usize;

        let mut ops = Vec::with_capacity(count);
        for _ in 0..count {
            let op = match r.u8()? {
                0x01 => Op::CheckBounded(Slot::from_code(r.u8()?)?),
                0x02 => Op::CheckLimbs(Slot::from_code(r.u8()?)?),
                0x03 => Op::CheckReduction,
                0x04 => Op::Sha256 {
                    slot: Slot::from_code(r.u8()?)?,
                    dst: r.u8()?,
                },
                0x05 => Op::RsaVerify { digest: r.u8()? },
                0x06 => Op::CheckBodyHash { digest: r.u8()? },
                0x07 => Op::CheckDkimField,
                0x08 => Op::Output(OutputKind::from_code(r.u8()?)?),
                tag => return Err(Error::InvalidCircuit(format!("unknown opcode {:#04x}", tag))),
            };
            match op {
                Op::CheckBounded(slot) if !slot.is_bytes() => {
                    return Err(Error::InvalidCircuit(format!("{:?} is not a byte array", slot)))
                }
                Op::CheckLimbs(slot) if slot.is_bytes() => {
                    return Err(Error::InvalidCircuit(format!("{:?} is not a limb array", slot)))
                }
                _ => {}
            }
            ops.push(op);
        }
        if r.pos != bytes.len() {
            return Err(Error::InvalidCircuit("trailing bytes after program".into()));
        }
        Ok(Self { ops })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let out = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| Error::InvalidCircuit("truncated bytecode".into()))?;
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_verify_encoding() {
        let bytes = Program::email_verify().encode();
        assert_eq!(&bytes[..8], b"ZKMC\x01\x00\x0f\x00");
        assert_eq!(
            hex::encode(&bytes[8..]),
            "010001010202020302040304000005000401010601070800080108020803"
        );
        assert_eq!(Program::decode(&bytes).unwrap(), Program::email_verify());
    }

    #[test]
    fn test_truncated_and_unknown() {
        let bytes = Program::email_verify().encode();
        assert!(matches!(
            Program::decode(&bytes[..bytes.len() - 1]),
            Err(Error::InvalidCircuit(_))
        ));
        let mut bad = bytes.clone();
        bad[8] = 0x7f;
        assert!(matches!(Program::decode(&bad), Err(Error::InvalidCircuit(_))));
    }

    #[test]
    fn test_slot_kind_checked() {
        let program = Program {
            ops: vec![Op::CheckLimbs(Slot::Body)],
        };
        assert!(Program::decode(&program.encode()).is_err());
    }
}
