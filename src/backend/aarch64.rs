//! AArch64 Encoder
//!
//! Fixed 32-bit little-endian words. `B` carries a signed 26-bit word offset,
//! so the byte reach is +/-128 MiB and targets must be 4-byte aligned.

use crate::backend::{Arch, Decoded, Instruction, InstructionEncoder};
use crate::error::{ProbeError, Result};

const B_OPCODE: u32 = 0x1400_0000;
const B_OPCODE_MASK: u32 = 0xFC00_0000;
const IMM26_MASK: u32 = 0x03FF_FFFF;
const RET: u32 = 0xD65F_03C0; // ret x30
const NOP: u32 = 0xD503_201F;

pub const INSTRUCTION_BYTES: i64 = 4;

#[derive(Clone, Copy, Debug, Default)]
pub struct Aarch64Encoder;

impl Aarch64Encoder {
    pub const MIN_DISPLACEMENT: i64 = -(1 << 25) * INSTRUCTION_BYTES;
    pub const MAX_DISPLACEMENT: i64 = ((1 << 25) - 1) * INSTRUCTION_BYTES;

    fn word(bytes: &[u8]) -> Option<u32> {
        let word: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(word))
    }
}

impl InstructionEncoder for Aarch64Encoder {
    fn arch(&self) -> Arch {
        Arch::Aarch64
    }

    fn encode_jump(&self, displacement: i64) -> Result<Instruction> {
        if displacement % INSTRUCTION_BYTES != 0 {
            return Err(ProbeError::MisalignedDisplacement {
                arch: Arch::Aarch64,
                displacement,
                align: INSTRUCTION_BYTES,
            });
        }
        if !(Self::MIN_DISPLACEMENT..=Self::MAX_DISPLACEMENT).contains(&displacement) {
            return Err(ProbeError::DisplacementOverflow {
                arch: Arch::Aarch64,
                displacement,
                min: Self::MIN_DISPLACEMENT,
                max: Self::MAX_DISPLACEMENT,
            });
        }
        let imm26 = ((displacement / INSTRUCTION_BYTES) as u32) & IMM26_MASK;
        Ok(Instruction::word(B_OPCODE | imm26))
    }

    fn encode_return(&self) -> Instruction {
        Instruction::word(RET)
    }

    fn encode_nop(&self) -> Instruction {
        Instruction::word(NOP)
    }

    fn requires_cache_sync(&self) -> bool {
        true
    }

    fn decode(&self, bytes: &[u8]) -> Decoded {
        let Some(word) = Self::word(bytes) else {
            return Decoded::Unknown;
        };
        match word {
            RET => Decoded::Return,
            NOP => Decoded::Nop,
            w if w & B_OPCODE_MASK == B_OPCODE => {
                // Sign-extend imm26.
                let imm = (((w & IMM26_MASK) << 6) as i32) >> 6;
                Decoded::Jump {
                    displacement: imm as i64 * INSTRUCTION_BYTES,
                }
            }
            _ => Decoded::Unknown,
        }
    }
}
