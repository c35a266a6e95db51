//! x86_64 Encoder

use crate::backend::{Arch, Decoded, Instruction, InstructionEncoder};
use crate::error::{ProbeError, Result};

const JMP_REL32: u8 = 0xE9;
const RET: u8 = 0xC3;
const NOP: u8 = 0x90;

/// JMP rel32 is opcode + 4-byte immediate.
pub const JMP_REL32_LEN: i64 = 5;

/// x86-64 has coherent I/D caches; rel32 is relative to the next instruction.
#[derive(Clone, Copy, Debug, Default)]
pub struct X86_64Encoder;

impl X86_64Encoder {
    /// Slot-relative displacement range representable by JMP rel32.
    pub const MIN_DISPLACEMENT: i64 = i32::MIN as i64 + JMP_REL32_LEN;
    pub const MAX_DISPLACEMENT: i64 = i32::MAX as i64 + JMP_REL32_LEN;
}

impl InstructionEncoder for X86_64Encoder {
    fn arch(&self) -> Arch {
        Arch::X86_64
    }

    fn encode_jump(&self, displacement: i64) -> Result<Instruction> {
        let rel = i32::try_from(displacement - JMP_REL32_LEN).map_err(|_| {
            ProbeError::DisplacementOverflow {
                arch: Arch::X86_64,
                displacement,
                min: Self::MIN_DISPLACEMENT,
                max: Self::MAX_DISPLACEMENT,
            }
        })?;
        let imm = rel.to_le_bytes();
        Ok(Instruction::new(&[JMP_REL32, imm[0], imm[1], imm[2], imm[3]]))
    }

    fn encode_return(&self) -> Instruction {
        Instruction::new(&[RET])
    }

    fn encode_nop(&self) -> Instruction {
        Instruction::new(&[NOP])
    }

    fn requires_cache_sync(&self) -> bool {
        false
    }

    fn decode(&self, bytes: &[u8]) -> Decoded {
        match bytes {
            [JMP_REL32, a, b, c, d, ..] => Decoded::Jump {
                displacement: i32::from_le_bytes([*a, *b, *c, *d]) as i64 + JMP_REL32_LEN,
            },
            [RET, ..] => Decoded::Return,
            [NOP, ..] => Decoded::Nop,
            _ => Decoded::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jmp_one_page() {
        let insn = X86_64Encoder.encode_jump(4096).unwrap();
        // E9 FB 0F 00 00: 4096 - 5 = 0xFFB
        assert_eq!(insn.as_bytes(), &[0xE9, 0xFB, 0x0F, 0x00, 0x00]);
    }

    #[test]
    fn test_jmp_backward() {
        let insn = X86_64Encoder.encode_jump(-4096).unwrap();
        let rel = i32::from_le_bytes(insn.as_bytes()[1..5].try_into().unwrap());
        assert_eq!(rel, -4101);
    }

    #[test]
    fn test_ret_and_nop() {
        assert_eq!(X86_64Encoder.encode_return().as_bytes(), &[0xC3]);
        assert_eq!(X86_64Encoder.encode_nop().as_bytes(), &[0x90]);
        assert!(!X86_64Encoder.requires_cache_sync());
    }

    #[test]
    fn test_displacement_limits() {
        assert!(X86_64Encoder.encode_jump(X86_64Encoder::MAX_DISPLACEMENT).is_ok());
        assert!(X86_64Encoder.encode_jump(X86_64Encoder::MIN_DISPLACEMENT).is_ok());

        let err = X86_64Encoder
            .encode_jump(X86_64Encoder::MAX_DISPLACEMENT + 1)
            .unwrap_err();
        assert!(matches!(err, ProbeError::DisplacementOverflow { arch: Arch::X86_64, .. }));
        assert!(X86_64Encoder.encode_jump(1 << 40).is_err());
    }

    #[test]
    fn test_decode() {
        let enc = X86_64Encoder;
        let jmp = enc.encode_jump(2 * 1024 * 1024).unwrap();
        assert_eq!(
            enc.decode(jmp.as_bytes()),
            Decoded::Jump { displacement: 2 * 1024 * 1024 }
        );
        assert_eq!(enc.decode(&[0xC3, 0x90]), Decoded::Return);
        assert_eq!(enc.decode(&[0x90; 4]), Decoded::Nop);
        assert_eq!(enc.decode(&[0xCC]), Decoded::Unknown);
        // Truncated jump is not a jump.
        assert_eq!(enc.decode(&[0xE9, 0x00]), Decoded::Unknown);
    }
}
