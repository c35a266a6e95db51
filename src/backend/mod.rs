//! Instruction encoders
//!
//! One encoder per supported ISA. Encoders are pure byte producers; nothing
//! here touches executable memory, so every encoder is usable on every host.

pub mod aarch64;
pub mod x86_64;

use std::fmt;
use std::str::FromStr;

use crate::error::{ProbeError, Result};

pub use aarch64::Aarch64Encoder;
pub use x86_64::X86_64Encoder;

/// Longest encoding any backend produces.
pub const MAX_INSTRUCTION_BYTES: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::X86_64, Arch::Aarch64];

    /// Architecture of the running binary, if it has an encoder.
    pub const fn host() -> Option<Arch> {
        if cfg!(target_arch = "x86_64") {
            Some(Arch::X86_64)
        } else if cfg!(target_arch = "aarch64") {
            Some(Arch::Aarch64)
        } else {
            None
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86-64",
            Arch::Aarch64 => "aarch64",
        }
    }

    pub fn encoder(self) -> &'static dyn InstructionEncoder {
        match self {
            Arch::X86_64 => &X86_64Encoder,
            Arch::Aarch64 => &Aarch64Encoder,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "x86-64" | "x86_64" | "amd64" => Ok(Arch::X86_64),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            other => Err(ProbeError::InvalidArgument(format!(
                "unknown architecture '{other}' (expected x86-64 or aarch64)"
            ))),
        }
    }
}

/// Encoder for the host, or `UnsupportedArch`.
pub fn host_encoder() -> Result<&'static dyn InstructionEncoder> {
    Arch::host()
        .map(Arch::encoder)
        .ok_or(ProbeError::UnsupportedArch(std::env::consts::ARCH))
}

/// A single encoded instruction. Fixed capacity, no allocation.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    buf: [u8; MAX_INSTRUCTION_BYTES],
    len: u8,
}

impl Instruction {
    pub fn new(bytes: &[u8]) -> Self {
        debug_assert!(!bytes.is_empty() && bytes.len() <= MAX_INSTRUCTION_BYTES);
        let mut buf = [0u8; MAX_INSTRUCTION_BYTES];
        buf[..bytes.len()].copy_from_slice(bytes);
        Self {
            buf,
            len: bytes.len() as u8,
        }
    }

    /// 32-bit fixed-width word, little-endian.
    pub fn word(word: u32) -> Self {
        Self::new(&word.to_le_bytes())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instruction(")?;
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// What a slot decodes to. Only the shapes the chain generator emits.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Decoded {
    /// Byte distance from the slot's own address to the target.
    Jump { displacement: i64 },
    Return,
    Nop,
    Unknown,
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoded::Jump { displacement } => {
                let sign = if *displacement < 0 { '-' } else { '+' };
                write!(f, "jmp {sign}{:#x}", displacement.unsigned_abs())
            }
            Decoded::Return => f.write_str("ret"),
            Decoded::Nop => f.write_str("nop"),
            Decoded::Unknown => f.write_str("??"),
        }
    }
}

/// ISA capability set used by the chain generator.
pub trait InstructionEncoder {
    fn arch(&self) -> Arch;

    /// Unconditional relative jump. `displacement` is in bytes, measured from
    /// the address of the jump itself to its target.
    fn encode_jump(&self, displacement: i64) -> Result<Instruction>;

    fn encode_return(&self) -> Instruction;

    fn encode_nop(&self) -> Instruction;

    /// Whether freshly written code needs an explicit I-cache flush.
    fn requires_cache_sync(&self) -> bool;

    fn decode(&self, bytes: &[u8]) -> Decoded;
}
