//! Jump-Chain Code Generation
//!
//! One slot per page. Slot `i` jumps to slot `i + 1`; the last slot returns.
//! Everything else in the region is the encoder's no-op.

use crate::backend::{Decoded, InstructionEncoder};
use crate::error::{ProbeError, Result};
use crate::exec::{ExecRegion, PageSize};

/// Emits jump chains for one encoder at one page stride.
#[derive(Clone, Copy)]
pub struct ChainGenerator<'e> {
    encoder: &'e dyn InstructionEncoder,
    page_size: PageSize,
}

impl<'e> ChainGenerator<'e> {
    pub fn new(encoder: &'e dyn InstructionEncoder, page_size: PageSize) -> Self {
        Self { encoder, page_size }
    }

    pub fn encoder(&self) -> &'e dyn InstructionEncoder {
        self.encoder
    }

    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    /// Pages a chain of `jumps` slots is given (one spare at the end).
    pub fn pages_for(jumps: usize) -> Result<usize> {
        jumps
            .checked_add(1)
            .ok_or_else(|| ProbeError::InvalidArgument(format!("jump count {jumps} too large")))
    }

    /// Map `pages` pages and fill every instruction slot with no-ops.
    pub fn allocate(&self, pages: usize) -> Result<ExecRegion> {
        let mut region = ExecRegion::map(pages, self.page_size)?;
        region.fill(self.encoder.encode_nop().as_bytes())?;
        Ok(region)
    }

    /// Write the chain into `region` and flush the I-cache.
    pub fn generate(&self, region: &mut ExecRegion, jumps: usize) -> Result<()> {
        if jumps == 0 {
            return Err(ProbeError::InvalidArgument(
                "jump chain needs at least one slot".into(),
            ));
        }
        let page = self.page_size.get();
        let required = Self::pages_for(jumps)?;
        let available = region.len() / page;
        if available < required {
            return Err(ProbeError::RegionTooSmall {
                jumps,
                required,
                available,
            });
        }

        // Every jump is exactly one page forward.
        let hop = self.encoder.encode_jump(page as i64)?;
        let ret = self.encoder.encode_return();

        for i in 0..jumps {
            let insn = if i < jumps - 1 { &hop } else { &ret };
            region.write(i * page, insn.as_bytes())?;
        }

        region.sync_icache();
        Ok(())
    }
}

/// Result of statically following a chain.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChainTrace {
    /// Slots reached, including the terminating return.
    pub slots_visited: usize,
    /// Page-to-page jumps taken.
    pub jumps: usize,
    /// Page holding the return.
    pub return_page: usize,
}

/// Follow the chain from offset 0 without executing it.
///
/// Fails unless every jump lands on the first slot of a page in
/// `[0, expected)` and a return is reached within `expected` slots.
pub fn walk(
    region: &ExecRegion,
    encoder: &dyn InstructionEncoder,
    page_size: PageSize,
    expected: usize,
) -> Result<ChainTrace> {
    let bytes = region.as_bytes();
    let page = page_size.get();
    let mut offset = 0usize;
    let mut jumps = 0usize;

    for visited in 1..=expected {
        let current = offset / page;
        let slot = bytes.get(offset..).unwrap_or(&[]);
        match encoder.decode(slot) {
            Decoded::Return => {
                return Ok(ChainTrace {
                    slots_visited: visited,
                    jumps,
                    return_page: current,
                });
            }
            Decoded::Jump { displacement } => {
                let target = (offset as i64)
                    .checked_add(displacement)
                    .filter(|&t| t >= 0)
                    .map(|t| t as usize)
                    .ok_or_else(|| {
                        malformed(current, format!("jump to negative offset {displacement:+}"))
                    })?;
                if target % page != 0 {
                    return Err(malformed(
                        current,
                        format!("jump target {target:#x} is not page-aligned"),
                    ));
                }
                if target / page >= expected {
                    return Err(malformed(
                        current,
                        format!("jump target page {} outside chain of {expected}", target / page),
                    ));
                }
                offset = target;
                jumps += 1;
            }
            other => {
                return Err(malformed(current, format!("slot decodes as {other}")));
            }
        }
    }

    Err(malformed(
        offset / page,
        format!("no return within {expected} slots"),
    ))
}

fn malformed(page: usize, reason: String) -> ProbeError {
    ProbeError::MalformedChain { page, reason }
}
