//! Timing Harness

use std::time::{Duration, Instant};

use crate::backend::{host_encoder, Arch, InstructionEncoder};
use crate::chain::{self, ChainGenerator};
use crate::error::{ProbeError, Result};
use crate::exec::{ExecRegion, PageSize};

/// Owns at most one executable region at a time and times chains in it.
pub struct Harness {
    encoder: &'static dyn InstructionEncoder,
    page_size: PageSize,
    region: Option<ExecRegion>,
}

/// Raw timing of one `measure` call.
#[derive(Clone, Copy, Debug)]
pub struct Timing {
    pub jumps: usize,
    pub iterations: u64,
    pub elapsed: Duration,
}

impl Timing {
    /// Mean nanoseconds per page-to-page jump.
    pub fn latency_ns(&self) -> f64 {
        self.elapsed.as_nanos() as f64 / (self.iterations as f64 * self.jumps as f64)
    }
}

impl Harness {
    /// Harness for the host ISA. `page_size` is fixed for its lifetime.
    pub fn new(page_size: PageSize) -> Result<Self> {
        Ok(Self {
            encoder: host_encoder()?,
            page_size,
            region: None,
        })
    }

    /// Harness for `arch`, which must be the host.
    pub fn for_arch(arch: Arch, page_size: PageSize) -> Result<Self> {
        if Arch::host() != Some(arch) {
            return Err(ProbeError::InvalidArgument(format!(
                "cannot execute {arch} code on {}",
                std::env::consts::ARCH
            )));
        }
        Ok(Self {
            encoder: arch.encoder(),
            page_size,
            region: None,
        })
    }

    pub fn arch(&self) -> Arch {
        self.encoder.arch()
    }

    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    /// Currently held region, if any.
    pub fn region(&self) -> Option<&ExecRegion> {
        self.region.as_ref()
    }

    fn generator(&self) -> ChainGenerator<'static> {
        ChainGenerator::new(self.encoder, self.page_size)
    }

    /// Release the held region, then map a fresh no-op filled one.
    pub fn allocate(&mut self, pages: usize) -> Result<&mut ExecRegion> {
        self.region = None;
        let region = self.generator().allocate(pages)?;
        Ok(self.region.insert(region))
    }

    /// Mean latency in ns of one jump across a chain of `jumps` pages.
    pub fn measure(&mut self, jumps: usize, iterations: u64) -> Result<f64> {
        self.time(jumps, iterations).map(|t| t.latency_ns())
    }

    pub fn time(&mut self, jumps: usize, iterations: u64) -> Result<Timing> {
        if jumps == 0 {
            return Err(ProbeError::InvalidArgument("jump count must be at least 1".into()));
        }
        if iterations == 0 {
            return Err(ProbeError::InvalidArgument("iteration count must be at least 1".into()));
        }

        let gen = self.generator();
        let region = self.allocate(ChainGenerator::pages_for(jumps)?)?;
        gen.generate(region, jumps)?;
        let trace = chain::walk(region, gen.encoder(), gen.page_size(), jumps)?;
        debug_assert_eq!(trace.slots_visited, jumps);

        // SAFETY: `walk` proved the entry reaches a return in `jumps` forward
        // page hops, all inside the region.
        unsafe { region.invoke() };

        let start = Instant::now();
        // SAFETY: as above.
        unsafe { region.invoke_repeated(iterations) };
        let elapsed = start.elapsed();

        let timing = Timing {
            jumps,
            iterations,
            elapsed,
        };
        tracing::debug!(
            jumps,
            iterations,
            elapsed_us = elapsed.as_micros() as u64,
            latency_ns = timing.latency_ns(),
            "measured chain"
        );
        Ok(timing)
    }
}
