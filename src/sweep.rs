//! Sweep Driver
//!
//! Page counts start at `min_pages` and advance by +1 below 128, +8 below
//! 512 and +32 after that, stopping before `max_pages`. Each count gets
//! roughly `target_budget` jumps in total, but never fewer than
//! `min_iterations` calls.

use crate::error::{ProbeError, Result};
use crate::harness::Harness;

pub const DEFAULT_MIN_PAGES: usize = 1;
pub const DEFAULT_MAX_PAGES: usize = 4096;
pub const DEFAULT_TARGET_BUDGET: u64 = 20_000_000;
pub const DEFAULT_MIN_ITERATIONS: u64 = 100;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SweepConfig {
    pub min_pages: usize,
    /// Exclusive upper bound.
    pub max_pages: usize,
    /// Total jumps aimed for per page count.
    pub target_budget: u64,
    pub min_iterations: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            min_pages: DEFAULT_MIN_PAGES,
            max_pages: DEFAULT_MAX_PAGES,
            target_budget: DEFAULT_TARGET_BUDGET,
            min_iterations: DEFAULT_MIN_ITERATIONS,
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_pages == 0 {
            return Err(ProbeError::InvalidArgument("min_pages must be at least 1".into()));
        }
        if self.min_iterations == 0 {
            return Err(ProbeError::InvalidArgument(
                "min_iterations must be at least 1".into(),
            ));
        }
        if self.target_budget == 0 {
            return Err(ProbeError::InvalidArgument(
                "target_budget must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn iterations_for(&self, pages: usize) -> u64 {
        let pages = pages.max(1) as u64;
        (self.target_budget / pages).max(self.min_iterations)
    }

    pub fn schedule(&self) -> PageSchedule {
        PageSchedule {
            next: self.min_pages,
            max: self.max_pages,
        }
    }
}

/// Step after `pages`.
#[inline]
pub const fn next_pages(pages: usize) -> usize {
    let step = if pages < 128 {
        1
    } else if pages < 512 {
        8
    } else {
        32
    };
    pages.saturating_add(step)
}

/// Page counts visited by a sweep.
#[derive(Clone, Debug)]
pub struct PageSchedule {
    next: usize,
    max: usize,
}

impl Iterator for PageSchedule {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.next >= self.max {
            return None;
        }
        let current = self.next;
        self.next = next_pages(current);
        Some(current)
    }
}

/// One row of output.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Measurement {
    pub pages: usize,
    pub iterations: u64,
    pub latency_ns: f64,
}

/// Measure every scheduled page count, handing each record to `emit` in
/// order. Returns the number of records.
pub fn run_sweep<F>(harness: &mut Harness, config: &SweepConfig, mut emit: F) -> Result<usize>
where
    F: FnMut(&Measurement) -> std::io::Result<()>,
{
    config.validate()?;
    tracing::info!(
        arch = %harness.arch(),
        page_size = harness.page_size().get(),
        min_pages = config.min_pages,
        max_pages = config.max_pages,
        budget = config.target_budget,
        "starting sweep"
    );

    let mut records = 0usize;
    for pages in config.schedule() {
        let iterations = config.iterations_for(pages);
        let latency_ns = harness.measure(pages, iterations)?;
        emit(&Measurement {
            pages,
            iterations,
            latency_ns,
        })?;
        records += 1;
    }

    tracing::info!(records, "sweep finished");
    Ok(records)
}
