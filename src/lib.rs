#[cfg(not(unix))]
compile_error!("itlb-probe maps executable memory with mmap and only builds on unix targets");

pub mod backend;
pub mod chain;
pub mod error;
pub mod exec;
pub mod harness;
pub mod report;
pub mod sweep;

pub use backend::{host_encoder, Arch, Decoded, Instruction, InstructionEncoder};
pub use chain::{walk, ChainGenerator, ChainTrace};
pub use error::{ProbeError, Result};
pub use exec::{ExecRegion, PageSize};
pub use harness::{Harness, Timing};
pub use report::{CsvReport, CSV_HEADER};
pub use sweep::{next_pages, run_sweep, Measurement, PageSchedule, SweepConfig};
