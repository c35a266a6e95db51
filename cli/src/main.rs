//! itlb CLI
//!
//! Thin front end over `itlb_probe`: argument parsing, CSV to stdout,
//! diagnostics to stderr.

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use itlb_probe::sweep::{
    DEFAULT_MAX_PAGES, DEFAULT_MIN_ITERATIONS, DEFAULT_MIN_PAGES, DEFAULT_TARGET_BUDGET,
};
use itlb_probe::{
    run_sweep, walk, Arch, ChainGenerator, CsvReport, Harness, Measurement, PageSize, SweepConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "itlb",
    version,
    args_conflicts_with_subcommands = true,
    about = "Measure instruction-TLB miss latency with page-spanning jump chains."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Sweep options, used when no subcommand is given.
    #[command(flatten)]
    sweep: SweepArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sweep page counts and print `Pages,Latency_ns` CSV (default)
    Sweep(SweepArgs),
    /// Time a single chain length
    Measure(MeasureArgs),
    /// Generate a chain without running it and print every slot
    Dump(DumpArgs),
    /// Print host architecture and page size
    Info,
}

#[derive(Args, Debug, Clone)]
struct PageArgs {
    /// Distance between jumps in bytes (power-of-two multiple of the host page)
    #[arg(long, value_name = "BYTES")]
    page_size: Option<usize>,
}

impl PageArgs {
    fn resolve(&self) -> Result<PageSize> {
        let host = PageSize::query();
        match self.page_size {
            Some(bytes) => PageSize::stride(bytes, host).context("invalid --page-size"),
            None => Ok(host),
        }
    }
}

#[derive(Args, Debug, Clone)]
struct SweepArgs {
    /// First page count
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MIN_PAGES)]
    min_pages: usize,

    /// Stop before this page count
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_PAGES)]
    max_pages: usize,

    /// Total jumps aimed for per page count
    #[arg(long, value_name = "JUMPS", default_value_t = DEFAULT_TARGET_BUDGET)]
    budget: u64,

    /// Lower bound on timed calls per page count
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MIN_ITERATIONS)]
    min_iterations: u64,

    #[command(flatten)]
    page: PageArgs,
}

impl SweepArgs {
    fn config(&self) -> SweepConfig {
        SweepConfig {
            min_pages: self.min_pages,
            max_pages: self.max_pages,
            target_budget: self.budget,
            min_iterations: self.min_iterations,
        }
    }
}

#[derive(Args, Debug)]
struct MeasureArgs {
    /// Pages (jumps) in the chain
    #[arg(long, value_name = "N")]
    pages: usize,

    /// Timed calls; defaults to the sweep budget divided by --pages
    #[arg(long, value_name = "N")]
    iterations: Option<u64>,

    #[command(flatten)]
    page: PageArgs,
}

#[derive(Args, Debug)]
struct DumpArgs {
    /// Pages (jumps) in the chain
    #[arg(long, value_name = "N")]
    pages: usize,

    /// Target encoding (x86-64 or aarch64); defaults to the host
    #[arg(long)]
    arch: Option<Arch>,

    #[command(flatten)]
    page: PageArgs,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        None => cmd_sweep(&cli.sweep),
        Some(Command::Sweep(args)) => cmd_sweep(&args),
        Some(Command::Measure(args)) => cmd_measure(&args),
        Some(Command::Dump(args)) => cmd_dump(&args),
        Some(Command::Info) => cmd_info(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn cmd_sweep(args: &SweepArgs) -> Result<()> {
    let page_size = args.page.resolve()?;
    let config = args.config();
    let mut harness = Harness::new(page_size).context("creating harness")?;

    let stdout = io::stdout().lock();
    let mut report = CsvReport::new(stdout).context("writing CSV header")?;
    run_sweep(&mut harness, &config, |m| report.record(m)).context("sweep failed")?;
    let mut stdout = report.finish().context("flushing output")?;
    stdout.flush()?;
    Ok(())
}

fn cmd_measure(args: &MeasureArgs) -> Result<()> {
    let page_size = args.page.resolve()?;
    let iterations = args
        .iterations
        .unwrap_or_else(|| SweepConfig::default().iterations_for(args.pages));
    let mut harness = Harness::new(page_size).context("creating harness")?;
    let latency_ns = harness
        .measure(args.pages, iterations)
        .with_context(|| format!("measuring {} pages", args.pages))?;

    let mut report = CsvReport::new(io::stdout().lock())?;
    report.record(&Measurement {
        pages: args.pages,
        iterations,
        latency_ns,
    })?;
    report.finish()?.flush()?;
    Ok(())
}

fn cmd_dump(args: &DumpArgs) -> Result<()> {
    let page_size = args.page.resolve()?;
    let arch = match args.arch {
        Some(arch) => arch,
        None => Arch::host().context("host has no encoder; pass --arch")?,
    };
    let encoder = arch.encoder();
    let gen = ChainGenerator::new(encoder, page_size);

    let mut region = gen.allocate(ChainGenerator::pages_for(args.pages)?)?;
    gen.generate(&mut region, args.pages)
        .with_context(|| format!("generating {arch} chain of {} pages", args.pages))?;
    let trace = walk(&region, encoder, page_size, args.pages)?;

    let mut out = io::stdout().lock();
    writeln!(out, "page,offset,bytes,decoded")?;
    let slot_len = encoder.encode_jump(page_size.get() as i64)?.len();
    let bytes = region.as_bytes();
    for page in 0..args.pages {
        let offset = page * page_size.get();
        let slot = &bytes[offset..offset + slot_len];
        let hex: Vec<String> = slot.iter().map(|b| format!("{b:02x}")).collect();
        writeln!(
            out,
            "{page},{offset:#x},{},{}",
            hex.join(" "),
            encoder.decode(slot)
        )?;
    }
    out.flush()?;

    eprintln!(
        "{arch}: {} slots, {} jumps, return on page {}",
        trace.slots_visited, trace.jumps, trace.return_page
    );
    Ok(())
}

fn cmd_info() -> Result<()> {
    let page_size = PageSize::query();
    match Arch::host() {
        Some(arch) => {
            println!("arch: {arch}");
            println!("page_size: {page_size}");
            println!("icache_sync: {}", arch.encoder().requires_cache_sync());
        }
        None => {
            println!("arch: {} (unsupported)", std::env::consts::ARCH);
            println!("page_size: {page_size}");
        }
    }
    Ok(())
}
