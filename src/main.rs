//! Steptrace - command line entry point
//!
//! Parses arguments into a trace configuration, launches the selected
//! backend and runs the stepping session.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;

use steptrace::analysis::aout::AoutHeader;
use steptrace::analysis::{AddressPolicy, Band, StepAction};
use steptrace::app::{BackendKind, EndReason, LaunchPlan, Session, SessionReport, TraceConfig};
use steptrace::core::trace::{LogDestination, TraceLog};
use steptrace::debug::types::{parse_address, BreakLocation, Flavor, ForkMode, SessionSettings};

/// Steptrace: trace a program one instruction at a time
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Program to trace
    target: PathBuf,

    /// Arguments passed to the program
    #[arg(last = true)]
    args: Vec<String>,

    /// Trace log file, or `stdout`
    #[arg(short, long, default_value = "steptrace.log")]
    log: LogDestination,

    /// Breakpoint before running (`func`, `func+off` or an address)
    #[arg(short = 'b', long = "break")]
    breakpoint: Option<BreakLocation>,

    /// Run until this address before stepping
    #[arg(short, long, value_parser = parse_until)]
    until: Option<u64>,

    /// Address band `FLOOR=finish|trace`; repeat to replace the default bands
    #[arg(long = "band")]
    bands: Vec<Band>,

    /// Action for addresses below every band
    #[arg(long, default_value = "trace")]
    below: StepAction,

    /// Debugging backend (gdb or ptrace)
    #[arg(long, default_value = "gdb")]
    backend: BackendKind,

    /// gdb executable
    #[arg(long, default_value = "gdb")]
    gdb: PathBuf,

    /// Terminal for the target under gdb (default: the controlling tty)
    #[arg(long, value_name = "PATH")]
    tty: Option<PathBuf>,

    /// Process to follow on fork (parent or child)
    #[arg(long, default_value = "child")]
    follow_fork: ForkMode,

    /// Disassembly flavor (intel or att)
    #[arg(long, default_value = "intel")]
    flavor: Flavor,

    /// Output radix for gdb values (8, 10 or 16)
    #[arg(long, default_value_t = 16, value_parser = parse_radix)]
    radix: u32,

    /// Stop after this many loop iterations
    #[arg(long)]
    max_steps: Option<u64>,

    /// Print and validate the a.out header of FILE, then exit
    #[arg(long, value_name = "FILE")]
    aout_header: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_radix(s: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(radix @ (8 | 10 | 16)) => Ok(radix),
        _ => Err(format!("unsupported radix `{}` (expected 8, 10 or 16)", s)),
    }
}

fn parse_until(s: &str) -> Result<u64, String> {
    parse_address(s).map_err(|e| format!("invalid address `{}`: {}", s, e))
}

impl Args {
    fn policy(&self) -> anyhow::Result<AddressPolicy> {
        let bands = if self.bands.is_empty() {
            AddressPolicy::default().bands().to_vec()
        } else {
            self.bands.clone()
        };
        Ok(AddressPolicy::new(bands, self.below)?)
    }

    fn into_config(self) -> anyhow::Result<TraceConfig> {
        let policy = self.policy()?;
        let plan = LaunchPlan {
            settings: SessionSettings {
                pagination: false,
                follow_fork: self.follow_fork,
                flavor: self.flavor,
                output_radix: self.radix,
            },
            breakpoint: self.breakpoint,
            until: self.until,
            max_steps: self.max_steps,
        };

        Ok(TraceConfig {
            target: self.target,
            args: self.args,
            log: self.log,
            backend: self.backend,
            gdb: self.gdb,
            tty: self.tty,
            policy,
            plan,
        })
    }
}

fn main() -> anyhow::Result<()> {
    // 1. Parse command line arguments
    let args = Args::parse();

    // 2. Initialize logger with verbosity level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    // 3. Header inspection mode
    if let Some(path) = &args.aout_header {
        let header = AoutHeader::from_file(path)
            .with_context(|| format!("reading a.out header of {}", path.display()))?;
        println!("{}", header);
        header.validate()?;
        println!("{}", "header ok".green());
        return Ok(());
    }

    let config = args.into_config()?;
    log::info!("Target: {}", config.target.display());
    log::debug!("Config: {:?}", config);

    // 4. Launch and trace
    let trace = TraceLog::open(&config.log)
        .with_context(|| format!("opening trace log {:?}", config.log))?;
    let debugger = config
        .connect()
        .with_context(|| format!("launching {}", config.target.display()))?;

    let mut session = Session::new(debugger, trace, config.policy.clone(), config.plan.clone());
    let report = session.run().context("session setup failed")?;
    print_summary(&report);

    Ok(())
}

fn print_summary(report: &SessionReport) {
    println!("{}", "Steptrace summary".bold().cyan());
    println!("  {}  {}", "iterations".green(), report.iterations);
    println!("  {}       {}", "steps".green(), report.steps);
    println!("  {}    {}", "finishes".green(), report.finishes);
    let dump = if report.final_dump { "written".normal() } else { "unavailable".yellow() };
    println!("  {}  {}", "final dump".green(), dump);

    match &report.end {
        EndReason::Terminated { reason } => println!("  {}         {}", "end".green(), reason),
        EndReason::Failed { error } => {
            println!("  {}         {}", "end".green(), error.to_string().red())
        }
        EndReason::StepLimit => println!("  {}         step limit reached", "end".green()),
    }
}
