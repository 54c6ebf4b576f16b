//! Command-line emulator for the Elliott 903 / 920B.
//!
//! The exit code tells the calling script why the machine stopped:
//! 0 dynamic stop, 1 catastrophic failure, 2 paper tape exhausted,
//! 4 teletype input exhausted, 8 instruction limit reached, 16 punch
//! overflow.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{event, Level};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

use base::prelude::*;
use cpu::io::{LazyInput, Plotter, Punch, Reader, TtyInput, TtyOutput};
use cpu::{
    Diag, Outcome, Peripherals, Session, SessionConfig, VERBOSE_REPORT,
};

const LOG_FILE: &str = "log.txt";
const STOP_FILE: &str = ".stop";

/// Emulator for the Elliott 903 / 920B minicomputer
///
/// Addresses may be written in the form m^n, meaning an address n in
/// 8K store module m.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Paper tape reader input
    #[arg(long, value_name = "FILE", default_value = ".reader")]
    reader: PathBuf,

    /// Paper tape punch output
    #[arg(long, value_name = "FILE", default_value = ".punch")]
    punch: PathBuf,

    /// Teletype input
    #[arg(long, value_name = "FILE", default_value = ".ttyin")]
    ttyin: PathBuf,

    /// Plotter output
    #[arg(long, value_name = "FILE", default_value = ".plot.png")]
    plot: PathBuf,

    /// Store image
    #[arg(long, value_name = "FILE", default_value = ".store")]
    store: PathBuf,

    /// Unconsumed paper tape input is copied here at exit
    #[arg(long, value_name = "FILE", default_value = ".save")]
    save: PathBuf,

    /// Send diagnostics to log.txt instead of stderr
    #[arg(short = 'd', long)]
    dfile: bool,

    /// Abandon execution after this many instructions
    #[arg(short, long, value_name = "N")]
    abandon: Option<u64>,

    /// Jump to this address to start execution
    #[arg(short, long, value_name = "N", default_value_t = 8181)]
    jump: u32,

    /// Report every change of this store location
    #[arg(short, long, value_name = "ADDRESS")]
    monitor: Option<Address>,

    /// Plotter pen size in steps
    #[arg(short, long, value_name = "N", default_value_t = cpu::io::DEFAULT_PEN_SIZE)]
    pen: u32,

    /// Trace 1000 instructions after the first N, then abandon
    #[arg(short, long, value_name = "N")]
    rtrace: Option<u64>,

    /// Start tracing when execution reaches this address
    #[arg(short, long, value_name = "ADDRESS")]
    start: Option<Address>,

    /// Start tracing after this many instructions
    #[arg(short, long, value_name = "N")]
    trace: Option<u64>,

    /// Plotter paper width in steps
    #[arg(short, long, value_name = "N", default_value_t = cpu::io::DEFAULT_PAPER_WIDTH)]
    width: u32,

    /// Plotter paper height in steps
    #[arg(long, value_name = "N", default_value_t = cpu::io::DEFAULT_PAPER_HEIGHT)]
    height: u32,

    /// Verbosity bitmask: 1 reports, 2 jump traces, 4 instruction
    /// traces, 8 transfer traces
    #[arg(short, long, value_name = "MASK", default_value_t = 0)]
    verbose: u32,
}

fn run_emulator() -> Result<i32, Box<dyn std::error::Error>> {
    let mut cli = Cli::parse();

    // Internal events default to warnings only; RUST_LOG overrides.
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    if cli.verbose >= 16 {
        return Err(format!("verbosity setting larger than 15: {}", cli.verbose).into());
    }
    if cli.jump >= 8192 {
        return Err("can only jump to addresses less than 8192".into());
    }
    if cli.pen > 12 {
        return Err("maximum pen size is 12".into());
    }
    if let Some(monitor) = cli.monitor {
        if monitor.get() >= STORE_WORDS as u32 {
            return Err(format!("monitor address outside store bounds: {monitor}").into());
        }
    }
    if let Some(start) = cli.start {
        if start.get() >= STORE_WORDS as u32 {
            return Err(format!("tracing start address outside store bounds: {start}").into());
        }
    }
    if cli.rtrace.is_some() {
        // The trace window takes precedence over the other two ways
        // of switching tracing on.
        cli.trace = None;
        cli.start = None;
    }

    let mut diag = if cli.dfile {
        let diag = Diag::to_log_file(cli.verbose, LOG_FILE.as_ref())
            .map_err(|e| format!("cannot open log file {LOG_FILE}: {e}"))?;
        eprintln!("Diagnostics are being sent to file {LOG_FILE}");
        diag
    } else {
        Diag::to_stderr(cli.verbose)
    };

    if diag.is(VERBOSE_REPORT) {
        report_options(&mut diag, &cli);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
    }

    let per = Peripherals {
        reader: Reader::new(LazyInput::from_file(cli.reader.clone())),
        punch: Punch::new(cli.punch.clone()),
        tty_in: TtyInput::new(LazyInput::from_file(cli.ttyin.clone())),
        tty_out: TtyOutput::to_stdout(),
        plotter: Plotter::new(cli.plot.clone(), cli.width, cli.height, cli.pen),
    };
    let config = SessionConfig {
        store_path: cli.store.clone(),
        save_path: cli.save.clone(),
        stop_path: PathBuf::from(STOP_FILE),
        jump_address: cli.jump,
        abandon_after: cli.abandon,
        trace_after: cli.trace,
        trace_from: cli.start.map(u32::from),
        trace_window_after: cli.rtrace,
        monitor: cli.monitor.map(u32::from),
    };

    let mut session = match Session::new(config, per, diag) {
        Ok(session) => session,
        Err(alarm) => {
            eprintln!("*** {alarm}");
            return Ok(1);
        }
    };
    let outcome = session.run(Some(&interrupted));
    event!(Level::DEBUG, "session ended: {outcome:?}");
    if let Outcome::Failed(alarm) = &outcome {
        eprintln!("*** {alarm}");
    }
    Ok(outcome.exit_code())
}

fn report_options(diag: &mut Diag, cli: &Cli) {
    diag.report(format_args!(
        "Paper tape will be read from {}",
        cli.reader.display()
    ));
    diag.report(format_args!(
        "Paper tape will be punched to {}",
        cli.punch.display()
    ));
    diag.report(format_args!(
        "Teletype input will be read from {}",
        cli.ttyin.display()
    ));
    diag.report(format_args!(
        "Plotter output will go to {}",
        cli.plot.display()
    ));
    diag.report(format_args!(
        "Plotter paper width {}, height {}",
        cli.width, cli.height
    ));
    diag.report(format_args!("Plotter pen size {} steps", cli.pen));
    diag.report(format_args!(
        "Store image will be read from {}",
        cli.store.display()
    ));
    diag.report(format_args!(
        "Execution will commence at address {} ({})",
        Address::new(cli.jump),
        cli.jump
    ));
    if let Some(n) = cli.abandon {
        diag.report(format_args!(
            "Execution will be abandoned after {n} instructions executed"
        ));
    }
    if let Some(n) = cli.trace {
        diag.report(format_args!(
            "Tracing will start after {n} instructions executed"
        ));
    }
    if let Some(start) = cli.start {
        diag.report(format_args!(
            "Tracing will start from location {} onwards",
            u32::from(start)
        ));
    }
    if let Some(n) = cli.rtrace {
        diag.report(format_args!(
            "Limited tracing will start after {n} instructions executed"
        ));
    }
    if let Some(monitor) = cli.monitor {
        diag.report(format_args!(
            "Location {} ({}) will be monitored",
            monitor,
            u32::from(monitor)
        ));
    }
}

fn main() {
    match run_emulator() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
