//! Operator diagnostics.
//!
//! Diagnostic output is distinct from the emulator's internal
//! `tracing` events: it is the report and trace stream the operator
//! asks for with the verbosity bitmask, written to stderr or to a log
//! file.  The bits compose by OR:
//!
//! * 1 — general reports (store loaded, dynamic stop, statistics, ...)
//! * 2 — trace jumps taken while tracing is active
//! * 4 — trace every instruction while tracing is active
//! * 8 — trace individual reader/punch/teletype/plotter transfers
//!
//! A transfer trace or a monitored-location change also arms a
//! one-shot: the session prints a full trace line for the instruction
//! responsible even when bit 4 is off.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use base::prelude::*;

pub const VERBOSE_REPORT: u32 = 1;
pub const VERBOSE_JUMPS: u32 = 2;
pub const VERBOSE_INSTRUCTIONS: u32 = 4;
pub const VERBOSE_TRANSFERS: u32 = 8;

enum Sink {
    Stderr,
    File(BufWriter<File>),
}

pub struct Diag {
    verbose: u32,
    sink: Sink,
    one_shot: bool,
}

impl Diag {
    pub fn to_stderr(verbose: u32) -> Diag {
        Diag {
            verbose,
            sink: Sink::Stderr,
            one_shot: false,
        }
    }

    pub fn to_log_file(verbose: u32, path: &Path) -> io::Result<Diag> {
        let file = File::create(path)?;
        Ok(Diag {
            verbose,
            sink: Sink::File(BufWriter::new(file)),
            one_shot: false,
        })
    }

    pub fn is(&self, bit: u32) -> bool {
        self.verbose & bit != 0
    }

    /// General report, printed when verbosity bit 1 is set.
    pub fn report(&mut self, args: fmt::Arguments<'_>) {
        if self.is(VERBOSE_REPORT) {
            self.write_line(args);
        }
    }

    /// Unconditional diagnostic, for termination causes and alarms.
    pub fn note(&mut self, args: fmt::Arguments<'_>) {
        self.write_line(args);
    }

    /// Transfer trace, printed when verbosity bit 8 is set.  Arms a
    /// one-shot trace of the instruction that performed the transfer.
    pub fn trace_transfer(&mut self, args: fmt::Arguments<'_>) {
        if self.is(VERBOSE_TRANSFERS) {
            self.one_shot = true;
            self.write_line(args);
        }
    }

    pub fn arm_one_shot(&mut self) {
        self.one_shot = true;
    }

    pub fn take_one_shot(&mut self) -> bool {
        std::mem::replace(&mut self.one_shot, false)
    }

    /// One full trace line for an executed instruction: instruction
    /// count, fetch address, the instruction with its `/` B-modify
    /// marker, then A, Q and B in signed decimal and octal.
    #[allow(clippy::too_many_arguments)]
    pub fn trace_instruction(
        &mut self,
        count: u64,
        last_scr: Address,
        instruction: Instruction,
        qualified_address: u32,
        a: Word,
        q: Word,
        b: Word,
    ) {
        let marker = if instruction.is_b_modified() {
            format!("/{}", instruction.function())
        } else {
            format!("{}", instruction.function())
        };
        self.write_line(format_args!(
            "{count:10}   {last_scr}  {marker:>3} {qualified_address:4} A={:+8} (&{a:06o}) Q={:+8} (&{q:06o}) B={:+7} ({})",
            as_signed(a),
            as_signed(q),
            as_signed(b),
            Address::new(b),
        ));
    }

    fn write_line(&mut self, args: fmt::Arguments<'_>) {
        // A lost diagnostic line must not stop the machine.
        let _ = match &mut self.sink {
            Sink::Stderr => writeln!(io::stderr(), "{args}"),
            Sink::File(w) => writeln!(w, "{args}").and_then(|()| w.flush()),
        };
    }
}

/// Render an estimated elapsed machine time for the statistics report.
pub fn time_string(us: u64) -> String {
    let hours = us / 3_600_000_000;
    let rest = us - hours * 3_600_000_000;
    let minutes = rest / 60_000_000;
    let seconds = (rest - minutes * 60_000_000) as f64 / 1_000_000.0;
    format!("{hours} hours, {minutes} minutes and {seconds:.2} seconds")
}
