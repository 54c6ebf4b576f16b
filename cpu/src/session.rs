//! One run of the machine, from store load to teardown.
//!
//! The session owns everything: it primes the store (image overlay,
//! initial orders, SCR from the operator's jump keys), drives the
//! fetch/decode/execute loop with the operator's monitoring and trace
//! settings, recognises the termination conditions, and tears down.
//!
//! Termination comes in three kinds.  An *orderly* stop (dynamic stop,
//! reader or teletype exhausted, instruction limit, punch overflow)
//! persists the store and spills the residual tape so the next run can
//! carry on.  A *fatal* [`Alarm`] leaves the store image untouched,
//! since its contents are indeterminate.  A host *interrupt* is
//! treated like an orderly stop that exits with the failure code.

use std::fs;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{event, Level};

use base::prelude::*;

use crate::alarm::Alarm;
use crate::control::Cpu;
use crate::diag::{self, Diag, VERBOSE_JUMPS, VERBOSE_INSTRUCTIONS, VERBOSE_REPORT};
use crate::io::Peripherals;
use crate::store::Store;

/// Why the machine stopped in an orderly fashion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An instruction jumped to itself: the conventional halt.
    DynamicStop(u32),
    ReaderExhausted,
    TtyExhausted,
    LimitReached,
    PunchOverflow,
}

impl StopReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            StopReason::DynamicStop(_) => 0,
            StopReason::ReaderExhausted => 2,
            StopReason::TtyExhausted => 4,
            StopReason::LimitReached => 8,
            StopReason::PunchOverflow => 16,
        }
    }
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            StopReason::DynamicStop(addr) => {
                write!(f, "dynamic stop at {}", Address::new(*addr))
            }
            StopReason::ReaderExhausted => f.write_str("run off end of input tape"),
            StopReason::TtyExhausted => f.write_str("run off end of teleprinter input"),
            StopReason::LimitReached => f.write_str("instruction limit reached"),
            StopReason::PunchOverflow => f.write_str("excessive output"),
        }
    }
}

/// How the session ended.
#[derive(Debug)]
pub enum Outcome {
    Stopped(StopReason),
    Failed(Alarm),
    Interrupted,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Stopped(reason) => reason.exit_code(),
            Outcome::Failed(_) | Outcome::Interrupted => 1,
        }
    }
}

pub struct SessionConfig {
    pub store_path: PathBuf,
    pub save_path: PathBuf,
    pub stop_path: PathBuf,
    /// The operator's jump keys: where execution starts.
    pub jump_address: u32,
    /// Give up after this many instructions.
    pub abandon_after: Option<u64>,
    /// Start tracing once this many instructions have run.
    pub trace_after: Option<u64>,
    /// Start tracing when execution first reaches this address.
    pub trace_from: Option<u32>,
    /// Start tracing at this instruction count, then abandon 1000
    /// instructions later.
    pub trace_window_after: Option<u64>,
    /// Report every change to this store location.
    pub monitor: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            store_path: PathBuf::from(".store"),
            save_path: PathBuf::from(".save"),
            stop_path: PathBuf::from(".stop"),
            jump_address: 8181,
            abandon_after: None,
            trace_after: None,
            trace_from: None,
            trace_window_after: None,
            monitor: None,
        }
    }
}

pub struct Session {
    config: SessionConfig,
    store: Store,
    cpu: Cpu,
    per: Peripherals,
    diag: Diag,
    instruction_count: u64,
    tracing: bool,
    abandon_after: Option<u64>,
    monitor_last: Option<Word>,
}

impl Session {
    /// Prime the machine: cleared store, image overlay, initial
    /// orders, SCR set from the jump keys.
    pub fn new(
        config: SessionConfig,
        per: Peripherals,
        mut diag: Diag,
    ) -> Result<Session, Alarm> {
        let mut store = Store::load_or_clear(&config.store_path, &mut diag)?;
        store.install_initial_orders(&mut diag);
        let cpu = Cpu::new();
        store.set_cell(cpu.scr_index, config.jump_address);
        diag.report(format_args!(
            "Starting execution from location {}",
            Address::new(config.jump_address)
        ));
        let monitor_last = config.monitor.and_then(|addr| store.get(addr));
        let abandon_after = config.abandon_after;
        Ok(Session {
            config,
            store,
            cpu,
            per,
            diag,
            instruction_count: 0,
            tracing: false,
            abandon_after,
            monitor_last,
        })
    }

    /// Run to termination and tear down.  `interrupted` is the flag a
    /// host signal handler raises; it is checked between instructions.
    pub fn run(&mut self, interrupted: Option<&AtomicBool>) -> Outcome {
        let mut outcome = self.execute(interrupted);
        if let Err(alarm) = self.finish(&outcome) {
            outcome = Outcome::Failed(alarm);
        }
        outcome
    }

    fn execute(&mut self, interrupted: Option<&AtomicBool>) -> Outcome {
        loop {
            if interrupted.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                self.per.flush_tty();
                self.diag
                    .note(format_args!("*** Execution terminated by interrupt"));
                return Outcome::Interrupted;
            }
            self.instruction_count += 1;

            let step = match self.cpu.step(&mut self.store, &mut self.per, &mut self.diag) {
                Ok(step) => step,
                Err(alarm) => return Outcome::Failed(alarm),
            };

            if let Some(stop) = step.stop {
                return Outcome::Stopped(stop);
            }

            // A taken conditional jump is trace-worthy on its own.
            if step.jump_taken && self.tracing && self.diag.is(VERBOSE_JUMPS) {
                self.diag.arm_one_shot();
            }

            if let Some(addr) = self.config.monitor {
                let now = self.store.get(addr);
                if now != self.monitor_last {
                    if let (Some(was), Some(now)) = (self.monitor_last, now) {
                        self.diag.note(format_args!(
                            "Monitored location changed from {was} to {now}"
                        ));
                    }
                    self.monitor_last = now;
                    self.diag.arm_one_shot();
                }
            }

            if Some(u32::from(step.last_scr)) == self.config.trace_from {
                self.tracing = true;
            }
            if self
                .config
                .trace_after
                .is_some_and(|n| self.instruction_count >= n)
            {
                self.tracing = true;
            }
            if Some(self.instruction_count) == self.config.trace_window_after {
                self.tracing = true;
                self.abandon_after = Some(self.instruction_count + 1000);
            }

            if self.diag.take_one_shot() {
                self.trace_line(&step);
            } else if self.tracing && self.diag.is(VERBOSE_INSTRUCTIONS) {
                self.trace_line(&step);
            }

            if self
                .abandon_after
                .is_some_and(|limit| self.instruction_count >= limit)
            {
                self.per.flush_tty();
                self.diag.report(format_args!("Instruction limit reached"));
                return Outcome::Stopped(StopReason::LimitReached);
            }

            // An instruction that jumps to itself: the machine has
            // halted.
            let last = u32::from(step.last_scr);
            if self.store.cell(self.cpu.scr_index) == last {
                self.per.flush_tty();
                self.diag.report(format_args!(
                    "Dynamic stop at {}",
                    Address::new(last)
                ));
                if let Err(error) = fs::write(&self.config.stop_path, format!("{last}")) {
                    return Outcome::Failed(Alarm::Peripheral {
                        device: "stop",
                        path: self.config.stop_path.clone(),
                        error,
                    });
                }
                return Outcome::Stopped(StopReason::DynamicStop(last));
            }
        }
    }

    fn trace_line(&mut self, step: &crate::control::Step) {
        self.per.flush_tty();
        self.diag.trace_instruction(
            self.instruction_count,
            step.last_scr,
            step.instruction,
            step.qualified_address,
            self.cpu.a,
            self.cpu.q,
            self.store.cell(self.cpu.b_index),
        );
    }

    /// Teardown.  Orderly stops and interrupts persist the durable
    /// state; alarms must not, because the store contents are suspect.
    fn finish(&mut self, outcome: &Outcome) -> Result<(), Alarm> {
        self.per.flush_tty();
        match outcome {
            Outcome::Stopped(reason) => {
                event!(Level::INFO, "machine stopped: {reason}");
                if matches!(
                    reason,
                    StopReason::DynamicStop(_) | StopReason::LimitReached
                ) {
                    self.statistics(reason.exit_code());
                }
                self.persist()?;
            }
            Outcome::Interrupted => {
                self.persist()?;
            }
            Outcome::Failed(alarm) => {
                self.diag.note(format_args!("*** {alarm}"));
                event!(Level::ERROR, "alarm raised: {alarm}");
            }
        }
        self.per.punch.finish()?;
        self.per.plotter.save(&mut self.diag)?;
        self.diag
            .report(format_args!("Exiting {}", outcome.exit_code()));
        Ok(())
    }

    fn persist(&mut self) -> Result<(), Alarm> {
        if !self.store.is_valid() {
            return Ok(());
        }
        self.store.persist(&self.config.store_path, &mut self.diag)?;
        self.diag.report(format_args!(
            "Copying over residual input to {}",
            self.config.save_path.display()
        ));
        self.per.reader.spill_residual(&self.config.save_path)
    }

    /// The end-of-run report: per-function-code execution counts and
    /// the estimated machine time.
    fn statistics(&mut self, exit_code: i32) {
        if !self.diag.is(VERBOSE_REPORT) {
            return;
        }
        self.diag.report(format_args!("exit code {exit_code}"));
        self.diag.report(format_args!("Function code count"));
        for row in self.cpu.function_counts.chunks(4).enumerate() {
            let (i, counts) = row;
            let mut line = String::new();
            for (j, count) in counts.iter().enumerate() {
                let f = i * 4 + j;
                let percent = if self.instruction_count > 0 {
                    count * 100 / self.instruction_count
                } else {
                    0
                };
                line.push_str(&format!("{f:4}: {count:8} ({percent:3}%)"));
            }
            self.diag.report(format_args!("{line}"));
        }
        self.diag.report(format_args!(
            "{} instructions executed in {} of simulated time",
            self.instruction_count,
            diag::time_string(self.cpu.elapsed_us)
        ));
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }
}
