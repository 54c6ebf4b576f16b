//! The paper tape punch.
//!
//! Raw telecode bytes, opened lazily on the first punch.  Output is
//! capped at one reel of tape; hitting the cap is the orderly "punch
//! overflow" termination.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{event, Level};

use crate::alarm::Alarm;
use crate::diag::{Diag, VERBOSE_REPORT, VERBOSE_TRANSFERS};
use crate::io::dev_teletype::TtyOutput;
use crate::io::REEL;

pub enum PunchResult {
    Punched,
    Overflow,
}

pub struct Punch {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    count: u64,
}

impl Punch {
    pub fn new(path: PathBuf) -> Punch {
        Punch {
            path,
            file: None,
            count: 0,
        }
    }

    pub fn punch(
        &mut self,
        ch: u8,
        tty: &mut TtyOutput,
        diag: &mut Diag,
    ) -> Result<PunchResult, Alarm> {
        if self.count >= REEL {
            tty.flush_line();
            diag.note(format_args!("Excessive output to punch"));
            return Ok(PunchResult::Overflow);
        }
        let failed = |path: &Path, error: io::Error| Alarm::Peripheral {
            device: "paper tape punch",
            path: path.to_path_buf(),
            error,
        };
        if self.file.is_none() {
            let file = File::create(&self.path).map_err(|e| {
                tty.flush_line();
                failed(&self.path, e)
            })?;
            event!(Level::DEBUG, "opened punch file {}", self.path.display());
            if diag.is(VERBOSE_REPORT) {
                tty.flush_line();
                diag.report(format_args!(
                    "Paper tape punch file {} opened",
                    self.path.display()
                ));
            }
            self.file = Some(BufWriter::new(file));
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(&[ch]).map_err(|e| {
                tty.flush_line();
                failed(&self.path, e)
            })?;
        }
        self.count += 1;
        if diag.is(VERBOSE_TRANSFERS) {
            tty.flush_line();
            diag.trace_transfer(format_args!("Paper tape character {ch} punched"));
        }
        Ok(PunchResult::Punched)
    }

    /// Flush buffered output at teardown.
    pub fn finish(&mut self) -> Result<(), Alarm> {
        if let Some(file) = self.file.as_mut() {
            file.flush().map_err(|error| Alarm::Peripheral {
                device: "paper tape punch",
                path: self.path.clone(),
                error,
            })?;
        }
        Ok(())
    }
}
