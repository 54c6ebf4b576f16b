//! The paper tape reader.
//!
//! One byte per function-15 read.  The tape file is opened on first
//! demand; running off the end of the tape is the orderly "reader
//! stop" termination.  Any bytes still in the reader when the session
//! ends are spilled to the save file so that a following run finds the
//! tape where this one left it.

use std::fs::File;
use std::io;
use std::path::Path;

use crate::alarm::Alarm;
use crate::diag::{Diag, VERBOSE_REPORT};
use crate::io::dev_teletype::TtyOutput;
use crate::io::LazyInput;

pub struct Reader {
    source: LazyInput,
}

impl Reader {
    pub fn new(source: LazyInput) -> Reader {
        Reader { source }
    }

    pub fn read(&mut self, tty: &mut TtyOutput, diag: &mut Diag) -> Result<Option<u8>, Alarm> {
        match self.source.read_byte("paper tape reader", tty, diag)? {
            Some(ch) => {
                if diag.is(crate::diag::VERBOSE_TRANSFERS) {
                    tty.flush_line();
                    diag.trace_transfer(format_args!("Paper tape character {ch:3} read"));
                }
                Ok(Some(ch))
            }
            None => {
                tty.flush_line();
                if diag.is(VERBOSE_REPORT) {
                    diag.report(format_args!("Run off end of input tape"));
                }
                Ok(None)
            }
        }
    }

    /// Copy every unconsumed tape byte to the save file.  The save
    /// file is created even when the reader was never used, so that a
    /// following run always finds one.
    pub fn spill_residual(&mut self, save: &Path) -> Result<(), Alarm> {
        let failed = |error: io::Error| Alarm::Peripheral {
            device: "save",
            path: save.to_path_buf(),
            error,
        };
        let mut file = File::create(save).map_err(failed)?;
        if let Some(rest) = self.source.stream() {
            io::copy(rest, &mut file).map_err(failed)?;
        }
        file.sync_all().map_err(failed)?;
        Ok(())
    }
}
