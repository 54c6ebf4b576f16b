//! The peripherals reached through function 15.
//!
//! Four devices hang off the machine: the paper tape reader and punch,
//! the teletype (input file plus host stdout), and the incremental
//! plotter.  All are synchronous: a transfer completes within the
//! instruction that requests it.  Input files are opened on first
//! demand so that a program which never touches a device does not
//! require its file to exist.
//!
//! The sixth function-15 sub-address, level terminate, is not a device
//! at all; the function unit handles it directly.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::PathBuf;

use tracing::{event, Level};

use base::prelude::*;

use crate::alarm::Alarm;
use crate::diag::{Diag, VERBOSE_REPORT};

mod dev_plotter;
mod dev_punch;
mod dev_reader;
mod dev_teletype;

pub use dev_plotter::{Plotter, DEFAULT_PAPER_HEIGHT, DEFAULT_PAPER_WIDTH, DEFAULT_PEN_SIZE};
pub use dev_punch::{Punch, PunchResult};
pub use dev_reader::Reader;
pub use dev_teletype::{TtyInput, TtyOutput, TtyRead};

/// One reel of paper tape: 1000 feet at 10 characters per inch.  Both
/// the punch and teletype input stop after a reel's worth of
/// transfers.
pub const REEL: u64 = 10 * 12 * 1000;

/// Function-15 sub-addresses (the low thirteen bits of the effective
/// address).
pub const IO_READER: u32 = 2048;
pub const IO_TTY_IN: u32 = 2052;
pub const IO_PLOTTER: u32 = 4864;
pub const IO_PUNCH: u32 = 6144;
pub const IO_TTY_OUT: u32 = 6148;
pub const IO_LEVEL_TERMINATE: u32 = 7168;

/// A byte-stream input opened on first use.  The open stream survives
/// until teardown so residual bytes can be recovered.
pub enum LazyInput {
    Unopened(PathBuf),
    Open { path: PathBuf, stream: Box<dyn Read> },
}

impl LazyInput {
    pub fn from_file(path: PathBuf) -> LazyInput {
        LazyInput::Unopened(path)
    }

    /// An in-memory tape, used by tests and embedders.
    pub fn from_bytes(bytes: Vec<u8>) -> LazyInput {
        LazyInput::Open {
            path: PathBuf::new(),
            stream: Box::new(Cursor::new(bytes)),
        }
    }

    /// Read one byte; `None` at end of input.
    pub fn read_byte(
        &mut self,
        device: &'static str,
        tty: &mut TtyOutput,
        diag: &mut Diag,
    ) -> Result<Option<u8>, Alarm> {
        if let LazyInput::Unopened(path) = self {
            let path = std::mem::take(path);
            let file = File::open(&path).map_err(|error| {
                tty.flush_line();
                Alarm::Peripheral {
                    device,
                    path: path.clone(),
                    error,
                }
            })?;
            event!(Level::DEBUG, "opened {device} file {}", path.display());
            if diag.is(VERBOSE_REPORT) {
                tty.flush_line();
                diag.report(format_args!("{device} file {} opened", path.display()));
            }
            *self = LazyInput::Open {
                path,
                stream: Box::new(BufReader::new(file)),
            };
        }
        let LazyInput::Open { path, stream } = self else {
            unreachable!("input was just opened");
        };
        let mut byte = [0u8; 1];
        loop {
            match stream.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    return Err(Alarm::Peripheral {
                        device,
                        path: path.clone(),
                        error,
                    })
                }
            }
        }
    }

    /// The open stream, if the device was ever used.
    pub fn stream(&mut self) -> Option<&mut dyn Read> {
        match self {
            LazyInput::Unopened(_) => None,
            LazyInput::Open { stream, .. } => Some(stream.as_mut()),
        }
    }
}

/// Everything hanging off the machine, owned for the session.
pub struct Peripherals {
    pub reader: Reader,
    pub punch: Punch,
    pub tty_in: TtyInput,
    pub tty_out: TtyOutput,
    pub plotter: Plotter,
}

impl Peripherals {
    pub fn read_tape(&mut self, diag: &mut Diag) -> Result<Option<u8>, Alarm> {
        self.reader.read(&mut self.tty_out, diag)
    }

    pub fn read_tty(&mut self, diag: &mut Diag) -> Result<TtyRead, Alarm> {
        self.tty_in.read(&mut self.tty_out, diag)
    }

    pub fn punch_byte(&mut self, ch: u8, diag: &mut Diag) -> Result<PunchResult, Alarm> {
        self.punch.punch(ch, &mut self.tty_out, diag)
    }

    pub fn write_tty(&mut self, ch: Word, diag: &mut Diag) {
        self.tty_out.write(ch, diag);
    }

    pub fn plot(&mut self, a: Word, diag: &mut Diag) {
        self.plotter.command(a, diag);
    }

    pub fn flush_tty(&mut self) {
        self.tty_out.flush_line();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// A cloneable sink capturing everything written to it, standing
    /// in for the host terminal in tests.
    #[derive(Clone, Default)]
    pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
