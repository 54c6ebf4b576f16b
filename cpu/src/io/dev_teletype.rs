//! The teletype: input from a byte file, output to the host terminal.
//!
//! Output filters to the characters the Westrex printer could produce:
//! linefeed and the printable range 32..122.  Anything else is dropped
//! (with a transfer trace when asked for).  The printer tracks the last
//! byte it emitted so that diagnostic output and termination can first
//! complete a half-printed line; input is echoed locally without
//! affecting that tracking, as the real loop-back echo would not.

use std::io::{self, Write};

use tracing::{event, Level};

use base::prelude::*;

use crate::alarm::Alarm;
use crate::diag::{Diag, VERBOSE_REPORT, VERBOSE_TRANSFERS};
use crate::io::{LazyInput, REEL};

pub struct TtyOutput {
    sink: Box<dyn Write>,
    last: Option<u8>,
}

impl TtyOutput {
    pub fn to_stdout() -> TtyOutput {
        TtyOutput::to_writer(Box::new(io::stdout()))
    }

    pub fn to_writer(sink: Box<dyn Write>) -> TtyOutput {
        TtyOutput { sink, last: None }
    }

    /// Emit one character, low seven bits.  Unprintable values are
    /// dropped.
    pub fn write(&mut self, ch: Word, diag: &mut Diag) {
        let ch = (ch & 127) as u8;
        let printable = ch == b'\n' || (32..=122).contains(&ch);
        if diag.is(VERBOSE_TRANSFERS) {
            self.flush_line();
            if printable {
                diag.trace_transfer(format_args!(
                    "Character {ch} output to teletype ({})",
                    ch as char
                ));
            } else {
                diag.trace_transfer(format_args!("Character {ch} output to teletype - ignored"));
            }
        }
        if printable {
            self.emit(ch);
            self.last = Some(ch);
        }
    }

    /// Local echo of an input character; does not count as printer
    /// output.
    pub fn echo(&mut self, ch: u8) {
        self.emit(ch & 127);
    }

    /// Complete a half-printed line before other output interleaves.
    pub fn flush_line(&mut self) {
        if let Some(last) = self.last.take() {
            if last != b'\n' {
                self.emit(b'\n');
            }
        }
    }

    fn emit(&mut self, ch: u8) {
        if let Err(error) = self.sink.write_all(&[ch]).and_then(|()| self.sink.flush()) {
            event!(Level::ERROR, "teletype output failed: {error}");
        }
    }
}

/// Outcome of a teletype read.
pub enum TtyRead {
    Byte(u8),
    /// End of the input file: orderly "tty stop" termination.
    Exhausted,
    /// The one-reel transfer cap was hit.
    Capped,
}

pub struct TtyInput {
    source: LazyInput,
    reads: u64,
}

impl TtyInput {
    pub fn new(source: LazyInput) -> TtyInput {
        TtyInput { source, reads: 0 }
    }

    pub fn read(&mut self, out: &mut TtyOutput, diag: &mut Diag) -> Result<TtyRead, Alarm> {
        if self.reads >= REEL {
            out.flush_line();
            diag.note(format_args!("Excessive input from teletype"));
            return Ok(TtyRead::Capped);
        }
        self.reads += 1;
        match self.source.read_byte("teletype input", out, diag)? {
            Some(ch) => {
                if diag.is(VERBOSE_TRANSFERS) {
                    out.flush_line();
                    diag.trace_transfer(format_args!("Read character {ch} from teletype"));
                }
                out.echo(ch);
                Ok(TtyRead::Byte(ch))
            }
            None => {
                if diag.is(VERBOSE_REPORT) {
                    out.flush_line();
                    diag.report(format_args!("Run off end of teleprinter input"));
                }
                Ok(TtyRead::Exhausted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tests::SharedBuffer;

    #[test]
    fn output_filters_to_printable_and_linefeed() {
        let buffer = SharedBuffer::default();
        let mut out = TtyOutput::to_writer(Box::new(buffer.clone()));
        let mut diag = Diag::to_stderr(0);
        out.write(b'A' as Word, &mut diag);
        out.write(7, &mut diag); // bell: dropped
        out.write(b'\n' as Word, &mut diag);
        out.write(131, &mut diag); // 131 & 127 = 3: dropped
        out.write((b'z' as Word) + 128, &mut diag); // low seven bits used
        assert_eq!(buffer.contents(), b"A\nz");
    }

    #[test]
    fn flush_line_completes_partial_lines_only() {
        let buffer = SharedBuffer::default();
        let mut out = TtyOutput::to_writer(Box::new(buffer.clone()));
        let mut diag = Diag::to_stderr(0);
        out.flush_line(); // nothing printed yet
        out.write(b'X' as Word, &mut diag);
        out.flush_line();
        out.flush_line(); // already complete
        assert_eq!(buffer.contents(), b"X\n");
        out.write(b'\n' as Word, &mut diag);
        out.flush_line(); // line already ends in linefeed
        assert_eq!(buffer.contents(), b"X\n\n");
    }

    #[test]
    fn input_echoes_and_reports_exhaustion() {
        let buffer = SharedBuffer::default();
        let mut out = TtyOutput::to_writer(Box::new(buffer.clone()));
        let mut diag = Diag::to_stderr(0);
        let mut tty = TtyInput::new(LazyInput::from_bytes(vec![b'h', b'i']));
        assert!(matches!(tty.read(&mut out, &mut diag), Ok(TtyRead::Byte(b'h'))));
        assert!(matches!(tty.read(&mut out, &mut diag), Ok(TtyRead::Byte(b'i'))));
        assert!(matches!(tty.read(&mut out, &mut diag), Ok(TtyRead::Exhausted)));
        assert_eq!(buffer.contents(), b"hi");
    }
}
