//! The 16K core store and its persistence.
//!
//! Core retains its contents between runs of a real machine, so the
//! store is the emulator's durable state: at session start an image
//! file (decimal words, whitespace separated) overlays a cleared
//! store, and at orderly termination the current contents are written
//! back.  The write goes to a fresh file which replaces the previous
//! image only once complete, so an interrupted run cannot corrupt it.
//!
//! The top twelve words (8180..8191) hold the initial orders, the
//! bootstrap that reads a self-unpacking tape.  They are reinstalled
//! over the image at every session start and are write-protected while
//! the machine runs at priority level 1; level 4 may overwrite them.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::{event, Level};

use base::prelude::*;

use crate::alarm::Alarm;
use crate::diag::Diag;

/// First word of the initial-orders block.
pub const INITIAL_ORDERS_FIRST: u32 = 8180;

/// Last word of the initial-orders block.
pub const INITIAL_ORDERS_LAST: u32 = 8191;

/// The initial orders: a reader loop that assembles tape bytes into
/// words, seven bits at a time, and stores them relative to 8180 via
/// the B register until the word count in B runs out.
const INITIAL_ORDERS: [Instruction; 11] = [
    Instruction::from_parts(0, 0, 8180),
    Instruction::from_parts(0, 4, 8189),
    Instruction::from_parts(0, 15, 2048),
    Instruction::from_parts(0, 9, 8186),
    Instruction::from_parts(0, 8, 8183),
    Instruction::from_parts(0, 15, 2048),
    Instruction::from_parts(1, 5, 8180),
    Instruction::from_parts(0, 10, 1),
    Instruction::from_parts(0, 4, 1),
    Instruction::from_parts(0, 9, 8182),
    Instruction::from_parts(0, 8, 8177),
];

pub struct Store {
    words: Vec<Word>,
    valid: bool,
}

impl Store {
    /// A store with every word zero, not yet eligible for write-back.
    pub fn cleared() -> Store {
        Store {
            words: vec![0; STORE_WORDS],
            valid: false,
        }
    }

    /// Read a store image, or return a cleared store when no image
    /// file exists.  The returned store is flagged valid so that an
    /// orderly exit writes it back.
    pub fn load_or_clear(path: &Path, diag: &mut Diag) -> Result<Store, Alarm> {
        let mut store = Store::cleared();
        store.valid = true;
        diag.report(format_args!("Store ({STORE_WORDS} words) cleared"));
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                diag.report(format_args!(
                    "No {} file found, store left empty",
                    path.display()
                ));
                return Ok(store);
            }
            Err(error) => {
                return Err(Alarm::Peripheral {
                    device: "store image",
                    path: path.to_path_buf(),
                    error,
                })
            }
        };
        // A six-digit negative value fills its seven-column field
        // completely and runs into the field before it, so numbers
        // are scanned greedily rather than split on whitespace alone.
        let mut count = 0usize;
        let mut rest = text.as_str();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            let bytes = rest.as_bytes();
            let mut len = usize::from(bytes[0] == b'-' || bytes[0] == b'+');
            while len < bytes.len() && bytes[len].is_ascii_digit() {
                len += 1;
            }
            let value: i64 = rest[..len].parse().map_err(|_| Alarm::BadStoreImage {
                path: path.to_path_buf(),
                detail: format!(
                    "format error at '{}'",
                    rest.chars().take(12).collect::<String>()
                ),
            })?;
            if count >= STORE_WORDS {
                return Err(Alarm::BadStoreImage {
                    path: path.to_path_buf(),
                    detail: format!("exceeds store capacity ({STORE_WORDS})"),
                });
            }
            store.words[count] = as_word(value);
            count += 1;
            rest = &rest[len..];
        }
        event!(Level::DEBUG, "store image provided {} words", count);
        diag.report(format_args!("{} words read in from {}", count, path.display()));
        Ok(store)
    }

    /// Overwrite 8180..8191 with the bootstrap.
    pub fn install_initial_orders(&mut self, diag: &mut Diag) {
        self.words[INITIAL_ORDERS_FIRST as usize] = as_word(-3);
        for (i, order) in INITIAL_ORDERS.iter().enumerate() {
            self.words[INITIAL_ORDERS_FIRST as usize + 1 + i] = order.bits();
        }
        diag.report(format_args!("Initial orders loaded"));
    }

    /// Write the image back: seven-column signed decimal words, ten
    /// per line.  The data goes to a scratch file first and replaces
    /// the previous image only when completely written.
    pub fn persist(&self, path: &Path, diag: &mut Diag) -> Result<(), Alarm> {
        let failed = |error: io::Error| Alarm::Peripheral {
            device: "store dump",
            path: path.to_path_buf(),
            error,
        };
        let mut scratch_name = path
            .file_name()
            .unwrap_or_else(|| "store".as_ref())
            .to_os_string();
        scratch_name.push(".tmp");
        let scratch = path.with_file_name(scratch_name);
        let mut w = BufWriter::new(File::create(&scratch).map_err(failed)?);
        for (i, word) in self.words.iter().enumerate() {
            write!(w, "{:7}", as_signed(*word)).map_err(failed)?;
            if i % 10 == 9 {
                writeln!(w).map_err(failed)?;
            }
        }
        writeln!(w).map_err(failed)?;
        w.into_inner()
            .map_err(|e| failed(e.into_error()))?
            .sync_all()
            .map_err(failed)?;
        fs::rename(&scratch, path).map_err(failed)?;
        diag.report(format_args!(
            "{} words written out to {}",
            STORE_WORDS,
            path.display()
        ));
        Ok(())
    }

    /// True once an image has been loaded (or found absent); only a
    /// valid store is written back at exit.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// A word at a computed address, `None` outside the store.
    pub fn get(&self, addr: u32) -> Option<Word> {
        self.words.get(addr as usize).copied()
    }

    /// Replace a word at a computed address; `false` outside the store.
    pub fn set(&mut self, addr: u32, w: Word) -> bool {
        match self.words.get_mut(addr as usize) {
            Some(cell) => {
                *cell = w;
                true
            }
            None => false,
        }
    }

    /// A word at an address already known to be in bounds (the SCR and
    /// B cells, and fetch addresses the session has checked).
    pub fn cell(&self, addr: u32) -> Word {
        self.words[addr as usize]
    }

    pub fn set_cell(&mut self, addr: u32, w: Word) {
        self.words[addr as usize] = w;
    }
}
