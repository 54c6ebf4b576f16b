//! The incremental flat-bed plotter.
//!
//! A plotter command is the low six bits of A: one step east, west,
//! north or south, pen up, pen down.  East/west movement stops hard at
//! the paper edges; north/south movement is unconstrained and drawing
//! is clipped to the paper instead.  While the pen is down each step
//! blackens a square of side `2 * pen_size + 1` around the head.
//!
//! The paper is a 3-byte-per-pixel RGB raster allocated on the first
//! command and encoded as a PNG at teardown.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;

use tracing::{event, Level};

use base::prelude::*;

use crate::alarm::Alarm;
use crate::diag::Diag;

pub const DEFAULT_PAPER_WIDTH: u32 = 3600;
pub const DEFAULT_PAPER_HEIGHT: u32 = 3600;
pub const DEFAULT_PEN_SIZE: u32 = 3;

pub const STEP_EAST: Word = 1;
pub const STEP_WEST: Word = 2;
pub const STEP_NORTH: Word = 4;
pub const STEP_SOUTH: Word = 8;
pub const PEN_UP: Word = 16;
pub const PEN_DOWN: Word = 32;

pub struct Plotter {
    path: PathBuf,
    width: i32,
    height: i32,
    pen_size: i32,
    paper: Option<Vec<u8>>,
    x: i32,
    y: i32,
    pen_down: bool,
}

impl Plotter {
    pub fn new(path: PathBuf, width: u32, height: u32, pen_size: u32) -> Plotter {
        Plotter {
            path,
            width: width as i32,
            height: height as i32,
            pen_size: (pen_size as i32).max(1),
            paper: None,
            x: 0,
            y: 0,
            pen_down: false,
        }
    }

    /// Apply one command word.
    pub fn command(&mut self, a: Word, diag: &mut Diag) {
        if self.paper.is_none() {
            self.set_up(diag);
        }
        let bits = a & 63;
        if diag.is(crate::diag::VERBOSE_TRANSFERS) {
            diag.note(format_args!("Plotter code {bits:o} output"));
        }
        if bits & STEP_EAST != 0 && self.x < self.width {
            self.x += 1;
        }
        if bits & STEP_WEST != 0 && self.x > 0 {
            self.x -= 1;
        }
        if bits & STEP_NORTH != 0 {
            self.y -= 1;
        }
        if bits & STEP_SOUTH != 0 {
            self.y += 1;
        }
        if bits & PEN_UP != 0 {
            self.pen_down = false;
        }
        if bits & PEN_DOWN != 0 {
            self.pen_down = true;
        }
        if self.pen_down {
            self.blacken();
        }
    }

    fn set_up(&mut self, diag: &mut Diag) {
        self.paper = Some(vec![0xFF; 3 * self.width as usize * self.height as usize]);
        self.x = 1500;
        self.y = self.height - 200;
        self.pen_down = false;
        diag.report(format_args!(
            "Starting plotting. Plotter pen size {}",
            self.pen_size
        ));
    }

    fn blacken(&mut self) {
        let Some(paper) = self.paper.as_mut() else {
            return;
        };
        for x in self.x - self.pen_size..=self.x + self.pen_size {
            for y in self.y - self.pen_size..=self.y + self.pen_size {
                if x >= 0 && x < self.width && y >= 0 && y < self.height {
                    let offset = 3 * (y as usize * self.width as usize + x as usize);
                    paper[offset..offset + 3].fill(0);
                }
            }
        }
    }

    /// True when at least one command has been issued.
    pub fn is_used(&self) -> bool {
        self.paper.is_some()
    }

    /// Encode the paper as an 8-bit RGB PNG.
    pub fn save(&self, diag: &mut Diag) -> Result<(), Alarm> {
        let Some(paper) = self.paper.as_ref() else {
            return Ok(());
        };
        let failed = |error: io::Error| Alarm::Peripheral {
            device: "plotter output",
            path: self.path.clone(),
            error,
        };
        let png_failed = |e: png::EncodingError| match e {
            png::EncodingError::IoError(error) => failed(error),
            other => failed(io::Error::new(io::ErrorKind::Other, other.to_string())),
        };
        let file = File::create(&self.path).map_err(failed)?;
        let mut encoder = png::Encoder::new(
            BufWriter::new(file),
            self.width as u32,
            self.height as u32,
        );
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .add_text_chunk("Title".to_string(), "Elliott 903 Plotter Output".to_string())
            .map_err(png_failed)?;
        let mut writer = encoder.write_header().map_err(png_failed)?;
        writer.write_image_data(paper).map_err(png_failed)?;
        writer.finish().map_err(png_failed)?;
        event!(Level::DEBUG, "plot written to {}", self.path.display());
        diag.report(format_args!("Plotter output saved to {}", self.path.display()));
        Ok(())
    }
}
