//! Fatal machine conditions.
//!
//! An [`Alarm`] ends the session immediately: the store contents are
//! considered indeterminate, so the teardown path does not write the
//! image back (unlike an orderly stop).

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::PathBuf;

use base::prelude::*;

#[derive(Debug)]
pub enum Alarm {
    /// The sequence control register reached the end of the store.
    ScrOutOfBounds(u32),

    /// An effective address fell outside the 16K store.
    AddressOutOfBounds {
        instruction: Instruction,
        location: Address,
        address: u32,
    },

    /// A shift count in the unsupported range 2048..=6143.
    UnsupportedShift {
        instruction: Instruction,
        location: Address,
        places: u32,
    },

    /// A function 15 sub-address the machine does not implement.
    UnsupportedIo {
        instruction: Instruction,
        location: Address,
        code: u32,
    },

    /// Divisor of zero in function 13.
    DividedByZero {
        instruction: Instruction,
        location: Address,
    },

    /// The store image file exists but cannot be parsed.
    BadStoreImage { path: PathBuf, detail: String },

    /// A peripheral or state file could not be opened, read or written.
    Peripheral {
        device: &'static str,
        path: PathBuf,
        error: io::Error,
    },
}

impl Display for Alarm {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Alarm::ScrOutOfBounds(scr) => {
                write!(f, "sequence control register outside of available store ({scr})")
            }
            Alarm::AddressOutOfBounds {
                instruction,
                location,
                address,
            } => write!(
                f,
                "address outside of available store ({address}) in instruction {instruction} at {location}"
            ),
            Alarm::UnsupportedShift {
                instruction,
                location,
                places,
            } => write!(
                f,
                "unsupported shift of {places} places in instruction {instruction} at {location}"
            ),
            Alarm::UnsupportedIo {
                instruction,
                location,
                code,
            } => write!(
                f,
                "unsupported 15 i/o code {code} in instruction {instruction} at {location}"
            ),
            Alarm::DividedByZero {
                instruction,
                location,
            } => write!(f, "division by zero in instruction {instruction} at {location}"),
            Alarm::BadStoreImage { path, detail } => {
                write!(f, "store image {} is unusable: {detail}", path.display())
            }
            Alarm::Peripheral {
                device,
                path,
                error,
            } => write!(f, "{device} file {}: {error}", path.display()),
        }
    }
}

impl Error for Alarm {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Alarm::Peripheral { error, .. } => Some(error),
            _ => None,
        }
    }
}
