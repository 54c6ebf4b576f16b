//! 18-bit words and store addresses.
//!
//! A 903 word is 18 bits wide.  We keep words in a `u32` holding the
//! two's-complement bit pattern of a value in [-131072, 131071]; every
//! arithmetic result is masked back to 18 bits with [`WORD_MASK`].
//! Multiply, divide and shift treat the A and Q accumulators as one
//! 36-bit signed quantity, so the signed view widens to `i64` (see
//! [`as_signed`] and [`join_aq`]).
//!
//! Addresses are 14 bits on a 16K machine.  The operator-facing
//! notation for an address is `m^nnnn`: an 8K module number and an
//! offset within the module.  [`Address`] carries that notation in its
//! `Display` and `FromStr` implementations.

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

/// Mask reducing a value to an 18-bit word.
pub const WORD_MASK: u32 = 0o777777;

/// Sign bit of an 18-bit word.  In an instruction the same bit is the
/// B-modification flag.
pub const SIGN_BIT: u32 = 0o400000;

/// 2^18, subtracted to sign-extend a negative word.
pub const BIT_19: u32 = 0o1000000;

/// Mask reducing an effective address to 16 bits.
pub const ADDRESS_MASK_16: u32 = 0o177777;

/// The 13-bit address field of an instruction.
pub const ADDRESS_MASK: u32 = 8191;

/// Module bits of a store address (the bits above the address field).
pub const MODULE_MASK: u32 = 0o160000;

/// Shift distance from a word's address field to its function code,
/// and from an address to its module number.
pub const MODULE_SHIFT: u32 = 13;

/// Number of words in the store of a 16K machine.
pub const STORE_WORDS: usize = 16384;

/// An 18-bit word held as its two's-complement bit pattern.
pub type Word = u32;

/// The signed value of an 18-bit word.
pub fn as_signed(w: Word) -> i32 {
    if w >= SIGN_BIT {
        w as i32 - BIT_19 as i32
    } else {
        w as i32
    }
}

/// Reduce a signed value to the 18-bit pattern that represents it.
pub fn as_word(v: i64) -> Word {
    (v & WORD_MASK as i64) as Word
}

/// The 36-bit signed value of the combined A:Q accumulator.
pub fn join_aq(a: Word, q: Word) -> i64 {
    ((as_signed(a) as i64) << 18) | q as i64
}

/// Split a 36-bit value back into its A (high) and Q (low) halves.
pub fn split_aq(aq: i64) -> (Word, Word) {
    (as_word(aq >> 18), as_word(aq))
}

/// A store address in the operator's `m^nnnn` module notation.
///
/// The wrapped value is not constrained to the store size: effective
/// addresses are formed modulo 2^16 and only checked against the store
/// bounds when they are used, so `Address` must be able to carry any
/// 16-bit value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u32);

impl Address {
    pub const fn new(a: u32) -> Address {
        Address(a)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// The 8K module this address falls in.
    pub fn module(&self) -> u32 {
        (self.0 >> MODULE_SHIFT) & 7
    }

    /// The offset of this address within its module.
    pub fn offset(&self) -> u32 {
        self.0 & ADDRESS_MASK
    }
}

impl From<u32> for Address {
    fn from(a: u32) -> Address {
        Address(a)
    }
}

impl From<Address> for u32 {
    fn from(a: Address) -> u32 {
        a.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}^{:04}", self.module(), self.offset())
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{} ({})", self, self.0)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct BadAddress(String);

impl Display for BadAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "malformed address '{}'", self.0)
    }
}

impl std::error::Error for BadAddress {}

impl FromStr for Address {
    type Err = BadAddress;

    /// Accepts a plain decimal address or the `m^n` module form,
    /// meaning `m * 8192 + n`.
    fn from_str(s: &str) -> Result<Address, BadAddress> {
        let mut module: u32 = 0;
        let mut address: u32 = 0;
        if s.is_empty() {
            return Err(BadAddress(s.to_string()));
        }
        for ch in s.chars() {
            if let Some(d) = ch.to_digit(10) {
                address = address
                    .checked_mul(10)
                    .and_then(|a| a.checked_add(d))
                    .ok_or_else(|| BadAddress(s.to_string()))?;
            } else if ch == '^' {
                module = module
                    .checked_add(address)
                    .and_then(|m| m.checked_mul(8192))
                    .ok_or_else(|| BadAddress(s.to_string()))?;
                address = 0;
            } else {
                return Err(BadAddress(s.to_string()));
            }
        }
        module
            .checked_add(address)
            .map(Address)
            .ok_or_else(|| BadAddress(s.to_string()))
    }
}
