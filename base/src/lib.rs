//! Bit-level vocabulary of the Elliott 903 / 920B.
//!
//! The 903 is an 18-bit, word-addressed machine.  This crate holds the
//! definitions everything else in the emulator builds on: the 18-bit
//! word helpers, the `Address` type with its `m^nnnn` module notation,
//! and the `Instruction` type describing the single 903 instruction
//! format (B-modification bit, 4-bit function code, 13-bit address).
#![crate_name = "base"]

pub mod instruction;
pub mod prelude;
pub mod types;
