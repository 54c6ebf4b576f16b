//! Convenience re-exports for crates building on `base`.

pub use crate::instruction::Instruction;
pub use crate::types::{
    as_signed, as_word, join_aq, split_aq, Address, Word, ADDRESS_MASK, ADDRESS_MASK_16, BIT_19,
    MODULE_MASK, MODULE_SHIFT, SIGN_BIT, STORE_WORDS, WORD_MASK,
};
