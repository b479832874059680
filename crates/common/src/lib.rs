//! Quill common types and program encoding.
//!
//! This crate provides the foundational data structures shared by the
//! interpreter and the verifier:
//!
//! - [`Opcode`]: the instruction set, with stable numeric codes
//! - [`Value`]: runtime values for the stack, slots and store
//! - [`Word`]: one program word (opcode, immediate, or return cell)
//! - [`Program`]: a word sequence, with a builder
//! - [`Register`] and [`ReadArgument`]: operand enumerations
//! - [`DecodeError`]: errors from decoding words and operands

pub mod error;
pub mod kind;
pub mod opcode;
pub mod program;
pub mod read_argument;
pub mod register;
pub mod value;
pub mod word;

// Re-export commonly used types at the crate root.
pub use error::DecodeError;
pub use kind::ValueKind;
pub use opcode::Opcode;
pub use program::{Program, ProgramBuilder};
pub use read_argument::{FeedBound, ReadArgument};
pub use register::{is_valid_address, Register, REGISTER_COUNT};
pub use value::Value;
pub use word::Word;
