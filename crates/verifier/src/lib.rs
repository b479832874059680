//! Quill verifier: static checks for word programs.
//!
//! The verifier checks a `Program` before it is loaded into the VM. It
//! collects ALL errors (not just the first) and returns them.
//!
//! # Usage
//!
//! ```
//! use quill_common::{Opcode, Program};
//! use quill_verifier::verify;
//!
//! let program = Program::builder()
//!     .function("double", Program::builder().wide(Opcode::Load, 0).imm(2).op(Opcode::Mul))
//!     .imm(21)
//!     .wide(Opcode::Mem, 0)
//!     .wide(Opcode::Call, "double")
//!     .build();
//!
//! assert!(verify(&program).is_ok());
//! ```
//!
//! # Passes
//!
//! 1. **Size**: program length against the word limit
//! 2. **Structural**: decoding, label balance, return cells, call targets
//! 3. **Operands**: slots, registers, READ arguments, skip and jump targets
//!
//! A clean result does not guarantee a clean run: values, stack depth and
//! gas are only known at runtime.

pub mod error;
pub mod limits;
pub mod structural;

pub use error::VerifyError;

use quill_common::Program;

/// Verify a program.
///
/// Returns `Ok(())` if the program passes all checks, or
/// `Err(Vec<VerifyError>)` with all errors found, in pass order.
pub fn verify(program: &Program) -> Result<(), Vec<VerifyError>> {
    let words = &program.words;
    let mut all_errors = Vec::new();

    all_errors.extend(limits::check_size(words));

    let (ctx, structural_errors) = structural::check_structural(words);
    all_errors.extend(structural_errors);

    // Operands decoded after a misaligned word may belong to anything.
    if !ctx.fatal {
        all_errors.extend(limits::check_operands(&ctx));
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_common::{Opcode, Word};

    #[test]
    fn empty_program() {
        assert!(verify(&Program::default()).is_ok());
    }

    #[test]
    fn arithmetic_valid() {
        let program = Program::builder().imm(5).imm(3).op(Opcode::Add).build();
        assert!(verify(&program).is_ok());
    }

    #[test]
    fn multiple_errors_collected() {
        let program = Program::builder()
            .wide(Opcode::Call, "f")
            .wide(Opcode::Reg, 99)
            .build();
        let errors = verify(&program).unwrap_err();
        assert_eq!(errors.len(), 2, "expected two errors, got: {errors:?}");
    }

    #[test]
    fn misaligned_program_skips_operand_pass() {
        let program = Program::new(vec![
            Word::Op(6),
            Word::imm(4096),
            Word::op(Opcode::Load),
            Word::imm(5000),
        ]);
        let errors = verify(&program).unwrap_err();
        assert_eq!(
            errors,
            vec![
                VerifyError::UnknownOpcode { at: 0, code: 6 },
                VerifyError::ExpectedOpcode { at: 1 },
            ]
        );
    }
}
