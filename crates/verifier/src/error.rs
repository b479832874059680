//! Verification errors for the Quill verifier.
//!
//! Every error carries the word offset (`at`) it was found at, except the
//! program-wide size check. The verifier collects all errors, not just the
//! first.

use quill_common::{Opcode, Register};
use thiserror::Error;

/// Errors found during static verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    // --- Decoding ---
    /// A word in opcode position carries an unassigned code.
    #[error("unknown opcode {code} at offset {at}")]
    UnknownOpcode { at: usize, code: u16 },

    /// An operand or return cell sits where an opcode is expected.
    #[error("expected an opcode at offset {at}")]
    ExpectedOpcode { at: usize },

    /// A wide opcode is the last word of the program.
    #[error("{opcode} at offset {at} expects an immediate")]
    MissingImmediate { at: usize, opcode: Opcode },

    /// A wide opcode's operand is not an immediate value.
    #[error("{opcode} at offset {at} has a non-immediate operand")]
    InvalidOperand { at: usize, opcode: Opcode },

    // --- Labels ---
    /// LABEL operand is not a label id.
    #[error("LABEL at offset {at} has no usable label id")]
    InvalidLabel { at: usize },

    /// LABEL without a matching END_LABEL.
    #[error("unmatched LABEL {label:?} at offset {at}")]
    UnmatchedLabel { at: usize, label: String },

    /// END_LABEL outside any function body.
    #[error("unmatched END_LABEL at offset {at}")]
    UnmatchedEndLabel { at: usize },

    /// The word after END_LABEL is not the sentinel.
    #[error("return cell at offset {at} must hold the sentinel")]
    MalformedReturnCell { at: usize },

    /// The same label id is declared twice.
    #[error("label {label:?} declared again at offset {at}")]
    DuplicateLabel { at: usize, label: String },

    /// CALL or MAP names a label not declared before it.
    #[error("label {label:?} used at offset {at} before any declaration")]
    UndeclaredLabel { at: usize, label: String },

    /// CALL or MAP inside the body of the function it names.
    #[error("label {label:?} is entered from its own body at offset {at}")]
    RecursiveCall { at: usize, label: String },

    // --- Operands ---
    /// LOAD/MEM operand is not a slot index in range.
    #[error("{opcode} at offset {at} names an invalid slot")]
    InvalidSlot { at: usize, opcode: Opcode },

    /// REG/UNREG/INC operand is not a register.
    #[error("{opcode} at offset {at} names an invalid register")]
    InvalidRegister { at: usize, opcode: Opcode },

    /// REG/INC target a read-only register.
    #[error("{opcode} at offset {at} writes read-only register {}", register.name())]
    ReadOnlyRegister {
        at: usize,
        opcode: Opcode,
        register: Register,
    },

    /// READ operand is not a READ argument.
    #[error("READ at offset {at} has an unknown argument")]
    InvalidReadArgument { at: usize },

    /// Relative skip that is not an integer or lands outside the program.
    #[error("{opcode} at offset {at} skips outside the program")]
    InvalidSkip { at: usize, opcode: Opcode },

    /// IJMP target is not a program offset.
    #[error("IJMP at offset {at} has no usable target")]
    InvalidJump { at: usize },

    /// PACK count is not a non-negative integer.
    #[error("PACK at offset {at} has no usable count")]
    InvalidCount { at: usize },

    // --- Limits ---
    /// Program exceeds the maximum size.
    #[error("program too large: {words} words (max {limit})")]
    ProgramTooLarge { words: usize, limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_display() {
        let errors: Vec<VerifyError> = vec![
            VerifyError::UnknownOpcode { at: 0, code: 6 },
            VerifyError::ExpectedOpcode { at: 0 },
            VerifyError::MissingImmediate {
                at: 0,
                opcode: Opcode::Imm,
            },
            VerifyError::InvalidOperand {
                at: 0,
                opcode: Opcode::Imm,
            },
            VerifyError::InvalidLabel { at: 0 },
            VerifyError::UnmatchedLabel {
                at: 0,
                label: "f".into(),
            },
            VerifyError::UnmatchedEndLabel { at: 0 },
            VerifyError::MalformedReturnCell { at: 1 },
            VerifyError::DuplicateLabel {
                at: 0,
                label: "f".into(),
            },
            VerifyError::UndeclaredLabel {
                at: 0,
                label: "f".into(),
            },
            VerifyError::RecursiveCall {
                at: 0,
                label: "f".into(),
            },
            VerifyError::InvalidSlot {
                at: 0,
                opcode: Opcode::Load,
            },
            VerifyError::InvalidRegister {
                at: 0,
                opcode: Opcode::Reg,
            },
            VerifyError::ReadOnlyRegister {
                at: 0,
                opcode: Opcode::Reg,
                register: Register::Mci,
            },
            VerifyError::InvalidReadArgument { at: 0 },
            VerifyError::InvalidSkip {
                at: 0,
                opcode: Opcode::Skip,
            },
            VerifyError::InvalidJump { at: 0 },
            VerifyError::InvalidCount { at: 0 },
            VerifyError::ProgramTooLarge {
                words: 70_000,
                limit: 65_536,
            },
        ];

        for error in &errors {
            let display = error.to_string();
            assert!(!display.is_empty(), "empty display for {error:?}");
        }
        assert_eq!(errors.len(), 19);
    }

    #[test]
    fn read_only_message_names_register() {
        let err = VerifyError::ReadOnlyRegister {
            at: 4,
            opcode: Opcode::Inc,
            register: Register::Timestamp,
        };
        assert!(err.to_string().contains(Register::Timestamp.name()));
    }
}
