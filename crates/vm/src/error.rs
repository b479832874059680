//! Runtime errors for the Quill VM.
//!
//! Every error is terminal for the `run()` that raised it. Variants carry
//! the program offset (`at`) of the instruction that failed wherever one
//! exists.

use quill_common::Opcode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort execution.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum VmError {
    /// An opcode precondition rejected the current state. Nothing was
    /// charged and no effect was applied.
    #[error("[{opcode}] assertion failed at offset {at}: {reason}")]
    Assertion {
        at: usize,
        opcode: Opcode,
        reason: String,
    },

    /// A push would exceed the stack bound.
    #[error("stack overflow at offset {at}")]
    StackOverflow { at: usize },

    /// A pop on an empty stack.
    #[error("stack underflow at offset {at}")]
    StackUnderflow { at: usize },

    /// A wide opcode is the last word of the program.
    #[error("{opcode} at offset {at} expects an immediate")]
    MissingImmediate { at: usize, opcode: Opcode },

    /// The word at pc is not a known opcode code.
    #[error("unknown opcode {code} at offset {at}")]
    UnknownOpcode { at: usize, code: u16 },

    /// The word at pc is an operand or a return cell, not an opcode.
    #[error("expected an opcode at offset {at}")]
    ExpectedOpcode { at: usize },

    /// LABEL without a matching END_LABEL.
    #[error("label {label} at offset {at} has no matching END_LABEL")]
    UnmatchedLabel { at: usize, label: String },

    /// A second declaration of an already registered label.
    #[error("label {label} at offset {at} is already declared")]
    DuplicateLabel { at: usize, label: String },

    /// CALL or MAP to a label not registered yet.
    #[error("call to undeclared label {label} at offset {at}")]
    UndeclaredLabel { at: usize, label: String },

    /// CALL to a function that has not returned yet.
    #[error("re-entrant call to {label} at offset {at}")]
    ReentrantCall { at: usize, label: String },

    /// The return-address cell after END_LABEL holds neither the sentinel
    /// nor a return address.
    #[error("malformed return cell at offset {at}")]
    MalformedReturnCell { at: usize },

    /// The program size exceeds the configured limit.
    #[error("program has {words} words (limit {limit})")]
    ProgramTooLarge { words: usize, limit: usize },

    /// ABORT executed.
    #[error("program aborted: {reason}")]
    UserAbort { reason: String },

    /// A nested MAP machine failed. The inner error is reported verbatim.
    #[error(transparent)]
    Nested(Box<VmError>),

    /// The synchronous resolver could not answer a ledger read.
    #[error("read failed at offset {at}: {reason}")]
    Resolver { at: usize, reason: String },

    /// `write()` with no outstanding interruption.
    #[error("nothing to resume: no interruption is outstanding")]
    NothingToResume,

    /// `write()` twice for the same interruption.
    #[error("an input value is already pending")]
    InputPending,
}

/// Coarse classification of [`VmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Type mismatch, invalid register target, malformed address,
    /// insufficient stack arity.
    AssertionFailure,
    /// Overflow or underflow of the operand stack.
    StackFault,
    /// The program itself is malformed.
    ProgramFault,
    /// ABORT.
    UserAbort,
    /// Failures caused by something outside the instruction stream.
    HostFault,
}

impl VmError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::Assertion { .. } => ErrorKind::AssertionFailure,
            VmError::StackOverflow { .. } | VmError::StackUnderflow { .. } => {
                ErrorKind::StackFault
            }
            VmError::MissingImmediate { .. }
            | VmError::UnknownOpcode { .. }
            | VmError::ExpectedOpcode { .. }
            | VmError::UnmatchedLabel { .. }
            | VmError::DuplicateLabel { .. }
            | VmError::UndeclaredLabel { .. }
            | VmError::ReentrantCall { .. }
            | VmError::MalformedReturnCell { .. }
            | VmError::ProgramTooLarge { .. } => ErrorKind::ProgramFault,
            VmError::UserAbort { .. } => ErrorKind::UserAbort,
            VmError::Nested(_)
            | VmError::Resolver { .. }
            | VmError::NothingToResume
            | VmError::InputPending => ErrorKind::HostFault,
        }
    }

    /// The innermost error, looking through nested MAP machines.
    pub fn root(&self) -> &VmError {
        match self {
            VmError::Nested(inner) => inner.root(),
            other => other,
        }
    }
}

/// Error returned by a synchronous [`Resolver`](crate::Resolver).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ResolveError(pub String);

impl ResolveError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        assert_eq!(
            VmError::StackOverflow { at: 5 }.to_string(),
            "stack overflow at offset 5"
        );
        assert_eq!(
            VmError::Assertion {
                at: 2,
                opcode: Opcode::Add,
                reason: "operands must be two numbers".into()
            }
            .to_string(),
            "[ADD] assertion failed at offset 2: operands must be two numbers"
        );
        assert_eq!(
            VmError::MissingImmediate {
                at: 0,
                opcode: Opcode::Imm
            }
            .to_string(),
            "IMM at offset 0 expects an immediate"
        );
    }

    #[test]
    fn abort_reason_ends_message() {
        let err = VmError::UserAbort {
            reason: "insufficient funds".into(),
        };
        assert!(err.to_string().ends_with("insufficient funds"));
        assert_eq!(err.kind(), ErrorKind::UserAbort);
    }

    #[test]
    fn nested_errors_are_verbatim() {
        let inner = VmError::UserAbort {
            reason: "bad item".into(),
        };
        let outer = VmError::Nested(Box::new(VmError::Nested(Box::new(inner.clone()))));
        assert_eq!(outer.to_string(), inner.to_string());
        assert_eq!(outer.root(), &inner);
        assert_eq!(outer.kind(), ErrorKind::HostFault);
    }

    #[test]
    fn taxonomy() {
        assert_eq!(
            VmError::StackUnderflow { at: 0 }.kind(),
            ErrorKind::StackFault
        );
        assert_eq!(
            VmError::ReentrantCall {
                at: 0,
                label: "f".into()
            }
            .kind(),
            ErrorKind::ProgramFault
        );
        assert_eq!(VmError::NothingToResume.kind(), ErrorKind::HostFault);
    }

    #[test]
    fn serializes_for_hosts() {
        let err = VmError::UnknownOpcode { at: 3, code: 6 };
        let json = serde_json::to_string(&err).unwrap();
        let back: VmError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
