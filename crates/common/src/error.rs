//! Decode errors for Quill program words.

use thiserror::Error;

/// Errors that occur while decoding program words and their operands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Opcode code is not part of the instruction set.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u16),

    /// Register index outside the register file.
    #[error("unknown register: {0}")]
    UnknownRegister(u16),

    /// READ argument code not recognized.
    #[error("unknown READ argument: {0}")]
    UnknownReadArgument(u16),

    /// Data feed bound code not recognized.
    #[error("unknown data feed bound: {0}")]
    UnknownFeedBound(u16),

    /// Program text could not be parsed as a word sequence.
    #[error("malformed program: {0}")]
    MalformedProgram(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unknown_opcode() {
        assert_eq!(DecodeError::UnknownOpcode(6).to_string(), "unknown opcode: 6");
    }

    #[test]
    fn display_unknown_register() {
        assert_eq!(
            DecodeError::UnknownRegister(42).to_string(),
            "unknown register: 42"
        );
    }

    #[test]
    fn display_malformed_program() {
        assert_eq!(
            DecodeError::MalformedProgram("expected `[`".into()).to_string(),
            "malformed program: expected `[`"
        );
    }
}
