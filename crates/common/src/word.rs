//! Program words.
//!
//! A program is a flat sequence of words. A word is either an opcode code,
//! an immediate operand, or a return-address cell written at runtime by
//! CALL into the reserved slot after a function's END_LABEL.

use serde::{Deserialize, Serialize};

use crate::opcode::Opcode;
use crate::value::Value;

/// A single program word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Word {
    /// Opcode code. Code 0 is the sentinel.
    Op(u16),
    /// Immediate operand of the preceding wide opcode. Already typed.
    Imm(Value),
    /// Return address stored by CALL: the offset of that CALL.
    Ret(usize),
}

impl Word {
    /// The sentinel word: terminates execution when fetched as an
    /// instruction and marks an idle return-address cell.
    pub const SENTINEL: Word = Word::Op(0);

    /// Opcode word.
    pub fn op(opcode: Opcode) -> Self {
        Word::Op(opcode.code())
    }

    /// Immediate word.
    pub fn imm(value: impl Into<Value>) -> Self {
        Word::Imm(value.into())
    }

    /// Returns true for the sentinel word.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Word::Op(0))
    }

    /// The immediate payload, if this is an immediate.
    pub fn as_imm(&self) -> Option<&Value> {
        match self {
            Word::Imm(v) => Some(v),
            _ => None,
        }
    }

    /// Immediate interpreted as a non-negative index (slot, register, offset).
    pub fn as_index(&self) -> Option<usize> {
        self.as_imm().and_then(Value::as_index)
    }

    /// Immediate interpreted as a label identifier.
    pub fn as_label(&self) -> Option<String> {
        self.as_imm().and_then(Value::as_key)
    }
}

impl From<Opcode> for Word {
    fn from(opcode: Opcode) -> Self {
        Word::op(opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_word() {
        assert!(Word::SENTINEL.is_sentinel());
        assert_eq!(Word::op(Opcode::Nop), Word::SENTINEL);
        assert!(!Word::op(Opcode::Add).is_sentinel());
        assert!(!Word::imm(0).is_sentinel());
    }

    #[test]
    fn immediate_accessors() {
        assert_eq!(Word::imm(4).as_index(), Some(4));
        assert_eq!(Word::imm("f").as_label().as_deref(), Some("f"));
        assert_eq!(Word::imm(2).as_label().as_deref(), Some("2"));
        assert_eq!(Word::op(Opcode::Imm).as_imm(), None);
        assert_eq!(Word::Ret(7).as_index(), None);
    }

    #[test]
    fn serde_shape() {
        let words = vec![Word::op(Opcode::Imm), Word::imm(5), Word::Ret(3)];
        let json = serde_json::to_string(&words).unwrap();
        assert_eq!(json, r#"[{"op":27},{"imm":{"number":5.0}},{"ret":3}]"#);
        let back: Vec<Word> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, words);
    }
}
