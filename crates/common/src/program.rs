//! Program representation for Quill word streams.
//!
//! A program is a flat sequence of [`Word`]s. The serialized form is a
//! JSON array of words, for example `[{"op":27},{"imm":{"number":1.0}}]`.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::opcode::Opcode;
use crate::value::Value;
use crate::word::Word;

/// A Quill program: a sequence of words.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Program {
    /// The word stream.
    pub words: Vec<Word>,
}

impl Program {
    /// Create a new program from a vector of words.
    pub fn new(words: Vec<Word>) -> Self {
        Self { words }
    }

    /// Parse a program from its JSON form.
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(text).map_err(|e| DecodeError::MalformedProgram(e.to_string()))
    }

    /// Render the program as compact JSON.
    pub fn to_json(&self) -> String {
        // A word sequence always serializes; non-finite numbers become null.
        serde_json::to_string(&self.words).unwrap_or_default()
    }

    /// Number of words in the program.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Returns true if the program has no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Start building a program.
    pub fn builder() -> ProgramBuilder {
        ProgramBuilder::default()
    }
}

impl From<Vec<Word>> for Program {
    fn from(words: Vec<Word>) -> Self {
        Program::new(words)
    }
}

/// Incremental program construction.
///
/// Keeps the word layout rules in one place: wide opcodes take exactly one
/// immediate, and every function body ends with `END_LABEL` followed by a
/// sentinel return-address cell.
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    words: Vec<Word>,
}

impl ProgramBuilder {
    /// Append a narrow opcode.
    pub fn op(mut self, opcode: Opcode) -> Self {
        self.words.push(Word::op(opcode));
        self
    }

    /// Append a wide opcode and its immediate.
    pub fn wide(mut self, opcode: Opcode, imm: impl Into<Value>) -> Self {
        self.words.push(Word::op(opcode));
        self.words.push(Word::imm(imm));
        self
    }

    /// Shorthand for `IMM value`.
    pub fn imm(self, value: impl Into<Value>) -> Self {
        self.wide(Opcode::Imm, value)
    }

    /// Append a function declaration: `LABEL name; body; END_LABEL; <cell>`.
    pub fn function(mut self, name: &str, body: ProgramBuilder) -> Self {
        self.words.push(Word::op(Opcode::Label));
        self.words.push(Word::imm(name));
        self.words.extend(body.words);
        self.words.push(Word::op(Opcode::EndLabel));
        self.words.push(Word::SENTINEL);
        self
    }

    /// Append a raw word.
    pub fn word(mut self, word: Word) -> Self {
        self.words.push(word);
        self
    }

    /// Current length in words: the offset the next word will land at.
    pub fn offset(&self) -> usize {
        self.words.len()
    }

    /// Finish the program.
    pub fn build(self) -> Program {
        Program::new(self.words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_program() {
        let p = Program::new(vec![]);
        assert!(p.is_empty());
        assert_eq!(p.len(), 0);
        assert_eq!(p.to_json(), "[]");
    }

    #[test]
    fn builder_layout() {
        let p = Program::builder()
            .imm(2)
            .imm(3)
            .op(Opcode::Add)
            .build();
        assert_eq!(
            p.words,
            vec![
                Word::op(Opcode::Imm),
                Word::imm(2),
                Word::op(Opcode::Imm),
                Word::imm(3),
                Word::op(Opcode::Add),
            ]
        );
    }

    #[test]
    fn function_reserves_return_cell() {
        let p = Program::builder()
            .function("f", Program::builder().op(Opcode::DupHead))
            .build();
        assert_eq!(p.len(), 5);
        assert_eq!(p.words[3], Word::op(Opcode::EndLabel));
        assert!(p.words[4].is_sentinel());
    }

    #[test]
    fn json_roundtrip() {
        let p = Program::builder()
            .imm("hi")
            .wide(Opcode::Reg, 0)
            .op(Opcode::Exit)
            .build();
        let text = p.to_json();
        assert_eq!(Program::from_json(&text), Ok(p));
    }

    #[test]
    fn malformed_json_rejected() {
        let err = Program::from_json("{").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedProgram(_)));
        let err = Program::from_json(r#"[{"jump":1}]"#).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedProgram(_)));
    }
}
