//! Opcode definitions for the Quill instruction set.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Identifies the operation to perform.
///
/// Codes are part of the program format and must never be renumbered.
/// A wide opcode occupies two program words: the code and one immediate.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Opcode {
    /// Sentinel. Fetching it as an instruction ends execution cleanly.
    Nop = 0,

    // Arithmetic
    /// Pop rhs, pop lhs, push lhs - rhs.
    Sub = 1,
    /// Pop rhs, pop lhs, push lhs * rhs.
    Mul = 2,
    /// Pop rhs, pop lhs, push lhs / rhs truncated toward zero.
    Div = 3,
    /// Pop rhs, pop lhs, push lhs raised to rhs.
    Pow = 4,

    // Comparison & logic
    /// Push true if the top two values are strictly equal.
    Equal = 5,
    /// Push true if the top two values are not strictly equal.
    Nequal = 7,
    /// Push the truthiness of (lhs || rhs).
    Or = 9,
    /// Push the truthiness of (lhs && rhs).
    And = 10,
    /// Push true if exactly one of the top two values is truthy.
    Xor = 11,
    /// Push lhs < rhs.
    Lt = 12,
    /// Push lhs <= rhs.
    Lte = 13,
    /// Push lhs > rhs.
    Gt = 14,
    /// Push lhs >= rhs.
    Gte = 15,

    // Registers & control flow
    /// Push the value of register `imm`.
    Unreg = 16,
    /// Stop execution cleanly.
    Exit = 17,
    /// Declare a function body named `imm`.
    Label = 18,
    /// Close a function body. `imm` is the return-address cell.
    EndLabel = 19,
    /// Invoke the function named `imm`.
    Call = 20,
    /// Truncate a number to N decimals or an array to N elements.
    Trunc = 21,
    /// Duplicate the head of the stack.
    DupHead = 22,
    /// Pop the head into register `imm`.
    Reg = 23,
    /// Pop two values, jump to the JUMP register if equal.
    Jeq = 24,
    /// Pop two values, jump to the JUMP register if not equal.
    Jne = 25,
    /// Pop a value, push true if it is falsy.
    IsFalsy = 26,
    /// Push the immediate value.
    Imm = 27,
    /// Pop rhs, pop lhs, push lhs + rhs (numbers) or lhs ++ rhs (strings).
    Add = 28,
    /// Push a copy of persistent slot `imm`.
    Load = 29,
    /// Pop a value, push true if it is truthy.
    IsTruthy = 30,
    /// Jump to program offset `imm`.
    Ijmp = 31,

    // Conversions
    /// Convert the head to an arbitrary-precision integer.
    ToInt = 32,
    /// Convert the head to a floating-point number.
    ToNumber = 33,
    /// Convert the head to a string.
    ToString = 34,
    /// Swap the top two values.
    Swap = 35,
    /// Pop a reason and halt with an error.
    Abort = 36,
    /// Increment register `imm` in place.
    Inc = 37,
    /// Pop the head into persistent slot `imm`.
    Mem = 39,
    /// Pop two values, skip `imm` words if equal.
    SkipEq = 40,
    /// Pop two values, skip `imm` words if not equal.
    SkipNeq = 41,
    /// Discard the head.
    PopHead = 42,
    /// Pop key, pop object, push object[key].
    Pick = 43,
    /// Pop value, pop key, assign into the object left on the stack.
    Def = 44,
    /// Pop an array or string, push its length.
    Length = 45,
    /// Unconditionally skip `imm` words.
    Skip = 46,
    /// Apply function `imm` across a bounded array in a nested VM.
    Map = 47,
    /// Pop `imm` values and push them as one array.
    Pack = 48,

    // Digest
    /// Pop a string, push its SHA-256 digest.
    Sha256 = 64,
    /// Pop a string, push its SHA-512 digest.
    Sha512 = 65,

    // Host I/O
    /// Read host or context data selected by `imm`.
    Read = 100,
    /// Pop an app payload and append it to the emitted apps.
    PushApp = 101,
    /// Pop key, pop value, record a persisted state change.
    SetStateVar = 102,

    // Dynamic store
    /// Pop key, pop value, store under key.
    Set = 103,
    /// Pop key, push the stored value.
    Get = 104,
    /// Pop key, delete it from the store.
    Unset = 105,

    /// Trace the stack at debug level.
    Dbg = 1337,
}

/// All valid opcodes, sorted by code.
pub const ALL_OPCODES: [Opcode; 55] = [
    Opcode::Nop,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Pow,
    Opcode::Equal,
    Opcode::Nequal,
    Opcode::Or,
    Opcode::And,
    Opcode::Xor,
    Opcode::Lt,
    Opcode::Lte,
    Opcode::Gt,
    Opcode::Gte,
    Opcode::Unreg,
    Opcode::Exit,
    Opcode::Label,
    Opcode::EndLabel,
    Opcode::Call,
    Opcode::Trunc,
    Opcode::DupHead,
    Opcode::Reg,
    Opcode::Jeq,
    Opcode::Jne,
    Opcode::IsFalsy,
    Opcode::Imm,
    Opcode::Add,
    Opcode::Load,
    Opcode::IsTruthy,
    Opcode::Ijmp,
    Opcode::ToInt,
    Opcode::ToNumber,
    Opcode::ToString,
    Opcode::Swap,
    Opcode::Abort,
    Opcode::Inc,
    Opcode::Mem,
    Opcode::SkipEq,
    Opcode::SkipNeq,
    Opcode::PopHead,
    Opcode::Pick,
    Opcode::Def,
    Opcode::Length,
    Opcode::Skip,
    Opcode::Map,
    Opcode::Pack,
    Opcode::Sha256,
    Opcode::Sha512,
    Opcode::Read,
    Opcode::PushApp,
    Opcode::SetStateVar,
    Opcode::Set,
    Opcode::Get,
    Opcode::Unset,
    Opcode::Dbg,
];

impl TryFrom<u16> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        ALL_OPCODES
            .binary_search_by_key(&value, |op| op.code())
            .map(|i| ALL_OPCODES[i])
            .map_err(|_| DecodeError::UnknownOpcode(value))
    }
}

impl Opcode {
    /// Numeric code of this opcode.
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Whether this opcode consumes the following word as its immediate.
    pub const fn is_wide(self) -> bool {
        matches!(
            self,
            Opcode::Unreg
                | Opcode::Label
                | Opcode::EndLabel
                | Opcode::Call
                | Opcode::Reg
                | Opcode::Imm
                | Opcode::Load
                | Opcode::Ijmp
                | Opcode::Inc
                | Opcode::Mem
                | Opcode::SkipEq
                | Opcode::SkipNeq
                | Opcode::Skip
                | Opcode::Map
                | Opcode::Pack
                | Opcode::Read
        )
    }

    /// Number of program words this instruction occupies.
    pub const fn width(self) -> usize {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    /// Returns the assembly mnemonic for this opcode.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Pow => "POW",
            Opcode::Equal => "EQUAL",
            Opcode::Nequal => "NEQUAL",
            Opcode::Or => "OR",
            Opcode::And => "AND",
            Opcode::Xor => "XOR",
            Opcode::Lt => "LT",
            Opcode::Lte => "LTE",
            Opcode::Gt => "GT",
            Opcode::Gte => "GTE",
            Opcode::Unreg => "UNREG",
            Opcode::Exit => "EXIT",
            Opcode::Label => "LABEL",
            Opcode::EndLabel => "END_LABEL",
            Opcode::Call => "CALL",
            Opcode::Trunc => "TRUNC",
            Opcode::DupHead => "DUP_HEAD",
            Opcode::Reg => "REG",
            Opcode::Jeq => "JEQ",
            Opcode::Jne => "JNE",
            Opcode::IsFalsy => "IS_FALSY",
            Opcode::Imm => "IMM",
            Opcode::Add => "ADD",
            Opcode::Load => "LOAD",
            Opcode::IsTruthy => "IS_TRUTHY",
            Opcode::Ijmp => "IJMP",
            Opcode::ToInt => "TO_INT",
            Opcode::ToNumber => "TO_NUMBER",
            Opcode::ToString => "TO_STRING",
            Opcode::Swap => "SWAP",
            Opcode::Abort => "ABORT",
            Opcode::Inc => "INC",
            Opcode::Mem => "MEM",
            Opcode::SkipEq => "SKIP_EQ",
            Opcode::SkipNeq => "SKIP_NEQ",
            Opcode::PopHead => "POP_HEAD",
            Opcode::Pick => "PICK",
            Opcode::Def => "DEF",
            Opcode::Length => "LENGTH",
            Opcode::Skip => "SKIP",
            Opcode::Map => "MAP",
            Opcode::Pack => "PACK",
            Opcode::Sha256 => "SHA256",
            Opcode::Sha512 => "SHA512",
            Opcode::Read => "READ",
            Opcode::PushApp => "PUSH_APP",
            Opcode::SetStateVar => "SET_STATE_VAR",
            Opcode::Set => "SET",
            Opcode::Get => "GET",
            Opcode::Unset => "UNSET",
            Opcode::Dbg => "DBG",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_opcodes_count() {
        assert_eq!(ALL_OPCODES.len(), 55);
    }

    #[test]
    fn all_opcodes_sorted_by_code() {
        for pair in ALL_OPCODES.windows(2) {
            assert!(
                pair[0].code() < pair[1].code(),
                "{} must sort before {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn roundtrip_all_valid_opcodes() {
        for &opcode in &ALL_OPCODES {
            let code = opcode.code();
            assert_eq!(Opcode::try_from(code), Ok(opcode), "code {code}");
        }
    }

    #[test]
    fn sentinel_is_zero() {
        assert_eq!(Opcode::try_from(0), Ok(Opcode::Nop));
    }

    #[test]
    fn unassigned_codes_rejected() {
        for code in [6u16, 8, 38, 49, 63, 66, 99, 106, 1336, 1338, u16::MAX] {
            assert_eq!(Opcode::try_from(code), Err(DecodeError::UnknownOpcode(code)));
        }
    }

    #[test]
    fn wide_opcodes() {
        assert!(Opcode::Imm.is_wide());
        assert!(Opcode::EndLabel.is_wide());
        assert!(Opcode::Map.is_wide());
        assert!(!Opcode::Add.is_wide());
        assert!(!Opcode::Jeq.is_wide());
        assert_eq!(Opcode::Call.width(), 2);
        assert_eq!(Opcode::Swap.width(), 1);
    }

    #[test]
    fn mnemonics_are_unique() {
        let mut names: Vec<_> = ALL_OPCODES.iter().map(|op| op.mnemonic()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_OPCODES.len());
    }

    #[test]
    fn display_uses_mnemonic() {
        assert_eq!(Opcode::SetStateVar.to_string(), "SET_STATE_VAR");
    }
}
