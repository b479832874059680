//! Register file layout.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Number of registers in the register file.
pub const REGISTER_COUNT: usize = 10;

/// Identifies a register.
///
/// Registers 0-5 are general purpose. Registers 6-9 hold the initial
/// execution context and are read-only for programs.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    /// Modifier: TO_INT radix and digest encoding (0 = hex, else base64).
    Modifier = 0,
    /// First address operand for ledger reads.
    Address1 = 1,
    /// Second address operand.
    Address2 = 2,
    /// Asset operand for ledger reads.
    Asset = 3,
    /// Free-form options.
    Opts = 4,
    /// Target offset for JEQ/JNE.
    Jump = 5,
    /// Trigger descriptor (read-only).
    Trigger = 6,
    /// Address of the running program (read-only).
    ThisAddress = 7,
    /// Block position counter (read-only).
    Mci = 8,
    /// Timestamp (read-only).
    Timestamp = 9,
}

/// All registers, in index order.
pub const ALL_REGISTERS: [Register; REGISTER_COUNT] = [
    Register::Modifier,
    Register::Address1,
    Register::Address2,
    Register::Asset,
    Register::Opts,
    Register::Jump,
    Register::Trigger,
    Register::ThisAddress,
    Register::Mci,
    Register::Timestamp,
];

impl TryFrom<u16> for Register {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        ALL_REGISTERS
            .get(value as usize)
            .copied()
            .ok_or(DecodeError::UnknownRegister(value))
    }
}

impl Register {
    /// Index into the register file.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns true for registers populated from the initial context.
    pub const fn is_read_only(self) -> bool {
        matches!(
            self,
            Register::Trigger | Register::ThisAddress | Register::Mci | Register::Timestamp
        )
    }

    /// Returns true for registers that must hold a valid address.
    pub const fn holds_address(self) -> bool {
        matches!(self, Register::Address1 | Register::Address2)
    }

    /// Returns the assembly name for this register.
    pub fn name(&self) -> &'static str {
        match self {
            Register::Modifier => "MODIFIER",
            Register::Address1 => "ADDRESS_1",
            Register::Address2 => "ADDRESS_2",
            Register::Asset => "ASSET",
            Register::Opts => "OPTS",
            Register::Jump => "JUMP",
            Register::Trigger => "TRIGGER",
            Register::ThisAddress => "THIS_ADDRESS",
            Register::Mci => "MCI",
            Register::Timestamp => "TIMESTAMP",
        }
    }
}

/// Structural address check: 32 characters of the base32 alphabet `A-Z2-7`.
///
/// This is a shape check only. It does not verify checksums.
pub fn is_valid_address(candidate: &str) -> bool {
    candidate.len() == 32
        && candidate
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_registers() {
        for &reg in &ALL_REGISTERS {
            assert_eq!(Register::try_from(reg.index() as u16), Ok(reg));
        }
    }

    #[test]
    fn out_of_range_register() {
        assert_eq!(
            Register::try_from(10),
            Err(DecodeError::UnknownRegister(10))
        );
    }

    #[test]
    fn read_only_subset() {
        let read_only: Vec<_> = ALL_REGISTERS
            .iter()
            .filter(|r| r.is_read_only())
            .copied()
            .collect();
        assert_eq!(
            read_only,
            vec![
                Register::Trigger,
                Register::ThisAddress,
                Register::Mci,
                Register::Timestamp
            ]
        );
    }

    #[test]
    fn address_shape() {
        assert!(is_valid_address("RO7ZAGVJPBOZFH4NMDGZGY4IRILNNEUQ"));
        assert!(!is_valid_address("ro7zagvjpbozfh4nmdgzgy4irilnneuq"));
        assert!(!is_valid_address("RO7ZAGVJPBOZFH4NMDGZGY4IRILNNEU"));
        assert!(!is_valid_address("RO7ZAGVJPBOZFH4NMDGZGY4IRILNNEU1"));
        assert!(!is_valid_address(""));
    }
}
