//! Value kinds, used for type checks and error messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The runtime kind of a [`Value`](crate::Value).
///
/// Every value has exactly one kind. Opcode preconditions check kinds
/// before any stack effect happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Missing value (never assigned).
    Absent,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool,
    /// IEEE 754 64-bit float.
    Number,
    /// Arbitrary-precision integer.
    BigInt,
    /// UTF-8 string.
    String,
    /// Ordered array.
    Array,
    /// String-keyed map.
    Map,
}

/// All value kinds, in definition order.
pub const ALL_KINDS: [ValueKind; 8] = [
    ValueKind::Absent,
    ValueKind::Null,
    ValueKind::Bool,
    ValueKind::Number,
    ValueKind::BigInt,
    ValueKind::String,
    ValueKind::Array,
    ValueKind::Map,
];

impl ValueKind {
    /// Returns the lowercase name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Absent => "absent",
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::BigInt => "bigint",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Map => "map",
        }
    }

    /// Returns true for the two numeric kinds (Number, BigInt).
    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueKind::Number | ValueKind::BigInt)
    }

    /// Returns true for kinds that can be indexed by PICK and DEF.
    pub fn is_container(&self) -> bool {
        matches!(self, ValueKind::Array | ValueKind::Map)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_kinds_count() {
        assert_eq!(ALL_KINDS.len(), 8);
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = ALL_KINDS.iter().map(|k| k.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_KINDS.len());
    }

    #[test]
    fn numeric_kinds() {
        assert!(ValueKind::Number.is_numeric());
        assert!(ValueKind::BigInt.is_numeric());
        assert!(!ValueKind::String.is_numeric());
        assert!(!ValueKind::Bool.is_numeric());
        assert!(!ValueKind::Absent.is_numeric());
    }

    #[test]
    fn container_kinds() {
        assert!(ValueKind::Array.is_container());
        assert!(ValueKind::Map.is_container());
        assert!(!ValueKind::String.is_container());
    }
}
