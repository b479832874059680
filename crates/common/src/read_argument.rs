//! READ argument codes and data feed bounds.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// What a READ instruction reads.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadArgument {
    /// Data feed value. Pops [feed_name, mci, bound].
    DataFeed = 0,
    /// Balance of ADDRESS_1 in ASSET.
    Balance = 1,
    /// Unit by hash. Pops [unit].
    Unit = 2,
    /// Trigger descriptor.
    Trigger = 3,
    /// State variable of ADDRESS_1. Pops [name].
    Variable = 6,
    /// Address of the running program.
    ThisAddress = 7,
    /// Asset descriptor of ASSET.
    Asset = 8,
    /// Block position counter.
    Mci = 9,
    /// Timestamp.
    Timestamp = 10,
}

/// All READ arguments, sorted by code.
pub const ALL_READ_ARGUMENTS: [ReadArgument; 9] = [
    ReadArgument::DataFeed,
    ReadArgument::Balance,
    ReadArgument::Unit,
    ReadArgument::Trigger,
    ReadArgument::Variable,
    ReadArgument::ThisAddress,
    ReadArgument::Asset,
    ReadArgument::Mci,
    ReadArgument::Timestamp,
];

impl TryFrom<u16> for ReadArgument {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        ALL_READ_ARGUMENTS
            .iter()
            .copied()
            .find(|arg| *arg as u16 == value)
            .ok_or(DecodeError::UnknownReadArgument(value))
    }
}

impl ReadArgument {
    /// Context arguments are answered from read-only registers and never
    /// suspend execution.
    pub const fn is_context(self) -> bool {
        matches!(
            self,
            ReadArgument::Trigger
                | ReadArgument::ThisAddress
                | ReadArgument::Mci
                | ReadArgument::Timestamp
        )
    }

    /// Number of stack values this argument consumes.
    pub const fn stack_arity(self) -> usize {
        match self {
            ReadArgument::DataFeed => 3,
            ReadArgument::Variable | ReadArgument::Unit => 1,
            _ => 0,
        }
    }
}

/// Which side of the block position range a data feed read is bounded on.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedBound {
    /// Only values posted at or after the given MCI.
    MinMci = 0,
    /// Only values posted at or before the given MCI.
    MaxMci = 1,
}

impl TryFrom<u16> for FeedBound {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FeedBound::MinMci),
            1 => Ok(FeedBound::MaxMci),
            other => Err(DecodeError::UnknownFeedBound(other)),
        }
    }
}
