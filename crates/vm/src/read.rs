//! READ: context reads from registers, ledger reads through the host.
//!
//! Ledger reads are answered either synchronously by a [`Resolver`] or by
//! suspending the machine with an [`Interruption`] that the host answers
//! through [`Machine::write`].

use std::rc::Rc;

use quill_common::{FeedBound, ReadArgument, Register, Value, Word};
use serde::{Deserialize, Serialize};

use crate::catalog::Flow;
use crate::error::{ResolveError, VmError};
use crate::limits::{READ_CONTEXT_GAS, READ_LEDGER_GAS};
use crate::machine::{Machine, ReadMode};

/// A ledger read the host must answer.
///
/// Serialized as `{"kind": "BALANCE", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Interruption {
    DataFeed {
        address: String,
        feed_name: String,
        mci: u64,
        bound: FeedBound,
    },
    Balance {
        address: String,
        asset: String,
    },
    Asset {
        asset: String,
    },
    Variable {
        address: String,
        name: String,
    },
    Unit {
        unit: String,
    },
}

/// Discriminant of [`Interruption`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptionKind {
    DataFeed,
    Balance,
    Asset,
    Variable,
    Unit,
}

impl Interruption {
    pub fn kind(&self) -> InterruptionKind {
        match self {
            Interruption::DataFeed { .. } => InterruptionKind::DataFeed,
            Interruption::Balance { .. } => InterruptionKind::Balance,
            Interruption::Asset { .. } => InterruptionKind::Asset,
            Interruption::Variable { .. } => InterruptionKind::Variable,
            Interruption::Unit { .. } => InterruptionKind::Unit,
        }
    }
}

/// Answers ledger reads synchronously.
pub trait Resolver {
    /// Balance of `address` in `asset`.
    fn balance(&self, address: &str, asset: &str) -> Result<Value, ResolveError>;

    /// State variable `name` of the program at `address`.
    fn variable(&self, address: &str, name: &str) -> Result<Value, ResolveError>;

    /// Descriptor of `asset`.
    fn asset(&self, asset: &str) -> Result<Value, ResolveError>;

    /// Latest value of `feed_name` posted by `address`, bounded by `mci`.
    fn data_feed(
        &self,
        address: &str,
        feed_name: &str,
        mci: u64,
        bound: FeedBound,
    ) -> Result<Value, ResolveError>;

    /// Unit with hash `unit`.
    fn unit(&self, unit: &str) -> Result<Value, ResolveError>;

    /// Dispatch an interruption to the matching method.
    fn resolve(&self, request: &Interruption) -> Result<Value, ResolveError> {
        match request {
            Interruption::DataFeed {
                address,
                feed_name,
                mci,
                bound,
            } => self.data_feed(address, feed_name, *mci, *bound),
            Interruption::Balance { address, asset } => self.balance(address, asset),
            Interruption::Asset { asset } => self.asset(asset),
            Interruption::Variable { address, name } => self.variable(address, name),
            Interruption::Unit { unit } => self.unit(unit),
        }
    }
}

fn read_argument(imm: Option<&Word>) -> Option<ReadArgument> {
    imm.and_then(Word::as_index)
        .and_then(|i| u16::try_from(i).ok())
        .and_then(|i| ReadArgument::try_from(i).ok())
}

fn context_register(argument: ReadArgument) -> Option<Register> {
    match argument {
        ReadArgument::Trigger => Some(Register::Trigger),
        ReadArgument::ThisAddress => Some(Register::ThisAddress),
        ReadArgument::Mci => Some(Register::Mci),
        ReadArgument::Timestamp => Some(Register::Timestamp),
        _ => None,
    }
}

impl Machine {
    pub(crate) fn gas_read(&self, imm: Option<&Word>) -> u64 {
        match read_argument(imm) {
            Some(argument) if argument.is_context() => READ_CONTEXT_GAS,
            _ => READ_LEDGER_GAS,
        }
    }

    fn string_register(&self, register: Register) -> Result<String, VmError> {
        match self.register(register) {
            Value::String(s) => Ok(s),
            other => Err(self.assertion(format!(
                "{} must hold a string, found {}",
                register.name(),
                other.kind()
            ))),
        }
    }

    fn string_at(&self, depth: usize, what: &str) -> Result<String, VmError> {
        match self.peek(depth)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(self.assertion(format!("{what} must be a string, found {}", other.kind()))),
        }
    }

    /// Build the request for a ledger read from the registers and the
    /// stack without consuming anything.
    fn ledger_request(&self, argument: ReadArgument) -> Result<Interruption, VmError> {
        if self.stack.len() < argument.stack_arity() {
            return Err(self.assertion(format!(
                "{argument:?} needs {} stack values, found {}",
                argument.stack_arity(),
                self.stack.len()
            )));
        }
        match argument {
            ReadArgument::Balance => Ok(Interruption::Balance {
                address: self.string_register(Register::Address1)?,
                asset: self.string_register(Register::Asset)?,
            }),
            ReadArgument::Asset => Ok(Interruption::Asset {
                asset: self.string_register(Register::Asset)?,
            }),
            ReadArgument::Variable => Ok(Interruption::Variable {
                address: self.string_register(Register::Address1)?,
                name: self.string_at(0, "variable name")?,
            }),
            ReadArgument::Unit => Ok(Interruption::Unit {
                unit: self.string_at(0, "unit hash")?,
            }),
            ReadArgument::DataFeed => {
                let bound = self
                    .peek(0)?
                    .as_index()
                    .and_then(|b| u16::try_from(b).ok())
                    .and_then(|b| FeedBound::try_from(b).ok())
                    .ok_or_else(|| self.assertion("data feed bound must be 0 (min) or 1 (max)"))?;
                let mci = self
                    .peek(1)?
                    .as_index()
                    .ok_or_else(|| self.assertion("data feed mci must be a non-negative integer"))?;
                Ok(Interruption::DataFeed {
                    address: self.string_register(Register::Address1)?,
                    feed_name: self.string_at(2, "feed name")?,
                    mci: mci as u64,
                    bound,
                })
            }
            context => Err(self.assertion(format!("{context:?} is not a ledger read"))),
        }
    }

    pub(crate) fn assert_read(&self, imm: Option<&Word>) -> Result<(), VmError> {
        let argument =
            read_argument(imm).ok_or_else(|| self.assertion("operand is not a READ argument"))?;
        if argument.is_context() {
            return Ok(());
        }
        self.ledger_request(argument).map(|_| ())
    }

    pub(crate) fn exec_read(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let argument =
            read_argument(imm).ok_or_else(|| self.assertion("operand is not a READ argument"))?;
        if let Some(register) = context_register(argument) {
            let value = self.register(register);
            self.push(value)?;
            return Ok(Flow::Next);
        }

        let request = self.ledger_request(argument)?;
        for _ in 0..argument.stack_arity() {
            self.pop()?;
        }
        match &self.reads {
            ReadMode::Suspend => Ok(Flow::Suspend(request)),
            ReadMode::Resolve(resolver) => {
                let resolver = Rc::clone(resolver);
                let value = resolver.resolve(&request).map_err(|err| VmError::Resolver {
                    at: self.pc,
                    reason: err.to_string(),
                })?;
                self.push(value)?;
                Ok(Flow::Next)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interruption_wire_shape() {
        let request = Interruption::Balance {
            address: "A".into(),
            asset: "base".into(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"kind": "BALANCE", "payload": {"address": "A", "asset": "base"}})
        );
        let feed = Interruption::DataFeed {
            address: "A".into(),
            feed_name: "price".into(),
            mci: 10,
            bound: FeedBound::MaxMci,
        };
        assert_eq!(
            serde_json::to_value(&feed).unwrap()["kind"],
            serde_json::json!("DATA_FEED")
        );
    }

    #[test]
    fn context_gas_is_cheap() {
        let m = Machine::default();
        let cost = |code: u16| m.gas_read(Some(&Word::imm(code as i64)));
        assert_eq!(cost(ReadArgument::Trigger as u16), READ_CONTEXT_GAS);
        assert_eq!(cost(ReadArgument::Timestamp as u16), READ_CONTEXT_GAS);
        assert_eq!(cost(ReadArgument::Balance as u16), READ_LEDGER_GAS);
        assert_eq!(cost(ReadArgument::DataFeed as u16), READ_LEDGER_GAS);
    }

    #[test]
    fn kinds_match_variants() {
        assert_eq!(
            Interruption::Unit { unit: "u".into() }.kind(),
            InterruptionKind::Unit
        );
        assert_eq!(
            Interruption::Asset { asset: "a".into() }.kind(),
            InterruptionKind::Asset
        );
    }
}
