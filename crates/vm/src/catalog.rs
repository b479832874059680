//! The opcode catalog: stack arity, gas, precondition and effect for every
//! opcode, plus the effects of the value-level opcodes.
//!
//! Control flow lives in `execute`, host reads in `read`, MAP in `map`.

use std::cmp::Ordering;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive, Zero};
use quill_common::opcode::ALL_OPCODES;
use quill_common::{is_valid_address, Opcode, Register, Value, ValueKind, Word};
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use crate::error::VmError;
use crate::limits::{APP_KINDS, MAX_BIGINT_POW_BITS, PUSH_APP_BASE_GAS, STATE_VAR_BASE_GAS};
use crate::machine::Machine;
use crate::read::Interruption;

/// What the loop does after an opcode's effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Advance pc past the instruction.
    Next,
    /// Set pc.
    Jump(usize),
    /// Stop cleanly.
    Halt,
    /// Advance pc past the instruction and return the interruption.
    Suspend(Interruption),
    /// A MAP child is suspended; pc stays on the MAP.
    Wait,
}

pub type AssertFn = fn(&Machine, Option<&Word>) -> Result<(), VmError>;
pub type ExecFn = fn(&mut Machine, Option<&Word>) -> Result<Flow, VmError>;
pub type GasFn = fn(&Machine, Option<&Word>) -> u64;

/// Gas cost of an opcode.
#[derive(Clone, Copy)]
pub enum Gas {
    Fixed(u64),
    /// Computed from the state after the precondition has passed.
    Dynamic(GasFn),
}

/// One catalog entry.
pub struct OpSpec {
    pub opcode: Opcode,
    /// Values that must be on the stack before the precondition runs.
    pub arity: usize,
    pub gas: Gas,
    pub assert: Option<AssertFn>,
    pub exec: ExecFn,
}

impl OpSpec {
    pub fn cost(&self, m: &Machine, imm: Option<&Word>) -> u64 {
        match self.gas {
            Gas::Fixed(gas) => gas,
            Gas::Dynamic(f) => f(m, imm),
        }
    }
}

const fn entry(
    opcode: Opcode,
    arity: usize,
    gas: Gas,
    assert: Option<AssertFn>,
    exec: ExecFn,
) -> OpSpec {
    OpSpec {
        opcode,
        arity,
        gas,
        assert,
        exec,
    }
}

/// Catalog entries, in the same order as [`ALL_OPCODES`].
pub static CATALOG: [OpSpec; 55] = [
    entry(Opcode::Nop, 0, Gas::Fixed(0), None, Machine::exec_halt),
    entry(Opcode::Sub, 2, Gas::Fixed(1), Some(Machine::assert_numeric_pair), Machine::exec_sub),
    entry(Opcode::Mul, 2, Gas::Fixed(1), Some(Machine::assert_numeric_pair), Machine::exec_mul),
    entry(Opcode::Div, 2, Gas::Fixed(1), Some(Machine::assert_div), Machine::exec_div),
    entry(Opcode::Pow, 2, Gas::Fixed(2), Some(Machine::assert_pow), Machine::exec_pow),
    entry(Opcode::Equal, 2, Gas::Fixed(1), None, Machine::exec_equal),
    entry(Opcode::Nequal, 2, Gas::Fixed(1), None, Machine::exec_nequal),
    entry(Opcode::Or, 2, Gas::Fixed(1), None, Machine::exec_or),
    entry(Opcode::And, 2, Gas::Fixed(1), None, Machine::exec_and),
    entry(Opcode::Xor, 2, Gas::Fixed(2), None, Machine::exec_xor),
    entry(Opcode::Lt, 2, Gas::Fixed(1), Some(Machine::assert_comparable), Machine::exec_lt),
    entry(Opcode::Lte, 2, Gas::Fixed(1), Some(Machine::assert_comparable), Machine::exec_lte),
    entry(Opcode::Gt, 2, Gas::Fixed(1), Some(Machine::assert_comparable), Machine::exec_gt),
    entry(Opcode::Gte, 2, Gas::Fixed(1), Some(Machine::assert_comparable), Machine::exec_gte),
    entry(Opcode::Unreg, 0, Gas::Fixed(1), Some(Machine::assert_unreg), Machine::exec_unreg),
    entry(Opcode::Exit, 0, Gas::Fixed(1), None, Machine::exec_halt),
    entry(Opcode::Label, 0, Gas::Fixed(1), Some(Machine::assert_label_operand), Machine::exec_label),
    entry(Opcode::EndLabel, 0, Gas::Fixed(1), Some(Machine::assert_end_label), Machine::exec_end_label),
    entry(Opcode::Call, 0, Gas::Fixed(1), Some(Machine::assert_label_operand), Machine::exec_call),
    entry(Opcode::Trunc, 2, Gas::Fixed(2), Some(Machine::assert_trunc), Machine::exec_trunc),
    entry(Opcode::DupHead, 1, Gas::Fixed(1), None, Machine::exec_dup_head),
    entry(Opcode::Reg, 1, Gas::Fixed(1), Some(Machine::assert_reg), Machine::exec_reg),
    entry(Opcode::Jeq, 2, Gas::Fixed(2), Some(Machine::assert_jump_register), Machine::exec_jeq),
    entry(Opcode::Jne, 2, Gas::Fixed(2), Some(Machine::assert_jump_register), Machine::exec_jne),
    entry(Opcode::IsFalsy, 1, Gas::Fixed(1), None, Machine::exec_is_falsy),
    entry(Opcode::Imm, 0, Gas::Fixed(1), Some(Machine::assert_imm), Machine::exec_imm),
    entry(Opcode::Add, 2, Gas::Fixed(1), Some(Machine::assert_add), Machine::exec_add),
    entry(Opcode::Load, 0, Gas::Fixed(1), Some(Machine::assert_load), Machine::exec_load),
    entry(Opcode::IsTruthy, 1, Gas::Fixed(1), None, Machine::exec_is_truthy),
    entry(Opcode::Ijmp, 0, Gas::Fixed(1), Some(Machine::assert_ijmp), Machine::exec_ijmp),
    entry(Opcode::ToInt, 1, Gas::Fixed(2), Some(Machine::assert_to_int), Machine::exec_to_int),
    entry(Opcode::ToNumber, 1, Gas::Fixed(2), Some(Machine::assert_to_number), Machine::exec_to_number),
    entry(Opcode::ToString, 1, Gas::Fixed(4), Some(Machine::assert_to_string), Machine::exec_to_string),
    entry(Opcode::Swap, 2, Gas::Fixed(2), None, Machine::exec_swap),
    entry(Opcode::Abort, 1, Gas::Fixed(0), None, Machine::exec_abort),
    entry(Opcode::Inc, 0, Gas::Fixed(1), Some(Machine::assert_inc), Machine::exec_inc),
    entry(Opcode::Mem, 1, Gas::Fixed(1), Some(Machine::assert_mem), Machine::exec_mem),
    entry(Opcode::SkipEq, 2, Gas::Fixed(1), Some(Machine::assert_skip), Machine::exec_skip_eq),
    entry(Opcode::SkipNeq, 2, Gas::Fixed(1), Some(Machine::assert_skip), Machine::exec_skip_neq),
    entry(Opcode::PopHead, 1, Gas::Fixed(1), None, Machine::exec_pop_head),
    entry(Opcode::Pick, 2, Gas::Fixed(1), Some(Machine::assert_pick), Machine::exec_pick),
    entry(Opcode::Def, 3, Gas::Fixed(1), Some(Machine::assert_def), Machine::exec_def),
    entry(Opcode::Length, 1, Gas::Fixed(1), Some(Machine::assert_length), Machine::exec_length),
    entry(Opcode::Skip, 0, Gas::Fixed(1), Some(Machine::assert_skip), Machine::exec_skip),
    entry(Opcode::Map, 3, Gas::Fixed(0), Some(Machine::assert_map), Machine::exec_map),
    entry(Opcode::Pack, 0, Gas::Fixed(1), Some(Machine::assert_pack), Machine::exec_pack),
    entry(Opcode::Sha256, 1, Gas::Fixed(15), Some(Machine::assert_digest), Machine::exec_sha256),
    entry(Opcode::Sha512, 1, Gas::Fixed(16), Some(Machine::assert_digest), Machine::exec_sha512),
    entry(Opcode::Read, 0, Gas::Dynamic(Machine::gas_read), Some(Machine::assert_read), Machine::exec_read),
    entry(Opcode::PushApp, 1, Gas::Dynamic(Machine::gas_push_app), Some(Machine::assert_push_app), Machine::exec_push_app),
    entry(Opcode::SetStateVar, 2, Gas::Dynamic(Machine::gas_set_state_var), Some(Machine::assert_set_state_var), Machine::exec_set_state_var),
    entry(Opcode::Set, 2, Gas::Fixed(1), Some(Machine::assert_key_head), Machine::exec_set),
    entry(Opcode::Get, 1, Gas::Fixed(1), Some(Machine::assert_key_head), Machine::exec_get),
    entry(Opcode::Unset, 1, Gas::Fixed(1), Some(Machine::assert_key_head), Machine::exec_unset),
    entry(Opcode::Dbg, 0, Gas::Fixed(0), None, Machine::exec_dbg),
];

/// Catalog entry for `opcode`.
pub fn lookup(opcode: Opcode) -> &'static OpSpec {
    // ALL_OPCODES and CATALOG share one order, checked by tests.
    let index = ALL_OPCODES
        .binary_search(&opcode)
        .unwrap_or_default();
    &CATALOG[index]
}

/// The immediate's value, when the operand word is an immediate.
pub(crate) fn operand(imm: Option<&Word>) -> Option<&Value> {
    imm.and_then(Word::as_imm)
}

/// Register named by the operand.
pub(crate) fn register_operand(imm: Option<&Word>) -> Option<Register> {
    imm.and_then(Word::as_index)
        .and_then(|i| u16::try_from(i).ok())
        .and_then(|i| Register::try_from(i).ok())
}

/// Ordering used by LT/LTE/GT/GTE. `None` when the values are not
/// comparable (including NaN).
fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::BigInt(a), Value::BigInt(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::BigInt(b)) => b.to_f64().and_then(|b| a.partial_cmp(&b)),
        (Value::BigInt(a), Value::Number(b)) => a.to_f64().and_then(|a| a.partial_cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Parse the longest integer prefix of `text` in `radix`, after optional
/// whitespace and sign.
fn parse_int_prefix(text: &str, radix: u32) -> Option<BigInt> {
    let text = text.trim_start();
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let digits: String = rest.chars().take_while(|c| c.is_digit(radix)).collect();
    let magnitude = BigInt::parse_bytes(digits.as_bytes(), radix)?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Parse a string for TO_NUMBER. Only finite results are accepted.
fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Truncate `n` to `decimals` digits after the point.
///
/// Works on the shortest decimal rendering, so 0.29 keeps both digits
/// instead of becoming 28.999... when scaled.
fn truncate_decimals(n: f64, decimals: usize) -> f64 {
    if !n.is_finite() {
        return n;
    }
    let text = n.to_string();
    let Some((whole, fraction)) = text.split_once('.') else {
        return n;
    };
    if fraction.len() <= decimals {
        return n;
    }
    let kept = if decimals == 0 {
        whole.to_string()
    } else {
        format!("{whole}.{}", &fraction[..decimals])
    };
    kept.parse().unwrap_or(n)
}

/// Array position named by a PICK/DEF key: an index or a numeric string.
fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::String(s) => s.parse::<usize>().ok(),
        other => other.as_index(),
    }
}

fn kind_pair(lhs: &Value, rhs: &Value) -> String {
    format!("{} and {}", lhs.kind(), rhs.kind())
}

impl Machine {
    // ---- preconditions ----

    pub(crate) fn assert_numeric_pair(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        let (rhs, lhs) = (self.peek(0)?, self.peek(1)?);
        match (lhs, rhs) {
            (Value::Number(_), Value::Number(_)) | (Value::BigInt(_), Value::BigInt(_)) => Ok(()),
            _ => Err(self.assertion(format!(
                "operands must be two numbers or two big integers, found {}",
                kind_pair(lhs, rhs)
            ))),
        }
    }

    pub(crate) fn assert_div(&self, imm: Option<&Word>) -> Result<(), VmError> {
        self.assert_numeric_pair(imm)?;
        let divisor_is_zero = match self.peek(0)? {
            Value::Number(n) => *n == 0.0,
            Value::BigInt(b) => b.is_zero(),
            _ => false,
        };
        if divisor_is_zero {
            return Err(self.assertion("division by zero"));
        }
        Ok(())
    }

    pub(crate) fn assert_pow(&self, imm: Option<&Word>) -> Result<(), VmError> {
        self.assert_numeric_pair(imm)?;
        let (Value::BigInt(base), Value::BigInt(exponent)) = (self.peek(1)?, self.peek(0)?) else {
            return Ok(());
        };
        let Some(exponent) = exponent.to_u32() else {
            return Err(self.assertion("big integer exponent must fit in 32 unsigned bits"));
        };
        // 0, 1 and -1 stay small under any exponent.
        if base.magnitude().bits() > 1 {
            let bits = base.bits().saturating_mul(u64::from(exponent));
            if bits > MAX_BIGINT_POW_BITS {
                return Err(self.assertion(format!(
                    "result of about {bits} bits exceeds {MAX_BIGINT_POW_BITS}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn assert_add(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        let (rhs, lhs) = (self.peek(0)?, self.peek(1)?);
        match (lhs, rhs) {
            (Value::Number(_), Value::Number(_))
            | (Value::BigInt(_), Value::BigInt(_))
            | (Value::String(_), Value::String(_)) => Ok(()),
            _ => Err(self.assertion(format!(
                "operands must be two numbers or two strings, found {}",
                kind_pair(lhs, rhs)
            ))),
        }
    }

    pub(crate) fn assert_comparable(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        let (rhs, lhs) = (self.peek(0)?, self.peek(1)?);
        let comparable = (lhs.kind().is_numeric() && rhs.kind().is_numeric())
            || (lhs.kind() == ValueKind::String && rhs.kind() == ValueKind::String);
        if comparable {
            Ok(())
        } else {
            Err(self.assertion(format!("cannot order {}", kind_pair(lhs, rhs))))
        }
    }

    pub(crate) fn assert_unreg(&self, imm: Option<&Word>) -> Result<(), VmError> {
        register_operand(imm)
            .map(|_| ())
            .ok_or_else(|| self.assertion("operand is not a register"))
    }

    pub(crate) fn assert_trunc(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        if self.peek(0)?.as_index().is_none() {
            return Err(self.assertion("length must be a non-negative integer"));
        }
        match self.peek(1)? {
            Value::Number(_) | Value::Array(_) => Ok(()),
            other => Err(self.assertion(format!(
                "argument must be a number or an array, found {}",
                other.kind()
            ))),
        }
    }

    pub(crate) fn assert_reg(&self, imm: Option<&Word>) -> Result<(), VmError> {
        let register =
            register_operand(imm).ok_or_else(|| self.assertion("operand is not a register"))?;
        if register.is_read_only() {
            return Err(self.assertion(format!("register {} is read-only", register.name())));
        }
        let head = self.peek(0)?;
        if register.holds_address() && !head.as_str().map(is_valid_address).unwrap_or(false) {
            return Err(self.assertion(format!(
                "{} must hold a valid address, found {head}",
                register.name()
            )));
        }
        if register == Register::Jump && head.as_index().is_none() {
            return Err(self.assertion(format!("JUMP must hold a program offset, found {head}")));
        }
        Ok(())
    }

    pub(crate) fn assert_jump_register(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        if self.register(Register::Jump).as_index().is_none() {
            return Err(self.assertion("JUMP register does not hold a program offset"));
        }
        Ok(())
    }

    pub(crate) fn assert_imm(&self, imm: Option<&Word>) -> Result<(), VmError> {
        operand(imm)
            .map(|_| ())
            .ok_or_else(|| self.assertion("operand is not an immediate value"))
    }

    pub(crate) fn assert_load(&self, imm: Option<&Word>) -> Result<(), VmError> {
        let slot = imm
            .and_then(Word::as_index)
            .ok_or_else(|| self.assertion("operand is not a slot index"))?;
        let shared = self.shared.borrow();
        match shared.slots.get(slot) {
            Some(value) if !value.is_absent() => Ok(()),
            _ => Err(self.assertion(format!("slot {slot} is empty"))),
        }
    }

    pub(crate) fn assert_ijmp(&self, imm: Option<&Word>) -> Result<(), VmError> {
        imm.and_then(Word::as_index)
            .map(|_| ())
            .ok_or_else(|| self.assertion("operand is not a program offset"))
    }

    pub(crate) fn assert_to_int(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        match self.peek(0)? {
            Value::String(s) if parse_int_prefix(s, self.radix()).is_some() => Ok(()),
            Value::String(s) => Err(self.assertion(format!("cannot parse {s:?} as an integer"))),
            Value::Number(n) if n.is_finite() => Ok(()),
            Value::BigInt(_) => Ok(()),
            other => Err(self.assertion(format!(
                "head must be a string or a finite number, found {}",
                other.kind()
            ))),
        }
    }

    pub(crate) fn assert_to_number(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        match self.peek(0)? {
            Value::String(s) if parse_number(s).is_some() => Ok(()),
            Value::String(s) => Err(self.assertion(format!("cannot parse {s:?} as a number"))),
            Value::BigInt(b) if b.to_f64().map(f64::is_finite).unwrap_or(false) => Ok(()),
            Value::Number(_) => Ok(()),
            other => Err(self.assertion(format!(
                "head must be a string or a number, found {}",
                other.kind()
            ))),
        }
    }

    pub(crate) fn assert_to_string(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        if self.peek(0)?.is_absent() {
            return Err(self.assertion("cannot convert an absent value"));
        }
        Ok(())
    }

    pub(crate) fn assert_inc(&self, imm: Option<&Word>) -> Result<(), VmError> {
        let register =
            register_operand(imm).ok_or_else(|| self.assertion("operand is not a register"))?;
        if register.is_read_only() {
            return Err(self.assertion(format!("register {} is read-only", register.name())));
        }
        if !self.register(register).kind().is_numeric() {
            return Err(self.assertion(format!("register {} is not numeric", register.name())));
        }
        Ok(())
    }

    pub(crate) fn assert_mem(&self, imm: Option<&Word>) -> Result<(), VmError> {
        match imm.and_then(Word::as_index) {
            Some(slot) if slot < self.options.max_slots => Ok(()),
            Some(slot) => Err(self.assertion(format!(
                "slot {slot} is outside 0..{}",
                self.options.max_slots
            ))),
            None => Err(self.assertion("operand is not a slot index")),
        }
    }

    pub(crate) fn assert_pick(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        let (key, object) = (self.peek(0)?, self.peek(1)?);
        match object {
            Value::Array(_) if array_index(key).is_some() => Ok(()),
            Value::Map(_) if key.as_key().is_some() => Ok(()),
            Value::Array(_) | Value::Map(_) => {
                Err(self.assertion(format!("invalid key {key} for {}", object.kind())))
            }
            other => Err(self.assertion(format!(
                "target must be an array or a map, found {}",
                other.kind()
            ))),
        }
    }

    pub(crate) fn assert_def(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        let (key, object) = (self.peek(1)?, self.peek(2)?);
        match object {
            Value::Array(items) => match array_index(key) {
                Some(index) if index <= items.len() => Ok(()),
                _ => Err(self.assertion(format!(
                    "index {key} is outside 0..={} for array",
                    items.len()
                ))),
            },
            Value::Map(_) if key.as_key().is_some() => Ok(()),
            Value::Map(_) => Err(self.assertion(format!("invalid key {key} for map"))),
            other => Err(self.assertion(format!(
                "target must be an array or a map, found {}",
                other.kind()
            ))),
        }
    }

    pub(crate) fn assert_length(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        match self.peek(0)? {
            Value::Array(_) | Value::String(_) => Ok(()),
            other => Err(self.assertion(format!(
                "head must be an array or a string, found {}",
                other.kind()
            ))),
        }
    }

    pub(crate) fn assert_pack(&self, imm: Option<&Word>) -> Result<(), VmError> {
        let count = imm
            .and_then(Word::as_index)
            .ok_or_else(|| self.assertion("operand is not a count"))?;
        if count > self.stack.len() {
            return Err(self.assertion(format!(
                "cannot pack {count} values from a stack of {}",
                self.stack.len()
            )));
        }
        Ok(())
    }

    pub(crate) fn assert_digest(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        match self.peek(0)? {
            Value::String(_) => Ok(()),
            other => Err(self.assertion(format!("head must be a string, found {}", other.kind()))),
        }
    }

    pub(crate) fn assert_push_app(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        let Value::Map(payload) = self.peek(0)? else {
            return Err(self.assertion("payload must be a map"));
        };
        let kind = payload.get("app").and_then(Value::as_str);
        match kind {
            Some(kind) if APP_KINDS.contains(&kind) => {}
            _ => return Err(self.assertion("payload app must be one of payment, data, data_feed, state")),
        }
        if !payload.contains_key("payload") {
            return Err(self.assertion("payload has no payload entry"));
        }
        Ok(())
    }

    pub(crate) fn assert_set_state_var(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        let (key, value) = (self.peek(0)?, self.peek(1)?);
        if key.as_str().is_none() {
            return Err(self.assertion(format!("state key must be a string, found {}", key.kind())));
        }
        if value.as_str().is_none() {
            return Err(self.assertion(format!(
                "state value must be a string, found {}",
                value.kind()
            )));
        }
        Ok(())
    }

    pub(crate) fn assert_key_head(&self, _imm: Option<&Word>) -> Result<(), VmError> {
        let key = self.peek(0)?;
        if key.as_key().is_none() {
            return Err(self.assertion(format!("{key} is not a valid key")));
        }
        Ok(())
    }

    // ---- dynamic gas ----

    pub(crate) fn gas_push_app(&self, _imm: Option<&Word>) -> u64 {
        let payload_len = self.peek(0).map(Value::json_len).unwrap_or(0);
        PUSH_APP_BASE_GAS + payload_len as u64
    }

    pub(crate) fn gas_set_state_var(&self, _imm: Option<&Word>) -> u64 {
        let length = |depth| {
            self.peek(depth)
                .ok()
                .and_then(Value::as_str)
                .map(|s| s.chars().count())
                .unwrap_or(0)
        };
        STATE_VAR_BASE_GAS + (length(0) + length(1)) as u64
    }

    // ---- effects ----

    pub(crate) fn exec_halt(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        Ok(Flow::Halt)
    }

    /// Pop rhs then lhs, push `op(lhs, rhs)`.
    fn binary(
        &mut self,
        op: impl FnOnce(Value, Value) -> Result<Value, VmError>,
    ) -> Result<Flow, VmError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = op(lhs, rhs)?;
        self.push(result)?;
        Ok(Flow::Next)
    }

    fn arith(
        &mut self,
        float: fn(f64, f64) -> f64,
        big: fn(BigInt, BigInt) -> BigInt,
    ) -> Result<Flow, VmError> {
        let mismatch = self.assertion("operand kinds changed during dispatch");
        self.binary(|lhs, rhs| match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(float(a, b))),
            (Value::BigInt(a), Value::BigInt(b)) => Ok(Value::BigInt(big(a, b))),
            _ => Err(mismatch),
        })
    }

    pub(crate) fn exec_add(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let mismatch = self.assertion("operand kinds changed during dispatch");
        self.binary(|lhs, rhs| match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::BigInt(a), Value::BigInt(b)) => Ok(Value::BigInt(a + b)),
            (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
            _ => Err(mismatch),
        })
    }

    pub(crate) fn exec_sub(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.arith(|a, b| a - b, |a, b| a - b)
    }

    pub(crate) fn exec_mul(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.arith(|a, b| a * b, |a, b| a * b)
    }

    /// Division truncating toward zero.
    pub(crate) fn exec_div(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.arith(|a, b| (a / b).trunc(), |a, b| a / b)
    }

    pub(crate) fn exec_pow(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let mismatch = self.assertion("operand kinds changed during dispatch");
        self.binary(|lhs, rhs| match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a.powf(b))),
            (Value::BigInt(a), Value::BigInt(b)) => match b.to_u32() {
                Some(exp) => Ok(Value::BigInt(a.pow(exp))),
                None => Err(mismatch),
            },
            _ => Err(mismatch),
        })
    }

    pub(crate) fn exec_equal(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.binary(|lhs, rhs| Ok(Value::Bool(lhs == rhs)))
    }

    pub(crate) fn exec_nequal(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.binary(|lhs, rhs| Ok(Value::Bool(lhs != rhs)))
    }

    pub(crate) fn exec_or(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.binary(|lhs, rhs| Ok(Value::Bool(lhs.is_truthy() || rhs.is_truthy())))
    }

    pub(crate) fn exec_and(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.binary(|lhs, rhs| Ok(Value::Bool(lhs.is_truthy() && rhs.is_truthy())))
    }

    pub(crate) fn exec_xor(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.binary(|lhs, rhs| Ok(Value::Bool(lhs.is_truthy() != rhs.is_truthy())))
    }

    fn exec_ordering(&mut self, accept: fn(Ordering) -> bool) -> Result<Flow, VmError> {
        self.binary(|lhs, rhs| Ok(Value::Bool(compare(&lhs, &rhs).map(accept).unwrap_or(false))))
    }

    pub(crate) fn exec_lt(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.exec_ordering(Ordering::is_lt)
    }

    pub(crate) fn exec_lte(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.exec_ordering(Ordering::is_le)
    }

    pub(crate) fn exec_gt(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.exec_ordering(Ordering::is_gt)
    }

    pub(crate) fn exec_gte(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.exec_ordering(Ordering::is_ge)
    }

    pub(crate) fn exec_is_truthy(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let value = self.pop()?;
        self.push(Value::Bool(value.is_truthy()))?;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_is_falsy(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let value = self.pop()?;
        self.push(Value::Bool(!value.is_truthy()))?;
        Ok(Flow::Next)
    }

    // Stack shaping

    pub(crate) fn exec_imm(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let value = operand(imm)
            .cloned()
            .ok_or_else(|| self.assertion("operand is not an immediate value"))?;
        self.push(value)?;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_dup_head(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let head = self.peek(0)?.clone();
        self.push(head)?;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_swap(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let head = self.pop()?;
        let prehead = self.pop()?;
        self.push(head)?;
        self.push(prehead)?;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_pop_head(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.pop()?;
        Ok(Flow::Next)
    }

    /// Pop `n` values and push them as one array, bottom-most first.
    pub(crate) fn exec_pack(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let count = imm.and_then(Word::as_index).unwrap_or(0);
        let split = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or(VmError::StackUnderflow { at: self.pc })?;
        let items = self.stack.split_off(split);
        self.push(Value::Array(items))?;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_abort(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let reason = self.pop()?;
        Err(VmError::UserAbort {
            reason: reason.to_string(),
        })
    }

    pub(crate) fn exec_dbg(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        debug!(pc = self.pc, depth = self.depth, stack = ?self.stack, "DBG");
        Ok(Flow::Next)
    }

    // Registers

    pub(crate) fn exec_reg(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let register =
            register_operand(imm).ok_or_else(|| self.assertion("operand is not a register"))?;
        let value = self.pop()?;
        self.shared.borrow_mut().registers[register.index()] = value;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_unreg(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let register =
            register_operand(imm).ok_or_else(|| self.assertion("operand is not a register"))?;
        let value = self.register(register);
        self.push(value)?;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_inc(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let register =
            register_operand(imm).ok_or_else(|| self.assertion("operand is not a register"))?;
        let not_numeric = self.assertion("register is not numeric");
        let mut shared = self.shared.borrow_mut();
        match &mut shared.registers[register.index()] {
            Value::Number(n) => *n += 1.0,
            Value::BigInt(b) => *b += 1u32,
            _ => return Err(not_numeric),
        }
        Ok(Flow::Next)
    }

    /// Modifier register as a TO_INT radix; anything outside 2..=36 means 10.
    fn radix(&self) -> u32 {
        self.register(Register::Modifier)
            .as_index()
            .and_then(|r| u32::try_from(r).ok())
            .filter(|r| (2..=36).contains(r))
            .unwrap_or(10)
    }

    // Persistent slots and dynamic store

    pub(crate) fn exec_load(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let slot = imm
            .and_then(Word::as_index)
            .ok_or_else(|| self.assertion("operand is not a slot index"))?;
        let value = self
            .shared
            .borrow()
            .slots
            .get(slot)
            .cloned()
            .unwrap_or_default();
        self.push(value)?;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_mem(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let slot = imm
            .and_then(Word::as_index)
            .ok_or_else(|| self.assertion("operand is not a slot index"))?;
        let value = self.pop()?;
        let mut shared = self.shared.borrow_mut();
        if shared.slots.len() <= slot {
            shared.slots.resize(slot + 1, Value::Absent);
        }
        shared.slots[slot] = value;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_set(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let key = self.pop_key()?;
        let value = self.pop()?;
        self.shared.borrow_mut().store.insert(key, value);
        Ok(Flow::Next)
    }

    pub(crate) fn exec_get(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let key = self.pop_key()?;
        let value = self
            .shared
            .borrow()
            .store
            .get(&key)
            .cloned()
            .unwrap_or_default();
        self.push(value)?;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_unset(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let key = self.pop_key()?;
        self.shared.borrow_mut().store.remove(&key);
        Ok(Flow::Next)
    }

    fn pop_key(&mut self) -> Result<String, VmError> {
        let key = self.pop()?;
        key.as_key()
            .ok_or_else(|| self.assertion(format!("{key} is not a valid key")))
    }

    // Structured access

    pub(crate) fn exec_pick(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let key = self.pop()?;
        let object = self.pop()?;
        let picked = match object {
            Value::Array(mut items) => match array_index(&key) {
                Some(index) if index < items.len() => items.swap_remove(index),
                _ => Value::Absent,
            },
            Value::Map(mut entries) => key
                .as_key()
                .and_then(|k| entries.remove(&k))
                .unwrap_or_default(),
            _ => Value::Absent,
        };
        self.push(picked)?;
        Ok(Flow::Next)
    }

    /// Pop value and key, assign into the object left on the stack.
    pub(crate) fn exec_def(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let value = self.pop()?;
        let key = self.pop()?;
        let at = self.pc;
        let invalid = self.assertion(format!("invalid key {key}"));
        let object = self
            .stack
            .last_mut()
            .ok_or(VmError::StackUnderflow { at })?;
        match object {
            Value::Array(items) => match array_index(&key) {
                Some(index) if index < items.len() => items[index] = value,
                Some(index) if index == items.len() => items.push(value),
                _ => return Err(invalid),
            },
            Value::Map(entries) => {
                let key = key.as_key().ok_or(invalid)?;
                entries.insert(key, value);
            }
            _ => return Err(invalid),
        }
        Ok(Flow::Next)
    }

    pub(crate) fn exec_length(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let length = match self.pop()? {
            Value::Array(items) => items.len(),
            Value::String(s) => s.chars().count(),
            other => return Err(self.assertion(format!("cannot measure {}", other.kind()))),
        };
        self.push(Value::from(length))?;
        Ok(Flow::Next)
    }

    // Conversions

    pub(crate) fn exec_to_int(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let radix = self.radix();
        let head = self.pop()?;
        let converted = match &head {
            Value::String(s) => parse_int_prefix(s, radix),
            Value::Number(n) => BigInt::from_f64(n.trunc()),
            Value::BigInt(b) => Some(b.clone()),
            _ => None,
        };
        let converted =
            converted.ok_or_else(|| self.assertion(format!("cannot convert {head} to an integer")))?;
        self.push(Value::BigInt(converted))?;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_to_number(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let head = self.pop()?;
        let converted = match &head {
            Value::String(s) => parse_number(s),
            Value::BigInt(b) => b.to_f64(),
            Value::Number(n) => Some(*n),
            _ => None,
        };
        let converted =
            converted.ok_or_else(|| self.assertion(format!("cannot convert {head} to a number")))?;
        self.push(Value::Number(converted))?;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_to_string(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let head = self.pop()?;
        self.push(Value::String(head.to_string()))?;
        Ok(Flow::Next)
    }

    /// `[number, n]` keeps n decimals; `[array, n]` keeps n elements.
    pub(crate) fn exec_trunc(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let length = self.pop()?;
        let length = length
            .as_index()
            .ok_or_else(|| self.assertion(format!("invalid length {length}")))?;
        let truncated = match self.pop()? {
            Value::Number(n) => Value::Number(truncate_decimals(n, length)),
            Value::Array(mut items) => {
                items.truncate(length);
                Value::Array(items)
            }
            other => return Err(self.assertion(format!("cannot truncate {}", other.kind()))),
        };
        self.push(truncated)?;
        Ok(Flow::Next)
    }

    // Digest

    /// Hex when MODIFIER holds 0, base64 otherwise.
    fn encode_digest(&self, digest: &[u8]) -> String {
        if self.register(Register::Modifier) == Value::Number(0.0) {
            hex::encode(digest)
        } else {
            STANDARD.encode(digest)
        }
    }

    pub(crate) fn exec_sha256(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let input = self.pop()?;
        let digest = Sha256::digest(input.to_string().as_bytes());
        let encoded = self.encode_digest(&digest);
        self.push(Value::String(encoded))?;
        Ok(Flow::Next)
    }

    pub(crate) fn exec_sha512(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let input = self.pop()?;
        let digest = Sha512::digest(input.to_string().as_bytes());
        let encoded = self.encode_digest(&digest);
        self.push(Value::String(encoded))?;
        Ok(Flow::Next)
    }

    // Outputs

    pub(crate) fn exec_push_app(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let payload = self.pop()?;
        debug!(pc = self.pc, payload = %payload, "app emitted");
        self.shared.borrow_mut().apps.push(payload);
        Ok(Flow::Next)
    }

    pub(crate) fn exec_set_state_var(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        let key = self.pop()?.to_string();
        let value = self.pop()?.to_string();
        self.shared.borrow_mut().state_changes.insert(key, value);
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_complete_and_ordered() {
        assert_eq!(CATALOG.len(), ALL_OPCODES.len());
        for (spec, opcode) in CATALOG.iter().zip(ALL_OPCODES.iter()) {
            assert_eq!(spec.opcode, *opcode);
        }
    }

    #[test]
    fn lookup_finds_every_opcode() {
        for &opcode in &ALL_OPCODES {
            assert_eq!(lookup(opcode).opcode, opcode);
        }
    }

    #[test]
    fn fixed_gas_schedule() {
        let m = Machine::default();
        let cost = |op| lookup(op).cost(&m, None);
        assert_eq!(cost(Opcode::Add), 1);
        assert_eq!(cost(Opcode::Pow), 2);
        assert_eq!(cost(Opcode::Swap), 2);
        assert_eq!(cost(Opcode::ToString), 4);
        assert_eq!(cost(Opcode::Sha256), 15);
        assert_eq!(cost(Opcode::Sha512), 16);
        assert_eq!(cost(Opcode::Abort), 0);
        assert_eq!(cost(Opcode::Map), 0);
        assert_eq!(cost(Opcode::Nop), 0);
    }

    #[test]
    fn int_prefix_parsing() {
        assert_eq!(parse_int_prefix("42", 10), Some(BigInt::from(42)));
        assert_eq!(parse_int_prefix("  -17abc", 10), Some(BigInt::from(-17)));
        assert_eq!(parse_int_prefix("ff", 16), Some(BigInt::from(255)));
        assert_eq!(parse_int_prefix("101", 2), Some(BigInt::from(5)));
        assert_eq!(parse_int_prefix("abc", 10), None);
        assert_eq!(parse_int_prefix("", 10), None);
        assert_eq!(parse_int_prefix("-", 10), None);
    }

    #[test]
    fn number_parsing_rejects_non_finite() {
        assert_eq!(parse_number(" 2.5 "), Some(2.5));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("12px"), None);
    }

    #[test]
    fn decimal_truncation() {
        assert_eq!(truncate_decimals(3.14159, 2), 3.14);
        assert_eq!(truncate_decimals(-2.75, 0), -2.0);
        assert_eq!(truncate_decimals(1.5, 400), 1.5);
        assert_eq!(truncate_decimals(0.29, 2), 0.29);
        assert_eq!(truncate_decimals(1.13, 2), 1.13);
        assert_eq!(truncate_decimals(-0.29, 1), -0.2);
        assert_eq!(truncate_decimals(1e21, 2), 1e21);
    }

    #[test]
    fn mixed_numeric_ordering() {
        assert_eq!(
            compare(&Value::from(2), &Value::from(BigInt::from(3))),
            Some(Ordering::Less)
        );
        assert_eq!(compare(&Value::from("b"), &Value::from("a")), Some(Ordering::Greater));
        assert_eq!(compare(&Value::Number(f64::NAN), &Value::from(1)), None);
        assert_eq!(compare(&Value::from("1"), &Value::from(1)), None);
    }
}
