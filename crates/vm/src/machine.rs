//! VM state management: stack, program memory, shared state, labels.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use quill_common::{Opcode, Program, Register, Value, Word, REGISTER_COUNT};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::VmError;
use crate::limits::STACK_MAX;
use crate::options::{InitialContext, VmOptions};
use crate::read::{Interruption, Resolver};

/// State a MAP child shares with its parent by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    /// Register file, indexed by [`Register::index`].
    pub registers: Vec<Value>,
    /// Persistent slots, grown on demand by MEM.
    pub slots: Vec<Value>,
    /// Dynamic string-keyed store (SET/GET/UNSET).
    pub store: BTreeMap<String, Value>,
    /// Emitted app payloads, in emission order.
    pub apps: Vec<Value>,
    /// Persisted state changes.
    pub state_changes: BTreeMap<String, String>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            registers: vec![Value::Absent; REGISTER_COUNT],
            slots: Vec::new(),
            store: BTreeMap::new(),
            apps: Vec::new(),
            state_changes: BTreeMap::new(),
        }
    }
}

impl SharedState {
    /// Fresh state with the read-only registers filled from `ctx`.
    pub fn with_context(ctx: &InitialContext) -> Self {
        let mut state = Self::default();
        state.registers[Register::Trigger.index()] = Value::from_json(&ctx.trigger);
        state.registers[Register::ThisAddress.index()] = Value::from(ctx.this_address.as_str());
        state.registers[Register::Mci.index()] = Value::Number(ctx.mci as f64);
        state.registers[Register::Timestamp.index()] = Value::Number(ctx.timestamp as f64);
        state
    }
}

/// A registered function body: `start` is the first body word, `end` the
/// offset of the matching END_LABEL. The return cell sits at `end + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSpan {
    pub start: usize,
    pub end: usize,
}

/// How ledger reads are answered. Fixed for the lifetime of a machine and
/// inherited by MAP children.
#[derive(Clone, Default)]
pub enum ReadMode {
    /// Return an [`Interruption`] from `run()` and wait for `write()`.
    #[default]
    Suspend,
    /// Ask the resolver and push its answer immediately.
    Resolve(Rc<dyn Resolver>),
}

impl fmt::Debug for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadMode::Suspend => f.write_str("Suspend"),
            ReadMode::Resolve(_) => f.write_str("Resolve(..)"),
        }
    }
}

/// Result of one `run()`.
///
/// Exactly one of three outcomes: `error` is set (aborted), `interruption`
/// is set (suspended), or neither (completed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub stack: Vec<Value>,
    pub used_gas: u64,
    pub state_changes: BTreeMap<String, String>,
    pub apps: Vec<Value>,
    pub error: Option<VmError>,
    pub interruption: Option<Interruption>,
}

impl ExecutionOutput {
    /// True when execution ran to the end without error or suspension.
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.interruption.is_none()
    }

    /// Top of the final stack.
    pub fn head(&self) -> Option<&Value> {
        self.stack.last()
    }
}

/// The Quill virtual machine.
pub struct Machine {
    /// Operand stack.
    pub(crate) stack: Vec<Value>,
    /// Program memory. Mutated at runtime only by CALL and END_LABEL.
    pub(crate) memory: Vec<Word>,
    /// Registers, slots, store, apps and state changes.
    pub(crate) shared: Rc<RefCell<SharedState>>,
    /// Registered function bodies, by label id.
    pub(crate) labels: BTreeMap<String, LabelSpan>,
    /// Gas charged by this machine, excluding an in-flight child.
    pub(crate) used_gas: u64,
    /// Program counter (word offset).
    pub(crate) pc: usize,
    /// Outstanding ledger read, if suspended.
    pub(crate) pending: Option<Interruption>,
    /// Host answer to `pending`, pushed on the next `run()`.
    pub(crate) input: Option<Value>,
    /// In-flight MAP child.
    pub(crate) child: Option<Box<Machine>>,
    /// Nesting depth: 0 for a top-level machine.
    pub(crate) depth: usize,
    /// Set once execution has completed cleanly.
    pub(crate) halted: bool,
    /// Set once execution has aborted.
    pub(crate) fault: Option<VmError>,
    /// Opcode being evaluated, for assertion messages.
    pub(crate) current: Opcode,
    pub(crate) reads: ReadMode,
    pub(crate) options: VmOptions,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &self.pc)
            .field("stack", &self.stack)
            .field("used_gas", &self.used_gas)
            .field("depth", &self.depth)
            .field("reads", &self.reads)
            .finish_non_exhaustive()
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new(VmOptions::default(), ReadMode::Suspend)
    }
}

impl Machine {
    /// Create an empty machine. Call [`Machine::load`] before running.
    pub fn new(options: VmOptions, reads: ReadMode) -> Self {
        Self {
            stack: Vec::new(),
            memory: Vec::new(),
            shared: Rc::new(RefCell::new(SharedState::default())),
            labels: BTreeMap::new(),
            used_gas: 0,
            pc: 0,
            pending: None,
            input: None,
            child: None,
            depth: 0,
            halted: false,
            fault: None,
            current: Opcode::Nop,
            reads,
            options,
        }
    }

    /// Machine answering ledger reads with `resolver`.
    pub fn with_resolver(options: VmOptions, resolver: Rc<dyn Resolver>) -> Self {
        Machine::new(options, ReadMode::Resolve(resolver))
    }

    /// Child machine for MAP: shares this machine's state, owns its stack,
    /// program and labels.
    pub(crate) fn nested(&self, memory: Vec<Word>, labels: BTreeMap<String, LabelSpan>) -> Self {
        Self {
            stack: Vec::new(),
            memory,
            shared: Rc::clone(&self.shared),
            labels,
            used_gas: 0,
            pc: 0,
            pending: None,
            input: None,
            child: None,
            depth: self.depth + 1,
            halted: false,
            fault: None,
            current: Opcode::Nop,
            reads: self.reads.clone(),
            options: self.options.clone(),
        }
    }

    /// Load a program and reset all execution state.
    ///
    /// The read-only registers are populated from `ctx`. Everything from a
    /// previous invocation is discarded.
    pub fn load(&mut self, program: &Program, ctx: &InitialContext) -> Result<(), VmError> {
        if program.len() > self.options.max_program_words {
            return Err(VmError::ProgramTooLarge {
                words: program.len(),
                limit: self.options.max_program_words,
            });
        }
        self.stack.clear();
        self.memory = program.words.clone();
        self.shared = Rc::new(RefCell::new(SharedState::with_context(ctx)));
        self.labels.clear();
        self.used_gas = 0;
        self.pc = 0;
        self.pending = None;
        self.input = None;
        self.child = None;
        self.depth = 0;
        self.halted = false;
        self.fault = None;
        self.current = Opcode::Nop;
        debug!(words = program.len(), "program loaded");
        Ok(())
    }

    /// Provide the host's answer to the outstanding interruption.
    ///
    /// The value is pushed when `run()` is next called. If a MAP child is
    /// suspended, the answer is forwarded to it.
    pub fn write(&mut self, value: Value) -> Result<(), VmError> {
        if let Some(child) = self.child.as_mut() {
            return child.write(value);
        }
        if self.pending.is_none() {
            return Err(VmError::NothingToResume);
        }
        if self.input.is_some() {
            return Err(VmError::InputPending);
        }
        self.input = Some(value);
        Ok(())
    }

    /// Gas used so far, including an in-flight MAP child.
    pub fn used_gas(&self) -> u64 {
        self.used_gas
            + self
                .child
                .as_ref()
                .map(|child| child.used_gas())
                .unwrap_or(0)
    }

    /// Current program counter.
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Current operand stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// Program memory, including any return addresses written by CALL.
    pub fn memory(&self) -> &[Word] {
        &self.memory
    }

    /// Registered labels.
    pub fn labels(&self) -> &BTreeMap<String, LabelSpan> {
        &self.labels
    }

    /// A copy of the shared state.
    pub fn shared_state(&self) -> SharedState {
        self.shared.borrow().clone()
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// The outstanding interruption, looking through a suspended MAP child.
    pub fn interruption(&self) -> Option<Interruption> {
        self.child
            .as_ref()
            .and_then(|child| child.interruption())
            .or_else(|| self.pending.clone())
    }

    /// Snapshot of the machine as an [`ExecutionOutput`].
    pub fn output(&self) -> ExecutionOutput {
        let shared = self.shared.borrow();
        ExecutionOutput {
            stack: self.stack.clone(),
            used_gas: self.used_gas(),
            state_changes: shared.state_changes.clone(),
            apps: shared.apps.clone(),
            error: self.fault.clone(),
            interruption: if self.fault.is_some() {
                None
            } else {
                self.interruption()
            },
        }
    }

    /// Record a terminal error and report it.
    pub(crate) fn fail(&mut self, error: VmError) -> ExecutionOutput {
        debug!(pc = self.pc, depth = self.depth, error = %error, "execution aborted");
        self.child = None;
        self.pending = None;
        self.input = None;
        self.fault = Some(error);
        self.output()
    }

    /// Push a value onto the stack, checking for overflow.
    pub(crate) fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.stack.len() >= STACK_MAX {
            return Err(VmError::StackOverflow { at: self.pc });
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pop a value from the stack.
    pub(crate) fn pop(&mut self) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or(VmError::StackUnderflow { at: self.pc })
    }

    /// Borrow the value `depth` positions below the head (0 = head).
    pub(crate) fn peek(&self, depth: usize) -> Result<&Value, VmError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.stack.get(i))
            .ok_or(VmError::StackUnderflow { at: self.pc })
    }

    /// Precondition failure for the opcode being evaluated.
    pub(crate) fn assertion(&self, reason: impl Into<String>) -> VmError {
        VmError::Assertion {
            at: self.pc,
            opcode: self.current,
            reason: reason.into(),
        }
    }

    pub(crate) fn register(&self, register: Register) -> Value {
        self.shared.borrow().registers[register.index()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_peek() {
        let mut m = Machine::default();
        m.push(Value::from(1)).unwrap();
        m.push(Value::from(2)).unwrap();
        assert_eq!(m.peek(0).unwrap(), &Value::from(2));
        assert_eq!(m.peek(1).unwrap(), &Value::from(1));
        assert!(m.peek(2).is_err());
        assert_eq!(m.pop().unwrap(), Value::from(2));
    }

    #[test]
    fn push_stops_at_stack_max() {
        let mut m = Machine::default();
        for i in 0..STACK_MAX {
            m.push(Value::from(i)).unwrap();
        }
        assert_eq!(
            m.push(Value::Null),
            Err(VmError::StackOverflow { at: 0 })
        );
        assert_eq!(m.stack().len(), STACK_MAX);
    }

    #[test]
    fn pop_empty_underflows() {
        let mut m = Machine::default();
        assert_eq!(m.pop(), Err(VmError::StackUnderflow { at: 0 }));
    }

    #[test]
    fn load_fills_read_only_registers() {
        let mut m = Machine::default();
        let ctx = InitialContext {
            this_address: "ME".into(),
            trigger: serde_json::json!({"amount": 5}),
            mci: 7,
            timestamp: 1_700_000_000,
        };
        m.load(&Program::default(), &ctx).unwrap();
        assert_eq!(m.register(Register::ThisAddress), Value::from("ME"));
        assert_eq!(m.register(Register::Mci), Value::from(7));
        assert_eq!(m.register(Register::Timestamp), Value::from(1_700_000_000i64));
        assert_eq!(m.register(Register::Modifier), Value::Absent);
    }

    #[test]
    fn load_rejects_oversized_program() {
        let mut m = Machine::new(
            VmOptions {
                max_program_words: 2,
                ..VmOptions::default()
            },
            ReadMode::Suspend,
        );
        let program = Program::new(vec![Word::SENTINEL; 3]);
        assert_eq!(
            m.load(&program, &InitialContext::default()),
            Err(VmError::ProgramTooLarge { words: 3, limit: 2 })
        );
    }

    #[test]
    fn write_without_interruption_is_rejected() {
        let mut m = Machine::default();
        assert_eq!(m.write(Value::from(1)), Err(VmError::NothingToResume));
    }
}
