//! Serializable image of a machine, for suspending across processes.
//!
//! The shared state is captured once; restoring links every nested frame
//! back to the same shared cell.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use quill_common::{Opcode, Value, Word, REGISTER_COUNT};
use serde::{Deserialize, Serialize};

use crate::error::VmError;
use crate::machine::{LabelSpan, Machine, ReadMode, SharedState};
use crate::options::VmOptions;
use crate::read::Interruption;

/// Per-machine state. A suspended MAP child appears as `child`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub stack: Vec<Value>,
    pub memory: Vec<Word>,
    pub labels: BTreeMap<String, LabelSpan>,
    pub used_gas: u64,
    pub pc: usize,
    pub pending: Option<Interruption>,
    pub input: Option<Value>,
    pub depth: usize,
    pub halted: bool,
    pub fault: Option<VmError>,
    pub child: Option<Box<Frame>>,
}

/// A complete machine image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub shared: SharedState,
    pub frame: Frame,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl Machine {
    /// Capture the machine, including any suspended MAP child.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            shared: self.shared_state(),
            frame: self.frame(),
        }
    }

    fn frame(&self) -> Frame {
        Frame {
            stack: self.stack.clone(),
            memory: self.memory.clone(),
            labels: self.labels.clone(),
            used_gas: self.used_gas,
            pc: self.pc,
            pending: self.pending.clone(),
            input: self.input.clone(),
            depth: self.depth,
            halted: self.halted,
            fault: self.fault.clone(),
            child: self.child.as_ref().map(|child| Box::new(child.frame())),
        }
    }

    /// Rebuild a machine from a snapshot. The read mode is not part of the
    /// image and is supplied again by the host.
    ///
    /// A register file of the wrong length is padded with absent values or
    /// cut to [`REGISTER_COUNT`].
    pub fn restore(snapshot: Snapshot, options: VmOptions, reads: ReadMode) -> Machine {
        let mut state = snapshot.shared;
        state.registers.resize(REGISTER_COUNT, Value::Absent);
        let shared = Rc::new(RefCell::new(state));
        Machine::from_frame(snapshot.frame, &shared, &options, &reads)
    }

    fn from_frame(
        frame: Frame,
        shared: &Rc<RefCell<SharedState>>,
        options: &VmOptions,
        reads: &ReadMode,
    ) -> Machine {
        let child = frame
            .child
            .map(|child| Box::new(Machine::from_frame(*child, shared, options, reads)));
        Machine {
            stack: frame.stack,
            memory: frame.memory,
            shared: Rc::clone(shared),
            labels: frame.labels,
            used_gas: frame.used_gas,
            pc: frame.pc,
            pending: frame.pending,
            input: frame.input,
            child,
            depth: frame.depth,
            halted: frame.halted,
            fault: frame.fault,
            current: Opcode::Nop,
            reads: reads.clone(),
            options: options.clone(),
        }
    }
}
