//! Quill virtual machine: executes word programs with gas metering.
//!
//! The VM is a stack machine with:
//! - An operand stack bounded at [`STACK_MAX`](limits::STACK_MAX) values
//! - A register file, persistent slots and a dynamic string-keyed store
//! - Functions declared with LABEL/END_LABEL and entered with CALL, which
//!   writes its return address into the cell after END_LABEL
//! - Ledger reads that suspend the machine until the host answers
//! - MAP, which runs a function across an array in a nested machine
//!
//! # Usage
//!
//! ```
//! use quill_common::{Opcode, Program, Value};
//! use quill_vm::{run, InitialContext};
//!
//! let program = Program::builder()
//!     .imm(5)
//!     .imm(3)
//!     .op(Opcode::Add)
//!     .build();
//!
//! let output = run(&program, &InitialContext::default()).unwrap();
//! assert!(output.is_complete());
//! assert_eq!(output.stack, vec![Value::from(8)]);
//! ```

pub mod catalog;
pub mod error;
pub mod execute;
pub mod host;
pub mod limits;
pub mod machine;
pub mod map;
pub mod options;
pub mod read;
pub mod snapshot;

pub use error::{ErrorKind, ResolveError, VmError};
pub use machine::{ExecutionOutput, LabelSpan, Machine, ReadMode, SharedState};
pub use options::{InitialContext, VmOptions};
pub use read::{Interruption, InterruptionKind, Resolver};
pub use snapshot::{Frame, Snapshot};

use quill_common::Program;

/// Load and run a program with default options, suspending on ledger reads.
///
/// # Errors
///
/// Returns [`VmError`] only if the program cannot be loaded. Runtime
/// failures are reported in [`ExecutionOutput::error`].
pub fn run(program: &Program, ctx: &InitialContext) -> Result<ExecutionOutput, VmError> {
    let mut machine = Machine::default();
    machine.load(program, ctx)?;
    Ok(machine.run())
}
