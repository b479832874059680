//! Reference host loop for suspending machines.

use tracing::debug;

use crate::error::VmError;
use crate::machine::{ExecutionOutput, Machine};
use crate::read::Resolver;

/// Run `machine` to a terminal result, answering every interruption with
/// `resolver`.
///
/// A resolver failure aborts the machine with a `Resolver` error.
pub fn drive(machine: &mut Machine, resolver: &dyn Resolver) -> ExecutionOutput {
    let mut output = machine.run();
    while let Some(request) = output.interruption.take() {
        debug!(kind = ?request.kind(), gas = output.used_gas, "host answering interruption");
        let answer = resolver
            .resolve(&request)
            .map_err(|err| VmError::Resolver {
                at: machine.pc(),
                reason: err.to_string(),
            })
            .and_then(|value| machine.write(value));
        if let Err(err) = answer {
            return machine.fail(err);
        }
        output = machine.run();
    }
    output
}
