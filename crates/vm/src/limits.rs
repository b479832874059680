//! Hard limits and the gas schedule constants.
//!
//! Tunable limits live in [`VmOptions`](crate::VmOptions); everything here
//! is part of the execution contract and never changes between runs.

/// Maximum operand stack depth. Pushing past it is a stack fault.
pub const STACK_MAX: usize = 128;

/// Gas for READ of a context argument (answered from a register).
pub const READ_CONTEXT_GAS: u64 = 1;

/// Gas for READ of a ledger argument (answered by the host).
pub const READ_LEDGER_GAS: u64 = 1000;

/// Base gas for PUSH_APP, before the payload length is added.
pub const PUSH_APP_BASE_GAS: u64 = 1000;

/// Base gas for SET_STATE_VAR, before key and value lengths are added.
pub const STATE_VAR_BASE_GAS: u64 = 100;

/// Default number of persistent slots a program may address.
pub const DEFAULT_MAX_SLOTS: usize = 4096;

/// Default nesting depth for MAP inside MAP callbacks.
pub const DEFAULT_MAX_MAP_DEPTH: usize = 8;

/// Default program size accepted by `load`.
pub const DEFAULT_MAX_PROGRAM_WORDS: usize = 65_536;

/// App kinds PUSH_APP accepts in a payload's `app` field.
pub const APP_KINDS: [&str; 4] = ["payment", "data", "data_feed", "state"];

/// Largest big integer POW may produce, in bits.
pub const MAX_BIGINT_POW_BITS: u64 = 1 << 16;
