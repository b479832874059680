//! Tunable execution options and the initial execution context.

use serde::{Deserialize, Serialize};

use crate::limits::{DEFAULT_MAX_MAP_DEPTH, DEFAULT_MAX_PROGRAM_WORDS, DEFAULT_MAX_SLOTS};

/// Limits a host may tune per machine. Missing fields take their defaults,
/// so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmOptions {
    /// Persistent slots are addressed by `0..max_slots`.
    pub max_slots: usize,
    /// Deepest allowed chain of nested MAP machines.
    pub max_map_depth: usize,
    /// Largest program `load` accepts, in words.
    pub max_program_words: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_slots: DEFAULT_MAX_SLOTS,
            max_map_depth: DEFAULT_MAX_MAP_DEPTH,
            max_program_words: DEFAULT_MAX_PROGRAM_WORDS,
        }
    }
}

impl VmOptions {
    /// Parse options from JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Data the host provides at load time. It fills the read-only registers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialContext {
    /// Address of the program being executed.
    pub this_address: String,
    /// Descriptor of the triggering event, as the host sees it.
    pub trigger: serde_json::Value,
    /// Block position counter at trigger time.
    pub mci: u64,
    /// Timestamp at trigger time.
    pub timestamp: u64,
}

impl InitialContext {
    /// Parse a context from JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        assert_eq!(VmOptions::from_json("{}").unwrap(), VmOptions::default());
    }

    #[test]
    fn partial_options_override() {
        let opts = VmOptions::from_json(r#"{"max_map_depth": 2}"#).unwrap();
        assert_eq!(opts.max_map_depth, 2);
        assert_eq!(opts.max_slots, DEFAULT_MAX_SLOTS);
    }

    #[test]
    fn context_from_json() {
        let ctx = InitialContext::from_json(
            r#"{"this_address": "AAAA", "trigger": {"unit": "u1"}, "mci": 12}"#,
        )
        .unwrap();
        assert_eq!(ctx.this_address, "AAAA");
        assert_eq!(ctx.mci, 12);
        assert_eq!(ctx.timestamp, 0);
        assert_eq!(ctx.trigger["unit"], "u1");
    }
}
