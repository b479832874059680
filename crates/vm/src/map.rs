//! MAP: apply a registered function across a bounded array in a nested
//! machine.
//!
//! Stack layout before `MAP <label>`, head last:
//! `[array, slot, max_len]` or `[array, slot, max_len, with_index]`.
//! Each element is written to `slot` (and its index to `slot + 1` when
//! `with_index` is true) before the callback runs. The results, in array
//! order, are pushed as one array.

use std::collections::BTreeMap;

use quill_common::{Opcode, Value, Word};
use tracing::debug;

use crate::catalog::Flow;
use crate::error::VmError;
use crate::machine::{LabelSpan, Machine};

/// Arguments of one MAP, as read from the stack.
struct MapArgs {
    /// A boolean flag sits on top of the arguments.
    flagged: bool,
    with_index: bool,
    max_len: usize,
    slot: usize,
    /// Highest slot written per element: `slot`, or `slot + 1` with an index.
    last_slot: usize,
}

impl Machine {
    /// Decode the MAP arguments without popping them.
    fn map_args(&self) -> Result<MapArgs, VmError> {
        let (flagged, with_index) = match self.peek(0)? {
            Value::Bool(flag) => (true, *flag),
            _ => (false, false),
        };
        let base = usize::from(flagged);
        if self.stack.len() < base + 3 {
            return Err(self.assertion(format!(
                "needs {} stack values, found {}",
                base + 3,
                self.stack.len()
            )));
        }
        let max_len = self
            .peek(base)?
            .as_index()
            .ok_or_else(|| self.assertion("maximum length must be a non-negative integer"))?;
        let slot = self
            .peek(base + 1)?
            .as_index()
            .ok_or_else(|| self.assertion("slot must be a non-negative integer"))?;
        let last_slot = slot
            .checked_add(usize::from(with_index))
            .ok_or_else(|| self.assertion("slot out of range"))?;
        Ok(MapArgs {
            flagged,
            with_index,
            max_len,
            slot,
            last_slot,
        })
    }

    pub(crate) fn assert_map(&self, imm: Option<&Word>) -> Result<(), VmError> {
        if imm.and_then(Word::as_label).is_none() {
            return Err(self.assertion("operand is not a label id"));
        }
        let args = self.map_args()?;
        let last_slot = args.last_slot;
        if last_slot >= self.options.max_slots {
            return Err(self.assertion(format!(
                "slot {last_slot} is outside 0..{}",
                self.options.max_slots
            )));
        }
        match self.peek(usize::from(args.flagged) + 2)? {
            Value::Array(_) => {}
            other => {
                return Err(self.assertion(format!("source must be an array, found {}", other.kind())))
            }
        }
        if self.depth + 1 > self.options.max_map_depth {
            return Err(self.assertion(format!(
                "nesting depth {} exceeds {}",
                self.depth + 1,
                self.options.max_map_depth
            )));
        }
        Ok(())
    }

    pub(crate) fn exec_map(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let at = self.pc;
        let label = imm
            .and_then(Word::as_label)
            .ok_or_else(|| self.assertion("operand is not a label id"))?;
        if !self.labels.contains_key(&label) {
            return Err(VmError::UndeclaredLabel { at, label });
        }

        let args = self.map_args()?;
        if args.flagged {
            self.pop()?;
        }
        self.pop()?;
        self.pop()?;
        let items = match self.pop()? {
            Value::Array(items) => items,
            other => return Err(self.assertion(format!("source must be an array, found {}", other.kind()))),
        };
        let items: Vec<Value> = items.into_iter().take(args.max_len).collect();

        let (mut memory, labels) = self.function_image();
        let count = items.len();
        append_unrolled_loop(&mut memory, &label, &args, items);
        if memory.len() > self.options.max_program_words {
            return Err(self.assertion(format!(
                "nested program has {} words (limit {})",
                memory.len(),
                self.options.max_program_words
            )));
        }

        debug!(label = %label, items = count, depth = self.depth + 1, "MAP spawned nested machine");
        let child = self.nested(memory, labels);
        self.child = Some(Box::new(child));
        self.drive_child()
    }

    /// Copy every registered top-level function body, return cells reset,
    /// and translate all registered spans into the copy's offsets.
    fn function_image(&self) -> (Vec<Word>, BTreeMap<String, LabelSpan>) {
        let mut spans: Vec<LabelSpan> = self.labels.values().copied().collect();
        spans.sort_by_key(|span| span.start);
        spans.dedup();

        // Blocks cover LABEL through the return cell: [start - 2, end + 2).
        let mut blocks: Vec<(usize, usize)> = Vec::new();
        for span in &spans {
            let block = (span.start.saturating_sub(2), span.end + 2);
            match blocks.last() {
                Some(&(_, last_end)) if block.1 <= last_end => {}
                _ => blocks.push(block),
            }
        }

        let mut memory = Vec::new();
        // (parent block start, child block start, parent block end)
        let mut placements = Vec::with_capacity(blocks.len());
        for &(start, end) in &blocks {
            let end = end.min(self.memory.len());
            placements.push((start, memory.len(), end));
            memory.extend(self.memory[start..end].iter().map(|word| match word {
                Word::Ret(_) => Word::SENTINEL,
                other => other.clone(),
            }));
        }

        let labels = self
            .labels
            .iter()
            .filter_map(|(name, span)| {
                placements
                    .iter()
                    .find(|(start, _, end)| *start <= span.start && span.end < *end)
                    .map(|&(start, child_start, _)| {
                        let shift = |offset: usize| offset - start + child_start;
                        let moved = LabelSpan {
                            start: shift(span.start),
                            end: shift(span.end),
                        };
                        (name.clone(), moved)
                    })
            })
            .collect();
        (memory, labels)
    }

    /// Run the in-flight child. Completion pushes its accumulator here.
    pub(crate) fn drive_child(&mut self) -> Result<Flow, VmError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(Flow::Next);
        };
        let output = child.run();
        if output.interruption.is_some() && output.error.is_none() {
            return Ok(Flow::Wait);
        }

        self.child = None;
        self.used_gas = self.used_gas.saturating_add(output.used_gas);
        if let Some(err) = output.error {
            debug!(pc = self.pc, depth = self.depth, "nested machine aborted");
            return Err(VmError::Nested(Box::new(err)));
        }
        let mut stack = output.stack;
        let results = stack.pop().ok_or(VmError::StackUnderflow { at: self.pc })?;
        debug!(pc = self.pc, depth = self.depth, gas = output.used_gas, "nested machine finished");
        self.push(results)?;
        Ok(Flow::Next)
    }
}

/// `IMM []`, then per element:
/// `IMM item; MEM slot; [IMM i; MEM slot+1;] IMM i; CALL label; DEF`.
fn append_unrolled_loop(memory: &mut Vec<Word>, label: &str, args: &MapArgs, items: Vec<Value>) {
    push_wide(memory, Opcode::Imm, Value::Array(Vec::new()));
    for (index, item) in items.into_iter().enumerate() {
        push_wide(memory, Opcode::Imm, item);
        push_wide(memory, Opcode::Mem, Value::from(args.slot));
        if args.with_index {
            push_wide(memory, Opcode::Imm, Value::from(index));
            push_wide(memory, Opcode::Mem, Value::from(args.last_slot));
        }
        push_wide(memory, Opcode::Imm, Value::from(index));
        push_wide(memory, Opcode::Call, Value::from(label));
        memory.push(Word::op(Opcode::Def));
    }
}

fn push_wide(memory: &mut Vec<Word>, opcode: Opcode, value: Value) {
    memory.push(Word::op(opcode));
    memory.push(Word::Imm(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrolled_loop_layout() {
        let mut memory = Vec::new();
        let args = MapArgs {
            flagged: true,
            with_index: true,
            max_len: 1,
            slot: 4,
            last_slot: 5,
        };
        append_unrolled_loop(&mut memory, "f", &args, vec![Value::from("x")]);
        assert_eq!(
            memory,
            vec![
                Word::op(Opcode::Imm),
                Word::Imm(Value::Array(vec![])),
                Word::op(Opcode::Imm),
                Word::imm("x"),
                Word::op(Opcode::Mem),
                Word::imm(4),
                Word::op(Opcode::Imm),
                Word::imm(0),
                Word::op(Opcode::Mem),
                Word::imm(5),
                Word::op(Opcode::Imm),
                Word::imm(0),
                Word::op(Opcode::Call),
                Word::imm("f"),
                Word::op(Opcode::Def),
            ]
        );
    }
}
