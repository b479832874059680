//! Main execution loop and the label/call mechanism.

use quill_common::{Opcode, Register, Value, Word};
use tracing::{debug, trace};

use crate::catalog::{self, Flow};
use crate::error::VmError;
use crate::machine::{ExecutionOutput, LabelSpan, Machine};

/// Whether the loop keeps fetching after a step.
enum Control {
    Continue,
    Stop,
}

impl Machine {
    /// Execute until the program ends, aborts or suspends.
    ///
    /// Calling `run()` again after a suspension resumes it: the value
    /// given to [`Machine::write`] is pushed before any further fetch. If
    /// nothing has been written yet the same interruption is returned.
    /// After completion or an abort, `run()` returns the final output again.
    pub fn run(&mut self) -> ExecutionOutput {
        if self.halted || self.fault.is_some() {
            return self.output();
        }
        match self.resume() {
            Ok(true) => {}
            Ok(false) => return self.output(),
            Err(err) => return self.fail(err),
        }
        loop {
            match self.step() {
                Ok(Control::Continue) => {}
                Ok(Control::Stop) => return self.output(),
                Err(err) => return self.fail(err),
            }
        }
    }

    /// Deliver pending host input. Returns false while still waiting.
    fn resume(&mut self) -> Result<bool, VmError> {
        if self.child.is_some() {
            return match self.drive_child()? {
                Flow::Wait => Ok(false),
                _ => {
                    self.pc += Opcode::Map.width();
                    Ok(true)
                }
            };
        }
        if self.pending.is_some() {
            let Some(value) = self.input.take() else {
                return Ok(false);
            };
            self.pending = None;
            debug!(pc = self.pc, depth = self.depth, value = %value, "resumed with host input");
            self.push(value)?;
        }
        Ok(true)
    }

    /// Fetch, check, charge and dispatch one instruction.
    fn step(&mut self) -> Result<Control, VmError> {
        let at = self.pc;
        let code = match self.memory.get(at) {
            None => {
                self.halted = true;
                return Ok(Control::Stop);
            }
            Some(Word::Op(code)) => *code,
            Some(_) => return Err(VmError::ExpectedOpcode { at }),
        };
        let opcode = Opcode::try_from(code).map_err(|_| VmError::UnknownOpcode { at, code })?;
        self.current = opcode;

        let spec = catalog::lookup(opcode);

        // Asserts inspect the operand, so it is fetched before them. A
        // truncated instruction still pays for itself when its arity holds.
        let imm = if opcode.is_wide() {
            match self.memory.get(at + 1) {
                Some(word) => Some(word.clone()),
                None => {
                    if self.stack.len() >= spec.arity {
                        let gas = spec.cost(self, None);
                        self.used_gas = self.used_gas.saturating_add(gas);
                    }
                    return Err(VmError::MissingImmediate { at, opcode });
                }
            }
        } else {
            None
        };

        if self.stack.len() < spec.arity {
            return Err(self.assertion(format!(
                "needs {} stack values, found {}",
                spec.arity,
                self.stack.len()
            )));
        }
        if let Some(check) = spec.assert {
            check(self, imm.as_ref())?;
        }
        let gas = spec.cost(self, imm.as_ref());
        self.used_gas = self.used_gas.saturating_add(gas);
        trace!(pc = at, depth = self.depth, opcode = %opcode, gas, stack = self.stack.len(), "dispatch");

        match (spec.exec)(self, imm.as_ref())? {
            Flow::Next => {
                self.pc = at + opcode.width();
                Ok(Control::Continue)
            }
            Flow::Jump(target) => {
                self.pc = target;
                Ok(Control::Continue)
            }
            Flow::Halt => {
                debug!(pc = at, depth = self.depth, gas = self.used_gas, "halted");
                self.halted = true;
                Ok(Control::Stop)
            }
            Flow::Suspend(interruption) => {
                self.pc = at + opcode.width();
                debug!(pc = at, depth = self.depth, kind = ?interruption.kind(), "suspended");
                self.pending = Some(interruption);
                Ok(Control::Stop)
            }
            Flow::Wait => Ok(Control::Stop),
        }
    }

    /// Offset of the END_LABEL closing a body that starts at `from`,
    /// skipping nested LABEL/END_LABEL pairs and operand words.
    pub(crate) fn find_end_label(&self, from: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut pc = from;
        while let Some(word) = self.memory.get(pc) {
            let width = match word {
                Word::Op(code) => match Opcode::try_from(*code) {
                    Ok(Opcode::Label) => {
                        depth += 1;
                        2
                    }
                    Ok(Opcode::EndLabel) => {
                        if depth == 0 {
                            return Some(pc);
                        }
                        depth -= 1;
                        2
                    }
                    Ok(op) => op.width(),
                    Err(_) => 1,
                },
                _ => 1,
            };
            pc += width;
        }
        None
    }

    pub(crate) fn assert_label_operand(&self, imm: Option<&Word>) -> Result<(), VmError> {
        imm.and_then(Word::as_label)
            .map(|_| ())
            .ok_or_else(|| self.assertion("operand is not a label id"))
    }

    pub(crate) fn assert_end_label(&self, imm: Option<&Word>) -> Result<(), VmError> {
        match imm {
            Some(Word::Ret(_)) => Ok(()),
            Some(word) if word.is_sentinel() => Ok(()),
            _ => Err(VmError::MalformedReturnCell { at: self.pc + 1 }),
        }
    }

    fn label_operand(&self, imm: Option<&Word>) -> Result<String, VmError> {
        imm.and_then(Word::as_label)
            .ok_or_else(|| self.assertion("operand is not a label id"))
    }

    /// Register the body on first arrival and jump past it.
    pub(crate) fn exec_label(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let at = self.pc;
        let label = self.label_operand(imm)?;
        let start = at + Opcode::Label.width();
        let end = self
            .find_end_label(start)
            .ok_or_else(|| VmError::UnmatchedLabel {
                at,
                label: label.clone(),
            })?;
        let span = LabelSpan { start, end };
        match self.labels.get(&label) {
            // Arriving again at the same declaration, e.g. after a backward jump.
            Some(existing) if *existing == span => {}
            Some(_) => return Err(VmError::DuplicateLabel { at, label }),
            None => {
                debug!(label = %label, start, end, depth = self.depth, "label registered");
                self.labels.insert(label, span);
            }
        }
        Ok(Flow::Jump(end + Opcode::EndLabel.width()))
    }

    /// Store the return address in the callee's cell and enter its body.
    pub(crate) fn exec_call(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let at = self.pc;
        let label = self.label_operand(imm)?;
        let Some(span) = self.labels.get(&label).copied() else {
            return Err(VmError::UndeclaredLabel { at, label });
        };
        let cell = span.end + 1;
        match self.memory.get(cell) {
            Some(Word::Ret(_)) => Err(VmError::ReentrantCall { at, label }),
            Some(word) if word.is_sentinel() => {
                self.memory[cell] = Word::Ret(at);
                Ok(Flow::Jump(span.start))
            }
            _ => Err(VmError::MalformedReturnCell { at: cell }),
        }
    }

    /// Return to the instruction after the CALL recorded in the cell.
    pub(crate) fn exec_end_label(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        let cell = self.pc + 1;
        match imm {
            Some(Word::Ret(caller)) => {
                self.memory[cell] = Word::SENTINEL;
                Ok(Flow::Jump(caller + Opcode::Call.width()))
            }
            Some(word) if word.is_sentinel() => Ok(Flow::Next),
            _ => Err(VmError::MalformedReturnCell { at: cell }),
        }
    }

    pub(crate) fn exec_ijmp(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        imm.and_then(Word::as_index)
            .map(Flow::Jump)
            .ok_or_else(|| self.assertion("operand is not a program offset"))
    }

    /// Target of a relative skip: offsets count from the next instruction.
    fn skip_target(&self, imm: Option<&Word>) -> Option<usize> {
        let offset = imm.and_then(Word::as_imm).and_then(Value::as_offset)?;
        let next = i64::try_from(self.pc + 2).ok()?;
        usize::try_from(next.checked_add(offset)?).ok()
    }

    pub(crate) fn assert_skip(&self, imm: Option<&Word>) -> Result<(), VmError> {
        self.skip_target(imm)
            .map(|_| ())
            .ok_or_else(|| self.assertion("skip offset is not an integer or lands before 0"))
    }

    fn skip_if(&mut self, imm: Option<&Word>, cond: fn(&Value, &Value) -> bool) -> Result<Flow, VmError> {
        let target = self
            .skip_target(imm)
            .ok_or_else(|| self.assertion("invalid skip offset"))?;
        let cmp1 = self.pop()?;
        let cmp2 = self.pop()?;
        Ok(if cond(&cmp2, &cmp1) {
            Flow::Jump(target)
        } else {
            Flow::Next
        })
    }

    pub(crate) fn exec_skip(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        self.skip_target(imm)
            .map(Flow::Jump)
            .ok_or_else(|| self.assertion("invalid skip offset"))
    }

    pub(crate) fn exec_skip_eq(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        self.skip_if(imm, |a, b| a == b)
    }

    pub(crate) fn exec_skip_neq(&mut self, imm: Option<&Word>) -> Result<Flow, VmError> {
        self.skip_if(imm, |a, b| a != b)
    }

    fn jump_if(&mut self, cond: fn(&Value, &Value) -> bool) -> Result<Flow, VmError> {
        let target = self
            .register(Register::Jump)
            .as_index()
            .ok_or_else(|| self.assertion("JUMP register does not hold a program offset"))?;
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        Ok(if cond(&lhs, &rhs) {
            Flow::Jump(target)
        } else {
            Flow::Next
        })
    }

    pub(crate) fn exec_jeq(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.jump_if(|a, b| a == b)
    }

    pub(crate) fn exec_jne(&mut self, _imm: Option<&Word>) -> Result<Flow, VmError> {
        self.jump_if(|a, b| a != b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::InitialContext;
    use quill_common::Program;

    fn machine(program: Program) -> Machine {
        let mut m = Machine::default();
        m.load(&program, &InitialContext::default()).unwrap();
        m
    }

    #[test]
    fn find_end_label_skips_nested_bodies() {
        let program = Program::builder()
            .function(
                "outer",
                Program::builder().function("inner", Program::builder().op(Opcode::DupHead)),
            )
            .build();
        let m = machine(program);
        // outer: LABEL@0, inner LABEL@2, inner END_LABEL@5, outer END_LABEL@7
        assert_eq!(m.find_end_label(2), Some(7));
        assert_eq!(m.find_end_label(4), Some(5));
    }

    #[test]
    fn find_end_label_ignores_operand_words() {
        // IMM 19 must not be mistaken for END_LABEL.
        let program = Program::new(vec![
            Word::op(Opcode::Label),
            Word::imm("f"),
            Word::op(Opcode::Imm),
            Word::Op(Opcode::EndLabel.code()),
            Word::op(Opcode::EndLabel),
            Word::SENTINEL,
        ]);
        let m = machine(program);
        assert_eq!(m.find_end_label(2), Some(4));
    }

    #[test]
    fn missing_end_label() {
        let program = Program::builder().wide(Opcode::Label, "f").imm(1).build();
        let out = machine(program).run();
        assert_eq!(
            out.error,
            Some(VmError::UnmatchedLabel {
                at: 0,
                label: "f".into()
            })
        );
    }

    #[test]
    fn call_writes_and_end_label_clears_return_cell() {
        let program = Program::builder()
            .function("f", Program::builder().imm(1))
            .wide(Opcode::Call, "f")
            .build();
        let mut m = machine(program);
        let out = m.run();
        assert!(out.is_complete());
        assert_eq!(out.stack, vec![Value::from(1)]);
        assert!(m.memory()[5].is_sentinel());
        assert_eq!(m.labels()["f"], LabelSpan { start: 2, end: 4 });
    }

    #[test]
    fn skip_offsets_are_relative_to_next_instruction() {
        let program = Program::builder()
            .wide(Opcode::Skip, 2)
            .imm("skipped")
            .imm("kept")
            .build();
        let out = machine(program).run();
        assert_eq!(out.stack, vec![Value::from("kept")]);
    }

    #[test]
    fn skip_before_start_is_rejected() {
        let program = Program::builder().wide(Opcode::Skip, -5).build();
        let out = machine(program).run();
        assert!(matches!(out.error, Some(VmError::Assertion { at: 0, .. })));
        assert_eq!(out.used_gas, 0);
    }
}
