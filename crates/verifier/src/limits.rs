//! Limits and operand checks for Quill programs.
//!
//! Enforces the program size bound and checks that every operand names
//! something that exists: a slot, a register, a READ argument, a target
//! inside the program.

use crate::error::VerifyError;
use crate::structural::{Instruction, ProgramContext};
use quill_common::{Opcode, ReadArgument, Register, Word};

/// Maximum program size in words.
pub const MAX_PROGRAM_WORDS: usize = 65_536;

/// Number of persistent slots a program may address.
pub const MAX_SLOTS: usize = 4_096;

/// Check the program size.
pub fn check_size(words: &[Word]) -> Vec<VerifyError> {
    if words.len() > MAX_PROGRAM_WORDS {
        vec![VerifyError::ProgramTooLarge {
            words: words.len(),
            limit: MAX_PROGRAM_WORDS,
        }]
    } else {
        Vec::new()
    }
}

/// Check the operand of every decoded instruction.
pub fn check_operands(ctx: &ProgramContext) -> Vec<VerifyError> {
    let mut errors = Vec::new();
    for instr in &ctx.instructions {
        check_instruction(instr, ctx.len, &mut errors);
    }
    errors
}

fn check_instruction(instr: &Instruction, len: usize, errors: &mut Vec<VerifyError>) {
    let at = instr.at;
    let opcode = instr.opcode;
    // Missing or non-immediate operands were reported while decoding.
    let Some(Word::Imm(value)) = instr.operand.as_ref() else {
        return;
    };

    match opcode {
        Opcode::Load | Opcode::Mem => {
            if !value.as_index().is_some_and(|slot| slot < MAX_SLOTS) {
                errors.push(VerifyError::InvalidSlot { at, opcode });
            }
        }
        Opcode::Reg | Opcode::Unreg | Opcode::Inc => {
            let register = value
                .as_index()
                .and_then(|i| u16::try_from(i).ok())
                .and_then(|i| Register::try_from(i).ok());
            match register {
                None => errors.push(VerifyError::InvalidRegister { at, opcode }),
                Some(register) if opcode != Opcode::Unreg && register.is_read_only() => {
                    errors.push(VerifyError::ReadOnlyRegister {
                        at,
                        opcode,
                        register,
                    })
                }
                Some(_) => {}
            }
        }
        Opcode::Read => {
            let argument = value
                .as_index()
                .and_then(|i| u16::try_from(i).ok())
                .and_then(|i| ReadArgument::try_from(i).ok());
            if argument.is_none() {
                errors.push(VerifyError::InvalidReadArgument { at });
            }
        }
        Opcode::Skip | Opcode::SkipEq | Opcode::SkipNeq => {
            let target = value
                .as_offset()
                .and_then(|offset| i64::try_from(at + 2).ok()?.checked_add(offset));
            let inside = target
                .and_then(|t| usize::try_from(t).ok())
                .is_some_and(|t| t <= len);
            if !inside {
                errors.push(VerifyError::InvalidSkip { at, opcode });
            }
        }
        Opcode::Ijmp => {
            if value.as_index().is_none() {
                errors.push(VerifyError::InvalidJump { at });
            }
        }
        Opcode::Pack => {
            if value.as_index().is_none() {
                errors.push(VerifyError::InvalidCount { at });
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structural::check_structural;
    use quill_common::Program;

    fn operand_errors(program: Program) -> Vec<VerifyError> {
        let (ctx, _) = check_structural(&program.words);
        check_operands(&ctx)
    }

    #[test]
    fn small_program_passes() {
        let program = Program::builder().imm(42).build();
        assert!(check_size(&program.words).is_empty());
        assert!(operand_errors(program).is_empty());
    }

    #[test]
    fn program_too_large() {
        let words = vec![Word::SENTINEL; MAX_PROGRAM_WORDS + 1];
        assert_eq!(
            check_size(&words),
            vec![VerifyError::ProgramTooLarge {
                words: MAX_PROGRAM_WORDS + 1,
                limit: MAX_PROGRAM_WORDS
            }]
        );
    }

    #[test]
    fn slot_out_of_range() {
        let program = Program::builder()
            .wide(Opcode::Mem, MAX_SLOTS)
            .wide(Opcode::Load, "x")
            .build();
        assert_eq!(
            operand_errors(program),
            vec![
                VerifyError::InvalidSlot {
                    at: 0,
                    opcode: Opcode::Mem
                },
                VerifyError::InvalidSlot {
                    at: 2,
                    opcode: Opcode::Load
                },
            ]
        );
    }

    #[test]
    fn unreg_may_read_read_only_registers() {
        let program = Program::builder()
            .wide(Opcode::Unreg, Register::Mci.index())
            .wide(Opcode::Inc, Register::Mci.index())
            .build();
        assert_eq!(
            operand_errors(program),
            vec![VerifyError::ReadOnlyRegister {
                at: 2,
                opcode: Opcode::Inc,
                register: Register::Mci
            }]
        );
    }

    #[test]
    fn skip_may_land_on_program_end() {
        // SKIP 0 at offset 0 lands on offset 2, the end of the program.
        let program = Program::builder().wide(Opcode::Skip, 0).build();
        assert!(operand_errors(program).is_empty());
        let program = Program::builder().wide(Opcode::Skip, 1).build();
        assert_eq!(
            operand_errors(program),
            vec![VerifyError::InvalidSkip {
                at: 0,
                opcode: Opcode::Skip
            }]
        );
    }
}
