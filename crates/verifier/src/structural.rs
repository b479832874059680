//! Structural validation pass for Quill programs.
//!
//! Decodes the word stream into instructions, checks label balance and the
//! return cells, and builds the [`ProgramContext`] used by the limits pass.

use std::collections::BTreeMap;

use crate::error::VerifyError;
use quill_common::{Opcode, Word};

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the opcode word.
    pub at: usize,
    pub opcode: Opcode,
    /// The operand word of a wide opcode.
    pub operand: Option<Word>,
}

/// Metadata about a function body discovered during the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    /// Offset of the LABEL word.
    pub label_at: usize,
    /// Offset of the matching END_LABEL, if one was found.
    pub end_at: Option<usize>,
}

/// Context built from the structural pass, consumed by later passes.
#[derive(Debug, Clone, Default)]
pub struct ProgramContext {
    /// Instructions in program order.
    pub instructions: Vec<Instruction>,
    /// Declared functions by label id.
    pub labels: BTreeMap<String, LabelInfo>,
    /// Total number of words.
    pub len: usize,
    /// Whether decoding lost instruction alignment somewhere.
    pub fatal: bool,
}

/// Run the structural validation pass.
///
/// Returns the ProgramContext and any errors found.
pub fn check_structural(words: &[Word]) -> (ProgramContext, Vec<VerifyError>) {
    let mut errors = Vec::new();
    let (instructions, fatal) = decode(words, &mut errors);
    let labels = check_labels(&instructions, &mut errors);
    let ctx = ProgramContext {
        instructions,
        labels,
        len: words.len(),
        fatal,
    };
    (ctx, errors)
}

/// Split the word stream into instructions.
///
/// After an unknown opcode or a stray operand the width is unknown, so the
/// scan resumes at the next word and the context is marked fatal.
fn decode(words: &[Word], errors: &mut Vec<VerifyError>) -> (Vec<Instruction>, bool) {
    let mut instructions = Vec::new();
    let mut fatal = false;
    let mut pc = 0;

    while pc < words.len() {
        let at = pc;
        let code = match &words[at] {
            Word::Op(code) => *code,
            _ => {
                errors.push(VerifyError::ExpectedOpcode { at });
                fatal = true;
                pc += 1;
                continue;
            }
        };
        let Ok(opcode) = Opcode::try_from(code) else {
            errors.push(VerifyError::UnknownOpcode { at, code });
            fatal = true;
            pc += 1;
            continue;
        };

        let operand = if opcode.is_wide() {
            match words.get(at + 1) {
                Some(word) => {
                    check_operand(at, opcode, word, errors);
                    Some(word.clone())
                }
                None => {
                    errors.push(VerifyError::MissingImmediate { at, opcode });
                    None
                }
            }
        } else {
            None
        };

        instructions.push(Instruction {
            at,
            opcode,
            operand,
        });
        pc += opcode.width();
    }

    (instructions, fatal)
}

fn check_operand(at: usize, opcode: Opcode, word: &Word, errors: &mut Vec<VerifyError>) {
    match (opcode, word) {
        // A freshly loaded program has no return addresses yet.
        (Opcode::EndLabel, word) if word.is_sentinel() => {}
        (Opcode::EndLabel, _) => errors.push(VerifyError::MalformedReturnCell { at: at + 1 }),
        (_, Word::Imm(_)) => {}
        _ => errors.push(VerifyError::InvalidOperand { at, opcode }),
    }
}

/// Match LABEL/END_LABEL pairs and resolve CALL/MAP targets.
///
/// Declarations count in program order: a CALL may only name a label whose
/// LABEL word comes earlier, and may not name a function whose body it is
/// inside.
fn check_labels(
    instructions: &[Instruction],
    errors: &mut Vec<VerifyError>,
) -> BTreeMap<String, LabelInfo> {
    let mut labels: BTreeMap<String, LabelInfo> = BTreeMap::new();
    // Open bodies, innermost last.
    let mut open: Vec<String> = Vec::new();

    for instr in instructions {
        let at = instr.at;
        match instr.opcode {
            Opcode::Label => {
                let Some(label) = instr.operand.as_ref().and_then(Word::as_label) else {
                    errors.push(VerifyError::InvalidLabel { at });
                    continue;
                };
                if labels.contains_key(&label) {
                    errors.push(VerifyError::DuplicateLabel { at, label });
                    continue;
                }
                labels.insert(
                    label.clone(),
                    LabelInfo {
                        label_at: at,
                        end_at: None,
                    },
                );
                open.push(label);
            }
            Opcode::EndLabel => match open.pop() {
                Some(label) => {
                    if let Some(info) = labels.get_mut(&label) {
                        info.end_at = Some(at);
                    }
                }
                None => errors.push(VerifyError::UnmatchedEndLabel { at }),
            },
            Opcode::Call | Opcode::Map => {
                let Some(label) = instr.operand.as_ref().and_then(Word::as_label) else {
                    errors.push(VerifyError::InvalidLabel { at });
                    continue;
                };
                if !labels.contains_key(&label) {
                    errors.push(VerifyError::UndeclaredLabel { at, label });
                } else if open.contains(&label) {
                    errors.push(VerifyError::RecursiveCall { at, label });
                }
            }
            _ => {}
        }
    }

    for label in open {
        if let Some(info) = labels.get(&label) {
            errors.push(VerifyError::UnmatchedLabel {
                at: info.label_at,
                label,
            });
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_common::Program;

    fn structural(program: Program) -> (ProgramContext, Vec<VerifyError>) {
        check_structural(&program.words)
    }

    #[test]
    fn empty_program_is_clean() {
        let (ctx, errors) = structural(Program::default());
        assert!(errors.is_empty());
        assert!(ctx.instructions.is_empty());
        assert!(!ctx.fatal);
    }

    #[test]
    fn decodes_wide_and_narrow() {
        let (ctx, errors) = structural(Program::builder().imm(1).op(Opcode::DupHead).build());
        assert!(errors.is_empty());
        let offsets: Vec<usize> = ctx.instructions.iter().map(|i| i.at).collect();
        assert_eq!(offsets, vec![0, 2]);
        assert_eq!(ctx.instructions[0].operand, Some(Word::imm(1)));
        assert_eq!(ctx.instructions[1].operand, None);
    }

    #[test]
    fn records_label_spans() {
        let program = Program::builder()
            .function("f", Program::builder().imm(1))
            .build();
        let (ctx, errors) = structural(program);
        assert!(errors.is_empty());
        assert_eq!(
            ctx.labels.get("f"),
            Some(&LabelInfo {
                label_at: 0,
                end_at: Some(4)
            })
        );
    }

    #[test]
    fn stray_operand_is_fatal() {
        let (ctx, errors) = structural(Program::new(vec![Word::imm(1), Word::SENTINEL]));
        assert_eq!(errors, vec![VerifyError::ExpectedOpcode { at: 0 }]);
        assert!(ctx.fatal);
        assert_eq!(ctx.instructions.len(), 1);
    }

    #[test]
    fn unmatched_label_reports_its_offset() {
        let program = Program::builder()
            .imm(0)
            .wide(Opcode::Label, "f")
            .imm(1)
            .build();
        let (_, errors) = structural(program);
        assert_eq!(
            errors,
            vec![VerifyError::UnmatchedLabel {
                at: 2,
                label: "f".into()
            }]
        );
    }

    #[test]
    fn enclosing_function_cannot_be_entered() {
        let program = Program::builder()
            .function(
                "outer",
                Program::builder().function("inner", Program::builder().wide(Opcode::Call, "outer")),
            )
            .build();
        let (_, errors) = structural(program);
        assert_eq!(
            errors,
            vec![VerifyError::RecursiveCall {
                at: 4,
                label: "outer".into()
            }]
        );
    }
}
