//! Instruction normalization.
//!
//! Makes every block boundary explicit before partitioning:
//!
//! - an instruction that would fall through into a jump destination gets an
//!   explicit `br` to it
//! - a conditional branch (including `switch`) is always followed by an
//!   unconditional `br` carrying its not-taken edge
//!
//! Inserted branches get fresh labels above every label in the method, so
//! existing branch operands stay valid.

use super::{FlowControl, Instruction, Label, MethodBody, Opcode};
use crate::error::{LowerError, Span};
use anyhow::{bail, Result};
use std::collections::{BTreeSet, HashMap};

/// Instruction stream with explicit block boundaries.
#[derive(Debug, Clone)]
pub struct NormalizedBody {
    pub instructions: Vec<Instruction>,
    /// Branch targets, handler and try entries, the first instruction, and
    /// every not-taken successor of a conditional branch.
    pub jump_destinations: BTreeSet<Label>,
    positions: HashMap<Label, usize>,
}

impl NormalizedBody {
    /// Position of `label` in the normalized stream.
    pub fn position(&self, label: Label) -> Option<usize> {
        self.positions.get(&label).copied()
    }

    pub fn is_jump_destination(&self, label: Label) -> bool {
        self.jump_destinations.contains(&label)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn synthetic_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.synthetic).count()
    }
}

/// Normalizes `body`, see the module docs.
pub fn normalize(body: &MethodBody) -> Result<NormalizedBody> {
    let raw = &body.instructions;
    let Some(first) = raw.first() else {
        bail!(LowerError::structural(
            Span::at(Label(0)),
            "method has no instructions"
        ));
    };

    let mut known = HashMap::with_capacity(raw.len());
    for (pos, ins) in raw.iter().enumerate() {
        if known.insert(ins.label, pos).is_some() {
            bail!(LowerError::structural(
                Span::at(ins.label),
                "duplicate instruction label"
            ));
        }
        if matches!(ins.opcode.flow(), FlowControl::Break | FlowControl::Phi) {
            bail!(LowerError::UnsupportedInstruction {
                mnemonic: ins.opcode.mnemonic(),
                label: ins.label,
            });
        }
    }

    let mut jump_destinations = BTreeSet::new();
    jump_destinations.insert(first.label);
    for ins in raw {
        for target in ins.opcode.branch_targets() {
            if !known.contains_key(&target) {
                bail!(LowerError::structural(
                    Span::at(ins.label),
                    format!("branch target {} does not exist", target)
                ));
            }
            jump_destinations.insert(target);
        }
    }
    for handler in &body.handlers {
        for entry in [handler.try_start, handler.handler_start] {
            if !known.contains_key(&entry) {
                bail!(LowerError::structural(
                    Span::new(handler.try_start, handler.handler_end),
                    format!("exception handler entry {} does not exist", entry)
                ));
            }
            jump_destinations.insert(entry);
        }
    }

    // `None` once the label space is exhausted
    let mut next_label = match raw.iter().map(|i| i.label.0).max() {
        Some(max) => max.checked_add(1),
        None => Some(0),
    };
    let mut synthetic_branch = |at: Label, target: Label| -> Result<Instruction> {
        let Some(free) = next_label else {
            bail!(LowerError::structural(
                Span::at(at),
                "no free label left for an inserted branch"
            ));
        };
        next_label = free.checked_add(1);
        Ok(Instruction {
            label: Label(free),
            opcode: Opcode::Br(target),
            synthetic: true,
        })
    };

    let mut instructions = Vec::with_capacity(raw.len());
    for (pos, ins) in raw.iter().enumerate() {
        instructions.push(ins.clone());
        let flow = ins.opcode.flow();
        if flow.is_terminator() {
            continue;
        }

        let Some(next) = raw.get(pos + 1) else {
            bail!(LowerError::structural(
                Span::new(ins.label, None),
                format!("`{}` falls through past the end of the method", ins.opcode.mnemonic())
            ));
        };

        if flow == FlowControl::CondBranch {
            let companion = matches!(next.opcode, Opcode::Br(_))
                && !jump_destinations.contains(&next.label);
            if !companion {
                instructions.push(synthetic_branch(ins.label, next.label)?);
                jump_destinations.insert(next.label);
            }
        } else if jump_destinations.contains(&next.label) {
            instructions.push(synthetic_branch(ins.label, next.label)?);
        }
    }

    let positions = instructions
        .iter()
        .enumerate()
        .map(|(pos, ins)| (ins.label, pos))
        .collect();

    let normalized = NormalizedBody {
        instructions,
        jump_destinations,
        positions,
    };
    tracing::debug!(
        method = %body.name,
        instructions = normalized.len(),
        synthetic = normalized.synthetic_count(),
        jump_destinations = normalized.jump_destinations.len(),
        "normalized instruction stream"
    );
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ExceptionHandler, HandlerKind};
    use crate::error::ErrorCategory;

    fn body(ops: Vec<(u32, Opcode)>) -> MethodBody {
        let mut body = MethodBody::new("Test::M");
        body.instructions = ops
            .into_iter()
            .map(|(offset, op)| Instruction::new(Label(offset), op))
            .collect();
        body
    }

    fn category(err: &anyhow::Error) -> ErrorCategory {
        LowerError::find(err).expect("LowerError").category()
    }

    #[test]
    fn straight_line_is_untouched() {
        let b = body(vec![
            (0, Opcode::LdcI4(1)),
            (1, Opcode::LdcI4(2)),
            (2, Opcode::Binary(crate::bytecode::BinaryOp::Add)),
            (3, Opcode::Ret),
        ]);
        let n = normalize(&b).unwrap();
        assert_eq!(n.len(), 4);
        assert_eq!(n.synthetic_count(), 0);
        assert_eq!(n.jump_destinations, BTreeSet::from([Label(0)]));
    }

    #[test]
    fn fallthrough_into_jump_destination_gets_branch() {
        // 0: ldc 0; 1: stloc 0; 2: ldloc 0 (loop head); 3: brtrue 2; 5: br 6; 6: ret
        let b = body(vec![
            (0, Opcode::LdcI4(0)),
            (1, Opcode::Stloc(0)),
            (2, Opcode::Ldloc(0)),
            (3, Opcode::Brtrue(Label(2))),
            (5, Opcode::Br(Label(6))),
            (6, Opcode::Ret),
        ]);
        let n = normalize(&b).unwrap();
        let ops: Vec<_> = n.instructions.iter().map(|i| i.opcode.clone()).collect();
        assert_eq!(ops[2], Opcode::Br(Label(2)));
        assert!(n.instructions[2].synthetic);
        assert_eq!(n.instructions[2].label, Label(7));
        // brtrue already has its companion br
        assert_eq!(ops[4], Opcode::Brtrue(Label(2)));
        assert_eq!(ops[5], Opcode::Br(Label(6)));
        assert!(!n.instructions[5].synthetic);
        assert_eq!(n.synthetic_count(), 1);
    }

    #[test]
    fn conditional_branch_gets_companion() {
        let b = body(vec![
            (0, Opcode::Ldarg(0)),
            (1, Opcode::Brfalse(Label(4))),
            (2, Opcode::LdcI4(1)),
            (3, Opcode::Ret),
            (4, Opcode::LdcI4(0)),
            (5, Opcode::Ret),
        ]);
        let n = normalize(&b).unwrap();
        assert_eq!(n.instructions[2].opcode, Opcode::Br(Label(2)));
        assert!(n.instructions[2].synthetic);
        assert!(n.is_jump_destination(Label(2)));
        assert!(n.is_jump_destination(Label(4)));
        assert_eq!(n.position(Label(2)), Some(3));
    }

    #[test]
    fn companion_branch_that_is_a_target_is_not_reused() {
        let b = body(vec![
            (0, Opcode::Ldarg(0)),
            (1, Opcode::Brtrue(Label(2))),
            (2, Opcode::Br(Label(3))),
            (3, Opcode::Ret),
        ]);
        let n = normalize(&b).unwrap();
        assert_eq!(n.instructions[2].opcode, Opcode::Br(Label(2)));
        assert!(n.instructions[2].synthetic);
    }

    #[test]
    fn handler_entries_are_jump_destinations() {
        let mut b = body(vec![
            (0, Opcode::Nop),
            (1, Opcode::Leave(Label(4))),
            (2, Opcode::Pop),
            (3, Opcode::Leave(Label(4))),
            (4, Opcode::Ret),
        ]);
        b.handlers.push(ExceptionHandler {
            kind: HandlerKind::Catch,
            try_start: Label(0),
            try_end: Some(Label(2)),
            handler_start: Label(2),
            handler_end: Some(Label(4)),
            catch_type: None,
        });
        let n = normalize(&b).unwrap();
        assert_eq!(
            n.jump_destinations,
            BTreeSet::from([Label(0), Label(2), Label(4)])
        );
    }

    #[test]
    fn exhausted_label_space_is_structural() {
        let last = Label(u32::MAX);
        let plain = body(vec![(0, Opcode::Br(last)), (u32::MAX, Opcode::Ret)]);
        assert_eq!(normalize(&plain).unwrap().synthetic_count(), 0);

        let b = body(vec![
            (0, Opcode::Ldarg(0)),
            (1, Opcode::Brtrue(last)),
            (2, Opcode::Ret),
            (u32::MAX, Opcode::Ret),
        ]);
        let err = normalize(&b).unwrap_err();
        assert_eq!(category(&err), ErrorCategory::Structural);
        assert!(err.to_string().contains("no free label"));
    }

    #[test]
    fn break_is_unsupported() {
        let b = body(vec![(0, Opcode::Break), (1, Opcode::Ret)]);
        let err = normalize(&b).unwrap_err();
        assert_eq!(category(&err), ErrorCategory::Unsupported);
    }

    #[test]
    fn structural_failures() {
        let empty = body(vec![]);
        assert_eq!(category(&normalize(&empty).unwrap_err()), ErrorCategory::Structural);

        let dangling = body(vec![(0, Opcode::Br(Label(9)))]);
        assert_eq!(category(&normalize(&dangling).unwrap_err()), ErrorCategory::Structural);

        let falls_off = body(vec![(0, Opcode::Nop)]);
        let err = normalize(&falls_off).unwrap_err();
        assert_eq!(category(&err), ErrorCategory::Structural);
        assert!(err.to_string().contains("falls through"));

        let duplicate = body(vec![(0, Opcode::Nop), (0, Opcode::Ret)]);
        assert_eq!(category(&normalize(&duplicate).unwrap_err()), ErrorCategory::Structural);
    }
}
