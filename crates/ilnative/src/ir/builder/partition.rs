//! Block partitioning of the normalized instruction stream.

use super::super::types::*;
use crate::bytecode::{FlowControl, Label, NormalizedBody, Opcode};
use crate::error::{LowerError, Span};
use anyhow::{bail, Result};
use std::collections::HashMap;

/// Cuts the stream into blocks and wires static caller/successor edges.
pub(super) fn partition(code: &NormalizedBody, regions: &RegionTree) -> Result<Vec<Block>> {
    let instructions = &code.instructions;
    let mut starts = Vec::new();
    for (pos, ins) in instructions.iter().enumerate() {
        let after_terminator = pos > 0 && instructions[pos - 1].opcode.flow().is_terminator();
        if pos == 0 || code.is_jump_destination(ins.label) || after_terminator {
            starts.push(pos);
        }
    }

    let mut blocks = Vec::with_capacity(starts.len());
    let mut block_at: HashMap<Label, BlockId> = HashMap::new();
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(instructions.len());
        let id = BlockId(i as u32);
        let label = instructions[start].label;
        let span = Span::new(label, instructions.get(end).map(|i| i.label));

        let region = regions.innermost(start);
        if (start..end).any(|pos| regions.innermost(pos) != region) {
            bail!(LowerError::structural(span, format!("{} crosses a region boundary", id)));
        }
        check_ending(code, start, end, span)?;

        let mut block = Block::new(id, start, end, region);
        block.forced_no_incoming = start == 0
            || regions.starts_region(start)
            || !code.is_jump_destination(label);
        if block.forced_no_incoming {
            block.incoming = Some(Vec::new());
        }
        block_at.insert(label, id);
        blocks.push(block);
    }

    let covered: usize = blocks.iter().map(|b| b.len()).sum();
    if covered != instructions.len() {
        bail!(LowerError::internal(format!(
            "blocks cover {} of {} instructions",
            covered,
            instructions.len()
        )));
    }

    for i in 0..blocks.len() {
        let mut successors = Vec::new();
        for ins in &instructions[blocks[i].start..blocks[i].end] {
            for target in ins.opcode.branch_targets() {
                let succ = *block_at.get(&target).ok_or_else(|| {
                    LowerError::internal(format!("branch target {} does not start a block", target))
                })?;
                if !successors.contains(&succ) {
                    successors.push(succ);
                }
            }
        }
        let from = blocks[i].id;
        for &succ in &successors {
            blocks[succ.0 as usize].callers.insert(from);
        }
        blocks[i].successors = successors;
    }

    tracing::debug!(
        blocks = blocks.len(),
        forced = blocks.iter().filter(|b| b.forced_no_incoming).count(),
        "partitioned blocks"
    );
    Ok(blocks)
}

/// A block ends in a terminator, and a conditional branch may only appear
/// right before the block's final `br`.
fn check_ending(code: &NormalizedBody, start: usize, end: usize, span: Span) -> Result<()> {
    let body = &code.instructions[start..end];
    let Some(last) = body.last() else {
        bail!(LowerError::internal("empty block"));
    };
    if !last.opcode.flow().is_terminator() {
        bail!(LowerError::structural(
            span,
            format!("block ends in non-terminator `{}`", last.opcode.mnemonic())
        ));
    }
    for (i, ins) in body.iter().enumerate() {
        if ins.opcode.flow() != FlowControl::CondBranch {
            continue;
        }
        let companion = i + 2 == body.len() && matches!(body[i + 1].opcode, Opcode::Br(_));
        if !companion {
            bail!(LowerError::structural(
                Span::at(ins.label),
                "conditional branch is not followed by its explicit `br`"
            ));
        }
    }
    Ok(())
}
