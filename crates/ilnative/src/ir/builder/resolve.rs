//! Incoming-shape resolution.
//!
//! Translation order is driven by a ready queue instead of repeated sweeps.
//! A block becomes ready once it is forced-no-incoming, or once it has an
//! incoming shape and every predecessor laid out before it has been
//! translated. Back edges (predecessors laid out after the block) never
//! hold a block back; the shapes they carry arrive after the target is
//! translated and must match the shape it was translated with.
//!
//! If the queue drains while blocks remain, the lowest untranslated block
//! that already has a shape is translated anyway. This covers forward
//! predecessors that are themselves unreachable. Blocks that never receive
//! a shape make the method fail.

use super::core::MethodBuilder;
use super::super::types::*;
use crate::error::{LowerError, Span};
use crate::types::{TypeId, TypeTable};
use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;

/// Pointwise merge of two incoming shapes for `block`.
///
/// Unifying a shape with itself returns it unchanged; shapes of different
/// lengths never unify.
pub fn unify_shapes(
    types: &TypeTable,
    block: BlockId,
    existing: &[TypeId],
    incoming: &[TypeId],
) -> Result<Vec<TypeId>> {
    if existing.len() != incoming.len() {
        bail!(LowerError::ShapeLength {
            block,
            existing: existing.len(),
            incoming: incoming.len(),
        });
    }
    existing
        .iter()
        .zip(incoming)
        .enumerate()
        .map(|(slot, (&a, &b))| {
            types
                .merge(a, b)
                .with_context(|| format!("merging stack slot {} into {}", slot, block))
        })
        .collect()
}

impl<'a> MethodBuilder<'a> {
    /// Translates every block, resolving incoming shapes along the way.
    pub(super) fn run_fixpoint(&mut self) -> Result<()> {
        let count = self.blocks.len();
        // Untranslated predecessors laid out before each block.
        let mut pending_forward: Vec<usize> = self
            .blocks
            .iter()
            .map(|b| b.callers.iter().filter(|&&c| c < b.id).count())
            .collect();

        let mut ready: BTreeSet<BlockId> = self
            .blocks
            .iter()
            .filter(|b| b.forced_no_incoming)
            .map(|b| b.id)
            .collect();
        let mut translated = 0;
        let mut fallbacks = 0;

        while translated < count {
            let next = match ready.pop_first() {
                Some(id) => id,
                None => match self.fallback() {
                    Some(id) => {
                        fallbacks += 1;
                        tracing::debug!(
                            block = %id,
                            "no ready block, translating earliest resolved block"
                        );
                        id
                    }
                    None => break,
                },
            };
            if self.block(next).translated {
                continue;
            }

            self.translate_block(next)?;
            translated += 1;

            let successors = self.block(next).successors.clone();
            for succ in successors {
                if succ > next {
                    pending_forward[succ.0 as usize] =
                        pending_forward[succ.0 as usize].saturating_sub(1);
                }
                let block = self.block(succ);
                if !block.translated
                    && block.incoming.is_some()
                    && pending_forward[succ.0 as usize] == 0
                {
                    ready.insert(succ);
                }
            }
        }

        let unresolved: Vec<BlockId> = self
            .blocks
            .iter()
            .filter(|b| !b.translated)
            .map(|b| b.id)
            .collect();
        if !unresolved.is_empty() {
            bail!(LowerError::Unresolved { blocks: unresolved });
        }
        tracing::debug!(blocks = count, fallbacks, "resolved incoming shapes");
        Ok(())
    }

    fn fallback(&self) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|b| !b.translated && b.incoming.is_some())
            .map(|b| b.id)
    }

    /// Records the stack shape `from` leaves on its edge to `to`.
    pub(super) fn register_edge(
        &mut self,
        from: BlockId,
        to: BlockId,
        shape: Vec<TypeId>,
    ) -> Result<()> {
        let types = self.types;
        let start_label = self.code.instructions[self.block(to).start].label;
        let block = self.block_mut(to);
        block.callers.insert(from);

        if block.forced_no_incoming {
            if !shape.is_empty() {
                bail!(LowerError::structural(
                    Span::at(start_label),
                    format!(
                        "{} passes {} stack value(s) into {}, which must start empty",
                        from,
                        shape.len(),
                        to
                    )
                ));
            }
            return Ok(());
        }

        let existing = match &block.incoming {
            Some(existing) => existing,
            None => {
                block.incoming = Some(shape);
                return Ok(());
            }
        };
        let merged = unify_shapes(types, to, existing, &shape)
            .with_context(|| format!("edge {} -> {}", from, to))?;
        if block.translated {
            if &merged != existing {
                let names = |s: &[TypeId]| {
                    s.iter()
                        .map(|&t| types.name(t))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                bail!(LowerError::TypeMismatch {
                    site: format!("edge {} -> {} (already translated)", from, to),
                    expected: format!("[{}]", names(existing)),
                    found: format!("[{}]", names(&shape)),
                });
            }
        } else {
            block.incoming = Some(merged);
        }
        Ok(())
    }
}
