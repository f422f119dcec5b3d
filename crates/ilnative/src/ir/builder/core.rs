//! Core builder state and per-block translation driver.
//!
//! `MethodBuilder` owns the block list and node arena for one method. Each
//! block is translated once, by replaying its instructions over a simulated
//! stack of [`NodeRef`]s; the outgoing stack shapes it leaves behind feed the
//! incoming-shape resolver.

use super::super::graph::NodeGraph;
use super::super::types::*;
use crate::bytecode::{Label, MethodBody, NormalizedBody};
use crate::error::{LowerError, Span};
use crate::types::{TypeId, TypeTable};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;

/// Builder state for one method.
pub(super) struct MethodBuilder<'a> {
    pub(super) types: &'a TypeTable,
    pub(super) body: &'a MethodBody,
    pub(super) code: &'a NormalizedBody,
    pub(super) regions: &'a RegionTree,

    pub(super) blocks: Vec<Block>,
    pub(super) graph: NodeGraph,
    /// First label of each block.
    pub(super) block_at: HashMap<Label, BlockId>,

    // ── Per-block translation state ──────────────────────────────
    /// Block being translated.
    pub(super) current: BlockId,
    /// Label of the instruction being translated, for diagnostics.
    pub(super) label: Label,
    /// Simulated evaluation stack, bottom first.
    pub(super) stack: Vec<NodeRef>,
    /// Nodes emitted for the current block, in order.
    pub(super) emitted: Vec<NodeId>,
    /// Outgoing edges recorded by the terminator: target and stack shape.
    pub(super) edges: Vec<(BlockId, Vec<TypeId>)>,
}

impl<'a> MethodBuilder<'a> {
    pub(super) fn new(
        types: &'a TypeTable,
        body: &'a MethodBody,
        code: &'a NormalizedBody,
        regions: &'a RegionTree,
        blocks: Vec<Block>,
    ) -> Self {
        let block_at = blocks
            .iter()
            .map(|b| (code.instructions[b.start].label, b.id))
            .collect();
        Self {
            types,
            body,
            code,
            regions,
            blocks,
            graph: NodeGraph::new(),
            block_at,
            current: BlockId(0),
            label: Label(0),
            stack: Vec::new(),
            emitted: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub(super) fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub(super) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    /// Translates one block and registers its outgoing shapes.
    ///
    /// On failure nothing emitted for the block survives: its nodes are
    /// dropped from the arena and no edge is registered.
    pub(super) fn translate_block(&mut self, id: BlockId) -> Result<()> {
        if self.block(id).translated {
            bail!(LowerError::internal(format!("{} translated twice", id)));
        }
        let mark = self.graph.len();
        self.current = id;
        self.stack.clear();
        self.emitted.clear();
        self.edges.clear();

        if let Err(err) = self.replay_block(id) {
            self.graph.truncate(mark);
            self.stack.clear();
            self.emitted.clear();
            self.edges.clear();
            let label = self.label;
            return Err(err).with_context(|| format!("translating {} at {}", id, label));
        }

        let nodes = std::mem::take(&mut self.emitted);
        let edges = std::mem::take(&mut self.edges);
        tracing::trace!(block = %id, nodes = nodes.len(), edges = edges.len(), "translated block");
        let block = self.block_mut(id);
        block.nodes = nodes;
        block.translated = true;

        for (target, shape) in edges {
            self.register_edge(id, target, shape)?;
        }
        Ok(())
    }

    fn replay_block(&mut self, id: BlockId) -> Result<()> {
        let (start, end) = {
            let block = self.block(id);
            (block.start, block.end)
        };
        self.label = self.code.instructions[start].label;
        self.seed_block(id)?;

        let mut pos = start;
        while pos < end {
            self.label = self.code.instructions[pos].label;
            pos = self.translate_instruction(pos, end)?;
        }

        let terminated = self
            .emitted
            .last()
            .is_some_and(|&n| self.graph.get(n).kind.is_terminator());
        if !terminated {
            bail!(LowerError::internal(format!("{} does not end in a terminator", id)));
        }
        Ok(())
    }

    /// Seeds the stack from the incoming shape and emits entry-only nodes.
    fn seed_block(&mut self, id: BlockId) -> Result<()> {
        let shape = self.block(id).incoming_shape().to_vec();
        for (index, ty) in shape.into_iter().enumerate() {
            let node = self.emit(NodeKind::Incoming { index }, Some(ty));
            self.stack.push(NodeRef(node));
        }

        let start = self.block(id).start;
        if start == 0 && self.body.init_locals {
            self.zero_locals()?;
        }

        let region = self.block(id).region;
        let caught = self
            .regions
            .ancestors(region)
            .take_while(|r| r.start == start)
            .find(|r| r.kind == RegionKind::Catch)
            .map(|r| r.catch_type);
        if let Some(caught) = caught {
            let ty = caught.ok_or_else(|| {
                LowerError::internal(format!("catch region at {} has no caught type", self.label))
            })?;
            self.push_value(NodeKind::CaughtException, ty);
        }
        Ok(())
    }

    fn zero_locals(&mut self) -> Result<()> {
        let body = self.body;
        for (index, &ty) in body.locals.iter().enumerate() {
            if !self.types.on_stack(ty) {
                continue;
            }
            let zero = self.types.zero(ty)?;
            let value = self.emit(NodeKind::Const(zero), Some(zero.ty));
            self.emit(
                NodeKind::StoreLocal {
                    index: index as u16,
                    value: NodeRef(value),
                },
                None,
            );
        }
        Ok(())
    }

    // ── Emission helpers ─────────────────────────────────────────

    /// Appends a node to the current block.
    pub(super) fn emit(&mut self, kind: NodeKind, result: Option<TypeId>) -> NodeId {
        let id = self.graph.push(kind, result, self.current);
        self.emitted.push(id);
        id
    }

    /// Emits a value-producing node and pushes it on the stack.
    pub(super) fn push_value(&mut self, kind: NodeKind, ty: TypeId) -> NodeRef {
        let r = NodeRef(self.emit(kind, Some(ty)));
        self.stack.push(r);
        r
    }

    pub(super) fn pop(&mut self, what: &str) -> Result<NodeRef> {
        self.stack.pop().ok_or_else(|| {
            LowerError::structural(Span::at(self.label), format!("stack underflow in {}", what))
                .into()
        })
    }

    pub(super) fn peek(&self, what: &str) -> Result<NodeRef> {
        self.stack.last().copied().ok_or_else(|| {
            LowerError::structural(Span::at(self.label), format!("stack underflow in {}", what))
                .into()
        })
    }

    pub(super) fn type_of(&self, r: NodeRef) -> Result<TypeId> {
        self.graph
            .result_type(r)
            .ok_or_else(|| LowerError::internal(format!("{} has no result", r)).into())
    }

    /// Takes the whole stack as edge arguments, bottom first.
    pub(super) fn capture_stack(&mut self) -> Result<(Vec<NodeRef>, Vec<TypeId>)> {
        let args = std::mem::take(&mut self.stack);
        let shape = args
            .iter()
            .map(|&r| self.type_of(r))
            .collect::<Result<Vec<_>>>()?;
        Ok((args, shape))
    }

    pub(super) fn target_block(&self, label: Label) -> Result<BlockId> {
        self.block_at.get(&label).copied().ok_or_else(|| {
            LowerError::internal(format!("branch target {} does not start a block", label)).into()
        })
    }

    pub(super) fn add_edge(&mut self, target: BlockId, shape: Vec<TypeId>) {
        self.edges.push((target, shape));
    }

    /// Whether the current block sits inside a region of `kind`.
    pub(super) fn inside(&self, kind: RegionKind) -> bool {
        let region = self.block(self.current).region;
        self.regions.ancestors(region).any(|r| r.kind == kind)
    }

    pub(super) fn mismatch(&self, what: &str, expected: String, found: TypeId) -> anyhow::Error {
        LowerError::TypeMismatch {
            site: format!("{} at {} in {}", what, self.label, self.current),
            expected,
            found: self.types.name(found),
        }
        .into()
    }
}
