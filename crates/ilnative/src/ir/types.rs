//! IR type definitions.
//!
//! A lowered method is a list of [`Block`]s over a shared [`NodeGraph`]. Each
//! block owns an ordered list of node ids (generation order) and ends in
//! exactly one terminator node. Values crossing a block edge travel as
//! terminator arguments and reappear in the successor as
//! [`NodeKind::Incoming`] placeholders.

use super::graph::NodeGraph;
use crate::bytecode::{BinaryOp, Comparison, ExceptionHandler, FieldRef, Instruction, MethodRef};
use crate::types::{Constant, Conversion, PrimitiveKind, TypeId};
use std::collections::BTreeSet;
use std::fmt;

/// Unique identifier for a basic block.
///
/// Blocks are numbered in instruction order, so a lower id means an earlier
/// position in the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block_{}", self.0)
    }
}

/// Arena slot of a node in the [`NodeGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Handle a consumer holds on a node's value.
///
/// Always go through [`NodeGraph::resolve`]; the node originally bound may
/// have been replaced since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(pub NodeId);

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Root,
    Try,
    Catch,
    Finally,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegionKind::Root => "root",
            RegionKind::Try => "try",
            RegionKind::Catch => "catch",
            RegionKind::Finally => "finally",
        })
    }
}

/// A protected range or handler, over positions in the normalized stream.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub kind: RegionKind,
    /// First position (inclusive).
    pub start: usize,
    /// One past the last position.
    pub end: usize,
    pub parent: Option<RegionId>,
    /// Ordered by start position.
    pub children: Vec<RegionId>,
    /// For catch and finally regions: the try region they handle.
    pub associated: Option<RegionId>,
    /// For try regions: the associated catch and finally regions, in
    /// handler-table order.
    pub handlers: Vec<RegionId>,
    /// For catch regions: the caught exception type.
    pub catch_type: Option<TypeId>,
}

impl Region {
    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos < self.end
    }

    pub fn contains_range(&self, start: usize, end: usize) -> bool {
        self.start <= start && end <= self.end
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Nested region tree rooted at [`RegionTree::ROOT`].
#[derive(Debug, Clone)]
pub struct RegionTree {
    pub(crate) regions: Vec<Region>,
}

impl RegionTree {
    pub const ROOT: RegionId = RegionId(0);

    /// A tree holding only the root region over `[0, len)`.
    pub fn new(len: usize) -> Self {
        Self {
            regions: vec![Region {
                id: Self::ROOT,
                kind: RegionKind::Root,
                start: 0,
                end: len,
                parent: None,
                children: Vec::new(),
                associated: None,
                handlers: Vec::new(),
                catch_type: None,
            }],
        }
    }

    pub fn root(&self) -> &Region {
        &self.regions[0]
    }

    pub fn get(&self, id: RegionId) -> &Region {
        &self.regions[id.0 as usize]
    }

    pub(crate) fn get_mut(&mut self, id: RegionId) -> &mut Region {
        &mut self.regions[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// The smallest region containing `pos`.
    pub fn innermost(&self, pos: usize) -> RegionId {
        let mut current = Self::ROOT;
        'descend: loop {
            for &child in &self.get(current).children {
                if self.get(child).contains(pos) {
                    current = child;
                    continue 'descend;
                }
            }
            return current;
        }
    }

    /// `id` and its ancestors, innermost first.
    pub fn ancestors(&self, id: RegionId) -> impl Iterator<Item = &Region> {
        std::iter::successors(Some(self.get(id)), move |r| r.parent.map(|p| self.get(p)))
    }

    /// Whether a non-root region begins exactly at `pos`.
    pub fn starts_region(&self, pos: usize) -> bool {
        self.regions
            .iter()
            .any(|r| r.kind != RegionKind::Root && r.start == pos)
    }
}

/// A caught type paired with the catch region handling it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchCase {
    pub caught: TypeId,
    pub region: RegionId,
}

/// One try region with its handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub try_region: RegionId,
    pub catches: Vec<CatchCase>,
    pub finally: Option<RegionId>,
}

/// A basic block.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    /// First instruction position (inclusive).
    pub start: usize,
    /// One past the last instruction position.
    pub end: usize,
    /// Innermost region containing the block.
    pub region: RegionId,
    /// Blocks that branch here.
    pub callers: BTreeSet<BlockId>,
    /// Branch targets of the block's terminator, deduplicated, operand order.
    pub successors: Vec<BlockId>,
    /// Stack types on entry, bottom first. `None` until a predecessor provides one.
    pub incoming: Option<Vec<TypeId>>,
    /// Starts with an empty stack regardless of predecessors.
    pub forced_no_incoming: bool,
    /// Nodes in generation order; the last one is the terminator.
    pub nodes: Vec<NodeId>,
    pub translated: bool,
}

impl Block {
    pub fn new(id: BlockId, start: usize, end: usize, region: RegionId) -> Self {
        Self {
            id,
            start,
            end,
            region,
            callers: BTreeSet::new(),
            successors: Vec::new(),
            incoming: None,
            forced_no_incoming: false,
            nodes: Vec::new(),
            translated: false,
        }
    }

    /// The resolved incoming shape; empty for forced or unresolved blocks.
    pub fn incoming_shape(&self) -> &[TypeId] {
        self.incoming.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn terminator(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
        })
    }
}

/// IR operations.
///
/// Edge arguments (`args` on branch nodes) are ordered bottom of stack first:
/// `args[i]` feeds the successor's `Incoming { index: i }`.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Merge value of the enclosing block's incoming shape.
    Incoming { index: usize },

    /// Exception object on entry to a catch handler.
    CaughtException,

    Const(Constant),

    LoadLocal { index: u16 },
    StoreLocal { index: u16, value: NodeRef },
    LoadArg { index: u16 },
    StoreArg { index: u16, value: NodeRef },
    LoadStatic { field: FieldRef },
    StoreStatic { field: FieldRef, value: NodeRef },

    LoadIndirect { address: NodeRef },
    StoreIndirect {
        address: NodeRef,
        value: NodeRef,
        ty: PrimitiveKind,
    },

    Binary {
        op: BinaryOp,
        lhs: NodeRef,
        rhs: NodeRef,
    },
    Unary { op: UnaryOp, operand: NodeRef },
    Compare {
        cmp: Comparison,
        lhs: NodeRef,
        rhs: NodeRef,
    },
    Convert {
        conversion: Conversion,
        value: NodeRef,
    },

    Call { method: MethodRef, args: Vec<NodeRef> },

    // ── Terminators ──────────────────────────────────────────────
    Branch { target: BlockId, args: Vec<NodeRef> },
    /// Exits protected regions; the stack is empty on arrival.
    Leave { target: BlockId },
    CondBranch {
        condition: NodeRef,
        if_true: BlockId,
        if_false: BlockId,
        args: Vec<NodeRef>,
    },
    Switch {
        index: NodeRef,
        targets: Vec<BlockId>,
        default: BlockId,
        args: Vec<NodeRef>,
    },
    Return { value: Option<NodeRef> },
    /// `None` rethrows the exception being handled.
    Throw { exception: Option<NodeRef> },
    EndFinally,
}

impl NodeKind {
    /// Value operands, in evaluation order. Edge arguments come last.
    pub fn operands(&self) -> Vec<NodeRef> {
        match self {
            NodeKind::Incoming { .. }
            | NodeKind::CaughtException
            | NodeKind::Const(_)
            | NodeKind::LoadLocal { .. }
            | NodeKind::LoadArg { .. }
            | NodeKind::LoadStatic { .. }
            | NodeKind::Leave { .. }
            | NodeKind::EndFinally => Vec::new(),
            NodeKind::StoreLocal { value, .. }
            | NodeKind::StoreArg { value, .. }
            | NodeKind::StoreStatic { value, .. }
            | NodeKind::Convert { value, .. } => vec![*value],
            NodeKind::LoadIndirect { address } => vec![*address],
            NodeKind::StoreIndirect { address, value, .. } => vec![*address, *value],
            NodeKind::Binary { lhs, rhs, .. } | NodeKind::Compare { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            NodeKind::Unary { operand, .. } => vec![*operand],
            NodeKind::Call { args, .. } | NodeKind::Branch { args, .. } => args.clone(),
            NodeKind::CondBranch {
                condition, args, ..
            } => std::iter::once(*condition).chain(args.iter().copied()).collect(),
            NodeKind::Switch { index, args, .. } => {
                std::iter::once(*index).chain(args.iter().copied()).collect()
            }
            NodeKind::Return { value } => value.iter().copied().collect(),
            NodeKind::Throw { exception } => exception.iter().copied().collect(),
        }
    }

    /// Successor blocks, with duplicates, in operand order.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            NodeKind::Branch { target, .. } | NodeKind::Leave { target } => vec![*target],
            NodeKind::CondBranch {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            NodeKind::Switch {
                targets, default, ..
            } => targets
                .iter()
                .copied()
                .chain(std::iter::once(*default))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Values passed across the outgoing edges.
    pub fn edge_args(&self) -> &[NodeRef] {
        match self {
            NodeKind::Branch { args, .. }
            | NodeKind::CondBranch { args, .. }
            | NodeKind::Switch { args, .. } => args,
            _ => &[],
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            NodeKind::Branch { .. }
                | NodeKind::Leave { .. }
                | NodeKind::CondBranch { .. }
                | NodeKind::Switch { .. }
                | NodeKind::Return { .. }
                | NodeKind::Throw { .. }
                | NodeKind::EndFinally
        )
    }
}

/// An IR node with zero or one results.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub result: Option<TypeId>,
    /// Block the node was generated in.
    pub block: BlockId,
}

/// A lowered method.
#[derive(Debug)]
pub struct Method {
    pub name: String,
    /// The normalized instruction stream block ranges refer to.
    pub instructions: Vec<Instruction>,
    pub handlers: Vec<ExceptionHandler>,
    pub params: Vec<TypeId>,
    pub locals: Vec<TypeId>,
    pub return_type: Option<TypeId>,
    pub regions: RegionTree,
    pub zones: Vec<Zone>,
    /// In instruction order.
    pub blocks: Vec<Block>,
    pub graph: NodeGraph,
    /// INVARIANT: always `BlockId(0)`, the block starting at the first instruction.
    pub entry_block: BlockId,
}

impl Method {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn returns_value(&self) -> bool {
        self.return_type.is_some()
    }

    /// The normalized instructions belonging to `id`.
    pub fn instructions_of(&self, id: BlockId) -> &[Instruction] {
        let block = self.block(id);
        &self.instructions[block.start..block.end]
    }

    /// The live terminator of `id`.
    pub fn terminator(&self, id: BlockId) -> Option<&Node> {
        self.block(id)
            .terminator()
            .map(|n| self.graph.node(NodeRef(n)))
    }
}
