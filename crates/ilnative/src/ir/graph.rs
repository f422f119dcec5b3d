//! Node arena with redirectable references.
//!
//! Nodes are never removed. Replacing a node stores a forwarding pointer in
//! its slot; [`NodeGraph::resolve`] follows forwarding pointers to the live
//! node and compresses the path it walked, union-find style.

use super::types::{BlockId, Node, NodeId, NodeKind, NodeRef};
use crate::error::LowerError;
use crate::types::TypeId;
use anyhow::{bail, Result};
use std::cell::Cell;

#[derive(Debug, Default)]
pub struct NodeGraph {
    nodes: Vec<Node>,
    /// `forward[i] == i` while node `i` is live.
    forward: Vec<Cell<NodeId>>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a node and returns its id.
    pub fn push(&mut self, kind: NodeKind, result: Option<TypeId>, block: BlockId) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            result,
            block,
        });
        self.forward.push(Cell::new(id));
        id
    }

    /// The node stored in slot `id`, whether or not it has been replaced.
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    /// The live node behind `r`.
    pub fn node(&self, r: NodeRef) -> &Node {
        self.get(self.resolve(r))
    }

    pub fn result_type(&self, r: NodeRef) -> Option<TypeId> {
        self.node(r).result
    }

    /// Follows replacements from `r` to the live node.
    pub fn resolve(&self, r: NodeRef) -> NodeId {
        let mut root = r.0;
        loop {
            let next = self.forward[root.0 as usize].get();
            if next == root {
                break;
            }
            root = next;
        }

        let mut current = r.0;
        while current != root {
            let slot = &self.forward[current.0 as usize];
            current = slot.replace(root);
        }
        root
    }

    pub fn is_replaced(&self, id: NodeId) -> bool {
        self.forward[id.0 as usize].get() != id
    }

    /// Redirects every reference to `node` (and to anything already forwarded
    /// to it) onto `with`.
    ///
    /// Both must resolve to distinct live nodes with the same result type.
    pub fn replace(&mut self, node: NodeId, with: NodeId) -> Result<()> {
        let from = self.resolve(NodeRef(node));
        let to = self.resolve(NodeRef(with));
        if from == to {
            bail!(LowerError::ReplacementCycle { node, with });
        }
        let (old_ty, new_ty) = (self.get(from).result, self.get(to).result);
        if old_ty != new_ty {
            bail!(LowerError::TypeMismatch {
                site: format!("replacement of {} by {}", node, with),
                expected: describe(old_ty),
                found: describe(new_ty),
            });
        }
        self.forward[from.0 as usize].set(to);
        Ok(())
    }

    /// Drops every node allocated at or after `len`.
    ///
    /// Only valid while nothing outside the dropped range refers to them.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
        self.forward.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }
}

fn describe(ty: Option<TypeId>) -> String {
    match ty {
        Some(ty) => ty.to_string(),
        None => "no result".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConstValue, Constant};

    fn constant(graph: &mut NodeGraph, v: i64) -> NodeId {
        let ty = TypeId(6);
        graph.push(
            NodeKind::Const(Constant {
                ty,
                value: ConstValue::Int(v),
            }),
            Some(ty),
            BlockId(0),
        )
    }

    #[test]
    fn live_nodes_resolve_to_themselves() {
        let mut graph = NodeGraph::new();
        let a = constant(&mut graph, 1);
        assert_eq!(graph.resolve(NodeRef(a)), a);
        assert!(!graph.is_replaced(a));
    }

    #[test]
    fn chains_resolve_to_the_last_replacement() {
        let mut graph = NodeGraph::new();
        let ids: Vec<_> = (0..5).map(|v| constant(&mut graph, v)).collect();
        for pair in ids.windows(2) {
            graph.replace(pair[0], pair[1]).unwrap();
        }
        let r = NodeRef(ids[0]);
        assert_eq!(graph.resolve(r), ids[4]);
        // compressed: the first slot now points straight at the end
        assert_eq!(graph.forward[0].get(), ids[4]);
        assert!(graph.is_replaced(ids[2]));
        assert!(!graph.is_replaced(ids[4]));
    }

    #[test]
    fn replacing_an_already_replaced_node_moves_the_live_target() {
        let mut graph = NodeGraph::new();
        let a = constant(&mut graph, 0);
        let b = constant(&mut graph, 1);
        let c = constant(&mut graph, 2);
        graph.replace(a, b).unwrap();
        graph.replace(a, c).unwrap();
        assert_eq!(graph.resolve(NodeRef(a)), c);
        assert_eq!(graph.resolve(NodeRef(b)), c);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = NodeGraph::new();
        let a = constant(&mut graph, 0);
        let b = constant(&mut graph, 1);
        graph.replace(a, b).unwrap();
        let err = graph.replace(b, a).unwrap_err();
        assert!(matches!(
            LowerError::find(&err),
            Some(LowerError::ReplacementCycle { .. })
        ));
        let err = graph.replace(a, a).unwrap_err();
        assert!(matches!(
            LowerError::find(&err),
            Some(LowerError::ReplacementCycle { .. })
        ));
    }

    #[test]
    fn replacement_must_keep_the_result_type() {
        let mut graph = NodeGraph::new();
        let a = constant(&mut graph, 0);
        let ret = graph.push(NodeKind::Return { value: None }, None, BlockId(0));
        let err = graph.replace(a, ret).unwrap_err();
        assert!(matches!(
            LowerError::find(&err),
            Some(LowerError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn truncate_discards_tail() {
        let mut graph = NodeGraph::new();
        constant(&mut graph, 0);
        let mark = graph.len();
        constant(&mut graph, 1);
        constant(&mut graph, 2);
        graph.truncate(mark);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.iter().count(), 1);
    }
}
