//! Backend-facing walk over a lowered method.
//!
//! A backend visits blocks in order and, inside each block, materializes the
//! live node behind every listed id exactly once, using only values it has
//! already materialized in the same block.

use super::types::{BlockId, Method, NodeId, NodeRef};
use crate::error::LowerError;
use anyhow::{bail, Result};
use std::collections::HashSet;

/// Live node ids per block, in generation order.
pub fn generation_order(method: &Method) -> Vec<(BlockId, Vec<NodeId>)> {
    method
        .blocks
        .iter()
        .map(|block| {
            let live = block
                .nodes
                .iter()
                .map(|&id| method.graph.resolve(NodeRef(id)))
                .collect();
            (block.id, live)
        })
        .collect()
}

/// Checks that every node is generated once and after its operands.
pub fn validate_generation_order(method: &Method) -> Result<()> {
    let mut generated: HashSet<NodeId> = HashSet::new();
    for (block, order) in generation_order(method) {
        let mut in_block: HashSet<NodeId> = HashSet::new();
        for (pos, &id) in order.iter().enumerate() {
            let node = method.graph.get(id);
            for operand in node.kind.operands() {
                let live = method.graph.resolve(operand);
                if !in_block.contains(&live) {
                    bail!(LowerError::internal(format!(
                        "{} in {} uses {} before it is generated",
                        id, block, live
                    )));
                }
            }
            if !generated.insert(id) {
                bail!(LowerError::internal(format!(
                    "{} is generated twice (again in {})",
                    id, block
                )));
            }
            in_block.insert(id);

            let is_last = pos + 1 == order.len();
            if node.kind.is_terminator() != is_last {
                bail!(LowerError::internal(format!(
                    "{} must end in exactly one terminator, found {} at position {}",
                    block, id, pos
                )));
            }
        }
        if order.is_empty() {
            bail!(LowerError::internal(format!("{} has no nodes", block)));
        }
    }
    tracing::trace!(nodes = generated.len(), "generation order validated");
    Ok(())
}

/// Edge arguments of `block`'s terminator, resolved to live nodes.
pub fn outgoing_values(method: &Method, block: BlockId) -> Vec<NodeId> {
    method
        .terminator(block)
        .map(|t| {
            t.kind
                .edge_args()
                .iter()
                .map(|&r: &NodeRef| method.graph.resolve(r))
                .collect()
        })
        .unwrap_or_default()
}
