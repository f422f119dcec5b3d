//! Textual IR dump for debugging and trace logs.

use super::types::{Method, Node, NodeId, NodeKind, NodeRef, RegionKind, RegionTree};
use crate::types::TypeTable;
use std::fmt::Write;

fn list(refs: &[NodeRef]) -> String {
    refs.iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_kind(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Incoming { index } => format!("incoming {}", index),
        NodeKind::CaughtException => "caught".to_string(),
        NodeKind::Const(c) => format!("const {}", c.value),
        NodeKind::LoadLocal { index } => format!("ldloc {}", index),
        NodeKind::StoreLocal { index, value } => format!("stloc {}, {}", index, value),
        NodeKind::LoadArg { index } => format!("ldarg {}", index),
        NodeKind::StoreArg { index, value } => format!("starg {}, {}", index, value),
        NodeKind::LoadStatic { field } => format!("ldsfld {}", field.name),
        NodeKind::StoreStatic { field, value } => format!("stsfld {}, {}", field.name, value),
        NodeKind::LoadIndirect { address } => format!("load [{}]", address),
        NodeKind::StoreIndirect { address, value, ty } => {
            format!("store.{} [{}], {}", ty, address, value)
        }
        NodeKind::Binary { op, lhs, rhs } => format!("{} {}, {}", op, lhs, rhs),
        NodeKind::Unary { op, operand } => format!("{} {}", op, operand),
        NodeKind::Compare { cmp, lhs, rhs } => format!("cmp.{} {}, {}", cmp, lhs, rhs),
        NodeKind::Convert { conversion, value } => format!("{} {}", conversion, value),
        NodeKind::Call { method, args } => format!("call {}({})", method.name, list(args)),
        NodeKind::Branch { target, args } => format!("br {}({})", target, list(args)),
        NodeKind::Leave { target } => format!("leave {}", target),
        NodeKind::CondBranch {
            condition,
            if_true,
            if_false,
            args,
        } => format!(
            "brif {}, {}, {}({})",
            condition,
            if_true,
            if_false,
            list(args)
        ),
        NodeKind::Switch {
            index,
            targets,
            default,
            args,
        } => {
            let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
            format!(
                "switch {} [{}], {}({})",
                index,
                targets.join(", "),
                default,
                list(args)
            )
        }
        NodeKind::Return { value: Some(v) } => format!("ret {}", v),
        NodeKind::Return { value: None } => "ret".to_string(),
        NodeKind::Throw { exception: Some(e) } => format!("throw {}", e),
        NodeKind::Throw { exception: None } => "rethrow".to_string(),
        NodeKind::EndFinally => "endfinally".to_string(),
    }
}

fn render_node(out: &mut String, id: NodeId, node: &Node, types: &TypeTable) {
    let body = render_kind(&node.kind);
    let _ = match node.result {
        Some(ty) => writeln!(out, "    {} = {} : {}", id, body, types.name(ty)),
        None => writeln!(out, "    {}", body),
    };
}

fn render_regions(out: &mut String, regions: &RegionTree, types: &TypeTable) {
    for region in regions.iter() {
        let _ = write!(
            out,
            "  {} {} [{}, {})",
            region.id, region.kind, region.start, region.end
        );
        match region.kind {
            RegionKind::Try => {
                let handlers: Vec<String> = region.handlers.iter().map(|h| h.to_string()).collect();
                let _ = write!(out, " handlers: {}", handlers.join(", "));
            }
            RegionKind::Catch | RegionKind::Finally => {
                if let Some(try_region) = region.associated {
                    let _ = write!(out, " of {}", try_region);
                }
                if let Some(caught) = region.catch_type {
                    let _ = write!(out, " caught {}", types.name(caught));
                }
            }
            RegionKind::Root => {}
        }
        out.push('\n');
    }
}

impl Method {
    /// Renders blocks, regions, incoming shapes and live nodes.
    pub fn display(&self, types: &TypeTable) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "method {}", self.name);
        if self.regions.len() > 1 {
            render_regions(&mut out, &self.regions, types);
        }
        for block in &self.blocks {
            let shape: Vec<String> = block
                .incoming_shape()
                .iter()
                .map(|&t| types.name(t))
                .collect();
            let _ = write!(
                out,
                "  {} ({}) incoming [{}]",
                block.id,
                block.region,
                shape.join(", ")
            );
            if block.forced_no_incoming {
                out.push_str(" forced");
            }
            if !block.callers.is_empty() {
                let callers: Vec<String> = block.callers.iter().map(|c| c.to_string()).collect();
                let _ = write!(out, " callers: {}", callers.join(", "));
            }
            out.push('\n');
            for &id in &block.nodes {
                let live = self.graph.resolve(NodeRef(id));
                render_node(&mut out, live, self.graph.get(live), types);
            }
        }
        out
    }
}
