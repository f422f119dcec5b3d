#![allow(dead_code)]

use ilnative::bytecode::{ExceptionHandler, HandlerKind, Instruction, Label, MethodBody, Opcode};
use ilnative::ir::{Method, NodeKind, NodeRef};
use ilnative::types::{PointerWidth, PrimitiveKind, TypeId, TypeTable};
use ilnative::{lower_method, LowerOptions, Result};

pub fn types() -> TypeTable {
    TypeTable::new(PointerWidth::Bits64)
}

pub fn prim(types: &TypeTable, kind: PrimitiveKind) -> TypeId {
    types.primitive(kind)
}

/// Builds a body from `(offset, opcode)` pairs.
pub fn body(name: &str, ops: Vec<(u32, Opcode)>) -> MethodBody {
    let mut body = MethodBody::new(name);
    body.instructions = ops
        .into_iter()
        .map(|(offset, op)| Instruction::new(Label(offset), op))
        .collect();
    body
}

pub fn catch(
    try_start: u32,
    try_end: u32,
    handler_start: u32,
    handler_end: u32,
    caught: TypeId,
) -> ExceptionHandler {
    ExceptionHandler {
        kind: HandlerKind::Catch,
        try_start: Label(try_start),
        try_end: Some(Label(try_end)),
        handler_start: Label(handler_start),
        handler_end: Some(Label(handler_end)),
        catch_type: Some(caught),
    }
}

pub fn lower(body: &MethodBody, types: &TypeTable) -> Result<Method> {
    lower_method(body, types, &LowerOptions::default())
}

/// Live node kinds of a block, in generation order.
pub fn kinds(method: &Method, block: usize) -> Vec<NodeKind> {
    method.blocks[block]
        .nodes
        .iter()
        .map(|&id| method.graph.node(NodeRef(id)).kind.clone())
        .collect()
}
