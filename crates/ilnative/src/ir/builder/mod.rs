//! # IR Builder
//!
//! Lowers a [`MethodBody`] into a [`Method`]: blocks over a typed node graph.
//!
//! ## Pipeline overview
//!
//! ```text
//! MethodBody
//!      │
//!      ├─[normalize]──── explicit fallthrough + companion br ─► NormalizedBody
//!      │
//!      ├─[regions]────── handler table ─► RegionTree + Vec<Zone>
//!      │
//!      ├─[partition]──── cut at jump destinations ─► Vec<Block>
//!      │                   (static callers/successors, forced-no-incoming)
//!      │
//!      └─[resolve]────── ready queue over blocks
//!           └── MethodBuilder::translate_block()
//!                 ├── seed stack from incoming shape
//!                 ├── translate_instruction() per opcode
//!                 └── register_edge() per outgoing edge
//!                       └── unify_shapes() at merge points
//!                ─► Method
//! ```
//!
//! ## Architecture
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | [`regions`]   | Region tree and zones from the exception-handler table  |
//! | [`partition`] | Block boundaries, region ownership, static edges        |
//! | [`resolve`]   | Ready-queue fixpoint and incoming-shape unification     |
//! | [`core`]      | `MethodBuilder` state, block translation driver         |
//! | [`translate`] | Opcode → node dispatch over the simulated stack         |
//!
//! Shapes only flow forward through translation: a block is translated with
//! the shape known when it becomes ready, and shapes arriving later over
//! back edges are checked against it rather than widening it.

mod core;
mod partition;
mod regions;
mod resolve;
mod translate;

pub use resolve::unify_shapes;

use super::types::{BlockId, Method};
use crate::bytecode::{normalize, Label, MethodBody, Opcode};
use crate::error::{LowerError, Span};
use crate::types::{TypeId, TypeTable};
use anyhow::{Context, Result};
use self::core::MethodBuilder;

/// Builds the block IR for one method.
pub fn build_method(body: &MethodBody, types: &TypeTable) -> Result<Method> {
    check_type_ids(body, types).context("checking type references")?;
    let code = normalize(body).context("normalizing instructions")?;
    let (regions, zones) =
        regions::map_regions(&code, &body.handlers).context("mapping exception regions")?;
    let blocks = partition::partition(&code, &regions).context("partitioning blocks")?;

    let mut builder = MethodBuilder::new(types, body, &code, &regions, blocks);
    builder.run_fixpoint()?;

    let MethodBuilder { blocks, graph, .. } = builder;
    Ok(Method {
        name: body.name.clone(),
        instructions: code.instructions,
        handlers: body.handlers.clone(),
        params: body.params.clone(),
        locals: body.locals.clone(),
        return_type: body.return_type,
        regions,
        zones,
        blocks,
        graph,
        entry_block: BlockId(0),
    })
}

/// Every type id the body mentions must come from `types`.
fn check_type_ids(body: &MethodBody, types: &TypeTable) -> Result<()> {
    let unknown = |id: TypeId, at: Label, what: &str| -> Result<()> {
        if types.contains(id) {
            return Ok(());
        }
        Err(LowerError::structural(
            Span::at(at),
            format!("{} refers to {}, which is not in the type table", what, id),
        )
        .into())
    };

    let entry = body.instructions.first().map_or(Label(0), |i| i.label);
    for &ty in body.params.iter().chain(&body.locals).chain(&body.return_type) {
        unknown(ty, entry, "signature")?;
    }
    for handler in &body.handlers {
        if let Some(ty) = handler.catch_type {
            unknown(ty, handler.handler_start, "catch clause")?;
        }
    }
    for ins in &body.instructions {
        match &ins.opcode {
            Opcode::Call(callee) | Opcode::Newobj(callee) => {
                for &ty in callee.params.iter().chain(&callee.return_type) {
                    unknown(ty, ins.label, &callee.name)?;
                }
            }
            Opcode::Ldsfld(field)
            | Opcode::Stsfld(field)
            | Opcode::Ldfld(field)
            | Opcode::Stfld(field) => unknown(field.ty, ins.label, &field.name)?,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instruction, Label, Opcode};
    use crate::error::{ErrorCategory, LowerError};
    use crate::ir::{NodeKind, NodeRef};
    use crate::types::{PointerWidth, PrimitiveKind};

    fn body(name: &str, ops: Vec<(u32, Opcode)>) -> MethodBody {
        let mut body = MethodBody::new(name);
        body.instructions = ops
            .into_iter()
            .map(|(l, op)| Instruction::new(Label(l), op))
            .collect();
        body
    }

    #[test]
    fn failed_block_leaves_no_nodes_behind() {
        let types = TypeTable::new(PointerWidth::Bits64);
        let b = body(
            "Test::Bad",
            vec![
                (0, Opcode::LdcI4(1)),
                (1, Opcode::LdcI4(2)),
                (2, Opcode::Ldstr("boom".into())),
                (7, Opcode::Ret),
            ],
        );
        let code = normalize(&b).unwrap();
        let (regions, _) = regions::map_regions(&code, &b.handlers).unwrap();
        let blocks = partition::partition(&code, &regions).unwrap();
        let mut builder = MethodBuilder::new(&types, &b, &code, &regions, blocks);

        let err = builder.translate_block(BlockId(0)).unwrap_err();
        assert_eq!(
            LowerError::find(&err),
            Some(&LowerError::UnsupportedInstruction {
                mnemonic: "ldstr".to_string(),
                label: Label(2),
            })
        );
        assert!(format!("{:#}", err).contains("translating block_0 at IL_0002"));
        assert_eq!(builder.graph.len(), 0);
        assert!(builder.block(BlockId(0)).nodes.is_empty());
        assert!(!builder.block(BlockId(0)).translated);
        assert!(builder.stack.is_empty());
    }

    #[test]
    fn init_locals_zeroes_stack_capable_locals() {
        let mut types = TypeTable::new(PointerWidth::Bits64);
        let point = types.class("Point", 8);
        let mut b = body("Test::Locals", vec![(0, Opcode::Ret)]);
        b.init_locals = true;
        b.locals = vec![
            types.primitive(PrimitiveKind::I64),
            point,
            types.primitive(PrimitiveKind::F32),
        ];
        let method = build_method(&b, &types).unwrap();
        let kinds: Vec<_> = method.blocks[0]
            .nodes
            .iter()
            .map(|&n| method.graph.node(NodeRef(n)).kind.clone())
            .collect();
        assert_eq!(kinds.len(), 5);
        assert!(matches!(kinds[1], NodeKind::StoreLocal { index: 0, .. }));
        assert!(matches!(kinds[3], NodeKind::StoreLocal { index: 2, .. }));
        assert!(matches!(kinds[4], NodeKind::Return { value: None }));
    }

    #[test]
    fn unresolvable_block_is_internal_error() {
        // block_1 is a jump destination reachable only from itself
        let types = TypeTable::new(PointerWidth::Bits64);
        let b = body(
            "Test::Island",
            vec![(0, Opcode::Ret), (2, Opcode::Br(Label(2)))],
        );
        let err = build_method(&b, &types).unwrap_err();
        let found = LowerError::find(&err).unwrap();
        assert_eq!(found.category(), ErrorCategory::Internal);
        assert_eq!(
            found,
            &LowerError::Unresolved {
                blocks: vec![BlockId(1)]
            }
        );
    }

    #[test]
    fn stack_into_forced_block_is_structural() {
        // a branch carrying a value back to the method entry
        let types = TypeTable::new(PointerWidth::Bits64);
        let b = body(
            "Test::Entry",
            vec![(0, Opcode::LdcI4(1)), (1, Opcode::Br(Label(0)))],
        );
        let err = build_method(&b, &types).unwrap_err();
        assert_eq!(
            LowerError::find(&err).unwrap().category(),
            ErrorCategory::Structural
        );
    }

    #[test]
    fn back_edge_cannot_widen_a_translated_shape() {
        // the loop header is translated with [bool]; the back edge brings [int32]
        let types = TypeTable::new(PointerWidth::Bits64);
        let b = body(
            "Test::Loop",
            vec![
                (0, Opcode::LdcI4(0)),
                (1, Opcode::LdcI4(0)),
                (2, Opcode::Compare(crate::bytecode::Comparison::Eq)),
                (3, Opcode::Br(Label(4))),
                (4, Opcode::Pop),
                (5, Opcode::LdcI4(1)),
                (6, Opcode::Br(Label(4))),
            ],
        );
        let err = build_method(&b, &types).unwrap_err();
        match LowerError::find(&err) {
            Some(LowerError::TypeMismatch { site, expected, found }) => {
                assert_eq!(site, "edge block_1 -> block_1 (already translated)");
                assert_eq!(expected, "[bool]");
                assert_eq!(found, "[int32]");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn back_edge_with_incompatible_width_fails() {
        let types = TypeTable::new(PointerWidth::Bits64);
        let b = body(
            "Test::Loop",
            vec![
                (0, Opcode::LdcI4(0)),
                (1, Opcode::Br(Label(2))),
                (2, Opcode::Pop),
                (3, Opcode::LdcI8(1)),
                (4, Opcode::Br(Label(2))),
            ],
        );
        let err = build_method(&b, &types).unwrap_err();
        let found = LowerError::find(&err).unwrap();
        assert!(matches!(found, LowerError::UnsupportedCommonType { .. }));
        assert!(format!("{:#}", err).contains("edge block_1 -> block_1"));
    }

    #[test]
    fn type_ids_from_another_table_are_structural() {
        let types = TypeTable::new(PointerWidth::Bits64);
        let stranger = TypeId(types.len() as u32 + 40);

        let mut b = body("Test::Foreign", vec![(0, Opcode::Ret)]);
        b.locals = vec![stranger];
        let err = build_method(&b, &types).unwrap_err();
        let found = LowerError::find(&err).unwrap();
        assert_eq!(found.category(), ErrorCategory::Structural);
        assert!(format!("{:#}", err).contains("not in the type table"));

        let field = crate::bytecode::FieldRef {
            name: "Program::counter".to_string(),
            ty: stranger,
        };
        let b = body(
            "Test::ForeignField",
            vec![(0, Opcode::Ldsfld(field)), (5, Opcode::Pop), (6, Opcode::Ret)],
        );
        let err = build_method(&b, &types).unwrap_err();
        assert_eq!(
            LowerError::find(&err).map(LowerError::category),
            Some(ErrorCategory::Structural)
        );
        assert!(format!("{:#}", err).contains("Program::counter"));
    }
}
