//! Conversion-call patching.
//!
//! A single-argument call to a known conversion routine (`System.Convert::ToInt64`
//! and friends) becomes a direct conversion node when the type table has a
//! conversion for the argument and return types.

use crate::ir::{Method, NodeKind};
use crate::types::TypeTable;
use anyhow::{Context, Result};

/// Replaces recognized conversion calls. Returns how many were replaced.
pub fn patch_conversion_calls(
    method: &mut Method,
    types: &TypeTable,
    routines: &[String],
) -> Result<usize> {
    let mut candidates = Vec::new();
    for block in &method.blocks {
        for &id in &block.nodes {
            if method.graph.is_replaced(id) {
                continue;
            }
            let node = method.graph.get(id);
            let NodeKind::Call { method: callee, args } = &node.kind else {
                continue;
            };
            let (Some(to), [arg]) = (callee.return_type, args.as_slice()) else {
                continue;
            };
            if !routines.iter().any(|r| r == &callee.name) {
                continue;
            }
            let Some(from) = method.graph.result_type(*arg) else {
                continue;
            };
            match types.conversion(from, to) {
                Ok(conversion) => candidates.push((id, *arg, conversion, to, node.block)),
                Err(err) => {
                    tracing::trace!(
                        call = %id,
                        routine = %callee.name,
                        error = %err,
                        "conversion call kept"
                    );
                }
            }
        }
    }

    let patched = candidates.len();
    for (call, value, conversion, to, block) in candidates {
        let convert = method
            .graph
            .push(NodeKind::Convert { conversion, value }, Some(to), block);
        method
            .graph
            .replace(call, convert)
            .with_context(|| format!("patching conversion call {}", call))?;
        tracing::debug!(call = %call, convert = %convert, %conversion, "patched conversion call");
    }
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instruction, Label, MethodBody, MethodRef, Opcode};
    use crate::ir::{build_method, walk, NodeRef};
    use crate::types::{Conversion, PointerWidth, PrimitiveKind};

    fn call(name: &str, from: crate::types::TypeId, to: crate::types::TypeId) -> Opcode {
        Opcode::Call(MethodRef {
            name: name.to_string(),
            params: vec![from],
            return_type: Some(to),
        })
    }

    fn routines() -> Vec<String> {
        vec![
            "System.Convert::ToInt64".to_string(),
            "System.Convert::ToSingle".to_string(),
        ]
    }

    #[test]
    fn call_is_redirected_to_conversion() {
        let types = TypeTable::new(PointerWidth::Bits64);
        let i32_ty = types.primitive(PrimitiveKind::I32);
        let i64_ty = types.primitive(PrimitiveKind::I64);
        let mut body = MethodBody::new("Test::Widen");
        body.return_type = Some(i64_ty);
        body.instructions = vec![
            Instruction::new(Label(0), Opcode::LdcI4(7)),
            Instruction::new(Label(1), call("System.Convert::ToInt64", i32_ty, i64_ty)),
            Instruction::new(Label(6), Opcode::Ret),
        ];
        let mut method = build_method(&body, &types).unwrap();
        let call_id = method.blocks[0].nodes[1];

        assert_eq!(patch_conversion_calls(&mut method, &types, &routines()).unwrap(), 1);
        assert!(method.graph.is_replaced(call_id));

        let live = method.graph.node(NodeRef(call_id));
        assert!(matches!(
            live.kind,
            NodeKind::Convert {
                conversion: Conversion::SignExtend,
                ..
            }
        ));
        // the return node still holds a reference to the call and now sees the conversion
        let ret = method.terminator(method.entry_block).unwrap();
        let NodeKind::Return { value: Some(v) } = &ret.kind else {
            panic!("expected a return with a value");
        };
        assert_eq!(method.graph.resolve(*v), method.graph.resolve(NodeRef(call_id)));
        walk::validate_generation_order(&method).unwrap();
    }

    #[test]
    fn unknown_routines_and_conversions_are_kept() {
        let mut types = TypeTable::new(PointerWidth::Bits64);
        let i32_ty = types.primitive(PrimitiveKind::I32);
        let f32_ty = types.primitive(PrimitiveKind::F32);
        let point = types.class("Point", 8);
        let point_ref = types.reference_to(point);
        let mut body = MethodBody::new("Test::Keep");
        body.params = vec![point_ref];
        body.instructions = vec![
            Instruction::new(Label(0), Opcode::LdcI4(1)),
            Instruction::new(Label(1), call("Math::Abs", i32_ty, i32_ty)),
            Instruction::new(Label(6), Opcode::Pop),
            // reference to float has no conversion
            Instruction::new(Label(7), Opcode::Ldarg(0)),
            Instruction::new(Label(8), call("System.Convert::ToSingle", point_ref, f32_ty)),
            Instruction::new(Label(13), Opcode::Pop),
            Instruction::new(Label(14), Opcode::Ret),
        ];
        let mut method = build_method(&body, &types).unwrap();
        assert_eq!(patch_conversion_calls(&mut method, &types, &routines()).unwrap(), 0);
        assert!(method.graph.iter().all(|(id, _)| !method.graph.is_replaced(id)));
    }
}
