//! Opcode translation: replays one instruction over the simulated stack.

use super::super::types::*;
use super::core::MethodBuilder;
use crate::bytecode::{BinaryOp, Comparison, Opcode};
use crate::error::{LowerError, Span};
use crate::types::{ConstValue, PrimitiveKind, TypeFamily, TypeId};
use anyhow::{bail, Result};

impl<'a> MethodBuilder<'a> {
    /// Translates the instruction at `pos` and returns the next position.
    ///
    /// Conditional branches consume their companion `br` as well.
    pub(super) fn translate_instruction(&mut self, pos: usize, end: usize) -> Result<usize> {
        let code = self.code;
        let ins = &code.instructions[pos];
        let mut next = pos + 1;

        match &ins.opcode {
            Opcode::Nop => {}

            // Constants
            Opcode::LdcI4(v) => self.emit_const(PrimitiveKind::I32, ConstValue::Int(*v as i64))?,
            Opcode::LdcI8(v) => self.emit_const(PrimitiveKind::I64, ConstValue::Int(*v))?,
            Opcode::LdcR4(v) => {
                self.emit_const(PrimitiveKind::F32, ConstValue::Float(*v as f64))?
            }
            Opcode::LdcR8(v) => self.emit_const(PrimitiveKind::F64, ConstValue::Float(*v))?,

            // Locals and arguments
            Opcode::Ldloc(index) => {
                let ty = self.local_type(*index)?;
                self.check_on_stack(ty)?;
                self.push_value(NodeKind::LoadLocal { index: *index }, ty);
            }
            Opcode::Stloc(index) => {
                let ty = self.local_type(*index)?;
                let value = self.pop("stloc")?;
                self.check_assignable(value, ty, "stloc")?;
                self.emit(
                    NodeKind::StoreLocal {
                        index: *index,
                        value,
                    },
                    None,
                );
            }
            Opcode::Ldarg(index) => {
                let ty = self.arg_type(*index)?;
                self.check_on_stack(ty)?;
                self.push_value(NodeKind::LoadArg { index: *index }, ty);
            }
            Opcode::Starg(index) => {
                let ty = self.arg_type(*index)?;
                let value = self.pop("starg")?;
                self.check_assignable(value, ty, "starg")?;
                self.emit(
                    NodeKind::StoreArg {
                        index: *index,
                        value,
                    },
                    None,
                );
            }

            // Statics
            Opcode::Ldsfld(field) => {
                self.check_on_stack(field.ty)?;
                self.push_value(
                    NodeKind::LoadStatic {
                        field: field.clone(),
                    },
                    field.ty,
                );
            }
            Opcode::Stsfld(field) => {
                let value = self.pop("stsfld")?;
                self.check_assignable(value, field.ty, "stsfld")?;
                self.emit(
                    NodeKind::StoreStatic {
                        field: field.clone(),
                        value,
                    },
                    None,
                );
            }

            // Stack manipulation
            Opcode::Dup => {
                let top = self.peek("dup")?;
                self.stack.push(top);
            }
            Opcode::Pop => {
                self.pop("pop")?;
            }

            // Indirect memory access
            Opcode::Ldind(kind) => {
                let address = self.pop("ldind")?;
                self.check_address(address, "ldind")?;
                let ty = self.types.primitive(*kind);
                self.push_value(NodeKind::LoadIndirect { address }, ty);
            }
            Opcode::Stind(kind) => {
                let value = self.pop("stind")?;
                let address = self.pop("stind")?;
                self.check_address(address, "stind")?;
                self.check_assignable(value, self.types.primitive(*kind), "stind")?;
                self.emit(
                    NodeKind::StoreIndirect {
                        address,
                        value,
                        ty: *kind,
                    },
                    None,
                );
            }

            // Arithmetic
            Opcode::Binary(op) => self.emit_binary(*op)?,
            Opcode::Neg => self.emit_unary(UnaryOp::Neg)?,
            Opcode::Not => self.emit_unary(UnaryOp::Not)?,
            Opcode::Compare(cmp) => {
                let condition = self.emit_compare(*cmp)?;
                self.stack.push(condition);
            }
            Opcode::Conv(kind) => {
                let value = self.pop("conv")?;
                let from = self.type_of(value)?;
                let to = self.types.primitive(*kind);
                let conversion = self.types.conversion(from, to)?;
                self.push_value(NodeKind::Convert { conversion, value }, to);
            }

            Opcode::Call(method) => {
                let mut args = Vec::with_capacity(method.params.len());
                for _ in &method.params {
                    args.push(self.pop("call")?);
                }
                args.reverse();
                for (&arg, &param) in args.iter().zip(&method.params) {
                    self.check_assignable(arg, param, "call argument")?;
                }
                let node = self.emit(
                    NodeKind::Call {
                        method: method.clone(),
                        args,
                    },
                    method.return_type,
                );
                if method.return_type.is_some() {
                    self.stack.push(NodeRef(node));
                }
            }

            // ── Terminators ──────────────────────────────────────
            Opcode::Ret => {
                let value = match self.body.return_type {
                    Some(ty) => {
                        let value = self.pop("ret")?;
                        self.check_assignable(value, ty, "ret")?;
                        Some(value)
                    }
                    None => None,
                };
                if !self.stack.is_empty() {
                    bail!(LowerError::structural(
                        Span::at(self.label),
                        format!("{} value(s) left on the stack at return", self.stack.len())
                    ));
                }
                self.emit(NodeKind::Return { value }, None);
            }
            Opcode::Br(target) => {
                let target = self.target_block(*target)?;
                let (args, shape) = self.capture_stack()?;
                self.emit(NodeKind::Branch { target, args }, None);
                self.add_edge(target, shape);
            }
            Opcode::Leave(target) => {
                let target = self.target_block(*target)?;
                self.stack.clear();
                self.emit(NodeKind::Leave { target }, None);
                self.add_edge(target, Vec::new());
            }
            Opcode::Brtrue(target) | Opcode::Brfalse(target) => {
                let condition = self.pop("conditional branch")?;
                self.check_condition(condition)?;
                let taken = self.target_block(*target)?;
                let fallthrough = self.companion(pos, end)?;
                next += 1;
                let (if_true, if_false) = if matches!(ins.opcode, Opcode::Brtrue(_)) {
                    (taken, fallthrough)
                } else {
                    (fallthrough, taken)
                };
                self.emit_cond_branch(condition, if_true, if_false)?;
            }
            Opcode::BranchCmp(cmp, target) => {
                let condition = self.emit_compare(*cmp)?;
                let taken = self.target_block(*target)?;
                let fallthrough = self.companion(pos, end)?;
                next += 1;
                self.emit_cond_branch(condition, taken, fallthrough)?;
            }
            Opcode::Switch(labels) => {
                let index = self.pop("switch")?;
                let index_ty = self.type_of(index)?;
                if self.types.family(index_ty) != TypeFamily::Integer {
                    return Err(self.mismatch("switch", "integer".to_string(), index_ty));
                }
                let targets = labels
                    .iter()
                    .map(|&l| self.target_block(l))
                    .collect::<Result<Vec<_>>>()?;
                let default = self.companion(pos, end)?;
                next += 1;
                let (args, shape) = self.capture_stack()?;
                for &target in targets.iter().chain(std::iter::once(&default)) {
                    self.add_edge(target, shape.clone());
                }
                self.emit(
                    NodeKind::Switch {
                        index,
                        targets,
                        default,
                        args,
                    },
                    None,
                );
            }
            Opcode::Throw => {
                let exception = self.pop("throw")?;
                let ty = self.type_of(exception)?;
                if self.types.family(ty) != TypeFamily::Reference {
                    return Err(self.mismatch("throw", "object reference".to_string(), ty));
                }
                self.stack.clear();
                self.emit(
                    NodeKind::Throw {
                        exception: Some(exception),
                    },
                    None,
                );
            }
            Opcode::Rethrow => {
                if !self.inside(RegionKind::Catch) {
                    bail!(LowerError::structural(
                        Span::at(self.label),
                        "rethrow outside of a catch handler"
                    ));
                }
                self.stack.clear();
                self.emit(NodeKind::Throw { exception: None }, None);
            }
            Opcode::Endfinally => {
                if !self.inside(RegionKind::Finally) {
                    bail!(LowerError::structural(
                        Span::at(self.label),
                        "endfinally outside of a finally handler"
                    ));
                }
                self.stack.clear();
                self.emit(NodeKind::EndFinally, None);
            }

            Opcode::Break
            | Opcode::Ldloca(_)
            | Opcode::Ldstr(_)
            | Opcode::Newobj(_)
            | Opcode::Ldfld(_)
            | Opcode::Stfld(_)
            | Opcode::Other { .. } => {
                bail!(LowerError::UnsupportedInstruction {
                    mnemonic: ins.opcode.mnemonic(),
                    label: ins.label,
                });
            }
        }
        Ok(next)
    }

    // ── Emit helpers ─────────────────────────────────────────────

    fn emit_const(&mut self, kind: PrimitiveKind, value: ConstValue) -> Result<()> {
        let constant = self.types.constant(self.types.primitive(kind), value)?;
        self.push_value(NodeKind::Const(constant), constant.ty);
        Ok(())
    }

    fn emit_binary(&mut self, op: BinaryOp) -> Result<()> {
        let rhs = self.pop(op.mnemonic())?;
        let lhs = self.pop(op.mnemonic())?;
        let (lhs_ty, rhs_ty) = (self.type_of(lhs)?, self.type_of(rhs)?);

        let ty = if op.is_shift() {
            for ty in [lhs_ty, rhs_ty] {
                if self.types.family(ty) != TypeFamily::Integer {
                    return Err(self.mismatch(op.mnemonic(), "integer".to_string(), ty));
                }
            }
            self.widened(lhs_ty)
        } else {
            self.types.most_complex(lhs_ty, rhs_ty)?
        };
        if op.integer_only() && self.types.family(ty) == TypeFamily::Float {
            return Err(self.mismatch(op.mnemonic(), "integer".to_string(), ty));
        }

        self.push_value(NodeKind::Binary { op, lhs, rhs }, ty);
        Ok(())
    }

    fn emit_unary(&mut self, op: UnaryOp) -> Result<()> {
        let mnemonic = op.to_string();
        let operand = self.pop(&mnemonic)?;
        let ty = self.type_of(operand)?;
        let allowed = match op {
            UnaryOp::Neg => matches!(
                self.types.family(ty),
                TypeFamily::Integer | TypeFamily::Float
            ),
            UnaryOp::Not => self.types.family(ty) == TypeFamily::Integer,
        };
        if !allowed {
            return Err(self.mismatch(&mnemonic, "numeric value".to_string(), ty));
        }
        let ty = self.widened(ty);
        self.push_value(NodeKind::Unary { op, operand }, ty);
        Ok(())
    }

    /// Pops two operands and emits a comparison node yielding `bool`.
    fn emit_compare(&mut self, cmp: Comparison) -> Result<NodeRef> {
        let rhs = self.pop(cmp.mnemonic())?;
        let lhs = self.pop(cmp.mnemonic())?;
        let (lhs_ty, rhs_ty) = (self.type_of(lhs)?, self.type_of(rhs)?);
        let references = self.types.family(lhs_ty) == TypeFamily::Reference
            && self.types.family(rhs_ty) == TypeFamily::Reference;
        if !references {
            self.types.most_complex(lhs_ty, rhs_ty)?;
        }
        let bool_ty = self.types.primitive(PrimitiveKind::Bool);
        let id = self.emit(NodeKind::Compare { cmp, lhs, rhs }, Some(bool_ty));
        Ok(NodeRef(id))
    }

    fn emit_cond_branch(
        &mut self,
        condition: NodeRef,
        if_true: BlockId,
        if_false: BlockId,
    ) -> Result<()> {
        let (args, shape) = self.capture_stack()?;
        self.add_edge(if_true, shape.clone());
        self.add_edge(if_false, shape);
        self.emit(
            NodeKind::CondBranch {
                condition,
                if_true,
                if_false,
                args,
            },
            None,
        );
        Ok(())
    }

    // ── Operand checks ───────────────────────────────────────────

    /// Target of the `br` that the normalizer placed after a conditional branch.
    fn companion(&self, pos: usize, end: usize) -> Result<BlockId> {
        match self.code.instructions.get(pos + 1) {
            Some(ins) if pos + 1 < end => match ins.opcode {
                Opcode::Br(target) => self.target_block(target),
                _ => bail!(LowerError::internal(format!(
                    "conditional branch at {} is not followed by br",
                    self.label
                ))),
            },
            _ => bail!(LowerError::internal(format!(
                "conditional branch at {} ends its block",
                self.label
            ))),
        }
    }

    /// Sub-word integers compute as int32.
    fn widened(&self, ty: TypeId) -> TypeId {
        let ty = self.types.underlying(ty);
        match self.types.as_primitive(ty) {
            Some(kind) if kind.is_small() => self.types.primitive(PrimitiveKind::I32),
            _ => ty,
        }
    }

    fn check_condition(&self, condition: NodeRef) -> Result<()> {
        let ty = self.type_of(condition)?;
        match self.types.family(ty) {
            TypeFamily::Integer | TypeFamily::Pointer | TypeFamily::Reference => Ok(()),
            _ => Err(self.mismatch("branch condition", "integer or reference".to_string(), ty)),
        }
    }

    fn check_address(&self, address: NodeRef, what: &str) -> Result<()> {
        let ty = self.type_of(address)?;
        let ok = match self.types.family(ty) {
            TypeFamily::Pointer | TypeFamily::Reference => true,
            TypeFamily::Integer => self.types.as_primitive(ty).is_some_and(|k| k.is_native()),
            _ => false,
        };
        if !ok {
            return Err(self.mismatch(what, "address".to_string(), ty));
        }
        Ok(())
    }

    fn check_assignable(&self, value: NodeRef, target: TypeId, what: &str) -> Result<()> {
        let ty = self.type_of(value)?;
        if !self.types.assignable(ty, target) {
            return Err(self.mismatch(what, self.types.name(target), ty));
        }
        Ok(())
    }

    fn check_on_stack(&self, ty: TypeId) -> Result<()> {
        if !self.types.on_stack(ty) {
            bail!(LowerError::UnsupportedType {
                ty: self.types.name(ty),
                what: "loaded onto the evaluation stack",
            });
        }
        Ok(())
    }

    fn local_type(&self, index: u16) -> Result<TypeId> {
        self.body
            .locals
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.out_of_range("local", index))
    }

    fn arg_type(&self, index: u16) -> Result<TypeId> {
        self.body
            .params
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.out_of_range("argument", index))
    }

    fn out_of_range(&self, what: &str, index: u16) -> anyhow::Error {
        LowerError::structural(
            Span::at(self.label),
            format!("{} index {} out of range", what, index),
        )
        .into()
    }
}
