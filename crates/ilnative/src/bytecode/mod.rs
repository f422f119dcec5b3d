//! Input model: method bodies as handed over by the metadata reader.
//!
//! Operands arrive already resolved: locals and arguments by index, fields and
//! methods as typed references, branch targets as [`Label`]s.

pub mod normalize;

pub use normalize::{normalize, NormalizedBody};

use crate::types::{PrimitiveKind, TypeId};
use std::fmt;

/// Stable instruction identity (the source byte offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}", self.0)
    }
}

/// Control-flow class of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    Next,
    Branch,
    CondBranch,
    Return,
    Throw,
    Call,
    Break,
    Phi,
    Meta,
}

impl FlowControl {
    /// Control never falls through to the following instruction.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            FlowControl::Branch | FlowControl::Return | FlowControl::Throw
        )
    }

    /// Control may fall through to the following instruction.
    pub fn falls_through(self) -> bool {
        matches!(
            self,
            FlowControl::Next | FlowControl::Call | FlowControl::Meta | FlowControl::CondBranch
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
}

impl BinaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::DivUn => "div.un",
            BinaryOp::Rem => "rem",
            BinaryOp::RemUn => "rem.un",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::ShrUn => "shr.un",
        }
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::ShrUn)
    }

    /// Bitwise and unsigned-only operators have no floating-point form.
    pub fn integer_only(self) -> bool {
        matches!(
            self,
            BinaryOp::DivUn
                | BinaryOp::RemUn
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
                | BinaryOp::Shl
                | BinaryOp::Shr
                | BinaryOp::ShrUn
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Comparison predicate shared by `ceq`-style opcodes and compare-and-branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    NeUn,
    Lt,
    LtUn,
    Le,
    LeUn,
    Gt,
    GtUn,
    Ge,
    GeUn,
}

impl Comparison {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Comparison::Eq => "eq",
            Comparison::NeUn => "ne.un",
            Comparison::Lt => "lt",
            Comparison::LtUn => "lt.un",
            Comparison::Le => "le",
            Comparison::LeUn => "le.un",
            Comparison::Gt => "gt",
            Comparison::GtUn => "gt.un",
            Comparison::Ge => "ge",
            Comparison::GeUn => "ge.un",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Fully-qualified name, e.g. `Program::counter`.
    pub name: String,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Fully-qualified name, e.g. `System.Convert::ToInt32`.
    pub name: String,
    pub params: Vec<TypeId>,
    pub return_type: Option<TypeId>,
}

/// The supported opcode subset.
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    Nop,
    Break,
    Ldarg(u16),
    Starg(u16),
    Ldloc(u16),
    Stloc(u16),
    Ldloca(u16),
    LdcI4(i32),
    LdcI8(i64),
    LdcR4(f32),
    LdcR8(f64),
    Ldstr(String),
    Dup,
    Pop,
    Call(MethodRef),
    Newobj(MethodRef),
    Ret,
    Br(Label),
    Leave(Label),
    Brtrue(Label),
    Brfalse(Label),
    /// `beq`, `blt.un`, ...
    BranchCmp(Comparison, Label),
    Switch(Vec<Label>),
    Ldind(PrimitiveKind),
    Stind(PrimitiveKind),
    Binary(BinaryOp),
    Neg,
    Not,
    /// `ceq`, `cgt`, `cgt.un`, `clt`, `clt.un`.
    Compare(Comparison),
    Conv(PrimitiveKind),
    Ldsfld(FieldRef),
    Stsfld(FieldRef),
    Ldfld(FieldRef),
    Stfld(FieldRef),
    Throw,
    Rethrow,
    Endfinally,
    /// Anything else the reader decodes.
    Other { mnemonic: String, flow: FlowControl },
}

fn kind_suffix(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::Bool => "u1",
        PrimitiveKind::Char => "u2",
        PrimitiveKind::I8 => "i1",
        PrimitiveKind::U8 => "u1",
        PrimitiveKind::I16 => "i2",
        PrimitiveKind::U16 => "u2",
        PrimitiveKind::I32 => "i4",
        PrimitiveKind::U32 => "u4",
        PrimitiveKind::I64 => "i8",
        PrimitiveKind::U64 => "u8",
        PrimitiveKind::IntPtr => "i",
        PrimitiveKind::UIntPtr => "u",
        PrimitiveKind::F32 => "r4",
        PrimitiveKind::F64 => "r8",
    }
}

impl Opcode {
    pub fn mnemonic(&self) -> String {
        match self {
            Opcode::Nop => "nop".into(),
            Opcode::Break => "break".into(),
            Opcode::Ldarg(_) => "ldarg".into(),
            Opcode::Starg(_) => "starg".into(),
            Opcode::Ldloc(_) => "ldloc".into(),
            Opcode::Stloc(_) => "stloc".into(),
            Opcode::Ldloca(_) => "ldloca".into(),
            Opcode::LdcI4(_) => "ldc.i4".into(),
            Opcode::LdcI8(_) => "ldc.i8".into(),
            Opcode::LdcR4(_) => "ldc.r4".into(),
            Opcode::LdcR8(_) => "ldc.r8".into(),
            Opcode::Ldstr(_) => "ldstr".into(),
            Opcode::Dup => "dup".into(),
            Opcode::Pop => "pop".into(),
            Opcode::Call(_) => "call".into(),
            Opcode::Newobj(_) => "newobj".into(),
            Opcode::Ret => "ret".into(),
            Opcode::Br(_) => "br".into(),
            Opcode::Leave(_) => "leave".into(),
            Opcode::Brtrue(_) => "brtrue".into(),
            Opcode::Brfalse(_) => "brfalse".into(),
            Opcode::BranchCmp(cmp, _) => format!("b{}", cmp.mnemonic()),
            Opcode::Switch(_) => "switch".into(),
            Opcode::Ldind(kind) => format!("ldind.{}", kind_suffix(*kind)),
            Opcode::Stind(kind) => format!("stind.{}", kind_suffix(*kind)),
            Opcode::Binary(op) => op.mnemonic().into(),
            Opcode::Neg => "neg".into(),
            Opcode::Not => "not".into(),
            Opcode::Compare(cmp) => format!("c{}", cmp.mnemonic()),
            Opcode::Conv(kind) => format!("conv.{}", kind_suffix(*kind)),
            Opcode::Ldsfld(_) => "ldsfld".into(),
            Opcode::Stsfld(_) => "stsfld".into(),
            Opcode::Ldfld(_) => "ldfld".into(),
            Opcode::Stfld(_) => "stfld".into(),
            Opcode::Throw => "throw".into(),
            Opcode::Rethrow => "rethrow".into(),
            Opcode::Endfinally => "endfinally".into(),
            Opcode::Other { mnemonic, .. } => mnemonic.clone(),
        }
    }

    pub fn flow(&self) -> FlowControl {
        match self {
            Opcode::Break => FlowControl::Break,
            Opcode::Call(_) | Opcode::Newobj(_) => FlowControl::Call,
            Opcode::Ret | Opcode::Endfinally => FlowControl::Return,
            Opcode::Br(_) | Opcode::Leave(_) => FlowControl::Branch,
            Opcode::Brtrue(_)
            | Opcode::Brfalse(_)
            | Opcode::BranchCmp(..)
            | Opcode::Switch(_) => FlowControl::CondBranch,
            Opcode::Throw | Opcode::Rethrow => FlowControl::Throw,
            Opcode::Other { flow, .. } => *flow,
            _ => FlowControl::Next,
        }
    }

    /// Explicit branch operands, in operand order.
    pub fn branch_targets(&self) -> Vec<Label> {
        match self {
            Opcode::Br(target)
            | Opcode::Leave(target)
            | Opcode::Brtrue(target)
            | Opcode::Brfalse(target)
            | Opcode::BranchCmp(_, target) => vec![*target],
            Opcode::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        match self {
            Opcode::Ldarg(i)
            | Opcode::Starg(i)
            | Opcode::Ldloc(i)
            | Opcode::Stloc(i)
            | Opcode::Ldloca(i) => write!(f, " {}", i),
            Opcode::LdcI4(v) => write!(f, " {}", v),
            Opcode::LdcI8(v) => write!(f, " {}", v),
            Opcode::LdcR4(v) => write!(f, " {:?}", v),
            Opcode::LdcR8(v) => write!(f, " {:?}", v),
            Opcode::Ldstr(s) => write!(f, " {:?}", s),
            Opcode::Call(m) | Opcode::Newobj(m) => write!(f, " {}", m.name),
            Opcode::Ldsfld(fr) | Opcode::Stsfld(fr) | Opcode::Ldfld(fr) | Opcode::Stfld(fr) => {
                write!(f, " {}", fr.name)
            }
            Opcode::Switch(targets) => {
                let list: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
                write!(f, " ({})", list.join(", "))
            }
            op => match op.branch_targets().first() {
                Some(target) => write!(f, " {}", target),
                None => Ok(()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub label: Label,
    pub opcode: Opcode,
    /// Inserted by the normalizer rather than read from the method body.
    pub synthetic: bool,
}

impl Instruction {
    pub fn new(label: Label, opcode: Opcode) -> Self {
        Self {
            label,
            opcode,
            synthetic: false,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.opcode)?;
        if self.synthetic {
            f.write_str(" (synthetic)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Catch,
    Finally,
    Filter,
    Fault,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandlerKind::Catch => "catch",
            HandlerKind::Finally => "finally",
            HandlerKind::Filter => "filter",
            HandlerKind::Fault => "fault",
        })
    }
}

/// One entry of the exception-handler table. Ends are exclusive; `None`
/// runs to the end of the method.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    pub kind: HandlerKind,
    pub try_start: Label,
    pub try_end: Option<Label>,
    pub handler_start: Label,
    pub handler_end: Option<Label>,
    /// Type pushed on handler entry; required for `Catch`.
    pub catch_type: Option<TypeId>,
}

/// A method as delivered by the metadata reader.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    pub name: String,
    pub params: Vec<TypeId>,
    pub locals: Vec<TypeId>,
    pub return_type: Option<TypeId>,
    pub init_locals: bool,
    pub instructions: Vec<Instruction>,
    pub handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            locals: Vec::new(),
            return_type: None,
            init_locals: false,
            instructions: Vec::new(),
            handlers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_display() {
        assert_eq!(Label(0).to_string(), "IL_0000");
        assert_eq!(Label(0x2a).to_string(), "IL_002a");
    }

    #[test]
    fn mnemonics() {
        assert_eq!(Opcode::BranchCmp(Comparison::LtUn, Label(4)).mnemonic(), "blt.un");
        assert_eq!(Opcode::Compare(Comparison::Eq).mnemonic(), "ceq");
        assert_eq!(Opcode::Conv(PrimitiveKind::U8).mnemonic(), "conv.u1");
        assert_eq!(Opcode::Ldind(PrimitiveKind::IntPtr).mnemonic(), "ldind.i");
        assert_eq!(Opcode::Binary(BinaryOp::ShrUn).mnemonic(), "shr.un");
    }

    #[test]
    fn flow_classes() {
        assert_eq!(Opcode::Br(Label(0)).flow(), FlowControl::Branch);
        assert_eq!(Opcode::Leave(Label(0)).flow(), FlowControl::Branch);
        assert_eq!(Opcode::Switch(vec![]).flow(), FlowControl::CondBranch);
        assert_eq!(Opcode::Endfinally.flow(), FlowControl::Return);
        assert_eq!(Opcode::Rethrow.flow(), FlowControl::Throw);
        assert_eq!(Opcode::Break.flow(), FlowControl::Break);
        assert_eq!(
            Opcode::Other {
                mnemonic: "localloc".into(),
                flow: FlowControl::Next
            }
            .flow(),
            FlowControl::Next
        );
        assert!(FlowControl::Throw.is_terminator());
        assert!(!FlowControl::CondBranch.is_terminator());
    }

    #[test]
    fn instruction_display() {
        let ins = Instruction::new(Label(6), Opcode::Brtrue(Label(0x10)));
        assert_eq!(ins.to_string(), "IL_0006: brtrue IL_0010");
        let ins = Instruction {
            synthetic: true,
            ..Instruction::new(Label(0x11), Opcode::Br(Label(0x12)))
        };
        assert_eq!(ins.to_string(), "IL_0011: br IL_0012 (synthetic)");
    }
}
