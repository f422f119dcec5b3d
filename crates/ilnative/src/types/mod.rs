//! Value types and the type table.
//!
//! Every type the pipeline touches is interned into a [`TypeTable`] and
//! referred to by a [`TypeId`]. Structurally equal types always share one id,
//! so incoming stack shapes (`Vec<TypeId>`) compare with plain `==`.
//!
//! The conversion, common-type and merge tables live in [`rules`].

mod rules;
pub use rules::Conversion;

use crate::error::LowerError;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::fmt;

/// Interned type handle. Only meaningful together with the table that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Scalar types the evaluation stack can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    IntPtr,
    UIntPtr,
    F32,
    F64,
}

impl PrimitiveKind {
    /// Declaration order; `TypeTable::new` interns primitives in this order.
    pub const ALL: [PrimitiveKind; 14] = [
        PrimitiveKind::Bool,
        PrimitiveKind::Char,
        PrimitiveKind::I8,
        PrimitiveKind::U8,
        PrimitiveKind::I16,
        PrimitiveKind::U16,
        PrimitiveKind::I32,
        PrimitiveKind::U32,
        PrimitiveKind::I64,
        PrimitiveKind::U64,
        PrimitiveKind::IntPtr,
        PrimitiveKind::UIntPtr,
        PrimitiveKind::F32,
        PrimitiveKind::F64,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Char => "char",
            PrimitiveKind::I8 => "int8",
            PrimitiveKind::U8 => "uint8",
            PrimitiveKind::I16 => "int16",
            PrimitiveKind::U16 => "uint16",
            PrimitiveKind::I32 => "int32",
            PrimitiveKind::U32 => "uint32",
            PrimitiveKind::I64 => "int64",
            PrimitiveKind::U64 => "uint64",
            PrimitiveKind::IntPtr => "native int",
            PrimitiveKind::UIntPtr => "native uint",
            PrimitiveKind::F32 => "float32",
            PrimitiveKind::F64 => "float64",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, PrimitiveKind::F32 | PrimitiveKind::F64)
    }

    pub fn is_integer(self) -> bool {
        !self.is_float()
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PrimitiveKind::I8
                | PrimitiveKind::I16
                | PrimitiveKind::I32
                | PrimitiveKind::I64
                | PrimitiveKind::IntPtr
                | PrimitiveKind::F32
                | PrimitiveKind::F64
        )
    }

    /// Integers narrower than 32 bits (bool and char included).
    pub fn is_small(self) -> bool {
        matches!(
            self,
            PrimitiveKind::Bool
                | PrimitiveKind::Char
                | PrimitiveKind::I8
                | PrimitiveKind::U8
                | PrimitiveKind::I16
                | PrimitiveKind::U16
        )
    }

    pub fn is_native(self) -> bool {
        matches!(self, PrimitiveKind::IntPtr | PrimitiveKind::UIntPtr)
    }

    pub fn size_class(self) -> SizeClass {
        match self {
            PrimitiveKind::Bool | PrimitiveKind::I8 | PrimitiveKind::U8 => SizeClass::Bits8,
            PrimitiveKind::Char | PrimitiveKind::I16 | PrimitiveKind::U16 => SizeClass::Bits16,
            PrimitiveKind::I32 | PrimitiveKind::U32 | PrimitiveKind::F32 => SizeClass::Bits32,
            PrimitiveKind::I64 | PrimitiveKind::U64 | PrimitiveKind::F64 => SizeClass::Bits64,
            PrimitiveKind::IntPtr | PrimitiveKind::UIntPtr => SizeClass::Native,
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Target representation class of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Bits8,
    Bits16,
    Bits32,
    Bits64,
    /// Pointer-sized; width comes from the table's [`PointerWidth`].
    Native,
    /// Aggregate of the given byte size.
    Aggregate(u32),
}

/// Pointer width of the compilation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    pub fn bits(self) -> u32 {
        match self {
            PointerWidth::Bits32 => 32,
            PointerWidth::Bits64 => 64,
        }
    }
}

/// A value type as declared by the metadata reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Primitive(PrimitiveKind),
    /// Enumeration; arithmetic and conversions go through `underlying`.
    Enum {
        name: String,
        underlying: PrimitiveKind,
    },
    /// Unmanaged pointer `T*`.
    Pointer { pointee: TypeId },
    /// Object reference or managed `T&`.
    Reference { target: TypeId },
    /// Class or struct laid out as an aggregate.
    Class { name: String, size: u32 },
}

/// Coarse grouping used to tell "missing table entry" from "type error".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Float,
    Pointer,
    Reference,
    Aggregate,
}

/// Literal payload of a constant node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Null,
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{}", v),
            ConstValue::Float(v) => write!(f, "{:?}", v),
            ConstValue::Null => f.write_str("null"),
        }
    }
}

/// A constant materialized for a specific type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant {
    pub ty: TypeId,
    pub value: ConstValue,
}

/// Interner and query surface for value types.
#[derive(Debug, Clone)]
pub struct TypeTable {
    types: Vec<ValueType>,
    index: HashMap<ValueType, TypeId>,
    pointer_width: PointerWidth,
}

impl TypeTable {
    /// Creates a table with every primitive pre-interned.
    pub fn new(pointer_width: PointerWidth) -> Self {
        let mut table = Self {
            types: Vec::new(),
            index: HashMap::new(),
            pointer_width,
        };
        for kind in PrimitiveKind::ALL {
            table.intern(ValueType::Primitive(kind));
        }
        table
    }

    /// Interns `ty`, returning the existing id for a structurally equal type.
    pub fn intern(&mut self, ty: ValueType) -> TypeId {
        if let Some(&id) = self.index.get(&ty) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty.clone());
        self.index.insert(ty, id);
        id
    }

    pub fn primitive(&self, kind: PrimitiveKind) -> TypeId {
        TypeId(kind as u32)
    }

    pub fn enumeration(&mut self, name: &str, underlying: PrimitiveKind) -> TypeId {
        self.intern(ValueType::Enum {
            name: name.to_string(),
            underlying,
        })
    }

    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        self.intern(ValueType::Pointer { pointee })
    }

    pub fn reference_to(&mut self, target: TypeId) -> TypeId {
        self.intern(ValueType::Reference { target })
    }

    pub fn class(&mut self, name: &str, size: u32) -> TypeId {
        self.intern(ValueType::Class {
            name: name.to_string(),
            size,
        })
    }

    pub fn get(&self, id: TypeId) -> &ValueType {
        &self.types[id.0 as usize]
    }

    /// Whether `id` was handed out by this table.
    pub fn contains(&self, id: TypeId) -> bool {
        (id.0 as usize) < self.types.len()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn pointer_width(&self) -> PointerWidth {
        self.pointer_width
    }

    /// Human-readable name, used in diagnostics and IR dumps.
    pub fn name(&self, id: TypeId) -> String {
        match self.get(id) {
            ValueType::Primitive(kind) => kind.name().to_string(),
            ValueType::Enum { name, .. } => name.clone(),
            ValueType::Pointer { pointee } => format!("{}*", self.name(*pointee)),
            ValueType::Reference { target } => format!("{}&", self.name(*target)),
            ValueType::Class { name, .. } => name.clone(),
        }
    }

    /// Enums map to their underlying primitive; every other type maps to itself.
    pub fn underlying(&self, id: TypeId) -> TypeId {
        match self.get(id) {
            ValueType::Enum { underlying, .. } => self.primitive(*underlying),
            _ => id,
        }
    }

    /// The primitive kind behind `id`, looking through enums.
    pub fn as_primitive(&self, id: TypeId) -> Option<PrimitiveKind> {
        match self.get(self.underlying(id)) {
            ValueType::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn family(&self, id: TypeId) -> TypeFamily {
        match self.get(self.underlying(id)) {
            ValueType::Primitive(kind) if kind.is_float() => TypeFamily::Float,
            ValueType::Primitive(_) | ValueType::Enum { .. } => TypeFamily::Integer,
            ValueType::Pointer { .. } => TypeFamily::Pointer,
            ValueType::Reference { .. } => TypeFamily::Reference,
            ValueType::Class { .. } => TypeFamily::Aggregate,
        }
    }

    pub fn size_class(&self, id: TypeId) -> SizeClass {
        match self.get(id) {
            ValueType::Primitive(kind) => kind.size_class(),
            ValueType::Enum { underlying, .. } => underlying.size_class(),
            ValueType::Pointer { .. } | ValueType::Reference { .. } => SizeClass::Native,
            ValueType::Class { size, .. } => SizeClass::Aggregate(*size),
        }
    }

    /// Scalar width in bits on this target; `None` for aggregates.
    pub fn bits(&self, id: TypeId) -> Option<u32> {
        match self.size_class(id) {
            SizeClass::Bits8 => Some(8),
            SizeClass::Bits16 => Some(16),
            SizeClass::Bits32 => Some(32),
            SizeClass::Bits64 => Some(64),
            SizeClass::Native => Some(self.pointer_width.bits()),
            SizeClass::Aggregate(_) => None,
        }
    }

    /// Whether a value of this type may sit on the evaluation stack directly.
    pub fn on_stack(&self, id: TypeId) -> bool {
        !matches!(self.get(id), ValueType::Class { .. })
    }

    /// Materializes `value` as a constant of `ty`.
    ///
    /// Enums materialize as their underlying primitive.
    pub fn constant(&self, ty: TypeId, value: ConstValue) -> Result<Constant> {
        let ty = self.underlying(ty);
        let fits = matches!(
            (self.family(ty), value),
            (TypeFamily::Integer, ConstValue::Int(_))
                | (TypeFamily::Float, ConstValue::Float(_))
                | (TypeFamily::Pointer | TypeFamily::Reference, ConstValue::Null)
        );
        if self.family(ty) == TypeFamily::Aggregate {
            bail!(LowerError::UnsupportedType {
                ty: self.name(ty),
                what: "materialized as a constant",
            });
        }
        if !fits {
            bail!(LowerError::TypeMismatch {
                site: "constant materialization".to_string(),
                expected: self.name(ty),
                found: value.to_string(),
            });
        }
        Ok(Constant { ty, value })
    }

    /// The all-zero constant of `ty`.
    pub fn zero(&self, ty: TypeId) -> Result<Constant> {
        let value = match self.family(ty) {
            TypeFamily::Integer => ConstValue::Int(0),
            TypeFamily::Float => ConstValue::Float(0.0),
            TypeFamily::Pointer | TypeFamily::Reference => ConstValue::Null,
            TypeFamily::Aggregate => ConstValue::Null, // rejected by `constant`
        };
        self.constant(ty, value)
    }
}
