//! Conversion, common-type and merge tables.
//!
//! All tables are partial on purpose. A pair that is not listed is reported
//! as an unsupported error so the gap shows up at the site that needs it.

use super::{PrimitiveKind, SizeClass, TypeFamily, TypeId, TypeTable, ValueType};
use crate::error::LowerError;
use anyhow::{bail, Result};
use std::fmt;

/// How a value moves from one type to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Same representation, reinterpret the bits.
    BitCast,
    ZeroExtend,
    SignExtend,
    Truncate,
    IntToPtr,
    PtrToInt,
    IntToFloat { signed: bool },
    FloatToInt { signed: bool },
    FloatExtend,
    FloatTruncate,
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conversion::BitCast => f.write_str("bitcast"),
            Conversion::ZeroExtend => f.write_str("zext"),
            Conversion::SignExtend => f.write_str("sext"),
            Conversion::Truncate => f.write_str("trunc"),
            Conversion::IntToPtr => f.write_str("inttoptr"),
            Conversion::PtrToInt => f.write_str("ptrtoint"),
            Conversion::IntToFloat { signed: true } => f.write_str("sitofp"),
            Conversion::IntToFloat { signed: false } => f.write_str("uitofp"),
            Conversion::FloatToInt { signed: true } => f.write_str("fptosi"),
            Conversion::FloatToInt { signed: false } => f.write_str("fptoui"),
            Conversion::FloatExtend => f.write_str("fpext"),
            Conversion::FloatTruncate => f.write_str("fptrunc"),
        }
    }
}

fn is_stack_pair(a: PrimitiveKind, b: PrimitiveKind) -> bool {
    use PrimitiveKind::*;
    matches!(
        (a, b),
        (I32, U32) | (U32, I32) | (I64, U64) | (U64, I64) | (IntPtr, UIntPtr) | (UIntPtr, IntPtr)
    )
}

fn is_word(kind: PrimitiveKind) -> bool {
    matches!(kind, PrimitiveKind::I32 | PrimitiveKind::U32)
}

impl TypeTable {
    /// The conversion class taking a `from` value to `to`.
    pub fn conversion(&self, from: TypeId, to: TypeId) -> Result<Conversion> {
        let (src, dst) = (self.underlying(from), self.underlying(to));
        if src == dst {
            return Ok(Conversion::BitCast);
        }

        let unsupported = || LowerError::UnsupportedConversion {
            from: self.name(from),
            to: self.name(to),
        };

        match (self.get(src), self.get(dst)) {
            (ValueType::Primitive(a), ValueType::Primitive(b)) => {
                let (a, b) = (*a, *b);
                match (a.is_float(), b.is_float()) {
                    (false, false) => {
                        let (from_bits, to_bits) = match (self.bits(src), self.bits(dst)) {
                            (Some(x), Some(y)) => (x, y),
                            _ => bail!(unsupported()),
                        };
                        Ok(if from_bits == to_bits {
                            Conversion::BitCast
                        } else if from_bits > to_bits {
                            Conversion::Truncate
                        } else {
                            // Sub-word sources keep their own signedness, wider
                            // sources take the signedness of the target.
                            let signed = if from_bits < 32 {
                                a.is_signed()
                            } else {
                                b.is_signed()
                            };
                            if signed {
                                Conversion::SignExtend
                            } else {
                                Conversion::ZeroExtend
                            }
                        })
                    }
                    (false, true) => Ok(Conversion::IntToFloat {
                        signed: a.is_signed(),
                    }),
                    (true, false) => Ok(Conversion::FloatToInt {
                        signed: b.is_signed(),
                    }),
                    (true, true) => Ok(if a == PrimitiveKind::F32 {
                        Conversion::FloatExtend
                    } else {
                        Conversion::FloatTruncate
                    }),
                }
            }
            (ValueType::Primitive(a), ValueType::Pointer { .. }) if a.is_native() => {
                Ok(Conversion::IntToPtr)
            }
            (ValueType::Pointer { .. } | ValueType::Reference { .. }, ValueType::Primitive(b))
                if b.is_native() =>
            {
                Ok(Conversion::PtrToInt)
            }
            (ValueType::Pointer { .. }, ValueType::Pointer { .. }) => Ok(Conversion::BitCast),
            _ => bail!(unsupported()),
        }
    }

    /// Result type of a binary operation on `lhs` and `rhs`.
    pub fn most_complex(&self, lhs: TypeId, rhs: TypeId) -> Result<TypeId> {
        let (a, b) = (self.underlying(lhs), self.underlying(rhs));
        if a == b {
            return Ok(a);
        }

        match (self.get(a), self.get(b)) {
            (ValueType::Primitive(x), ValueType::Primitive(y))
                if x.is_integer() && y.is_integer() =>
            {
                let (x, y) = (*x, *y);
                if !x.is_small() && x.size_class() == y.size_class() {
                    // Shared representation, prefer the signed view.
                    return Ok(if x.is_signed() { a } else { b });
                }
                if x.is_small() && y.is_small() {
                    return Ok(self.primitive(PrimitiveKind::I32));
                }
                if x.is_small() && (is_word(y) || y.is_native()) {
                    return Ok(b);
                }
                if y.is_small() && (is_word(x) || x.is_native()) {
                    return Ok(a);
                }
                if is_word(x) && y.is_native() {
                    return Ok(b);
                }
                if x.is_native() && is_word(y) {
                    return Ok(a);
                }
            }
            (ValueType::Primitive(x), ValueType::Primitive(y)) if x.is_float() && y.is_float() => {
                return Ok(self.primitive(PrimitiveKind::F64));
            }
            (ValueType::Pointer { .. }, ValueType::Primitive(y))
                if is_word(*y) || y.is_native() =>
            {
                return Ok(a);
            }
            (ValueType::Primitive(x), ValueType::Pointer { .. })
                if is_word(*x) || x.is_native() =>
            {
                return Ok(b);
            }
            _ => {}
        }

        if self.family(a) == self.family(b) {
            bail!(LowerError::UnsupportedCommonType {
                lhs: self.name(lhs),
                rhs: self.name(rhs),
            });
        }
        bail!(LowerError::TypeMismatch {
            site: "binary operation".to_string(),
            expected: self.name(lhs),
            found: self.name(rhs),
        })
    }

    /// Whether the two types share one stack representation.
    pub fn stack_compatible(&self, a: TypeId, b: TypeId) -> bool {
        let (a, b) = (self.underlying(a), self.underlying(b));
        if a == b {
            return true;
        }
        match (self.as_primitive(a), self.as_primitive(b)) {
            (Some(x), Some(y)) => is_stack_pair(x, y),
            _ => false,
        }
    }

    /// Unifies two incoming types for the same stack slot of a merge block.
    ///
    /// `existing` wins whenever both types share a representation, so merging
    /// a shape into itself leaves it untouched.
    pub fn merge(&self, existing: TypeId, incoming: TypeId) -> Result<TypeId> {
        if existing == incoming {
            return Ok(existing);
        }
        let (a, b) = (self.underlying(existing), self.underlying(incoming));
        if a == b || self.stack_compatible(a, b) {
            return Ok(existing);
        }
        let i32_ty = self.primitive(PrimitiveKind::I32);
        match (self.as_primitive(a), self.as_primitive(b)) {
            (Some(x), Some(PrimitiveKind::I32)) if x.is_small() => return Ok(i32_ty),
            (Some(PrimitiveKind::I32), Some(y)) if y.is_small() => return Ok(i32_ty),
            _ => {}
        }

        if self.family(a) != self.family(b) {
            bail!(LowerError::TypeMismatch {
                site: "incoming shape merge".to_string(),
                expected: self.name(existing),
                found: self.name(incoming),
            });
        }
        bail!(LowerError::UnsupportedCommonType {
            lhs: self.name(existing),
            rhs: self.name(incoming),
        })
    }

    /// Whether a `value` may be stored into a slot declared as `target`.
    pub fn assignable(&self, value: TypeId, target: TypeId) -> bool {
        if self.stack_compatible(value, target) {
            return true;
        }
        match (self.family(value), self.family(target)) {
            (TypeFamily::Integer, TypeFamily::Integer) => {
                let narrow = |id| {
                    matches!(
                        self.size_class(id),
                        SizeClass::Bits8 | SizeClass::Bits16 | SizeClass::Bits32
                    )
                };
                narrow(value) && narrow(target)
            }
            (TypeFamily::Float, TypeFamily::Float) => true,
            (TypeFamily::Reference, TypeFamily::Reference) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointerWidth;
    use PrimitiveKind::*;

    fn table() -> TypeTable {
        TypeTable::new(PointerWidth::Bits64)
    }

    #[test]
    fn integer_conversions() {
        let t = table();
        let p = |k| t.primitive(k);
        assert_eq!(t.conversion(p(I8), p(I32)).unwrap(), Conversion::SignExtend);
        assert_eq!(t.conversion(p(U16), p(I64)).unwrap(), Conversion::ZeroExtend);
        assert_eq!(t.conversion(p(Char), p(I32)).unwrap(), Conversion::ZeroExtend);
        assert_eq!(t.conversion(p(I32), p(U64)).unwrap(), Conversion::ZeroExtend);
        assert_eq!(t.conversion(p(I32), p(I64)).unwrap(), Conversion::SignExtend);
        assert_eq!(t.conversion(p(I64), p(U8)).unwrap(), Conversion::Truncate);
        assert_eq!(t.conversion(p(I32), p(U32)).unwrap(), Conversion::BitCast);
        assert_eq!(t.conversion(p(I64), p(IntPtr)).unwrap(), Conversion::BitCast);
    }

    #[test]
    fn native_width_changes_conversions() {
        let t = TypeTable::new(PointerWidth::Bits32);
        let p = |k| t.primitive(k);
        assert_eq!(t.conversion(p(I64), p(IntPtr)).unwrap(), Conversion::Truncate);
        assert_eq!(t.conversion(p(IntPtr), p(I32)).unwrap(), Conversion::BitCast);
    }

    #[test]
    fn float_conversions() {
        let t = table();
        let p = |k| t.primitive(k);
        assert_eq!(
            t.conversion(p(U32), p(F64)).unwrap(),
            Conversion::IntToFloat { signed: false }
        );
        assert_eq!(
            t.conversion(p(F32), p(I16)).unwrap(),
            Conversion::FloatToInt { signed: true }
        );
        assert_eq!(t.conversion(p(F32), p(F64)).unwrap(), Conversion::FloatExtend);
        assert_eq!(t.conversion(p(F64), p(F32)).unwrap(), Conversion::FloatTruncate);
    }

    #[test]
    fn pointer_conversions() {
        let mut t = table();
        let i32_ty = t.primitive(I32);
        let ptr = t.pointer_to(i32_ty);
        let byte_ptr = {
            let u8_ty = t.primitive(U8);
            t.pointer_to(u8_ty)
        };
        let native = t.primitive(IntPtr);
        assert_eq!(t.conversion(native, ptr).unwrap(), Conversion::IntToPtr);
        assert_eq!(t.conversion(ptr, native).unwrap(), Conversion::PtrToInt);
        assert_eq!(t.conversion(ptr, byte_ptr).unwrap(), Conversion::BitCast);

        let err = t.conversion(i32_ty, ptr).unwrap_err();
        assert!(matches!(
            LowerError::find(&err),
            Some(LowerError::UnsupportedConversion { .. })
        ));
    }

    #[test]
    fn enum_conversions_go_through_underlying() {
        let mut t = table();
        let color = t.enumeration("Color", U8);
        assert_eq!(
            t.conversion(color, t.primitive(I32)).unwrap(),
            Conversion::ZeroExtend
        );
        assert_eq!(
            t.conversion(color, t.primitive(U8)).unwrap(),
            Conversion::BitCast
        );
    }

    #[test]
    fn most_complex_widens_small_integers() {
        let t = table();
        let p = |k| t.primitive(k);
        assert_eq!(t.most_complex(p(Bool), p(I32)).unwrap(), p(I32));
        assert_eq!(t.most_complex(p(Char), p(I32)).unwrap(), p(I32));
        assert_eq!(t.most_complex(p(U8), p(I16)).unwrap(), p(I32));
        assert_eq!(t.most_complex(p(U32), p(I32)).unwrap(), p(I32));
        assert_eq!(t.most_complex(p(U64), p(I64)).unwrap(), p(I64));
        assert_eq!(t.most_complex(p(I32), p(IntPtr)).unwrap(), p(IntPtr));
        assert_eq!(t.most_complex(p(F32), p(F64)).unwrap(), p(F64));
    }

    #[test]
    fn most_complex_pointer_arithmetic() {
        let mut t = table();
        let i8_ty = t.primitive(I8);
        let ptr = t.pointer_to(i8_ty);
        assert_eq!(t.most_complex(ptr, t.primitive(I32)).unwrap(), ptr);
        assert_eq!(t.most_complex(t.primitive(IntPtr), ptr).unwrap(), ptr);
    }

    #[test]
    fn most_complex_rejects_unlisted_pairs() {
        let mut t = table();
        let err = t.most_complex(t.primitive(I32), t.primitive(I64)).unwrap_err();
        assert!(matches!(
            LowerError::find(&err),
            Some(LowerError::UnsupportedCommonType { .. })
        ));
        let obj = t.class("Object", 0);
        let obj_ref = t.reference_to(obj);
        let err = t.most_complex(obj_ref, t.primitive(F64)).unwrap_err();
        assert!(matches!(
            LowerError::find(&err),
            Some(LowerError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn stack_compatible_pairs() {
        let mut t = table();
        let p = |t: &TypeTable, k| t.primitive(k);
        assert!(t.stack_compatible(p(&t, I64), p(&t, U64)));
        assert!(t.stack_compatible(p(&t, IntPtr), p(&t, UIntPtr)));
        assert!(!t.stack_compatible(p(&t, I32), p(&t, I64)));
        let color = t.enumeration("Color", I32);
        assert!(t.stack_compatible(color, p(&t, I32)));
        assert!(t.stack_compatible(color, p(&t, U32)));
    }

    #[test]
    fn merge_is_idempotent_and_prefers_existing() {
        let t = table();
        let p = |k| t.primitive(k);
        assert_eq!(t.merge(p(I32), p(I32)).unwrap(), p(I32));
        assert_eq!(t.merge(p(U64), p(I64)).unwrap(), p(U64));
        assert_eq!(t.merge(p(Bool), p(I32)).unwrap(), p(I32));
        assert_eq!(t.merge(p(I32), p(Char)).unwrap(), p(I32));
    }

    #[test]
    fn merge_keeps_enum_against_its_underlying_type() {
        let mut t = table();
        let color = t.enumeration("Color", I32);
        let i32_ty = t.primitive(I32);
        assert_eq!(t.merge(color, i32_ty).unwrap(), color);
        assert_eq!(t.merge(i32_ty, color).unwrap(), i32_ty);
    }

    #[test]
    fn merge_failures_are_loud() {
        let mut t = table();
        let point = t.class("Point", 8);
        let err = t.merge(point, t.primitive(I32)).unwrap_err();
        assert!(matches!(
            LowerError::find(&err),
            Some(LowerError::TypeMismatch { .. })
        ));
        let err = t.merge(t.primitive(I32), t.primitive(I64)).unwrap_err();
        assert!(matches!(
            LowerError::find(&err),
            Some(LowerError::UnsupportedCommonType { .. })
        ));
    }

    #[test]
    fn assignability() {
        let mut t = table();
        let p = |t: &TypeTable, k| t.primitive(k);
        assert!(t.assignable(p(&t, I32), p(&t, U8)));
        assert!(t.assignable(p(&t, Bool), p(&t, I32)));
        assert!(t.assignable(p(&t, F64), p(&t, F32)));
        assert!(!t.assignable(p(&t, I64), p(&t, I32)));
        assert!(!t.assignable(p(&t, F32), p(&t, I32)));
        let a = t.class("A", 0);
        let b = t.class("B", 0);
        let (ra, rb) = (t.reference_to(a), t.reference_to(b));
        assert!(t.assignable(ra, rb));
    }
}
