//! ilnative: stack bytecode to typed block IR.
//!
//! This crate provides the lowering pipeline of an ahead-of-time compiler:
//! it takes method bodies expressed as CIL-style stack bytecode plus their
//! exception-handler tables and produces blocks of typed IR nodes that a
//! native backend can generate code from in list order.

pub mod bytecode;
pub mod error;
pub mod ir;
pub mod patch;
pub mod types;

// Re-export key types for convenience
pub use anyhow::{Context, Result};
pub use error::{ErrorCategory, LowerError, Span};

use bytecode::MethodBody;
use ir::{build_method, walk, Method};
use types::TypeTable;

/// Configuration options for lowering
#[derive(Debug, Clone)]
pub struct LowerOptions {
    /// Rewrite calls to known conversion routines into conversion nodes
    pub patch_conversion_calls: bool,
    /// Fully-qualified routines the conversion-call pass recognizes
    pub conversion_routines: Vec<String>,
    /// Check generation order after lowering
    pub validate_generation_order: bool,
}

const DEFAULT_CONVERSION_ROUTINES: &[&str] = &[
    "System.Convert::ToSByte",
    "System.Convert::ToByte",
    "System.Convert::ToInt16",
    "System.Convert::ToUInt16",
    "System.Convert::ToChar",
    "System.Convert::ToInt32",
    "System.Convert::ToUInt32",
    "System.Convert::ToInt64",
    "System.Convert::ToUInt64",
    "System.Convert::ToSingle",
    "System.Convert::ToDouble",
];

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            patch_conversion_calls: true,
            conversion_routines: DEFAULT_CONVERSION_ROUTINES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            validate_generation_order: true,
        }
    }
}

/// Lower one method body to block IR.
///
/// This is the main entry point for the lowering pipeline. Any failure is
/// fatal for the method; no partial result is returned.
///
/// # Example
/// ```
/// use ilnative::bytecode::{BinaryOp, Instruction, Label, MethodBody, Opcode};
/// use ilnative::types::{PointerWidth, PrimitiveKind, TypeTable};
/// use ilnative::{lower_method, LowerOptions};
///
/// let types = TypeTable::new(PointerWidth::Bits64);
/// let mut body = MethodBody::new("Program::Three");
/// body.return_type = Some(types.primitive(PrimitiveKind::I32));
/// body.instructions = vec![
///     Instruction::new(Label(0), Opcode::LdcI4(1)),
///     Instruction::new(Label(1), Opcode::LdcI4(2)),
///     Instruction::new(Label(2), Opcode::Binary(BinaryOp::Add)),
///     Instruction::new(Label(3), Opcode::Ret),
/// ];
/// let method = lower_method(&body, &types, &LowerOptions::default()).unwrap();
/// assert_eq!(method.blocks.len(), 1);
/// ```
pub fn lower_method(
    body: &MethodBody,
    types: &TypeTable,
    options: &LowerOptions,
) -> Result<Method> {
    let mut method = build_method(body, types)?;

    let patched = patch::run_patches(&mut method, types, options).context("running patch passes")?;

    if options.validate_generation_order {
        walk::validate_generation_order(&method).context("validating generation order")?;
    }

    tracing::debug!(
        method = %method.name,
        blocks = method.blocks.len(),
        nodes = method.graph.len(),
        patched,
        "lowered method"
    );
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!(ir = %method.display(types), "lowered IR");
    }
    Ok(method)
}

/// Lower methods one after another, stopping at the first failure.
pub fn lower_methods(
    bodies: &[MethodBody],
    types: &TypeTable,
    options: &LowerOptions,
) -> Result<Vec<Method>> {
    bodies
        .iter()
        .map(|body| {
            lower_method(body, types, options)
                .with_context(|| format!("lowering method {}", body.name))
        })
        .collect()
}
