//! Lowering error kinds.
//!
//! Every failure in the pipeline is fatal for the method being lowered. The
//! pipeline itself works in `anyhow::Result` and layers context on top of the
//! concrete [`LowerError`], which stays recoverable through [`LowerError::find`].

use crate::bytecode::{HandlerKind, Label};
use crate::ir::{BlockId, NodeId};
use std::fmt;
use thiserror::Error;

/// A half-open label range used to annotate structural errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: Label,
    /// `None` means the range runs to the end of the method.
    pub end: Option<Label>,
}

impl Span {
    pub fn new(start: Label, end: Option<Label>) -> Self {
        Self { start, end }
    }

    /// A span covering a single instruction.
    pub fn at(label: Label) -> Self {
        Self {
            start: label,
            end: Some(label),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) if end == self.start => write!(f, "{}", self.start),
            Some(end) => write!(f, "{}..{}", self.start, end),
            None => write!(f, "{}..end", self.start),
        }
    }
}

/// The four failure families a lowering run can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Instruction or region layout violates an assumed invariant.
    Structural,
    /// Opcode, handler kind, conversion or type pair outside the supported subset.
    Unsupported,
    /// Incompatible types met at a merge point or an operation.
    TypeMismatch,
    /// An invariant established by an earlier phase does not hold.
    Internal,
}

/// Errors raised while lowering a method.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LowerError {
    #[error("malformed method layout at {span}: {message}")]
    Structural { span: Span, message: String },

    #[error("unsupported instruction `{mnemonic}` at {label}")]
    UnsupportedInstruction { mnemonic: String, label: Label },

    #[error("unsupported exception handler kind `{kind}` at {span}")]
    UnsupportedHandler { kind: HandlerKind, span: Span },

    #[error("unsupported conversion from `{from}` to `{to}`")]
    UnsupportedConversion { from: String, to: String },

    #[error("no common type declared for `{lhs}` and `{rhs}`")]
    UnsupportedCommonType { lhs: String, rhs: String },

    #[error("type `{ty}` cannot be {what}")]
    UnsupportedType { ty: String, what: &'static str },

    #[error("type mismatch in {site}: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        site: String,
        expected: String,
        found: String,
    },

    #[error("incoming shape of {block} has {existing} entries but a predecessor provides {incoming}")]
    ShapeLength {
        block: BlockId,
        existing: usize,
        incoming: usize,
    },

    #[error("replacing {node} with {with} would create a cycle")]
    ReplacementCycle { node: NodeId, with: NodeId },

    #[error("fixpoint finished with unresolved blocks: {}", list_blocks(.blocks))]
    Unresolved { blocks: Vec<BlockId> },

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

fn list_blocks(blocks: &[BlockId]) -> String {
    blocks
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl LowerError {
    pub fn structural(span: Span, message: impl Into<String>) -> Self {
        LowerError::Structural {
            span,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        LowerError::Internal(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            LowerError::Structural { .. } => ErrorCategory::Structural,
            LowerError::UnsupportedInstruction { .. }
            | LowerError::UnsupportedHandler { .. }
            | LowerError::UnsupportedConversion { .. }
            | LowerError::UnsupportedCommonType { .. }
            | LowerError::UnsupportedType { .. } => ErrorCategory::Unsupported,
            LowerError::TypeMismatch { .. } | LowerError::ShapeLength { .. } => {
                ErrorCategory::TypeMismatch
            }
            LowerError::ReplacementCycle { .. }
            | LowerError::Unresolved { .. }
            | LowerError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Finds the `LowerError` underneath any context layers.
    pub fn find(err: &anyhow::Error) -> Option<&LowerError> {
        err.chain().find_map(|e| e.downcast_ref::<LowerError>())
    }
}
