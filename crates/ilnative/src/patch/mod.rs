//! Rewrite passes over a lowered method.
//!
//! Passes never remove nodes or touch block node lists. They rewrite by
//! allocating a replacement node and redirecting references to it through
//! [`NodeGraph::replace`](crate::ir::NodeGraph::replace).

use crate::ir::Method;
use crate::types::TypeTable;
use crate::LowerOptions;
use anyhow::Result;

// ── Passes ───────────────────────────────────────────────────────────────────
mod conversion_calls;

pub use conversion_calls::patch_conversion_calls;

/// Runs every enabled pass in order. Returns the number of rewritten nodes.
pub fn run_patches(
    method: &mut Method,
    types: &TypeTable,
    options: &LowerOptions,
) -> Result<usize> {
    let mut patched = 0;
    if options.patch_conversion_calls {
        patched += patch_conversion_calls(method, types, &options.conversion_routines)?;
    }
    Ok(patched)
}
