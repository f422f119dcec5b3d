//! Region mapping: exception-handler table → region tree + zones.

use super::super::types::*;
use crate::bytecode::{ExceptionHandler, HandlerKind, Label, NormalizedBody};
use crate::error::{LowerError, Span};
use crate::types::TypeId;
use anyhow::{bail, Context, Result};

/// Builds the region tree and one zone per try region.
pub(super) fn map_regions(
    code: &NormalizedBody,
    handlers: &[ExceptionHandler],
) -> Result<(RegionTree, Vec<Zone>)> {
    let mut tree = RegionTree::new(code.len());
    let mut links = Vec::with_capacity(handlers.len());

    // inserted back to front so outer ranges adopt inner ones
    for handler in handlers.iter().rev() {
        let span = Span::new(handler.try_start, handler.handler_end);
        let handler_kind = match handler.kind {
            HandlerKind::Catch => RegionKind::Catch,
            HandlerKind::Finally => RegionKind::Finally,
            kind @ (HandlerKind::Filter | HandlerKind::Fault) => {
                bail!(LowerError::UnsupportedHandler { kind, span });
            }
        };
        if handler.kind == HandlerKind::Catch && handler.catch_type.is_none() {
            bail!(LowerError::structural(span, "catch handler without a caught type"));
        }

        let (try_start, try_end) = range(code, handler.try_start, handler.try_end)?;
        let (h_start, h_end) = range(code, handler.handler_start, handler.handler_end)?;

        let try_region = insert(&mut tree, RegionKind::Try, try_start, try_end, span)
            .with_context(|| format!("mapping try range of {} handler at {}", handler.kind, span))?;
        let handler_region = insert(&mut tree, handler_kind, h_start, h_end, span)
            .with_context(|| format!("mapping {} handler range at {}", handler.kind, span))?;

        links.push((try_region, handler_region, handler.catch_type, span));
    }

    // handler lists keep table order: first matching catch wins
    for (try_region, handler_region, catch_type, span) in links.into_iter().rev() {
        link(&mut tree, try_region, handler_region, catch_type, span)?;
    }

    check_alignment(&tree, code)?;
    let zones = build_zones(&tree);

    tracing::debug!(
        regions = tree.len(),
        zones = zones.len(),
        "mapped exception regions"
    );
    Ok((tree, zones))
}

/// Positions `[start, end)` for a label range; `None` ends at the method end.
fn range(code: &NormalizedBody, start: Label, end: Option<Label>) -> Result<(usize, usize)> {
    let span = Span::new(start, end);
    let start_pos = code
        .position(start)
        .ok_or_else(|| LowerError::structural(span, format!("{} is not an instruction", start)))?;
    let end_pos = match end {
        Some(label) => code.position(label).ok_or_else(|| {
            LowerError::structural(span, format!("{} is not an instruction", label))
        })?,
        None => code.len(),
    };
    if start_pos >= end_pos {
        bail!(LowerError::structural(span, "empty or inverted range"));
    }
    Ok((start_pos, end_pos))
}

/// Inserts a region under the smallest region containing it, or returns an
/// identical existing region.
fn insert(
    tree: &mut RegionTree,
    kind: RegionKind,
    start: usize,
    end: usize,
    span: Span,
) -> Result<RegionId> {
    let mut parent = RegionTree::ROOT;
    'descend: loop {
        for &child in &tree.get(parent).children {
            let region = tree.get(child);
            if !region.contains_range(start, end) {
                continue;
            }
            if region.start == start && region.end == end {
                if region.kind == kind {
                    return Ok(child);
                }
                bail!(LowerError::structural(
                    span,
                    format!(
                        "{} range coincides with existing {} region {}",
                        kind, region.kind, child
                    )
                ));
            }
            parent = child;
            continue 'descend;
        }
        break;
    }

    let mut adopted = Vec::new();
    let mut kept = Vec::new();
    for &child in &tree.get(parent).children {
        let region = tree.get(child);
        if start <= region.start && region.end <= end {
            adopted.push(child);
        } else if region.overlaps(start, end) {
            bail!(LowerError::structural(
                span,
                format!(
                    "{} range [{}, {}) partially overlaps {} region {} [{}, {})",
                    kind, start, end, region.kind, child, region.start, region.end
                )
            ));
        } else {
            kept.push(child);
        }
    }

    let id = RegionId(tree.len() as u32);
    tree.regions.push(Region {
        id,
        kind,
        start,
        end,
        parent: Some(parent),
        children: adopted.clone(),
        associated: None,
        handlers: Vec::new(),
        catch_type: None,
    });
    for child in adopted {
        tree.get_mut(child).parent = Some(id);
    }
    kept.push(id);
    kept.sort_by_key(|&r| tree.get(r).start);
    tree.get_mut(parent).children = kept;
    Ok(id)
}

fn link(
    tree: &mut RegionTree,
    try_region: RegionId,
    handler: RegionId,
    catch_type: Option<TypeId>,
    span: Span,
) -> Result<()> {
    match tree.get(handler).associated {
        Some(existing) if existing == try_region => {
            bail!(LowerError::structural(span, "duplicate handler for the same try range"));
        }
        Some(existing) => {
            bail!(LowerError::structural(
                span,
                format!("handler {} already belongs to {}", handler, existing)
            ));
        }
        None => {}
    }
    if tree.get(handler).kind == RegionKind::Finally {
        let has_finally = tree
            .get(try_region)
            .handlers
            .iter()
            .any(|&h| tree.get(h).kind == RegionKind::Finally);
        if has_finally {
            bail!(LowerError::structural(span, "try region has a second finally handler"));
        }
    }

    let region = tree.get_mut(handler);
    region.associated = Some(try_region);
    region.catch_type = catch_type;
    tree.get_mut(try_region).handlers.push(handler);
    Ok(())
}

/// Every region must start on a jump destination and end right before one.
fn check_alignment(tree: &RegionTree, code: &NormalizedBody) -> Result<()> {
    for region in tree.iter().skip(1) {
        let start = code.instructions[region.start].label;
        let end = code.instructions.get(region.end).map(|i| i.label);
        let span = Span::new(start, end);
        if !code.is_jump_destination(start) {
            bail!(LowerError::structural(
                span,
                format!("{} region {} does not start on a block boundary", region.kind, region.id)
            ));
        }
        if let Some(end) = end {
            if !code.is_jump_destination(end) {
                bail!(LowerError::structural(
                    span,
                    format!("{} region {} does not end on a block boundary", region.kind, region.id)
                ));
            }
        }
    }
    Ok(())
}

fn build_zones(tree: &RegionTree) -> Vec<Zone> {
    tree.iter()
        .filter(|r| r.kind == RegionKind::Try)
        .map(|try_region| {
            let mut zone = Zone {
                try_region: try_region.id,
                catches: Vec::new(),
                finally: None,
            };
            for &h in &try_region.handlers {
                let handler = tree.get(h);
                match (handler.kind, handler.catch_type) {
                    (RegionKind::Catch, Some(caught)) => zone.catches.push(CatchCase {
                        caught,
                        region: h,
                    }),
                    (RegionKind::Finally, _) => zone.finally = Some(h),
                    _ => {}
                }
            }
            zone
        })
        .collect()
}
