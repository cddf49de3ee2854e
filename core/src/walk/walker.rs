use std::sync::Arc;

use tracing::{debug, trace};

use crate::code::CodeObject;
use crate::frame::{FrameRef, FrameRepr, ShadowStack};
use crate::gil::GilToken;
use crate::object::ObjRef;

use super::snapshot::{CallStackSnapshot, SnapshotDetail, StackEntry, StackSample, StackSamples};
use super::{WalkDirective, WalkError, max_depth};

const TRACE_TARGET: &str = "umbra::walk";

/// The frame a walk visits after `frame`: its awaiter if one is alive,
/// otherwise its predecessor.
#[inline]
pub fn next_frame(frame: &FrameRef) -> Option<FrameRef> {
    frame.awaiter().or_else(|| frame.prev())
}

/// Visit the current thread's logical call chain, innermost first.
///
/// Returns the number of frames visited.
pub fn walk<F>(visit: F) -> Result<usize, WalkError>
where
    F: FnMut(&FrameRef) -> Result<WalkDirective, WalkError>,
{
    walk_from(ShadowStack::current(), visit)
}

/// Like [`walk`], starting at an arbitrary frame.
pub fn walk_from<F>(start: Option<FrameRef>, mut visit: F) -> Result<usize, WalkError>
where
    F: FnMut(&FrameRef) -> Result<WalkDirective, WalkError>,
{
    let limit = max_depth();
    let mut visited = 0usize;
    let mut cursor = start;
    while let Some(frame) = cursor {
        if visited >= limit {
            debug!(target: TRACE_TARGET, limit, "walk exceeded depth bound");
            return Err(WalkError::DepthExceeded { limit });
        }
        visited += 1;
        if visit(&frame)? == WalkDirective::Stop {
            break;
        }
        cursor = next_frame(&frame);
    }
    trace!(target: TRACE_TARGET, frames = visited, "walk finished");
    Ok(visited)
}

fn push_bounded<T>(out: &mut Vec<T>, item: T) -> Result<(), WalkError> {
    out.try_reserve(1).map_err(|_| WalkError::OutOfMemory)?;
    out.push(item);
    Ok(())
}

/// Snapshot of the logical call chain, outermost frame first.
pub fn snapshot(detail: SnapshotDetail) -> Result<CallStackSnapshot, WalkError> {
    let mut entries = Vec::new();
    walk(|frame| {
        let resolved = frame.resolve();
        let entry = StackEntry {
            qualname: resolved.qualified_name,
            line: if detail.wants_line() { frame.line() } else { None },
            frame: if detail.wants_frame() { resolved.frame } else { None },
        };
        push_bounded(&mut entries, entry)?;
        Ok(WalkDirective::Continue)
    })?;
    Ok(CallStackSnapshot::from_innermost_first(entries))
}

/// Code objects on the native chain, outermost first. Awaiter links are
/// ignored.
pub fn sync_call_stack() -> Result<Vec<Arc<CodeObject>>, WalkError> {
    let limit = max_depth();
    let mut codes = Vec::new();
    let mut cursor = ShadowStack::current();
    while let Some(frame) = cursor {
        if codes.len() >= limit {
            return Err(WalkError::DepthExceeded { limit });
        }
        push_bounded(&mut codes, Arc::clone(frame.code()))?;
        cursor = frame.prev();
    }
    codes.reverse();
    Ok(codes)
}

/// First parameter of the first frame named `name`, after skipping `skip`
/// frames of the walk.
///
/// Only frames that already carry a record can match. Compact frames are
/// passed over, never materialized. `Ok(None)` when nothing matches.
pub fn find_first_arg(gil: GilToken<'_>, name: &str, skip: usize) -> Result<Option<ObjRef>, WalkError> {
    let mut remaining = skip;
    let mut found = None;
    walk(|frame| {
        if remaining > 0 {
            remaining -= 1;
            return Ok(WalkDirective::Continue);
        }
        let FrameRepr::Materialized(record) = frame.repr() else {
            return Ok(WalkDirective::Continue);
        };
        if &**record.code().name() != name {
            return Ok(WalkDirective::Continue);
        }
        found = record.first_arg(gil);
        Ok(WalkDirective::Stop)
    })?;
    Ok(found)
}

/// Fill both profiler views of the current stack, innermost first, with at
/// most `capacity` frames each.
pub fn populate_stacks(capacity: usize) -> Result<StackSamples, WalkError> {
    let mut samples = StackSamples::default();
    walk(|frame| {
        if samples.async_stack.len() >= capacity {
            return Ok(WalkDirective::Stop);
        }
        let sample = StackSample {
            code: Arc::clone(frame.code()),
            line: frame.line(),
        };
        push_bounded(&mut samples.async_stack, sample)?;
        Ok(WalkDirective::Continue)
    })?;

    let mut cursor = ShadowStack::current();
    while let Some(frame) = cursor {
        if samples.sync_stack.len() >= capacity {
            break;
        }
        let sample = StackSample {
            code: Arc::clone(frame.code()),
            line: frame.line(),
        };
        push_bounded(&mut samples.sync_stack, sample)?;
        cursor = frame.prev();
    }
    Ok(samples)
}
