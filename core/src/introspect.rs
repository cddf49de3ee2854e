//! Diagnostic queries over the current thread's call stack.
//!
//! Thin wrappers over [`crate::walk`] shaped for debuggers and profilers.

use std::sync::Arc;

use crate::code::CodeObject;
use crate::frame::{FrameError, FrameHandle, ShadowStack};
use crate::generator::{GeneratorContext, GeneratorError};
use crate::gil::GilToken;
use crate::object::{ObjRef, TypeDescriptor};
use crate::walk::{self, SnapshotDetail, WalkError};

/// Code objects on the native chain, outermost first.
pub fn call_stack() -> Result<Vec<Arc<CodeObject>>, WalkError> {
    walk::sync_call_stack()
}

pub fn entire_call_stack_as_qualnames() -> Result<Vec<Arc<str>>, WalkError> {
    let snapshot = walk::snapshot(SnapshotDetail::Names)?;
    Ok(snapshot.into_entries().into_iter().map(|entry| entry.qualname).collect())
}

pub fn entire_call_stack_as_qualnames_with_lineno() -> Result<Vec<(Arc<str>, Option<u32>)>, WalkError> {
    let snapshot = walk::snapshot(SnapshotDetail::NamesAndLines)?;
    Ok(snapshot
        .into_entries()
        .into_iter()
        .map(|entry| (entry.qualname, entry.line))
        .collect())
}

pub type FrameTriple = (Arc<str>, Option<u32>, Option<FrameHandle>);

pub fn entire_call_stack_as_qualnames_with_lineno_and_frame() -> Result<Vec<FrameTriple>, WalkError> {
    let snapshot = walk::snapshot(SnapshotDetail::NamesLinesAndFrames)?;
    Ok(snapshot
        .into_entries()
        .into_iter()
        .map(|entry| (entry.qualname, entry.line, entry.frame))
        .collect())
}

/// First parameter of the most recent frame named `name`, after skipping
/// `skip` frames.
pub fn get_arg0_from_frame(gil: GilToken<'_>, name: &str, skip: usize) -> Result<Option<ObjRef>, WalkError> {
    walk::find_first_arg(gil, name, skip)
}

/// Full record of whoever awaits the running coroutine.
///
/// `NotFound` when nothing awaits it; `NotSupported` when the awaiter is
/// compiled code that cannot produce a record.
pub fn get_awaiter_frame() -> Result<FrameHandle, FrameError> {
    let current = ShadowStack::current().ok_or(FrameError::NotFound)?;
    let awaiter = current.awaiter().ok_or(FrameError::NotFound)?;
    awaiter.materialize()
}

pub fn get_coro_awaiter(coroutine: &GeneratorContext) -> Result<Option<Arc<GeneratorContext>>, GeneratorError> {
    if !coroutine.kind().is_coroutine() {
        return Err(GeneratorError::NotACoroutine {
            kind: coroutine.kind(),
        });
    }
    Ok(coroutine.awaiter())
}

pub fn has_no_shadowing_instances(ty: &TypeDescriptor) -> bool {
    ty.has_no_shadowing_instances()
}
