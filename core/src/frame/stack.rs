use std::cell::{Cell, RefCell};
use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use super::FrameError;
use super::record::FrameHandle;
use super::shadow::{FrameRef, ShadowFrame};

const TRACE_TARGET: &str = "umbra::frame";

thread_local! {
    static CURRENT: RefCell<Option<FrameRef>> = const { RefCell::new(None) };
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// The calling thread's chain of live frames.
///
/// Every operation touches only the calling thread's own chain, so none of
/// them needs the global lock.
pub struct ShadowStack;

impl ShadowStack {
    /// Link `frame` on top of the current chain.
    #[inline]
    pub fn push(frame: FrameRef) {
        debug_assert!(!frame.is_linked(), "frame pushed while already linked");
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            debug_assert!(
                current.as_ref().is_none_or(|top| !Arc::ptr_eq(top, &frame)),
                "frame pushed on top of itself"
            );
            frame.link(current.take());
            *current = Some(frame);
        });
        DEPTH.with(|depth| depth.set(depth.get() + 1));
    }

    /// Unlink and return the top frame.
    #[inline]
    pub fn pop() -> Option<FrameRef> {
        let top = CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            let top = current.take()?;
            *current = top.unlink();
            Some(top)
        })?;
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        Some(top)
    }

    #[inline]
    pub fn current() -> Option<FrameRef> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub fn depth() -> usize {
        DEPTH.with(Cell::get)
    }

    /// Push `frame` for the lifetime of the returned guard.
    pub fn enter(frame: FrameRef) -> FrameGuard {
        Self::push(Arc::clone(&frame));
        FrameGuard { frame }
    }

    /// Materialize every frame on the chain, innermost first.
    ///
    /// Frames that cannot be materialized fail the whole request.
    pub fn materialize_all() -> Result<Vec<FrameHandle>, FrameError> {
        let mut records = Vec::with_capacity(Self::depth());
        let mut cursor = Self::current();
        while let Some(frame) = cursor {
            records.push(frame.materialize()?);
            cursor = frame.prev();
        }
        debug!(target: TRACE_TARGET, frames = records.len(), "materialized call stack");
        Ok(records)
    }

    /// Check that the predecessor chain is finite and that the tracked depth
    /// matches it.
    pub fn verify_chain(max_depth: usize) -> Result<usize, FrameError> {
        let mut seen: FxHashSet<*const ShadowFrame> = FxHashSet::default();
        let mut cursor = Self::current();
        let mut depth = 0usize;
        while let Some(frame) = cursor {
            if !seen.insert(Arc::as_ptr(&frame)) || depth >= max_depth {
                return Err(FrameError::CorruptChain { depth });
            }
            depth += 1;
            cursor = frame.prev();
        }
        let tracked = Self::depth();
        if tracked != depth {
            return Err(FrameError::DepthMismatch { tracked, actual: depth });
        }
        Ok(depth)
    }

    /// Log the chain, innermost first.
    pub fn dump() {
        let mut cursor = Self::current();
        let mut index = 0usize;
        while let Some(frame) = cursor {
            trace!(
                target: TRACE_TARGET,
                index,
                frame = %frame.code().qualified_name(),
                owner = ?frame.owner(),
                materialized = frame.is_materialized(),
                line = ?frame.line(),
                "shadow frame"
            );
            index += 1;
            cursor = frame.prev();
        }
    }
}

/// Keeps a frame linked while a call is active; pops it on drop, including
/// during unwinding.
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard {
    frame: FrameRef,
}

impl FrameGuard {
    pub fn frame(&self) -> &FrameRef {
        &self.frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let popped = ShadowStack::pop();
        debug_assert!(
            popped.as_ref().is_some_and(|top| Arc::ptr_eq(top, &self.frame)),
            "unbalanced shadow frame pop"
        );
    }
}
