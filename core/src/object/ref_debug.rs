//! Reference-count bookkeeping used to hunt leaks and over-releases.
//!
//! The running total is compiled in for debug builds and for builds with the
//! `ref-debug` feature. Per-mutation trace events are toggled at runtime.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::trace;

use super::header::ObjectHeader;

const TRACE_TARGET: &str = "umbra::object::refs";

static DUMP_REF_CHANGES: AtomicBool = AtomicBool::new(false);

#[cfg(any(debug_assertions, feature = "ref-debug"))]
mod total {
    use std::sync::atomic::{AtomicIsize, Ordering};

    static REF_TOTAL: AtomicIsize = AtomicIsize::new(0);

    #[inline]
    pub(super) fn add(delta: isize) {
        REF_TOTAL.fetch_add(delta, Ordering::Relaxed);
    }

    pub(super) fn get() -> Option<isize> {
        Some(REF_TOTAL.load(Ordering::Relaxed))
    }
}

#[cfg(not(any(debug_assertions, feature = "ref-debug")))]
mod total {
    #[inline(always)]
    pub(super) fn add(_delta: isize) {}

    pub(super) fn get() -> Option<isize> {
        None
    }
}

/// Net retains minus releases across all objects, if tracking is compiled in.
pub fn ref_total() -> Option<isize> {
    total::get()
}

/// Flip per-mutation tracing and return the new setting.
pub fn toggle_dump_ref_changes() -> bool {
    !DUMP_REF_CHANGES.fetch_xor(true, Ordering::Relaxed)
}

pub fn set_dump_ref_changes(enabled: bool) {
    DUMP_REF_CHANGES.store(enabled, Ordering::Relaxed);
}

pub fn dump_ref_changes() -> bool {
    DUMP_REF_CHANGES.load(Ordering::Relaxed)
}

#[inline]
pub(super) fn record_retain(header: &ObjectHeader, next: isize) {
    total::add(1);
    if dump_ref_changes() {
        trace!(target: TRACE_TARGET, header = ?(header as *const ObjectHeader), refcnt = next, "incref");
    }
}

#[inline]
pub(super) fn record_release(header: &ObjectHeader, next: isize) {
    total::add(-1);
    if dump_ref_changes() {
        trace!(target: TRACE_TARGET, header = ?(header as *const ObjectHeader), refcnt = next, "decref");
    }
}

/// Account for a reference created by an allocation rather than a retain.
#[inline]
pub(super) fn record_new_reference() {
    total::add(1);
}
