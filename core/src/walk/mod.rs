//! Logical call-stack walks.
//!
//! A walk starts at the calling thread's current shadow frame and follows
//! predecessor links, except that a frame with a live awaiter link continues
//! at the awaiter instead. Once the walk jumps to an awaiter, the native
//! chain below the awaited frame is not revisited.

mod snapshot;
mod walker;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use snapshot::{CallStackSnapshot, SnapshotDetail, StackEntry, StackSample, StackSamples};
pub use walker::{
    find_first_arg, next_frame, populate_stacks, snapshot, sync_call_stack, walk, walk_from,
};

pub const DEFAULT_MAX_DEPTH: usize = 100_000;

static MAX_DEPTH: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_DEPTH);

/// Upper bound on frames visited by one walk.
pub fn max_depth() -> usize {
    MAX_DEPTH.load(Ordering::Relaxed)
}

pub fn set_max_depth(depth: usize) {
    MAX_DEPTH.store(depth.max(1), Ordering::Relaxed);
}

/// Returned by a visitor to keep going or end the walk early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkDirective {
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkError {
    /// The accumulator could not grow.
    OutOfMemory,
    /// The chain is longer than the configured bound.
    DepthExceeded { limit: usize },
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkError::OutOfMemory => write!(f, "out of memory while collecting the call stack"),
            WalkError::DepthExceeded { limit } => write!(f, "call stack deeper than {} frames", limit),
        }
    }
}

impl std::error::Error for WalkError {}
