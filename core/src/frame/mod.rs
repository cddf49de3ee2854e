//! Shadow frame stack.
//!
//! Each call links a [`ShadowFrame`] onto the calling thread's chain. Compiled
//! calls start out compact (code reference plus instruction pointer) and are
//! only turned into a full [`FrameRecord`] when somebody asks for one.

mod record;
mod shadow;
mod stack;

use std::fmt;
use std::sync::Arc;

pub use record::{FrameHandle, FrameRecord, FrameState};
pub use shadow::{FrameOwner, FrameRef, FrameRepr, MaterializeFrame, Resolved, ShadowFrame};
pub use stack::{FrameGuard, ShadowStack};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// There is no frame to report.
    NotFound,
    /// The frame exists but cannot produce a full record.
    NotSupported { name: Arc<str> },
    /// The predecessor chain loops or exceeds the allowed depth.
    CorruptChain { depth: usize },
    DepthMismatch { tracked: usize, actual: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::NotFound => write!(f, "no frame found"),
            FrameError::NotSupported { name } => {
                write!(f, "materializing frame '{}' is not supported", name)
            }
            FrameError::CorruptChain { depth } => {
                write!(f, "shadow frame chain is corrupt at depth {}", depth)
            }
            FrameError::DepthMismatch { tracked, actual } => {
                write!(f, "shadow stack depth is {} but the chain has {} frames", tracked, actual)
            }
        }
    }
}

impl std::error::Error for FrameError {}

#[cfg(test)]
mod frame_test;
