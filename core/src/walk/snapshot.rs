use std::sync::Arc;

use serde::Serialize;

use crate::code::CodeObject;
use crate::frame::FrameHandle;

/// How much to record per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotDetail {
    #[default]
    Names,
    NamesAndLines,
    NamesLinesAndFrames,
}

impl SnapshotDetail {
    pub(crate) fn wants_line(self) -> bool {
        !matches!(self, SnapshotDetail::Names)
    }

    pub(crate) fn wants_frame(self) -> bool {
        matches!(self, SnapshotDetail::NamesLinesAndFrames)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StackEntry {
    pub qualname: Arc<str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Present only for frames that already had a full record.
    #[serde(skip)]
    pub frame: Option<FrameHandle>,
}

/// Ordered call chain, outermost frame first.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct CallStackSnapshot {
    entries: Vec<StackEntry>,
}

impl CallStackSnapshot {
    pub(crate) fn from_innermost_first(mut entries: Vec<StackEntry>) -> Self {
        entries.reverse();
        Self { entries }
    }

    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| &*entry.qualname)
    }

    pub fn into_entries(self) -> Vec<StackEntry> {
        self.entries
    }
}

/// One frame as recorded for a sampling profiler.
#[derive(Debug, Clone)]
pub struct StackSample {
    pub code: Arc<CodeObject>,
    pub line: Option<u32>,
}

/// Both views of the current stack, innermost first, each capped at the
/// requested capacity.
#[derive(Debug, Clone, Default)]
pub struct StackSamples {
    /// Follows awaiter links.
    pub async_stack: Vec<StackSample>,
    /// Follows predecessor links only.
    pub sync_stack: Vec<StackSample>,
}
