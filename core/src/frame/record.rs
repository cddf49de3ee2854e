use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, AtomicU8, Ordering};

use crate::code::CodeObject;
use crate::gil::{GilCell, GilToken};
use crate::object::ObjRef;

/// Execution state of a materialized frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameState {
    Created = 0,
    Suspended = 1,
    Executing = 2,
    Returned = 3,
    Raised = 4,
    Cleared = 5,
}

impl FrameState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => FrameState::Created,
            1 => FrameState::Suspended,
            2 => FrameState::Executing,
            3 => FrameState::Returned,
            4 => FrameState::Raised,
            _ => FrameState::Cleared,
        }
    }

    pub fn is_runnable(self) -> bool {
        matches!(self, FrameState::Created | FrameState::Suspended)
    }

    pub fn is_executing(self) -> bool {
        self == FrameState::Executing
    }

    pub fn has_completed(self) -> bool {
        matches!(self, FrameState::Returned | FrameState::Raised | FrameState::Cleared)
    }
}

/// Shared handle to a materialized frame.
pub type FrameHandle = Arc<FrameRecord>;

/// Full frame record: what a debugger sees when it asks for a frame.
///
/// Interpreted calls always have one. Compiled calls only get one when
/// something asks for it.
pub struct FrameRecord {
    code: Arc<CodeObject>,
    last_instr: AtomicIsize,
    state: AtomicU8,
    locals: GilCell<Vec<Option<ObjRef>>>,
}

impl fmt::Debug for FrameRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRecord")
            .field("code", &self.code)
            .field("last_instr", &self.last_instr())
            .field("state", &self.state())
            .finish()
    }
}

impl FrameRecord {
    pub fn new(code: Arc<CodeObject>) -> Self {
        Self::with_locals(code, Vec::new())
    }

    pub fn with_locals(code: Arc<CodeObject>, locals: Vec<Option<ObjRef>>) -> Self {
        Self {
            code,
            last_instr: AtomicIsize::new(-1),
            state: AtomicU8::new(FrameState::Created as u8),
            locals: GilCell::new(locals),
        }
    }

    pub fn into_handle(self) -> FrameHandle {
        Arc::new(self)
    }

    pub fn code(&self) -> &Arc<CodeObject> {
        &self.code
    }

    /// Offset of the last executed instruction; `-1` before the first one.
    pub fn last_instr(&self) -> isize {
        self.last_instr.load(Ordering::Relaxed)
    }

    pub fn set_last_instr(&self, offset: isize) {
        self.last_instr.store(offset, Ordering::Relaxed);
    }

    pub fn state(&self) -> FrameState {
        FrameState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: FrameState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn line(&self) -> Option<u32> {
        self.code.line_for(self.last_instr())
    }

    /// New reference to the value in slot `idx`, if bound.
    pub fn local(&self, idx: usize, gil: GilToken<'_>) -> Option<ObjRef> {
        self.locals
            .with(gil, |locals| locals.get(idx).and_then(Option::as_ref).map(|v| v.clone_ref(gil)))
    }

    /// Bind slot `idx`, growing the slot vector as needed. The previous value
    /// is released.
    pub fn set_local(&self, idx: usize, value: ObjRef, gil: GilToken<'_>) {
        let previous = self.locals.with_mut(gil, |locals| {
            if locals.len() <= idx {
                locals.resize_with(idx + 1, || None);
            }
            locals[idx].replace(value)
        });
        if let Some(old) = previous {
            old.release(gil);
        }
    }

    pub fn local_count(&self, gil: GilToken<'_>) -> usize {
        self.locals.with(gil, Vec::len)
    }

    /// Slot zero, where the first parameter lives. `None` while unbound.
    pub fn first_arg(&self, gil: GilToken<'_>) -> Option<ObjRef> {
        self.local(0, gil)
    }

    /// Release every local and mark the frame cleared.
    pub fn clear(&self, gil: GilToken<'_>) {
        let locals = self.locals.with_mut(gil, std::mem::take);
        for value in locals.into_iter().flatten() {
            value.release(gil);
        }
        self.set_state(FrameState::Cleared);
    }
}
