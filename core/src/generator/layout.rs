//! Data block that compiled generator code keeps next to its spilled frame.
//!
//! Compiled code reads and writes the state byte and the yield-point word at
//! fixed offsets. The offsets depend on the pointer width and are pinned at
//! build time; everything else in the crate goes through [`GenDataAccessor`].

use std::mem::offset_of;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use super::state::GenState;

#[cfg(target_pointer_width = "64")]
mod offsets {
    pub const YIELD_POINT: usize = 24;
    pub const STATE: usize = 32;
}

#[cfg(not(target_pointer_width = "64"))]
mod offsets {
    pub const YIELD_POINT: usize = 12;
    pub const STATE: usize = 16;
}

/// Offsets emitted into compiled code.
pub const YIELD_POINT_OFFSET: usize = offsets::YIELD_POINT;
pub const STATE_OFFSET: usize = offsets::STATE;

#[repr(C)]
#[derive(Debug)]
pub(crate) struct GenFooter {
    link_address: usize,
    return_address: usize,
    original_frame_ptr: usize,
    yield_point: AtomicUsize,
    state: AtomicU8,
}

const _: () = assert!(offset_of!(GenFooter, yield_point) == YIELD_POINT_OFFSET);
const _: () = assert!(offset_of!(GenFooter, state) == STATE_OFFSET);

/// Typed view over a compiled generator's footer.
#[derive(Debug)]
pub(crate) struct GenDataAccessor {
    footer: Box<GenFooter>,
}

impl GenDataAccessor {
    pub(crate) fn new() -> Self {
        Self {
            footer: Box::new(GenFooter {
                link_address: 0,
                return_address: 0,
                original_frame_ptr: 0,
                yield_point: AtomicUsize::new(0),
                state: AtomicU8::new(GenState::JustStarted as u8),
            }),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> GenState {
        GenState::from_u8(self.footer.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: GenState) {
        self.footer.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub(crate) fn yield_point(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.footer.yield_point.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_yield_point(&self, point: Option<NonZeroUsize>) {
        self.footer
            .yield_point
            .store(point.map_or(0, NonZeroUsize::get), Ordering::Release);
    }

    /// Address of the footer as compiled code sees it.
    pub(crate) fn base_address(&self) -> usize {
        &*self.footer as *const GenFooter as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_sit_at_the_published_offsets() {
        let data = GenDataAccessor::new();
        let base = data.base_address();
        let state_addr = &data.footer.state as *const AtomicU8 as usize;
        let yield_addr = &data.footer.yield_point as *const AtomicUsize as usize;
        assert_eq!(state_addr - base, STATE_OFFSET);
        assert_eq!(yield_addr - base, YIELD_POINT_OFFSET);
    }

    #[test]
    fn accessor_round_trips_state_and_yield_point() {
        let data = GenDataAccessor::new();
        assert_eq!(data.state(), GenState::JustStarted);
        assert_eq!(data.yield_point(), None);

        data.set_state(GenState::Running);
        data.set_yield_point(NonZeroUsize::new(3));
        assert_eq!(data.state(), GenState::Running);
        assert_eq!(data.yield_point().map(NonZeroUsize::get), Some(3));

        data.set_yield_point(None);
        assert_eq!(data.yield_point(), None);
    }
}
