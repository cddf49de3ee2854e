use std::panic::Location;
use std::sync::atomic::{AtomicIsize, Ordering};

use crate::gil::GilToken;

use super::ref_debug;

/// Bit-level strategy for encoding immortality inside the reference count.
///
/// Both strategies are compiled on every target; [`NativeEncoding`] picks the
/// one matching the pointer width.
pub trait RefCountEncoding {
    /// Count stored by `mark_immortal`.
    const IMMORTAL: isize;

    fn is_immortal(count: isize) -> bool;

    /// Count after one retain, or `None` when the retain must be skipped.
    fn incremented(count: isize) -> Option<isize>;

    /// Count after one release, or `None` when the object is immortal.
    fn decremented(count: isize) -> Option<isize> {
        if Self::is_immortal(count) { None } else { Some(count - 1) }
    }
}

/// Wide-word encoding: immortal objects have the low 32 bits all set.
///
/// Retains saturate on the low 32 bits, so an immortal count can never wrap
/// back into a small mortal value. Releases test the sign bit of the low
/// half. A mortal count that climbs past `i32::MAX` therefore becomes
/// effectively immortal.
#[derive(Debug, Clone, Copy)]
pub struct WideEncoding;

impl RefCountEncoding for WideEncoding {
    const IMMORTAL: isize = u32::MAX as isize;

    #[inline(always)]
    fn is_immortal(count: isize) -> bool {
        (count as i32) < 0
    }

    #[inline(always)]
    fn incremented(count: isize) -> Option<isize> {
        let low = count as u32;
        let next = low.checked_add(1)?;
        Some((count & !(u32::MAX as isize)) | next as isize)
    }
}

/// Narrow-word encoding: a single sentinel value marks immortality and every
/// mutation compares against it first.
#[derive(Debug, Clone, Copy)]
pub struct NarrowEncoding;

impl RefCountEncoding for NarrowEncoding {
    const IMMORTAL: isize = (u32::MAX >> 2) as isize;

    #[inline(always)]
    fn is_immortal(count: isize) -> bool {
        count == Self::IMMORTAL
    }

    #[inline(always)]
    fn incremented(count: isize) -> Option<isize> {
        if Self::is_immortal(count) {
            return None;
        }
        count.checked_add(1)
    }
}

#[cfg(target_pointer_width = "64")]
pub type NativeEncoding = WideEncoding;
#[cfg(not(target_pointer_width = "64"))]
pub type NativeEncoding = NarrowEncoding;

/// Result of a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// The count is still positive, or the object is immortal.
    Alive,
    /// The count went from 1 to 0; the owner must run the destructor.
    Dead,
}

/// Per-object lifetime counter.
///
/// Mutations are plain load/store pairs: they are only performed under the
/// global execution lock, which the [`GilToken`] argument proves. The atomic
/// cell keeps lock-free readers (and the immortal fast path, which never
/// stores) free of data races.
#[derive(Debug)]
pub struct ObjectHeader {
    refcnt: AtomicIsize,
}

impl Default for ObjectHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectHeader {
    /// A fresh header owned by exactly one reference.
    pub const fn new() -> Self {
        Self::with_count(1)
    }

    pub const fn with_count(count: isize) -> Self {
        Self {
            refcnt: AtomicIsize::new(count),
        }
    }

    pub const fn immortal() -> Self {
        Self::with_count(NativeEncoding::IMMORTAL)
    }

    #[inline]
    pub fn refcnt(&self) -> isize {
        self.refcnt.load(Ordering::Relaxed)
    }

    /// Safe to call without the lock.
    #[inline]
    pub fn is_immortal(&self) -> bool {
        NativeEncoding::is_immortal(self.refcnt())
    }

    #[inline]
    pub fn retain(&self, _gil: GilToken<'_>) {
        let current = self.refcnt.load(Ordering::Relaxed);
        let Some(next) = NativeEncoding::incremented(current) else {
            return;
        };
        ref_debug::record_retain(self, next);
        self.refcnt.store(next, Ordering::Relaxed);
    }

    /// Drop one reference.
    ///
    /// Aborts the process if a mortal count would go negative.
    #[inline]
    #[track_caller]
    pub fn release(&self, _gil: GilToken<'_>) -> Released {
        let current = self.refcnt.load(Ordering::Relaxed);
        let Some(next) = NativeEncoding::decremented(current) else {
            return Released::Alive;
        };
        ref_debug::record_release(self, next);
        self.refcnt.store(next, Ordering::Relaxed);
        match next {
            0 => Released::Dead,
            n if n < 0 => negative_refcount(self, n, Location::caller()),
            _ => Released::Alive,
        }
    }

    /// Irreversibly exempt the owner from reference counting.
    pub fn mark_immortal(&self, _gil: GilToken<'_>) {
        self.refcnt.store(NativeEncoding::IMMORTAL, Ordering::Relaxed);
    }

    /// Overwrite the count. Ignored once the header is immortal.
    pub fn set_refcnt(&self, count: isize, _gil: GilToken<'_>) {
        if !self.is_immortal() {
            self.refcnt.store(count, Ordering::Relaxed);
        }
    }
}

#[cold]
#[inline(never)]
fn negative_refcount(header: &ObjectHeader, count: isize, location: &Location<'_>) -> ! {
    tracing::error!(
        target: "umbra::object::refs",
        file = location.file(),
        line = location.line(),
        refcnt = count,
        header = ?(header as *const ObjectHeader),
        "negative reference count"
    );
    eprintln!(
        "{}:{}: negative reference count {} on object header {:p}",
        location.file(),
        location.line(),
        count,
        header
    );
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gil::Gil;

    #[test]
    fn wide_saturates_on_low_half() {
        let immortal = WideEncoding::IMMORTAL;
        assert!(WideEncoding::is_immortal(immortal));
        assert_eq!(WideEncoding::incremented(immortal), None);
        assert_eq!(WideEncoding::decremented(immortal), None);

        let almost = (u32::MAX - 1) as isize;
        assert_eq!(WideEncoding::incremented(almost), Some(immortal));
        assert!(!WideEncoding::is_immortal(1));
        assert!(!WideEncoding::is_immortal(i32::MAX as isize));
        assert!(WideEncoding::is_immortal(i32::MAX as isize + 1));
    }

    #[test]
    fn narrow_compares_against_sentinel() {
        let immortal = NarrowEncoding::IMMORTAL;
        assert_eq!(immortal, 0x3FFF_FFFF);
        assert_eq!(NarrowEncoding::incremented(immortal), None);
        assert_eq!(NarrowEncoding::decremented(immortal), None);
        assert_eq!(NarrowEncoding::incremented(immortal - 1), Some(immortal));
        assert_eq!(NarrowEncoding::decremented(5), Some(4));
        assert!(!NarrowEncoding::is_immortal(immortal + 1));
    }

    #[test]
    fn immortal_is_a_fixed_point_for_any_operation_count() {
        // Every retain/release on an immortal count is skipped without a store,
        // so the state after n operations equals the state after one.
        fn fixed_point<E: RefCountEncoding>() {
            let start = E::IMMORTAL;
            assert!(E::incremented(start).is_none());
            assert!(E::decremented(start).is_none());
        }
        fixed_point::<WideEncoding>();
        fixed_point::<NarrowEncoding>();

        let gil = Gil::acquire();
        let header = ObjectHeader::immortal();
        for _ in 0..(1u32 << 20) {
            header.retain(gil.token());
            assert_eq!(header.release(gil.token()), Released::Alive);
            assert_eq!(header.release(gil.token()), Released::Alive);
        }
        assert_eq!(header.refcnt(), NativeEncoding::IMMORTAL);
    }

    #[test]
    fn set_refcnt_is_ignored_when_immortal() {
        let gil = Gil::acquire();
        let header = ObjectHeader::new();
        header.set_refcnt(7, gil.token());
        assert_eq!(header.refcnt(), 7);
        header.mark_immortal(gil.token());
        header.set_refcnt(3, gil.token());
        assert!(header.is_immortal());
    }

    #[test]
    fn release_reports_death_exactly_at_zero() {
        let gil = Gil::acquire();
        let header = ObjectHeader::with_count(2);
        assert_eq!(header.release(gil.token()), Released::Alive);
        assert_eq!(header.release(gil.token()), Released::Dead);
        assert_eq!(header.refcnt(), 0);
    }
}
