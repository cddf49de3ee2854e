//! Global execution lock.
//!
//! Every interpreted step and every reference-count mutation runs while this
//! lock is held. Instead of relying on convention, code that mutates shared
//! runtime structures asks for a [`GilToken`], which can only be obtained from
//! a live [`GilGuard`].

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use once_cell::sync::Lazy;

static GIL: Lazy<GlobalLock> = Lazy::new(GlobalLock::default);

thread_local! {
    static GIL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// The lock belongs to a thread, not to any one guard, so guards may drop in
/// any order. It is released when the thread's depth returns to zero.
#[derive(Default)]
struct GlobalLock {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl GlobalLock {
    fn state(&self) -> MutexGuard<'_, Option<ThreadId>> {
        // Only the owner id is stored; a poisoned lock still holds a valid one.
        self.owner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) {
        let mut owner = self.state();
        while owner.is_some() {
            owner = self
                .released
                .wait(owner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *owner = Some(thread::current().id());
    }

    fn unlock(&self) {
        *self.state() = None;
        self.released.notify_one();
    }

    fn owner(&self) -> Option<ThreadId> {
        *self.state()
    }
}

/// Entry point for taking the global lock.
pub struct Gil;

impl Gil {
    /// Acquire the lock for the calling thread.
    ///
    /// Re-entrant: a thread that already holds the lock gets a nested guard
    /// without blocking.
    pub fn acquire() -> GilGuard {
        let depth = GIL_DEPTH.with(Cell::get);
        if depth == 0 {
            GIL.lock();
        }
        GIL_DEPTH.with(|cell| cell.set(depth + 1));
        GilGuard {
            outermost: depth == 0,
            _not_send: PhantomData,
        }
    }

    /// Run `f` with the lock held.
    pub fn with<F, R>(f: F) -> R
    where
        F: FnOnce(GilToken<'_>) -> R,
    {
        let guard = Self::acquire();
        f(guard.token())
    }

    /// Whether the calling thread currently holds the lock.
    pub fn is_held() -> bool {
        GIL_DEPTH.with(Cell::get) > 0
    }
}

pub struct GilGuard {
    outermost: bool,
    _not_send: PhantomData<*const ()>,
}

impl GilGuard {
    #[inline]
    pub fn token(&self) -> GilToken<'_> {
        GilToken { _guard: PhantomData }
    }

    /// True for the outermost guard of this thread.
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for GilGuard {
    fn drop(&mut self) {
        let remaining = GIL_DEPTH.with(|cell| {
            let next = cell.get().saturating_sub(1);
            cell.set(next);
            next
        });
        if remaining == 0 {
            GIL.unlock();
        }
    }
}

/// Proof that the calling thread holds the global execution lock.
#[derive(Clone, Copy)]
pub struct GilToken<'g> {
    _guard: PhantomData<&'g GilGuard>,
}

impl std::fmt::Debug for GilToken<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GilToken")
    }
}

/// Data that may only be touched while the global lock is held.
///
/// The lock serialises all holders of a token, so the inner `RefCell` is
/// never borrowed from two threads at once.
pub struct GilCell<T> {
    value: RefCell<T>,
}

// SAFETY: every access goes through a `GilToken`, which only exists on the
// thread that currently owns the global lock.
unsafe impl<T: Send> Sync for GilCell<T> {}

impl<T> GilCell<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: RefCell::new(value),
        }
    }

    pub fn with<R>(&self, _gil: GilToken<'_>, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    pub fn with_mut<R>(&self, _gil: GilToken<'_>, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.value.borrow_mut())
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for GilCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
