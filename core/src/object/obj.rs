use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::generator::GeneratorContext;
use crate::gil::{Gil, GilToken};

use super::header::{ObjectHeader, Released};
use super::ref_debug;
use super::types::{TypeDescriptor, TypeFlags};

/// Payload carried by a managed object.
#[derive(Debug)]
pub enum ObjectValue {
    None,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    Generator(Arc<GeneratorContext>),
}

/// Heap entity with a reference count and a type reference.
pub struct ManagedObject {
    header: ObjectHeader,
    ty: Arc<TypeDescriptor>,
    value: ObjectValue,
}

impl ManagedObject {
    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub fn ty(&self) -> &Arc<TypeDescriptor> {
        &self.ty
    }

    pub fn value(&self) -> &ObjectValue {
        &self.value
    }
}

impl fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject")
            .field("type", &self.ty.name())
            .field("refcnt", &self.header.refcnt())
            .field("value", &self.value)
            .finish()
    }
}

/// Owned strong reference to a [`ManagedObject`].
///
/// `clone_ref` retains and `release` gives the reference back; both need the
/// global lock. Dropping a handle re-enters the lock to release it.
pub struct ObjRef {
    ptr: NonNull<ManagedObject>,
}

// SAFETY: the header is atomic, the payload is immutable after construction,
// and count mutations are serialised by the global lock.
unsafe impl Send for ObjRef {}
unsafe impl Sync for ObjRef {}

impl ObjRef {
    /// Allocate a new object owned by the returned reference.
    pub fn new(ty: Arc<TypeDescriptor>, value: ObjectValue) -> Self {
        let boxed = Box::new(ManagedObject {
            header: ObjectHeader::new(),
            ty,
            value,
        });
        ref_debug::record_new_reference();
        Self {
            ptr: NonNull::from(Box::leak(boxed)),
        }
    }

    /// Allocate an object that is immortal from birth.
    pub fn new_immortal(ty: Arc<TypeDescriptor>, value: ObjectValue) -> Self {
        let boxed = Box::new(ManagedObject {
            header: ObjectHeader::immortal(),
            ty,
            value,
        });
        Self {
            ptr: NonNull::from(Box::leak(boxed)),
        }
    }

    pub fn int(value: i64) -> Self {
        Self::new(Arc::clone(&builtins::INT), ObjectValue::Int(value))
    }

    pub fn string(value: impl Into<Arc<str>>) -> Self {
        Self::new(Arc::clone(&builtins::STR), ObjectValue::Str(value.into()))
    }

    /// The shared immortal `None`. No lock is needed: immortal objects are
    /// never written to by retain or release.
    pub fn none() -> Self {
        Self { ptr: NONE.ptr }
    }

    /// Take another strong reference to the same object.
    #[inline]
    pub fn clone_ref(&self, gil: GilToken<'_>) -> Self {
        self.header.retain(gil);
        Self { ptr: self.ptr }
    }

    /// Give this reference back, running the destructor on the last one.
    #[inline]
    #[track_caller]
    pub fn release(self, gil: GilToken<'_>) {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is an owned reference that is never used again.
        unsafe { release_raw(this.ptr, gil) }
    }

    pub fn mark_immortal(&self, gil: GilToken<'_>) {
        self.header.mark_immortal(gil);
    }

    pub fn refcnt(&self) -> isize {
        self.header.refcnt()
    }

    pub fn is_immortal(&self) -> bool {
        self.header.is_immortal()
    }

    pub fn is(&self, other: &ObjRef) -> bool {
        self.ptr == other.ptr
    }

    pub fn as_ptr(&self) -> *const ManagedObject {
        self.ptr.as_ptr()
    }

    pub fn is_none(&self) -> bool {
        matches!(self.value, ObjectValue::None)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.value {
            ObjectValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            ObjectValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

#[track_caller]
unsafe fn release_raw(ptr: NonNull<ManagedObject>, gil: GilToken<'_>) {
    // SAFETY: the caller owns one reference, so the object is still alive.
    let obj = unsafe { ptr.as_ref() };
    if obj.header.release(gil) == Released::Dead {
        if let Some(destructor) = obj.ty.destructor() {
            destructor(obj);
        }
        // SAFETY: the count reached zero, so this was the last reference and
        // the allocation came from `Box::leak` in `ObjRef::new`.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

impl Deref for ObjRef {
    type Target = ManagedObject;

    fn deref(&self) -> &ManagedObject {
        // SAFETY: an `ObjRef` always owns a live reference.
        unsafe { self.ptr.as_ref() }
    }
}

impl Drop for ObjRef {
    fn drop(&mut self) {
        if self.header.is_immortal() {
            return;
        }
        let guard = Gil::acquire();
        // SAFETY: `self` owns a reference and is being destroyed.
        unsafe { release_raw(self.ptr, guard.token()) }
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

static NONE: Lazy<ObjRef> = Lazy::new(|| ObjRef::new_immortal(Arc::clone(&builtins::NONE), ObjectValue::None));

/// Type descriptors for the payload kinds the core creates itself.
pub mod builtins {
    use super::*;

    pub static NONE: Lazy<Arc<TypeDescriptor>> =
        Lazy::new(|| Arc::new(TypeDescriptor::new("NoneType").with_flags(TypeFlags::NO_SHADOWING_INSTANCES)));
    pub static INT: Lazy<Arc<TypeDescriptor>> =
        Lazy::new(|| Arc::new(TypeDescriptor::new("int").with_flags(TypeFlags::NO_SHADOWING_INSTANCES)));
    pub static STR: Lazy<Arc<TypeDescriptor>> =
        Lazy::new(|| Arc::new(TypeDescriptor::new("str").with_flags(TypeFlags::NO_SHADOWING_INSTANCES)));
    pub static GENERATOR: Lazy<Arc<TypeDescriptor>> =
        Lazy::new(|| Arc::new(TypeDescriptor::new("generator").with_flags(TypeFlags::GENERATOR)));
    pub static COROUTINE: Lazy<Arc<TypeDescriptor>> =
        Lazy::new(|| Arc::new(TypeDescriptor::new("coroutine").with_flags(TypeFlags::COROUTINE)));
    pub static ASYNC_GENERATOR: Lazy<Arc<TypeDescriptor>> = Lazy::new(|| {
        Arc::new(TypeDescriptor::new("async_generator").with_flags(TypeFlags::GENERATOR | TypeFlags::COROUTINE))
    });
}
