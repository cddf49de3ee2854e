//! Object header and reference counting.
//!
//! Mortal objects are freed when their count drops from one to zero; immortal
//! objects are exempt from counting and live until process teardown.

mod header;
mod obj;
mod ref_debug;
mod types;

pub use header::{NarrowEncoding, NativeEncoding, ObjectHeader, RefCountEncoding, Released, WideEncoding};
pub use obj::{ManagedObject, ObjRef, ObjectValue, builtins};
pub use ref_debug::{dump_ref_changes, ref_total, set_dump_ref_changes, toggle_dump_ref_changes};
pub use types::{Destructor, ShadowingAssumption, TypeDescriptor, TypeFlags, shadowing_assumption};

#[cfg(test)]
mod object_test;
