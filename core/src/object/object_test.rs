use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::gil::Gil;

use super::*;

fn counted_type(drops: Arc<AtomicUsize>) -> Arc<TypeDescriptor> {
    Arc::new(TypeDescriptor::new("counted").with_destructor(move |_obj| {
        drops.fetch_add(1, Ordering::SeqCst);
    }))
}

#[test]
fn matched_retain_release_keeps_object_alive_until_last_release() {
    let drops = Arc::new(AtomicUsize::new(0));
    let guard = Gil::acquire();
    let gil = guard.token();

    let obj = ObjRef::new(counted_type(Arc::clone(&drops)), ObjectValue::Int(3));
    let extra: Vec<ObjRef> = (0..16).map(|_| obj.clone_ref(gil)).collect();
    assert_eq!(obj.refcnt(), 17);

    for handle in extra {
        handle.release(gil);
    }
    assert_eq!(obj.refcnt(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    obj.release(gil);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn dropping_a_handle_releases_it() {
    let drops = Arc::new(AtomicUsize::new(0));
    let obj = ObjRef::new(counted_type(Arc::clone(&drops)), ObjectValue::Bool(true));
    let second = Gil::with(|gil| obj.clone_ref(gil));
    drop(obj);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(second);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn immortal_objects_are_never_destroyed() {
    let drops = Arc::new(AtomicUsize::new(0));
    let guard = Gil::acquire();
    let gil = guard.token();

    let obj = ObjRef::new(counted_type(Arc::clone(&drops)), ObjectValue::Int(1));
    obj.mark_immortal(gil);
    assert!(obj.is_immortal());
    let before = obj.refcnt();

    for _ in 0..10_000 {
        obj.clone_ref(gil).release(gil);
        // Unbalanced releases are absorbed as well.
        assert_eq!(obj.header().release(gil), Released::Alive);
    }
    assert_eq!(obj.refcnt(), before);
    obj.release(gil);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
}

#[test]
fn none_is_shared_and_immortal() {
    let a = ObjRef::none();
    let b = ObjRef::none();
    assert!(a.is(&b));
    assert!(a.is_none());
    assert!(a.is_immortal());
    assert_eq!(a.ty().name(), "NoneType");
    drop(a);
    assert!(b.is_immortal());
}

#[test]
fn payload_accessors() {
    let guard = Gil::acquire();
    let gil = guard.token();
    let number = ObjRef::int(42);
    let text = ObjRef::string("hello");
    assert_eq!(number.as_int(), Some(42));
    assert_eq!(number.as_str(), None);
    assert_eq!(text.as_str(), Some("hello"));
    assert_eq!(text.ty().name(), "str");
    number.release(gil);
    text.release(gil);
}

#[test]
fn shadowing_assumption_follows_the_flag() {
    let plain = TypeDescriptor::new("Plain");
    let sealed = TypeDescriptor::new("Sealed").with_flags(TypeFlags::NO_SHADOWING_INSTANCES);
    assert!(!plain.has_no_shadowing_instances());
    assert!(sealed.has_no_shadowing_instances());
    assert_eq!(shadowing_assumption(&plain), ShadowingAssumption::InstanceMayShadow);
    assert_eq!(shadowing_assumption(&sealed), ShadowingAssumption::TypeAttributesWin);
    assert!(builtins::INT.has_no_shadowing_instances());
    assert!(builtins::COROUTINE.flags().contains(TypeFlags::COROUTINE));
}

#[test]
fn dump_toggle_flips_the_setting() {
    let initial = dump_ref_changes();
    assert_eq!(toggle_dump_ref_changes(), !initial);
    assert_eq!(toggle_dump_ref_changes(), initial);
    set_dump_ref_changes(initial);
}

#[cfg(any(debug_assertions, feature = "ref-debug"))]
#[test]
fn ref_total_is_tracked_in_debug_builds() {
    assert!(ref_total().is_some());
}
