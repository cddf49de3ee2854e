use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::code::CodeObject;
use crate::gil::Gil;
use crate::object::ObjRef;

use super::*;

fn code(name: &str) -> Arc<CodeObject> {
    CodeObject::new("tests", name)
        .with_qualname(name)
        .with_arg_count(1)
        .with_lines(&[(0, 10), (4, 11), (8, 12)])
        .into_arc()
}

fn counting_materializer(calls: Arc<AtomicUsize>) -> Arc<dyn MaterializeFrame> {
    Arc::new(move |code: &Arc<CodeObject>, _ip: isize| {
        calls.fetch_add(1, Ordering::SeqCst);
        FrameRecord::new(Arc::clone(code))
    })
}

#[test]
fn push_pop_restores_previous_frame() {
    let a = ShadowFrame::compiled(code("a"), None);
    let b = ShadowFrame::compiled(code("b"), None);
    let base = ShadowStack::depth();

    ShadowStack::push(Arc::clone(&a));
    ShadowStack::push(Arc::clone(&b));
    assert_eq!(ShadowStack::depth(), base + 2);
    assert!(Arc::ptr_eq(&b.prev().expect("b links to a"), &a));

    let popped = ShadowStack::pop().expect("pop b");
    assert!(Arc::ptr_eq(&popped, &b));
    assert!(!b.is_linked());
    assert!(Arc::ptr_eq(&ShadowStack::current().expect("a is current"), &a));

    ShadowStack::pop().expect("pop a");
    assert_eq!(ShadowStack::depth(), base);
}

#[test]
fn guard_pops_on_unwind() {
    let base = ShadowStack::depth();
    let result = std::panic::catch_unwind(|| {
        let _guard = ShadowStack::enter(ShadowFrame::compiled(code("boom"), None));
        assert_eq!(ShadowStack::depth(), base + 1);
        panic!("unwind through the frame");
    });
    assert!(result.is_err());
    assert_eq!(ShadowStack::depth(), base);
}

#[test]
fn compact_frames_resolve_without_materializing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let frame = ShadowFrame::compiled(code("compact"), Some(counting_materializer(Arc::clone(&calls))));
    frame.set_ip(4);

    assert!(matches!(frame.repr(), FrameRepr::Compact { ip: 4, .. }));
    let resolved = frame.resolve();
    assert_eq!(&*resolved.qualified_name, "tests:compact");
    assert!(resolved.frame.is_none());
    assert_eq!(frame.line(), Some(11));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn materialization_is_lazy_and_happens_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let frame = ShadowFrame::compiled(code("lazy"), Some(counting_materializer(Arc::clone(&calls))));
    frame.set_ip(8);
    assert!(frame.can_materialize());
    assert!(!frame.is_materialized());

    let first = frame.materialize().expect("materialize");
    let second = frame.materialize().expect("materialize again");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.last_instr(), 8);
    assert_eq!(first.line(), Some(12));

    let resolved = frame.resolve();
    assert!(resolved.frame.is_some_and(|record| Arc::ptr_eq(&record, &first)));
}

#[test]
fn ip_updates_follow_the_record_once_materialized() {
    let frame = ShadowFrame::compiled(code("ip"), Some(counting_materializer(Arc::default())));
    let record = frame.materialize().expect("materialize");
    frame.set_ip(4);
    assert_eq!(record.last_instr(), 4);
    assert_eq!(frame.line(), Some(11));
}

#[test]
fn frames_without_materializer_are_not_supported() {
    let frame = ShadowFrame::compiled(code("opaque"), None);
    assert!(!frame.can_materialize());
    match frame.materialize() {
        Err(FrameError::NotSupported { name }) => assert_eq!(&*name, "tests:opaque"),
        other => panic!("expected NotSupported, got {:?}", other),
    }
    // Binding an existing record still works.
    let record = FrameRecord::new(Arc::clone(frame.code())).into_handle();
    assert!(frame.bind_record(Arc::clone(&record)));
    assert!(!frame.bind_record(record));
    assert!(frame.materialize().is_ok());
}

#[test]
fn interpreted_frames_are_always_materialized() {
    let record = FrameRecord::new(code("interp")).into_handle();
    let frame = ShadowFrame::interpreted(Arc::clone(&record));
    assert_eq!(frame.owner(), FrameOwner::Interpreter);
    assert!(matches!(frame.repr(), FrameRepr::Materialized(r) if Arc::ptr_eq(r, &record)));
}

#[test]
fn first_arg_reads_slot_zero() {
    let guard = Gil::acquire();
    let gil = guard.token();
    let record = FrameRecord::new(code("args"));
    assert!(record.first_arg(gil).is_none());

    record.set_local(0, ObjRef::int(7), gil);
    let arg = record.first_arg(gil).expect("first arg");
    assert_eq!(arg.as_int(), Some(7));
    assert_eq!(arg.refcnt(), 2);
    arg.release(gil);

    let no_args = FrameRecord::new(CodeObject::new("tests", "noargs").into_arc());
    no_args.set_local(0, ObjRef::int(1), gil);
    let slot = no_args.first_arg(gil).expect("slot zero");
    assert_eq!(slot.as_int(), Some(1));
    slot.release(gil);
    no_args.clear(gil);

    record.clear(gil);
    assert_eq!(record.state(), FrameState::Cleared);
    assert_eq!(record.local_count(gil), 0);
}

#[test]
fn awaiter_link_is_weak() {
    let frame = ShadowFrame::compiled(code("awaited"), None);
    let awaiter = ShadowFrame::compiled(code("awaiter"), None);
    frame.set_awaiter(Some(&awaiter));
    assert!(frame.awaiter().is_some_and(|f| Arc::ptr_eq(&f, &awaiter)));
    drop(awaiter);
    assert!(frame.awaiter().is_none());
}

#[test]
fn materialize_all_and_verify_chain() {
    let outer = ShadowFrame::compiled(code("outer"), Some(counting_materializer(Arc::default())));
    let inner = ShadowFrame::interpreted(FrameRecord::new(code("inner")).into_handle());
    let base = ShadowStack::depth();
    let _outer = ShadowStack::enter(Arc::clone(&outer));
    let _inner = ShadowStack::enter(Arc::clone(&inner));

    assert_eq!(ShadowStack::verify_chain(1_000), Ok(base + 2));
    assert_eq!(
        ShadowStack::verify_chain(base + 1),
        Err(FrameError::CorruptChain { depth: base + 1 })
    );

    let records = ShadowStack::materialize_all().expect("materialize all");
    assert_eq!(records.len(), base + 2);
    assert_eq!(&**records[0].code().name(), "inner");
    assert_eq!(&**records[1].code().name(), "outer");
    assert!(outer.is_materialized());
    ShadowStack::dump();
}

#[test]
fn materialize_all_fails_on_opaque_frame() {
    let _guard = ShadowStack::enter(ShadowFrame::compiled(code("opaque"), None));
    assert!(matches!(
        ShadowStack::materialize_all(),
        Err(FrameError::NotSupported { .. })
    ));
}

#[test]
fn long_chains_drop_without_recursing() {
    let mut top: Option<FrameRef> = None;
    for _ in 0..200_000 {
        let frame = ShadowFrame::compiled(code("deep"), None);
        frame.link(top.take());
        top = Some(frame);
    }
    drop(top);
}

#[test]
fn linked_frame_is_readable_from_another_thread() {
    let caller = ShadowFrame::compiled(code("caller"), None);
    let callee = ShadowFrame::compiled(code("callee"), None);
    let _outer = ShadowStack::enter(Arc::clone(&caller));
    let _inner = ShadowStack::enter(Arc::clone(&callee));

    let inspected = Arc::clone(&callee);
    let prev_name = std::thread::spawn(move || {
        Gil::with(|_gil| inspected.prev().map(|prev| Arc::clone(prev.code().name())))
    })
    .join()
    .expect("inspector join");
    assert_eq!(prev_name.as_deref(), Some("caller"));
    assert!(Arc::ptr_eq(&ShadowStack::current().expect("callee on top"), &callee));
}
