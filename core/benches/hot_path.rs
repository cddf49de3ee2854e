use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use umbra_core::{
    CodeObject, Gil, ObjRef, ShadowFrame, ShadowStack,
    walk::{self, SnapshotDetail},
};

fn code(name: &str) -> Arc<CodeObject> {
    CodeObject::new("bench", name).with_qualname(name).into_arc()
}

// Call/return cost of linking a compact frame
fn bench_push_pop(c: &mut Criterion) {
    let frame = ShadowFrame::compiled(code("leaf"), None);
    c.bench_function("shadow_push_pop", |b| {
        b.iter(|| {
            ShadowStack::push(Arc::clone(&frame));
            black_box(ShadowStack::pop())
        })
    });
    c.bench_function("shadow_guard", |b| {
        b.iter(|| {
            let guard = ShadowStack::enter(Arc::clone(&frame));
            black_box(guard.frame().last_instr())
        })
    });
}

fn bench_refcount(c: &mut Criterion) {
    let guard = Gil::acquire();
    let gil = guard.token();
    let mortal = ObjRef::int(1);
    let immortal = ObjRef::int(2);
    immortal.mark_immortal(gil);

    c.bench_function("retain_release_mortal", |b| {
        b.iter(|| mortal.clone_ref(gil).release(gil))
    });
    c.bench_function("retain_release_immortal", |b| {
        b.iter(|| immortal.clone_ref(gil).release(gil))
    });
    mortal.release(gil);
}

fn bench_walk(c: &mut Criterion) {
    // 64 compact frames
    let frames: Vec<_> = (0..64).map(|i| ShadowFrame::compiled(code(&format!("f{}", i)), None)).collect();
    for frame in &frames {
        ShadowStack::push(Arc::clone(frame));
    }

    c.bench_function("walk_names_64", |b| {
        b.iter(|| black_box(walk::snapshot(SnapshotDetail::Names).map(|s| s.len())))
    });
    c.bench_function("walk_lines_64", |b| {
        b.iter(|| black_box(walk::snapshot(SnapshotDetail::NamesAndLines).map(|s| s.len())))
    });

    let awaiter = ShadowFrame::compiled(code("task"), None);
    frames[63].set_awaiter(Some(&awaiter));
    c.bench_function("walk_awaiter_substitution", |b| {
        b.iter(|| black_box(walk::snapshot(SnapshotDetail::Names).map(|s| s.len())))
    });

    for _ in &frames {
        ShadowStack::pop();
    }
}

criterion_group!(benches, bench_push_pop, bench_refcount, bench_walk);
criterion_main!(benches);
