use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rcblock::{Shared, Weak};
use std::rc::Rc as StdRc;

fn downgrade_benchmark(c: &mut Criterion) {
    let shared = Shared::new(black_box(42u64));
    c.bench_function("rcblock::Weak::observe", |b| {
        b.iter(|| black_box(Weak::observe(&shared).unwrap()))
    });
    let obj = StdRc::new(black_box(42u64));
    c.bench_function("std::rc::Rc::downgrade", |b| {
        b.iter(|| black_box(StdRc::downgrade(&obj)))
    });
}

fn lock_benchmark(c: &mut Criterion) {
    let shared = Shared::new(black_box(42u64));
    let weak = Weak::observe(&shared).unwrap();
    c.bench_function("rcblock::Weak::lock", |b| b.iter(|| black_box(weak.lock())));

    let obj = StdRc::new(black_box(42u64));
    let std_weak = StdRc::downgrade(&obj);
    c.bench_function("std::rc::Weak::upgrade", |b| {
        b.iter(|| black_box(std_weak.upgrade()))
    });
}

fn expired_lock_benchmark(c: &mut Criterion) {
    let weak = Weak::observe(&Shared::new(black_box(42u64))).unwrap();
    c.bench_function("rcblock::Weak::lock expired", |b| {
        b.iter(|| black_box(weak.lock()))
    });
}

criterion_group!(
    weak_benches,
    downgrade_benchmark,
    lock_benchmark,
    expired_lock_benchmark,
);

criterion_main!(weak_benches);
