//! Benchmarks for filament-core
//!
//! Run with: cargo bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use filament_core::render::{DomBackend, KeyedList, MemoryDom, Reconciler, VNode};
use filament_core::{create_effect, create_memo, create_root, Runtime, Signal};

// =============================================================================
// SIGNAL BENCHMARKS
// =============================================================================

fn bench_signal_create(c: &mut Criterion) {
    c.bench_function("signal_create", |b| {
        b.iter(|| {
            let (signal, owner) = create_root(|_| Signal::new(0i32));
            black_box(signal);
            owner.dispose();
        })
    });
}

fn bench_signal_get(c: &mut Criterion) {
    let s = Signal::new(42i32);
    c.bench_function("signal_get", |b| b.iter(|| black_box(s.get())));
}

fn bench_signal_set(c: &mut Criterion) {
    let s = Signal::new(0i32);
    let mut i = 0;
    c.bench_function("signal_set", |b| {
        b.iter(|| {
            i += 1;
            s.set(black_box(i))
        })
    });
}

fn bench_signal_set_same_value(c: &mut Criterion) {
    let s = Signal::new(42i32);
    c.bench_function("signal_set_same_value", |b| b.iter(|| s.set(black_box(42))));
}

// =============================================================================
// MEMO BENCHMARKS
// =============================================================================

fn bench_memo_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("memo_chain");

    for depth in [1, 5, 10, 20] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            let s = Signal::new(1i32);
            let (tail, owner) = create_root(|_| {
                let mut current = {
                    let s = s.clone();
                    create_memo(move || s.get() + 1)
                };
                for _ in 1..depth {
                    let prev = current.clone();
                    current = create_memo(move || prev.get() + 1);
                }
                current
            });

            let mut i = 0;
            b.iter(|| {
                i += 1;
                s.set(black_box(i));
                black_box(tail.get())
            });
            owner.dispose();
        });
    }

    group.finish();
}

// =============================================================================
// EFFECT BENCHMARKS
// =============================================================================

fn bench_effect_trigger(c: &mut Criterion) {
    let s = Signal::new(0i32);
    let (_, owner) = create_root(|_| {
        let s = s.clone();
        create_effect(move || {
            black_box(s.get());
        });
    });

    let mut i = 0;
    c.bench_function("effect_trigger", |b| {
        b.iter(|| {
            i += 1;
            s.set(black_box(i))
        })
    });
    owner.dispose();
}

fn bench_many_effects(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for count in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("effects", count), &count, |b, &count| {
            let s = Signal::new(0i32);
            let (_, owner) = create_root(|_| {
                for _ in 0..count {
                    let s = s.clone();
                    create_effect(move || {
                        black_box(s.get());
                    });
                }
            });

            let mut i = 0;
            b.iter(|| {
                i += 1;
                s.set(black_box(i))
            });
            owner.dispose();
        });
    }

    group.finish();
}

// =============================================================================
// LIST BENCHMARKS
// =============================================================================

fn bench_keyed_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyed_list");

    for len in [100, 1000] {
        group.bench_with_input(BenchmarkId::new("reverse", len), &len, |b, &len| {
            Runtime::new().run(|| {
                let dom = Arc::new(MemoryDom::new());
                let reconciler = Reconciler::new(dom.clone());
                let container = dom.create_element("ul");
                let items = Signal::new((0..len).collect::<Vec<u32>>());
                let list = KeyedList::new(
                    {
                        let items = items.clone();
                        move || items.get()
                    },
                    |n: &u32| *n,
                    |n| VNode::element("li").child(VNode::dynamic_text(move || n.get().to_string())),
                );
                let mut view = VNode::list(list);
                reconciler.mount(&mut view, container, None).unwrap();

                b.iter(|| items.update(|v| v.iter().rev().copied().collect()));
                reconciler.unmount(&mut view);
            });
        });
    }

    group.finish();
}

criterion_group!(
    signal_benches,
    bench_signal_create,
    bench_signal_get,
    bench_signal_set,
    bench_signal_set_same_value,
);

criterion_group!(memo_benches, bench_memo_chain);

criterion_group!(effect_benches, bench_effect_trigger, bench_many_effects);

criterion_group!(list_benches, bench_keyed_list);

criterion_main!(signal_benches, memo_benches, effect_benches, list_benches);
