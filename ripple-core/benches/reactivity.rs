use std::cell::Cell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple_core::object;
use ripple_core::reactive::{computed, effect, reactive, Ref};
use ripple_core::scheduler::{flush_jobs, queued_effect};

fn bench_ref_trigger(c: &mut Criterion) {
    let mut group = c.benchmark_group("ref_trigger");
    for subscribers in [1usize, 10, 100] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let source = Ref::new(0u64);
                let sink = Rc::new(Cell::new(0u64));
                let effects: Vec<_> = (0..subscribers)
                    .map(|_| {
                        let reader = source.clone();
                        let sink = sink.clone();
                        effect(move || sink.set(reader.get()))
                    })
                    .collect();

                let mut n = 0u64;
                b.iter(|| {
                    n += 1;
                    source.set(black_box(n));
                });

                for runner in effects {
                    runner.stop();
                }
            },
        );
    }
    group.finish();
}

fn bench_wrapper_access(c: &mut Criterion) {
    let state = reactive(object! { "a" => 1, "b" => 2 });
    let reader = state.clone();
    let sink = Rc::new(Cell::new(0.0));
    let out = sink.clone();
    let runner = effect(move || out.set(reader.get("a").as_f64().unwrap_or_default()));

    let mut n = 0.0;
    c.bench_function("wrapper_set_tracked_key", |b| {
        b.iter(|| {
            n += 1.0;
            let _ = state.set("a", black_box(n));
        })
    });
    c.bench_function("wrapper_get_untracked", |b| {
        b.iter(|| black_box(state.get("b")))
    });
    runner.stop();
}

fn bench_computed_chain(c: &mut Criterion) {
    let source = Ref::new(1i64);
    let reader = source.clone();
    let mut tail = computed(move || reader.get() + 1);
    for _ in 0..10 {
        let upstream = tail.clone();
        tail = computed(move || upstream.get() + 1);
    }

    let mut n = 0i64;
    c.bench_function("computed_chain_10_invalidate_and_read", |b| {
        b.iter(|| {
            n += 1;
            source.set(n);
            black_box(tail.get())
        })
    });
}

fn bench_flush(c: &mut Criterion) {
    let source = Ref::new(0u64);
    let units: Vec<_> = (0..100u64)
        .map(|order| {
            let reader = source.clone();
            queued_effect(order, move || {
                black_box(reader.get());
            })
        })
        .collect();

    let mut n = 0u64;
    c.bench_function("flush_100_queued_effects", |b| {
        b.iter(|| {
            n += 1;
            source.set(n);
            black_box(flush_jobs())
        })
    });

    for unit in units {
        unit.stop();
    }
}

criterion_group!(
    benches,
    bench_ref_trigger,
    bench_wrapper_access,
    bench_computed_chain,
    bench_flush
);
criterion_main!(benches);
