//! Object runtime benchmarks using criterion.
//!
//! Run with: cargo bench --bench object_bench

use std::sync::Once;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use opal_object::{
    is_interface_implemented, object_alloc, object_release, object_retain, query_interface,
    register_boxed_type, Interface, Ref,
};

trait Payload {
    fn value(&self) -> u64;
}

struct Bench {
    value: u64,
}

impl Payload for Bench {
    fn value(&self) -> u64 {
        self.value
    }
}

opal_object::boxed_type!(Bench = "d2f1c4a8-0d3b-4f90-9e21-6b8a5c7d3e01");
opal_object::interface!(dyn Payload = "d2f1c4a8-0d3b-4f90-9e21-6b8a5c7d3e02");

fn setup() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        register_boxed_type::<Bench>();
        opal_object::impl_interfaces!(Bench: Payload);
    });
}

fn bench_alloc_free(c: &mut Criterion) {
    setup();
    let mut group = c.benchmark_group("alloc_free");

    group.bench_function("typed_new_drop", |b| {
        b.iter(|| {
            black_box(Ref::new(Bench { value: 42 }));
        });
    });

    group.bench_function("raw_alloc_release", |b| {
        let info = opal_object::type_of::<Bench>();
        b.iter(|| {
            let obj = object_alloc(info);
            unsafe {
                std::ptr::write(obj.as_ptr::<Bench>(), Bench { value: 42 });
                object_release(black_box(obj));
            }
        });
    });

    group.finish();
}

fn bench_counting(c: &mut Criterion) {
    setup();
    let mut group = c.benchmark_group("counting");

    let strong = Ref::new(Bench { value: 7 });

    group.bench_function("retain_release", |b| {
        let obj = strong.object();
        b.iter(|| unsafe {
            object_retain(black_box(obj));
            object_release(black_box(obj));
        });
    });

    group.bench_function("typed_clone_drop", |b| {
        b.iter(|| {
            black_box(strong.clone());
        });
    });

    group.bench_function("weak_pin", |b| {
        let weak = strong.downgrade();
        b.iter(|| {
            black_box(weak.pin());
        });
    });

    group.finish();
}

fn bench_interface_queries(c: &mut Criterion) {
    setup();
    let mut group = c.benchmark_group("interface_queries");

    let strong = Ref::new(Bench { value: 9 });

    group.bench_function("query_interface", |b| {
        let obj = strong.object();
        b.iter(|| unsafe {
            black_box(query_interface::<dyn Payload>(black_box(obj)));
        });
    });

    group.bench_function("typed_cast", |b| {
        b.iter(|| {
            black_box(strong.cast::<dyn Payload>());
        });
    });

    group.bench_function("implemented_lookup", |b| {
        b.iter(|| {
            black_box(is_interface_implemented(
                <Bench as opal_object::BoxedType>::GUID,
                <dyn Payload as Interface>::IID,
            ));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free,
    bench_counting,
    bench_interface_queries
);
criterion_main!(benches);
