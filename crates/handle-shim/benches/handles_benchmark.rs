//! Benchmark: handle allocation paths
//!
//! Measures the aligned run finder over mixed masks, local handle churn
//! across block boundaries and global create/destroy churn.

use criterion::{criterion_group, criterion_main, Criterion};
use handle_shim::handles::HANDLE_BLOCK_SIZE;
use handle_shim::value::EmbedderFields;
use handle_shim::{
    Engine, GlobalHandles, HandleContext, HandleScope, RawValue, Target, ValueKind,
};
use run_finder::{find_run, RunLength};
use std::hint::black_box;
use std::sync::Arc;

/// Every value is a plain heap word with no engine object behind it.
struct NullEngine;

impl Engine for NullEngine {
    fn kind(&self, _value: RawValue) -> ValueKind {
        ValueKind::Other
    }
    fn target(&self, _value: RawValue) -> Option<Target> {
        None
    }
    fn new_weak_proxy(&self, target: Target) -> RawValue {
        RawValue::from_bits(target.bits())
    }
    fn new_strong_value(&self, target: Target) -> RawValue {
        RawValue::from_bits(target.bits())
    }
    fn ensure_private_wrapper(&self, _target: Target) {}
    fn private_payload(&self, _target: Target) -> Option<EmbedderFields> {
        None
    }
    fn protect(&self, _target: Target) {}
    fn unprotect(&self, _target: Target) {}
}

fn masks() -> Vec<u64> {
    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    (0..1024)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        })
        .collect()
}

fn bench_run_finder(c: &mut Criterion) {
    let masks = masks();
    for len in [RunLength::One, RunLength::Four, RunLength::Sixteen] {
        c.bench_function(&format!("run_finder_{}", len.slots()), |b| {
            b.iter(|| {
                for &mask in &masks {
                    black_box(find_run(black_box(mask), len));
                }
            });
        });
    }
}

fn bench_local_scope_churn(c: &mut Criterion) {
    let context = HandleContext::new();
    c.bench_function("local_scope_two_blocks", |b| {
        b.iter(|| {
            let scope = HandleScope::new(&context);
            for i in 0..(HANDLE_BLOCK_SIZE + 1) {
                black_box(scope.create_handle(RawValue::from_bits(i + 1)));
            }
        });
    });
}

fn bench_global_churn(c: &mut Criterion) {
    let mut table = GlobalHandles::new(Arc::new(NullEngine));
    c.bench_function("global_create_destroy_1000", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..1000)
                .map(|i| table.create(RawValue::from_bits((i + 1) * 16)))
                .collect();
            for handle in handles {
                table.destroy(handle);
            }
            black_box(table.number_of_global_handles());
        });
    });
}

criterion_group!(
    benches,
    bench_run_finder,
    bench_local_scope_churn,
    bench_global_churn
);
criterion_main!(benches);
