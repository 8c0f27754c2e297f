//! Tests for a global handle table shared across threads.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use common::{FakeEngine, FakeMarker};
use handle_shim::{
    CollectorHooks, GlobalHandles, Parameter, RawValue, SharedGlobalHandles, WeakCallbackInfo,
    WeakCallbackType,
};

#[test]
fn test_concurrent_create_destroy() {
    let shared = SharedGlobalHandles::new(FakeEngine::new());

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let shared = shared.clone();
            thread::spawn(move || {
                let mut mine = Vec::new();
                for i in 0..500 {
                    mine.push(shared.create(RawValue::from_bits((worker * 10_000 + i + 1) * 16)));
                    if i % 3 == 0 {
                        let handle = mine.remove(0);
                        shared.destroy(handle);
                    }
                }
                mine
            })
        })
        .collect();

    let mut survivors = Vec::new();
    for worker in workers {
        survivors.extend(worker.join().expect("worker panicked"));
    }

    let table = shared.lock();
    assert_eq!(table.number_of_global_handles(), survivors.len());
    for handle in &survivors {
        assert!(table.is_live(*handle));
    }
}

#[test]
fn test_with_runs_under_lock() {
    let engine = FakeEngine::new();
    let shared = SharedGlobalHandles::from(GlobalHandles::new(engine.clone()));
    let value = engine.object(0x9000);

    let handle = shared.with(|table| {
        let handle = table.create(value);
        table.make_weak_phantom(handle);
        handle
    });

    let ready = shared.with(|table| table.participate_in_mark(&FakeMarker::new()));
    assert!(ready.contains_key(&handle));
}

static DRAINED: AtomicUsize = AtomicUsize::new(0);

fn drained(_info: &mut WeakCallbackInfo<'_>) {
    DRAINED.fetch_add(1, Ordering::SeqCst);
}

fn queue_drained(info: &mut WeakCallbackInfo<'_>) {
    info.set_second_pass_callback(drained);
}

#[test]
fn test_ready_queue_drains_on_another_thread() {
    let engine = FakeEngine::new();
    let shared = SharedGlobalHandles::new(engine.clone());
    let queue = shared.ready_second_passes();

    let targets: Vec<_> = (1..=8).map(|i| common::target(0x10_0000 * i)).collect();
    shared.with(|table| {
        for &target in &targets {
            let handle = table.create(engine.object(target.bits()));
            table.make_weak(
                handle,
                Parameter::NULL,
                Some(queue_drained),
                WeakCallbackType::Parameter,
            );
        }
        let ready = table.participate_in_mark(&FakeMarker::new());
        for (&handle, &target) in &ready {
            table.run_first_pass(handle, Some(target));
        }
    });

    // The collector drains the queue while finalizations are still arriving.
    let collector = thread::spawn(move || {
        let mut ran = 0;
        while ran < 8 {
            ran += queue.run_all();
            thread::yield_now();
        }
        ran
    });

    for &target in &targets {
        assert_eq!(shared.with(|table| table.notify_target_finalized(target)), 1);
    }

    assert_eq!(collector.join().expect("collector panicked"), 8);
    assert_eq!(DRAINED.load(Ordering::SeqCst), 8);
}
