//! Integration tests for local handle scopes.

mod common;

use common::FakeEngine;
use handle_shim::handles::{CanonicalHandleScope, HANDLE_BLOCK_SIZE};
use handle_shim::{
    number_of_handles, EscapableHandleScope, HandleContext, HandleScope, MaybeLocal, RawValue,
};

#[test]
fn test_scope_levels_nest() {
    let context = HandleContext::new();
    assert_eq!(context.level(), 0);

    let outer = HandleScope::new(&context);
    assert_eq!(outer.level(), 1);
    {
        let inner = HandleScope::new(&context);
        assert_eq!(inner.level(), 2);
    }
    assert_eq!(outer.level(), 1);
    drop(outer);
    assert_eq!(context.level(), 0);
}

#[test]
fn test_enter_never_allocates() {
    let context = HandleContext::new();
    let _a = HandleScope::new(&context);
    let _b = HandleScope::new(&context);
    let _c = HandleScope::new(&context);

    assert_eq!(context.block_count(), 0);
    assert_eq!(number_of_handles(&context), 0);
}

#[test]
fn test_handles_are_restored_on_exit() {
    let context = HandleContext::new();
    let outer = HandleScope::new(&context);
    let kept = outer.create_handle(RawValue::from_bits(0x100));

    for round in 0..3 {
        let inner = HandleScope::new(&context);
        for i in 0..(HANDLE_BLOCK_SIZE + round * 7) {
            let _ = inner.create_handle(RawValue::from_bits(0x1000 + i * 8));
        }
        assert!(context.block_count() >= 2);
        drop(inner);

        assert_eq!(number_of_handles(&context), 1);
        assert_eq!(context.block_count(), 1);
    }

    assert_eq!(kept.value(), RawValue::from_bits(0x100));
}

#[test]
fn test_slot_addresses_are_sequential() {
    let context = HandleContext::new();
    let scope = HandleScope::new(&context);
    let a = scope.create_handle(RawValue::from_bits(1));
    let b = scope.create_handle(RawValue::from_bits(2));

    assert_eq!(a.location().wrapping_add(1), b.location());
    b.set(RawValue::from_bits(3));
    assert_eq!(b.value(), RawValue::from_bits(3));
}

#[test]
fn test_number_of_handles_tracks_every_block() {
    let context = HandleContext::new();
    let scope = HandleScope::new(&context);

    for n in 1..=(3 * HANDLE_BLOCK_SIZE) {
        let _ = scope.create_handle(RawValue::from_bits(n));
        if n % 997 == 0 || n % HANDLE_BLOCK_SIZE == 0 || n % HANDLE_BLOCK_SIZE == 1 {
            assert_eq!(number_of_handles(&context), n);
        }
    }
    assert_eq!(context.block_count(), 3);
}

#[test]
fn test_escape_into_parent() {
    let context = HandleContext::new();
    let outer = HandleScope::new(&context);

    let escaped = {
        let inner = EscapableHandleScope::new(&context);
        for i in 0..10 {
            let _ = inner.create_handle(RawValue::from_bits(0x10 * (i + 1)));
        }
        let result = inner.create_handle(RawValue::from_bits(0xabc0));
        inner.escape(&outer, MaybeLocal::from(result))
    };

    let escaped = escaped.expect("value escaped");
    assert_eq!(escaped.value(), RawValue::from_bits(0xabc0));
    assert_eq!(number_of_handles(&context), 1);
}

#[test]
fn test_escape_null_value_is_kept() {
    let context = HandleContext::new();
    let outer = HandleScope::new(&context);
    let inner = EscapableHandleScope::new(&context);
    let null = inner.create_handle(RawValue::NULL);

    // A local holding null still escapes; only an empty `MaybeLocal` does not.
    let escaped = inner.escape(&outer, null.into()).expect("escaped");
    assert!(escaped.value().is_null());
}

#[test]
fn test_active_values_counts_heap_values() {
    let engine = FakeEngine::new();
    let context = HandleContext::new();
    let scope = HandleScope::new(&context);

    let object = engine.object(0x4000);
    let text = engine.primitive();
    let _ = scope.create_handle(object);
    let _ = scope.create_handle(object);
    let _ = scope.create_handle(text);
    let _ = scope.create_handle(FakeEngine::smi(7));
    let _ = scope.create_handle(RawValue::NULL);

    let active = context.active_values(&*engine);
    assert_eq!(active.len(), 2);
    assert_eq!(active[&object], 2);
    assert_eq!(active[&text], 1);
}

#[test]
#[should_panic(expected = "without an open HandleScope")]
fn test_create_without_scope_panics() {
    let context = HandleContext::new();
    {
        let scope = HandleScope::new(&context);
        let _ = scope.create_handle(RawValue::from_bits(1));
    }

    // The escape slot needs an enclosing scope to live in.
    let _ = EscapableHandleScope::new(&context);
}

#[test]
#[should_panic(expected = "not supported")]
fn test_delete_extensions_unsupported() {
    let context = HandleContext::new();
    HandleScope::delete_extensions(&context);
}

#[test]
#[should_panic(expected = "not supported")]
fn test_canonical_lookup_unsupported() {
    let context = HandleContext::new();
    let _outer = HandleScope::new(&context);
    let canonical = CanonicalHandleScope::new(&context);
    canonical.lookup(RawValue::from_bits(8));
}
