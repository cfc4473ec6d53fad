use std::sync::Arc;

use leakscope::{AllocatorRole, FailingAllocator, LeakContext};

fn install_failing_everywhere(context: &LeakContext) -> Arc<FailingAllocator> {
    let failing = Arc::new(FailingAllocator::new());
    context.set_current_allocator(AllocatorRole::ScalarNew, failing.clone());
    context.set_current_allocator(AllocatorRole::ArrayNew, failing.clone());
    context.set_current_allocator(AllocatorRole::Malloc, failing.clone());
    failing
}

#[test]
fn failing_new_allocators_surface_an_error() {
    let context = LeakContext::new();
    let _stash = context.stash_allocators();
    install_failing_everywhere(&context);

    let error = context.allocate_scalar(10).expect_err("allocation should fail");
    assert_eq!(
        error.to_string(),
        "allocator \"failing allocator\" failed to allocate 10 bytes"
    );
    assert!(context.allocate_array(10).is_err());
    assert_eq!(context.total_leaks(None), 0);
}

#[test]
fn failing_malloc_family_returns_null() {
    let context = LeakContext::new();
    let _stash = context.stash_allocators();
    install_failing_everywhere(&context);

    assert!(context.malloc(10).is_null());
    let source = std::ffi::CString::new("abc").unwrap();
    assert!(context.strdup(&source).is_null());
    assert!(context.strndup(&source, 2).is_null());
    assert_eq!(context.total_leaks(None), 0);
}

#[test]
fn dropping_the_stash_guard_restores_working_allocators() {
    let context = LeakContext::new();
    {
        let _stash = context.stash_allocators();
        install_failing_everywhere(&context);
        assert!(context.allocate_scalar(8).is_err());
    }

    let ptr = context.allocate_scalar(8).expect("native allocator should be back");
    unsafe { context.deallocate_scalar(ptr.as_ptr()) };
    assert_eq!(context.total_leaks(None), 0);
}

#[test]
fn save_restore_round_trip_covers_every_role() {
    let context = LeakContext::new();
    let roles = [
        AllocatorRole::ScalarNew,
        AllocatorRole::ArrayNew,
        AllocatorRole::Malloc,
    ];
    let before: Vec<_> = roles.iter().map(|&role| context.current_allocator(role)).collect();

    let saved = context.save_allocators();
    install_failing_everywhere(&context);
    context.restore_allocators(saved);

    for (&role, expected) in roles.iter().zip(&before) {
        assert!(Arc::ptr_eq(&context.current_allocator(role), expected));
    }
}

#[test]
fn failing_allocator_is_never_asked_to_deallocate() {
    let context = LeakContext::new();
    let _stash = context.stash_allocators();
    let failing = install_failing_everywhere(&context);

    assert!(context.malloc(10).is_null());
    assert!(context.allocate_scalar(10).is_err());
    assert_eq!(failing.unexpected_deallocations(), 0);
}
