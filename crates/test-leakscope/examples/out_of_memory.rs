use std::sync::Arc;

use leakscope::{AllocatorRole, FailingAllocator, LeakContext};

fn main() {
    let context = LeakContext::new();
    let _stash = context.stash_allocators();

    let failing = Arc::new(FailingAllocator::new());
    context.set_current_allocator(AllocatorRole::ScalarNew, failing.clone());
    context.set_current_allocator(AllocatorRole::Malloc, failing);

    match context.allocate_scalar(32) {
        Ok(_) => println!("unexpected success"),
        Err(error) => println!("new failed: {error}"),
    }

    let ptr = context.malloc(32);
    println!("malloc returned null: {}", ptr.is_null());
    println!("leaks: {}", context.total_leaks(None));
}
