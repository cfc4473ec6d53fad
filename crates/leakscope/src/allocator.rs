use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Contract for an allocator that can back tracked allocations.
///
/// Implementations come in two flavors conceptually: "new-style" allocators
/// backing scalar/array allocations and "malloc-style" allocators backing the
/// C allocation family. Both express failure the same way here (`None`); the
/// interception layer decides whether that surfaces as an error or as a null
/// pointer.
pub trait Allocator: Send + Sync {
    /// Returns `None` when the allocator cannot produce memory.
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this same allocator and
    /// must not have been deallocated already.
    unsafe fn deallocate(&self, ptr: NonNull<u8>);

    fn name(&self) -> &'static str;
}

/// Thin pass-through to the platform's raw allocation primitives.
///
/// Bookkeeping never flows through instances of this type; they only perform
/// the raw memory work for tracked allocations, so substituting them cannot
/// skew the record store.
pub struct NativeAllocator {
    name: &'static str,
}

impl NativeAllocator {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Allocator for NativeAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        // malloc(0) may legally return null; always request at least one byte
        // so every successful allocation has a unique, trackable address.
        let ptr = unsafe { libc::malloc(size.max(1)) };
        NonNull::new(ptr.cast::<u8>())
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        unsafe { libc::free(ptr.as_ptr().cast()) }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Allocator that always reports out-of-memory.
///
/// Used by tests to exercise allocation-failure paths. It never hands out
/// memory, so asking it to deallocate is a programming error; the call is
/// counted and otherwise ignored rather than crashing from a deallocation
/// context.
#[derive(Default)]
pub struct FailingAllocator {
    unexpected_deallocations: AtomicUsize,
}

impl FailingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `deallocate` was (wrongly) invoked.
    pub fn unexpected_deallocations(&self) -> usize {
        self.unexpected_deallocations.load(Ordering::Relaxed)
    }
}

impl Allocator for FailingAllocator {
    fn allocate(&self, _size: usize) -> Option<NonNull<u8>> {
        None
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>) {
        self.unexpected_deallocations.fetch_add(1, Ordering::Relaxed);
    }

    fn name(&self) -> &'static str {
        "failing allocator"
    }
}
