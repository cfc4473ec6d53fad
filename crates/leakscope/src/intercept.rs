use std::ffi::CStr;
use std::ptr::NonNull;

use crate::context::LeakContext;
use crate::detector::SourceLocation;
use crate::registry::AllocatorRole;
use crate::sink::MemoryFault;

// Sentinel written after every tracked payload and verified at deallocation;
// an overwritten sentinel means the tracked code ran past the end of its
// allocation.
const GUARD_LEN: usize = 4;
const GUARD_PATTERN: [u8; GUARD_LEN] = [0xA5, 0x5A, 0xC3, 0x3C];

// Freed blocks are overwritten before release so stale reads observably
// differ from the old contents.
const SCRIBBLE_BYTE: u8 = 0xCD;

/// An allocator declined to produce memory.
///
/// This is a normal, test-triggerable condition (e.g. with a
/// [`FailingAllocator`](crate::FailingAllocator) substituted), not a defect.
#[derive(Debug, thiserror::Error)]
#[error("allocator \"{allocator}\" failed to allocate {size} bytes")]
pub struct AllocationError {
    pub allocator: &'static str,
    pub size: usize,
}

/// The interception entry points.
///
/// Every allocation and deallocation in instrumented code funnels through
/// these: the entry point resolves the active allocator for its role,
/// performs the raw work, and keeps the record store in sync. The `_at`
/// variants carry the call site; the plain variants record an unknown origin.
impl LeakContext {
    /// Tracked scalar allocation with an unknown origin.
    pub fn allocate_scalar(&self, size: usize) -> Result<NonNull<u8>, AllocationError> {
        self.allocate_tracked(size, AllocatorRole::ScalarNew, None)
    }

    /// Tracked scalar allocation recording its call site.
    pub fn allocate_scalar_at(
        &self,
        size: usize,
        file: &'static str,
        line: u32,
    ) -> Result<NonNull<u8>, AllocationError> {
        self.allocate_tracked(size, AllocatorRole::ScalarNew, Some(SourceLocation { file, line }))
    }

    /// Tracked array allocation with an unknown origin.
    pub fn allocate_array(&self, size: usize) -> Result<NonNull<u8>, AllocationError> {
        self.allocate_tracked(size, AllocatorRole::ArrayNew, None)
    }

    /// Tracked array allocation recording its call site.
    pub fn allocate_array_at(
        &self,
        size: usize,
        file: &'static str,
        line: u32,
    ) -> Result<NonNull<u8>, AllocationError> {
        self.allocate_tracked(size, AllocatorRole::ArrayNew, Some(SourceLocation { file, line }))
    }

    /// Tracked malloc-equivalent: returns null on failure, never an error.
    pub fn malloc(&self, size: usize) -> *mut u8 {
        self.malloc_tracked(size, None)
    }

    /// Tracked malloc-equivalent recording its call site.
    pub fn malloc_at(&self, size: usize, file: &'static str, line: u32) -> *mut u8 {
        self.malloc_tracked(size, Some(SourceLocation { file, line }))
    }

    /// Tracked string duplication through the malloc family.
    pub fn strdup(&self, s: &CStr) -> *mut libc::c_char {
        self.dup_bytes(s.to_bytes(), None)
    }

    pub fn strdup_at(&self, s: &CStr, file: &'static str, line: u32) -> *mut libc::c_char {
        self.dup_bytes(s.to_bytes(), Some(SourceLocation { file, line }))
    }

    /// Tracked duplication of at most `n` bytes of `s`, NUL-terminated.
    pub fn strndup(&self, s: &CStr, n: usize) -> *mut libc::c_char {
        let bytes = s.to_bytes();
        self.dup_bytes(&bytes[..n.min(bytes.len())], None)
    }

    pub fn strndup_at(
        &self,
        s: &CStr,
        n: usize,
        file: &'static str,
        line: u32,
    ) -> *mut libc::c_char {
        let bytes = s.to_bytes();
        self.dup_bytes(&bytes[..n.min(bytes.len())], Some(SourceLocation { file, line }))
    }

    /// Tracked scalar deallocation. Null is a silent no-op.
    ///
    /// # Safety
    ///
    /// If `ptr` has a live record, it must not have been released through any
    /// other path. Untracked addresses are safe to pass: they are reported
    /// through the failure sink and left untouched.
    pub unsafe fn deallocate_scalar(&self, ptr: *mut u8) {
        unsafe { self.deallocate_tracked(ptr, AllocatorRole::ScalarNew, None) }
    }

    /// # Safety
    ///
    /// Same contract as [`Self::deallocate_scalar`].
    pub unsafe fn deallocate_scalar_at(&self, ptr: *mut u8, file: &'static str, line: u32) {
        unsafe {
            self.deallocate_tracked(
                ptr,
                AllocatorRole::ScalarNew,
                Some(SourceLocation { file, line }),
            )
        }
    }

    /// Tracked array deallocation. Null is a silent no-op.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::deallocate_scalar`].
    pub unsafe fn deallocate_array(&self, ptr: *mut u8) {
        unsafe { self.deallocate_tracked(ptr, AllocatorRole::ArrayNew, None) }
    }

    /// # Safety
    ///
    /// Same contract as [`Self::deallocate_scalar`].
    pub unsafe fn deallocate_array_at(&self, ptr: *mut u8, file: &'static str, line: u32) {
        unsafe {
            self.deallocate_tracked(
                ptr,
                AllocatorRole::ArrayNew,
                Some(SourceLocation { file, line }),
            )
        }
    }

    /// Tracked free-equivalent. Null is a silent no-op.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::deallocate_scalar`].
    pub unsafe fn free(&self, ptr: *mut u8) {
        unsafe { self.deallocate_tracked(ptr, AllocatorRole::Malloc, None) }
    }

    /// # Safety
    ///
    /// Same contract as [`Self::deallocate_scalar`].
    pub unsafe fn free_at(&self, ptr: *mut u8, file: &'static str, line: u32) {
        unsafe {
            self.deallocate_tracked(ptr, AllocatorRole::Malloc, Some(SourceLocation { file, line }))
        }
    }

    fn allocate_tracked(
        &self,
        size: usize,
        role: AllocatorRole,
        location: Option<SourceLocation>,
    ) -> Result<NonNull<u8>, AllocationError> {
        let allocator = self.current_allocator(role);

        let failure = || AllocationError { allocator: allocator.name(), size };
        let total = size.checked_add(GUARD_LEN).ok_or_else(failure)?;
        let ptr = allocator.allocate(total).ok_or_else(failure)?;

        unsafe {
            std::ptr::copy_nonoverlapping(
                GUARD_PATTERN.as_ptr(),
                ptr.as_ptr().add(size),
                GUARD_LEN,
            );
        }

        self.lock_detector()
            .record_allocation(ptr.as_ptr() as usize, size, role, allocator, location);
        Ok(ptr)
    }

    fn malloc_tracked(&self, size: usize, location: Option<SourceLocation>) -> *mut u8 {
        match self.allocate_tracked(size, AllocatorRole::Malloc, location) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => std::ptr::null_mut(),
        }
    }

    fn dup_bytes(&self, bytes: &[u8], location: Option<SourceLocation>) -> *mut libc::c_char {
        let Ok(ptr) = self.allocate_tracked(bytes.len() + 1, AllocatorRole::Malloc, location)
        else {
            return std::ptr::null_mut();
        };
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
            *ptr.as_ptr().add(bytes.len()) = 0;
        }
        ptr.as_ptr().cast()
    }

    unsafe fn deallocate_tracked(
        &self,
        ptr: *mut u8,
        family: AllocatorRole,
        location: Option<SourceLocation>,
    ) {
        // Deleting nothing is always valid and must not touch the detector.
        if ptr.is_null() {
            return;
        }
        let address = ptr as usize;

        let record = self.lock_detector().retire(address);
        let Some(record) = record else {
            // Never free memory this system does not track.
            self.report_fault(MemoryFault::UnknownDeallocation { address, family, location });
            return;
        };

        if record.role() != family {
            self.report_fault(MemoryFault::FamilyMismatch {
                address,
                allocated: record.role(),
                deallocated: family,
                allocation_location: record.location(),
            });
        }

        let guard_intact = unsafe {
            std::slice::from_raw_parts(ptr.add(record.size()), GUARD_LEN) == &GUARD_PATTERN[..]
        };
        if !guard_intact {
            self.report_fault(MemoryFault::MemoryCorruption {
                address,
                size: record.size(),
                allocation_location: record.location(),
            });
        }

        unsafe {
            std::ptr::write_bytes(ptr, SCRIBBLE_BYTE, record.size() + GUARD_LEN);
            record.allocator().deallocate(NonNull::new_unchecked(ptr));
        }
    }
}

/// Tracked scalar allocation capturing the call site.
#[macro_export]
macro_rules! tracked_new {
    ($context:expr, $size:expr) => {
        $context.allocate_scalar_at($size, file!(), line!())
    };
}

/// Tracked array allocation capturing the call site.
#[macro_export]
macro_rules! tracked_new_array {
    ($context:expr, $size:expr) => {
        $context.allocate_array_at($size, file!(), line!())
    };
}

/// Tracked malloc capturing the call site.
#[macro_export]
macro_rules! tracked_malloc {
    ($context:expr, $size:expr) => {
        $context.malloc_at($size, file!(), line!())
    };
}

/// Tracked strdup capturing the call site.
#[macro_export]
macro_rules! tracked_strdup {
    ($context:expr, $s:expr) => {
        $context.strdup_at($s, file!(), line!())
    };
}

/// Tracked scalar deallocation capturing the call site for fault messages.
/// Expands to an unsafe call; wrap the use in `unsafe`.
#[macro_export]
macro_rules! tracked_delete {
    ($context:expr, $ptr:expr) => {
        $context.deallocate_scalar_at($ptr, file!(), line!())
    };
}

/// Tracked array deallocation capturing the call site for fault messages.
/// Expands to an unsafe call; wrap the use in `unsafe`.
#[macro_export]
macro_rules! tracked_delete_array {
    ($context:expr, $ptr:expr) => {
        $context.deallocate_array_at($ptr, file!(), line!())
    };
}

/// Tracked free capturing the call site for fault messages.
/// Expands to an unsafe call; wrap the use in `unsafe`.
#[macro_export]
macro_rules! tracked_free {
    ($context:expr, $ptr:expr) => {
        $context.free_at($ptr, file!(), line!())
    };
}
