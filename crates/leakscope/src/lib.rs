//! Allocation tracking and leak detection for unit-test harnesses.
//!
//! leakscope intercepts every tracked allocation and deallocation (scalar and
//! array "new"-style, malloc-family, string duplication), records where each
//! block came from, and can report the set of allocations made but not yet
//! released, scoped to a measurement period such as "during the current
//! test". Allocators are pluggable per family, so a test can substitute a
//! failing allocator to exercise out-of-memory paths; anomalies found on
//! deallocation paths are pushed into a swappable failure sink instead of
//! unwinding.
//!
//! ```rust
//! use leakscope::LeakContext;
//!
//! let context = LeakContext::new();
//! let checking = context.mark_current_period();
//!
//! let ptr = leakscope::tracked_new!(context, 16).unwrap();
//! assert_eq!(context.total_leaks(Some(checking)), 1);
//!
//! unsafe { context.deallocate_scalar(ptr.as_ptr()) };
//! assert_eq!(context.total_leaks(Some(checking)), 0);
//! assert_eq!(context.report(Some(checking)), leakscope::NO_LEAKS_MESSAGE);
//! ```

mod allocator;
mod context;
mod detector;
mod intercept;
mod invoker;
mod registry;
mod sink;

pub use allocator::{Allocator, FailingAllocator, NativeAllocator};
pub use context::{
    global, install_global, uninstall_global, AllocatorStashGuard, LeakContext,
};
pub use detector::{
    AllocationKind, AllocationRecord, LeakDetector, Period, SourceLocation, NO_LEAKS_MESSAGE,
};
pub use intercept::AllocationError;
pub use invoker::{InvocationReport, IsolatedInvoker};
pub use registry::{AllocatorRegistry, AllocatorRole, AllocatorStash};
pub use sink::{FailureSink, LoggingSink, MemoryFault, RecordingSink};

#[cfg(feature = "json")]
mod json;
#[cfg(feature = "json")]
pub use json::{LeakJson, LeakReportJson};
