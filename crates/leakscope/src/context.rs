use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use arc_swap::ArcSwapOption;

use crate::allocator::Allocator;
use crate::detector::{LeakDetector, Period};
use crate::registry::{AllocatorRegistry, AllocatorRole, AllocatorStash};
use crate::sink::{FailureSink, LoggingSink, MemoryFault};

/// The process-wide context: record store, allocator registry, and the
/// currently registered failure sink.
///
/// Every interception entry point takes the context by reference, so a
/// harness can run multiple isolated instances side by side; [`install_global`]
/// exists for hosts that want one ambient instance.
///
/// All shared state sits behind mutexes so the engine stays correct when a
/// harness runs tests across threads. Locks are never held across a sink
/// call or a raw allocator call.
pub struct LeakContext {
    detector: Mutex<LeakDetector>,
    registry: Mutex<AllocatorRegistry>,
    sink: Mutex<Arc<dyn FailureSink>>,
}

impl LeakContext {
    pub fn new() -> Self {
        Self {
            detector: Mutex::new(LeakDetector::new()),
            registry: Mutex::new(AllocatorRegistry::new()),
            sink: Mutex::new(Arc::new(LoggingSink)),
        }
    }

    /// The currently registered failure sink.
    pub fn failure_sink(&self) -> Arc<dyn FailureSink> {
        lock(&self.sink).clone()
    }

    /// Swaps the failure sink, returning the previous one so the caller can
    /// restore it.
    pub fn set_failure_sink(&self, sink: Arc<dyn FailureSink>) -> Arc<dyn FailureSink> {
        std::mem::replace(&mut *lock(&self.sink), sink)
    }

    pub(crate) fn report_fault(&self, fault: MemoryFault) {
        // Resolve first so the sink lock is released before the call-out.
        let sink = self.failure_sink();
        sink.report_failure(&fault);
    }

    /// Issues a new period marker; see [`LeakDetector::mark_current_period`].
    pub fn mark_current_period(&self) -> Period {
        self.lock_detector().mark_current_period()
    }

    pub fn total_leaks(&self, since: Option<Period>) -> usize {
        self.lock_detector().total_leaks(since)
    }

    pub fn report(&self, since: Option<Period>) -> String {
        self.lock_detector().report(since)
    }

    /// Deletes the bookkeeping entry for `address` without deallocating, for
    /// memory that was intentionally released through a non-instrumented
    /// path. Mismatches surface through the failure sink.
    pub fn remove_record_without_deallocating(
        &self,
        allocator_name: &str,
        address: *mut u8,
        check_allocator: bool,
    ) {
        let fault = self.lock_detector().remove_record_without_deallocating(
            allocator_name,
            address as usize,
            check_allocator,
        );
        if let Some(fault) = fault {
            self.report_fault(fault);
        }
    }

    pub fn current_allocator(&self, role: AllocatorRole) -> Arc<dyn Allocator> {
        lock(&self.registry).current(role)
    }

    pub fn set_current_allocator(&self, role: AllocatorRole, allocator: Arc<dyn Allocator>) {
        lock(&self.registry).set_current(role, allocator)
    }

    /// Captures all allocator bindings; prefer [`Self::stash_allocators`]
    /// unless the restore point cannot be expressed as a scope.
    pub fn save_allocators(&self) -> AllocatorStash {
        lock(&self.registry).stash()
    }

    pub fn restore_allocators(&self, stash: AllocatorStash) {
        lock(&self.registry).restore(stash)
    }

    /// Captures all allocator bindings and restores them when the returned
    /// guard drops, on every exit path of the enclosing scope.
    pub fn stash_allocators(&self) -> AllocatorStashGuard<'_> {
        AllocatorStashGuard {
            context: self,
            stash: Some(self.save_allocators()),
        }
    }

    pub(crate) fn lock_detector(&self) -> MutexGuard<'_, LeakDetector> {
        lock(&self.detector)
    }
}

impl Default for LeakContext {
    fn default() -> Self {
        Self::new()
    }
}

// Bookkeeping must survive a panicking sink or test body; a poisoned lock
// still holds consistent state because no invariant spans a panic point.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Restores the stashed allocator bindings on drop.
#[must_use = "the previous allocator bindings are restored when the guard is dropped"]
pub struct AllocatorStashGuard<'a> {
    context: &'a LeakContext,
    stash: Option<AllocatorStash>,
}

impl Drop for AllocatorStashGuard<'_> {
    fn drop(&mut self) {
        if let Some(stash) = self.stash.take() {
            self.context.restore_allocators(stash);
        }
    }
}

static GLOBAL_CONTEXT: OnceLock<ArcSwapOption<LeakContext>> = OnceLock::new();

fn global_slot() -> &'static ArcSwapOption<LeakContext> {
    GLOBAL_CONTEXT.get_or_init(|| ArcSwapOption::from(None))
}

/// Installs the process-wide context.
///
/// # Panics
///
/// Panics if a global context is already installed; uninstall the previous
/// one first.
pub fn install_global(context: Arc<LeakContext>) {
    let slot = global_slot();
    if slot.load().is_some() {
        panic!("a global LeakContext is already installed");
    }
    slot.store(Some(context));
}

/// The installed process-wide context, if any.
pub fn global() -> Option<Arc<LeakContext>> {
    global_slot().load_full()
}

/// Removes and returns the process-wide context.
pub fn uninstall_global() -> Option<Arc<LeakContext>> {
    global_slot().swap(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::FailingAllocator;

    fn is_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_context_is_send_sync() {
        is_send_sync::<LeakContext>();
    }

    #[test]
    fn stash_guard_restores_on_scope_exit() {
        let context = LeakContext::new();
        let native = context.current_allocator(AllocatorRole::ScalarNew);
        {
            let _stash = context.stash_allocators();
            context.set_current_allocator(
                AllocatorRole::ScalarNew,
                Arc::new(FailingAllocator::new()),
            );
            assert!(!Arc::ptr_eq(
                &context.current_allocator(AllocatorRole::ScalarNew),
                &native
            ));
        }
        assert!(Arc::ptr_eq(
            &context.current_allocator(AllocatorRole::ScalarNew),
            &native
        ));
    }

    #[test]
    fn global_install_uninstall_round_trip() {
        let context = Arc::new(LeakContext::new());
        install_global(context.clone());
        let installed = global().expect("global context should be installed");
        assert!(Arc::ptr_eq(&installed, &context));

        let removed = uninstall_global().expect("global context should be removed");
        assert!(Arc::ptr_eq(&removed, &context));
        assert!(global().is_none());
    }
}
