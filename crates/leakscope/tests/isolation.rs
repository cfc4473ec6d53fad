use std::cell::Cell;
use std::sync::Arc;

use leakscope::{FailureSink, IsolatedInvoker, LeakContext, MemoryFault, RecordingSink};

fn same_sink(a: &Arc<dyn FailureSink>, b: &Arc<dyn FailureSink>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<u8>(), Arc::as_ptr(b).cast::<u8>())
}

#[test]
fn deallocation_failure_is_captured_and_the_sink_is_restored() {
    let context = Arc::new(LeakContext::new());
    let default_sink = context.failure_sink();
    let invoker = IsolatedInvoker::new(context.clone());

    let report = invoker.run(|| {
        // Reporting this failure must not unwind out of the deallocation.
        unsafe { context.deallocate_scalar(0x1234678 as *mut u8) };
    });

    assert_eq!(report.fault_count(), 1);
    assert!(matches!(
        report.faults[0],
        MemoryFault::UnknownDeallocation { address: 0x1234678, .. }
    ));
    assert!(report.panic.is_none());
    assert!(same_sink(&context.failure_sink(), &default_sink));
}

#[test]
fn panicking_body_is_captured_and_the_sink_is_restored() {
    let context = Arc::new(LeakContext::new());
    let default_sink = context.failure_sink();
    let invoker = IsolatedInvoker::new(context.clone());

    let report = invoker.run(|| panic!("boom"));

    let message = report.panic.expect("panic should be captured");
    assert!(message.contains("boom"), "Got:\n{message}");
    assert!(same_sink(&context.failure_sink(), &default_sink));

    // The invoker is reusable after a panicking body.
    let report = invoker.run(|| {});
    assert_eq!(report.fault_count(), 0);
    assert!(report.panic.is_none());
}

#[test]
fn leaks_are_scoped_to_the_invoked_body() {
    let context = Arc::new(LeakContext::new());
    let invoker = IsolatedInvoker::new(context.clone());

    // A pre-existing allocation must not be attributed to the body.
    let pre_existing = context.allocate_scalar(8).expect("allocation failed");

    let leaked = Cell::new(std::ptr::null_mut());
    let report = invoker.run(|| {
        let kept = context.allocate_scalar(8).expect("allocation failed");
        let released = context.allocate_scalar(8).expect("allocation failed");
        unsafe { context.deallocate_scalar(released.as_ptr()) };
        leaked.set(kept.as_ptr());
    });

    assert_eq!(report.leaks_introduced, 1);
    assert_eq!(report.fault_count(), 0);

    unsafe {
        context.deallocate_scalar(leaked.get());
        context.deallocate_scalar(pre_existing.as_ptr());
    }
}

#[test]
fn faults_inside_the_body_never_reach_the_ambient_sink() {
    let context = Arc::new(LeakContext::new());
    let ambient = Arc::new(RecordingSink::new());
    context.set_failure_sink(ambient.clone());

    let invoker = IsolatedInvoker::new(context.clone());
    let report = invoker.run(|| {
        unsafe { context.free(0xBAD as *mut u8) };
    });

    assert_eq!(report.fault_count(), 1);
    assert_eq!(ambient.fault_count(), 0);

    // Faults after the run flow to the ambient sink again.
    unsafe { context.free(0xBAD as *mut u8) };
    assert_eq!(ambient.fault_count(), 1);
}
