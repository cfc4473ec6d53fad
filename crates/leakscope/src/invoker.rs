use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::context::LeakContext;
use crate::sink::{FailureSink, MemoryFault, RecordingSink};

/// What happened while an isolated body ran.
#[derive(Debug)]
pub struct InvocationReport {
    /// Faults reported through the sink while the body ran, including ones
    /// raised from inside deallocation paths.
    pub faults: Vec<MemoryFault>,
    /// The panic message, if the body panicked.
    pub panic: Option<String>,
    /// Live allocations created during the body and not yet released.
    pub leaks_introduced: usize,
}

impl InvocationReport {
    pub fn fault_count(&self) -> usize {
        self.faults.len()
    }
}

/// Runs one unit of test code in isolation.
///
/// A fresh [`RecordingSink`] is swapped in for the duration of the body, so
/// anomalies raised during execution are captured instead of reaching the
/// ambient sink, and a fresh period scopes the leak count to allocations the
/// body itself introduced. The previous sink is restored on every exit path,
/// including a panicking body.
pub struct IsolatedInvoker {
    context: Arc<LeakContext>,
}

impl IsolatedInvoker {
    pub fn new(context: Arc<LeakContext>) -> Self {
        Self { context }
    }

    pub fn run(&self, body: impl FnOnce()) -> InvocationReport {
        let recording = Arc::new(RecordingSink::new());
        let previous = self.context.set_failure_sink(recording.clone());
        let _restore = SinkRestore {
            context: &self.context,
            previous: Some(previous),
        };

        let period = self.context.mark_current_period();
        let outcome = panic::catch_unwind(AssertUnwindSafe(body));

        InvocationReport {
            faults: recording.take_faults(),
            panic: outcome.err().map(panic_message),
            leaks_introduced: self.context.total_leaks(Some(period)),
        }
    }
}

struct SinkRestore<'a> {
    context: &'a LeakContext,
    previous: Option<Arc<dyn FailureSink>>,
}

impl Drop for SinkRestore<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.context.set_failure_sink(previous);
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
