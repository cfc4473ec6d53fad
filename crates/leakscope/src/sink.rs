use std::fmt;
use std::sync::Mutex;

use crate::detector::SourceLocation;
use crate::registry::AllocatorRole;

/// One anomalous condition detected on an allocation or deallocation path.
///
/// Faults are pushed into the ambient [`FailureSink`] instead of being
/// returned or raised: deallocation entry points have no error channel, so
/// execution continues and the anomaly surfaces when the sink is inspected.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MemoryFault {
    /// A deallocation entry point was handed an address with no live record.
    UnknownDeallocation {
        address: usize,
        family: AllocatorRole,
        location: Option<SourceLocation>,
    },
    /// Administrative removal was requested for an address with no live record.
    UnknownRemoval { address: usize },
    /// The deallocation family does not match the one that allocated.
    FamilyMismatch {
        address: usize,
        allocated: AllocatorRole,
        deallocated: AllocatorRole,
        allocation_location: Option<SourceLocation>,
    },
    /// Administrative removal named an allocator other than the recording one.
    AllocatorMismatch {
        address: usize,
        expected: String,
        actual: &'static str,
    },
    /// The guard bytes after the payload were overwritten.
    MemoryCorruption {
        address: usize,
        size: usize,
        allocation_location: Option<SourceLocation>,
    },
}

impl fmt::Display for MemoryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryFault::UnknownDeallocation { address, family, location } => {
                write!(
                    f,
                    "deallocating non-allocated memory <{:#x}> via \"{}\"",
                    address,
                    family.dealloc_name()
                )?;
                if let Some(location) = location {
                    write!(f, " at {location}")?;
                }
                Ok(())
            }
            MemoryFault::UnknownRemoval { address } => {
                write!(f, "removing allocation record for non-allocated memory <{address:#x}>")
            }
            MemoryFault::FamilyMismatch { address, allocated, deallocated, allocation_location } => {
                write!(
                    f,
                    "allocation/deallocation type mismatch for <{:#x}>: allocated with \"{}\", deallocated with \"{}\"",
                    address,
                    allocated,
                    deallocated.dealloc_name()
                )?;
                if let Some(location) = allocation_location {
                    write!(f, " (allocated at {location})")?;
                }
                Ok(())
            }
            MemoryFault::AllocatorMismatch { address, expected, actual } => {
                write!(
                    f,
                    "removing allocation record for <{address:#x}>: expected allocator \"{expected}\" but it was allocated by \"{actual}\""
                )
            }
            MemoryFault::MemoryCorruption { address, size, allocation_location } => {
                write!(f, "memory corruption detected for <{address:#x}> size: {size}")?;
                if let Some(location) = allocation_location {
                    write!(f, " (allocated at {location})")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MemoryFault {}

/// The ambient failure-reporting channel.
///
/// A single sink is registered per context; the core calls into it whenever
/// an allocation or deallocation path detects an anomaly. Swappable so a
/// harness can capture faults per test run.
pub trait FailureSink: Send + Sync {
    fn report_failure(&self, fault: &MemoryFault);
}

/// Default sink: surfaces faults as `tracing` error events.
pub struct LoggingSink;

impl FailureSink for LoggingSink {
    fn report_failure(&self, fault: &MemoryFault) {
        tracing::error!(target: "leakscope", fault = %fault, "memory fault reported");
    }
}

/// Sink that accumulates faults for later inspection.
#[derive(Default)]
pub struct RecordingSink {
    faults: Mutex<Vec<MemoryFault>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fault_count(&self) -> usize {
        self.lock().len()
    }

    /// Drains the accumulated faults.
    pub fn take_faults(&self) -> Vec<MemoryFault> {
        std::mem::take(&mut *self.lock())
    }

    pub fn faults(&self) -> Vec<MemoryFault> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MemoryFault>> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FailureSink for RecordingSink {
    fn report_failure(&self, fault: &MemoryFault) {
        self.lock().push(fault.clone());
    }
}
