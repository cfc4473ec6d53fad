use std::collections::HashMap;
use std::fmt::{self, Write};
use std::sync::Arc;

use crate::allocator::Allocator;
use crate::registry::AllocatorRole;
use crate::sink::MemoryFault;

/// The exact report produced when no matching live records exist.
pub const NO_LEAKS_MESSAGE: &str = "No memory leaks were detected.";

/// An ordered checkpoint used to scope leak queries to "since this point".
///
/// Periods are opaque: they support only ordering and equality, and are
/// issued by [`LeakDetector::mark_current_period`] in strictly increasing
/// order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Period(u64);

impl Period {
    pub(crate) const START: Period = Period(0);
}

/// Whether an allocation came from the scalar or the array family.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllocationKind {
    Scalar,
    Array,
}

impl fmt::Display for AllocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationKind::Scalar => f.write_str("scalar"),
            AllocationKind::Array => f.write_str("array"),
        }
    }
}

/// The call site an allocation was made from, when the entry point carried
/// that information.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Bookkeeping for one currently-live allocation.
pub struct AllocationRecord {
    address: usize,
    size: usize,
    role: AllocatorRole,
    allocator: Arc<dyn Allocator>,
    location: Option<SourceLocation>,
    period: Period,
    allocation_number: u64,
}

impl AllocationRecord {
    pub fn address(&self) -> usize {
        self.address
    }

    /// Requested size in bytes, excluding any instrumentation overhead.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn role(&self) -> AllocatorRole {
        self.role
    }

    pub fn kind(&self) -> AllocationKind {
        self.role.kind()
    }

    /// The allocator that performed the raw work; the matching deallocation
    /// goes through this instance, not through the registry.
    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    pub fn location(&self) -> Option<SourceLocation> {
        self.location
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn allocation_number(&self) -> u64 {
        self.allocation_number
    }
}

/// The record store: live allocations keyed by address, plus the period
/// counter used to scope queries.
///
/// The detector never touches the tracked memory itself and its own storage
/// goes through the host allocator, never through the instrumented
/// [`Allocator`] objects, so recording an allocation cannot recursively
/// trigger another recording.
pub struct LeakDetector {
    records: HashMap<usize, AllocationRecord>,
    current_period: Period,
    next_allocation_number: u64,
}

impl LeakDetector {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            current_period: Period::START,
            next_allocation_number: 1,
        }
    }

    /// Issues a new checkpoint strictly greater than all previously issued
    /// ones. Records created afterwards carry the new period tag.
    pub fn mark_current_period(&mut self) -> Period {
        self.current_period.0 += 1;
        self.current_period
    }

    /// Records a successful allocation.
    ///
    /// # Panics
    ///
    /// Panics if `address` collides with an existing live record. That means
    /// the interception layer double-counted an allocation, which is an
    /// internal defect, not a condition tracked code can trigger.
    pub fn record_allocation(
        &mut self,
        address: usize,
        size: usize,
        role: AllocatorRole,
        allocator: Arc<dyn Allocator>,
        location: Option<SourceLocation>,
    ) {
        let allocation_number = self.next_allocation_number;
        self.next_allocation_number += 1;

        let record = AllocationRecord {
            address,
            size,
            role,
            allocator,
            location,
            period: self.current_period,
            allocation_number,
        };
        if self.records.insert(address, record).is_some() {
            panic!("allocation at {address:#x} was recorded twice without an intervening deallocation");
        }
    }

    /// Retires the record for `address`, returning it so the caller can
    /// release the memory through the recorded allocator. `None` signals an
    /// invalid deallocation; the caller reports it through the ambient
    /// failure sink.
    pub fn retire(&mut self, address: usize) -> Option<AllocationRecord> {
        self.records.remove(&address)
    }

    /// Number of live records with a period tag at or after `since`
    /// (all records when `since` is `None`).
    pub fn total_leaks(&self, since: Option<Period>) -> usize {
        self.leaks_since(since).len()
    }

    /// Deletes the bookkeeping entry for `address` without deallocating.
    ///
    /// When `check_allocator` is set and the record was made by an allocator
    /// with a different name, the record is retained and a fault is returned;
    /// silently dropping it would hide the mismatch while leaving a phantom
    /// leak visible keeps it diagnosable.
    pub fn remove_record_without_deallocating(
        &mut self,
        allocator_name: &str,
        address: usize,
        check_allocator: bool,
    ) -> Option<MemoryFault> {
        match self.records.get(&address) {
            None => Some(MemoryFault::UnknownRemoval { address }),
            Some(record) if check_allocator && record.allocator.name() != allocator_name => {
                Some(MemoryFault::AllocatorMismatch {
                    address,
                    expected: allocator_name.to_string(),
                    actual: record.allocator.name(),
                })
            }
            Some(_) => {
                self.records.remove(&address);
                None
            }
        }
    }

    /// One line per matching live record, or the fixed no-leak message.
    pub fn report(&self, since: Option<Period>) -> String {
        let mut leaks = self.leaks_since(since);
        if leaks.is_empty() {
            return NO_LEAKS_MESSAGE.to_string();
        }
        leaks.sort_by_key(|record| record.allocation_number);

        let mut out = String::from("Memory leak(s) found.\n");
        for record in &leaks {
            let _ = write!(
                out,
                "Alloc num ({}) Leak size: {} Allocated at: ",
                record.allocation_number, record.size
            );
            match record.location {
                Some(location) => {
                    let _ = write!(out, "{} and line: {}.", location.file, location.line);
                }
                None => {
                    let _ = write!(out, "unknown.");
                }
            }
            let _ = writeln!(
                out,
                " Type: \"{}\" Address: <{:#x}>",
                record.allocator.name(),
                record.address
            );
        }
        let _ = writeln!(out, "Total number of leaks: {}", leaks.len());
        out
    }

    pub(crate) fn leaks_since(&self, since: Option<Period>) -> Vec<&AllocationRecord> {
        self.records
            .values()
            .filter(|record| since.map_or(true, |period| record.period >= period))
            .collect()
    }
}

impl Default for LeakDetector {
    fn default() -> Self {
        Self::new()
    }
}
