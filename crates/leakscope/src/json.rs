use serde::Serialize;

use crate::context::LeakContext;
use crate::detector::Period;

/// Serializable snapshot of the current leaks, mirroring the text report.
#[derive(Serialize, Debug)]
pub struct LeakReportJson {
    pub total_leaks: usize,
    pub leaks: Vec<LeakJson>,
}

#[derive(Serialize, Debug)]
pub struct LeakJson {
    pub allocation_number: u64,
    pub address: String,
    pub size: usize,
    pub kind: String,
    pub allocator: &'static str,
    pub file: Option<&'static str>,
    pub line: Option<u32>,
}

impl LeakContext {
    /// Snapshot of the live records with a period tag at or after `since`.
    pub fn leaks_json(&self, since: Option<Period>) -> LeakReportJson {
        let detector = self.lock_detector();
        let mut records = detector.leaks_since(since);
        records.sort_by_key(|record| record.allocation_number());

        let leaks: Vec<LeakJson> = records
            .into_iter()
            .map(|record| LeakJson {
                allocation_number: record.allocation_number(),
                address: format!("{:#x}", record.address()),
                size: record.size(),
                kind: record.kind().to_string(),
                allocator: record.allocator().name(),
                file: record.location().map(|location| location.file),
                line: record.location().map(|location| location.line),
            })
            .collect();

        LeakReportJson {
            total_leaks: leaks.len(),
            leaks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_leak_fields() {
        let context = LeakContext::new();
        let checking = context.mark_current_period();
        let ptr = context
            .allocate_scalar_at(10, "file.cpp", 42)
            .expect("allocation failed");

        let snapshot = context.leaks_json(Some(checking));
        assert_eq!(snapshot.total_leaks, 1);

        let json = serde_json::to_string(&snapshot).expect("serialization failed");
        for expected in ["\"size\":10", "\"file\":\"file.cpp\"", "\"line\":42", "\"kind\":\"scalar\""] {
            assert!(json.contains(expected), "Expected:\n{expected}\n\nGot:\n{json}");
        }

        unsafe { context.deallocate_scalar(ptr.as_ptr()) };
        assert_eq!(context.leaks_json(Some(checking)).total_leaks, 0);
    }
}
