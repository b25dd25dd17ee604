//! Core allocation record types
//!
//! `AllocationEvent` is the atomic record produced by the recorder and
//! consumed by the store, the aggregator and the JSON persistence layer.
//! Field names match the on-disk JSON format, so the serde derives are
//! the single source of truth for persistence.

use serde::{Deserialize, Serialize};

/// Sentinel address written into an event once its allocation has been
/// matched by a deallocation.
pub const FREED_ADDRESS: u64 = 0;

/// Maximum number of stack frames captured per allocation.
pub const MAX_STACK_DEPTH: usize = 32;

/// One observed heap allocation.
///
/// The address is the pointer value at allocation time and is rewritten
/// to [`FREED_ADDRESS`] when the matching deallocation is observed, so a
/// snapshot of the event log doubles as a liveness record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEvent {
    /// Monotonic nanoseconds since the tracer's epoch, nondecreasing per thread.
    pub timestamp: u64,
    /// Pointer value, or [`FREED_ADDRESS`] once freed.
    pub address: u64,
    /// Requested size in bytes (0 is legal).
    pub size: u64,
    /// Resolved symbol of the allocating call site, or `"unknown"`.
    pub function: String,
    /// Source file if a hint supplied it, else `"unknown"`.
    pub file: String,
    /// Source line if a hint supplied it, else 0.
    pub line: i32,
    /// Stable 32-bit hash of the allocating OS thread's identifier.
    pub thread_id: u32,
    /// Resolved symbol names, innermost frame first, at most
    /// [`MAX_STACK_DEPTH`] entries; frames that resolve to nothing are elided.
    pub stack_trace: Vec<String>,
}

impl AllocationEvent {
    /// True once the matching deallocation has been observed.
    #[must_use]
    pub fn is_freed(&self) -> bool {
        self.address == FREED_ADDRESS
    }
}

/// Result of an indexed store query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Matching events, oldest first.
    pub allocations: Vec<AllocationEvent>,
    /// Number of matching events.
    pub total_count: usize,
    /// Sum of sizes of the matching *live* events.
    pub total_size: u64,
    /// Largest single allocation size within the result set.
    ///
    /// Not a residency peak; see the store documentation.
    pub peak_usage: u64,
}

impl QueryResult {
    pub(crate) fn push(&mut self, event: AllocationEvent, count_size: bool) {
        self.total_count += 1;
        if count_size {
            self.total_size += event.size;
        }
        self.peak_usage = self.peak_usage.max(event.size);
        self.allocations.push(event);
    }
}

/// One bin of the allocation timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelinePoint {
    /// Bin key: `min_ts + floor((ts - min_ts) / bucket) * bucket`.
    pub timestamp: u64,
    /// Bytes live within the bin.
    pub memory_usage: u64,
}

/// Format a byte count with binary-prefix units and two decimals.
///
/// Divides by 1024 until the value drops below 1024 or the unit cap
/// (`TB`) is reached.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
    }

    #[test]
    fn test_format_bytes_caps_at_terabytes() {
        let huge = 1024u64.pow(5) * 3;
        assert_eq!(format_bytes(huge), "3072.00 TB");
    }

    #[test]
    fn test_freed_flag() {
        let mut event = AllocationEvent {
            timestamp: 1,
            address: 0xdead_beef,
            size: 64,
            function: "f".to_string(),
            file: "unknown".to_string(),
            line: 0,
            thread_id: 7,
            stack_trace: vec![],
        };
        assert!(!event.is_freed());
        event.address = FREED_ADDRESS;
        assert!(event.is_freed());
    }

    #[test]
    fn test_query_result_counts_live_sizes_only() {
        let event = |size, addr| AllocationEvent {
            timestamp: 0,
            address: addr,
            size,
            function: "f".to_string(),
            file: "unknown".to_string(),
            line: 0,
            thread_id: 0,
            stack_trace: vec![],
        };

        let mut result = QueryResult::default();
        result.push(event(100, 0x10), true);
        result.push(event(40, FREED_ADDRESS), false);

        assert_eq!(result.total_count, 2);
        assert_eq!(result.total_size, 100);
        assert_eq!(result.peak_usage, 100);
    }
}
