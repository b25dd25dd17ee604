//! Allocation statistics aggregation
//!
//! [`MemoryStats`] maintains derived statistics incrementally as events
//! stream in: per-function and per-file rollups, a size-distribution
//! histogram over fixed buckets, call-stack frequencies and process
//! totals. Updates are O(1) amortized per event; the ranked views sort on
//! demand.
//!
//! The aggregator is independent of the store's capacity bound: totals
//! keep counting even after the store has evicted the underlying records.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::{format_bytes, AllocationEvent};

/// Half-open `[min, max)` bucket boundaries of the size histogram; the
/// final bucket extends to infinity.
pub const SIZE_BUCKET_BOUNDS: [(u64, u64); 11] = [
    (0, 16),
    (16, 32),
    (32, 64),
    (64, 128),
    (128, 256),
    (256, 512),
    (512, 1024),
    (1024, 4096),
    (4096, 16384),
    (16384, 65536),
    (65536, u64::MAX),
];

// Call-stack grouping keys use the innermost frames only.
const STACK_KEY_DEPTH: usize = 5;
const STACK_KEY_SEPARATOR: &str = " <- ";

/// Aggregated statistics for one function.
#[derive(Debug, Clone, Default)]
pub struct FunctionStats {
    pub function_name: String,
    pub allocation_count: u64,
    /// Sum of sizes over every allocation, freed or not.
    pub total_allocated: u64,
    /// Sum of sizes over allocations not yet freed.
    pub current_allocated: u64,
    /// Largest single allocation seen (not a residency high-water mark).
    pub peak_allocated: u64,
    pub avg_size: f64,
    /// Exact size -> occurrence count, folded into buckets on demand.
    pub size_distribution: HashMap<u64, u64>,
}

/// Aggregated statistics for one source file.
#[derive(Debug, Clone, Default)]
pub struct FileStats {
    pub file_path: String,
    pub allocation_count: u64,
    pub total_allocated: u64,
    /// Per-function allocation counts within this file.
    pub function_counts: HashMap<String, u64>,
}

/// One bin of the size-distribution histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBucket {
    pub min_size: u64,
    /// Exclusive upper bound; `u64::MAX` marks the unbounded bucket.
    pub max_size: u64,
    pub count: u64,
    pub total_size: u64,
}

struct TrackedAllocation {
    function: String,
    size: u64,
}

#[derive(Default)]
struct StatsInner {
    functions: HashMap<String, FunctionStats>,
    files: HashMap<String, FileStats>,
    call_stacks: HashMap<String, u64>,
    /// address -> allocation info, for the deallocation rollback path.
    tracking: HashMap<u64, TrackedAllocation>,
    total_allocations: u64,
    total_memory_allocated: u64,
}

/// Thread-safe incremental aggregator over allocation events.
#[derive(Default)]
pub struct MemoryStats {
    inner: Mutex<StatsInner>,
}

impl MemoryStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, StatsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Roll one event into every aggregate.
    ///
    /// Events already marked freed (a snapshot taken after the matching
    /// deallocation) count toward totals and distributions but not toward
    /// `current_allocated`, and are not tracked for later rollback.
    pub fn add(&self, event: &AllocationEvent) {
        let mut inner = self.locked();

        let func = inner.functions.entry(event.function.clone()).or_default();
        if func.function_name.is_empty() {
            func.function_name = event.function.clone();
        }
        func.allocation_count += 1;
        func.total_allocated += event.size;
        if !event.is_freed() {
            func.current_allocated += event.size;
        }
        func.peak_allocated = func.peak_allocated.max(event.size);
        func.avg_size = func.total_allocated as f64 / func.allocation_count as f64;
        *func.size_distribution.entry(event.size).or_insert(0) += 1;

        let file = inner.files.entry(event.file.clone()).or_default();
        if file.file_path.is_empty() {
            file.file_path = event.file.clone();
        }
        file.allocation_count += 1;
        file.total_allocated += event.size;
        *file.function_counts.entry(event.function.clone()).or_insert(0) += 1;

        let stack_key = build_stack_key(&event.stack_trace);
        *inner.call_stacks.entry(stack_key).or_insert(0) += 1;

        inner.total_allocations += 1;
        inner.total_memory_allocated += event.size;

        if !event.is_freed() {
            inner.tracking.insert(
                event.address,
                TrackedAllocation { function: event.function.clone(), size: event.size },
            );
        }
    }

    /// Roll a batch of events; equivalent to repeated [`add`](MemoryStats::add).
    pub fn add_batch(&self, events: &[AllocationEvent]) {
        for event in events {
            self.add(event);
        }
    }

    /// Roll back `current_allocated` for the function that allocated
    /// `address`, saturating at zero. Unknown addresses are ignored.
    pub fn record_deallocation(&self, address: u64) {
        let mut inner = self.locked();
        if let Some(tracked) = inner.tracking.remove(&address) {
            if let Some(func) = inner.functions.get_mut(&tracked.function) {
                func.current_allocated = func.current_allocated.saturating_sub(tracked.size);
            }
        }
    }

    /// Per-function records sorted by `total_allocated` descending,
    /// truncated to `limit` when `limit > 0`.
    #[must_use]
    pub fn get_function_stats(&self, limit: usize) -> Vec<FunctionStats> {
        let inner = self.locked();
        let mut result: Vec<FunctionStats> = inner.functions.values().cloned().collect();
        result.sort_unstable_by(|a, b| b.total_allocated.cmp(&a.total_allocated));
        if limit > 0 {
            result.truncate(limit);
        }
        result
    }

    /// Record for a single function, if any allocation was seen there.
    #[must_use]
    pub fn get_function(&self, function_name: &str) -> Option<FunctionStats> {
        self.locked().functions.get(function_name).cloned()
    }

    /// Per-file records sorted by `total_allocated` descending,
    /// truncated to `limit` when `limit > 0`.
    #[must_use]
    pub fn get_file_stats(&self, limit: usize) -> Vec<FileStats> {
        let inner = self.locked();
        let mut result: Vec<FileStats> = inner.files.values().cloned().collect();
        result.sort_unstable_by(|a, b| b.total_allocated.cmp(&a.total_allocated));
        if limit > 0 {
            result.truncate(limit);
        }
        result
    }

    /// Fold the per-function size distributions into the fixed buckets.
    ///
    /// Empty buckets are elided; ordering is ascending `min_size`.
    #[must_use]
    pub fn get_size_distribution_stats(&self) -> Vec<SizeBucket> {
        let inner = self.locked();
        let mut buckets: Vec<SizeBucket> = SIZE_BUCKET_BOUNDS
            .iter()
            .map(|&(min_size, max_size)| SizeBucket { min_size, max_size, count: 0, total_size: 0 })
            .collect();

        for func in inner.functions.values() {
            for (&size, &count) in &func.size_distribution {
                if let Some(bucket) =
                    buckets.iter_mut().find(|b| size >= b.min_size && size < b.max_size)
                {
                    bucket.count += count;
                    bucket.total_size += size * count;
                }
            }
        }

        buckets.retain(|b| b.count > 0);
        buckets
    }

    /// Function names ranked by `total_allocated` descending, top `limit`.
    #[must_use]
    pub fn get_memory_hotspots(&self, limit: usize) -> Vec<(String, u64)> {
        let mut hotspots: Vec<(String, u64)> = self
            .get_function_stats(0)
            .into_iter()
            .map(|stats| (stats.function_name, stats.total_allocated))
            .collect();
        hotspots.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        if limit > 0 {
            hotspots.truncate(limit);
        }
        hotspots
    }

    /// Raw call-stack key -> occurrence count map.
    #[must_use]
    pub fn get_call_stack_stats(&self) -> HashMap<String, u64> {
        self.locked().call_stacks.clone()
    }

    /// Number of events rolled in, independent of store capacity.
    #[must_use]
    pub fn total_allocations(&self) -> u64 {
        self.locked().total_allocations
    }

    /// Sum of sizes over every event rolled in.
    #[must_use]
    pub fn total_memory_allocated(&self) -> u64 {
        self.locked().total_memory_allocated
    }

    /// Human-readable report: totals, top 10 functions, size distribution.
    #[must_use]
    pub fn generate_report(&self) -> String {
        let (total_allocations, total_memory, unique_functions, unique_files) = {
            let inner = self.locked();
            (
                inner.total_allocations,
                inner.total_memory_allocated,
                inner.functions.len(),
                inner.files.len(),
            )
        };

        let mut out = String::new();
        out.push_str("======================================\n");
        out.push_str("       Memory Allocation Report\n");
        out.push_str("======================================\n\n");

        let _ = writeln!(out, "Total Allocations: {}", total_allocations);
        let _ = writeln!(out, "Total Memory Allocated: {}", format_bytes(total_memory));
        let _ = writeln!(out, "Unique Functions: {}", unique_functions);
        let _ = writeln!(out, "Unique Files: {}", unique_files);
        out.push('\n');

        out.push_str("--- Top 10 Functions by Allocation Size ---\n");
        for (rank, stats) in self.get_function_stats(10).iter().enumerate() {
            let _ = writeln!(out, "{}. {}", rank + 1, stats.function_name);
            let _ = writeln!(out, "   Allocations: {}", stats.allocation_count);
            let _ = writeln!(out, "   Total: {}", format_bytes(stats.total_allocated));
            let _ = writeln!(out, "   Current: {}", format_bytes(stats.current_allocated));
            let _ = writeln!(out, "   Avg: {}", format_bytes(stats.avg_size as u64));
        }

        out.push_str("\n--- Size Distribution ---\n");
        for bucket in self.get_size_distribution_stats() {
            let upper = if bucket.max_size == u64::MAX {
                "inf".to_string()
            } else {
                format_bytes(bucket.max_size)
            };
            let _ = writeln!(
                out,
                "[{}, {}): {} allocs, {}",
                format_bytes(bucket.min_size),
                upper,
                bucket.count,
                format_bytes(bucket.total_size)
            );
        }

        out.push_str("\n======================================\n");
        out
    }

    /// Short totals block used by the realtime dashboard.
    #[must_use]
    pub fn summary_text(&self) -> String {
        let inner = self.locked();
        format!(
            "Total allocations: {}\nTotal memory: {}\nFunctions: {}\n",
            inner.total_allocations,
            format_bytes(inner.total_memory_allocated),
            inner.functions.len()
        )
    }

    /// Drop every aggregate and counter.
    pub fn reset(&self) {
        *self.locked() = StatsInner::default();
    }
}

/// Canonical grouping key: the innermost five frames joined with `" <- "`.
fn build_stack_key(stack_trace: &[String]) -> String {
    stack_trace
        .iter()
        .take(STACK_KEY_DEPTH)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(STACK_KEY_SEPARATOR)
}
