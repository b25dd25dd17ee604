//! Indexed allocation event store
//!
//! Canonical repository of [`AllocationEvent`]s with secondary indices
//! (by function, by file, by time), a liveness map for leak enumeration,
//! and a capacity bound with oldest-first eviction.
//!
//! # Positions
//!
//! Log entries are addressed by absolute sequence numbers handed out on
//! insert. The log itself is a `VecDeque` plus a base offset, so evicting
//! the oldest entry never shifts the positions of the survivors and the
//! index vectors stay valid without rewrites.
//!
//! # Liveness
//!
//! The liveness map is last-writer-wins on the address: an entry counts
//! as live only while its address field is not the freed sentinel *and*
//! the map still points at its position. An allocation whose address was
//! later reused (realloc churn) therefore drops out of the live set even
//! though its record was never marked freed.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{info, warn};

use crate::domain::{AllocationEvent, QueryResult, StoreError, TimelinePoint};
use crate::export;

/// Default capacity bound of the event log.
pub const DEFAULT_MAX_ALLOCATIONS: usize = 1_000_000;

/// File name used by [`EventStore::shutdown`] inside the data directory.
pub const PERSIST_FILE_NAME: &str = "allocations.json";

// Eviction warnings are rate limited to one per this many drops.
const EVICTION_WARN_EVERY: u64 = 10_000;

#[derive(Default)]
struct StoreInner {
    log: VecDeque<AllocationEvent>,
    /// Sequence number of `log.front()`.
    base: u64,
    by_function: HashMap<String, Vec<u64>>,
    by_file: HashMap<String, Vec<u64>>,
    /// `(timestamp, position)` kept nondecreasing by timestamp, ties in
    /// insertion order. Events arrive nearly in order, so sorted insertion
    /// from the back is effectively O(1).
    by_time: Vec<(u64, u64)>,
    /// address -> position of the most recent unmatched allocation there.
    live: HashMap<u64, u64>,
    max_allocations: usize,
    evictions: u64,
}

impl StoreInner {
    fn new() -> Self {
        Self { max_allocations: DEFAULT_MAX_ALLOCATIONS, ..Self::default() }
    }

    fn event_at(&self, seq: u64) -> Option<&AllocationEvent> {
        seq.checked_sub(self.base).and_then(|idx| self.log.get(idx as usize))
    }

    fn is_live(&self, seq: u64, event: &AllocationEvent) -> bool {
        !event.is_freed() && self.live.get(&event.address) == Some(&seq)
    }

    fn push(&mut self, event: AllocationEvent) {
        while self.log.len() >= self.max_allocations {
            self.evict_oldest();
        }

        let seq = self.base + self.log.len() as u64;

        self.by_function.entry(event.function.clone()).or_default().push(seq);
        self.by_file.entry(event.file.clone()).or_default().push(seq);

        let at = self.by_time.partition_point(|&(t, _)| t <= event.timestamp);
        self.by_time.insert(at, (event.timestamp, seq));

        if !event.is_freed() {
            self.live.insert(event.address, seq);
        }

        self.log.push_back(event);
    }

    fn evict_oldest(&mut self) {
        let Some(event) = self.log.pop_front() else { return };
        let seq = self.base;
        self.base += 1;

        // The evicted entry is the globally oldest, so its position sits at
        // the front of both per-name index vectors.
        remove_index_entry(&mut self.by_function, &event.function, seq);
        remove_index_entry(&mut self.by_file, &event.file, seq);

        let from = self.by_time.partition_point(|&(t, _)| t < event.timestamp);
        if let Some(offset) = self.by_time[from..].iter().position(|&(_, s)| s == seq) {
            self.by_time.remove(from + offset);
        }

        if self.live.get(&event.address) == Some(&seq) {
            self.live.remove(&event.address);
        }

        self.evictions += 1;
        if self.evictions == 1 || self.evictions % EVICTION_WARN_EVERY == 0 {
            warn!(
                "event log full ({} entries), dropped {} oldest record(s)",
                self.max_allocations, self.evictions
            );
        }
    }

    fn clear(&mut self) {
        self.log.clear();
        self.base = 0;
        self.by_function.clear();
        self.by_file.clear();
        self.by_time.clear();
        self.live.clear();
        self.evictions = 0;
    }
}

fn remove_index_entry(index: &mut HashMap<String, Vec<u64>>, key: &str, seq: u64) {
    if let Some(positions) = index.get_mut(key) {
        if let Some(at) = positions.iter().position(|&s| s == seq) {
            positions.remove(at);
        }
        if positions.is_empty() {
            index.remove(key);
        }
    }
}

/// Thread-safe indexed event store.
///
/// All multi-field state sits behind one coarse mutex; critical sections
/// are bounded by the index updates of a single event.
pub struct EventStore {
    inner: Mutex<StoreInner>,
    data_dir: Option<PathBuf>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create an in-memory store with no persistence directory.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Mutex::new(StoreInner::new()), data_dir: None }
    }

    /// Create a store that persists to `data_dir` on [`shutdown`].
    ///
    /// The directory is created if missing.
    ///
    /// [`shutdown`]: EventStore::shutdown
    pub fn initialize(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)
            .map_err(|source| StoreError::DataDir { path: data_dir.clone(), source })?;
        info!("event store initialized, data directory: {}", data_dir.display());
        Ok(Self { inner: Mutex::new(StoreInner::new()), data_dir: Some(data_dir) })
    }

    /// Persist the log to `<data_dir>/allocations.json` and drop all state.
    pub fn shutdown(&self) -> Result<(), StoreError> {
        let data_dir = self.data_dir.as_ref().ok_or(StoreError::NoDataDir)?;
        let path = data_dir.join(PERSIST_FILE_NAME);
        self.export_json(&path)?;
        self.clear();
        info!("event store shut down, log persisted to {}", path.display());
        Ok(())
    }

    fn locked(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one event, updating all indices and the liveness map.
    ///
    /// Exceeding the capacity bound evicts the oldest entry first.
    pub fn add(&self, event: AllocationEvent) {
        self.locked().push(event);
    }

    /// Append a sequence of events; equivalent to repeated [`add`](EventStore::add).
    pub fn add_batch<I>(&self, events: I)
    where
        I: IntoIterator<Item = AllocationEvent>,
    {
        let mut inner = self.locked();
        for event in events {
            inner.push(event);
        }
    }

    /// Number of entries currently in the log (live and freed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.locked().log.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locked().log.is_empty()
    }

    /// All live events whose function matches `name`, oldest first.
    #[must_use]
    pub fn query_by_function(&self, name: &str) -> QueryResult {
        let inner = self.locked();
        let mut result = QueryResult::default();
        if let Some(positions) = inner.by_function.get(name) {
            for &seq in positions {
                if let Some(event) = inner.event_at(seq) {
                    if inner.is_live(seq, event) {
                        result.push(event.clone(), true);
                    }
                }
            }
        }
        result
    }

    /// All live events whose file matches `path`, oldest first.
    #[must_use]
    pub fn query_by_file(&self, path: &str) -> QueryResult {
        let inner = self.locked();
        let mut result = QueryResult::default();
        if let Some(positions) = inner.by_file.get(path) {
            for &seq in positions {
                if let Some(event) = inner.event_at(seq) {
                    if inner.is_live(seq, event) {
                        result.push(event.clone(), true);
                    }
                }
            }
        }
        result
    }

    /// All live events with `min_size <= size <= max_size`, oldest first.
    #[must_use]
    pub fn query_by_size_range(&self, min_size: u64, max_size: u64) -> QueryResult {
        let inner = self.locked();
        let mut result = QueryResult::default();
        for (idx, event) in inner.log.iter().enumerate() {
            let seq = inner.base + idx as u64;
            if inner.is_live(seq, event) && event.size >= min_size && event.size <= max_size {
                result.push(event.clone(), true);
            }
        }
        result
    }

    /// All events with `start <= timestamp <= end`, in timestamp order.
    ///
    /// Freed entries contribute to the count but not to `total_size`.
    #[must_use]
    pub fn query_by_time_range(&self, start: u64, end: u64) -> QueryResult {
        let inner = self.locked();
        let mut result = QueryResult::default();
        let lo = inner.by_time.partition_point(|&(t, _)| t < start);
        let hi = inner.by_time.partition_point(|&(t, _)| t <= end);
        for &(_, seq) in &inner.by_time[lo..hi] {
            if let Some(event) = inner.event_at(seq) {
                let live = inner.is_live(seq, event);
                result.push(event.clone(), live);
            }
        }
        result
    }

    /// Snapshot of every allocation not yet matched by a deallocation.
    #[must_use]
    pub fn get_leaks(&self) -> Vec<AllocationEvent> {
        let inner = self.locked();
        inner
            .log
            .iter()
            .enumerate()
            .filter(|(idx, event)| inner.is_live(inner.base + *idx as u64, event))
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Live memory binned over time.
    ///
    /// Bin keys are `min_ts + floor((ts - min_ts) / bucket) * bucket` where
    /// `min_ts` is the smallest timestamp in the log; only live entries
    /// accumulate usage. Returned in ascending timestamp order.
    #[must_use]
    pub fn get_allocation_timeline(&self, bucket_ns: u64) -> Vec<TimelinePoint> {
        let inner = self.locked();
        if inner.log.is_empty() {
            return Vec::new();
        }
        let bucket_ns = bucket_ns.max(1);
        let min_ts = inner.log.iter().map(|e| e.timestamp).min().unwrap_or(0);

        let mut bins: BTreeMap<u64, u64> = BTreeMap::new();
        for (idx, event) in inner.log.iter().enumerate() {
            let seq = inner.base + idx as u64;
            if inner.is_live(seq, event) {
                let key = min_ts + (event.timestamp - min_ts) / bucket_ns * bucket_ns;
                *bins.entry(key).or_insert(0) += event.size;
            }
        }

        bins.into_iter()
            .map(|(timestamp, memory_usage)| TimelinePoint { timestamp, memory_usage })
            .collect()
    }

    /// Change the capacity bound, retroactively evicting oldest entries
    /// if the log already exceeds it.
    pub fn set_max_allocations(&self, max_allocations: usize) {
        let mut inner = self.locked();
        inner.max_allocations = max_allocations.max(1);
        while inner.log.len() > inner.max_allocations {
            inner.evict_oldest();
        }
    }

    /// Drop the log, all indices and the liveness map.
    pub fn clear(&self) {
        self.locked().clear();
    }

    /// Clone of the full log, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AllocationEvent> {
        self.locked().log.iter().cloned().collect()
    }

    /// Aggregate summary of the stored log as a JSON object: total count,
    /// unique functions, the data directory, and per-function
    /// `{count, total_size}` over all entries including freed ones.
    #[must_use]
    pub fn summary(&self) -> serde_json::Value {
        let inner = self.locked();
        let mut by_function = serde_json::Map::new();
        for (function, positions) in &inner.by_function {
            let mut count = 0u64;
            let mut total_size = 0u64;
            for &seq in positions {
                if let Some(event) = inner.event_at(seq) {
                    count += 1;
                    total_size += event.size;
                }
            }
            by_function.insert(
                function.clone(),
                serde_json::json!({ "count": count, "total_size": total_size }),
            );
        }

        serde_json::json!({
            "total_allocations": inner.log.len(),
            "unique_functions": inner.by_function.len(),
            "data_dir": self.data_dir.as_deref().unwrap_or(Path::new("")).display().to_string(),
            "by_function": by_function,
        })
    }

    /// Write the full log to `path` in the persistence JSON format.
    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let events = self.snapshot();
        export::write_events_file(path.as_ref(), &events).map_err(StoreError::from)?;
        info!("exported {} allocations to {}", events.len(), path.as_ref().display());
        Ok(())
    }

    /// Append events from a persistence JSON file.
    ///
    /// The file is parsed in full before anything is inserted, so the
    /// store is untouched on error.
    pub fn import_json(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let events = export::read_events_file(path.as_ref()).map_err(StoreError::from)?;
        let count = events.len();
        self.add_batch(events);
        info!("imported {} allocations from {}", count, path.as_ref().display());
        Ok(())
    }
}
