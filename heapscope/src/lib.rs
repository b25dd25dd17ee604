//! # heapscope - Process-Local Heap Allocation Tracer
//!
//! heapscope links into a target program, intercepts every dynamic heap
//! allocation and deallocation, records a structured event per operation
//! (address, size, timestamp, thread, call-site symbols), and answers
//! analytical queries afterwards: per-function and per-file totals,
//! size-distribution histograms, allocation timelines and still-live
//! (leaked) allocations.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     User Application                     │
//! └──────────────────────────┬───────────────────────────────┘
//!                            │ malloc / free / realloc,
//!                            │ GlobalAlloc calls
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  capture::interposer   (delegates to the real allocator, │
//! │                         reentrancy-guarded notification) │
//! └──────────────────────────┬───────────────────────────────┘
//!                            │ raw (op, address, size)
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  capture (recorder)    timestamp, thread id, stack walk, │
//! │                        symbolication, buffered log       │
//! └──────────────────────────┬───────────────────────────────┘
//!                            │ AllocationEvent batches
//!              ┌─────────────┴─────────────┐
//!              ▼                           ▼
//! ┌─────────────────────────┐  ┌─────────────────────────┐
//! │  store (EventStore)     │  │  analysis (MemoryStats) │
//! │  log + indices +        │  │  rollups, histograms,   │
//! │  liveness + queries     │  │  hotspots, report       │
//! └────────────┬────────────┘  └────────────┬────────────┘
//!              │                            │
//!              ▼                            ▼
//! ┌─────────────────────────┐  ┌─────────────────────────┐
//! │  export (JSON)          │  │  chart (ASCII renderer) │
//! └─────────────────────────┘  └─────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`capture`]: allocator interposition and event recording
//!   - `interposer`: [`GlobalAlloc`](std::alloc::GlobalAlloc) wrapper plus
//!     C-ABI `malloc`/`free`/`realloc` hooks resolved with
//!     `dlsym(RTLD_NEXT, ..)` (exported for `LD_PRELOAD` by the
//!     `heapscope-preload` crate)
//!   - recorder: per-thread reentrancy guard, monotonic timestamps,
//!     bounded stack walks, liveness pairing
//! - [`store`]: canonical event log with function/file/time indices,
//!   leak enumeration, capacity eviction and timeline binning
//! - [`analysis`]: incremental statistics (per-function, per-file, size
//!   buckets, call-stack frequency) and the text report
//! - [`chart`]: ASCII charts over the statistics, realtime dashboard
//! - [`export`]: JSON persistence (allocations, timeline, summary)
//! - [`logging`]: `log` + `env_logger` setup
//! - [`domain`]: event and error types
//! - [`cli`]: argument parsing for the demo binary
//!
//! ## Typical Usage
//!
//! ```no_run
//! use heapscope::capture::{Capture, TraceAllocator};
//! use heapscope::{analysis::MemoryStats, store::EventStore};
//!
//! #[global_allocator]
//! static ALLOC: TraceAllocator = TraceAllocator::system();
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = EventStore::initialize("./heapscope-data")?;
//!     let stats = MemoryStats::new();
//!
//!     let capture = Capture::initialize()?;
//!     capture.start();
//!     // ... workload ...
//!     capture.stop();
//!
//!     let events = capture.get_allocations();
//!     store.add_batch(events.clone());
//!     stats.add_batch(&events);
//!
//!     println!("{}", stats.generate_report());
//!     println!("{} leaked allocations", store.get_leaks().len());
//!
//!     capture.shutdown();
//!     store.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Key Concepts
//!
//! - **Interposer**: replaces the process's allocator entry points so
//!   every call is observed, then delegates to the real allocator.
//! - **Reentrancy guard**: per-thread flag keeping tracer-internal
//!   allocations (symbolication, the store itself) out of the trace,
//!   which would otherwise recurse forever.
//! - **Liveness map**: address-keyed map of allocations not yet matched
//!   by a deallocation; the basis for leak reporting.
//! - **Call stack key**: innermost five frames joined with `" <- "`,
//!   used to group allocation sites for frequency analysis.

pub mod analysis;
pub mod capture;
pub mod chart;
pub mod cli;
pub mod domain;
pub mod export;
pub mod logging;
pub mod store;

pub use analysis::MemoryStats;
pub use capture::{Capture, TraceAllocator};
pub use domain::{AllocationEvent, QueryResult, TimelinePoint};
pub use store::EventStore;
