//! Domain model for heapscope
//!
//! Core data types shared by the capture, store, analysis and export
//! layers, plus the structured error types.

pub mod errors;
pub mod types;

pub use errors::{CaptureError, ExportError, StoreError};
pub use types::{format_bytes, AllocationEvent, QueryResult, TimelinePoint, FREED_ADDRESS, MAX_STACK_DEPTH};
