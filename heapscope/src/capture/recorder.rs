//! Event construction and the per-thread reentrancy guard
//!
//! Everything the recorder does on behalf of an intercepted allocation
//! (timestamping, thread-id hashing, stack walking, symbolication, the
//! buffer append) itself allocates, so the whole path runs under a
//! thread-local "inside tracer" flag. An allocation arriving while the
//! flag is set passes through untracked, which is what breaks the
//! otherwise infinite recursion.

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::ffi::c_void;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use std::time::Instant;

use crate::domain::{AllocationEvent, FREED_ADDRESS};

thread_local! {
    // Const-initialized so first access performs no allocation.
    static IN_TRACER: Cell<bool> = const { Cell::new(false) };
}

/// RAII guard over the per-thread reentrancy flag.
///
/// `enter` returns `None` when the current thread is already inside the
/// tracer, or when thread-local storage is unavailable (thread teardown).
pub(crate) struct ReentrancyGuard(());

impl ReentrancyGuard {
    pub(crate) fn enter() -> Option<Self> {
        IN_TRACER
            .try_with(|flag| {
                if flag.get() {
                    None
                } else {
                    flag.set(true);
                    Some(ReentrancyGuard(()))
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        let _ = IN_TRACER.try_with(|flag| flag.set(false));
    }
}

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Pin the timestamp epoch; called once at capture initialization so the
/// anchor is not lazily created inside an intercepted allocation.
pub(crate) fn anchor_epoch() {
    let _ = EPOCH.get_or_init(Instant::now);
}

/// Monotonic nanoseconds since the tracer's epoch.
pub(crate) fn now_ns() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Stable 32-bit hash of the calling OS thread's identifier.
pub(crate) fn thread_id_hash() -> u32 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as u32
}

/// Walk the call stack up to `max_frames` frames and resolve each to a
/// demangled symbol name, innermost first. Frames that resolve to nothing
/// are elided.
pub(crate) fn capture_stack(max_frames: usize) -> Vec<String> {
    let mut ips: Vec<*mut c_void> = Vec::with_capacity(max_frames);
    backtrace::trace(|frame| {
        ips.push(frame.ip());
        ips.len() < max_frames
    });

    let mut frames = Vec::with_capacity(ips.len());
    for ip in ips {
        let mut resolved: Option<String> = None;
        backtrace::resolve(ip, |symbol| {
            if resolved.is_none() {
                if let Some(name) = symbol.name() {
                    if let Some(raw) = name.as_str() {
                        resolved = Some(format!("{:#}", rustc_demangle::demangle(raw)));
                    }
                }
            }
        });
        if let Some(name) = resolved {
            if !name.is_empty() {
                frames.push(name);
            }
        }
    }
    frames
}

/// The capture session's event buffer: an append-only log plus the
/// liveness map used to pair deallocations with their allocations.
#[derive(Default)]
pub(crate) struct CaptureBuffer {
    events: Vec<AllocationEvent>,
    live: HashMap<u64, usize>,
}

impl CaptureBuffer {
    pub(crate) fn push(&mut self, event: AllocationEvent) {
        if !event.is_freed() {
            // Last writer wins on address reuse.
            self.live.insert(event.address, self.events.len());
        }
        self.events.push(event);
    }

    /// Mark the most recent unmatched allocation at `address` freed.
    /// Unknown addresses (double free, foreign free) are ignored.
    pub(crate) fn mark_freed(&mut self, address: u64) -> bool {
        match self.live.remove(&address) {
            Some(index) => {
                if let Some(event) = self.events.get_mut(index) {
                    event.address = FREED_ADDRESS;
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<AllocationEvent> {
        self.events.clone()
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
        self.live.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(addr: u64, size: u64) -> AllocationEvent {
        AllocationEvent {
            timestamp: 0,
            address: addr,
            size,
            function: "f".to_string(),
            file: "unknown".to_string(),
            line: 0,
            thread_id: 0,
            stack_trace: vec![],
        }
    }

    #[test]
    fn test_reentrancy_guard_blocks_nested_entry() {
        let outer = ReentrancyGuard::enter();
        assert!(outer.is_some());
        assert!(ReentrancyGuard::enter().is_none());
        drop(outer);
        assert!(ReentrancyGuard::enter().is_some());
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_thread_id_hash_is_stable_per_thread() {
        assert_eq!(thread_id_hash(), thread_id_hash());
        let other = std::thread::spawn(thread_id_hash).join().unwrap();
        // Distinct threads hash to distinct values in practice; at minimum
        // the hash must be stable, which the spawn round-trip exercises.
        let _ = other;
    }

    #[test]
    fn test_capture_stack_is_bounded_and_has_no_empty_frames() {
        let frames = capture_stack(32);
        assert!(frames.len() <= 32);
        assert!(frames.iter().all(|f| !f.is_empty()));
    }

    #[test]
    fn test_buffer_pairs_allocation_and_free() {
        let mut buffer = CaptureBuffer::default();
        buffer.push(event(0x10, 64));
        assert!(buffer.mark_freed(0x10));
        assert!(buffer.snapshot()[0].is_freed());
        // Double free of the same address is a no-op.
        assert!(!buffer.mark_freed(0x10));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_buffer_address_reuse_frees_latest() {
        let mut buffer = CaptureBuffer::default();
        buffer.push(event(0x20, 8));
        buffer.push(event(0x20, 16));
        assert!(buffer.mark_freed(0x20));
        let events = buffer.snapshot();
        assert!(!events[0].is_freed());
        assert!(events[1].is_freed());
    }
}
