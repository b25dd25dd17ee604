//! Allocation capture session
//!
//! [`Capture`] is the process-wide tracing session: it owns the buffered
//! event log the recorder appends into, the capture-active flag the
//! interposer consults, and the optional allocation-notification
//! callback. The handle is published once through an atomic one-shot so
//! the interposer's hot path is a flag load plus a pointer read, and so
//! no hidden global constructor allocates underneath the interposer.

pub mod interposer;
mod recorder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use log::info;

use crate::domain::{AllocationEvent, CaptureError, FREED_ADDRESS, MAX_STACK_DEPTH};
use recorder::{CaptureBuffer, ReentrancyGuard};

pub use interposer::TraceAllocator;

/// Best-effort notification fired after each recorded allocation.
pub type AllocationCallback = Box<dyn Fn(&AllocationEvent) + Send + Sync>;

static CAPTURING: AtomicBool = AtomicBool::new(false);
static GLOBAL_CAPTURE: OnceLock<Capture> = OnceLock::new();

/// Handle to the process-wide capture session.
pub struct Capture {
    buffer: Mutex<CaptureBuffer>,
    callback: Mutex<Option<AllocationCallback>>,
}

impl Capture {
    fn new() -> Self {
        Self { buffer: Mutex::new(CaptureBuffer::default()), callback: Mutex::new(None) }
    }

    /// Publish the global session and resolve the underlying allocator's
    /// entry points for the C-ABI hooks.
    ///
    /// Idempotent: a second call returns the existing handle. On
    /// platforms without next-in-chain symbol lookup this fails with
    /// [`CaptureError::HookUnsupported`]; the [`TraceAllocator`] hook
    /// mechanism does not depend on that resolution and keeps working.
    pub fn initialize() -> Result<&'static Capture, CaptureError> {
        recorder::anchor_epoch();
        let capture = GLOBAL_CAPTURE.get_or_init(Capture::new);
        interposer::resolve_real_allocator()?;
        info!("memory capture initialized");
        Ok(capture)
    }

    /// The published session, if `initialize` has run.
    #[must_use]
    pub fn global() -> Option<&'static Capture> {
        GLOBAL_CAPTURE.get()
    }

    // Hot-path accessor for the interposer: only hands out the session
    // while capture is active.
    pub(crate) fn active() -> Option<&'static Capture> {
        if CAPTURING.load(Ordering::Relaxed) {
            GLOBAL_CAPTURE.get()
        } else {
            None
        }
    }

    fn buffer_locked(&self) -> MutexGuard<'_, CaptureBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin recording intercepted allocations.
    pub fn start(&self) {
        CAPTURING.store(true, Ordering::SeqCst);
        info!("memory capture started");
    }

    /// Stop recording. Level-triggered: in-flight recordings complete,
    /// subsequent interposer callbacks pass through untracked.
    pub fn stop(&self) {
        CAPTURING.store(false, Ordering::SeqCst);
        info!("memory capture stopped");
    }

    #[must_use]
    pub fn is_capturing(&self) -> bool {
        CAPTURING.load(Ordering::SeqCst)
    }

    /// Stop capturing and drop the buffered log.
    pub fn shutdown(&self) {
        self.stop();
        self.clear();
        info!("memory capture shut down");
    }

    /// Snapshot of the buffered event log, freed markers included.
    ///
    /// Runs under the reentrancy guard: the snapshot itself allocates,
    /// and a traced allocation from under the buffer lock would deadlock.
    #[must_use]
    pub fn get_allocations(&self) -> Vec<AllocationEvent> {
        let _guard = ReentrancyGuard::enter();
        self.buffer_locked().snapshot()
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        let _guard = ReentrancyGuard::enter();
        self.buffer_locked().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the buffered log without stopping capture.
    pub fn clear(&self) {
        let _guard = ReentrancyGuard::enter();
        self.buffer_locked().clear();
    }

    /// Install the allocation-notification callback.
    ///
    /// The callback runs on the allocating thread under the reentrancy
    /// guard, so allocations it performs are not themselves traced.
    pub fn set_allocation_callback<F>(&self, callback: F)
    where
        F: Fn(&AllocationEvent) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = Some(Box::new(callback));
        }
    }

    /// Remove the allocation-notification callback.
    pub fn clear_allocation_callback(&self) {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = None;
        }
    }

    /// Record one allocation.
    ///
    /// Returns silently when capture is inactive or the calling thread is
    /// already inside the tracer. A supplied `function` hint takes
    /// precedence over the innermost resolved stack frame; `file` and
    /// `line` are recorded as `"unknown"` / 0 unless hinted (the runtime
    /// call chain cannot attribute source locations).
    pub fn record_allocation(
        &self,
        address: u64,
        size: u64,
        function: Option<&str>,
        file: Option<&str>,
        line: i32,
    ) {
        if !CAPTURING.load(Ordering::Relaxed) {
            return;
        }
        let Some(_guard) = ReentrancyGuard::enter() else {
            return;
        };

        let timestamp = recorder::now_ns();
        let thread_id = recorder::thread_id_hash();
        let stack_trace = recorder::capture_stack(MAX_STACK_DEPTH);

        let function = function
            .map(str::to_owned)
            .or_else(|| stack_trace.first().cloned())
            .unwrap_or_else(|| "unknown".to_owned());
        let file = file.unwrap_or("unknown").to_owned();

        let event = AllocationEvent {
            timestamp,
            address,
            size,
            function,
            file,
            line,
            thread_id,
            stack_trace,
        };

        self.buffer_locked().push(event.clone());

        if let Ok(slot) = self.callback.lock() {
            if let Some(callback) = slot.as_ref() {
                callback(&event);
            }
        }
    }

    /// Record one deallocation, marking the matching buffered allocation
    /// freed. Null addresses and addresses never seen alive are ignored.
    pub fn record_deallocation(&self, address: u64) {
        if !CAPTURING.load(Ordering::Relaxed) {
            return;
        }
        if address == FREED_ADDRESS {
            return;
        }
        let Some(_guard) = ReentrancyGuard::enter() else {
            return;
        };
        self.buffer_locked().mark_freed(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The capture-active flag and the published session are process
    // globals, so the flag-dependent behavior is exercised in one
    // sequential test rather than several racing ones.
    #[test]
    fn test_session_lifecycle_and_recording() {
        let capture = match Capture::initialize() {
            Ok(capture) => capture,
            // On platforms without dlsym the session is still published.
            Err(_) => Capture::global().expect("session published even when hooks fail"),
        };
        capture.clear();

        // Inactive: nothing is recorded.
        capture.record_allocation(0x1000, 64, Some("idle"), None, 0);
        assert!(capture.is_empty());

        capture.start();
        assert!(capture.is_capturing());

        capture.record_allocation(0x1000, 64, Some("worker"), None, 0);
        capture.record_allocation(0x2000, 32, None, Some("src/lib.rs"), 7);
        capture.record_deallocation(0x1000);
        // Unknown and null addresses are no-ops.
        capture.record_deallocation(0xBAD);
        capture.record_deallocation(0);

        capture.stop();
        capture.record_allocation(0x3000, 8, Some("late"), None, 0);

        let events = capture.get_allocations();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].function, "worker");
        assert!(events[0].is_freed());
        assert_eq!(events[1].file, "src/lib.rs");
        assert_eq!(events[1].line, 7);
        assert!(!events[1].is_freed());
        assert!(events.iter().all(|e| e.function != "late"));

        // A callback that re-enters the recorder must not produce extra
        // events: the reentrancy guard is still held while it runs.
        capture.clear();
        capture.start();
        capture.set_allocation_callback(|_event| {
            if let Some(session) = Capture::global() {
                session.record_allocation(0xFEED, 1, Some("reentrant"), None, 0);
            }
        });
        capture.record_allocation(0x4000, 16, Some("outer"), None, 0);
        capture.stop();
        capture.clear_allocation_callback();

        let events = capture.get_allocations();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].function, "outer");

        capture.shutdown();
        assert!(capture.is_empty());
        assert!(!capture.is_capturing());
    }
}
