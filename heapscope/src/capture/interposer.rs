//! Heap allocator interposition
//!
//! Two hook mechanisms feed the same recorder:
//!
//! 1. [`TraceAllocator`], a [`GlobalAlloc`] wrapper installed with
//!    `#[global_allocator]`. It defers to the wrapped allocator (normally
//!    [`System`]) for the actual work and reports the result.
//! 2. C-ABI `malloc` / `free` / `realloc` entry points that resolve the
//!    program's original routines with `dlsym(RTLD_NEXT, ..)` and are
//!    exported from the `heapscope-preload` cdylib for `LD_PRELOAD` use.
//!
//! The resolver itself may allocate, so while resolution is in flight
//! `malloc` serves from a small static bump arena and reports nothing.
//! Arena blocks are never reclaimed; `free` recognizes and skips them.

use std::alloc::{GlobalAlloc, Layout, System};

use crate::capture::Capture;
#[cfg(not(unix))]
use crate::domain::CaptureError;

/// Tracking allocator wrapper.
///
/// Install via `#[global_allocator]`:
///
/// ```
/// use heapscope::capture::TraceAllocator;
///
/// #[global_allocator]
/// static ALLOC: TraceAllocator = TraceAllocator::system();
///
/// fn main() {}
/// ```
pub struct TraceAllocator<A = System> {
    inner: A,
}

impl TraceAllocator<System> {
    /// Wrap the system allocator.
    #[must_use]
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A> TraceAllocator<A> {
    /// Wrap an arbitrary allocator.
    pub const fn from_allocator(inner: A) -> Self {
        Self { inner }
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for TraceAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            notify_alloc(ptr as u64, layout.size() as u64, None);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc_zeroed(layout);
        if !ptr.is_null() {
            notify_alloc(ptr as u64, layout.size() as u64, None);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        notify_dealloc(ptr as u64);
        self.inner.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        // A reallocation is a paired free of the old block and an
        // allocation at the new one.
        if !ptr.is_null() {
            notify_dealloc(ptr as u64);
        }
        if !new_ptr.is_null() {
            notify_alloc(new_ptr as u64, new_size as u64, None);
        }
        new_ptr
    }
}

fn notify_alloc(address: u64, size: u64, function_hint: Option<&str>) {
    if let Some(capture) = Capture::active() {
        capture.record_allocation(address, size, function_hint, None, 0);
    }
}

fn notify_dealloc(address: u64) {
    if let Some(capture) = Capture::active() {
        capture.record_deallocation(address);
    }
}

#[cfg(unix)]
pub use hooks::{free, malloc, realloc, resolve_real_allocator};

#[cfg(not(unix))]
pub(crate) fn resolve_real_allocator() -> Result<(), CaptureError> {
    Err(CaptureError::HookUnsupported)
}

#[cfg(unix)]
mod hooks {
    use std::cell::UnsafeCell;
    use std::mem;
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use libc::{c_char, c_void, dlsym, size_t, RTLD_NEXT};
    use log::error;

    use super::{notify_alloc, notify_dealloc};
    use crate::domain::CaptureError;

    type MallocFn = unsafe extern "C" fn(size_t) -> *mut c_void;
    type FreeFn = unsafe extern "C" fn(*mut c_void);
    type ReallocFn = unsafe extern "C" fn(*mut c_void, size_t) -> *mut c_void;

    const UNRESOLVED: usize = 0;
    const RESOLVING: usize = 1;
    const RESOLVED: usize = 2;
    const FAILED: usize = 3;

    static HOOK_STATE: AtomicUsize = AtomicUsize::new(UNRESOLVED);
    // Write-once during resolution, read-only afterwards; published with
    // release/acquire ordering through HOOK_STATE.
    static REAL_MALLOC: AtomicUsize = AtomicUsize::new(0);
    static REAL_FREE: AtomicUsize = AtomicUsize::new(0);
    static REAL_REALLOC: AtomicUsize = AtomicUsize::new(0);

    /// Resolve the next-in-chain allocator routines.
    ///
    /// Safe to call from multiple threads and from within the hooks
    /// themselves: the losing threads (and any allocation performed by
    /// `dlsym`) fall through to the bootstrap arena until the winner
    /// publishes the pointers. Failure is terminal and logged once; the
    /// hooks then degrade to the arena, never back to the recorder.
    pub fn resolve_real_allocator() -> Result<(), CaptureError> {
        match HOOK_STATE.compare_exchange(
            UNRESOLVED,
            RESOLVING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let malloc_ptr =
                    unsafe { dlsym(RTLD_NEXT, b"malloc\0".as_ptr() as *const c_char) };
                let free_ptr = unsafe { dlsym(RTLD_NEXT, b"free\0".as_ptr() as *const c_char) };
                let realloc_ptr =
                    unsafe { dlsym(RTLD_NEXT, b"realloc\0".as_ptr() as *const c_char) };

                if malloc_ptr.is_null() || free_ptr.is_null() || realloc_ptr.is_null() {
                    HOOK_STATE.store(FAILED, Ordering::Release);
                    error!("failed to resolve the original malloc/free/realloc symbols");
                    return Err(CaptureError::HookResolutionFailed);
                }

                REAL_MALLOC.store(malloc_ptr as usize, Ordering::Release);
                REAL_FREE.store(free_ptr as usize, Ordering::Release);
                REAL_REALLOC.store(realloc_ptr as usize, Ordering::Release);
                HOOK_STATE.store(RESOLVED, Ordering::Release);
                Ok(())
            }
            Err(mut state) => {
                while state == RESOLVING {
                    std::hint::spin_loop();
                    state = HOOK_STATE.load(Ordering::Acquire);
                }
                if state == RESOLVED {
                    Ok(())
                } else {
                    Err(CaptureError::HookResolutionFailed)
                }
            }
        }
    }

    // Bootstrap arena serving allocations that arrive before the real
    // allocator is known (the dynamic linker, dlsym's own bookkeeping).
    // Blocks carry their size in a 16-byte header so the realloc path can
    // migrate them; they are never reclaimed.
    const BOOTSTRAP_ARENA_SIZE: usize = 64 * 1024;
    const BOOTSTRAP_ALIGN: usize = 16;

    // Alignment matches the header stride so size headers land on
    // usize-aligned addresses.
    #[repr(C, align(16))]
    struct ArenaStorage([u8; BOOTSTRAP_ARENA_SIZE]);

    struct BootstrapArena(UnsafeCell<ArenaStorage>);

    // The arena is only handed out through the atomic cursor below.
    unsafe impl Sync for BootstrapArena {}

    static BOOTSTRAP_ARENA: BootstrapArena =
        BootstrapArena(UnsafeCell::new(ArenaStorage([0; BOOTSTRAP_ARENA_SIZE])));
    static BOOTSTRAP_CURSOR: AtomicUsize = AtomicUsize::new(0);

    unsafe fn bootstrap_alloc(size: size_t) -> *mut c_void {
        let total = match size
            .checked_add(BOOTSTRAP_ALIGN + BOOTSTRAP_ALIGN - 1)
            .map(|n| n & !(BOOTSTRAP_ALIGN - 1))
        {
            Some(total) => total,
            None => return ptr::null_mut(),
        };
        // Advance the cursor only when the request fits, so an oversized
        // ask does not burn the remaining arena.
        let mut offset = BOOTSTRAP_CURSOR.load(Ordering::Relaxed);
        loop {
            let end = match offset.checked_add(total) {
                Some(end) if end <= BOOTSTRAP_ARENA_SIZE => end,
                _ => return ptr::null_mut(),
            };
            match BOOTSTRAP_CURSOR.compare_exchange_weak(
                offset,
                end,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => offset = current,
            }
        }
        let base = (BOOTSTRAP_ARENA.0.get() as *mut u8).add(offset);
        (base as *mut usize).write(size);
        base.add(BOOTSTRAP_ALIGN) as *mut c_void
    }

    fn bootstrap_contains(ptr: *mut c_void) -> bool {
        let start = BOOTSTRAP_ARENA.0.get() as usize;
        let addr = ptr as usize;
        addr >= start && addr < start + BOOTSTRAP_ARENA_SIZE
    }

    unsafe fn bootstrap_size(ptr: *mut c_void) -> usize {
        ((ptr as *mut u8).sub(BOOTSTRAP_ALIGN) as *mut usize).read()
    }

    /// Interposed `malloc`.
    ///
    /// # Safety
    ///
    /// Same contract as the C `malloc` it replaces.
    pub unsafe fn malloc(size: size_t) -> *mut c_void {
        match HOOK_STATE.load(Ordering::Acquire) {
            RESOLVED => {
                let real: MallocFn = mem::transmute(REAL_MALLOC.load(Ordering::Acquire));
                let ptr = real(size);
                if !ptr.is_null() {
                    notify_alloc(ptr as u64, size as u64, Some("malloc"));
                }
                ptr
            }
            UNRESOLVED => {
                // First invocation: resolve lazily, then retry.
                let _ = resolve_real_allocator();
                if HOOK_STATE.load(Ordering::Acquire) == RESOLVED {
                    malloc(size)
                } else {
                    bootstrap_alloc(size)
                }
            }
            // RESOLVING (concurrent resolver, possibly our own dlsym call)
            // or FAILED: known-safe path, no recording.
            _ => bootstrap_alloc(size),
        }
    }

    /// Interposed `free`.
    ///
    /// # Safety
    ///
    /// Same contract as the C `free` it replaces.
    pub unsafe fn free(ptr: *mut c_void) {
        if ptr.is_null() {
            return;
        }
        if bootstrap_contains(ptr) {
            return;
        }
        if HOOK_STATE.load(Ordering::Acquire) == RESOLVED {
            notify_dealloc(ptr as u64);
            let real: FreeFn = mem::transmute(REAL_FREE.load(Ordering::Acquire));
            real(ptr);
        }
        // Without a resolved free there is nothing safe to delegate to;
        // leaking the block beats corrupting a foreign heap.
    }

    /// Interposed `realloc`.
    ///
    /// # Safety
    ///
    /// Same contract as the C `realloc` it replaces.
    pub unsafe fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
        if !ptr.is_null() && bootstrap_contains(ptr) {
            // Migrate a bootstrap block; its header knows the old size.
            let old_size = bootstrap_size(ptr);
            let new_ptr = malloc(size);
            if !new_ptr.is_null() {
                ptr::copy_nonoverlapping(
                    ptr as *const u8,
                    new_ptr as *mut u8,
                    old_size.min(size),
                );
            }
            return new_ptr;
        }

        match HOOK_STATE.load(Ordering::Acquire) {
            RESOLVED => {
                let real: ReallocFn = mem::transmute(REAL_REALLOC.load(Ordering::Acquire));
                let new_ptr = real(ptr, size);
                if !ptr.is_null() {
                    notify_dealloc(ptr as u64);
                }
                if !new_ptr.is_null() {
                    notify_alloc(new_ptr as u64, size as u64, Some("realloc"));
                }
                new_ptr
            }
            UNRESOLVED => {
                let _ = resolve_real_allocator();
                if HOOK_STATE.load(Ordering::Acquire) == RESOLVED {
                    realloc(ptr, size)
                } else if ptr.is_null() {
                    bootstrap_alloc(size)
                } else {
                    ptr::null_mut()
                }
            }
            _ => {
                if ptr.is_null() {
                    bootstrap_alloc(size)
                } else {
                    ptr::null_mut()
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_bootstrap_alloc_is_aligned_and_disjoint() {
            let a = unsafe { bootstrap_alloc(24) };
            let b = unsafe { bootstrap_alloc(8) };
            assert!(!a.is_null());
            assert!(!b.is_null());
            assert_eq!(a as usize % BOOTSTRAP_ALIGN, 0);
            assert_eq!(b as usize % BOOTSTRAP_ALIGN, 0);
            assert_ne!(a, b);
            assert!(bootstrap_contains(a));
            assert!(bootstrap_contains(b));
            assert_eq!(unsafe { bootstrap_size(a) }, 24);
        }

        #[test]
        fn test_bootstrap_alloc_fails_when_exhausted() {
            let huge = unsafe { bootstrap_alloc(BOOTSTRAP_ARENA_SIZE * 2) };
            assert!(huge.is_null());
        }

        #[test]
        fn test_foreign_pointer_is_not_in_arena() {
            let local = 0u64;
            assert!(!bootstrap_contains(&local as *const u64 as *mut c_void));
        }
    }
}
