//! Companion crate to `heapscope`. Compiles into a dynamic library that
//! can be loaded via `LD_PRELOAD` to intercept the `malloc`, `free` and
//! `realloc` calls issued by a program and record them in the heapscope
//! capture session before delegating to the original routines:
//!
//! ```bash
//! LD_PRELOAD=libheapscope_preload.so ./my_program
//! ```
//!
//! The embedding side still drives the session lifecycle
//! (`Capture::initialize`, `start`, `stop`); until capture is started the
//! hooks are pure pass-through.

#![cfg(unix)]

use heapscope::capture::interposer;
use libc::{c_void, size_t};

/// Interposed `malloc`: records the allocation, then delegates to the
/// next-in-chain `malloc`.
///
/// # Safety
///
/// Same contract as the C `malloc` it replaces.
#[no_mangle]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    interposer::malloc(size)
}

/// Interposed `free`: records the deallocation, then delegates to the
/// next-in-chain `free`. Freeing null is a no-op.
///
/// # Safety
///
/// Same contract as the C `free` it replaces.
#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    interposer::free(ptr)
}

/// Interposed `realloc`: recorded as a paired deallocation of the old
/// block and an allocation at the new one.
///
/// # Safety
///
/// Same contract as the C `realloc` it replaces.
#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    interposer::realloc(ptr, size)
}
