//! ABI layer for the segregated engine (`opt_malloc`, `opt_free`,
//! `opt_realloc`). Each call runs against the calling thread's heap.

use libc::{c_void, size_t};

use crate::state::with_thread_heap;

/// Allocates `size` bytes from this thread's bins; null for zero.
#[unsafe(no_mangle)]
pub extern "C" fn opt_malloc(size: size_t) -> *mut c_void {
    with_thread_heap(|heap| heap.opt_malloc(size)).cast()
}

/// Frees a block from any thread's `opt_malloc`. Small cells join the
/// calling thread's bins.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from `opt_malloc`/`opt_realloc`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opt_free(ptr: *mut c_void) {
    // SAFETY: forwarded caller contract.
    with_thread_heap(|heap| unsafe { heap.opt_free(ptr.cast()) })
}

/// Resizes a block, in place when its cell already has room.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from `opt_malloc`/`opt_realloc`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opt_realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    with_thread_heap(|heap| unsafe { heap.opt_realloc(ptr.cast(), size) }).cast()
}
