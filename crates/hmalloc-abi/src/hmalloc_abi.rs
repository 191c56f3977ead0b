//! ABI layer for the coalescing engine (`hmalloc`, `hfree`, `hrealloc`,
//! `hgetstats`, `hprintstats`).

use libc::{c_void, size_t};

use hmalloc_core::HmStats;

use crate::state::coalescing;

/// Allocates `size` bytes from the shared free list; null for zero.
#[unsafe(no_mangle)]
pub extern "C" fn hmalloc(size: size_t) -> *mut c_void {
    coalescing().allocate(size).cast()
}

/// Frees a block returned by `hmalloc` or `hrealloc`. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from `hmalloc`/`hrealloc`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hfree(ptr: *mut c_void) {
    // SAFETY: forwarded caller contract.
    unsafe { coalescing().free(ptr.cast()) }
}

/// Moves a block to a fresh allocation of `size` bytes.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from `hmalloc`/`hrealloc`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hrealloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    unsafe { coalescing().reallocate(ptr.cast(), size).cast() }
}

/// Returns a snapshot of the coalescing engine's counters by value.
#[unsafe(no_mangle)]
pub extern "C" fn hgetstats() -> HmStats {
    coalescing().get_stats()
}

/// Prints the counters to stderr.
#[unsafe(no_mangle)]
pub extern "C" fn hprintstats() {
    coalescing().print_stats();
}
