//! # hmalloc-abi
//!
//! `extern "C"` boundary for the two engines in `hmalloc-core`.
//!
//! ```text
//! C caller -> hmalloc / hfree / hrealloc        -> process-wide CoalescingAllocator
//! C caller -> opt_malloc / opt_free / opt_realloc -> this thread's ThreadHeap -> shared Universe
//! ```
//!
//! The exported names do not collide with the C library's allocator, so the
//! symbols stay live in test builds as well.

mod state;

pub mod hmalloc_abi;
pub mod opt_malloc_abi;

pub use state::{coalescing, universe, with_thread_heap};
