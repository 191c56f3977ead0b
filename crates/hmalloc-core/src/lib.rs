//! # hmalloc-core
//!
//! Two general-purpose allocator engines built directly on anonymous page
//! mappings:
//!
//! - [`coalesce`]: one process-wide lock around an address-ordered free list
//!   with eager adjacency coalescing, plus dedicated mappings for page-sized
//!   and larger requests.
//! - [`segregated`]: a universe → galaxy → bin hierarchy where the common
//!   path touches only per-thread state and only universe refills lock.
//!
//! Raw address arithmetic is confined to [`block`] and the OS boundary to
//! [`pages`]. Everything else works in terms of `(base, len)` spans.

#![deny(unsafe_code)]

#[cfg(not(target_pointer_width = "64"))]
compile_error!("hmalloc supports only 64-bit targets.");

#[allow(unsafe_code)]
pub mod block;
#[allow(unsafe_code)]
pub mod coalesce;
pub mod config;
pub mod log;
#[allow(unsafe_code)]
pub mod pages;
#[allow(unsafe_code)]
pub mod segregated;

pub use block::{Block, HEADER_SIZE, Span};
pub use coalesce::{CoalescingAllocator, FreeListError, HmStats};
pub use config::LogConfig;
pub use log::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog};
pub use pages::{OsPages, PAGE_SIZE, PageError, PageSource};
pub use segregated::{ThreadHeap, Universe, UniverseStats};
