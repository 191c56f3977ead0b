//! Engine A: one lock, one address-ordered free list, eager coalescing.

mod allocator;
mod free_list;
mod stats;

pub use allocator::CoalescingAllocator;
pub use free_list::{FreeList, FreeListError, Insertion};
pub use stats::HmStats;
