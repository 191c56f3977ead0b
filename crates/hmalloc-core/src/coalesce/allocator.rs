//! The globally locked coalescing allocator.

use std::io::{self, Write};
use std::ptr::{self, NonNull};

use parking_lot::{Mutex, const_mutex};

use super::free_list::{FreeList, FreeListError};
use super::stats::HmStats;
use crate::block::{Block, HEADER_SIZE, NODE_SIZE, Span, word_align};
use crate::config::LogConfig;
use crate::log::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog};
use crate::pages::{OsPages, PAGE_SIZE, PageSource, fatal, map_pages, pages_for, unmap_pages};

const LOG_SCOPE: &str = "coalesce";

struct State {
    free_list: FreeList,
    stats: HmStats,
    log: LifecycleLog,
}

/// Address-ordered first-fit allocator behind one lock.
///
/// Requests whose header-inclusive size is below [`PAGE_SIZE`] are carved
/// from a shared free list that merges neighbours on every free. Larger
/// requests get their own mapping, which is unmapped again on free.
pub struct CoalescingAllocator<P: PageSource = OsPages> {
    pages: P,
    state: Mutex<State>,
}

impl<P: PageSource> CoalescingAllocator<P> {
    /// Allocator whose logging is configured from the environment.
    pub const fn new(pages: P) -> Self {
        Self::with_log(pages, LifecycleLog::from_env(LOG_SCOPE))
    }

    /// Allocator with an explicit logging configuration.
    pub const fn with_config(pages: P, config: LogConfig) -> Self {
        Self::with_log(pages, LifecycleLog::with_config(LOG_SCOPE, config))
    }

    const fn with_log(pages: P, log: LifecycleLog) -> Self {
        Self {
            pages,
            state: const_mutex(State {
                free_list: FreeList::new(),
                stats: HmStats::new(),
                log,
            }),
        }
    }

    /// The page source backing this allocator.
    pub fn page_source(&self) -> &P {
        &self.pages
    }

    /// Allocates `size` usable bytes; returns null for `size == 0`.
    ///
    /// The memory is not zeroed unless it comes from a fresh mapping.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }
        let Some(total) = size
            .checked_add(HEADER_SIZE)
            .and_then(word_align)
            .map(|n| n.max(NODE_SIZE))
        else {
            fatal(format_args!("allocate({size}): size overflows the address space"));
        };

        let mut state = self.state.lock();
        let block = if total >= PAGE_SIZE {
            self.allocate_pages(&mut state, total)
        } else {
            self.allocate_small(&mut state, total)
        };
        state.stats.chunks_allocated += 1;
        block.payload().as_ptr()
    }

    fn allocate_pages(&self, state: &mut State, total: usize) -> Block {
        let pages = pages_for(total);
        let base = map_pages(&self.pages, pages);
        state.stats.add_mapped(pages);
        // SAFETY: `base` is a fresh, page-aligned mapping of `pages` pages.
        let block = unsafe { Block::at(base) };
        block.set_header(total);
        state.log.record(
            AllocatorLogLevel::Trace,
            "allocate",
            "alloc",
            Some(block.addr()),
            Some(total),
            None,
            "success",
            format_args!("path=dedicated pages={pages}"),
        );
        block
    }

    fn allocate_small(&self, state: &mut State, total: usize) -> Block {
        let (span, path) = match state.free_list.take_first_fit(total) {
            Some(span) => (span, "free_list"),
            None => {
                let base = map_pages(&self.pages, 1);
                state.stats.add_mapped(1);
                state.log.record(
                    AllocatorLogLevel::Debug,
                    "allocate",
                    "page_mapped",
                    Some(base.as_ptr() as usize),
                    Some(PAGE_SIZE),
                    None,
                    "success",
                    format_args!("pages=1 reason=no_fit"),
                );
                (Span::new(base.as_ptr() as usize, PAGE_SIZE), "fresh_page")
            }
        };

        // SAFETY: `span` was either unlinked from the free list or freshly
        // mapped, so this allocator owns it exclusively.
        let block = unsafe { Block::at_addr(span.base()) };
        let leftover = span.len() - total;
        if leftover >= NODE_SIZE {
            let (head, tail) = span.split_at(total);
            block.set_header(head.len());
            // SAFETY: `tail` is the word-aligned remainder of an owned span
            // and is at least one node long.
            let insertion = unsafe { state.free_list.insert(tail) };
            state.log.record(
                AllocatorLogLevel::Trace,
                "allocate",
                "split",
                Some(tail.base()),
                Some(tail.len()),
                None,
                insertion.as_str(),
                format_args!("block={} remainder={}", head.len(), tail.len()),
            );
        } else if span.len() >= PAGE_SIZE {
            // A page-sized header would route the block to the unmap path on
            // free; keep it sub-page and give up the few tail bytes.
            block.set_header(total);
            state.log.record(
                AllocatorLogLevel::Debug,
                "allocate",
                "tail_orphaned",
                Some(span.base() + total),
                Some(leftover),
                None,
                "leaked",
                format_args!("span={} block={}", span.len(), total),
            );
        } else {
            block.set_header(span.len());
        }

        state.log.record(
            AllocatorLogLevel::Trace,
            "allocate",
            "alloc",
            Some(block.addr()),
            Some(block.header()),
            None,
            "success",
            format_args!("path={path}"),
        );
        block
    }

    /// Returns a block to the allocator. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by [`Self::allocate`] or
    /// [`Self::reallocate`] on this instance that has not been freed since.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            self.state.lock().log.record(
                AllocatorLogLevel::Trace,
                "free",
                "free_null",
                None,
                None,
                None,
                "noop",
                format_args!("null_pointer"),
            );
            return;
        };
        // SAFETY: caller guarantees `ptr` is a live payload of this allocator.
        let block = unsafe { Block::from_payload(payload) };
        let len = block.header();

        let mut state = self.state.lock();
        state.stats.chunks_freed += 1;
        if len < PAGE_SIZE {
            // SAFETY: a live sub-page block is an owned, word-aligned span of
            // at least NODE_SIZE bytes that no list entry overlaps.
            let insertion = unsafe { state.free_list.insert(block.span()) };
            let event = if insertion.coalesced() { "coalesce" } else { "free" };
            let free_length = state.free_list.len();
            state.log.record(
                AllocatorLogLevel::Trace,
                "free",
                event,
                Some(block.addr()),
                Some(len),
                None,
                insertion.as_str(),
                format_args!("free_length={free_length}"),
            );
            return;
        }

        let pages = pages_for(len);
        // SAFETY: page-or-larger blocks are dedicated mappings of exactly
        // `pages_for(header)` pages starting at the block base.
        match unsafe { unmap_pages(&self.pages, block.base(), pages) } {
            Ok(()) => {
                state.stats.add_unmapped(pages);
                state.log.record(
                    AllocatorLogLevel::Debug,
                    "free",
                    "page_unmapped",
                    Some(block.addr()),
                    Some(len),
                    None,
                    "success",
                    format_args!("pages={pages}"),
                );
            }
            Err(err) => state.log.record(
                AllocatorLogLevel::Error,
                "free",
                "unmap_failed",
                Some(block.addr()),
                Some(len),
                None,
                "ignored",
                format_args!("{err}"),
            ),
        }
    }

    /// Moves a block to a new allocation of `new_size` bytes.
    ///
    /// Null behaves like [`Self::allocate`]; `new_size == 0` frees and
    /// returns null. Otherwise the first `min(old payload, new_size)` bytes
    /// are copied and the old block is freed. The address always changes.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::free`] for `ptr`.
    pub unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        let Some(payload) = NonNull::new(ptr) else {
            return self.allocate(new_size);
        };
        if new_size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.free(ptr) };
            return ptr::null_mut();
        }

        // SAFETY: caller guarantees `ptr` is a live payload of this allocator.
        let old = unsafe { Block::from_payload(payload) };
        let old_payload = old.header() - HEADER_SIZE;
        let Some(fresh) = NonNull::new(self.allocate(new_size)) else {
            return ptr::null_mut();
        };
        // SAFETY: `fresh` was just returned by `allocate`.
        let fresh = unsafe { Block::from_payload(fresh) };
        let copied = old_payload.min(new_size);
        // SAFETY: both blocks are live, distinct, and hold at least `copied`
        // payload bytes.
        unsafe { old.copy_payload_to(fresh, copied) };

        self.state.lock().log.record(
            AllocatorLogLevel::Trace,
            "reallocate",
            "realloc_move",
            Some(old.addr()),
            Some(new_size),
            None,
            "success",
            format_args!("old_payload={old_payload} copied={copied}"),
        );
        // SAFETY: forwarded caller contract; `ptr` is still live.
        unsafe { self.free(ptr) };
        fresh.payload().as_ptr()
    }

    /// Current counters, with `free_length` refreshed.
    pub fn get_stats(&self) -> HmStats {
        let mut state = self.state.lock();
        state.stats.free_length = i64::try_from(state.free_list.len()).unwrap_or(i64::MAX);
        let stats = state.stats;
        state.log.record(
            AllocatorLogLevel::Debug,
            "get_stats",
            "allocator_stats",
            None,
            None,
            None,
            "snapshot",
            format_args!(
                "mapped={} unmapped={} allocs={} frees={} free_length={}",
                stats.pages_mapped,
                stats.pages_unmapped,
                stats.chunks_allocated,
                stats.chunks_freed,
                stats.free_length
            ),
        );
        stats
    }

    /// Renders the stats report to `out`.
    pub fn write_stats<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let stats = self.get_stats();
        write!(out, "\n{stats}")
    }

    /// Prints the stats report to stderr.
    pub fn print_stats(&self) {
        let _ = self.write_stats(&mut io::stderr().lock());
    }

    /// Number of free-list entries, counted by traversal.
    pub fn free_list_length(&self) -> usize {
        self.state.lock().free_list.walk_len()
    }

    /// Snapshot of the free list in address order.
    pub fn free_spans(&self) -> Vec<Span> {
        self.state.lock().free_list.iter().collect()
    }

    /// Checks the free-list invariants.
    pub fn verify(&self) -> Result<(), FreeListError> {
        self.state.lock().free_list.verify()
    }

    /// Returns retained lifecycle records, oldest first.
    pub fn lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.state.lock().log.records().cloned().collect()
    }

    /// Drains retained lifecycle records.
    pub fn drain_lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.state.lock().log.drain()
    }
}

impl Default for CoalescingAllocator<OsPages> {
    fn default() -> Self {
        Self::new(OsPages)
    }
}
