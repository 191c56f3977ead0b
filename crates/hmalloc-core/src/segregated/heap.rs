//! Per-thread front end of the segregated engine.

use std::ptr::{self, NonNull};

use super::bins::Bins;
use super::galaxy::Galaxy;
use super::size_class::{NUM_CLASSES, SLAB_SIZE, cell_size, find_bin_num};
use super::universe::{GALAXY_SIZE, Universe};
use crate::block::{Block, HEADER_SIZE};
use crate::config::LogConfig;
use crate::log::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog};
use crate::pages::{OsPages, PAGE_SIZE, PageSource, fatal, pages_for};

const LOG_SCOPE: &str = "segregated";

/// One thread's galaxy and bins over a shared [`Universe`].
///
/// Small requests are served from the class lists without any locking; the
/// universe lock is taken only when the galaxy runs dry or a request is
/// larger than a galaxy slice. Cells freed here join this heap's lists even
/// if another heap handed them out.
pub struct ThreadHeap<'u, P: PageSource = OsPages> {
    universe: &'u Universe<P>,
    galaxy: Galaxy,
    bins: Bins,
    log: LifecycleLog,
}

impl<'u, P: PageSource> ThreadHeap<'u, P> {
    pub const fn new(universe: &'u Universe<P>) -> Self {
        Self::with_log(universe, LifecycleLog::from_env(LOG_SCOPE))
    }

    pub const fn with_config(universe: &'u Universe<P>, config: LogConfig) -> Self {
        Self::with_log(universe, LifecycleLog::with_config(LOG_SCOPE, config))
    }

    const fn with_log(universe: &'u Universe<P>, log: LifecycleLog) -> Self {
        Self {
            universe,
            galaxy: Galaxy::new(),
            bins: Bins::new(),
            log,
        }
    }

    pub fn universe(&self) -> &'u Universe<P> {
        self.universe
    }

    /// Allocates `size` usable bytes; returns null for `size == 0`.
    pub fn opt_malloc(&mut self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }
        let Some(total) = size.checked_add(HEADER_SIZE) else {
            fatal(format_args!("opt_malloc({size}): size overflows the address space"));
        };

        if total >= PAGE_SIZE {
            let Some(bytes) = pages_for(total).checked_mul(PAGE_SIZE) else {
                fatal(format_args!("opt_malloc({size}): size overflows the address space"));
            };
            let base = self.ask_galaxy(bytes);
            // SAFETY: `base` starts `bytes` freshly carved, page-aligned bytes.
            let block = unsafe { Block::at_addr(base) };
            block.set_header(bytes);
            self.log.record(
                AllocatorLogLevel::Trace,
                "opt_malloc",
                "alloc",
                Some(base),
                Some(bytes),
                None,
                "success",
                format_args!("path=pages request={size}"),
            );
            return block.payload().as_ptr();
        }

        let Some(class) = find_bin_num(total) else {
            fatal(format_args!("opt_malloc({size}): no size class fits {total} bytes"));
        };
        let addr = self.bin_get(class);
        // SAFETY: `addr` is a cell of `cell_size(class)` bytes popped off a
        // list this heap owns.
        let block = unsafe { Block::at_addr(addr) };
        block.set_header(cell_size(class));
        self.log.record(
            AllocatorLogLevel::Trace,
            "opt_malloc",
            "alloc",
            Some(addr),
            Some(cell_size(class)),
            Some(class),
            "success",
            format_args!("path=bin request={size}"),
        );
        block.payload().as_ptr()
    }

    /// Releases a block. Null is a no-op.
    ///
    /// Blocks above one page go back to the OS; everything else joins this
    /// heap's list for its class.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by `opt_malloc` or
    /// `opt_realloc` on a heap sharing this heap's universe.
    pub unsafe fn opt_free(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            self.log.record(
                AllocatorLogLevel::Trace,
                "opt_free",
                "free_null",
                None,
                None,
                None,
                "noop",
                format_args!("null_pointer"),
            );
            return;
        };
        // SAFETY: caller guarantees a live block of this engine.
        let block = unsafe { Block::from_payload(payload) };
        let size = block.header();
        if size > PAGE_SIZE {
            let pages = size / PAGE_SIZE;
            // SAFETY: blocks above one page are whole-page spans carved from
            // the universe, and the caller gives up every reference to it.
            match unsafe { self.universe.release(block.base(), pages) } {
                Ok(()) => self.log.record(
                    AllocatorLogLevel::Debug,
                    "opt_free",
                    "page_unmapped",
                    Some(block.addr()),
                    Some(size),
                    None,
                    "success",
                    format_args!("pages={pages}"),
                ),
                Err(err) => self.log.record(
                    AllocatorLogLevel::Error,
                    "opt_free",
                    "unmap_failed",
                    Some(block.addr()),
                    Some(size),
                    None,
                    "ignored",
                    format_args!("{err}"),
                ),
            }
            return;
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.bin_put(block) };
    }

    /// Resizes a block, in place when its cell already has room.
    ///
    /// Null behaves like `opt_malloc`; `new_size == 0` frees and returns null.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::opt_free`] for `ptr`.
    pub unsafe fn opt_realloc(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        let Some(payload) = NonNull::new(ptr) else {
            return self.opt_malloc(new_size);
        };
        if new_size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.opt_free(ptr) };
            return ptr::null_mut();
        }
        // SAFETY: caller guarantees a live block of this engine.
        let old = unsafe { Block::from_payload(payload) };
        let capacity = old.header() - HEADER_SIZE;
        if new_size <= capacity {
            self.log.record(
                AllocatorLogLevel::Trace,
                "opt_realloc",
                "realloc_in_place",
                Some(old.addr()),
                Some(new_size),
                find_bin_num(old.header()),
                "success",
                format_args!("capacity={capacity}"),
            );
            return ptr;
        }

        let Some(fresh) = NonNull::new(self.opt_malloc(new_size)) else {
            return ptr::null_mut();
        };
        // SAFETY: `fresh` was just returned by `opt_malloc`.
        let fresh = unsafe { Block::from_payload(fresh) };
        // SAFETY: the old payload holds `capacity` bytes and the new one holds
        // `new_size > capacity`; the blocks are distinct live allocations.
        unsafe { old.copy_payload_to(fresh, capacity) };
        self.log.record(
            AllocatorLogLevel::Trace,
            "opt_realloc",
            "realloc_move",
            Some(old.addr()),
            Some(new_size),
            None,
            "success",
            format_args!("copied={capacity}"),
        );
        // SAFETY: forwarded caller contract; `ptr` is still live.
        unsafe { self.opt_free(ptr) };
        fresh.payload().as_ptr()
    }

    /// Bumps `size` bytes off the galaxy, refilling it from the universe when
    /// it runs short. Requests larger than a whole slice get their own span.
    pub fn ask_galaxy(&mut self, size: usize) -> usize {
        if size > GALAXY_SIZE {
            let span = self.universe.dedicated_span(size);
            self.log.record(
                AllocatorLogLevel::Debug,
                "ask_galaxy",
                "dedicated_span",
                Some(span.base()),
                Some(span.len()),
                None,
                "success",
                format_args!("request={size}"),
            );
            return span.base();
        }
        if self.galaxy.remaining() < size {
            self.galaxy_init();
        }
        match self.galaxy.carve(size) {
            Some(base) => base,
            None => fatal(format_args!("ask_galaxy({size}): fresh galaxy cannot fit request")),
        }
    }

    /// Takes a fresh slice from the universe, abandoning the current one.
    pub fn galaxy_init(&mut self) {
        let abandoned = self.galaxy.remaining();
        let slice = self.universe.ask_universe();
        self.galaxy.reset(slice);
        let inits = self.galaxy.inits();
        self.log.record(
            AllocatorLogLevel::Debug,
            "ask_galaxy",
            "galaxy_init",
            Some(slice.base()),
            Some(slice.len()),
            None,
            "success",
            format_args!("inits={inits} abandoned={abandoned}"),
        );
    }

    /// Replaces `class`'s list with a freshly carved slab.
    pub fn bin_init(&mut self, class: usize) {
        let base = self.ask_galaxy(SLAB_SIZE);
        // SAFETY: `base` starts SLAB_SIZE bytes just carved from this heap's
        // galaxy, which stays mapped for the life of the universe.
        let dropped = unsafe { self.bins.install_slab(class, base) };
        let outcome = if dropped == 0 { "success" } else { "leaked" };
        self.log.record(
            AllocatorLogLevel::Debug,
            "bin_get",
            "bin_init",
            Some(base),
            Some(SLAB_SIZE),
            Some(class),
            outcome,
            format_args!("cell={} dropped={dropped}", cell_size(class)),
        );
    }

    /// Pops a cell of `class`, refilling the list first when its budget is
    /// below one cell.
    pub fn bin_get(&mut self, class: usize) -> usize {
        if self.bins.budget(class) < cell_size(class) {
            self.bin_init(class);
        }
        match self.bins.pop(class) {
            Some(addr) => addr,
            None => fatal(format_args!("bin_get({class}): list empty with budget left")),
        }
    }

    /// Pushes a freed block onto the list of the class its header names.
    ///
    /// # Safety
    ///
    /// `block` must be a live cell handed out by a heap sharing this heap's
    /// universe, with its header intact.
    pub unsafe fn bin_put(&mut self, block: Block) {
        let size = block.header();
        let Some(class) = find_bin_num(size) else {
            fatal(format_args!("bin_put({:#x}): header {size} names no class", block.addr()));
        };
        // SAFETY: forwarded caller contract; the cell is `cell_size(class)`
        // bytes of universe memory.
        unsafe { self.bins.push(class, block.addr()) };
        let budget = self.bins.budget(class);
        self.log.record(
            AllocatorLogLevel::Trace,
            "opt_free",
            "free",
            Some(block.addr()),
            Some(size),
            Some(class),
            "success",
            format_args!("budget={budget}"),
        );
    }

    /// Bytes on `class`'s list.
    pub fn bin_budget(&self, class: usize) -> usize {
        self.bins.budget(class)
    }

    /// Cells on `class`'s list, counted by traversal.
    pub fn bin_len(&self, class: usize) -> usize {
        self.bins.walk_len(class)
    }

    /// Budgets of every class, smallest first.
    pub fn bin_budgets(&self) -> [usize; NUM_CLASSES] {
        std::array::from_fn(|class| self.bins.budget(class))
    }

    pub fn galaxy_remaining(&self) -> usize {
        self.galaxy.remaining()
    }

    pub fn galaxy_inits(&self) -> u64 {
        self.galaxy.inits()
    }

    pub fn lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.log.records().cloned().collect()
    }

    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.log.drain()
    }
}
