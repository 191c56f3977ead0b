//! Process-wide page reservoir for the segregated engine.
//!
//! The universe maps [`UNIVERSE_PAGES`]-page spans and hands them out as
//! [`GALAXY_PAGES`]-page slices. It is the only part of the engine shared
//! between threads, and its lock is held just long enough to bump the cursor
//! or map a new span.

use std::ptr::NonNull;

use parking_lot::{Mutex, const_mutex};
use serde::Serialize;

use crate::block::Span;
use crate::config::LogConfig;
use crate::log::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog};
use crate::pages::{OsPages, PAGE_SIZE, PageError, PageSource, fatal, map_pages, pages_for, unmap_pages};

/// Pages in one galaxy slice.
pub const GALAXY_PAGES: usize = 64;

/// Bytes in one galaxy slice.
pub const GALAXY_SIZE: usize = GALAXY_PAGES * PAGE_SIZE;

/// Pages mapped per universe refill.
pub const UNIVERSE_PAGES: usize = 256;

const UNIVERSE_SIZE: usize = UNIVERSE_PAGES * PAGE_SIZE;

const LOG_SCOPE: &str = "universe";

/// Universe counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UniverseStats {
    /// Universe spans mapped for slicing.
    pub refills: u64,
    /// Galaxy slices handed out.
    pub slices: u64,
    /// Oversized requests served by their own mapping.
    pub dedicated_spans: u64,
    /// Pages mapped in total.
    pub pages_mapped: u64,
}

struct Reservoir {
    cursor: usize,
    remaining: usize,
    stats: UniverseStats,
    log: LifecycleLog,
}

/// Shared reservoir that threads carve their galaxies from.
pub struct Universe<P: PageSource = OsPages> {
    pages: P,
    state: Mutex<Reservoir>,
}

impl<P: PageSource> Universe<P> {
    pub const fn new(pages: P) -> Self {
        Self::with_log(pages, LifecycleLog::from_env(LOG_SCOPE))
    }

    pub const fn with_config(pages: P, config: LogConfig) -> Self {
        Self::with_log(pages, LifecycleLog::with_config(LOG_SCOPE, config))
    }

    const fn with_log(pages: P, log: LifecycleLog) -> Self {
        Self {
            pages,
            state: const_mutex(Reservoir {
                cursor: 0,
                remaining: 0,
                stats: UniverseStats {
                    refills: 0,
                    slices: 0,
                    dedicated_spans: 0,
                    pages_mapped: 0,
                },
                log,
            }),
        }
    }

    pub fn page_source(&self) -> &P {
        &self.pages
    }

    /// Hands out the next page-aligned galaxy slice of [`GALAXY_SIZE`] bytes.
    pub fn ask_universe(&self) -> Span {
        let mut state = self.state.lock();
        if state.remaining < GALAXY_SIZE {
            self.universe_init(&mut state);
        }
        let slice = Span::new(state.cursor, GALAXY_SIZE);
        state.cursor += GALAXY_SIZE;
        state.remaining -= GALAXY_SIZE;
        state.stats.slices += 1;
        slice
    }

    fn universe_init(&self, state: &mut Reservoir) {
        let base = map_pages(&self.pages, UNIVERSE_PAGES);
        state.cursor = base.as_ptr() as usize;
        state.remaining = UNIVERSE_SIZE;
        state.stats.refills += 1;
        state.stats.pages_mapped += UNIVERSE_PAGES as u64;
        let refills = state.stats.refills;
        state.log.record(
            AllocatorLogLevel::Debug,
            "ask_universe",
            "universe_refill",
            Some(state.cursor),
            Some(UNIVERSE_SIZE),
            None,
            "success",
            format_args!("refills={refills}"),
        );
    }

    /// Maps a span of its own for a request larger than a galaxy slice.
    pub fn dedicated_span(&self, bytes: usize) -> Span {
        let pages = pages_for(bytes);
        let Some(len) = pages.checked_mul(PAGE_SIZE) else {
            fatal(format_args!("dedicated_span({bytes}): size overflows the address space"));
        };
        let mut state = self.state.lock();
        let base = map_pages(&self.pages, pages);
        state.stats.dedicated_spans += 1;
        state.stats.pages_mapped += pages as u64;
        state.log.record(
            AllocatorLogLevel::Debug,
            "ask_galaxy",
            "dedicated_span",
            Some(base.as_ptr() as usize),
            Some(len),
            None,
            "success",
            format_args!("pages={pages}"),
        );
        Span::new(base.as_ptr() as usize, len)
    }

    /// Returns `pages` pages at `base` to the page source.
    ///
    /// # Safety
    ///
    /// The span must be page-aligned, handed out by this universe, and no
    /// longer referenced by anyone.
    pub unsafe fn release(&self, base: NonNull<u8>, pages: usize) -> Result<(), PageError> {
        // SAFETY: forwarded caller contract.
        unsafe { unmap_pages(&self.pages, base, pages) }
    }

    /// Number of universe spans mapped so far.
    pub fn refills(&self) -> u64 {
        self.state.lock().stats.refills
    }

    pub fn stats(&self) -> UniverseStats {
        self.state.lock().stats
    }

    pub fn lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.state.lock().log.records().cloned().collect()
    }

    pub fn drain_lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.state.lock().log.drain()
    }
}

impl Default for Universe<OsPages> {
    fn default() -> Self {
        Self::new(OsPages)
    }
}
