//! Counters kept by the coalescing engine.

use std::fmt;

use serde::Serialize;

/// Snapshot of the coalescing engine's counters.
///
/// Field layout matches a C struct of five `long`s so the ABI crate can hand
/// it out by value.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HmStats {
    pub pages_mapped: i64,
    pub pages_unmapped: i64,
    pub chunks_allocated: i64,
    pub chunks_freed: i64,
    pub free_length: i64,
}

impl HmStats {
    /// All counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pages_mapped: 0,
            pages_unmapped: 0,
            chunks_allocated: 0,
            chunks_freed: 0,
            free_length: 0,
        }
    }

    /// Allocations not yet matched by a free.
    #[must_use]
    pub fn outstanding(&self) -> i64 {
        self.chunks_allocated - self.chunks_freed
    }

    pub(crate) fn add_mapped(&mut self, pages: usize) {
        self.pages_mapped += count(pages);
    }

    pub(crate) fn add_unmapped(&mut self, pages: usize) {
        self.pages_unmapped += count(pages);
    }
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl fmt::Display for HmStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== hmalloc stats ==")?;
        writeln!(f, "Mapped:   {}", self.pages_mapped)?;
        writeln!(f, "Unmapped: {}", self.pages_unmapped)?;
        writeln!(f, "Allocs:   {}", self.chunks_allocated)?;
        writeln!(f, "Frees:    {}", self.chunks_freed)?;
        writeln!(f, "Freelen:  {}", self.free_length)
    }
}
