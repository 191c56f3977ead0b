//! Per-thread bump region carved from a universe slice.

use crate::block::Span;

/// Bump cursor over the current galaxy slice.
#[derive(Debug, Default)]
pub struct Galaxy {
    cursor: usize,
    remaining: usize,
    inits: u64,
}

impl Galaxy {
    pub const fn new() -> Self {
        Self {
            cursor: 0,
            remaining: 0,
            inits: 0,
        }
    }

    /// Bytes left in the current slice.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Number of slices this galaxy has been given.
    pub fn inits(&self) -> u64 {
        self.inits
    }

    /// Replaces the current slice; whatever was left of it is abandoned.
    pub fn reset(&mut self, slice: Span) {
        self.cursor = slice.base();
        self.remaining = slice.len();
        self.inits += 1;
    }

    /// Bumps `size` bytes off the slice, or `None` if they do not fit.
    pub fn carve(&mut self, size: usize) -> Option<usize> {
        if size > self.remaining {
            return None;
        }
        let base = self.cursor;
        self.cursor += size;
        self.remaining -= size;
        Some(base)
    }
}
