//! Power-of-two size classes for the segregated engine.
//!
//! Ten classes from 8 bytes to one page. A class is chosen for the
//! header-inclusive request size, so a 16-byte request (24 bytes with its
//! header) lands in the 32-byte class.

use crate::pages::PAGE_SIZE;

/// Cell size of class 0 (bytes).
pub const BASE_SIZE: usize = 8;

/// Number of size classes.
pub const NUM_CLASSES: usize = 10;

/// Bytes carved from the galaxy each time a class is (re)initialized.
pub const SLAB_SIZE: usize = 4 * PAGE_SIZE;

/// Cell size of `class`.
#[must_use]
pub const fn cell_size(class: usize) -> usize {
    BASE_SIZE << class
}

/// Number of cells a slab holds for `class`.
#[must_use]
pub const fn cells_per_slab(class: usize) -> usize {
    SLAB_SIZE / cell_size(class)
}

/// Smallest class whose cell holds `size` bytes, or `None` above one page.
#[must_use]
pub fn find_bin_num(size: usize) -> Option<usize> {
    (0..NUM_CLASSES).find(|&class| size <= cell_size(class))
}
