//! Engine B: segregated fits with per-thread caching.
//!
//! ```text
//!   Universe (shared, locked)    256-page mapped spans
//!      └─ Galaxy (per thread)    64-page slices, bump allocated
//!           └─ Bins (per thread) ten power-of-two classes, 4-page slabs
//! ```
//!
//! Requests of one page or more skip the bins and take whole pages from the
//! galaxy (or a dedicated span when larger than a slice); those above one
//! page are unmapped on free. Sub-page cells are never returned to the OS.

mod bins;
mod galaxy;
mod heap;
pub mod size_class;
mod universe;

pub use heap::ThreadHeap;
pub use universe::{GALAXY_PAGES, GALAXY_SIZE, UNIVERSE_PAGES, Universe, UniverseStats};
