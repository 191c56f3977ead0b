//! Whole-page memory source shared by both engines.
//!
//! The only OS-boundary contract: request zero-filled, read/write anonymous
//! memory in whole-page multiples, and release a previously granted span by
//! exact address and length. A refused mapping is fatal.

mod os;

use std::fmt;
use std::io::Write;
use std::ptr::NonNull;

use thiserror::Error;

pub use os::OsPages;

/// Page granule used by both engines (bytes).
pub const PAGE_SIZE: usize = 4096;

/// Errors reported by a [`PageSource`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("zero-length page request")]
    ZeroPages,
    #[error("request of {pages} page(s) overflows the address space")]
    Overflow { pages: usize },
    #[error("mapping {pages} page(s) refused (errno {errno})")]
    MapRefused { pages: usize, errno: i32 },
    #[error("unmapping {pages} page(s) at {base:#x} refused (errno {errno})")]
    UnmapRefused { base: usize, pages: usize, errno: i32 },
}

/// A provider of whole, zero-filled, read/write pages.
///
/// Engines are generic over this trait so tests can count or observe the
/// traffic; production code uses [`OsPages`].
pub trait PageSource: Send + Sync {
    /// Maps `pages` fresh pages and returns the page-aligned base.
    fn map(&self, pages: usize) -> Result<NonNull<u8>, PageError>;

    /// Releases `pages` pages starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` and `pages` must describe a span (or page-aligned sub-span) that
    /// this source previously granted and that has not been released yet. No
    /// live reference into the span may be used afterwards.
    unsafe fn unmap(&self, base: NonNull<u8>, pages: usize) -> Result<(), PageError>;
}

impl<P: PageSource + ?Sized> PageSource for &P {
    fn map(&self, pages: usize) -> Result<NonNull<u8>, PageError> {
        (**self).map(pages)
    }

    unsafe fn unmap(&self, base: NonNull<u8>, pages: usize) -> Result<(), PageError> {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).unmap(base, pages) }
    }
}

/// Number of pages needed to hold `bytes` (rounded up).
#[inline]
#[must_use]
pub const fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

/// Maps `pages` pages or terminates the process.
pub fn map_pages<P: PageSource + ?Sized>(source: &P, pages: usize) -> NonNull<u8> {
    match source.map(pages) {
        Ok(base) => base,
        Err(err) => fatal(format_args!("map_pages({pages}): {err}")),
    }
}

/// Releases an exact previously granted span.
///
/// # Safety
///
/// Same contract as [`PageSource::unmap`].
pub unsafe fn unmap_pages<P: PageSource + ?Sized>(
    source: &P,
    base: NonNull<u8>,
    pages: usize,
) -> Result<(), PageError> {
    // SAFETY: forwarded caller contract.
    unsafe { source.unmap(base, pages) }
}

/// Writes a diagnostic to stderr and aborts the process.
///
/// Used for the conditions the allocator cannot survive (refused mapping, a
/// sub-page request no size class fits). Nothing on this path allocates.
#[cold]
pub fn fatal(args: fmt::Arguments<'_>) -> ! {
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "hmalloc: fatal: {args}");
    let _ = err.flush();
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_for_rounds_up() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
        assert_eq!(pages_for(10 * PAGE_SIZE - 8), 10);
    }

    #[test]
    fn map_pages_through_reference_source() {
        let source = OsPages;
        let by_ref: &dyn PageSource = &source;
        let base = map_pages(&by_ref, 2);
        assert_eq!(base.as_ptr() as usize % PAGE_SIZE, 0);
        // SAFETY: the span was granted just above.
        unsafe { unmap_pages(&by_ref, base, 2) }.expect("unmap granted span");
    }

    #[test]
    fn errors_render_context() {
        let err = PageError::UnmapRefused {
            base: 0x1000,
            pages: 3,
            errno: 22,
        };
        assert_eq!(
            err.to_string(),
            "unmapping 3 page(s) at 0x1000 refused (errno 22)"
        );
        assert_eq!(
            PageError::MapRefused { pages: 1, errno: 12 }.to_string(),
            "mapping 1 page(s) refused (errno 12)"
        );
    }
}
