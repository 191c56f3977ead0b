//! Block headers and address spans.
//!
//! This module is the only place that turns addresses into memory accesses.
//! A block is laid out as
//!
//! ```text
//!   base                 base + HEADER_SIZE
//!   |  header (usize)  | payload ...                      |
//!   |  header (usize)  | next link (usize) | ...           |  (free, coalescing engine)
//!   |  next link       | ...                               |  (free cell, segregated engine)
//! ```
//!
//! and the pointer handed to callers is always `base + HEADER_SIZE`.
//! Free-list bookkeeping elsewhere is expressed with [`Span`] `(base, len)`
//! pairs so adjacency and bounds stay checkable with plain arithmetic.

use std::ptr::NonNull;

/// Size of the header word that precedes every payload.
pub const HEADER_SIZE: usize = std::mem::size_of::<usize>();

/// Smallest span able to hold a coalescing free-list node (size + link).
pub const NODE_SIZE: usize = 2 * HEADER_SIZE;

/// Rounds `n` up to a whole number of header words.
#[inline]
#[must_use]
pub const fn word_align(n: usize) -> Option<usize> {
    match n.checked_add(HEADER_SIZE - 1) {
        Some(v) => Some(v & !(HEADER_SIZE - 1)),
        None => None,
    }
}

/// A half-open address range `[base, base + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    base: usize,
    len: usize,
}

impl Span {
    #[must_use]
    pub const fn new(base: usize, len: usize) -> Self {
        Self { base, len }
    }

    #[must_use]
    pub const fn base(self) -> usize {
        self.base
    }

    #[must_use]
    pub const fn len(self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }

    /// One past the last byte.
    #[must_use]
    pub const fn end(self) -> usize {
        self.base + self.len
    }

    /// True when `self` ends exactly where `next` begins.
    #[must_use]
    pub const fn precedes(self, next: Span) -> bool {
        self.end() == next.base
    }

    /// True when the two spans share at least one byte.
    #[must_use]
    pub const fn overlaps(self, other: Span) -> bool {
        self.base < other.end() && other.base < self.end()
    }

    /// Joins `self` with the span that immediately follows it.
    #[must_use]
    pub fn merge(self, next: Span) -> Span {
        debug_assert!(self.precedes(next), "merge of non-adjacent spans");
        Span::new(self.base, self.len + next.len)
    }

    /// Splits into `[base, base + head)` and the remainder.
    #[must_use]
    pub fn split_at(self, head: usize) -> (Span, Span) {
        debug_assert!(head <= self.len, "split beyond span end");
        (
            Span::new(self.base, head),
            Span::new(self.base + head, self.len - head),
        )
    }
}

/// Header view of a block at a fixed base address.
///
/// Accessors are safe; the obligation sits on construction. Every copy of a
/// `Block` may only be used while the bytes it covers stay mapped and owned by
/// the allocator that built it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    base: NonNull<u8>,
}

impl Block {
    /// Views the block whose header starts at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be word-aligned and point to at least [`HEADER_SIZE`]
    /// bytes of mapped, writable memory owned by the caller's allocator
    /// ([`NODE_SIZE`] bytes if [`Block::next_link`] is used) for as long as
    /// the returned value or its copies are used.
    #[must_use]
    pub const unsafe fn at(base: NonNull<u8>) -> Self {
        Self { base }
    }

    /// Like [`Block::at`] for a raw address.
    ///
    /// # Safety
    ///
    /// Same as [`Block::at`]; `addr` must be non-zero.
    #[must_use]
    pub unsafe fn at_addr(addr: usize) -> Self {
        debug_assert!(addr != 0);
        // SAFETY: caller guarantees `addr` is a non-null block base.
        Self {
            base: unsafe { NonNull::new_unchecked(addr as *mut u8) },
        }
    }

    /// Recovers the block from a pointer previously returned to a caller.
    ///
    /// # Safety
    ///
    /// `payload` must have been produced by this crate's allocate path (it is
    /// `base + HEADER_SIZE` of a live block). Anything else is undefined
    /// behavior: the header would be read from foreign memory.
    #[must_use]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        // SAFETY: caller guarantees a header word precedes `payload`.
        Self {
            base: unsafe { payload.sub(HEADER_SIZE) },
        }
    }

    #[must_use]
    pub fn base(self) -> NonNull<u8> {
        self.base
    }

    #[must_use]
    pub fn addr(self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Address handed to the caller (`base + HEADER_SIZE`).
    #[must_use]
    pub fn payload(self) -> NonNull<u8> {
        // SAFETY: construction guarantees at least HEADER_SIZE bytes at base,
        // so base + HEADER_SIZE is in bounds or one past the end.
        unsafe { self.base.add(HEADER_SIZE) }
    }

    fn word(self, index: usize) -> *mut usize {
        debug_assert!(self.addr() % HEADER_SIZE == 0, "misaligned block");
        // SAFETY: index is 0 or 1, both within the contract of `at`.
        unsafe { self.base.as_ptr().cast::<usize>().add(index) }
    }

    /// The header value (size word).
    #[must_use]
    pub fn header(self) -> usize {
        // SAFETY: word 0 is covered by the construction contract.
        unsafe { self.word(0).read() }
    }

    pub fn set_header(self, value: usize) {
        // SAFETY: word 0 is covered by the construction contract.
        unsafe { self.word(0).write(value) }
    }

    /// `(base, header)` as a span.
    #[must_use]
    pub fn span(self) -> Span {
        Span::new(self.addr(), self.header())
    }

    /// Link stored in the word after the header (free coalescing node).
    #[must_use]
    pub fn next_link(self) -> Option<usize> {
        // SAFETY: construction contract covers NODE_SIZE bytes when used.
        let raw = unsafe { self.word(1).read() };
        (raw != 0).then_some(raw)
    }

    pub fn set_next_link(self, next: Option<usize>) {
        // SAFETY: construction contract covers NODE_SIZE bytes when used.
        unsafe { self.word(1).write(next.unwrap_or(0)) }
    }

    /// Link stored in the header word itself (free segregated cell).
    #[must_use]
    pub fn header_link(self) -> Option<usize> {
        let raw = self.header();
        (raw != 0).then_some(raw)
    }

    pub fn set_header_link(self, next: Option<usize>) {
        self.set_header(next.unwrap_or(0));
    }

    /// Copies `len` payload bytes from `self` into `dst`.
    ///
    /// # Safety
    ///
    /// Both payloads must be valid for `len` bytes and must not overlap.
    pub unsafe fn copy_payload_to(self, dst: Block, len: usize) {
        // SAFETY: caller guarantees both ranges are valid and disjoint.
        unsafe {
            std::ptr::copy_nonoverlapping(self.payload().as_ptr(), dst.payload().as_ptr(), len);
        }
    }
}
