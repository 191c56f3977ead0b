//! Address-ordered intrusive free list with eager coalescing.
//!
//! Each free block stores its span length in the header word and the address
//! of the next free block in the following word. Entries are strictly
//! ascending by address and no two entries touch: every insertion merges with
//! an adjacent left and/or right neighbour.

use thiserror::Error;

use crate::block::{Block, NODE_SIZE, Span};

/// Consistency-walk failures reported by [`FreeList::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FreeListError {
    #[error("free list out of order: {prev:#x} is followed by {next:#x}")]
    Unsorted { prev: usize, next: usize },
    #[error("free blocks {prev:#x} and {next:#x} are adjacent but not merged")]
    Adjacent { prev: usize, next: usize },
    #[error("free blocks {prev:#x} and {next:#x} overlap")]
    Overlapping { prev: usize, next: usize },
    #[error("free block at {base:#x} is {len} bytes, below the node size")]
    Undersized { base: usize, len: usize },
    #[error("free list records {recorded} entries but {walked} were walked")]
    LengthMismatch { recorded: usize, walked: usize },
}

/// How an insertion was absorbed into the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// New entry, no neighbour touched it.
    Plain,
    /// Extended the preceding entry.
    MergedLeft,
    /// Absorbed the following entry.
    MergedRight,
    /// Bridged the preceding and following entries into one.
    MergedBoth,
}

impl Insertion {
    #[must_use]
    pub fn coalesced(self) -> bool {
        !matches!(self, Self::Plain)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::MergedLeft => "merged_left",
            Self::MergedRight => "merged_right",
            Self::MergedBoth => "merged_both",
        }
    }
}

/// Singly linked free list of sub-page blocks.
///
/// Every address reachable from `head` is the base of a word-aligned, mapped
/// region of at least [`NODE_SIZE`] bytes owned by the enclosing allocator.
/// [`FreeList::insert`] is the only way in and carries that obligation.
#[derive(Debug, Default)]
pub struct FreeList {
    head: Option<usize>,
    len: usize,
}

fn node(addr: usize) -> Block {
    // SAFETY: only addresses admitted through `FreeList::insert` are ever
    // linked, and its contract makes each of them a valid free node.
    unsafe { Block::at_addr(addr) }
}

impl FreeList {
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Recorded number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Entries in address order.
    pub fn iter(&self) -> impl Iterator<Item = Span> + '_ {
        std::iter::successors(self.head, |&addr| node(addr).next_link())
            .map(|addr| node(addr).span())
    }

    /// Counts entries by traversal.
    #[must_use]
    pub fn walk_len(&self) -> usize {
        self.iter().count()
    }

    /// Inserts `span` in address order, merging with touching neighbours.
    ///
    /// # Safety
    ///
    /// `span` must be a word-aligned region of at least [`NODE_SIZE`] bytes
    /// that the caller owns, that stays mapped while it is on the list, and
    /// that overlaps no current entry.
    pub unsafe fn insert(&mut self, span: Span) -> Insertion {
        debug_assert!(span.len() >= NODE_SIZE, "span too small for a node");

        let mut prev: Option<Block> = None;
        let mut cur = self.head;
        while let Some(addr) = cur {
            if addr > span.base() {
                break;
            }
            let block = node(addr);
            prev = Some(block);
            cur = block.next_link();
        }

        let left = prev.filter(|p| p.span().precedes(span));
        let right = cur.map(node).filter(|n| span.precedes(n.span()));

        match (left, right) {
            (Some(left), Some(right)) => {
                left.set_header(left.header() + span.len() + right.header());
                left.set_next_link(right.next_link());
                self.len -= 1;
                Insertion::MergedBoth
            }
            (Some(left), None) => {
                left.set_header(left.header() + span.len());
                Insertion::MergedLeft
            }
            (None, right) => {
                // SAFETY: caller contract on `span`.
                let block = unsafe { Block::at_addr(span.base()) };
                let outcome = match right {
                    Some(right) => {
                        block.set_header(span.len() + right.header());
                        block.set_next_link(right.next_link());
                        Insertion::MergedRight
                    }
                    None => {
                        block.set_header(span.len());
                        block.set_next_link(cur);
                        self.len += 1;
                        Insertion::Plain
                    }
                };
                match prev {
                    Some(prev) => prev.set_next_link(Some(block.addr())),
                    None => self.head = Some(block.addr()),
                }
                outcome
            }
        }
    }

    /// Unlinks and returns the lowest-addressed entry of at least `need` bytes.
    pub fn take_first_fit(&mut self, need: usize) -> Option<Span> {
        let mut prev: Option<Block> = None;
        let mut cur = self.head;
        while let Some(addr) = cur {
            let block = node(addr);
            if block.header() >= need {
                let next = block.next_link();
                match prev {
                    Some(prev) => prev.set_next_link(next),
                    None => self.head = next,
                }
                self.len -= 1;
                return Some(block.span());
            }
            prev = Some(block);
            cur = block.next_link();
        }
        None
    }

    /// Walks the list and checks ordering, separation, and the recorded length.
    pub fn verify(&self) -> Result<(), FreeListError> {
        let mut walked = 0usize;
        let mut prev: Option<Span> = None;
        for span in self.iter() {
            if span.len() < NODE_SIZE {
                return Err(FreeListError::Undersized {
                    base: span.base(),
                    len: span.len(),
                });
            }
            if let Some(prev) = prev {
                if prev.base() >= span.base() {
                    return Err(FreeListError::Unsorted {
                        prev: prev.base(),
                        next: span.base(),
                    });
                }
                if prev.precedes(span) {
                    return Err(FreeListError::Adjacent {
                        prev: prev.base(),
                        next: span.base(),
                    });
                }
                if prev.overlaps(span) {
                    return Err(FreeListError::Overlapping {
                        prev: prev.base(),
                        next: span.base(),
                    });
                }
            }
            walked += 1;
            // A cycle would already have failed the ordering check.
            if walked > self.len {
                break;
            }
            prev = Some(span);
        }
        if walked != self.len {
            return Err(FreeListError::LengthMismatch {
                recorded: self.len,
                walked,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Word-aligned scratch memory standing in for a mapped page.
    struct Arena {
        words: Vec<usize>,
    }

    impl Arena {
        fn new(bytes: usize) -> Self {
            Self {
                words: vec![0; bytes / size_of::<usize>()],
            }
        }

        fn base(&mut self) -> usize {
            self.words.as_mut_ptr() as usize
        }

        fn span(&mut self, offset: usize, len: usize) -> Span {
            Span::new(self.base() + offset, len)
        }
    }

    fn offsets(list: &FreeList, base: usize) -> Vec<(usize, usize)> {
        list.iter().map(|s| (s.base() - base, s.len())).collect()
    }

    #[test]
    fn test_plain_inserts_stay_sorted() {
        let mut arena = Arena::new(256);
        let base = arena.base();
        let mut list = FreeList::new();
        unsafe {
            assert_eq!(list.insert(arena.span(128, 16)), Insertion::Plain);
            assert_eq!(list.insert(arena.span(0, 32)), Insertion::Plain);
            assert_eq!(list.insert(arena.span(64, 16)), Insertion::Plain);
        }
        assert_eq!(offsets(&list, base), vec![(0, 32), (64, 16), (128, 16)]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.walk_len(), 3);
        list.verify().expect("consistent");
    }

    #[test]
    fn test_merges_left_right_and_both() {
        let mut arena = Arena::new(256);
        let base = arena.base();
        let mut list = FreeList::new();
        unsafe {
            list.insert(arena.span(0, 32));
            list.insert(arena.span(96, 32));
            assert_eq!(list.insert(arena.span(32, 16)), Insertion::MergedLeft);
            assert_eq!(list.insert(arena.span(80, 16)), Insertion::MergedRight);
            assert_eq!(offsets(&list, base), vec![(0, 48), (80, 48)]);
            assert_eq!(list.insert(arena.span(48, 32)), Insertion::MergedBoth);
        }
        assert_eq!(offsets(&list, base), vec![(0, 128)]);
        assert_eq!(list.len(), 1);
        list.verify().expect("consistent");
    }

    #[test]
    fn test_insert_past_tail_keeps_block() {
        let mut arena = Arena::new(256);
        let base = arena.base();
        let mut list = FreeList::new();
        unsafe {
            list.insert(arena.span(0, 16));
            list.insert(arena.span(64, 16));
            assert_eq!(list.insert(arena.span(160, 32)), Insertion::Plain);
            assert_eq!(list.insert(arena.span(192, 16)), Insertion::MergedLeft);
        }
        assert_eq!(offsets(&list, base), vec![(0, 16), (64, 16), (160, 48)]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_first_fit_takes_lowest_fitting_entry() {
        let mut arena = Arena::new(512);
        let base = arena.base();
        let mut list = FreeList::new();
        unsafe {
            list.insert(arena.span(0, 16));
            list.insert(arena.span(64, 64));
            list.insert(arena.span(256, 128));
        }
        let got = list.take_first_fit(48).expect("fit");
        assert_eq!(got.base() - base, 64);
        assert_eq!(got.len(), 64);
        assert_eq!(offsets(&list, base), vec![(0, 16), (256, 128)]);
        assert!(list.take_first_fit(4096).is_none());
        let head = list.take_first_fit(16).expect("head fits");
        assert_eq!(head.base(), base);
        assert_eq!(list.len(), 1);
        list.verify().expect("consistent");
    }

    #[test]
    fn test_verify_reports_unmerged_neighbours() {
        let mut arena = Arena::new(128);
        let base = arena.base();
        let mut list = FreeList::new();
        unsafe {
            list.insert(arena.span(0, 16));
            list.insert(arena.span(32, 16));
        }
        // Stretch the first entry so it touches the second behind the list's back.
        node(base).set_header(32);
        assert_eq!(
            list.verify(),
            Err(FreeListError::Adjacent {
                prev: base,
                next: base + 32
            })
        );
    }

    #[test]
    fn test_verify_reports_length_drift() {
        let mut arena = Arena::new(64);
        let mut list = FreeList::new();
        unsafe {
            list.insert(arena.span(0, 16));
        }
        list.len = 2;
        assert_eq!(
            list.verify(),
            Err(FreeListError::LengthMismatch {
                recorded: 2,
                walked: 1
            })
        );
        let err = FreeListError::LengthMismatch {
            recorded: 2,
            walked: 1,
        };
        assert_eq!(err.to_string(), "free list records 2 entries but 1 were walked");
    }
}
