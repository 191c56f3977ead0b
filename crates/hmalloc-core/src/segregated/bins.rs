//! Per-thread size-class free lists.
//!
//! A free cell keeps the address of the next free cell in its header word,
//! which is the only word an 8-byte cell has. Each list also tracks a byte
//! budget: the bytes currently sitting on it.

use super::size_class::{NUM_CLASSES, SLAB_SIZE, cell_size, cells_per_slab};
use crate::block::Block;

#[derive(Debug, Clone, Copy)]
struct CellList {
    head: Option<usize>,
    budget: usize,
}

impl CellList {
    const EMPTY: Self = Self {
        head: None,
        budget: 0,
    };
}

/// Ten class lists owned by one thread.
///
/// Every address reachable from a list is a word-aligned cell of that class's
/// size inside memory the owning heap keeps mapped.
#[derive(Debug)]
pub struct Bins {
    lists: [CellList; NUM_CLASSES],
}

fn cell(addr: usize) -> Block {
    // SAFETY: only cells admitted through `install_slab` or `push` are linked,
    // and both make their caller vouch for the memory.
    unsafe { Block::at_addr(addr) }
}

impl Bins {
    pub const fn new() -> Self {
        Self {
            lists: [CellList::EMPTY; NUM_CLASSES],
        }
    }

    /// Bytes currently on `class`'s list.
    pub fn budget(&self, class: usize) -> usize {
        self.lists[class].budget
    }

    /// Counts `class`'s cells by traversal.
    pub fn walk_len(&self, class: usize) -> usize {
        std::iter::successors(self.lists[class].head, |&addr| cell(addr).header_link()).count()
    }

    /// Slices a fresh slab into linked cells and makes it `class`'s list.
    ///
    /// The previous list is dropped, not merged; its cells become unreachable.
    /// Returns how many cells were dropped that way.
    ///
    /// # Safety
    ///
    /// `base` must be a word-aligned region of [`SLAB_SIZE`] bytes, owned by
    /// the caller and kept mapped for the life of the heap.
    pub unsafe fn install_slab(&mut self, class: usize, base: usize) -> usize {
        let size = cell_size(class);
        let count = cells_per_slab(class);
        for i in 0..count {
            let next = (i + 1 < count).then(|| base + (i + 1) * size);
            cell(base + i * size).set_header_link(next);
        }
        let list = &mut self.lists[class];
        let dropped = list.budget / size;
        list.head = Some(base);
        list.budget = SLAB_SIZE;
        dropped
    }

    /// Pops the head cell of `class`.
    pub fn pop(&mut self, class: usize) -> Option<usize> {
        let list = &mut self.lists[class];
        let head = list.head?;
        list.head = cell(head).header_link();
        list.budget = list.budget.saturating_sub(cell_size(class));
        Some(head)
    }

    /// Pushes a cell onto `class`'s list.
    ///
    /// # Safety
    ///
    /// `addr` must be the base of a cell of `class`'s size that nobody else
    /// uses and that stays mapped for the life of the heap.
    pub unsafe fn push(&mut self, class: usize, addr: usize) {
        let list = &mut self.lists[class];
        cell(addr).set_header_link(list.head);
        list.head = Some(addr);
        list.budget += cell_size(class);
    }
}

impl Default for Bins {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slab() -> Vec<usize> {
        vec![0usize; SLAB_SIZE / size_of::<usize>()]
    }

    #[test]
    fn test_install_links_every_cell_in_order() {
        let mut memory = slab();
        let base = memory.as_mut_ptr() as usize;
        let mut bins = Bins::new();
        let class = 4;
        assert_eq!(unsafe { bins.install_slab(class, base) }, 0);
        assert_eq!(bins.budget(class), SLAB_SIZE);
        assert_eq!(bins.walk_len(class), cells_per_slab(class));
        assert_eq!(bins.pop(class), Some(base));
        assert_eq!(bins.pop(class), Some(base + cell_size(class)));
        assert_eq!(bins.budget(class), SLAB_SIZE - 2 * cell_size(class));
    }

    #[test]
    fn test_slab_drains_to_empty() {
        let mut memory = slab();
        let base = memory.as_mut_ptr() as usize;
        let mut bins = Bins::new();
        let class = 9;
        unsafe { bins.install_slab(class, base) };
        for _ in 0..cells_per_slab(class) {
            assert!(bins.pop(class).is_some());
        }
        assert_eq!(bins.pop(class), None);
        assert_eq!(bins.budget(class), 0);
    }

    #[test]
    fn test_push_is_lifo_and_restores_budget() {
        let mut memory = slab();
        let base = memory.as_mut_ptr() as usize;
        let mut bins = Bins::new();
        unsafe { bins.install_slab(0, base) };
        let a = bins.pop(0).expect("cell");
        let b = bins.pop(0).expect("cell");
        unsafe {
            bins.push(0, a);
            bins.push(0, b);
        }
        assert_eq!(bins.budget(0), SLAB_SIZE);
        assert_eq!(bins.pop(0), Some(b));
        assert_eq!(bins.pop(0), Some(a));
    }

    #[test]
    fn test_reinstall_drops_remaining_cells() {
        let mut first = slab();
        let mut second = slab();
        let mut bins = Bins::new();
        let class = 7;
        unsafe { bins.install_slab(class, first.as_mut_ptr() as usize) };
        let _ = bins.pop(class);
        let dropped = unsafe { bins.install_slab(class, second.as_mut_ptr() as usize) };
        assert_eq!(dropped, cells_per_slab(class) - 1);
        assert_eq!(bins.pop(class), Some(second.as_mut_ptr() as usize));
    }

    #[test]
    fn test_classes_are_independent() {
        let mut memory = slab();
        let base = memory.as_mut_ptr() as usize;
        let mut bins = Bins::new();
        unsafe { bins.install_slab(2, base) };
        assert_eq!(bins.pop(3), None);
        assert_eq!(bins.budget(3), 0);
        assert_eq!(bins.walk_len(2), cells_per_slab(2));
    }
}
