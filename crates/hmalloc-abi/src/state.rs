//! Default engine instances behind the exported symbols.

use std::cell::RefCell;

use parking_lot::{Mutex, const_mutex};

use hmalloc_core::pages::fatal;
use hmalloc_core::{CoalescingAllocator, OsPages, ThreadHeap, Universe};

static COALESCING: CoalescingAllocator<OsPages> = CoalescingAllocator::new(OsPages);

static UNIVERSE: Universe<OsPages> = Universe::new(OsPages);

// Serves calls that cannot reach their own thread's heap.
static FALLBACK_HEAP: Mutex<ThreadHeap<'static, OsPages>> =
    const_mutex(ThreadHeap::new(&UNIVERSE));

thread_local! {
    static THREAD_HEAP: RefCell<ThreadHeap<'static, OsPages>> =
        RefCell::new(ThreadHeap::new(&UNIVERSE));
}

/// The process-wide coalescing allocator behind `hmalloc`.
pub fn coalescing() -> &'static CoalescingAllocator<OsPages> {
    &COALESCING
}

/// The universe shared by every thread's `opt_malloc` heap.
pub fn universe() -> &'static Universe<OsPages> {
    &UNIVERSE
}

/// Runs `op` against the calling thread's heap.
///
/// When the thread-local heap is unavailable (already destroyed during thread
/// teardown, or borrowed by an outer call), `op` runs on one process-wide
/// fallback heap over the same universe, under its lock. `op` must not call
/// back into `with_thread_heap` from there.
pub fn with_thread_heap<R>(op: impl FnOnce(&mut ThreadHeap<'static, OsPages>) -> R) -> R {
    let mut op = Some(op);
    let served = THREAD_HEAP.try_with(|cell| {
        let mut heap = cell.try_borrow_mut().ok()?;
        op.take().map(|op| op(&mut *heap))
    });
    if let Ok(Some(result)) = served {
        return result;
    }
    match op.take() {
        Some(op) => op(&mut FALLBACK_HEAP.lock()),
        None => fatal(format_args!("thread heap operation consumed without a result")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_heaps_share_the_default_universe() {
        let here = with_thread_heap(|heap| heap.universe() as *const _ as usize);
        let there = std::thread::spawn(|| with_thread_heap(|heap| heap.universe() as *const _ as usize))
            .join()
            .expect("spawned thread");
        assert_eq!(here, there);
        assert_eq!(here, universe() as *const _ as usize);
    }

    #[test]
    fn test_nested_use_falls_back_to_shared_heap() {
        let (outer, inner) = with_thread_heap(|outer| {
            let inner = with_thread_heap(|inner| inner as *const _ as usize);
            (outer as *const _ as usize, inner)
        });
        assert_ne!(outer, inner);
    }

    #[test]
    fn test_fallback_heap_reuses_its_cells() {
        let (before, after, addrs) = with_thread_heap(|_outer| {
            let before = universe().stats().slices;
            let addrs: Vec<usize> = (0..100)
                .map(|_| {
                    let p = with_thread_heap(|heap| heap.opt_malloc(16));
                    with_thread_heap(|heap| unsafe { heap.opt_free(p) });
                    p as usize
                })
                .collect();
            (before, universe().stats().slices, addrs)
        });
        assert!(after - before <= 1, "fallback took {} slices", after - before);
        assert!(addrs.iter().all(|&addr| addr == addrs[0]));
    }
}
