#![cfg(target_os = "linux")]
#![allow(unsafe_code)]

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use hmalloc_core::{
    CoalescingAllocator, HEADER_SIZE, LogConfig, OsPages, PAGE_SIZE, PageError, PageSource,
};

/// Page source that forwards to the OS and counts the traffic.
#[derive(Default)]
struct CountingPages {
    mapped: AtomicUsize,
    unmapped: AtomicUsize,
    map_calls: AtomicUsize,
}

impl PageSource for CountingPages {
    fn map(&self, pages: usize) -> Result<NonNull<u8>, PageError> {
        self.map_calls.fetch_add(1, Ordering::Relaxed);
        self.mapped.fetch_add(pages, Ordering::Relaxed);
        OsPages.map(pages)
    }

    unsafe fn unmap(&self, base: NonNull<u8>, pages: usize) -> Result<(), PageError> {
        self.unmapped.fetch_add(pages, Ordering::Relaxed);
        // SAFETY: forwarded caller contract.
        unsafe { OsPages.unmap(base, pages) }
    }
}

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

fn stamp(ptr: *mut u8, len: usize, tag: u8) {
    // SAFETY: callers pass a live payload of at least `len` bytes.
    unsafe { ptr::write_bytes(ptr, tag, len) };
}

fn stamped(ptr: *const u8, len: usize, tag: u8) -> bool {
    // SAFETY: callers pass a live payload of at least `len` bytes.
    unsafe { std::slice::from_raw_parts(ptr, len) }
        .iter()
        .all(|&b| b == tag)
}

#[test]
fn stats_mirror_page_source_traffic() {
    let heap = CoalescingAllocator::with_config(CountingPages::default(), LogConfig::silent());
    let small = heap.allocate(10);
    let large = heap.allocate(5 * PAGE_SIZE);
    unsafe {
        heap.free(small);
        heap.free(large);
    }
    let stats = heap.get_stats();
    let source = heap.page_source();
    assert_eq!(stats.pages_mapped as usize, source.mapped.load(Ordering::Relaxed));
    assert_eq!(stats.pages_unmapped as usize, source.unmapped.load(Ordering::Relaxed));
    assert_eq!(stats.pages_mapped, 1 + 6);
    assert_eq!(stats.pages_unmapped, 6);
    assert_eq!(source.map_calls.load(Ordering::Relaxed), 2);
}

#[test]
fn sub_page_blocks_are_never_unmapped() {
    let heap = CoalescingAllocator::with_config(CountingPages::default(), LogConfig::silent());
    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);
    let ptrs: Vec<*mut u8> = (0..500)
        .map(|_| heap.allocate(1 + rng.below(PAGE_SIZE - 2 * HEADER_SIZE)))
        .collect();
    for p in ptrs {
        unsafe { heap.free(p) };
    }
    assert_eq!(heap.page_source().unmapped.load(Ordering::Relaxed), 0);
    heap.verify().expect("free list invariants");
    let spans = heap.free_spans();
    assert_eq!(spans.len(), heap.free_list_length());
    let free_bytes: usize = spans.iter().map(|s| s.len()).sum();
    let mapped = heap.get_stats().pages_mapped as usize * PAGE_SIZE;
    // Only orphaned tails of at most one word per block can go missing.
    assert!(free_bytes <= mapped);
    assert!(mapped - free_bytes < 500 * HEADER_SIZE);
}

#[test]
fn free_order_does_not_change_final_layout() {
    let sizes = [24usize, 40, 100, 8, 500, 72, 16, 300];
    let mut layouts = Vec::new();
    for order in [
        vec![0, 1, 2, 3, 4, 5, 6, 7],
        vec![7, 6, 5, 4, 3, 2, 1, 0],
        vec![3, 0, 6, 1, 7, 2, 5, 4],
    ] {
        let heap = CoalescingAllocator::with_config(OsPages, LogConfig::silent());
        let ptrs: Vec<*mut u8> = sizes.iter().map(|&s| heap.allocate(s)).collect();
        for i in order {
            unsafe { heap.free(ptrs[i]) };
            heap.verify().expect("free list invariants");
        }
        let spans = heap.free_spans();
        assert_eq!(spans.len(), 1, "everything came from one page");
        layouts.push(spans[0].len());
    }
    assert!(layouts.iter().all(|&len| len == PAGE_SIZE));
}

#[test]
fn randomized_trace_keeps_payloads_and_invariants() {
    let heap = CoalescingAllocator::with_config(OsPages, LogConfig::silent());
    let mut rng = XorShift(0xdead_beef_cafe_f00d);
    let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();

    for step in 0..4_000usize {
        match rng.below(10) {
            0..=5 => {
                let size = if rng.below(20) == 0 {
                    PAGE_SIZE + rng.below(3 * PAGE_SIZE)
                } else {
                    1 + rng.below(900)
                };
                let tag = (step % 251) as u8;
                let p = heap.allocate(size);
                assert!(!p.is_null());
                stamp(p, size, tag);
                live.push((p, size, tag));
            }
            6..=8 if !live.is_empty() => {
                let (p, size, tag) = live.swap_remove(rng.below(live.len()));
                assert!(stamped(p, size, tag), "corruption before free at step {step}");
                unsafe { heap.free(p) };
            }
            _ if !live.is_empty() => {
                let idx = rng.below(live.len());
                let (p, size, tag) = live[idx];
                let new_size = 1 + rng.below(1500);
                let q = unsafe { heap.reallocate(p, new_size) };
                assert!(stamped(q, size.min(new_size), tag), "realloc lost data at step {step}");
                stamp(q, new_size, tag);
                live[idx] = (q, new_size, tag);
            }
            _ => {}
        }
        if step % 250 == 0 {
            heap.verify().expect("free list invariants");
        }
    }

    let stats = heap.get_stats();
    assert_eq!(stats.chunks_allocated - stats.chunks_freed, live.len() as i64);
    for (p, size, tag) in live {
        assert!(stamped(p, size, tag));
        unsafe { heap.free(p) };
    }
    heap.verify().expect("free list invariants");
    let stats = heap.get_stats();
    assert_eq!(stats.chunks_allocated, stats.chunks_freed);
    assert_eq!(stats.free_length as usize, heap.free_list_length());
}

#[test]
fn threads_share_one_locked_free_list() {
    let heap = CoalescingAllocator::with_config(OsPages, LogConfig::silent());
    std::thread::scope(|scope| {
        for t in 0..4u64 {
            let heap = &heap;
            scope.spawn(move || {
                let mut rng = XorShift(0x1234_5678 + t);
                let mut live = Vec::new();
                for i in 0..1_000usize {
                    let size = 1 + rng.below(256);
                    let tag = (t as u8) ^ (i as u8);
                    let p = heap.allocate(size);
                    stamp(p, size, tag);
                    live.push((p, size, tag));
                    if live.len() > 32 {
                        let (p, size, tag) = live.swap_remove(rng.below(live.len()));
                        assert!(stamped(p, size, tag));
                        unsafe { heap.free(p) };
                    }
                }
                for (p, size, tag) in live {
                    assert!(stamped(p, size, tag));
                    unsafe { heap.free(p) };
                }
            });
        }
    });
    heap.verify().expect("free list invariants");
    let stats = heap.get_stats();
    assert_eq!(stats.chunks_allocated, 4_000);
    assert_eq!(stats.chunks_freed, 4_000);
}

#[test]
fn stats_snapshot_serializes_to_json() {
    let heap = CoalescingAllocator::with_config(OsPages, LogConfig::silent());
    let p = heap.allocate(64);
    let json = serde_json::to_value(heap.get_stats()).expect("serialize stats");
    assert_eq!(json["pages_mapped"], 1);
    assert_eq!(json["chunks_allocated"], 1);
    assert_eq!(json["chunks_freed"], 0);
    assert_eq!(json["free_length"], 1);
    unsafe { heap.free(p) };
}
