#![no_main]
use libfuzzer_sys::fuzz_target;

use hmalloc_core::{CoalescingAllocator, LogConfig, OsPages};

// Shared across inputs so sub-page memory is reused instead of piling up.
static HEAP: CoalescingAllocator<OsPages> =
    CoalescingAllocator::with_config(OsPages, LogConfig::silent());

// Each 4-byte chunk is one operation: [op, size_lo, size_hi, slot].
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let heap = &HEAP;
    let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();

    for chunk in data.chunks_exact(4) {
        let size = usize::from(u16::from_le_bytes([chunk[1], chunk[2]])) % 20_000;
        let tag = chunk[3];
        match chunk[0] % 3 {
            0 => {
                let p = heap.allocate(size);
                if size == 0 {
                    assert!(p.is_null());
                    continue;
                }
                unsafe { p.write_bytes(tag, size) };
                live.push((p, size, tag));
            }
            1 if !live.is_empty() => {
                let (p, size, tag) = live.swap_remove(usize::from(chunk[3]) % live.len());
                let bytes = unsafe { std::slice::from_raw_parts(p, size) };
                assert!(bytes.iter().all(|&b| b == tag));
                unsafe { heap.free(p) };
            }
            2 if !live.is_empty() => {
                let idx = usize::from(chunk[3]) % live.len();
                let (p, old, old_tag) = live[idx];
                let q = unsafe { heap.reallocate(p, size) };
                if size == 0 {
                    assert!(q.is_null());
                    live.swap_remove(idx);
                    continue;
                }
                let kept = unsafe { std::slice::from_raw_parts(q, old.min(size)) };
                assert!(kept.iter().all(|&b| b == old_tag));
                unsafe { q.write_bytes(tag, size) };
                live[idx] = (q, size, tag);
            }
            _ => {}
        }
        assert!(heap.verify().is_ok());
    }

    for (p, _, _) in live {
        unsafe { heap.free(p) };
    }
    assert!(heap.verify().is_ok());
    let stats = heap.get_stats();
    assert_eq!(stats.chunks_allocated, stats.chunks_freed);
});
