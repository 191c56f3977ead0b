//! Anonymous private mappings via `mmap(2)` / `munmap(2)`.

use std::ptr::NonNull;

use super::{PAGE_SIZE, PageError, PageSource};

/// Page source backed by the operating system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsPages;

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

impl PageSource for OsPages {
    fn map(&self, pages: usize) -> Result<NonNull<u8>, PageError> {
        if pages == 0 {
            return Err(PageError::ZeroPages);
        }
        let len = pages
            .checked_mul(PAGE_SIZE)
            .ok_or(PageError::Overflow { pages })?;
        // SAFETY: anonymous private mapping with no address hint; the kernel
        // picks the placement and does not touch existing mappings.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(PageError::MapRefused {
                pages,
                errno: last_errno(),
            });
        }
        NonNull::new(ptr.cast::<u8>()).ok_or(PageError::MapRefused { pages, errno: 0 })
    }

    unsafe fn unmap(&self, base: NonNull<u8>, pages: usize) -> Result<(), PageError> {
        if pages == 0 {
            return Err(PageError::ZeroPages);
        }
        let len = pages
            .checked_mul(PAGE_SIZE)
            .ok_or(PageError::Overflow { pages })?;
        // SAFETY: caller guarantees the span was granted by `map` and is no
        // longer referenced.
        let rc = unsafe { libc::munmap(base.as_ptr().cast(), len) };
        if rc != 0 {
            return Err(PageError::UnmapRefused {
                base: base.as_ptr() as usize,
                pages,
                errno: last_errno(),
            });
        }
        Ok(())
    }
}
