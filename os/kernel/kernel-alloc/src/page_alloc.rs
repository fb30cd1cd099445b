//! Virtual page ranges handed out from a fixed window.
//!
//! Device mappings need virtual addresses nobody else uses, but are never
//! torn down, so a lock-free bump over the window is enough.

use core::sync::atomic::{AtomicU64, Ordering};
use kernel_memory_addresses::{FRAME_SIZE, VirtualAddress, VirtualPage};
use kernel_vmem::OutOfMemory;

/// Bump allocator for page-aligned virtual ranges in `[start, end)`.
#[derive(Debug)]
pub struct VirtualPageAlloc {
    next: AtomicU64,
    end: u64,
}

impl VirtualPageAlloc {
    /// Both bounds are rounded down to a page boundary.
    #[must_use]
    pub const fn new(start: VirtualAddress, end: VirtualAddress) -> Self {
        Self {
            next: AtomicU64::new(start.page().start_address().as_u64()),
            end: end.page().start_address().as_u64(),
        }
    }

    /// Reserve `pages` consecutive pages and return the first.
    ///
    /// # Errors
    /// [`OutOfMemory`] when the window has fewer than `pages` pages left.
    /// The window is left unchanged in that case.
    pub fn alloc(&self, pages: u64) -> Result<VirtualPage, OutOfMemory> {
        let bytes = pages.max(1).checked_mul(FRAME_SIZE).ok_or(OutOfMemory)?;
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let end = current.checked_add(bytes).ok_or(OutOfMemory)?;
            if end > self.end {
                log::warn!("virtual window exhausted: {pages} pages requested");
                return Err(OutOfMemory);
            }
            match self
                .next
                .compare_exchange_weak(current, end, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return Ok(VirtualAddress::new(current).page()),
                Err(observed) => current = observed,
            }
        }
    }

    #[must_use]
    pub fn remaining_pages(&self) -> u64 {
        self.end.saturating_sub(self.next.load(Ordering::Relaxed)) / FRAME_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0xFFFF_E000_0000_0000;

    #[test]
    fn hands_out_consecutive_ranges() {
        let window = VirtualPageAlloc::new(
            VirtualAddress::new(BASE),
            VirtualAddress::new(BASE + 4 * FRAME_SIZE),
        );
        assert_eq!(window.alloc(1).unwrap().start_address().as_u64(), BASE);
        assert_eq!(window.alloc(2).unwrap().start_address().as_u64(), BASE + FRAME_SIZE);
        assert_eq!(window.remaining_pages(), 1);
        assert_eq!(window.alloc(2), Err(OutOfMemory));
        assert_eq!(window.remaining_pages(), 1);
        assert_eq!(window.alloc(1).unwrap().start_address().as_u64(), BASE + 3 * FRAME_SIZE);
        assert_eq!(window.alloc(1), Err(OutOfMemory));
    }

    #[test]
    fn overflowing_requests_fail() {
        let window = VirtualPageAlloc::new(VirtualAddress::new(BASE), VirtualAddress::new(u64::MAX));
        assert_eq!(window.alloc(u64::MAX), Err(OutOfMemory));
        assert_eq!(window.alloc(1 << 60), Err(OutOfMemory));
    }
}
