//! # Bump Heap
//!
//! Kernel objects that live for the rest of the kernel's run are carved out
//! of one static arena by bumping an offset. Nothing is ever reclaimed:
//! [`BumpHeap::free`] is a no-op.
//!
//! ```text
//!  arena start                      next                     capacity
//!  │◀──────── handed out ──────────▶│◀──────── remaining ───────▶│
//! ```
//!
//! Reservation is a compare-and-swap on the offset, so it never blocks and
//! is safe to use from interrupt handlers and from any core. A request that
//! does not fit leaves the offset untouched.

use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};
use kernel_info::memory::HEAP_ALIGN;
use kernel_vmem::OutOfMemory;

/// Backing storage, aligned to the allocation granule.
#[repr(C, align(16))]
struct HeapArena<const N: usize>(UnsafeCell<MaybeUninit<[u8; N]>>);

const _: () = assert!(align_of::<HeapArena<1>>() == HEAP_ALIGN);

/// A bump allocator over an `N`-byte arena embedded in the value.
///
/// Meant to live in a `static`:
///
/// ```rust
/// use kernel_alloc::bump_heap::BumpHeap;
///
/// static HEAP: BumpHeap<4096> = BumpHeap::new();
///
/// let a = HEAP.allocate(10).unwrap();
/// let b = HEAP.allocate(1).unwrap();
/// assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 16);
/// assert_eq!(HEAP.used(), 32);
/// ```
pub struct BumpHeap<const N: usize> {
    arena: HeapArena<N>,
    /// Bytes handed out so far; never exceeds `N`.
    next: AtomicUsize,
}

// Safety: the arena is only reached through disjoint reservations.
unsafe impl<const N: usize> Sync for BumpHeap<N> {}

impl<const N: usize> Default for BumpHeap<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> BumpHeap<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            arena: HeapArena(UnsafeCell::new(MaybeUninit::uninit())),
            next: AtomicUsize::new(0),
        }
    }

    /// Reserve `size` bytes rounded up to the 16-byte granule.
    ///
    /// A zero-size request still reserves one granule, so every call returns
    /// a distinct address.
    ///
    /// # Errors
    /// [`OutOfMemory`] if the arena can't fit the request.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, OutOfMemory> {
        self.allocate_aligned(size, HEAP_ALIGN)
    }

    /// [`allocate`](Self::allocate), then zero-fill the region.
    ///
    /// # Errors
    /// [`OutOfMemory`] if the arena can't fit the request.
    pub fn allocate_zeroed(&self, size: usize) -> Result<NonNull<u8>, OutOfMemory> {
        let p = self.allocate(size)?;
        unsafe { ptr::write_bytes(p.as_ptr(), 0, size) };
        Ok(p)
    }

    /// Reserve `size` bytes at an address aligned to `align`.
    ///
    /// `align` must be a power of two; values below the granule are raised
    /// to it. Padding skipped for alignment is lost.
    ///
    /// # Errors
    /// [`OutOfMemory`] if the arena can't fit the request, or if `align` is
    /// not a power of two.
    pub fn allocate_aligned(&self, size: usize, align: usize) -> Result<NonNull<u8>, OutOfMemory> {
        if !align.is_power_of_two() {
            return Err(OutOfMemory);
        }
        let align = align.max(HEAP_ALIGN);
        let size = round_up(size.max(1), HEAP_ALIGN).ok_or(OutOfMemory)?;
        let base = self.base();
        let base_addr = base.addr();

        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let start = round_up(base_addr + current, align).ok_or(OutOfMemory)? - base_addr;
            let end = start.checked_add(size).ok_or(OutOfMemory)?;
            if end > N {
                log::warn!("kernel heap exhausted: {size} bytes requested, {} left", N - current);
                return Err(OutOfMemory);
            }

            match self
                .next
                .compare_exchange_weak(current, end, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return NonNull::new(base.wrapping_add(start)).ok_or(OutOfMemory),
                Err(observed) => current = observed,
            }
        }
    }

    /// No-op. Bump allocations live until the kernel stops.
    pub fn free(&self, ptr: NonNull<u8>) {
        debug_assert!(self.contains(ptr), "freeing {ptr:p} outside the heap arena");
    }

    /// Whether `ptr` points into the handed-out part of the arena.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let start = self.base().addr();
        (start..start + self.used()).contains(&ptr.addr().get())
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        N - self.used()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    const fn base(&self) -> *mut u8 {
        self.arena.0.get().cast::<u8>()
    }
}

const fn round_up(x: usize, a: usize) -> Option<usize> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}

unsafe impl<const N: usize> GlobalAlloc for BumpHeap<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocate_aligned(layout.size(), layout.align())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_round_to_sixteen() {
        let heap = BumpHeap::<256>::new();
        let a = heap.allocate(1).unwrap();
        let b = heap.allocate(17).unwrap();
        let c = heap.allocate(0).unwrap();
        assert_eq!(a.as_ptr() as usize % 16, 0);
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 16);
        assert_eq!(c.as_ptr() as usize - b.as_ptr() as usize, 32);
        assert_eq!(heap.used(), 64);
        assert_eq!(heap.remaining(), 192);
    }

    #[test]
    fn exhaustion_fails_and_keeps_earlier_allocations() {
        let heap = BumpHeap::<64>::new();
        let a = heap.allocate(32).unwrap();
        unsafe { a.as_ptr().write_bytes(0xAB, 32) };

        assert_eq!(heap.allocate(48), Err(OutOfMemory));
        assert_eq!(heap.used(), 32, "failed request leaves the offset alone");

        let b = heap.allocate(32).unwrap();
        assert_eq!(heap.remaining(), 0);
        assert_eq!(heap.allocate(1), Err(OutOfMemory));

        let first = unsafe { core::slice::from_raw_parts(a.as_ptr(), 32) };
        assert!(first.iter().all(|&x| x == 0xAB));
        assert!(heap.contains(a) && heap.contains(b));
    }

    #[test]
    fn huge_requests_do_not_overflow() {
        let heap = BumpHeap::<64>::new();
        assert_eq!(heap.allocate(usize::MAX), Err(OutOfMemory));
        assert_eq!(heap.allocate(usize::MAX - 8), Err(OutOfMemory));
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn zeroed_allocation_is_zero() {
        let heap = BumpHeap::<128>::new();
        let dirty = heap.allocate(64).unwrap();
        unsafe { dirty.as_ptr().write_bytes(0xFF, 64) };
        let clean = heap.allocate_zeroed(40).unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(clean.as_ptr(), 40) };
        assert!(bytes.iter().all(|&x| x == 0));
    }

    #[test]
    fn aligned_allocation() {
        let heap = BumpHeap::<8192>::new();
        heap.allocate(16).unwrap();
        let page = heap.allocate_aligned(100, 4096).unwrap();
        assert_eq!(page.as_ptr() as usize % 4096, 0);
        assert!(heap.allocate_aligned(8, 24).is_err());
    }

    #[test]
    fn free_is_a_no_op() {
        let heap = BumpHeap::<64>::new();
        let a = heap.allocate(16).unwrap();
        heap.free(a);
        assert_eq!(heap.used(), 16);
        assert_ne!(heap.allocate(16).unwrap(), a);
    }

    #[test]
    fn global_alloc_honours_layout() {
        let heap = BumpHeap::<1024>::new();
        let layout = Layout::from_size_align(24, 64).unwrap();
        let p = unsafe { heap.alloc(layout) };
        assert!(!p.is_null());
        assert_eq!(p as usize % 64, 0);
        unsafe { heap.dealloc(p, layout) };

        let too_big = Layout::from_size_align(2048, 8).unwrap();
        assert!(unsafe { heap.alloc(too_big) }.is_null());
    }
}
