//! # Virtual Memory Support
//!
//! x86-64 4-level paging for the kernel: entry bits, page tables, and an
//! [`AddressSpace`] that maps virtual pages on demand.
//!
//! ## What you get
//! - [`PageEntryBits`]: a typed 64-bit page-table entry.
//! - [`PageTable`], [`TableLevel`], [`TableIndex`] and
//!   [`split_virtual_address`].
//! - The seams the mapper is generic over: [`FrameAlloc`] (where table and
//!   leaf frames come from) and [`PhysMapper`] (how a physical frame is
//!   reached before it is mapped anywhere).
//! - [`AddressSpace::map`], [`AddressSpace::map_to`], [`AddressSpace::query`].
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L4   |  L3   |  L2   |  L1   | Offset |
//! ```
//!
//! Each index selects one of 512 eight-byte entries in a 4 KiB table.
//!
//! ```text
//!  L4  →  L3  →  L2  →  L1  →  Physical Page
//!               │      │
//!               │      └──► PS=1 → 2 MiB leaf
//!               └─────────► PS=1 → 1 GiB leaf
//! ```
//!
//! | Level | Table name | Entry covers |
//! |:------|:-----------|:-------------|
//! | L4 | PML4, referenced by CR3 | 512 GiB |
//! | L3 | PDPT | 1 GiB |
//! | L2 | Page directory | 2 MiB |
//! | L1 | Page table | 4 KiB |

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod page_entry_bits;
mod page_table;

pub use crate::address_space::{AddressSpace, MapError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{
    ENTRIES_PER_TABLE, PageTable, TableIndex, TableLevel, split_virtual_address,
};
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame, VirtualAddress};

/// No free memory left in the frame pool, heap arena, or virtual window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("out of memory")]
pub struct OutOfMemory;

/// Source of physical 4 KiB frames.
///
/// Returned frames are exclusively owned by the caller until handed back via
/// [`free_4k`](Self::free_4k).
pub trait FrameAlloc {
    /// Allocate one frame. Its contents are unspecified.
    ///
    /// # Errors
    /// [`OutOfMemory`] when no frame is left.
    fn alloc_4k(&mut self) -> Result<PhysicalFrame, OutOfMemory>;

    /// Allocate one frame and fill it with zeros.
    ///
    /// Used for new page-table levels, so stale bytes are never read as
    /// present entries.
    ///
    /// # Errors
    /// [`OutOfMemory`] when no frame is left.
    fn alloc_4k_zeroed(&mut self) -> Result<PhysicalFrame, OutOfMemory>;

    /// Hand a frame back.
    fn free_4k(&mut self, frame: PhysicalFrame);
}

/// Reaches physical memory through the current virtual address space
/// (e.g. via a higher-half direct map).
pub trait PhysMapper {
    /// The virtual alias of `pa`.
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress;

    /// Raw pointer to `pa` through its alias.
    #[inline]
    fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        self.phys_to_virt(pa).as_mut_ptr()
    }

    /// Mutable reference to a `T` at `pa`.
    ///
    /// # Safety
    /// - `pa` must be mapped writable through the alias for `'a`.
    /// - The bytes at `pa` must be a valid `T`, properly aligned.
    /// - No other reference to the same bytes may be live for `'a`.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_ptr::<T>(pa) }
    }

    /// Fill `frame` with zeros through its alias.
    ///
    /// # Safety
    /// The caller must own `frame`; nothing else may be reading it.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn zero_frame(&self, frame: PhysicalFrame) {
        unsafe {
            core::ptr::write_bytes(
                self.phys_to_ptr::<u8>(frame.start_address()),
                0,
                FRAME_SIZE as usize,
            );
        }
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        (**self).phys_to_virt(pa)
    }
}
