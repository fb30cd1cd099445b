//! # Physical and Virtual Memory Address Types
//!
//! Strongly typed wrappers for the raw addresses the memory manager juggles.
//! The frame allocator hands out [`PhysicalFrame`]s, the page-table mapper
//! consumes [`VirtualAddress`]es, and the direct map translates between the two.
//! Keeping the kinds apart at the type level means a physical address can never
//! be dereferenced by accident.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`PhysicalFrame`]   | A 4 KiB-aligned physical frame, the allocator's unit of ownership. |
//! | [`VirtualAddress`]  | A byte address in the current virtual address space. |
//! | [`VirtualPage`]     | A 4 KiB-aligned virtual page. |
//!
//! All types are `#[repr(transparent)]` over `u64` and zero-cost.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0000_0010_2000_0042);
//! let frame = pa.frame();
//! assert_eq!(frame.start_address().as_u64(), 0x0000_0010_2000_0000);
//! assert_eq!(pa.frame_offset(), 0x42);
//!
//! let va = VirtualAddress::new(0xFFFF_FFFF_8000_1234);
//! assert_eq!(va.page().start_address().as_u64(), 0xFFFF_FFFF_8000_1000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod physical_address;
mod physical_frame;
mod virtual_address;
mod virtual_page;

pub use crate::physical_address::PhysicalAddress;
pub use crate::physical_frame::PhysicalFrame;
pub use crate::virtual_address::VirtualAddress;
pub use crate::virtual_page::VirtualPage;

/// Size of a physical frame and of a virtual page, in bytes.
pub const FRAME_SIZE: u64 = 4096;

/// `log2(FRAME_SIZE)`, the number of in-page offset bits.
pub const FRAME_SHIFT: u32 = 12;

const _: () = assert!(1 << FRAME_SHIFT == FRAME_SIZE);

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0, 4096), 0);
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// assert_eq!(align_down(0x12345, 16), 0x12340);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`, or `None` on overflow.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0, 4096), Some(0));
/// assert_eq!(align_up(1, 4096), Some(4096));
/// assert_eq!(align_up(4096, 4096), Some(4096));
/// assert_eq!(align_up(0x12345, 16), Some(0x12350));
/// assert_eq!(align_up(u64::MAX, 16), None);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> Option<u64> {
    debug_assert!(a.is_power_of_two());
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}
