//! # Direct-Map Address Translation
//!
//! The boot loader maps all physical memory at a fixed virtual offset, the
//! higher-half direct map (HHDM). Physical address `pa` is then reachable at
//! `offset + pa` before any dedicated mapping exists. The frame allocator
//! writes its free-list nodes through this alias, and the page-table mapper
//! reads and writes table frames through it.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::HhdmPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let hhdm = HhdmPhysMapper::new(0xffff_8000_0000_0000);
//! let va = hhdm.physical_to_virtual(PhysicalAddress::new(0x1234_5000));
//! assert_eq!(va.as_u64(), 0xffff_8000_1234_5000);
//! ```

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for a higher-half direct map at a boot-provided offset.
///
/// # Safety
/// - The direct map must cover every physical address passed in.
/// - Pointers derived from it are only valid while that mapping stays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HhdmPhysMapper {
    offset: u64,
}

impl HhdmPhysMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// `offset + pa`. Pure and total; wraps like the hardware would.
    #[inline]
    #[must_use]
    pub const fn physical_to_virtual(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(self.offset.wrapping_add(pa.as_u64()))
    }
}

impl PhysMapper for HhdmPhysMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        self.physical_to_virtual(pa)
    }
}
