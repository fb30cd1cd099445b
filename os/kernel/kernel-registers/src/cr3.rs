#[cfg(all(feature = "asm", target_arch = "x86_64"))]
use crate::LoadRegisterUnsafe;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{FRAME_SHIFT, PhysicalAddress, PhysicalFrame};

/// CR3: Page-Map Level-4 Base Register (IA-32e, PCID disabled).
///
/// Holds the physical frame of the root (L4) page table and the cache-control
/// flags used when the walker reads it.
#[bitfield(u64)]
pub struct Cr3 {
    /// Bits 0–2: Reserved (must be 0).
    #[bits(3)]
    __: u8,

    /// Bit 3: PWT: Page-level Write-Through for the root table.
    pub pwt: bool,

    /// Bit 4: PCD: Page-level Cache Disable for the root table.
    pub pcd: bool,

    /// Bits 5–11: Reserved.
    #[bits(7)]
    __: u8,

    /// Bits 12–51: root table frame number.
    #[bits(40)]
    root_frame_number: u64,

    /// Bits 52–63: Reserved.
    #[bits(12)]
    __: u16,
}

impl Cr3 {
    /// CR3 value pointing at `root` with write-back caching.
    #[must_use]
    pub const fn from_root(root: PhysicalFrame) -> Self {
        Self::new().with_root_frame_number(root.number())
    }

    /// The frame holding the root (L4) page table.
    #[must_use]
    pub const fn root(&self) -> PhysicalFrame {
        PhysicalFrame::containing_address(PhysicalAddress::new(
            self.root_frame_number() << FRAME_SHIFT,
        ))
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}
