use bitfield_struct::bitfield;
use kernel_memory_addresses::{FRAME_SHIFT, PhysicalAddress, PhysicalFrame};

/// A single 64-bit x86-64 page-table entry in its raw bitfield form.
///
/// The same layout is used at every level (L4 … L1). Whether an entry is a
/// pointer to the next table or a leaf depends on the level and on `PS`.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed (set by hardware) |
/// | 6         | `D`               | Dirty (set by hardware, leaf only) |
/// | 7         | `PS`              | Large page flag (PAT at L1) |
/// | 8         | `G`               | Global (leaf only) |
/// | 9–11      | OS avail low      | Reserved for OS use |
/// | 12–51     | `addr`            | Physical frame bits [51:12] |
/// | 52–58     | OS avail high     | Reserved for OS use |
/// | 59–62     | `PKU` / OS use    | Protection key or OS use |
/// | 63        | `NX`              | Execute disable |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame};
/// # use kernel_vmem::PageEntryBits;
/// let frame = PhysicalFrame::containing_address(PhysicalAddress::new(0x12345));
/// let e = PageEntryBits::kernel_data().with_frame(frame);
/// assert!(e.present());
/// assert_eq!(e.physical_address().as_u64(), 0x12000);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU; not a permission bit.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on the first write through a leaf.
    pub dirty: bool,

    /// Large Page / Page Size (PS, bit 7).
    ///
    /// At L3 and L2 a set bit makes the entry a 1 GiB or 2 MiB leaf.
    /// At L4 it must be clear; at L1 the position is PAT.
    pub large_page: bool,

    /// Global (G, bit 8). Leaf only.
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available_low: u8,

    /// Physical address bits [51:12].
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection Key (bits 59..=62) if PKU is enabled; otherwise OS use.
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    /// Bits compared when a walk meets an entry that is already present:
    /// P, RW, US, PWT, PCD, PS, G and NX.
    ///
    /// Accessed and Dirty are written by the CPU and the address differs per
    /// entry, so neither takes part.
    pub const PERMISSION_MASK: u64 = 0x19F | (1 << 63);

    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_51_12(phys.as_u64() >> FRAME_SHIFT);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << FRAME_SHIFT)
    }

    /// The 4 KiB frame this entry points at.
    #[inline]
    #[must_use]
    pub const fn physical_frame(&self) -> PhysicalFrame {
        PhysicalFrame::containing_address(self.physical_address())
    }

    /// Copy of `self` pointing at `frame`.
    #[inline]
    #[must_use]
    pub const fn with_frame(self, frame: PhysicalFrame) -> Self {
        self.with_phys_addr_bits_51_12(frame.number())
    }

    /// The permission subset of this entry, see [`PERMISSION_MASK`](Self::PERMISSION_MASK).
    #[inline]
    #[must_use]
    pub const fn permission_bits(self) -> u64 {
        self.into_bits() & Self::PERMISSION_MASK
    }

    /// Only the permission bits of `self`, with `P` set and `PS` cleared.
    ///
    /// This is the form requested flags take before they are written or
    /// compared.
    #[inline]
    #[must_use]
    pub const fn normalized(self) -> Self {
        Self::from_bits(self.permission_bits())
            .with_present(true)
            .with_large_page(false)
    }

    /// Present, writable, supervisor-only, not executable.
    #[inline]
    #[must_use]
    pub const fn kernel_data() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_no_execute(true)
    }

    /// Present, writable, supervisor-only, executable.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// Present, writable, user-accessible, not executable.
    #[inline]
    #[must_use]
    pub const fn user_data() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_no_execute(true)
    }

    /// Device memory: writable, uncached, not executable.
    #[inline]
    #[must_use]
    pub const fn mmio() -> Self {
        Self::kernel_data()
            .with_write_through(true)
            .with_cache_disabled(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_mask_ignores_hardware_bits_and_address() {
        let frame = PhysicalFrame::containing_address(PhysicalAddress::new(0x7000));
        let written = PageEntryBits::kernel_data().with_frame(frame);
        let touched = written.with_accessed(true).with_dirty(true);
        assert_eq!(written.permission_bits(), touched.permission_bits());

        let elsewhere = PageEntryBits::kernel_data()
            .with_frame(PhysicalFrame::containing_address(PhysicalAddress::new(0x9000)));
        assert_eq!(written.permission_bits(), elsewhere.permission_bits());
    }

    #[test]
    fn permission_mask_sees_every_access_bit() {
        let base = PageEntryBits::kernel_rw();
        for other in [
            base.with_writable(false),
            base.with_user_access(true),
            base.with_write_through(true),
            base.with_cache_disabled(true),
            base.with_large_page(true),
            base.with_global_translation(true),
            base.with_no_execute(true),
        ] {
            assert_ne!(base.permission_bits(), other.permission_bits());
        }
    }

    #[test]
    fn normalized_keeps_permissions_only() {
        let raw = PageEntryBits::from_bits(0x8000_0000_0012_3067 | (1 << 7));
        let n = raw.normalized();
        assert!(n.present());
        assert!(!n.large_page());
        assert!(!n.accessed());
        assert!(!n.dirty());
        assert_eq!(n.physical_address().as_u64(), 0);
        assert!(n.no_execute());
        assert!(n.user_access());
    }

    #[test]
    fn address_round_trip() {
        let mut e = PageEntryBits::new();
        e.set_physical_address(PhysicalAddress::new(0x000F_FFFF_FFFF_F000));
        assert_eq!(e.physical_address().as_u64(), 0x000F_FFFF_FFFF_F000);
        assert_eq!(e.into_bits() & 0xFFF, 0);
    }

    #[test]
    fn mmio_is_uncached() {
        let e = PageEntryBits::mmio();
        assert!(e.cache_disabled() && e.write_through() && e.no_execute());
    }
}
