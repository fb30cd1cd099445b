use crate::{FRAME_SIZE, VirtualAddress};
use core::fmt;

/// A 4 KiB-aligned virtual page.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u64);

impl VirtualPage {
    /// The page containing `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: VirtualAddress) -> Self {
        Self(addr.as_u64() & !(FRAME_SIZE - 1))
    }

    /// The page starting at `addr`, or `None` if `addr` is not 4 KiB-aligned.
    #[inline]
    #[must_use]
    pub const fn from_start_address(addr: VirtualAddress) -> Option<Self> {
        if addr.page_offset() == 0 {
            Some(Self(addr.as_u64()))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn start_address(self) -> VirtualAddress {
        VirtualAddress::new(self.0)
    }

    /// The page `count` pages above this one, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn forward(self, count: u64) -> Option<Self> {
        let Some(bytes) = count.checked_mul(FRAME_SIZE) else {
            return None;
        };
        match self.0.checked_add(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}
