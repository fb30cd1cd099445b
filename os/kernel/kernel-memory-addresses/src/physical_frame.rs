use crate::{FRAME_SHIFT, FRAME_SIZE, PhysicalAddress};
use core::fmt;

/// A 4 KiB-aligned frame of physical memory.
///
/// Frames are identified by their start address; the low 12 bits are always
/// zero. This is the unit handed out by the frame allocator and the target of
/// every leaf page-table entry.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalFrame(u64);

impl PhysicalFrame {
    /// The frame that contains `addr` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing_address(addr: PhysicalAddress) -> Self {
        Self(addr.as_u64() & !(FRAME_SIZE - 1))
    }

    /// The frame starting at `addr`, or `None` if `addr` is not 4 KiB-aligned.
    #[inline]
    #[must_use]
    pub const fn from_start_address(addr: PhysicalAddress) -> Option<Self> {
        if addr.is_frame_aligned() {
            Some(Self(addr.as_u64()))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn start_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0)
    }

    /// Frame number, i.e. `start_address / 4096`.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0 >> FRAME_SHIFT
    }

    /// The frame `count` frames above this one, or `None` on overflow.
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

impl fmt::Debug for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}
