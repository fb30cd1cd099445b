//! # Page Tables and Virtual Address Indices
//!
//! Every level of the hierarchy is the same shape: one 4 KiB frame holding
//! 512 [`PageEntryBits`]. What differs is which nine bits of the virtual
//! address select the entry.

use crate::PageEntryBits;
use core::fmt;
use kernel_memory_addresses::{FRAME_SIZE, VirtualAddress};

/// Number of entries in a table at any level.
pub const ENTRIES_PER_TABLE: usize = 512;

/// One level of the 4-level hierarchy, root first.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TableLevel {
    /// Root table (PML4). Each entry covers 512 GiB.
    L4,
    /// PDPT. Each entry covers 1 GiB.
    L3,
    /// Page directory. Each entry covers 2 MiB.
    L2,
    /// Page table. Each entry maps one 4 KiB page.
    L1,
}

impl TableLevel {
    /// Levels in walk order.
    pub const WALK: [Self; 4] = [Self::L4, Self::L3, Self::L2, Self::L1];

    /// 4 for the root, 1 for the leaf table.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::L4 => 4,
            Self::L3 => 3,
            Self::L2 => 2,
            Self::L1 => 1,
        }
    }

    /// Bit position of the lowest index bit for this level.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        12 + 9 * (self.number() as u32 - 1)
    }

    /// Bytes covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn entry_span(self) -> u64 {
        1 << self.shift()
    }

    /// The level below, or `None` for L1.
    #[inline]
    #[must_use]
    pub const fn next_lower(self) -> Option<Self> {
        match self {
            Self::L4 => Some(Self::L3),
            Self::L3 => Some(Self::L2),
            Self::L2 => Some(Self::L1),
            Self::L1 => None,
        }
    }

    /// Index into this level's table for `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(self, va: VirtualAddress) -> TableIndex {
        TableIndex::new(((va.as_u64() >> self.shift()) & 0x1FF) as u16)
    }
}

impl fmt::Display for TableLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.number())
    }
}

/// Index into a single table, `0..512`.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    /// ### Debug assertions
    /// - Asserts `v < 512` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Split `va` into its four table indices and the in-page offset.
///
/// Returns `(l4, l3, l2, l1, offset)`, using bits `[47:39]`, `[38:30]`,
/// `[29:21]`, `[20:12]` and `[11:0]`.
///
/// ```rust
/// # use kernel_memory_addresses::VirtualAddress;
/// # use kernel_vmem::split_virtual_address;
/// let (l4, l3, l2, l1, off) = split_virtual_address(VirtualAddress::new(0xFFFF_8888_0123_4567));
/// assert_eq!(
///     (l4.as_usize(), l3.as_usize(), l2.as_usize(), l1.as_usize(), off),
///     (273, 32, 9, 52, 0x567)
/// );
/// ```
#[inline]
#[must_use]
pub const fn split_virtual_address(
    va: VirtualAddress,
) -> (TableIndex, TableIndex, TableIndex, TableIndex, u64) {
    (
        TableLevel::L4.index_of(va),
        TableLevel::L3.index_of(va),
        TableLevel::L2.index_of(va),
        TableLevel::L1.index_of(va),
        va.page_offset(),
    )
}

/// One page table of any level: 512 entries, 4 KiB-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

const _: () = {
    assert!(size_of::<PageTable>() == FRAME_SIZE as usize);
    assert!(align_of::<PageTable>() == FRAME_SIZE as usize);
};

impl PageTable {
    /// A table with every entry non-present.
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntryBits::new(); ENTRIES_PER_TABLE],
        }
    }

    /// Plain load; no TLB synchronization implied.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageEntryBits {
        self.entries[i.as_usize()]
    }

    /// Caller handles TLB invalidation when changing live mappings.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageEntryBits) {
        self.entries[i.as_usize()] = e;
    }

    /// Iterate `(index, entry)` over present entries.
    #[allow(clippy::cast_possible_truncation)]
    pub fn present_entries(&self) -> impl Iterator<Item = (TableIndex, PageEntryBits)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.present())
            .map(|(i, e)| (TableIndex::new(i as u16), *e))
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}
