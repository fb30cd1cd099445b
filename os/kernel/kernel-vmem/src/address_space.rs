//! # Address Space (x86-64, 4-level)
//!
//! A handle on one page-table hierarchy rooted at an L4 frame.
//!
//! ## Walk rule
//!
//! [`AddressSpace::map`] and [`AddressSpace::map_to`] descend L4 → L3 → L2 and
//! apply the same rule at every level:
//!
//! - **not present**: take a zeroed frame from the [`FrameAlloc`], install it
//!   with the requested flags and `P`;
//! - **present**: the entry's permission bits must equal the requested ones
//!   ([`PageEntryBits::PERMISSION_MASK`]). A mismatch is reported to the
//!   [`FatalHandler`] and returned as [`MapError::FlagMismatch`]. The entry is
//!   never rewritten, since other mappings share it.
//!
//! A present entry with `PS` set is a large-page leaf and never matches, so
//! 4 KiB mappings are never threaded through a boot-time huge page.
//!
//! ## Safety
//!
//! - The [`PhysMapper`] must yield writable aliases for every table frame.
//! - Page-table mutation is not locked here. Callers serialize `map` on a
//!   shared hierarchy or only map into ranges they privately own.
//! - Changing a live non-present entry needs no TLB flush; nothing in this
//!   module rewrites a present one.

use crate::{FrameAlloc, OutOfMemory, PageEntryBits, PageTable, PhysMapper, TableLevel};
use kernel_fatal::{FatalHandler, FatalReason};
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};

/// Failure of a mapping request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// No frame for a missing table level or for the leaf.
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),

    /// A present entry on the walk carries different permission bits.
    #[error("flag mismatch at {level} mapping {va}: entry {existing:#018x}, requested {requested:#x}")]
    FlagMismatch {
        va: VirtualAddress,
        level: TableLevel,
        existing: u64,
        requested: u64,
    },

    /// [`AddressSpace::map_to`] found the leaf pointing somewhere else.
    #[error("{va} is already mapped by entry {existing:#018x}")]
    AlreadyMapped { va: VirtualAddress, existing: u64 },
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper, H: FatalHandler> {
    root: PhysicalFrame,
    mapper: &'m M,
    fatal: H,
}

impl<'m, M: PhysMapper, H: FatalHandler> AddressSpace<'m, M, H> {
    /// View the **currently active** address space by reading CR3.
    ///
    /// # Safety
    /// - Must run at CPL0 with paging enabled.
    /// - CR3 must point at a valid L4 table reachable through `mapper`.
    #[cfg(target_arch = "x86_64")]
    #[inline]
    pub unsafe fn from_current(mapper: &'m M, fatal: H) -> Self {
        use kernel_registers::{Cr3, LoadRegisterUnsafe};
        let cr3 = unsafe { Cr3::load_unsafe() };
        Self::from_root(mapper, cr3.root(), fatal)
    }

    /// An address space rooted at a known L4 frame.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalFrame, fatal: H) -> Self {
        Self {
            root,
            mapper,
            fatal,
        }
    }

    /// Frame of the L4 table.
    #[inline]
    pub const fn root(&self) -> PhysicalFrame {
        self.root
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn table_mut(&self, frame: PhysicalFrame) -> &mut PageTable {
        // SAFETY: every frame reached here is a table frame of this hierarchy.
        unsafe { self.mapper.phys_to_mut::<PageTable>(frame.start_address()) }
    }

    /// Map the page containing `va` to a frame from `alloc`.
    ///
    /// Missing table levels are allocated zeroed. The leaf frame is taken from
    /// `alloc` as-is. If the page is already mapped with the same permissions,
    /// its frame is returned and nothing is allocated.
    ///
    /// Returns the mapped frame.
    ///
    /// # Errors
    /// - [`MapError::OutOfMemory`] if a table level or the leaf can't be allocated.
    /// - [`MapError::FlagMismatch`] if a present entry on the way disagrees
    ///   with `flags`; reported to the fatal handler first.
    pub fn map<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        flags: PageEntryBits,
    ) -> Result<PhysicalFrame, MapError> {
        let requested = flags.normalized();
        let leaf_table = self.walk_to_leaf(alloc, va, requested)?;

        let i1 = TableLevel::L1.index_of(va);
        let table = self.table_mut(leaf_table);
        let entry = table.get(i1);
        if entry.present() {
            self.check(va, TableLevel::L1, entry, requested)?;
            return Ok(entry.physical_frame());
        }

        let frame = alloc.alloc_4k()?;
        table.set(i1, requested.with_frame(frame));
        Ok(frame)
    }

    /// Map the page containing `va` to the caller's `frame`.
    ///
    /// Used for device memory and other frames not owned by the allocator.
    /// Repeating the call with the same frame and flags is a no-op.
    ///
    /// # Errors
    /// - [`MapError::OutOfMemory`] if a table level can't be allocated.
    /// - [`MapError::FlagMismatch`] as for [`map`](Self::map).
    /// - [`MapError::AlreadyMapped`] if the leaf maps a different frame or
    ///   has different permissions.
    pub fn map_to<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        frame: PhysicalFrame,
        flags: PageEntryBits,
    ) -> Result<(), MapError> {
        let requested = flags.normalized();
        let leaf_table = self.walk_to_leaf(alloc, va, requested)?;

        let i1 = TableLevel::L1.index_of(va);
        let table = self.table_mut(leaf_table);
        let entry = table.get(i1);
        if entry.present() {
            if entry.physical_frame() == frame
                && entry.permission_bits() == requested.permission_bits()
            {
                return Ok(());
            }
            return Err(MapError::AlreadyMapped {
                va,
                existing: entry.into_bits(),
            });
        }

        table.set(i1, requested.with_frame(frame));
        Ok(())
    }

    /// Translate `va` if mapped. Never allocates.
    ///
    /// Large-page leaves at L3 (1 GiB) and L2 (2 MiB) add the matching
    /// in-page offset.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let mut table = self.root;
        for level in TableLevel::WALK {
            let entry = self.table_mut(table).get(level.index_of(va));
            if !entry.present() {
                return None;
            }

            let is_leaf = level == TableLevel::L1
                || (entry.large_page() && matches!(level, TableLevel::L3 | TableLevel::L2));
            if is_leaf {
                let span = level.entry_span();
                let base = entry.physical_address().as_u64() & !(span - 1);
                return Some(PhysicalAddress::new(base | (va.as_u64() & (span - 1))));
            }
            table = entry.physical_frame();
        }
        None
    }

    /// Walk L4 → L2, creating or verifying each entry. Returns the L1 table.
    fn walk_to_leaf<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        requested: PageEntryBits,
    ) -> Result<PhysicalFrame, MapError> {
        let mut table = self.root;
        for level in [TableLevel::L4, TableLevel::L3, TableLevel::L2] {
            let index = level.index_of(va);
            let entry = self.table_mut(table).get(index);

            table = if entry.present() {
                self.check(va, level, entry, requested)?;
                entry.physical_frame()
            } else {
                let next = alloc.alloc_4k_zeroed()?;
                self.table_mut(table).set(index, requested.with_frame(next));
                log::trace!("{level} entry {} for {va} -> new table {next}", index.as_usize());
                next
            };
        }
        Ok(table)
    }

    fn check(
        &self,
        va: VirtualAddress,
        level: TableLevel,
        existing: PageEntryBits,
        requested: PageEntryBits,
    ) -> Result<(), MapError> {
        if existing.permission_bits() == requested.permission_bits() {
            return Ok(());
        }

        let existing = existing.into_bits();
        let requested = requested.permission_bits();
        self.fatal.fatal(FatalReason::FlagMismatch {
            va,
            level: level.number(),
            existing,
            requested,
        });
        Err(MapError::FlagMismatch {
            va,
            level,
            existing,
            requested,
        })
    }
}
