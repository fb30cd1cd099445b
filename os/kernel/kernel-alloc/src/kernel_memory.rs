//! # Kernel Memory Context
//!
//! [`KernelMemory`] bundles what every mapping and frame request needs: the
//! direct-map translator, the locked frame allocator, the fatal capability
//! and a virtual window for device memory. It is built once from the boot
//! memory map and then shared by reference across cores.
//!
//! ```text
//!                    KernelMemory
//!   ┌───────────────┬──────────────┬──────────────┐
//!   │ HhdmPhysMapper│ LockedFrame- │ VirtualPage- │
//!   │  (pa → va)    │ Alloc (free  │ Alloc (MMIO  │
//!   │               │ list, IRQ    │ window)      │
//!   │               │ lock)        │              │
//!   └───────┬───────┴──────┬───────┴──────┬───────┘
//!           └───── AddressSpace::map / map_to ────┘
//! ```

use crate::frame_alloc::{FreeListFrameAlloc, LockedFrameAlloc};
use crate::page_alloc::VirtualPageAlloc;
use kernel_fatal::FatalHandler;
use kernel_info::boot::MemoryRegion;
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_vmem::{AddressSpace, MapError, OutOfMemory, PageEntryBits, PhysMapper};

/// Physical memory and page-table services for the whole kernel.
pub struct KernelMemory<M: PhysMapper + Clone, H: FatalHandler + Clone> {
    mapper: M,
    frames: LockedFrameAlloc<M, H>,
    fatal: H,
    mmio: VirtualPageAlloc,
}

impl<M: PhysMapper + Clone, H: FatalHandler + Clone> KernelMemory<M, H> {
    /// Build the context and hand every usable region of `memory_map` to the
    /// frame allocator.
    ///
    /// # Safety
    /// - `mapper` must reach every usable frame in `memory_map` writably.
    /// - Usable frames must not be in use by anything else.
    /// - Call once per memory map; a second context over the same regions
    ///   would hand out the same frames twice.
    pub unsafe fn new(
        mapper: M,
        fatal: H,
        memory_map: &[MemoryRegion],
        mmio_window: VirtualPageAlloc,
    ) -> Self {
        let mut frames = FreeListFrameAlloc::new(mapper.clone(), fatal.clone());
        unsafe { frames.init(memory_map) };
        Self {
            mapper,
            frames: LockedFrameAlloc::new(frames),
            fatal,
            mmio: mmio_window,
        }
    }

    /// # Errors
    /// [`OutOfMemory`] when no frame is left.
    pub fn alloc_frame(&self) -> Result<PhysicalAddress, OutOfMemory> {
        self.frames.alloc().map(PhysicalFrame::start_address)
    }

    /// # Errors
    /// [`OutOfMemory`] when no frame is left.
    pub fn alloc_frame_zeroed(&self) -> Result<PhysicalAddress, OutOfMemory> {
        self.frames.alloc_zeroed().map(PhysicalFrame::start_address)
    }

    /// Hand a frame back to the pool.
    ///
    /// # Safety
    /// `address` must come from [`alloc_frame`](Self::alloc_frame) and
    /// nothing may still use it, including page-table leaves.
    pub unsafe fn free_frame(&self, address: PhysicalAddress) {
        unsafe { self.frames.free(address) };
    }

    #[inline]
    #[must_use]
    pub fn physical_to_virtual(&self, pa: PhysicalAddress) -> VirtualAddress {
        self.mapper.phys_to_virt(pa)
    }

    #[must_use]
    pub fn free_frames(&self) -> u64 {
        self.frames.free_frames()
    }

    #[must_use]
    pub const fn frames(&self) -> &LockedFrameAlloc<M, H> {
        &self.frames
    }

    /// Map `va` in the active address space to a fresh frame.
    ///
    /// # Safety
    /// See [`AddressSpace::from_current`]. Concurrent calls touching the same
    /// table frames must be serialized by the caller.
    ///
    /// # Errors
    /// As for [`map_page_in`](Self::map_page_in).
    #[cfg(target_arch = "x86_64")]
    pub unsafe fn map_page(
        &self,
        va: VirtualAddress,
        flags: PageEntryBits,
    ) -> Result<PhysicalAddress, MapError> {
        let space = unsafe { AddressSpace::from_current(&self.mapper, &self.fatal) };
        let mut frames = &self.frames;
        space.map(&mut frames, va, flags).map(PhysicalFrame::start_address)
    }

    /// Map `va` in the hierarchy rooted at `root` to a fresh frame.
    ///
    /// Idempotent: mapping the same page with the same flags again returns
    /// the frame it already has.
    ///
    /// # Errors
    /// - [`MapError::OutOfMemory`] when a table level or the page can't be
    ///   allocated.
    /// - [`MapError::FlagMismatch`] when a present entry on the walk has
    ///   different permissions; reported as fatal first.
    pub fn map_page_in(
        &self,
        root: PhysicalFrame,
        va: VirtualAddress,
        flags: PageEntryBits,
    ) -> Result<PhysicalAddress, MapError> {
        let space = AddressSpace::from_root(&self.mapper, root, &self.fatal);
        let mut frames = &self.frames;
        space.map(&mut frames, va, flags).map(PhysicalFrame::start_address)
    }

    /// Translate `va` in the hierarchy rooted at `root`.
    #[must_use]
    pub fn translate_in(&self, root: PhysicalFrame, va: VirtualAddress) -> Option<PhysicalAddress> {
        AddressSpace::from_root(&self.mapper, root, &self.fatal).query(va)
    }

    /// Map `len` bytes of device memory at `pa` uncached into the active
    /// address space. Returns the virtual address of `pa` itself.
    ///
    /// # Safety
    /// As for [`map_page`](Self::map_page).
    ///
    /// # Errors
    /// As for [`map_mmio_in`](Self::map_mmio_in).
    #[cfg(target_arch = "x86_64")]
    pub unsafe fn map_mmio(&self, pa: PhysicalAddress, len: u64) -> Result<VirtualAddress, MapError> {
        use kernel_registers::{Cr3, LoadRegisterUnsafe};
        let root = unsafe { Cr3::load_unsafe() }.root();
        self.map_mmio_in(root, pa, len)
    }

    /// Map `len` bytes of device memory at `pa` uncached into the hierarchy
    /// rooted at `root`, at fresh addresses from the MMIO window.
    ///
    /// The frames are not taken from the allocator and are never freed.
    ///
    /// # Errors
    /// - [`MapError::OutOfMemory`] when the window or a table level runs out.
    /// - [`MapError::FlagMismatch`] / [`MapError::AlreadyMapped`] as for
    ///   [`AddressSpace::map_to`].
    pub fn map_mmio_in(
        &self,
        root: PhysicalFrame,
        pa: PhysicalAddress,
        len: u64,
    ) -> Result<VirtualAddress, MapError> {
        let first = pa.frame();
        let span = pa
            .frame_offset()
            .checked_add(len.max(1))
            .ok_or(OutOfMemory)?;
        let pages = span.div_ceil(FRAME_SIZE);
        let base = self.mmio.alloc(pages)?;

        let space = AddressSpace::from_root(&self.mapper, root, &self.fatal);
        let mut frames = &self.frames;
        for i in 0..pages {
            let (Some(page), Some(frame)) = (base.forward(i), first.forward(i)) else {
                return Err(OutOfMemory.into());
            };
            space.map_to(&mut frames, page.start_address(), frame, PageEntryBits::mmio())?;
        }

        log::debug!("mapped {pages} MMIO pages {first}.. at {:?}", base.start_address());
        Ok(base.start_address() + pa.frame_offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phys_mapper::HhdmPhysMapper;
    use kernel_fatal::{FatalReason, RecordingFatal};

    #[repr(C, align(4096))]
    struct Aligned4K([u8; 4096]);

    const WINDOW: u64 = 0xFFFF_E000_0000_0000;

    /// Simulated RAM of 32 frames. Frame 0 is the root table; frames 1..32
    /// are usable.
    fn ram() -> Vec<Aligned4K> {
        (0..32).map(|_| Aligned4K([0; 4096])).collect()
    }

    fn memory<'f>(
        ram: &[Aligned4K],
        fatal: &'f RecordingFatal,
    ) -> KernelMemory<HhdmPhysMapper, &'f RecordingFatal> {
        let mapper = HhdmPhysMapper::new(ram.as_ptr().expose_provenance() as u64);
        let map = [MemoryRegion::usable(FRAME_SIZE, 31 * FRAME_SIZE)];
        let window = VirtualPageAlloc::new(
            VirtualAddress::new(WINDOW),
            VirtualAddress::new(WINDOW + 16 * FRAME_SIZE),
        );
        unsafe { KernelMemory::new(mapper, fatal, &map, window) }
    }

    fn root() -> PhysicalFrame {
        PhysicalFrame::containing_address(PhysicalAddress::zero())
    }

    #[test]
    fn frames_round_trip_through_the_context() {
        let ram = ram();
        let fatal = RecordingFatal::new();
        let mem = memory(&ram, &fatal);
        assert_eq!(mem.free_frames(), 31);

        let pa = mem.alloc_frame().unwrap();
        assert!(pa.is_frame_aligned());
        assert!((FRAME_SIZE..32 * FRAME_SIZE).contains(&pa.as_u64()));
        unsafe { mem.free_frame(pa) };
        assert_eq!(mem.alloc_frame(), Ok(pa));

        let va = mem.physical_to_virtual(pa);
        assert_eq!(va.as_u64() - mem.physical_to_virtual(PhysicalAddress::zero()).as_u64(), pa.as_u64());
    }

    #[test]
    fn map_page_in_is_idempotent() {
        let ram = ram();
        let fatal = RecordingFatal::new();
        let mem = memory(&ram, &fatal);
        let va = VirtualAddress::new(0xFFFF_8000_0040_0000);

        let first = mem.map_page_in(root(), va, PageEntryBits::kernel_data()).unwrap();
        let after_first = mem.free_frames();
        assert_eq!(after_first, 31 - 4);

        let second = mem.map_page_in(root(), va, PageEntryBits::kernel_data()).unwrap();
        assert_eq!(first, second);
        assert_eq!(mem.free_frames(), after_first);
        assert_eq!(mem.translate_in(root(), va + 0x123), Some(first + 0x123));
        assert_eq!(fatal.count(), 0);
    }

    #[test]
    fn conflicting_flags_are_fatal() {
        let ram = ram();
        let fatal = RecordingFatal::new();
        let mem = memory(&ram, &fatal);
        let va = VirtualAddress::new(0xFFFF_8000_0040_0000);

        mem.map_page_in(root(), va, PageEntryBits::kernel_data()).unwrap();
        let free = mem.free_frames();
        let err = mem
            .map_page_in(root(), va + FRAME_SIZE, PageEntryBits::user_data())
            .unwrap_err();

        assert!(matches!(err, MapError::FlagMismatch { .. }));
        assert!(matches!(fatal.last(), Some(FatalReason::FlagMismatch { level: 4, .. })));
        assert_eq!(mem.free_frames(), free);
    }

    #[test]
    fn mmio_maps_device_frames_uncached() {
        let ram = ram();
        let fatal = RecordingFatal::new();
        let mem = memory(&ram, &fatal);
        let device = PhysicalAddress::new(0xFEE0_0020);

        let va = mem.map_mmio_in(root(), device, 0x10).unwrap();
        assert_eq!(va.as_u64(), WINDOW + 0x20);
        assert_eq!(mem.translate_in(root(), va), Some(device));

        let straddling = mem.map_mmio_in(root(), PhysicalAddress::new(0xFEC0_0FF0), 0x20).unwrap();
        assert_eq!(straddling.as_u64(), WINDOW + FRAME_SIZE + 0xFF0);
        assert_eq!(
            mem.translate_in(root(), straddling + 0x10),
            Some(PhysicalAddress::new(0xFEC0_1000))
        );
        assert_eq!(fatal.count(), 0);
    }
}
