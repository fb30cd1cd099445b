//! # Physical Frame Allocator
//!
//! Free physical memory is tracked as a singly linked list of **runs**, i.e.
//! maximal sequences of contiguous free 4 KiB frames. The list needs no
//! memory of its own: each run's node is written into the **last** frame of
//! the run it describes, through the direct map.
//!
//! ```text
//!  head ─┐
//!        ▼
//!  ┌──────┬──────┬──────┬──────────────┐     ┌──────┬──────────────┐
//!  │ free │ free │ free │ FrameNode    │ ──▶ │ free │ FrameNode    │ ──▶ NIL
//!  │      │      │      │ base, len=4  │     │      │ base, len=2  │
//!  └──────┴──────┴──────┴──────────────┘     └──────┴──────────────┘
//!  base                  node frame           base   node frame
//! ```
//!
//! Allocation hands out the **first** frame of the head run and advances
//! the node's base, so the node never moves. Once a run is down to one
//! frame, that frame is the node itself: it is unlinked and handed out.
//!
//! Freeing pushes a fresh one-frame run onto the head. Adjacent runs are
//! never coalesced; the list fragments over time.
//!
//! A node is only meaningful while its frame is free. It is accessed with
//! `ptr::read`/`ptr::write` through the direct map and never kept as a Rust
//! reference, since the frame becomes someone else's memory once allocated.

use kernel_fatal::{FatalHandler, FatalReason};
use kernel_info::boot::MemoryRegion;
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame, align_down, align_up};
use kernel_sync::IrqSpinLock;
use kernel_vmem::{FrameAlloc, OutOfMemory, PhysMapper};

/// Marks the end of the list. Physical frame 0 stays a valid node address.
const NIL: u64 = u64::MAX;

/// Free-list node, stored in the last frame of its run.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct FrameNode {
    /// Node frame of the next run, or [`NIL`].
    next: u64,
    /// First free frame of this run.
    base: u64,
    /// Free frames in this run, counting the node frame.
    run_length: u64,
}

/// Single-threaded free-list frame allocator.
///
/// Wrap it in a [`LockedFrameAlloc`] to share it between cores.
pub struct FreeListFrameAlloc<M: PhysMapper, H: FatalHandler> {
    /// Node frame of the first run.
    head: Option<PhysicalFrame>,
    free_frames: u64,
    mapper: M,
    fatal: H,
}

impl<M: PhysMapper, H: FatalHandler> FreeListFrameAlloc<M, H> {
    /// An allocator with no free memory. Populate it with [`init`](Self::init).
    pub const fn new(mapper: M, fatal: H) -> Self {
        Self {
            head: None,
            free_frames: 0,
            mapper,
            fatal,
        }
    }

    /// Take ownership of every usable region in `memory_map`.
    ///
    /// Bases are aligned up and ends aligned down to 4 KiB; regions without
    /// a whole frame are skipped. Each region becomes one run, prepended to
    /// the list, so the last usable region is consumed first.
    ///
    /// # Safety
    /// - Usable regions must really be free and disjoint, and stay unused by
    ///   anything but this allocator.
    /// - The mapper must reach all of them.
    /// - Must complete before the allocator is shared.
    pub unsafe fn init(&mut self, memory_map: &[MemoryRegion]) {
        let mut regions = 0usize;
        for region in memory_map.iter().filter(|r| r.kind.is_usable()) {
            let Some(start) = align_up(region.base, FRAME_SIZE) else {
                continue;
            };
            let end = align_down(region.end(), FRAME_SIZE);
            if end <= start {
                log::debug!(
                    "skipping usable region {:#x}+{:#x}: no whole frame",
                    region.base,
                    region.length
                );
                continue;
            }

            let frames = (end - start) / FRAME_SIZE;
            let base = PhysicalFrame::containing_address(PhysicalAddress::new(start));
            log::debug!("usable region {base}..{end:#018x}: {frames} frames");
            unsafe { self.push_run(base, frames) };
            regions += 1;
        }

        log::info!(
            "frame allocator: {} free frames ({} KiB) in {regions} runs",
            self.free_frames,
            self.free_frames * (FRAME_SIZE / 1024)
        );
    }

    /// Pop the first frame of the head run.
    ///
    /// # Errors
    /// [`OutOfMemory`] when the list is empty, or when the head node fails
    /// validation (reported as fatal first, and the list is dropped).
    pub fn alloc(&mut self) -> Result<PhysicalFrame, OutOfMemory> {
        let Some(node_frame) = self.head else {
            log::warn!("frame allocator exhausted");
            return Err(OutOfMemory);
        };

        let node = unsafe { self.read_node(node_frame) };
        if !Self::is_valid(node_frame, &node) {
            self.fatal.fatal(FatalReason::CorruptFreeList {
                node: node_frame.start_address(),
                base: PhysicalAddress::new(node.base),
                run_length: node.run_length,
            });
            self.head = None;
            self.free_frames = 0;
            return Err(OutOfMemory);
        }

        let frame = PhysicalFrame::containing_address(PhysicalAddress::new(node.base));
        if node.run_length > 1 {
            let shrunk = FrameNode {
                base: node.base + FRAME_SIZE,
                run_length: node.run_length - 1,
                ..node
            };
            unsafe { self.write_node(node_frame, shrunk) };
        } else {
            self.head = Self::decode(node.next);
        }

        self.free_frames -= 1;
        Ok(frame)
    }

    /// [`alloc`](Self::alloc), then zero the frame through the direct map.
    ///
    /// # Errors
    /// As for [`alloc`](Self::alloc).
    pub fn alloc_zeroed(&mut self) -> Result<PhysicalFrame, OutOfMemory> {
        let frame = self.alloc()?;
        unsafe { self.mapper.zero_frame(frame) };
        Ok(frame)
    }

    /// Return one frame to the head of the list.
    ///
    /// A misaligned address is reported as fatal and otherwise ignored.
    ///
    /// # Safety
    /// `address` must have come from this allocator and must not be in use.
    pub unsafe fn free(&mut self, address: PhysicalAddress) {
        let Some(frame) = PhysicalFrame::from_start_address(address) else {
            self.fatal.fatal(FatalReason::MisalignedFree { address });
            return;
        };
        unsafe { self.push_run(frame, 1) };
    }

    /// Frames currently on the list.
    #[must_use]
    pub const fn free_frames(&self) -> u64 {
        self.free_frames
    }

    /// Number of runs on the list. Walks the list.
    #[must_use]
    pub fn runs(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head;
        while let Some(frame) = cursor {
            count += 1;
            cursor = Self::decode(unsafe { self.read_node(frame) }.next);
        }
        count
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// # Safety
    /// `base .. base + frames` must be free, owned by the caller, and reachable
    /// through the mapper.
    unsafe fn push_run(&mut self, base: PhysicalFrame, frames: u64) {
        debug_assert!(frames >= 1);
        let Some(node_frame) = base.forward(frames - 1) else {
            return;
        };

        let node = FrameNode {
            next: self.head.map_or(NIL, |f| f.start_address().as_u64()),
            base: base.start_address().as_u64(),
            run_length: frames,
        };
        unsafe { self.write_node(node_frame, node) };
        self.head = Some(node_frame);
        self.free_frames += frames;
    }

    fn is_valid(node_frame: PhysicalFrame, node: &FrameNode) -> bool {
        let aligned = |v: u64| v % FRAME_SIZE == 0;
        node.run_length >= 1
            && aligned(node.base)
            && (node.next == NIL || aligned(node.next))
            && (node.run_length - 1)
                .checked_mul(FRAME_SIZE)
                .and_then(|span| node.base.checked_add(span))
                == Some(node_frame.start_address().as_u64())
    }

    fn decode(next: u64) -> Option<PhysicalFrame> {
        if next == NIL {
            None
        } else {
            Some(PhysicalFrame::containing_address(PhysicalAddress::new(next)))
        }
    }

    unsafe fn read_node(&self, frame: PhysicalFrame) -> FrameNode {
        unsafe {
            self.mapper
                .phys_to_ptr::<FrameNode>(frame.start_address())
                .read()
        }
    }

    unsafe fn write_node(&self, frame: PhysicalFrame, node: FrameNode) {
        unsafe {
            self.mapper
                .phys_to_ptr::<FrameNode>(frame.start_address())
                .write(node);
        }
    }
}

impl<M: PhysMapper, H: FatalHandler> FrameAlloc for FreeListFrameAlloc<M, H> {
    fn alloc_4k(&mut self) -> Result<PhysicalFrame, OutOfMemory> {
        self.alloc()
    }

    fn alloc_4k_zeroed(&mut self) -> Result<PhysicalFrame, OutOfMemory> {
        self.alloc_zeroed()
    }

    fn free_4k(&mut self, frame: PhysicalFrame) {
        unsafe { self.free(frame.start_address()) }
    }
}

/// [`FreeListFrameAlloc`] behind an interrupt-disabling spin lock.
///
/// Every operation holds the lock for its whole read-modify-write of the
/// list and releases it on every exit path. Zeroing happens after the lock
/// is dropped; the frame is already exclusively the caller's by then.
pub struct LockedFrameAlloc<M: PhysMapper, H: FatalHandler> {
    inner: IrqSpinLock<FreeListFrameAlloc<M, H>>,
    mapper: M,
}

impl<M: PhysMapper + Clone, H: FatalHandler> LockedFrameAlloc<M, H> {
    pub fn new(inner: FreeListFrameAlloc<M, H>) -> Self {
        let mapper = inner.mapper.clone();
        Self {
            inner: IrqSpinLock::new(inner),
            mapper,
        }
    }
}

impl<M: PhysMapper, H: FatalHandler> LockedFrameAlloc<M, H> {
    /// # Errors
    /// [`OutOfMemory`] when no frame is left.
    pub fn alloc(&self) -> Result<PhysicalFrame, OutOfMemory> {
        self.inner.lock().alloc()
    }

    /// # Errors
    /// [`OutOfMemory`] when no frame is left.
    pub fn alloc_zeroed(&self) -> Result<PhysicalFrame, OutOfMemory> {
        let frame = self.alloc()?;
        unsafe { self.mapper.zero_frame(frame) };
        Ok(frame)
    }

    /// # Safety
    /// `address` must have come from this allocator and must not be in use.
    pub unsafe fn free(&self, address: PhysicalAddress) {
        unsafe { self.inner.lock().free(address) };
    }

    #[must_use]
    pub fn free_frames(&self) -> u64 {
        self.inner.lock().free_frames()
    }

    #[must_use]
    pub fn runs(&self) -> usize {
        self.inner.lock().runs()
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }
}

impl<M: PhysMapper, H: FatalHandler> FrameAlloc for &LockedFrameAlloc<M, H> {
    fn alloc_4k(&mut self) -> Result<PhysicalFrame, OutOfMemory> {
        self.alloc()
    }

    fn alloc_4k_zeroed(&mut self) -> Result<PhysicalFrame, OutOfMemory> {
        self.alloc_zeroed()
    }

    fn free_4k(&mut self, frame: PhysicalFrame) {
        unsafe { self.free(frame.start_address()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phys_mapper::HhdmPhysMapper;
    use kernel_fatal::RecordingFatal;
    use kernel_info::boot::MemoryRegionKind;

    #[repr(C, align(4096))]
    struct Aligned4K([u8; 4096]);

    /// Simulated RAM; the direct-map offset is the buffer address.
    struct Ram {
        frames: Vec<Aligned4K>,
    }

    impl Ram {
        fn new(frames: usize) -> Self {
            Self {
                frames: (0..frames).map(|_| Aligned4K([0x5A; 4096])).collect(),
            }
        }

        fn hhdm(&self) -> HhdmPhysMapper {
            HhdmPhysMapper::new(self.frames.as_ptr().expose_provenance() as u64)
        }

        fn frame(&self, pa: u64) -> &[u8; 4096] {
            &self.frames[(pa / FRAME_SIZE) as usize].0
        }
    }

    fn allocator<'f>(
        ram: &Ram,
        fatal: &'f RecordingFatal,
        map: &[MemoryRegion],
    ) -> FreeListFrameAlloc<HhdmPhysMapper, &'f RecordingFatal> {
        let mut a = FreeListFrameAlloc::new(ram.hhdm(), fatal);
        unsafe { a.init(map) };
        a
    }

    fn pa(frame: PhysicalFrame) -> u64 {
        frame.start_address().as_u64()
    }

    #[test]
    fn four_frames_then_out_of_memory() {
        let ram = Ram::new(8);
        let fatal = RecordingFatal::new();
        let mut a = allocator(&ram, &fatal, &[MemoryRegion::usable(0x1000, 0x4000)]);

        assert_eq!(a.free_frames(), 4);
        assert_eq!(a.runs(), 1);
        let got: Vec<u64> = (0..4).map(|_| pa(a.alloc().unwrap())).collect();
        assert_eq!(got, [0x1000, 0x2000, 0x3000, 0x4000]);
        assert_eq!(a.alloc(), Err(OutOfMemory));
        assert_eq!(a.free_frames(), 0);
        assert_eq!(fatal.count(), 0);
    }

    #[test]
    fn free_then_alloc_returns_the_same_frame() {
        let ram = Ram::new(8);
        let fatal = RecordingFatal::new();
        let mut a = allocator(&ram, &fatal, &[MemoryRegion::usable(0x1000, 0x1000)]);

        let f = a.alloc().unwrap();
        assert_eq!(a.alloc(), Err(OutOfMemory));
        unsafe { a.free(f.start_address()) };
        assert_eq!(a.alloc(), Ok(f));
    }

    #[test]
    fn free_pushes_to_head_without_coalescing() {
        let ram = Ram::new(8);
        let fatal = RecordingFatal::new();
        let mut a = allocator(&ram, &fatal, &[MemoryRegion::usable(0x1000, 0x3000)]);

        let f1 = a.alloc().unwrap();
        let f2 = a.alloc().unwrap();
        unsafe {
            a.free(f1.start_address());
            a.free(f2.start_address());
        }
        assert_eq!(a.runs(), 3);
        assert_eq!(a.free_frames(), 3);
        assert_eq!(pa(a.alloc().unwrap()), 0x2000);
        assert_eq!(pa(a.alloc().unwrap()), 0x1000);
        assert_eq!(pa(a.alloc().unwrap()), 0x3000);
    }

    #[test]
    fn regions_are_trimmed_to_whole_frames() {
        let ram = Ram::new(16);
        let fatal = RecordingFatal::new();
        let map = [
            MemoryRegion::new(0x0000, 0x1000, MemoryRegionKind::Reserved),
            // 0x1800..0x4800 holds two whole frames: 0x2000 and 0x3000.
            MemoryRegion::usable(0x1800, 0x3000),
            // Less than a frame after alignment.
            MemoryRegion::usable(0x6100, 0x0F00),
            MemoryRegion::new(0x8000, 0x2000, MemoryRegionKind::BootloaderReclaimable),
            MemoryRegion::usable(0xA000, 0x1000),
        ];
        let mut a = allocator(&ram, &fatal, &map);

        assert_eq!(a.free_frames(), 3);
        assert_eq!(a.runs(), 2);
        let mut got: Vec<u64> = (0..3).map(|_| pa(a.alloc().unwrap())).collect();
        // Last region first.
        assert_eq!(got[0], 0xA000);
        got.sort_unstable();
        assert_eq!(got, [0x2000, 0x3000, 0xA000]);
        assert!(a.alloc().is_err());
    }

    #[test]
    fn node_lives_in_the_last_frame_of_its_run() {
        let ram = Ram::new(8);
        let fatal = RecordingFatal::new();
        let mut a = allocator(&ram, &fatal, &[MemoryRegion::usable(0x1000, 0x3000)]);

        let first = a.alloc().unwrap();
        assert_eq!(pa(first), 0x1000);
        // The popped frame was not touched; the node is at 0x3000.
        assert!(ram.frame(0x1000).iter().all(|&b| b == 0x5A));
        assert!(ram.frame(0x3000)[..24].iter().any(|&b| b != 0x5A));
    }

    #[test]
    fn alloc_zeroed_clears_the_frame() {
        let ram = Ram::new(8);
        let fatal = RecordingFatal::new();
        let mut a = allocator(&ram, &fatal, &[MemoryRegion::usable(0x2000, 0x2000)]);

        let f = a.alloc_zeroed().unwrap();
        assert!(ram.frame(pa(f)).iter().all(|&b| b == 0));
    }

    #[test]
    fn misaligned_free_is_fatal_and_ignored() {
        let ram = Ram::new(8);
        let fatal = RecordingFatal::new();
        let mut a = allocator(&ram, &fatal, &[MemoryRegion::usable(0x1000, 0x1000)]);

        unsafe { a.free(PhysicalAddress::new(0x2010)) };
        assert_eq!(fatal.count(), 1);
        assert_eq!(
            fatal.last(),
            Some(FatalReason::MisalignedFree {
                address: PhysicalAddress::new(0x2010)
            })
        );
        assert_eq!(a.free_frames(), 1);
    }

    #[test]
    fn corrupted_node_is_fatal_and_drops_the_list() {
        let ram = Ram::new(8);
        let fatal = RecordingFatal::new();
        let mut a = allocator(&ram, &fatal, &[MemoryRegion::usable(0x1000, 0x2000)]);

        // Scribble over the node (run_length = 0).
        let node = ram.hhdm().phys_to_ptr::<FrameNode>(PhysicalAddress::new(0x2000));
        unsafe { (*node).run_length = 0 };

        assert_eq!(a.alloc(), Err(OutOfMemory));
        assert!(matches!(
            fatal.last(),
            Some(FatalReason::CorruptFreeList { run_length: 0, .. })
        ));
        assert_eq!(a.free_frames(), 0);
        assert_eq!(a.alloc(), Err(OutOfMemory));
        assert_eq!(fatal.count(), 1);
    }

    #[test]
    fn locked_allocator_matches_plain_one() {
        let ram = Ram::new(8);
        let fatal = RecordingFatal::new();
        let locked = LockedFrameAlloc::new(allocator(
            &ram,
            &fatal,
            &[MemoryRegion::usable(0x1000, 0x2000)],
        ));

        let mut handle = &locked;
        let f = handle.alloc_4k_zeroed().unwrap();
        assert_eq!(pa(f), 0x1000);
        assert!(ram.frame(0x1000).iter().all(|&b| b == 0));
        handle.free_4k(f);
        assert_eq!(locked.free_frames(), 2);
        assert_eq!(locked.runs(), 2);
    }
}
