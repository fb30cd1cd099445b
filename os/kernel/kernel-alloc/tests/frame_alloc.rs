mod common;

use common::SimulatedRam;
use kernel_alloc::frame_alloc::{FreeListFrameAlloc, LockedFrameAlloc};
use kernel_fatal::RecordingFatal;
use kernel_info::boot::{MemoryRegion, MemoryRegionKind};
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress};
use kernel_vmem::OutOfMemory;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

static FATAL: RecordingFatal = RecordingFatal::new();

#[test]
fn four_frame_region_hands_out_in_order() {
    let ram = SimulatedRam::new(5);
    let fatal = RecordingFatal::new();
    let mut frames = FreeListFrameAlloc::new(ram.mapper(), &fatal);
    unsafe { frames.init(&[MemoryRegion::usable(0x1000, 0x4000)]) };

    let got: Vec<u64> = (0..4)
        .map(|_| frames.alloc().unwrap().start_address().as_u64())
        .collect();
    assert_eq!(got, [0x1000, 0x2000, 0x3000, 0x4000]);
    assert_eq!(frames.alloc(), Err(OutOfMemory));
    assert_eq!(fatal.count(), 0);
}

#[test]
fn only_usable_regions_are_handed_out() {
    let ram = SimulatedRam::new(24);
    let map = [
        MemoryRegion::new(0x0000, 0x2000, MemoryRegionKind::Reserved),
        MemoryRegion::usable(0x2000, 0x3000),
        MemoryRegion::new(0x5000, 0x3000, MemoryRegionKind::BootloaderReclaimable),
        MemoryRegion::usable(0x8000, 0x8000),
        MemoryRegion::new(0x10000, 0x8000, MemoryRegionKind::Framebuffer),
    ];
    let mut frames = FreeListFrameAlloc::new(ram.mapper(), &FATAL);
    unsafe { frames.init(&map) };
    assert_eq!(frames.free_frames(), 11);

    let usable = |pa: u64| (0x2000..0x5000).contains(&pa) || (0x8000..0x10000).contains(&pa);
    let mut live = HashSet::new();
    let mut released = Vec::new();

    // Interleave allocation and release; freed frames must come back.
    for round in 0..30 {
        match frames.alloc() {
            Ok(frame) => {
                let pa = frame.start_address().as_u64();
                assert_eq!(pa % FRAME_SIZE, 0);
                assert!(usable(pa), "{pa:#x} is not in a usable region");
                assert!(live.insert(pa), "{pa:#x} handed out twice");
            }
            Err(OutOfMemory) => assert!(live.len() == 11),
        }
        if round % 3 == 2
            && let Some(&pa) = live.iter().next()
        {
            live.remove(&pa);
            released.push(pa);
            unsafe { frames.free(PhysicalAddress::new(pa)) };
        }
    }

    assert_eq!(frames.free_frames() + live.len() as u64, 11);
    assert!(!released.is_empty());
}

#[test]
fn free_then_alloc_returns_the_same_frame() {
    let ram = SimulatedRam::new(8);
    let mut frames = FreeListFrameAlloc::new(ram.mapper(), &FATAL);
    unsafe { frames.init(&[MemoryRegion::usable(0x1000, 0x7000)]) };

    let a = frames.alloc().unwrap();
    let b = frames.alloc().unwrap();
    unsafe { frames.free(a.start_address()) };
    assert_eq!(frames.alloc(), Ok(a));
    unsafe { frames.free(b.start_address()) };
    unsafe { frames.free(a.start_address()) };
    assert_eq!(frames.alloc(), Ok(a));
    assert_eq!(frames.alloc(), Ok(b));
}

#[test]
fn concurrent_allocations_never_overlap() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 32;

    let ram = SimulatedRam::leak(THREADS * PER_THREAD + 1);
    let mut frames = FreeListFrameAlloc::new(ram.mapper(), &FATAL);
    unsafe { frames.init(&[MemoryRegion::usable(FRAME_SIZE, ram.size() - FRAME_SIZE)]) };
    let frames = Arc::new(LockedFrameAlloc::new(frames));
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let frames = Arc::clone(&frames);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let mut mine = Vec::new();
                for i in 0..PER_THREAD {
                    let frame = frames.alloc_zeroed().unwrap();
                    mine.push(frame.start_address().as_u64());
                    // Hand some back so pushes race with pops.
                    if (i + t) % 4 == 0 {
                        let pa = mine.swap_remove(0);
                        unsafe { frames.free(PhysicalAddress::new(pa)) };
                    }
                }
                mine
            })
        })
        .collect();

    let live: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let unique: HashSet<u64> = live.iter().copied().collect();
    assert_eq!(unique.len(), live.len(), "a frame is live twice");
    assert!(live.iter().all(|&pa| pa >= FRAME_SIZE && pa < ram.size()));
    assert_eq!(frames.free_frames() + live.len() as u64, (THREADS * PER_THREAD) as u64);
    assert_eq!(FATAL.count(), 0);
}
