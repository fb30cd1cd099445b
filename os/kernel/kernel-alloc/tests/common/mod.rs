#![allow(dead_code)]

use kernel_alloc::phys_mapper::HhdmPhysMapper;
use kernel_memory_addresses::FRAME_SIZE;

#[repr(C, align(4096))]
pub struct Aligned4K(pub [u8; 4096]);

/// Host buffer standing in for physical memory starting at address 0.
///
/// The direct-map offset is the buffer's address, so physical address `pa`
/// lives at byte `pa` of the buffer.
pub struct SimulatedRam {
    frames: Vec<Aligned4K>,
}

impl SimulatedRam {
    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames).map(|_| Aligned4K([0xC3; 4096])).collect(),
        }
    }

    /// Keep the buffer alive for the rest of the test binary.
    pub fn leak(frames: usize) -> &'static Self {
        Box::leak(Box::new(Self::new(frames)))
    }

    pub fn hhdm_offset(&self) -> u64 {
        self.frames.as_ptr().expose_provenance() as u64
    }

    pub fn mapper(&self) -> HhdmPhysMapper {
        HhdmPhysMapper::new(self.hhdm_offset())
    }

    pub fn size(&self) -> u64 {
        self.frames.len() as u64 * FRAME_SIZE
    }

    pub fn frame(&self, pa: u64) -> &[u8; 4096] {
        &self.frames[usize::try_from(pa / FRAME_SIZE).unwrap()].0
    }

    pub fn zero(&mut self, frame: usize) {
        self.frames[frame].0.fill(0);
    }
}
