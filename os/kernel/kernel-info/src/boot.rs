//! # Kernel Boot Information

use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// Everything the memory manager needs from the boot collaborator.
#[derive(Debug, Clone, Copy)]
pub struct BootInfo<'a> {
    /// Physical memory map, in the order the boot loader reported it.
    pub memory_map: &'a [MemoryRegion],

    /// Offset of the higher-half direct map.
    pub hhdm_offset: u64,

    /// Secondary cores; empty on single-core boots.
    pub cpus: &'a [CpuInfo],
}

impl BootInfo<'_> {
    /// Regions the frame allocator may take ownership of.
    pub fn usable_regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.memory_map.iter().filter(|r| r.kind.is_usable())
    }

    /// Total bytes across all usable regions, before alignment trimming.
    #[must_use]
    pub fn usable_bytes(&self) -> u64 {
        self.usable_regions()
            .fold(0u64, |acc, r| acc.saturating_add(r.length))
    }
}

/// One entry of the physical memory map.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Physical base address.
    pub base: u64,

    /// Length in **bytes**.
    pub length: u64,

    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: MemoryRegionKind) -> Self {
        Self { base, length, kind }
    }

    #[must_use]
    pub const fn usable(base: u64, length: u64) -> Self {
        Self::new(base, length, MemoryRegionKind::Usable)
    }

    /// One past the last byte, saturating at `u64::MAX`.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }
}

/// Memory map entry type, numbered as the boot protocol reports them.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    Usable = 0,
    Reserved = 1,
    AcpiReclaimable = 2,
    AcpiNvs = 3,
    BadMemory = 4,
    /// Boot loader structures; reclaimable once the boot records are consumed.
    BootloaderReclaimable = 5,
    KernelAndModules = 6,
    Framebuffer = 7,
}

impl MemoryRegionKind {
    /// Decode the raw tag. Unknown tags map to `None` and must be treated as reserved.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => Self::Usable,
            1 => Self::Reserved,
            2 => Self::AcpiReclaimable,
            3 => Self::AcpiNvs,
            4 => Self::BadMemory,
            5 => Self::BootloaderReclaimable,
            6 => Self::KernelAndModules,
            7 => Self::Framebuffer,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Usable)
    }
}

/// Entry point of a secondary core. Receives its own [`CpuInfo`] record.
pub type CpuEntryFn = extern "C" fn(&CpuInfo) -> !;

/// Per-core record of the SMP boot protocol.
///
/// The parked core spins on `goto_address`; writing a non-null value sends it
/// to that function. Fields are shared with a core that is not running Rust
/// code yet, so the layout is fixed.
#[repr(C)]
#[derive(Debug)]
pub struct CpuInfo {
    pub processor_id: u32,
    pub lapic_id: u32,
    _reserved: u64,
    goto_address: AtomicPtr<()>,
    extra_argument: AtomicU64,
}

impl CpuInfo {
    #[must_use]
    pub const fn new(processor_id: u32, lapic_id: u32) -> Self {
        Self {
            processor_id,
            lapic_id,
            _reserved: 0,
            goto_address: AtomicPtr::new(ptr::null_mut()),
            extra_argument: AtomicU64::new(0),
        }
    }

    /// Send the core to `entry`, passing `argument` in the record.
    ///
    /// The argument is written before the entry point; the release store on
    /// the entry point publishes both.
    pub fn start(&self, entry: CpuEntryFn, argument: u64) {
        self.extra_argument.store(argument, Ordering::Relaxed);
        self.goto_address
            .store(entry as *const () as *mut (), Ordering::Release);
    }

    /// Address the core was sent to, or `None` while it is parked.
    #[must_use]
    pub fn entry_address(&self) -> Option<u64> {
        let p = self.goto_address.load(Ordering::Acquire);
        if p.is_null() {
            None
        } else {
            Some(p.addr() as u64)
        }
    }

    #[must_use]
    pub fn argument(&self) -> u64 {
        self.extra_argument.load(Ordering::Acquire)
    }
}
