//! Kernel-wide entry points.
//!
//! Boot code calls [`init_frame_allocator`] once with the boot information;
//! everything else in the kernel then uses the free functions here, which
//! forward to the single [`KernelMemory`] and [`KERNEL_HEAP`].
//!
//! Calling any of them before initialization is a fatal error: the core logs
//! the operation's name and halts.

use crate::bump_heap::BumpHeap;
use crate::kernel_memory::KernelMemory;
use crate::page_alloc::VirtualPageAlloc;
use crate::phys_mapper::HhdmPhysMapper;
use core::ptr::NonNull;
use kernel_fatal::{FatalHandler, FatalReason, HaltOnFatal, halt};
use kernel_info::boot::BootInfo;
use kernel_info::memory::{KERNEL_HEAP_SIZE, MMIO_WINDOW_END, MMIO_WINDOW_START};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::SyncOnceCell;
use kernel_vmem::OutOfMemory;

/// The kernel's memory context, as installed by [`init_frame_allocator`].
pub type KernelMemoryContext = KernelMemory<HhdmPhysMapper, HaltOnFatal>;

static KERNEL_MEMORY: SyncOnceCell<KernelMemoryContext> = SyncOnceCell::new();

/// The kernel heap. Also the global allocator on bare metal.
#[cfg_attr(target_os = "none", global_allocator)]
pub static KERNEL_HEAP: BumpHeap<KERNEL_HEAP_SIZE> = BumpHeap::new();

/// Build the kernel memory context from the boot information.
///
/// Every usable region of the memory map goes to the frame allocator. A
/// second call logs a warning and returns the existing context unchanged.
///
/// # Safety
/// - `boot.hhdm_offset` must map all of physical memory writably.
/// - Usable regions must really be unused; their frames get overwritten.
/// - No other core may use the entry points below until this returns.
pub unsafe fn init_frame_allocator(boot: &BootInfo<'_>) -> &'static KernelMemoryContext {
    if let Some(existing) = KERNEL_MEMORY.get() {
        log::warn!("frame allocator already initialized; ignoring second boot map");
        return existing;
    }

    let window = VirtualPageAlloc::new(
        VirtualAddress::new(MMIO_WINDOW_START),
        VirtualAddress::new(MMIO_WINDOW_END),
    );
    KERNEL_MEMORY.get_or_init(|| unsafe {
        KernelMemory::new(
            HhdmPhysMapper::new(boot.hhdm_offset),
            HaltOnFatal,
            boot.memory_map,
            window,
        )
    })
}

/// The context, or a fatal halt naming `operation`.
fn kernel_memory(operation: &'static str) -> &'static KernelMemoryContext {
    match KERNEL_MEMORY.get() {
        Some(memory) => memory,
        None => {
            HaltOnFatal.fatal(FatalReason::NotInitialized { operation });
            halt()
        }
    }
}

/// # Errors
/// [`OutOfMemory`] when no frame is left.
pub fn alloc_frame() -> Result<PhysicalAddress, OutOfMemory> {
    kernel_memory("alloc_frame").alloc_frame()
}

/// # Errors
/// [`OutOfMemory`] when no frame is left.
pub fn alloc_frame_zeroed() -> Result<PhysicalAddress, OutOfMemory> {
    kernel_memory("alloc_frame_zeroed").alloc_frame_zeroed()
}

/// # Safety
/// `address` must come from [`alloc_frame`] and nothing may still use it.
pub unsafe fn free_frame(address: PhysicalAddress) {
    unsafe { kernel_memory("free_frame").free_frame(address) };
}

#[must_use]
pub fn physical_to_virtual(pa: PhysicalAddress) -> VirtualAddress {
    kernel_memory("physical_to_virtual").physical_to_virtual(pa)
}

/// Map `va` in the active address space to a fresh frame.
///
/// # Safety
/// Must run at CPL0 with CR3 holding a table reachable through the direct
/// map. Callers mapping into shared ranges serialize among themselves.
///
/// # Errors
/// See [`KernelMemory::map_page_in`].
#[cfg(target_arch = "x86_64")]
pub unsafe fn map_page(
    va: VirtualAddress,
    flags: kernel_vmem::PageEntryBits,
) -> Result<PhysicalAddress, kernel_vmem::MapError> {
    unsafe { kernel_memory("map_page").map_page(va, flags) }
}

/// Map device memory uncached into the active address space.
///
/// # Safety
/// As for [`map_page`].
///
/// # Errors
/// See [`KernelMemory::map_mmio_in`].
#[cfg(target_arch = "x86_64")]
pub unsafe fn map_mmio(pa: PhysicalAddress, len: u64) -> Result<VirtualAddress, kernel_vmem::MapError> {
    unsafe { kernel_memory("map_mmio").map_mmio(pa, len) }
}

/// Allocate `size` bytes from the kernel heap, 16-byte aligned.
///
/// # Errors
/// [`OutOfMemory`] when the heap arena is exhausted.
pub fn kalloc(size: usize) -> Result<NonNull<u8>, OutOfMemory> {
    KERNEL_HEAP.allocate(size)
}

/// # Errors
/// [`OutOfMemory`] when the heap arena is exhausted.
pub fn kalloc_zeroed(size: usize) -> Result<NonNull<u8>, OutOfMemory> {
    KERNEL_HEAP.allocate_zeroed(size)
}

/// No-op; heap memory is never reclaimed.
pub fn kfree(ptr: NonNull<u8>) {
    KERNEL_HEAP.free(ptr);
}
