//! # Memory Layout

pub use kernel_memory_addresses::FRAME_SIZE;

/// End of userspace VA range after which kernel space begins.
pub const USERSPACE_END: u64 = 0xffff_0000_0000_0000;

/// First virtual address of the window device memory is mapped into.
pub const MMIO_WINDOW_START: u64 = 0xffff_e000_0000_0000;

/// One past the last virtual address of the device mapping window.
pub const MMIO_WINDOW_END: u64 = 0xffff_f000_0000_0000;

/// Where the kernel executes (VMA).
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Capacity of the kernel heap arena in bytes.
pub const KERNEL_HEAP_SIZE: usize = 256 * 1024 * 1024;

/// Granule every heap allocation is rounded up to.
pub const HEAP_ALIGN: usize = 16;

const _: () = {
    assert!(MMIO_WINDOW_START >= USERSPACE_END);
    assert!(MMIO_WINDOW_START < MMIO_WINDOW_END);
    assert!(MMIO_WINDOW_START.is_multiple_of(FRAME_SIZE));
    assert!(MMIO_WINDOW_END.is_multiple_of(FRAME_SIZE));
    assert!(KERNEL_BASE > MMIO_WINDOW_END);
    assert!(HEAP_ALIGN.is_power_of_two());
    assert!(KERNEL_HEAP_SIZE.is_multiple_of(HEAP_ALIGN));
};
