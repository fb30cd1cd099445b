//! # Kernel Boot Interface and Memory Layout
//!
//! Records handed over by the boot collaborator and the compile-time layout
//! constants shared by the memory manager.
//!
//! ### Boot Information ([`boot`])
//! * **Memory map**: physical regions tagged usable, reserved, and so on.
//! * **Direct-map offset**: the higher-half direct map (HHDM) base the boot
//!   loader set up; physical address `pa` is reachable at `offset + pa`.
//! * **CPU list**: one record per secondary core with a writable entry point.
//!
//! The boot records are read once during early initialization. They are
//! borrowed, never owned: the boot loader's memory stays reserved until the
//! kernel decides to reclaim it.
//!
//! ### Memory Layout ([`memory`])
//!
//! ```text
//! Virtual Address Space Layout (64-bit):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │         User Space              │
//! USERSPACE_END         ├─────────────────────────────────┤ 0xffff_0000_0000_0000
//!                       │        Guard Region             │
//! hhdm_offset           ├─────────────────────────────────┤ (from boot info)
//!                       │   Higher Half Direct Mapping    │
//! MMIO_WINDOW_START     ├─────────────────────────────────┤ 0xffff_e000_0000_0000
//!                       │   Device mappings (uncached)    │
//! MMIO_WINDOW_END       ├─────────────────────────────────┤ 0xffff_f000_0000_0000
//!                       │       ...                       │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │  Kernel text, data, heap arena  │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! All layout values are `const` and checked with compile-time assertions.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
