//! # Kernel Memory Allocation
//!
//! Physical frames, the direct map, and the kernel heap, tied together into
//! one context the rest of the kernel talks to.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │   global: init_frame_allocator, alloc_frame,        │
//! │   map_page, kalloc, …  (one KernelMemory + heap)    │
//! └───────────┬─────────────────────────────┬───────────┘
//!             │                             │
//! ┌───────────▼─────────────┐   ┌───────────▼───────────┐
//! │      KernelMemory       │   │       BumpHeap        │
//! │ map_page / map_mmio     │   │ 256 MiB static arena, │
//! │ (kernel_vmem::Address-  │   │ CAS bump, no free     │
//! │  Space)                 │   └───────────────────────┘
//! └───────────┬─────────────┘
//!             │
//! ┌───────────▼─────────────┐   ┌───────────────────────┐
//! │    LockedFrameAlloc     │──▶│    HhdmPhysMapper     │
//! │ free list of runs,      │   │ pa → offset + pa      │
//! │ nodes stored in place   │   └───────────────────────┘
//! └─────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! - [`phys_mapper`]: [`HhdmPhysMapper`](phys_mapper::HhdmPhysMapper), the
//!   direct-map translator every other part writes through.
//! - [`frame_alloc`]: the free-list frame allocator and its interrupt-safe
//!   locked wrapper.
//! - [`bump_heap`]: the kernel heap; also the `#[global_allocator]` on bare
//!   metal.
//! - [`page_alloc`]: virtual page ranges for device mappings.
//! - [`kernel_memory`]: [`KernelMemory`](kernel_memory::KernelMemory), the
//!   explicitly constructed context.
//! - [`global`]: the kernel-wide free functions backed by a single context.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_alloc::global::{alloc_frame, init_frame_allocator, kalloc};
//! use kernel_info::boot::BootInfo;
//!
//! fn early_boot(boot: &BootInfo<'_>) {
//!     let memory = unsafe { init_frame_allocator(boot) };
//!     log::info!("{} frames free", memory.free_frames());
//!
//!     let table = alloc_frame().expect("no memory for the first table");
//!     let scratch = kalloc(512).expect("heap exhausted during boot");
//!     # let _ = (table, scratch);
//! }
//! ```
//!
//! ## Concurrency
//!
//! The frame allocator is behind an [`IrqSpinLock`](kernel_sync::IrqSpinLock):
//! interrupts are masked while the list is touched, so a handler on the same
//! core can't deadlock against its own allocation. The heap and the MMIO
//! window reserve with compare-and-swap and never block. Page-table mutation
//! is not locked; see [`kernel_vmem::address_space`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod bump_heap;
pub mod frame_alloc;
pub mod global;
pub mod kernel_memory;
pub mod page_alloc;
pub mod phys_mapper;
