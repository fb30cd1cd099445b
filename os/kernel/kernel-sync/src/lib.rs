//! # Kernel synchronization primitives
//!
//! The memory manager shares state between all cores: the free-frame list
//! behind a lock, and the kernel memory context published once at boot.
//!
//! * [`SpinLock`]: test-and-test-and-set spin lock with an RAII guard.
//! * [`IrqSpinLock`]: a [`SpinLock`] that additionally masks interrupts on the
//!   local core while held, so an interrupt handler cannot re-enter the
//!   allocator and spin against its own core.
//! * [`SyncOnceCell`]: single-initialization cell for kernel-wide globals.
//!
//! Interrupt masking only touches `RFLAGS.IF` on the bare-metal x86-64 target.
//! On hosted targets it is a no-op so the locks can be exercised by unit tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;
mod sync_once_cell;

pub use irq::{IrqGuard, IrqSpinLock, IrqSpinLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
