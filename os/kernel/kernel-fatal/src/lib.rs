//! # Fatal Invariant Violations
//!
//! Some failures in the memory manager are structural: a page-table node
//! shared by two mappings with incompatible permissions, or a free-list node
//! that no longer describes a sane run. Continuing after one of those leaves
//! the address space corrupted, so the kernel stops.
//!
//! Instead of halting in place, every component receives a [`FatalHandler`]
//! and reports through it:
//!
//! ```text
//!  FreeListFrameAlloc ─┐
//!                      ├──▶ FatalHandler::fatal(FatalReason)
//!  AddressSpace::map ──┘          │
//!                     ┌───────────┴───────────┐
//!                     ▼                       ▼
//!               HaltOnFatal              RecordingFatal
//!          (log::error!, cli; hlt)   (stores the reason; tests)
//! ```
//!
//! After reporting, the component still returns a typed error, so a
//! non-halting handler observes a well-defined outcome.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod halt;
mod reason;
mod recording;

pub use halt::{HaltOnFatal, halt};
pub use reason::FatalReason;
pub use recording::RecordingFatal;

/// Capability to report an unrecoverable invariant violation.
///
/// Production handlers never return. Test doubles may, in which case the
/// caller continues with its error path.
pub trait FatalHandler {
    fn fatal(&self, reason: FatalReason);
}

impl<T: FatalHandler + ?Sized> FatalHandler for &T {
    #[inline]
    fn fatal(&self, reason: FatalReason) {
        (**self).fatal(reason);
    }
}
