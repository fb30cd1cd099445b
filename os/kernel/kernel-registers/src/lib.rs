//! # Typed `X86_64` Control Registers
//!
//! Only what the memory manager needs: [`Cr3`](cr3::Cr3), the root of the
//! active page-table hierarchy. Reading it goes through
//! [`LoadRegisterUnsafe`] and is compiled in only with the `asm` feature on
//! `x86_64`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr3;

pub use cr3::Cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}
