//! Interrupt masking and the interrupt-disabling spin lock.
//!
//! On `x86_64-unknown-none` the helpers below issue `cli`/`sti` and read
//! `RFLAGS` via `pushfq/pop`. These instructions must only run at CPL 0.
//! On every other target they compile to no-ops and
//! [`interrupts_enabled`] reports `false`.

use crate::{SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};

/// `RFLAGS.IF`, bit 9.
pub const RFLAGS_IF: u64 = 1 << 9;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod arch {
    #[inline]
    pub fn rflags() -> u64 {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(preserves_flags)) }
        r
    }

    #[inline]
    pub fn disable() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod arch {
    #[inline]
    pub const fn rflags() -> u64 {
        0
    }

    #[inline]
    pub const fn disable() {}

    #[inline]
    pub const fn enable() {}
}

/// Returns the current `RFLAGS` value (always `0` on hosted targets).
#[inline]
#[must_use]
pub fn rflags() -> u64 {
    arch::rflags()
}

/// Whether maskable interrupts are currently enabled on this core.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    rflags() & RFLAGS_IF != 0
}

/// Disables maskable interrupts (`cli`).
#[inline]
pub fn cli_stop_interrupts() {
    arch::disable();
}

/// Enables maskable interrupts (`sti`).
#[inline]
pub fn sti_enable_interrupts() {
    arch::enable();
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// The `IF` bit is sampled once. On drop, `sti` is issued **only** if
/// interrupts were enabled when the guard was created, so nested guards
/// leave interrupts off until the outermost one goes away.
///
/// ```no_run
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled};
///
/// {
///     let _g = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// ```
#[derive(Debug)]
pub struct IrqGuard {
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            cli_stop_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }

    /// Whether this guard will re-enable interrupts when dropped.
    #[inline]
    #[must_use]
    pub const fn restores_interrupts(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            sti_enable_interrupts();
        }
    }
}

/// A [`SpinLock`] that masks interrupts on the local core while held.
///
/// Acquisition order is: save `IF` and `cli`, then spin for the lock.
/// Release order is the reverse: unlock, then restore `IF`. An interrupt
/// arriving on the same core therefore can never observe the lock held by
/// the code it interrupted.
///
/// ```
/// use kernel_sync::IrqSpinLock;
///
/// static HEAD: IrqSpinLock<Option<u64>> = IrqSpinLock::new(None);
///
/// HEAD.with_lock(|h| *h = Some(0x1000));
/// assert_eq!(*HEAD.lock(), Some(0x1000));
/// ```
#[derive(Debug, Default)]
pub struct IrqSpinLock<T> {
    inner: SpinLock<T>,
}

impl<T> IrqSpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: SpinLock::new(value),
        }
    }

    #[inline]
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let irq = IrqGuard::new();
        let guard = self.inner.lock();
        IrqSpinLockGuard { guard, _irq: irq }
    }

    /// Try once. On failure the interrupt state is restored before returning.
    #[inline]
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let irq = IrqGuard::new();
        let guard = self.inner.try_lock()?;
        Some(IrqSpinLockGuard { guard, _irq: irq })
    }

    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

/// Guard of an [`IrqSpinLock`].
///
/// Fields drop in declaration order: the spin guard unlocks first, then the
/// interrupt guard restores `IF`.
pub struct IrqSpinLockGuard<'a, T> {
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosted_masking_is_inert() {
        assert!(!interrupts_enabled());
        let g = IrqGuard::new();
        assert!(!g.restores_interrupts());
        drop(g);
        assert!(!interrupts_enabled());
    }

    #[test]
    fn failed_try_lock_releases_nothing() {
        let l = IrqSpinLock::new(1u32);
        let held = l.lock();
        assert!(l.try_lock().is_none());
        assert!(l.is_locked());
        drop(held);
        assert!(!l.is_locked());
        assert!(l.try_lock().is_some());
    }
}
