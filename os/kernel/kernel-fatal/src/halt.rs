use crate::{FatalHandler, FatalReason};

/// Stop this core for good.
///
/// On bare metal this masks interrupts and parks the core in `hlt`; an NMI
/// wakes it only to halt again. Hosted builds spin.
pub fn halt() -> ! {
    loop {
        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        unsafe {
            core::arch::asm!("cli; hlt", options(nomem, nostack));
        }

        #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
        core::hint::spin_loop();
    }
}

/// Production handler: log the diagnostic, then [`halt`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HaltOnFatal;

impl FatalHandler for HaltOnFatal {
    fn fatal(&self, reason: FatalReason) {
        log::error!("fatal: {reason}");
        halt()
    }
}
