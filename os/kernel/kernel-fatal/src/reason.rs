use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Why the kernel is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FatalReason {
    /// A present page-table entry on the walk to `va` carries permission
    /// bits other than the ones requested.
    #[error(
        "page-table flag mismatch mapping {va} at L{level}: entry {existing:#018x}, requested {requested:#x}"
    )]
    FlagMismatch {
        va: VirtualAddress,
        level: u8,
        existing: u64,
        requested: u64,
    },

    /// A free-list node failed validation while being consumed.
    #[error("corrupted free-list node at {node}: base {base}, run length {run_length}")]
    CorruptFreeList {
        node: PhysicalAddress,
        base: PhysicalAddress,
        run_length: u64,
    },

    /// A frame handed back to the allocator was not 4 KiB-aligned.
    #[error("freeing misaligned frame address {address}")]
    MisalignedFree { address: PhysicalAddress },

    /// A kernel-wide entry point ran before the memory manager was set up.
    #[error("{operation} called before the memory manager was initialized")]
    NotInitialized { operation: &'static str },
}
