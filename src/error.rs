//! Error handling for the demand paging subsystem

use core::fmt;

use alloc::string::String;

use crate::addr::VirtAddr;

/// Common error type used throughout the paging subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The physical frame pool is empty and no frame could be evicted
    OutOfMemory,
    /// No free swap slot was available during eviction. This is fatal:
    /// there is no slot reclamation policy, so the caller must abort the
    /// affected execution rather than retry.
    SwapExhausted,
    /// A swap-in found no occupied slot matching the page's record.
    /// Callers must treat this as data-integrity loss, not retry.
    SwapSlotMissing,
    /// An entry for this virtual address already exists
    AlreadyMapped(VirtAddr),
    /// No entry exists for this virtual address, or it is not resident
    NotMapped(VirtAddr),
    /// Write access to a page allocated read-only
    ReadOnly(VirtAddr),
    /// Invalid argument
    InvalidArgument(String),
    /// I/O error from the block device or a backing file
    Io(String),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::OutOfMemory => write!(f, "Out of memory"),
            VmError::SwapExhausted => write!(f, "Swap space exhausted"),
            VmError::SwapSlotMissing => write!(f, "Swap slot missing"),
            VmError::AlreadyMapped(va) => write!(f, "Address already mapped: {:#x}", va.as_usize()),
            VmError::NotMapped(va) => write!(f, "Address not mapped: {:#x}", va.as_usize()),
            VmError::ReadOnly(va) => write!(f, "Write to read-only page: {:#x}", va.as_usize()),
            VmError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            VmError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_display() {
        assert_eq!(
            format!("{}", VmError::AlreadyMapped(VirtAddr::new(0x1000))),
            "Address already mapped: 0x1000"
        );
        assert_eq!(format!("{}", VmError::SwapExhausted), "Swap space exhausted");
    }
}
