//! NOS Demand Paging
//!
//! This crate provides the demand-paged virtual memory core: page fault
//! resolution, per-process supplemental page tables, a global frame
//! table with second-chance eviction, block-device-backed swap for
//! anonymous memory, lazily materialized memory-mapped files, and
//! address space duplication at fork time.
//!
//! Hardware and storage are reached only through the traits in [`hal`]:
//! a per-process translation table, a sector block device, a file
//! object and a physical frame pool. The [`testing`] module carries
//! software implementations of all four.

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

// Paging modules
pub mod addr;
pub mod error;
pub mod frame;
pub mod hal;
pub mod layout;
pub mod mmap;
pub mod page;
pub mod spt;
pub mod swap;
pub mod testing;
pub mod vm;

// Re-export commonly used types and functions
pub use addr::{PAGE_SHIFT, PAGE_SIZE, SECTOR_SIZE, SECTORS_PER_PAGE, VirtAddr, page_round_down, page_round_up};
pub use error::{Result, VmError};
pub use frame::{FrameId, FrameTable};
pub use hal::{BlockDevice, FramePool, PageBuf, TranslationTable, VmFile};
pub use layout::{KERNEL_BASE, STACK_GROWTH_LIMIT, USER_BASE, USER_STACK_TOP, is_kernel_address, is_user_address};
pub use page::{FileSlice, Page, PageBacking, PageFlags, PageInitFn, PageRef, TargetKind};
pub use spt::{AddressSpace, SupplementalPageTable};
pub use swap::{SlotId, SwapStore};
pub use vm::{FaultContext, Vm};
