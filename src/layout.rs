//! User/kernel address space layout
//!
//! A single fixed layout in the style of a canonical x86_64 split: user
//! addresses in the lower half, kernel addresses in the upper half. The
//! fault resolver uses these bounds to classify faults before consulting
//! any per-process state.

use static_assertions::const_assert;

use crate::addr::{PAGE_SIZE, VirtAddr};

/// Base of the kernel half of the address space. Any fault at or above
/// this address is never handled on behalf of user code.
pub const KERNEL_BASE: usize = 0xFFFF_8000_0000_0000;

/// Lowest mappable user address. The zero page stays unmapped so null
/// dereferences always fault.
pub const USER_BASE: usize = 0x0000_0000_0040_0000;

/// Fixed top-of-stack address for user processes (exclusive of the
/// kernel guard above it).
pub const USER_STACK_TOP: usize = 0x0000_7FFF_FFFF_F000;

/// Maximum distance the user stack may grow below [`USER_STACK_TOP`].
pub const STACK_GROWTH_LIMIT: usize = 1 << 20;

/// Lowest address that still qualifies for stack growth.
pub const STACK_GROWTH_BASE: usize = USER_STACK_TOP - STACK_GROWTH_LIMIT;

const_assert!(USER_STACK_TOP % PAGE_SIZE == 0);
const_assert!(STACK_GROWTH_LIMIT % PAGE_SIZE == 0);
const_assert!(USER_BASE < STACK_GROWTH_BASE);

/// Check if an address is in kernel space
#[inline]
pub const fn is_kernel_address(addr: usize) -> bool {
    addr >= KERNEL_BASE
}

/// Check if an address is in user space
#[inline]
pub const fn is_user_address(addr: usize) -> bool {
    addr >= USER_BASE && addr < KERNEL_BASE
}

/// Check whether a faulting address together with the presumed stack
/// pointer qualifies for stack growth.
///
/// Two patterns are accepted, both bounded by [`STACK_GROWTH_LIMIT`]
/// below the fixed stack top: an access exactly 8 bytes below the stack
/// pointer (the push-underflow pattern), or an access at or above the
/// stack pointer.
#[inline]
pub fn is_stack_growth(addr: VirtAddr, stack_pointer: usize) -> bool {
    let addr = addr.as_usize();
    let below = stack_pointer.wrapping_sub(8);
    (STACK_GROWTH_BASE <= below && below == addr && addr <= USER_STACK_TOP)
        || (STACK_GROWTH_BASE <= stack_pointer && stack_pointer <= addr && addr <= USER_STACK_TOP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_classification() {
        assert!(is_kernel_address(KERNEL_BASE));
        assert!(!is_kernel_address(USER_STACK_TOP));
        assert!(is_user_address(USER_BASE));
        assert!(!is_user_address(0));
    }

    #[test]
    fn test_stack_growth_patterns() {
        let sp = USER_STACK_TOP - 0x2000;
        // Push underflow: exactly 8 bytes below the stack pointer.
        assert!(is_stack_growth(VirtAddr::new(sp - 8), sp));
        // At or above the stack pointer.
        assert!(is_stack_growth(VirtAddr::new(sp), sp));
        assert!(is_stack_growth(VirtAddr::new(sp + 0x100), sp));
        // 16 bytes below is not a recognized pattern.
        assert!(!is_stack_growth(VirtAddr::new(sp - 16), sp));
        // Outside the growth window.
        assert!(!is_stack_growth(
            VirtAddr::new(STACK_GROWTH_BASE - PAGE_SIZE),
            STACK_GROWTH_BASE - PAGE_SIZE + 8,
        ));
    }
}
