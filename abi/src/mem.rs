//! Memory constants and flags shared with the memory manager.

use bitflags::bitflags;

pub const PAGE_SIZE: usize = 4096;

/// Round `size` up to the next page boundary.
#[inline]
pub const fn page_align_up(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Number of pages needed to back `size` bytes.
#[inline]
pub const fn page_count(size: usize) -> usize {
    page_align_up(size) / PAGE_SIZE
}

bitflags! {
    /// Flags passed to the memory manager's allocation and mapping calls.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MemoryFlags: u32 {
        /// Zero the region before handing it out.
        const CLEAR = 1 << 0;
        /// Accessible from user mode.
        const USER = 1 << 1;
    }
}

/// Opaque handle to a page directory, owned by the memory manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PageDir(pub u64);
