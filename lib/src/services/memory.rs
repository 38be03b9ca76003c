//! Memory-manager services: page directories, region allocation,
//! physical pages, and cross-directory access.

use vesper_abi::addr::{PhysAddr, PhysRange, VirtAddr, VirtRange};
use vesper_abi::mem::{MemoryFlags, PageDir};

crate::define_service! {
    memory => MemoryServices {
        /// The shared kernel page directory.
        kpdir() -> PageDir;
        pdir_create() -> PageDir;
        pdir_destroy(pdir: PageDir);
        pdir_switch(pdir: PageDir);
        /// Allocate and map `size` bytes inside `pdir`.
        alloc(pdir: PageDir, size: usize, flags: MemoryFlags) -> VirtAddr;
        /// Unmap and release a region allocated with `alloc`.
        free(pdir: PageDir, range: VirtRange);
        /// Map an already-backed virtual range.
        map(pdir: PageDir, range: VirtRange, flags: MemoryFlags);
        /// Map an existing physical run at a fresh virtual base.
        virtual_alloc(pdir: PageDir, range: PhysRange, flags: MemoryFlags) -> VirtAddr;
        /// Unmap a range without releasing its physical backing.
        virtual_free(pdir: PageDir, range: VirtRange);
        physical_alloc(pages: usize) -> PhysAddr;
        physical_free(addr: PhysAddr, pages: usize);
        /// Copy into a mapped region of `pdir`, which need not be the
        /// active directory.
        write(pdir: PageDir, addr: VirtAddr, bytes: &[u8]);
        /// Copy out of a mapped region of `pdir`.
        read(pdir: PageDir, addr: VirtAddr, buf: &mut [u8]);
    }
}
