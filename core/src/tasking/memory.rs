//! Shared memory: refcounted page runs and per-task mappings.
//!
//! A `MemoryObject` is a contiguous run of physical pages identified by
//! an integer id. Tasks bind objects into their own address space with
//! `MemoryMapping`s; each mapping holds one reference, and the object's
//! pages are released exactly when the last reference drops. Distinct
//! tasks get distinct virtual bases over identical physical pages, so
//! sharing needs no shared virtual address.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use vesper_abi::addr::{PhysAddr, PhysRange, VirtAddr, VirtRange};
use vesper_abi::mem::{MemoryFlags, PAGE_SIZE, PageDir, page_count};
use vesper_lib::services::memory;
use vesper_lib::{IrqMutex, align_up, klog_debug};

use super::task::{Task, TaskId, with_task_table};
use crate::error::{TaskingError, TaskingResult};

// =============================================================================
// Object registry
// =============================================================================

struct MemoryObject {
    id: u32,
    addr: PhysAddr,
    size: usize,
    /// Increments are bare atomics; the caller already holds a live
    /// reference. The decrement-to-zero decision happens under the
    /// registry lock so it cannot race a concurrent `by_id`.
    refcount: AtomicU32,
}

struct ObjectRegistry {
    objects: Vec<MemoryObject>,
    next_id: u32,
}

impl ObjectRegistry {
    const fn new() -> Self {
        Self {
            objects: Vec::new(),
            next_id: 0,
        }
    }

    fn find(&self, id: u32) -> Option<&MemoryObject> {
        self.objects.iter().find(|o| o.id == id)
    }
}

static MEMORY_OBJECTS: IrqMutex<ObjectRegistry> = IrqMutex::new(ObjectRegistry::new());

/// Reset the registry. Called once from `tasking_initialize`.
pub fn shared_memory_init() {
    let mut registry = MEMORY_OBJECTS.lock();
    registry.objects.clear();
    registry.next_id = 0;
}

/// Allocate a page-aligned object with one reference. Returns its id.
pub fn memory_object_create(size: usize) -> u32 {
    let size = align_up(size, PAGE_SIZE);
    let addr = memory::physical_alloc(page_count(size));

    let mut registry = MEMORY_OBJECTS.lock();
    let id = registry.next_id;
    registry.next_id += 1;
    registry.objects.push(MemoryObject {
        id,
        addr,
        size,
        refcount: AtomicU32::new(1),
    });

    klog_debug!("memory object {} created, {} bytes at {}", id, size, addr);

    id
}

/// Take another reference on an object the caller already holds one
/// reference to.
fn memory_object_ref(id: u32) {
    let registry = MEMORY_OBJECTS.lock();
    let object = registry.find(id).expect("ref of unknown memory object");
    object.refcount.fetch_add(1, Ordering::SeqCst);
}

/// Drop a reference; the object dies when the count reaches zero.
pub fn memory_object_deref(id: u32) {
    let mut registry = MEMORY_OBJECTS.lock();
    let idx = registry
        .objects
        .iter()
        .position(|o| o.id == id)
        .expect("deref of unknown memory object");

    if registry.objects[idx].refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
        let object = registry.objects.remove(idx);
        memory::physical_free(object.addr, page_count(object.size));
        klog_debug!("memory object {} destroyed", id);
    }
}

/// Look an object up, taking a reference on it. The caller owns the
/// returned reference and must eventually `deref` it.
pub fn memory_object_by_id(id: u32) -> Option<u32> {
    let registry = MEMORY_OBJECTS.lock();
    let object = registry.find(id)?;
    object.refcount.fetch_add(1, Ordering::SeqCst);
    Some(id)
}

/// Current reference count, for diagnostics and tests.
pub fn memory_object_refcount(id: u32) -> Option<u32> {
    let registry = MEMORY_OBJECTS.lock();
    registry.find(id).map(|o| o.refcount.load(Ordering::SeqCst))
}

fn object_backing(id: u32) -> Option<(PhysAddr, usize)> {
    let registry = MEMORY_OBJECTS.lock();
    registry.find(id).map(|o| (o.addr, o.size))
}

// =============================================================================
// Mappings
// =============================================================================

/// A task's binding of a memory object into its address space. Owns
/// one reference to the object.
pub(super) struct MemoryMapping {
    pub(super) object: u32,
    pub(super) addr: VirtAddr,
    pub(super) size: usize,
}

/// Map `object_id` into the task, taking the mapping's reference.
fn task_memory_mapping_create(task_id: TaskId, object_id: u32) -> TaskingResult<(VirtAddr, usize)> {
    memory_object_ref(object_id);
    let (phys, size) = object_backing(object_id).expect("mapping of unknown memory object");

    let result = with_task_table(|table| {
        let task = table.get_mut(task_id).ok_or(TaskingError::NoSuchTask)?;
        let addr = memory::virtual_alloc(task.pdir, PhysRange::new(phys, size), MemoryFlags::USER);
        task.memory_mappings.push(MemoryMapping {
            object: object_id,
            addr,
            size,
        });
        Ok((addr, size))
    });

    if result.is_err() {
        memory_object_deref(object_id);
    }
    result
}

/// Unmap and drop the mapping's object reference.
fn task_memory_mapping_destroy(pdir: PageDir, mapping: MemoryMapping) {
    memory::virtual_free(pdir, VirtRange::new(mapping.addr, mapping.size));
    memory_object_deref(mapping.object);
}

/// Release every mapping a task still holds. Used by `task_destroy`.
pub(super) fn destroy_all_mappings(task: &mut Task) {
    let pdir = task.pdir;
    for mapping in task.memory_mappings.drain(..) {
        task_memory_mapping_destroy(pdir, mapping);
    }
}

// =============================================================================
// User-facing operations
// =============================================================================

/// Create an object and map it into `task_id`. Returns the mapping's
/// virtual base; the object lives as long as some task maps it.
pub fn task_shared_memory_alloc(task_id: TaskId, size: usize) -> TaskingResult<VirtAddr> {
    let object_id = memory_object_create(size);
    let result = task_memory_mapping_create(task_id, object_id);
    // Drop the creation reference; the mapping keeps the object alive.
    memory_object_deref(object_id);
    result.map(|(addr, _)| addr)
}

/// Unmap the mapping based at `addr`. The underlying object dies iff
/// no other task still maps it.
pub fn task_shared_memory_free(task_id: TaskId, addr: VirtAddr) -> TaskingResult {
    let (pdir, mapping) = with_task_table(|table| {
        let task = table.get_mut(task_id).ok_or(TaskingError::NoSuchTask)?;
        let idx = task
            .memory_mappings
            .iter()
            .position(|m| m.addr == addr)
            .ok_or(TaskingError::BadAddress)?;
        Ok((task.pdir, task.memory_mappings.remove(idx)))
    })?;

    task_memory_mapping_destroy(pdir, mapping);
    Ok(())
}

/// Map the object behind `handle` into `task_id`. Returns the mapping's
/// virtual base and size.
pub fn task_shared_memory_include(task_id: TaskId, handle: u32) -> TaskingResult<(VirtAddr, usize)> {
    let object_id = memory_object_by_id(handle).ok_or(TaskingError::BadAddress)?;
    let result = task_memory_mapping_create(task_id, object_id);
    // Drop the lookup reference; on success the mapping holds its own.
    memory_object_deref(object_id);
    result
}

/// Reverse lookup: the object id behind one of the task's mappings,
/// suitable for handing to another task over IPC.
pub fn task_shared_memory_get_handle(task_id: TaskId, addr: VirtAddr) -> TaskingResult<u32> {
    with_task_table(|table| {
        let task = table.get(task_id).ok_or(TaskingError::NoSuchTask)?;
        task.memory_mappings
            .iter()
            .find(|m| m.addr == addr)
            .map(|m| m.object)
            .ok_or(TaskingError::BadAddress)
    })
}
