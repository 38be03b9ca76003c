//! Mock collaborator services for driving the task core in-process.
//!
//! The mock scheduler's `yield_now` is a tick driver: it advances the
//! clock, runs actions scheduled for the current tick (for example
//! "cancel task B at tick 1100"), feeds `tasking_timer_tick`, and
//! returns once the yielding task is no longer blocked, so the real
//! blocking paths run end-to-end on the test thread. The mock memory
//! manager backs physical allocations with real byte stores, so
//! shared-memory mappings in different address spaces observe each
//! other's writes exactly like pages would.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, Once, OnceLock};

use vesper_abi::addr::{PhysAddr, PhysRange, VirtAddr, VirtRange};
use vesper_abi::mem::{MemoryFlags, PAGE_SIZE, PageDir};
use vesper_abi::task::{INVALID_TASK_ID, REAPER_PERIOD_TICKS, RFLAGS_IF, TaskContext, TaskState};
use vesper_lib::services::arch::ArchServices;
use vesper_lib::services::filesystem::{FilesystemServices, FsNodeInfo, FsNodeKind};
use vesper_lib::services::memory::MemoryServices;
use vesper_lib::services::platform::PlatformServices;
use vesper_lib::services::scheduler::SchedulerServices;

pub const KPDIR: u64 = 1;
const VA_BASE: u64 = 0x5000_0000_0000;
const PHYS_BASE: u64 = 0x10_0000;
const MAX_YIELD_STEPS: u64 = 1_000_000;

// =============================================================================
// Mock state
// =============================================================================

pub struct MapEntry {
    pub va: u64,
    pub len: usize,
    pub phys: u64,
}

pub struct MockPdir {
    pub next_va: u64,
    pub maps: Vec<MapEntry>,
    pub destroyed: bool,
}

impl MockPdir {
    fn new(id: u64) -> Self {
        Self {
            next_va: VA_BASE + id * 0x1_0000_0000,
            maps: Vec::new(),
            destroyed: false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Action {
    Cancel(u32, i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedEvent {
    CreatedIdle(u32),
    CreatedRunning(u32),
}

pub struct MockState {
    pub tick: u64,
    pub running: u32,
    pub yield_calls: u32,
    pub active_pdir: u64,
    pub actions: Vec<(u64, Action)>,
    pub events: Vec<SchedEvent>,
    pub transitions: Vec<(u32, TaskState, TaskState)>,
    /// `(tick, task, has_blocker)` observed while the yielding task was
    /// parked.
    pub blocked_trace: Vec<(u64, u32, bool)>,
    pub pdirs: HashMap<u64, MockPdir>,
    pub next_pdir: u64,
    pub phys: HashMap<u64, Vec<u8>>,
    pub freed_phys: Vec<u64>,
    pub next_phys: u64,
    pub fs_nodes: HashMap<String, FsNodeKind>,
    pub node_handles: HashMap<String, u64>,
    pub node_refs: HashMap<u64, i64>,
    pub next_node_handle: u64,
    pub closed_handles: Vec<u64>,
    pub console: Vec<u8>,
}

impl MockState {
    fn new() -> Self {
        let mut pdirs = HashMap::new();
        pdirs.insert(KPDIR, MockPdir::new(KPDIR));

        let mut fs_nodes = HashMap::new();
        fs_nodes.insert("/".to_string(), FsNodeKind::Directory);
        fs_nodes.insert("/a".to_string(), FsNodeKind::Directory);
        fs_nodes.insert("/a/b".to_string(), FsNodeKind::Directory);
        fs_nodes.insert("/etc".to_string(), FsNodeKind::Directory);
        fs_nodes.insert("/readme.txt".to_string(), FsNodeKind::Regular);

        Self {
            tick: 0,
            running: INVALID_TASK_ID,
            yield_calls: 0,
            active_pdir: KPDIR,
            actions: Vec::new(),
            events: Vec::new(),
            transitions: Vec::new(),
            blocked_trace: Vec::new(),
            pdirs,
            next_pdir: KPDIR + 1,
            phys: HashMap::new(),
            freed_phys: Vec::new(),
            next_phys: PHYS_BASE,
            fs_nodes,
            node_handles: HashMap::new(),
            node_refs: HashMap::new(),
            next_node_handle: 100,
            closed_handles: Vec::new(),
            console: Vec::new(),
        }
    }
}

fn state() -> MutexGuard<'static, MockState> {
    static STATE: OnceLock<Mutex<MockState>> = OnceLock::new();
    STATE
        .get_or_init(|| Mutex::new(MockState::new()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

pub fn with_state<R>(f: impl FnOnce(&mut MockState) -> R) -> R {
    f(&mut state())
}

// =============================================================================
// Platform services
// =============================================================================

fn mock_timer_ticks() -> u64 {
    state().tick
}

fn mock_irq_save_disable() -> u64 {
    0
}

fn mock_irq_restore(_flags: u64) {}

fn mock_console_puts(bytes: &[u8]) {
    state().console.extend_from_slice(bytes);
}

fn mock_wait_for_interrupt() {}

static PLATFORM: PlatformServices = PlatformServices {
    timer_ticks: mock_timer_ticks,
    irq_save_disable: mock_irq_save_disable,
    irq_restore: mock_irq_restore,
    console_puts: mock_console_puts,
    wait_for_interrupt: mock_wait_for_interrupt,
};

// =============================================================================
// Scheduler services
// =============================================================================

fn mock_did_create_idle_task(task_id: u32) {
    state().events.push(SchedEvent::CreatedIdle(task_id));
}

fn mock_did_create_running_task(task_id: u32) {
    let mut s = state();
    s.events.push(SchedEvent::CreatedRunning(task_id));
    s.running = task_id;
}

fn mock_did_change_task_state(task_id: u32, old: TaskState, new: TaskState) {
    state().transitions.push((task_id, old, new));
}

fn mock_running_task_id() -> u32 {
    state().running
}

fn due_actions(now: u64) -> Vec<Action> {
    let mut s = state();
    let mut due = Vec::new();
    s.actions.retain(|&(at, action)| {
        if now >= at {
            due.push(action);
            false
        } else {
            true
        }
    });
    due
}

fn run_action(action: Action) {
    match action {
        Action::Cancel(task_id, exit_value) => {
            vesper_core::tasking::task_cancel(task_id, exit_value).expect("scheduled cancel");
        }
    }
}

/// Advance one simulated tick: scheduled actions fire first, then the
/// blocker sweep, then (on its period) the reaper, mirroring the
/// order in which the tick handler and a freshly woken reaper run.
fn step_tick(reap: bool) -> u64 {
    let now = {
        let mut s = state();
        s.tick += 1;
        s.tick
    };
    for action in due_actions(now) {
        run_action(action);
    }
    vesper_core::tasking::tasking_timer_tick(now);
    if reap && now % REAPER_PERIOD_TICKS == 0 {
        vesper_core::tasking::reap_canceled_tasks();
    }
    now
}

fn mock_yield_now() {
    let current = {
        let mut s = state();
        s.yield_calls += 1;
        s.running
    };

    for _ in 0..MAX_YIELD_STEPS {
        let now = step_tick(false);
        match vesper_core::tasking::task_by_id(current) {
            None => return,
            Some(info) if info.state != TaskState::Blocked => return,
            Some(info) => {
                state().blocked_trace.push((now, current, info.has_blocker));
            }
        }
    }
    panic!("mock scheduler: task {current} never woke");
}

static SCHEDULER: SchedulerServices = SchedulerServices {
    did_create_idle_task: mock_did_create_idle_task,
    did_create_running_task: mock_did_create_running_task,
    did_change_task_state: mock_did_change_task_state,
    yield_now: mock_yield_now,
    running_task_id: mock_running_task_id,
};

// =============================================================================
// Memory services
// =============================================================================

fn phys_alloc_locked(s: &mut MockState, pages: usize) -> u64 {
    let base = s.next_phys;
    s.next_phys += (pages * PAGE_SIZE) as u64 + PAGE_SIZE as u64;
    s.phys.insert(base, vec![0u8; pages * PAGE_SIZE]);
    base
}

fn map_locked(s: &mut MockState, pdir: u64, phys: u64, len: usize) -> u64 {
    let p = s.pdirs.get_mut(&pdir).expect("unknown page directory");
    assert!(!p.destroyed, "mapping into destroyed page directory");
    let va = p.next_va;
    p.next_va += ((len + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)) as u64 + PAGE_SIZE as u64;
    p.maps.push(MapEntry { va, len, phys });
    va
}

fn translate_locked(s: &MockState, pdir: u64, addr: u64, len: usize) -> (u64, usize) {
    let p = s.pdirs.get(&pdir).expect("unknown page directory");
    for entry in &p.maps {
        if addr >= entry.va && addr + len as u64 <= entry.va + entry.len as u64 {
            return (entry.phys, (addr - entry.va) as usize);
        }
    }
    panic!("unmapped address {addr:#x} in page directory {pdir:#x}");
}

fn mock_kpdir() -> PageDir {
    PageDir(KPDIR)
}

fn mock_pdir_create() -> PageDir {
    let mut s = state();
    let id = s.next_pdir;
    s.next_pdir += 1;
    s.pdirs.insert(id, MockPdir::new(id));
    PageDir(id)
}

fn mock_pdir_destroy(pdir: PageDir) {
    let mut s = state();
    let p = s.pdirs.get_mut(&pdir.0).expect("destroy of unknown page directory");
    assert!(!p.destroyed, "double destroy of page directory");
    p.destroyed = true;
}

fn mock_pdir_switch(pdir: PageDir) {
    state().active_pdir = pdir.0;
}

fn mock_alloc(pdir: PageDir, size: usize, _flags: MemoryFlags) -> VirtAddr {
    let mut s = state();
    let pages = size.div_ceil(PAGE_SIZE);
    let phys = phys_alloc_locked(&mut s, pages);
    VirtAddr::new(map_locked(&mut s, pdir.0, phys, size))
}

fn mock_free(pdir: PageDir, range: VirtRange) {
    let mut s = state();
    let p = s.pdirs.get_mut(&pdir.0).expect("free in unknown page directory");
    let idx = p
        .maps
        .iter()
        .position(|e| e.va == range.base.as_u64())
        .expect("free of unmapped range");
    let entry = p.maps.remove(idx);
    let freed = s.phys.remove(&entry.phys).is_some();
    assert!(freed, "double free of physical pages");
    s.freed_phys.push(entry.phys);
}

fn mock_map(_pdir: PageDir, _range: VirtRange, _flags: MemoryFlags) {}

fn mock_virtual_alloc(pdir: PageDir, range: PhysRange, _flags: MemoryFlags) -> VirtAddr {
    let mut s = state();
    VirtAddr::new(map_locked(&mut s, pdir.0, range.base.as_u64(), range.size))
}

fn mock_virtual_free(pdir: PageDir, range: VirtRange) {
    let mut s = state();
    let p = s
        .pdirs
        .get_mut(&pdir.0)
        .expect("virtual_free in unknown page directory");
    let idx = p
        .maps
        .iter()
        .position(|e| e.va == range.base.as_u64())
        .expect("virtual_free of unmapped range");
    p.maps.remove(idx);
}

fn mock_physical_alloc(pages: usize) -> PhysAddr {
    let mut s = state();
    PhysAddr::new(phys_alloc_locked(&mut s, pages))
}

fn mock_physical_free(addr: PhysAddr, _pages: usize) {
    let mut s = state();
    let freed = s.phys.remove(&addr.as_u64()).is_some();
    assert!(freed, "double free of physical pages");
    s.freed_phys.push(addr.as_u64());
}

fn mock_write(pdir: PageDir, addr: VirtAddr, bytes: &[u8]) {
    let mut s = state();
    let (phys, offset) = translate_locked(&s, pdir.0, addr.as_u64(), bytes.len());
    let store = s.phys.get_mut(&phys).expect("write to freed physical pages");
    store[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn mock_read(pdir: PageDir, addr: VirtAddr, buf: &mut [u8]) {
    let s = state();
    let (phys, offset) = translate_locked(&s, pdir.0, addr.as_u64(), buf.len());
    let store = s.phys.get(&phys).expect("read from freed physical pages");
    buf.copy_from_slice(&store[offset..offset + buf.len()]);
}

static MEMORY: MemoryServices = MemoryServices {
    kpdir: mock_kpdir,
    pdir_create: mock_pdir_create,
    pdir_destroy: mock_pdir_destroy,
    pdir_switch: mock_pdir_switch,
    alloc: mock_alloc,
    free: mock_free,
    map: mock_map,
    virtual_alloc: mock_virtual_alloc,
    virtual_free: mock_virtual_free,
    physical_alloc: mock_physical_alloc,
    physical_free: mock_physical_free,
    write: mock_write,
    read: mock_read,
};

// =============================================================================
// Filesystem services
// =============================================================================

fn mock_find_and_ref(path: &str) -> Option<FsNodeInfo> {
    let mut s = state();
    let kind = *s.fs_nodes.get(path)?;
    let handle = match s.node_handles.get(path) {
        Some(&h) => h,
        None => {
            let h = s.next_node_handle;
            s.next_node_handle += 1;
            s.node_handles.insert(path.to_string(), h);
            h
        }
    };
    *s.node_refs.entry(handle).or_insert(0) += 1;
    Some(FsNodeInfo { handle, kind })
}

fn mock_node_deref(handle: u64) {
    let mut s = state();
    let refs = s.node_refs.entry(handle).or_insert(0);
    *refs -= 1;
    assert!(*refs >= 0, "node reference underflow");
}

fn mock_handle_close(handle: u64) {
    state().closed_handles.push(handle);
}

static FILESYSTEM: FilesystemServices = FilesystemServices {
    find_and_ref: mock_find_and_ref,
    node_deref: mock_node_deref,
    handle_close: mock_handle_close,
};

// =============================================================================
// Arch services
// =============================================================================

fn mock_save_context(context: &mut TaskContext) {
    context.rflags = RFLAGS_IF;
}

static ARCH: ArchServices = ArchServices {
    save_context: mock_save_context,
};

// =============================================================================
// Fixture
// =============================================================================

fn install_services() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        vesper_lib::services::platform::register_platform_services(&PLATFORM);
        vesper_lib::services::scheduler::register_scheduler_services(&SCHEDULER);
        vesper_lib::services::memory::register_memory_services(&MEMORY);
        vesper_lib::services::filesystem::register_filesystem_services(&FILESYSTEM);
        vesper_lib::services::arch::register_arch_services(&ARCH);
    });
}

/// Serializes tests and resets the mock world plus both kernel
/// registries. Setup on creation, teardown by the next fixture's
/// reset.
pub struct Fixture {
    _guard: MutexGuard<'static, ()>,
}

impl Fixture {
    pub fn new() -> Self {
        static LOCK: Mutex<()> = Mutex::new(());
        let guard = LOCK.lock().unwrap_or_else(|e| e.into_inner());

        install_services();
        *state() = MockState::new();
        vesper_core::tasking::task_registry_init();
        vesper_core::tasking::shared_memory_init();

        Self { _guard: guard }
    }

    pub fn set_tick(&self, tick: u64) {
        state().tick = tick;
    }

    pub fn tick(&self) -> u64 {
        state().tick
    }

    pub fn set_running(&self, task_id: u32) {
        state().running = task_id;
    }

    pub fn schedule_cancel(&self, at_tick: u64, task_id: u32, exit_value: i32) {
        state()
            .actions
            .push((at_tick, Action::Cancel(task_id, exit_value)));
    }

    /// Simulate `n` kernel ticks, with the reaper sweeping on its
    /// period.
    pub fn run_ticks(&self, n: u64) {
        for _ in 0..n {
            step_tick(true);
        }
    }

    pub fn yield_calls(&self) -> u32 {
        state().yield_calls
    }
}
