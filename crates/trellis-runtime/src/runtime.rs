//! Runtime assembly
//!
//! [`GlobalState`] is the state shared by every thread of one embedded
//! runtime: the class database it was built against, the materialized binder
//! dispatch table, the optionally attached task scheduler, and the shutdown
//! flag that turns signal emission into a no-op during teardown.
//!
//! [`ScriptRuntime`] is the embedder-facing facade that wires these together.

use crate::binder::ClassBinder;
use crate::capabilities::Identity;
use crate::classdb::ClassDb;
use crate::scheduler::TaskScheduler;
use crate::thread::ScriptThread;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use trellis_core::NameMap;

/// Which virtual machine a thread belongs to, for per-VM accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum VmKind {
    /// The privileged core VM.
    Core = 0,
    /// The game-facing VM.
    Game = 1,
}

/// Number of VMs tracked per runtime.
pub const VM_COUNT: usize = 2;

/// State shared by all threads of one runtime.
pub struct GlobalState {
    classdb: Arc<ClassDb>,
    dispatch: RwLock<NameMap<Arc<ClassBinder>>>,
    scheduler: Mutex<Option<Arc<TaskScheduler>>>,
    shutdown: AtomicBool,
    started: Instant,
}

impl GlobalState {
    fn new(classdb: Arc<ClassDb>) -> Arc<Self> {
        Arc::new(Self {
            classdb,
            dispatch: RwLock::new(NameMap::new()),
            scheduler: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            started: Instant::now(),
        })
    }

    /// The class database this runtime was built with.
    pub fn classdb(&self) -> &Arc<ClassDb> {
        &self.classdb
    }

    /// The attached scheduler, if any.
    pub fn scheduler(&self) -> Option<Arc<TaskScheduler>> {
        self.scheduler.lock().clone()
    }

    /// Whether the runtime is shutting down. Emission and scheduling become
    /// no-ops once set.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Seconds since the runtime was created.
    pub fn uptime(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// The materialized binder for `class`, if registered.
    pub fn binder(&self, class: &str) -> Option<Arc<ClassBinder>> {
        self.dispatch.read().get(class).cloned()
    }

    /// Materialize a binder under `class`. Returns false if one is already
    /// installed, leaving the existing binder untouched.
    pub(crate) fn install_binder(&self, class: &str, binder: Arc<ClassBinder>) -> bool {
        let mut dispatch = self.dispatch.write();
        if dispatch.contains(class) {
            return false;
        }
        dispatch.insert(class, binder);
        true
    }
}

/// An embedded runtime: shared state plus its main thread.
pub struct ScriptRuntime {
    global: Arc<GlobalState>,
    main: Arc<ScriptThread>,
}

impl ScriptRuntime {
    /// Build a core-VM runtime over `classdb` with an elevated main thread.
    pub fn new(classdb: Arc<ClassDb>) -> Self {
        Self::with_vm(classdb, VmKind::Core, Identity::ElevatedGameScript)
    }

    /// Build a runtime with an explicit VM kind and main-thread identity.
    pub fn with_vm(classdb: Arc<ClassDb>, vm: VmKind, identity: Identity) -> Self {
        let global = GlobalState::new(classdb);
        let main = ScriptThread::new(global.clone(), vm, identity);
        Self { global, main }
    }

    /// The shared state.
    pub fn global(&self) -> &Arc<GlobalState> {
        &self.global
    }

    /// The main thread.
    pub fn main_thread(&self) -> &Arc<ScriptThread> {
        &self.main
    }

    /// Materialize every registered class binder into the dispatch table.
    /// Idempotent; classes materialized earlier are left as they are.
    pub fn register_classes(&self) {
        self.global.classdb().clone().register(&self.global);
    }

    /// Attach a scheduler, enabling waits and deferred signal delivery.
    pub fn install_scheduler(&self) -> Arc<TaskScheduler> {
        let scheduler = TaskScheduler::new();
        *self.global.scheduler.lock() = Some(scheduler.clone());
        scheduler
    }

    /// Spawn a thread sharing this runtime.
    pub fn new_thread(&self, identity: Identity) -> Arc<ScriptThread> {
        self.main.new_child(identity)
    }

    /// Begin teardown: further emits and enqueues become no-ops, and the
    /// main thread is closed.
    pub fn shutdown(&self) {
        self.global.shutdown.store(true, Ordering::Release);
        self.main.close();
    }
}

impl Drop for ScriptRuntime {
    fn drop(&mut self) {
        self.global.shutdown.store(true, Ordering::Release);
    }
}
