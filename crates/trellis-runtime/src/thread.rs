//! Script threads
//!
//! A [`ScriptThread`] stands in for one interpreter coroutine: it owns the
//! marshaling stack bound calls read arguments from and push results to, the
//! ambient identity capability checks run against, the registry that keeps
//! object handles identity-stable across pushes, and the connection owner
//! that tears down signal subscriptions when the thread dies.
//!
//! The stack is framed. Each bound call sees its arguments at positions
//! `1..=nargs` of its own frame; pushing past them accumulates results.
//! Frames unwind fully on error so a failed call never leaks slots.

use crate::binder::{ClassBinder, RawFn};
use crate::capabilities::{self, Capability, Identity};
use crate::error::ScriptError;
use crate::object::{ObjectHandle, ScriptObject};
use crate::runtime::{GlobalState, VmKind};
use crate::signals::ConnectionOwner;
use crate::value::ScriptValue;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Eligible to run.
    Running,
    /// Parked on a wait primitive, resumable by the scheduler.
    Suspended,
    /// Torn down; will never run again.
    Closed,
}

/// Called when the scheduler resumes a suspended thread. Receives the thread
/// and the number of results pushed onto its current frame.
pub type ResumeHook = Arc<dyn Fn(&Arc<ScriptThread>, usize) + Send + Sync>;

#[derive(Default)]
struct StackInner {
    slots: Vec<ScriptValue>,
    frames: Vec<usize>,
}

impl StackInner {
    fn base(&self) -> usize {
        self.frames.last().copied().unwrap_or(0)
    }
}

/// One interpreter coroutine's runtime state.
pub struct ScriptThread {
    id: u64,
    vm: VmKind,
    global: Arc<GlobalState>,
    identity: Mutex<Identity>,
    additional: Mutex<Capability>,
    stack: Mutex<StackInner>,
    state: Mutex<ThreadState>,
    objects: Mutex<FxHashMap<u64, Weak<dyn ScriptObject>>>,
    connections: Mutex<ConnectionOwner>,
    resume_hook: Mutex<Option<ResumeHook>>,
}

impl ScriptThread {
    pub(crate) fn new(global: Arc<GlobalState>, vm: VmKind, identity: Identity) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            vm,
            global,
            identity: Mutex::new(identity),
            additional: Mutex::new(Capability::NONE),
            stack: Mutex::new(StackInner::default()),
            state: Mutex::new(ThreadState::Running),
            objects: Mutex::new(FxHashMap::default()),
            connections: Mutex::new(ConnectionOwner::default()),
            resume_hook: Mutex::new(None),
        })
    }

    /// Unique thread id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Which virtual machine this thread belongs to.
    pub fn vm(&self) -> VmKind {
        self.vm
    }

    /// The shared runtime state.
    pub fn global(&self) -> &Arc<GlobalState> {
        &self.global
    }

    /// The class database this runtime was built with.
    pub fn classdb(&self) -> &Arc<crate::classdb::ClassDb> {
        self.global.classdb()
    }

    /// Spawn a child thread sharing this thread's runtime.
    pub fn new_child(self: &Arc<Self>, identity: Identity) -> Arc<ScriptThread> {
        ScriptThread::new(self.global.clone(), self.vm, identity)
    }

    // ---- identity and capabilities ----

    /// The thread's current identity.
    pub fn identity(&self) -> Identity {
        *self.identity.lock()
    }

    /// Reassign the thread's identity. Ad-hoc grants are kept.
    pub fn set_identity(&self, identity: Identity) {
        *self.identity.lock() = identity;
    }

    /// Grant an ad-hoc capability on top of the identity table.
    pub fn grant(&self, cap: Capability) {
        *self.additional.lock() |= cap;
    }

    /// The effective capability mask: identity table plus ad-hoc grants.
    pub fn capabilities(&self) -> Capability {
        capabilities::identity_capabilities(self.identity()) | *self.additional.lock()
    }

    /// Check `required` against the effective mask, raising a violation
    /// naming `action` if a bit is missing.
    pub fn check_capability(&self, required: Capability, action: &str) -> Result<(), ScriptError> {
        capabilities::check_capability(self.identity(), self.capabilities(), required, action)
    }

    // ---- stack protocol ----

    /// Push a value onto the current frame.
    pub fn push(&self, v: ScriptValue) {
        self.stack.lock().slots.push(v);
    }

    /// Push an object handle, reusing the live registry entry for the same
    /// object so handle identity is stable across pushes.
    pub fn push_object(&self, handle: ObjectHandle) {
        let id = handle.instance().object_id();
        let handle = {
            let mut objects = self.objects.lock();
            match objects.get(&id).and_then(Weak::upgrade) {
                Some(live) => live,
                None => {
                    objects.insert(id, Arc::downgrade(&handle));
                    // Sweep dead entries each time the table doubles past
                    // a small floor, keeping it bounded by live handles.
                    let len = objects.len();
                    if len >= 64 && len.is_power_of_two() {
                        objects.retain(|_, weak| weak.strong_count() > 0);
                    }
                    handle
                }
            }
        };
        self.push(ScriptValue::Object(handle));
    }

    #[cfg(test)]
    pub(crate) fn object_cache_len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Clone the value at 1-based frame position `i`, or `Nil` past the top.
    pub fn arg(&self, i: usize) -> ScriptValue {
        let stack = self.stack.lock();
        if i == 0 {
            return ScriptValue::Nil;
        }
        stack
            .slots
            .get(stack.base() + i - 1)
            .cloned()
            .unwrap_or(ScriptValue::Nil)
    }

    /// Number of values in the current frame.
    pub fn top(&self) -> usize {
        let stack = self.stack.lock();
        stack.slots.len() - stack.base()
    }

    /// Script-visible type name at frame position `i`.
    pub fn type_name_at(&self, i: usize) -> &'static str {
        self.arg(i).type_name()
    }

    /// Remove the value at frame position `i`, shifting the rest down.
    pub fn remove(&self, i: usize) {
        let mut stack = self.stack.lock();
        let idx = stack.base() + i - 1;
        if i >= 1 && idx < stack.slots.len() {
            stack.slots.remove(idx);
        }
    }

    /// Pop the top value of the current frame, if any.
    pub fn pop(&self) -> Option<ScriptValue> {
        let mut stack = self.stack.lock();
        if stack.slots.len() > stack.base() {
            stack.slots.pop()
        } else {
            None
        }
    }

    /// Pop the top `n` values, in stack order (bottom first).
    pub fn pop_results(&self, n: usize) -> Vec<ScriptValue> {
        let mut stack = self.stack.lock();
        let base = stack.base();
        let split = stack.slots.len().saturating_sub(n).max(base);
        stack.slots.split_off(split)
    }

    /// Open a frame whose arguments are the top `nargs` values.
    pub fn begin_frame(&self, nargs: usize) {
        let mut stack = self.stack.lock();
        let base = stack.slots.len().saturating_sub(nargs);
        stack.frames.push(base);
    }

    /// Close the current frame, keeping only the top `nresults` values for
    /// the caller.
    pub fn end_frame(&self, nresults: usize) {
        let mut stack = self.stack.lock();
        let Some(base) = stack.frames.pop() else {
            return;
        };
        let len = stack.slots.len();
        let results_start = len.saturating_sub(nresults).max(base);
        stack.slots.drain(base..results_start);
    }

    /// Run a bound function against the top `nargs` stack values, framed.
    /// On error the frame unwinds completely.
    pub fn call_raw(self: &Arc<Self>, f: &RawFn, nargs: usize) -> Result<usize, ScriptError> {
        self.begin_frame(nargs);
        match f(self) {
            Ok(nresults) => {
                self.end_frame(nresults);
                Ok(nresults)
            }
            Err(e) => {
                self.end_frame(0);
                Err(e)
            }
        }
    }

    /// Resolve the class binder dispatching the value at frame position `i`.
    pub fn binder_at(&self, i: usize) -> Option<Arc<ClassBinder>> {
        let class = match self.arg(i) {
            ScriptValue::Object(o) => o.class_name(),
            ScriptValue::Userdata(u) => u.class,
            ScriptValue::Int64(_) => "Int64",
            _ => return None,
        };
        self.global.binder(class)
    }

    // ---- lifecycle ----

    /// Current lifecycle state.
    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        let mut current = self.state.lock();
        if *current != ThreadState::Closed {
            *current = state;
        }
    }

    /// Install the hook invoked when the scheduler resumes this thread.
    pub fn set_resume_hook(
        &self,
        hook: impl Fn(&Arc<ScriptThread>, usize) + Send + Sync + 'static,
    ) {
        *self.resume_hook.lock() = Some(Arc::new(hook));
    }

    /// Mark the thread runnable again and fire its resume hook with the
    /// `nresults` values just pushed onto its frame.
    pub(crate) fn resume(self: &Arc<Self>, nresults: usize) {
        if self.state() == ThreadState::Closed {
            return;
        }
        self.set_state(ThreadState::Running);
        let hook = self.resume_hook.lock().clone();
        if let Some(hook) = hook {
            hook(self, nresults);
        }
    }

    /// The signal connections owned by this thread.
    pub(crate) fn connections(&self) -> &Mutex<ConnectionOwner> {
        &self.connections
    }

    /// Tear the thread down: cancel its scheduled work and queued events,
    /// disconnect every signal connection it owns, and close it for good.
    pub fn close(self: &Arc<Self>) {
        self.set_state(ThreadState::Closed);
        if let Some(scheduler) = self.global.scheduler() {
            scheduler.cancel_thread(self);
        }
        let owned = self.connections.lock().take_all();
        owned.release();
        self.stack.lock().slots.clear();
    }
}

impl std::fmt::Debug for ScriptThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptThread")
            .field("id", &self.id)
            .field("vm", &self.vm)
            .field("identity", &self.identity())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classdb::ClassDb;
    use crate::instance::Instance;
    use crate::runtime::ScriptRuntime;

    #[test]
    fn test_object_cache_sheds_dead_handles() {
        let rt = ScriptRuntime::new(Arc::new(ClassDb::new()));
        let t = rt.main_thread().clone();

        let keeper = Instance::new_orphan();
        t.push_object(keeper.clone());
        t.pop();

        for _ in 0..200 {
            t.push_object(Instance::new_orphan());
            t.pop();
        }
        // Transient handles dropped above must not accumulate in the
        // identity cache.
        assert!(t.object_cache_len() <= 64);

        // A handle still held elsewhere keeps its cache entry through
        // the sweeps.
        t.push_object(keeper.clone());
        let back = t.pop().unwrap();
        match back {
            ScriptValue::Object(o) => {
                assert_eq!(o.instance().object_id(), keeper.instance().object_id());
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
