//! Cooperative task scheduling
//!
//! The host drives the scheduler through a fixed sequence of
//! [`ResumptionPoint`]s each frame. At every point, due tasks push their
//! results onto their thread and resume it, and the deferred signal queue is
//! drained to empty, including events enqueued by the handlers themselves.
//!
//! Deferred delivery depth is bounded by a [`ReentrancyPath`]: a per-
//! connection counter map snapshot that travels with each queued event, so a
//! chain of handler-triggered re-emits is cut off at
//! [`DEFERRED_REENTRANCY_LIMIT`](crate::signals::DEFERRED_REENTRANCY_LIMIT)
//! no matter how many drains it spans.

use crate::error::ScriptError;
use crate::runtime::{VmKind, VM_COUNT};
use crate::signals::{EmitterId, DEFERRED_REENTRANCY_LIMIT};
use crate::thread::{ScriptThread, ThreadState};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Points in the frame at which suspended work may resume, in frame order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumptionPoint {
    /// After input processing.
    Input,
    /// Before rendering.
    PreRender,
    /// Legacy throttleable waits.
    LegacyWait,
    /// Before animation stepping.
    PreAnimation,
    /// Before physics stepping.
    PreSimulation,
    /// After physics stepping.
    PostSimulation,
    /// Precise waits.
    Wait,
    /// End-of-frame heartbeat.
    Heartbeat,
    /// Shutdown notification.
    BindToClose,
}

/// Work parked on the scheduler until some condition holds.
pub trait ScheduledTask: Send + Sync {
    /// The thread resumed when the task completes.
    fn thread(&self) -> &Arc<ScriptThread>;

    /// Advance internal state. Called at every resumption point; `frame`
    /// lets implementations count elapsed time once per frame.
    fn update(&self, frame: u64, delta: f64);

    /// Whether the task is due at this resumption point.
    fn is_complete(&self, point: ResumptionPoint) -> bool;

    /// Whether the task may be postponed when the frame budget runs out.
    fn can_throttle(&self) -> bool {
        false
    }

    /// Push the task's results onto its thread's frame, returning the count.
    fn push_results(&self) -> usize;
}

/// Chain-depth counters keyed by (emitter, connection), threaded through
/// deferred enqueues.
pub type ReentrancyPath = FxHashMap<(EmitterId, u64), u32>;

struct DeferredEvent {
    emitter: EmitterId,
    conn: u64,
    thread: Arc<ScriptThread>,
    deliver: Box<dyn FnOnce() + Send>,
    path: ReentrancyPath,
}

// GC pacing bounds for the proportional rate controller.

/// Slowest collection rate.
pub const GC_RATE_MIN: u32 = 50;
/// Rate adjustment step per pacing update.
pub const GC_RATE_INC: u32 = 25;
/// Fastest collection rate.
pub const GC_RATE_MAX: u32 = 10_000;

/// Host hooks the GC pacer drives. Implementations report live heap sizes
/// and apply the requested collection rate.
pub trait GcHost {
    /// Current heap size of `vm`, in bytes.
    fn heap_size(&self, vm: VmKind) -> i64;

    /// Run one collection step on `vm` at `rate`.
    fn gc_step(&self, vm: VmKind, rate: u32, delta: f64);
}

struct GcPacing {
    collect_rate: [u32; VM_COUNT],
    last_size: [i64; VM_COUNT],
}

impl Default for GcPacing {
    fn default() -> Self {
        Self {
            collect_rate: [GC_RATE_MIN; VM_COUNT],
            last_size: [0; VM_COUNT],
        }
    }
}

/// The per-runtime cooperative scheduler.
pub struct TaskScheduler {
    tasks: Mutex<Vec<Arc<dyn ScheduledTask>>>,
    deferred: Mutex<VecDeque<DeferredEvent>>,
    current_path: Mutex<ReentrancyPath>,
    gc: Mutex<GcPacing>,
}

impl TaskScheduler {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(Vec::new()),
            deferred: Mutex::new(VecDeque::new()),
            current_path: Mutex::new(ReentrancyPath::default()),
            gc: Mutex::new(GcPacing::default()),
        })
    }

    /// Park a task until its completion condition holds.
    pub fn add_task(&self, task: Arc<dyn ScheduledTask>) {
        self.tasks.lock().push(task);
    }

    /// Number of parked tasks.
    pub fn num_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Number of queued deferred events.
    pub fn num_events(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Queue a deferred signal delivery. Returns false when the chain depth
    /// for this connection exceeds the deferred re-entrancy limit.
    pub(crate) fn add_deferred_event(
        &self,
        emitter: EmitterId,
        conn: u64,
        thread: Arc<ScriptThread>,
        deliver: Box<dyn FnOnce() + Send>,
    ) -> bool {
        let mut path = self.current_path.lock().clone();
        let depth = path.entry((emitter, conn)).or_insert(0);
        *depth += 1;
        if *depth > DEFERRED_REENTRANCY_LIMIT {
            return false;
        }
        self.deferred.lock().push_back(DeferredEvent {
            emitter,
            conn,
            thread,
            deliver,
            path,
        });
        true
    }

    /// Remove a parked task without resuming it.
    pub fn cancel_task(&self, task: &Arc<dyn ScheduledTask>) {
        self.tasks.lock().retain(|t| !Arc::ptr_eq(t, task));
    }

    /// Remove every task and queued event belonging to `thread`.
    pub fn cancel_thread(&self, thread: &Arc<ScriptThread>) {
        self.tasks.lock().retain(|t| t.thread().id() != thread.id());
        self.deferred.lock().retain(|ev| ev.thread.id() != thread.id());
    }

    /// Drop queued deliveries of one connection, e.g. after a disconnect.
    pub fn cancel_events(&self, emitter: EmitterId, conn: u64) {
        self.deferred
            .lock()
            .retain(|ev| !(ev.emitter == emitter && ev.conn == conn));
    }

    /// Run one resumption point: advance every task, resume the due ones
    /// (skipping throttleable tasks once `throttle_budget` seconds of this
    /// call are spent), then drain the deferred queue to empty.
    pub fn resume(&self, point: ResumptionPoint, frame: u64, delta: f64, throttle_budget: f64) {
        let started = Instant::now();
        let snapshot: Vec<Arc<dyn ScheduledTask>> = self.tasks.lock().clone();

        for task in snapshot {
            if task.thread().state() == ThreadState::Closed {
                self.cancel_task(&task);
                continue;
            }
            task.update(frame, delta);
            if task.can_throttle() && started.elapsed().as_secs_f64() > throttle_budget {
                continue;
            }
            if !task.is_complete(point) {
                continue;
            }
            // A resumed handler earlier in this pass may have cancelled it.
            if !self.tasks.lock().iter().any(|t| Arc::ptr_eq(t, &task)) {
                continue;
            }
            self.cancel_task(&task);
            let nresults = task.push_results();
            task.thread().resume(nresults);
        }

        self.drain_deferred();
    }

    /// Pop-and-deliver until the queue is empty. Events enqueued by the
    /// handlers run in the same drain, under their recorded chain depth.
    fn drain_deferred(&self) {
        loop {
            let event = self.deferred.lock().pop_front();
            let Some(event) = event else {
                break;
            };
            if event.thread.state() == ThreadState::Closed || event.thread.global().is_shutdown() {
                continue;
            }
            *self.current_path.lock() = event.path.clone();
            (event.deliver)();
        }
        self.current_path.lock().clear();
    }

    /// Advance the GC pacer for every VM: rates climb while a heap grows
    /// and relax toward the floor while it shrinks, clamped to
    /// [`GC_RATE_MIN`]..=[`GC_RATE_MAX`].
    pub fn gc_step(&self, delta: f64, host: &dyn GcHost) {
        let mut gc = self.gc.lock();
        for vm in [VmKind::Core, VmKind::Game] {
            let i = vm as usize;
            let size = host.heap_size(vm);
            let growth = size - gc.last_size[i];
            gc.collect_rate[i] = if growth > 0 {
                (gc.collect_rate[i] + GC_RATE_INC).min(GC_RATE_MAX)
            } else {
                gc.collect_rate[i].saturating_sub(GC_RATE_INC).max(GC_RATE_MIN)
            };
            gc.last_size[i] = size;
            host.gc_step(vm, gc.collect_rate[i], delta);
        }
    }

    /// Current pacing rate for `vm`.
    pub fn gc_rate(&self, vm: VmKind) -> u32 {
        self.gc.lock().collect_rate[vm as usize]
    }
}

/// A thread parked on a timed wait.
pub struct WaitTask {
    thread: Arc<ScriptThread>,
    remaining: Mutex<f64>,
    last_frame: Mutex<u64>,
    started: Instant,
    legacy: bool,
}

impl ScheduledTask for WaitTask {
    fn thread(&self) -> &Arc<ScriptThread> {
        &self.thread
    }

    fn update(&self, frame: u64, delta: f64) {
        // Called once per resumption point; only the first call of a frame
        // consumes time.
        let mut last = self.last_frame.lock();
        if *last == frame {
            return;
        }
        *last = frame;
        let mut remaining = self.remaining.lock();
        *remaining = (*remaining - delta).max(0.0);
    }

    fn is_complete(&self, point: ResumptionPoint) -> bool {
        let due = *self.remaining.lock() <= 0.0;
        let at = if self.legacy {
            ResumptionPoint::LegacyWait
        } else {
            ResumptionPoint::Wait
        };
        due && point == at
    }

    fn can_throttle(&self) -> bool {
        self.legacy
    }

    fn push_results(&self) -> usize {
        use crate::stack::StackOp;
        let elapsed = self.started.elapsed().as_secs_f64();
        f64::push(&self.thread, elapsed);
        if self.legacy {
            // Legacy waits also report runtime uptime.
            f64::push(&self.thread, self.thread.global().uptime());
            2
        } else {
            1
        }
    }
}

fn park_wait(
    thread: &Arc<ScriptThread>,
    seconds: f64,
    legacy: bool,
) -> Result<Arc<WaitTask>, ScriptError> {
    let scheduler = thread.global().scheduler().ok_or(ScriptError::NoScheduler)?;
    let task = Arc::new(WaitTask {
        thread: thread.clone(),
        remaining: Mutex::new(seconds.max(0.0)),
        last_frame: Mutex::new(0),
        started: Instant::now(),
        legacy,
    });
    thread.set_state(ThreadState::Suspended);
    scheduler.add_task(task.clone());
    Ok(task)
}

/// Park `thread` for `seconds`, resuming precisely at the `Wait` point.
pub fn wait(thread: &Arc<ScriptThread>, seconds: f64) -> Result<Arc<WaitTask>, ScriptError> {
    park_wait(thread, seconds, false)
}

/// Park `thread` for `seconds` on the legacy path: throttleable, resumed at
/// the `LegacyWait` point.
pub fn legacy_wait(thread: &Arc<ScriptThread>, seconds: f64) -> Result<Arc<WaitTask>, ScriptError> {
    park_wait(thread, seconds, true)
}
