//! Signal emission
//!
//! Every instance owns a [`SignalEmitter`]: a table of named signals, each
//! holding connections in registration order. Delivery is either immediate
//! (handlers run inside the emit, with a per-connection re-entrancy counter)
//! or deferred (handlers are queued on the task scheduler and drained at
//! resumption points, with a deeper chain-depth limit enforced at enqueue
//! time).
//!
//! Handler failures never abort delivery: the remaining connections still
//! run, and the first error is reported to the emitting caller.

use crate::error::ScriptError;
use crate::scheduler::ScheduledTask;
use crate::stack;
use crate::thread::{ScriptThread, ThreadState};
use crate::variant::{ScriptFunction, Variant};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use trellis_core::NameMap;

/// Maximum nesting depth of one connection's handler during immediate
/// delivery before further nested emits are dropped.
pub const IMMEDIATE_REENTRANCY_LIMIT: u32 = 6;

/// Maximum chain depth of one connection across deferred enqueues before an
/// enqueue is rejected.
pub const DEFERRED_REENTRANCY_LIMIT: u32 = 79;

static NEXT_EMITTER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of an emitter, used to key queued events and owner
/// records without holding the emitter alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmitterId(u64);

#[derive(Clone)]
struct Connection {
    thread: Arc<ScriptThread>,
    func: ScriptFunction,
    once: bool,
}

/// Per-object signal hub.
pub struct SignalEmitter {
    id: EmitterId,
    owner: Mutex<&'static str>,
    deferred: AtomicBool,
    next_conn: AtomicU64,
    connections: Mutex<NameMap<BTreeMap<u64, Connection>>>,
    reentrancy: Mutex<FxHashMap<u64, u32>>,
    pending_waits: Mutex<NameMap<Vec<Weak<SignalWaitTask>>>>,
}

impl SignalEmitter {
    /// Fresh emitter with no connections, delivering immediately.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: EmitterId(NEXT_EMITTER_ID.fetch_add(1, Ordering::Relaxed)),
            owner: Mutex::new("Signal"),
            deferred: AtomicBool::new(false),
            next_conn: AtomicU64::new(1),
            connections: Mutex::new(NameMap::new()),
            reentrancy: Mutex::new(FxHashMap::default()),
            pending_waits: Mutex::new(NameMap::new()),
        })
    }

    /// Emitter identity.
    pub fn id(&self) -> EmitterId {
        self.id
    }

    /// Class name used in diagnostic signal names, e.g. `Widget.Activated`.
    pub(crate) fn set_owner(&self, class: &'static str) {
        *self.owner.lock() = class;
    }

    /// Switch between deferred and immediate delivery.
    pub fn set_deferred(&self, deferred: bool) {
        self.deferred.store(deferred, Ordering::Release);
    }

    /// Whether emits queue handlers instead of running them inline.
    pub fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::Acquire)
    }

    /// Subscribe `func` to `signal`, called on `thread`. Returns the
    /// connection id; connections fire in subscription order.
    pub fn connect(
        self: &Arc<Self>,
        signal: &str,
        thread: &Arc<ScriptThread>,
        func: ScriptFunction,
        once: bool,
    ) -> u64 {
        let id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        self.connections
            .lock()
            .get_or_insert_with(signal, BTreeMap::new)
            .insert(
                id,
                Connection {
                    thread: thread.clone(),
                    func,
                    once,
                },
            );
        thread.connections().lock().record(self, signal, id);
        id
    }

    /// Whether connection `id` on `signal` is still live.
    pub fn is_connected(&self, signal: &str, id: u64) -> bool {
        self.connections
            .lock()
            .get(signal)
            .is_some_and(|m| m.contains_key(&id))
    }

    /// Number of live connections on `signal`.
    pub fn connection_count(&self, signal: &str) -> usize {
        self.connections.lock().get(signal).map_or(0, BTreeMap::len)
    }

    /// Drop connection `id`, cancelling any of its queued deferred events.
    pub fn disconnect(&self, signal: &str, id: u64) {
        self.disconnect_inner(signal, id, true, true);
    }

    /// Drop every connection on every signal, e.g. when the owning object
    /// is destroyed.
    pub fn disconnect_all(&self) {
        let all: Vec<(String, u64)> = {
            let conns = self.connections.lock();
            conns
                .iter()
                .flat_map(|(signal, m)| m.keys().map(move |id| (signal.to_string(), *id)))
                .collect()
        };
        for (signal, id) in all {
            self.disconnect_inner(&signal, id, true, true);
        }
    }

    fn disconnect_inner(&self, signal: &str, id: u64, cancel_events: bool, update_owner: bool) {
        let removed = {
            let mut conns = self.connections.lock();
            match conns.get_mut(signal) {
                Some(m) => m.remove(&id),
                None => None,
            }
        };
        let Some(conn) = removed else {
            return;
        };
        if update_owner {
            conn.thread.connections().lock().forget(self.id, id);
        }
        if cancel_events {
            if let Some(scheduler) = conn.thread.global().scheduler() {
                scheduler.cancel_events(self.id, id);
            }
        }
    }

    /// Park `thread` until the next emission of `signal`. The returned task
    /// completes with the emission's arguments.
    pub fn wait(
        self: &Arc<Self>,
        signal: &str,
        thread: &Arc<ScriptThread>,
    ) -> Result<Arc<SignalWaitTask>, ScriptError> {
        let scheduler = thread.global().scheduler().ok_or(ScriptError::NoScheduler)?;
        let task = Arc::new(SignalWaitTask {
            thread: thread.clone(),
            results: Mutex::new(None),
            started: Instant::now(),
        });
        self.pending_waits
            .lock()
            .get_or_insert_with(signal, Vec::new)
            .push(Arc::downgrade(&task));
        thread.set_state(ThreadState::Suspended);
        scheduler.add_task(task.clone());
        Ok(task)
    }

    /// Emit `signal` with `args` to every live connection, then release
    /// parked waiters. Runtimes mid-shutdown are skipped. Returns the first
    /// handler or limit error, after all connections were given their turn.
    pub fn emit(&self, signal: &str, args: &[Variant]) -> Result<(), ScriptError> {
        let snapshot: Vec<(u64, Connection)> = self
            .connections
            .lock()
            .get(signal)
            .map(|m| m.iter().map(|(id, c)| (*id, c.clone())).collect())
            .unwrap_or_default();

        let debug_name = format!("{}.{}", *self.owner.lock(), signal);
        let mut first_err: Option<ScriptError> = None;
        let mut expired: Vec<u64> = Vec::new();

        if self.is_deferred() {
            for (id, conn) in snapshot {
                if conn.thread.global().is_shutdown() || conn.thread.state() == ThreadState::Closed
                {
                    continue;
                }
                let Some(scheduler) = conn.thread.global().scheduler() else {
                    continue;
                };
                // One-shot connections leave the table at queue time so a
                // second emit before the drain cannot double-fire them.
                if conn.once {
                    expired.push(id);
                }
                let thread = conn.thread.clone();
                let func = conn.func.clone();
                let call_args = args.to_vec();
                let queued = scheduler.add_deferred_event(
                    self.id,
                    id,
                    conn.thread.clone(),
                    Box::new(move || {
                        let nargs = stack::push_all(&thread, &call_args);
                        match func.call(&thread, nargs) {
                            Ok(nresults) => {
                                thread.pop_results(nresults);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "deferred signal handler failed");
                            }
                        }
                    }),
                );
                if !queued {
                    tracing::warn!(signal = %debug_name, "deferred re-entrancy limit exceeded");
                    first_err.get_or_insert(ScriptError::Reentrancy {
                        signal: debug_name.clone(),
                    });
                }
            }
        } else {
            for (id, conn) in snapshot {
                if conn.thread.global().is_shutdown() || conn.thread.state() == ThreadState::Closed
                {
                    continue;
                }
                // A handler earlier in this emit may have disconnected us.
                if !self.is_connected(signal, id) {
                    continue;
                }
                let (first_entrant, depth) = {
                    let mut map = self.reentrancy.lock();
                    let first = map.is_empty();
                    let depth = map.entry(id).or_insert(0);
                    *depth += 1;
                    (first, *depth)
                };
                if depth > IMMEDIATE_REENTRANCY_LIMIT {
                    tracing::warn!(signal = %debug_name, "immediate re-entrancy limit exceeded");
                    first_err.get_or_insert(ScriptError::Reentrancy {
                        signal: debug_name.clone(),
                    });
                } else {
                    let nargs = stack::push_all(&conn.thread, args);
                    match conn.func.call(&conn.thread, nargs) {
                        Ok(nresults) => {
                            conn.thread.pop_results(nresults);
                        }
                        Err(e) => {
                            tracing::error!(signal = %debug_name, error = %e, "signal handler failed");
                        }
                    }
                }
                // The outermost entrant resets nesting depth for the whole
                // emitter once its delivery unwinds.
                if first_entrant {
                    self.reentrancy.lock().clear();
                }
                if conn.once {
                    expired.push(id);
                }
            }
        }

        for id in expired {
            self.disconnect_inner(signal, id, false, true);
        }

        let waiting = self.pending_waits.lock().remove(signal).unwrap_or_default();
        for weak in waiting {
            if let Some(task) = weak.upgrade() {
                task.complete(args.to_vec());
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for SignalEmitter {
    fn drop(&mut self) {
        // Dying connections disappear from their owning threads, and parked
        // waiters are cancelled rather than left suspended forever.
        let connections = std::mem::take(&mut *self.connections.lock());
        for (_signal, conns) in connections.iter() {
            for conn in conns.values() {
                conn.thread.connections().lock().forget_emitter(self.id);
            }
        }
        let waits = std::mem::take(&mut *self.pending_waits.lock());
        for (_signal, list) in waits.iter() {
            for weak in list {
                if let Some(task) = weak.upgrade() {
                    if let Some(scheduler) = task.thread.global().scheduler() {
                        scheduler.cancel_task(&(task as Arc<dyn ScheduledTask>));
                    }
                }
            }
        }
    }
}

/// A thread parked on [`SignalEmitter::wait`].
pub struct SignalWaitTask {
    thread: Arc<ScriptThread>,
    results: Mutex<Option<Vec<Variant>>>,
    started: Instant,
}

impl SignalWaitTask {
    fn complete(&self, args: Vec<Variant>) {
        *self.results.lock() = Some(args);
    }

    /// Seconds the waiter has been parked.
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

impl ScheduledTask for SignalWaitTask {
    fn thread(&self) -> &Arc<ScriptThread> {
        &self.thread
    }

    fn update(&self, _frame: u64, _delta: f64) {}

    fn is_complete(&self, _point: crate::scheduler::ResumptionPoint) -> bool {
        self.results.lock().is_some()
    }

    fn can_throttle(&self) -> bool {
        false
    }

    fn push_results(&self) -> usize {
        let args = self.results.lock().take().unwrap_or_default();
        stack::push_all(&self.thread, &args)
    }
}

/// Records which connections a thread owns so closing the thread tears its
/// subscriptions down.
#[derive(Default)]
pub struct ConnectionOwner {
    emitters: FxHashMap<EmitterId, OwnedEmitter>,
}

struct OwnedEmitter {
    emitter: Weak<SignalEmitter>,
    conns: Vec<(Box<str>, u64)>,
}

impl ConnectionOwner {
    fn record(&mut self, emitter: &Arc<SignalEmitter>, signal: &str, id: u64) {
        self.emitters
            .entry(emitter.id)
            .or_insert_with(|| OwnedEmitter {
                emitter: Arc::downgrade(emitter),
                conns: Vec::new(),
            })
            .conns
            .push((signal.into(), id));
    }

    fn forget(&mut self, emitter: EmitterId, conn_id: u64) {
        if let Some(owned) = self.emitters.get_mut(&emitter) {
            owned.conns.retain(|(_, id)| *id != conn_id);
            if owned.conns.is_empty() {
                self.emitters.remove(&emitter);
            }
        }
    }

    fn forget_emitter(&mut self, emitter: EmitterId) {
        self.emitters.remove(&emitter);
    }

    /// Detach every record for release outside the owner's lock.
    pub(crate) fn take_all(&mut self) -> OwnedConnections {
        let mut out = Vec::new();
        for (_, owned) in self.emitters.drain() {
            for (signal, id) in owned.conns {
                out.push((owned.emitter.clone(), signal, id));
            }
        }
        OwnedConnections(out)
    }
}

/// Connections detached from their owner, pending release.
pub(crate) struct OwnedConnections(Vec<(Weak<SignalEmitter>, Box<str>, u64)>);

impl OwnedConnections {
    /// Disconnect everything, cancelling queued events. The owner records
    /// are already gone, so the emitters skip the owner update.
    pub(crate) fn release(self) {
        for (weak, signal, id) in self.0 {
            if let Some(emitter) = weak.upgrade() {
                emitter.disconnect_inner(&signal, id, true, false);
            }
        }
    }
}

/// Script-facing handle to one signal of one emitter.
#[derive(Clone)]
pub struct SignalRef {
    pub(crate) emitter: Weak<SignalEmitter>,
    pub(crate) signal: String,
    pub(crate) security: crate::capabilities::Capability,
}

impl SignalRef {
    /// Connect a handler, returning the script-facing connection handle.
    pub fn connect(
        &self,
        thread: &Arc<ScriptThread>,
        func: ScriptFunction,
        once: bool,
    ) -> Result<ConnectionRef, ScriptError> {
        thread.check_capability(self.security, &format!("connect to '{}'", self.signal))?;
        let emitter = self.emitter.upgrade().ok_or_else(|| {
            ScriptError::runtime(format!("signal '{}' emitter is gone", self.signal))
        })?;
        let id = emitter.connect(&self.signal, thread, func, once);
        Ok(ConnectionRef {
            emitter: self.emitter.clone(),
            signal: self.signal.clone(),
            id,
        })
    }

    /// Park the calling thread until the next emission.
    pub fn wait(&self, thread: &Arc<ScriptThread>) -> Result<Arc<SignalWaitTask>, ScriptError> {
        thread.check_capability(self.security, &format!("wait on '{}'", self.signal))?;
        let emitter = self.emitter.upgrade().ok_or_else(|| {
            ScriptError::runtime(format!("signal '{}' emitter is gone", self.signal))
        })?;
        emitter.wait(&self.signal, thread)
    }
}

/// Script-facing handle to one live connection.
#[derive(Clone)]
pub struct ConnectionRef {
    emitter: Weak<SignalEmitter>,
    signal: String,
    id: u64,
}

impl ConnectionRef {
    /// Whether the connection is still subscribed.
    pub fn connected(&self) -> bool {
        self.emitter
            .upgrade()
            .is_some_and(|e| e.is_connected(&self.signal, self.id))
    }

    /// Unsubscribe and cancel any queued deliveries.
    pub fn disconnect(&self) {
        if let Some(emitter) = self.emitter.upgrade() {
            emitter.disconnect(&self.signal, self.id);
        }
    }
}
