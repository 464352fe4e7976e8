//! Integration tests for signal emission and connection lifecycle

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use trellis_runtime::signals::SignalEmitter;
use trellis_runtime::{
    ClassDb, Folder, ScriptClass, ScriptFunction, ScriptRuntime, Variant,
    DEFERRED_REENTRANCY_LIMIT, IMMEDIATE_REENTRANCY_LIMIT,
};

fn runtime() -> ScriptRuntime {
    let mut db = ClassDb::new();
    Folder::initialize_class(&mut db);
    let rt = ScriptRuntime::new(Arc::new(db));
    rt.register_classes();
    rt
}

fn counting(counter: &Arc<AtomicUsize>) -> ScriptFunction {
    let counter = counter.clone();
    ScriptFunction::new(move |_t, _nargs| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    })
}

#[test]
fn test_emit_in_subscription_order() {
    let rt = runtime();
    let thread = rt.main_thread();
    let emitter = SignalEmitter::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for tag in [1u32, 2, 3] {
        let order = order.clone();
        emitter.connect(
            "Fired",
            thread,
            ScriptFunction::new(move |_t, _n| {
                order.lock().push(tag);
                Ok(0)
            }),
            false,
        );
    }

    emitter.emit("Fired", &[]).unwrap();
    assert_eq!(*order.lock(), vec![1, 2, 3]);
}

#[test]
fn test_once_connection_fires_once() {
    let rt = runtime();
    let thread = rt.main_thread();
    let emitter = SignalEmitter::new();
    let count = Arc::new(AtomicUsize::new(0));

    emitter.connect("Fired", thread, counting(&count), true);
    emitter.emit("Fired", &[]).unwrap();
    emitter.emit("Fired", &[]).unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(emitter.connection_count("Fired"), 0);
}

#[test]
fn test_handler_args_reach_the_frame() {
    let rt = runtime();
    let thread = rt.main_thread();
    let emitter = SignalEmitter::new();
    let seen = Arc::new(Mutex::new(None));

    let seen_in = seen.clone();
    emitter.connect(
        "Fired",
        thread,
        ScriptFunction::new(move |t, nargs| {
            assert_eq!(nargs, 2);
            *seen_in.lock() = Some((t.arg(1), t.arg(2)));
            Ok(0)
        }),
        false,
    );

    emitter
        .emit("Fired", &[Variant::Double(5.0), Variant::from("hey")])
        .unwrap();
    let (a, b) = seen.lock().take().expect("handler did not run");
    assert_eq!(a, trellis_runtime::ScriptValue::Number(5.0));
    assert_eq!(b, trellis_runtime::ScriptValue::Str("hey".to_string()));
}

#[test]
fn test_disconnect_during_emit_skips_later_connection() {
    let rt = runtime();
    let thread = rt.main_thread();
    let emitter = SignalEmitter::new();
    let count = Arc::new(AtomicUsize::new(0));
    let victim: Arc<Mutex<u64>> = Arc::new(Mutex::new(0));

    let weak = Arc::downgrade(&emitter);
    let victim_in = victim.clone();
    emitter.connect(
        "Fired",
        thread,
        ScriptFunction::new(move |_t, _n| {
            if let Some(e) = weak.upgrade() {
                e.disconnect("Fired", *victim_in.lock());
            }
            Ok(0)
        }),
        false,
    );
    let id = emitter.connect("Fired", thread, counting(&count), false);
    *victim.lock() = id;

    emitter.emit("Fired", &[]).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(!emitter.is_connected("Fired", id));
}

#[test]
fn test_immediate_reentrancy_limit() {
    let rt = runtime();
    let thread = rt.main_thread();
    let emitter = SignalEmitter::new();
    let count = Arc::new(AtomicUsize::new(0));
    let overflow = Arc::new(Mutex::new(None));

    let weak: Weak<SignalEmitter> = Arc::downgrade(&emitter);
    let count_in = count.clone();
    let overflow_in = overflow.clone();
    emitter.connect(
        "Fired",
        thread,
        ScriptFunction::new(move |_t, _n| {
            count_in.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = weak.upgrade() {
                if let Err(err) = e.emit("Fired", &[]) {
                    *overflow_in.lock() = Some(err);
                }
            }
            Ok(0)
        }),
        false,
    );

    emitter.emit("Fired", &[]).unwrap();
    assert_eq!(
        count.load(Ordering::SeqCst),
        IMMEDIATE_REENTRANCY_LIMIT as usize
    );
    assert!(overflow.lock().is_some());

    // The depth map cleared when the outermost delivery unwound, so the
    // next emit chain gets the full budget again.
    count.store(0, Ordering::SeqCst);
    emitter.emit("Fired", &[]).unwrap();
    assert_eq!(
        count.load(Ordering::SeqCst),
        IMMEDIATE_REENTRANCY_LIMIT as usize
    );
}

#[test]
fn test_wait_completes_with_emit_args() {
    let rt = runtime();
    let scheduler = rt.install_scheduler();
    let thread = rt.main_thread().clone();
    let emitter = SignalEmitter::new();

    let resumed = Arc::new(Mutex::new(None));
    let resumed_in = resumed.clone();
    thread.set_resume_hook(move |t, nresults| {
        let results = t.pop_results(nresults);
        *resumed_in.lock() = Some(results);
    });

    emitter.wait("Fired", &thread).unwrap();
    assert_eq!(scheduler.num_tasks(), 1);

    emitter.emit("Fired", &[Variant::Double(4.0)]).unwrap();
    scheduler.resume(trellis_runtime::ResumptionPoint::Heartbeat, 1, 0.016, 1.0);

    let results = resumed.lock().take().expect("thread was not resumed");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0], trellis_runtime::ScriptValue::Number(4.0));
    assert_eq!(scheduler.num_tasks(), 0);
}

#[test]
fn test_deferred_delivery_waits_for_drain() {
    let rt = runtime();
    let scheduler = rt.install_scheduler();
    let thread = rt.main_thread();
    let emitter = SignalEmitter::new();
    emitter.set_deferred(true);
    let count = Arc::new(AtomicUsize::new(0));

    emitter.connect("Fired", thread, counting(&count), false);
    emitter.emit("Fired", &[]).unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.num_events(), 1);

    scheduler.resume(trellis_runtime::ResumptionPoint::Heartbeat, 1, 0.016, 1.0);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.num_events(), 0);
}

#[test]
fn test_deferred_once_cannot_double_fire() {
    let rt = runtime();
    let scheduler = rt.install_scheduler();
    let thread = rt.main_thread();
    let emitter = SignalEmitter::new();
    emitter.set_deferred(true);
    let count = Arc::new(AtomicUsize::new(0));

    emitter.connect("Fired", thread, counting(&count), true);
    emitter.emit("Fired", &[]).unwrap();
    // The connection left the table at queue time; the second emit sees
    // nothing to deliver.
    emitter.emit("Fired", &[]).unwrap();

    scheduler.resume(trellis_runtime::ResumptionPoint::Heartbeat, 1, 0.016, 1.0);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_deferred_chain_cut_at_limit() {
    let rt = runtime();
    let scheduler = rt.install_scheduler();
    let thread = rt.main_thread();
    let emitter = SignalEmitter::new();
    emitter.set_deferred(true);
    let count = Arc::new(AtomicUsize::new(0));

    let weak: Weak<SignalEmitter> = Arc::downgrade(&emitter);
    let count_in = count.clone();
    emitter.connect(
        "Fired",
        thread,
        ScriptFunction::new(move |_t, _n| {
            count_in.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = weak.upgrade() {
                let _ = e.emit("Fired", &[]);
            }
            Ok(0)
        }),
        false,
    );

    emitter.emit("Fired", &[]).unwrap();
    scheduler.resume(trellis_runtime::ResumptionPoint::Heartbeat, 1, 0.016, 1.0);

    assert_eq!(
        count.load(Ordering::SeqCst),
        DEFERRED_REENTRANCY_LIMIT as usize
    );
    assert_eq!(scheduler.num_events(), 0);
}

#[test]
fn test_shutdown_makes_emit_a_noop() {
    let rt = runtime();
    let thread = rt.main_thread();
    let emitter = SignalEmitter::new();
    let count = Arc::new(AtomicUsize::new(0));

    emitter.connect("Fired", thread, counting(&count), false);
    rt.shutdown();
    emitter.emit("Fired", &[]).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_thread_close_releases_connections() {
    let rt = runtime();
    let thread = rt.new_thread(trellis_runtime::Identity::GameScript);
    let emitter = SignalEmitter::new();
    let count = Arc::new(AtomicUsize::new(0));

    emitter.connect("Fired", &thread, counting(&count), false);
    assert_eq!(emitter.connection_count("Fired"), 1);

    thread.close();
    assert_eq!(emitter.connection_count("Fired"), 0);

    emitter.emit("Fired", &[]).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_handler_error_reported_after_all_run() {
    let rt = runtime();
    let thread = rt.main_thread();
    let emitter = SignalEmitter::new();
    let count = Arc::new(AtomicUsize::new(0));

    emitter.connect(
        "Fired",
        thread,
        ScriptFunction::new(|_t, _n| Err(trellis_runtime::ScriptError::runtime("boom"))),
        false,
    );
    emitter.connect("Fired", thread, counting(&count), false);

    // Handler failures are logged, not propagated; the second connection
    // still ran.
    emitter.emit("Fired", &[]).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
