//! Integration tests for class registration, binder dispatch, and the
//! instance tree as seen through the script-facing protocol

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use trellis_runtime::{
    ClassDb, Folder, Instance, ScriptClass, ScriptError, ScriptFunction, ScriptRuntime,
    ScriptValue, StackOp, Variant, MAX_SAFE_INTEGER,
};

fn runtime() -> ScriptRuntime {
    let mut db = ClassDb::new();
    Folder::initialize_class(&mut db);
    let rt = ScriptRuntime::new(Arc::new(db));
    rt.register_classes();
    rt
}

#[test]
fn test_hierarchy_and_creation() {
    let rt = runtime();
    let db = rt.global().classdb();

    assert!(db.is_a("Folder", "Instance"));
    assert!(db.is_a("Folder", "Folder"));
    assert!(!db.is_a("Instance", "Folder"));
    // Names outside the registry are nobody's ancestor, themselves included.
    assert!(!db.is_a("Folder", "Widget"));
    assert!(!db.is_a("Widget", "Widget"));

    // The root class is abstract; Folder is creatable.
    assert!(db.new_instance("Instance").is_none());
    let obj = db.new_instance("Folder").unwrap();
    assert_eq!(obj.class_name(), "Folder");
    assert_eq!(obj.instance().name(), "Folder");
}

#[test]
fn test_property_read_through_binder() {
    let rt = runtime();
    let t = rt.main_thread().clone();
    let obj = rt.global().classdb().new_instance("Folder").unwrap();
    let binder = rt.global().binder("Folder").unwrap();

    t.push_object(obj);
    <String as StackOp>::push(&t, "Name".to_string());
    t.begin_frame(2);
    let n = binder.index(&t).unwrap();
    t.end_frame(n);
    assert_eq!(t.pop(), Some(ScriptValue::Str("Folder".to_string())));
}

#[test]
fn test_property_write_emits_changed_signal() {
    let rt = runtime();
    let t = rt.main_thread().clone();
    let obj = rt.global().classdb().new_instance("Folder").unwrap();
    let binder = rt.global().binder("Folder").unwrap();

    let changed = Arc::new(AtomicUsize::new(0));
    let changed_in = changed.clone();
    obj.instance().emitter().connect(
        "NameChanged",
        &t,
        ScriptFunction::new(move |_t, _n| {
            changed_in.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }),
        false,
    );

    t.push_object(obj.clone());
    <String as StackOp>::push(&t, "Name".to_string());
    <String as StackOp>::push(&t, "Crate".to_string());
    t.begin_frame(3);
    binder.newindex(&t).unwrap();
    t.end_frame(0);

    assert_eq!(obj.instance().name(), "Crate");
    assert_eq!(changed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_classname_is_readonly() {
    let rt = runtime();
    let t = rt.main_thread().clone();
    let obj = rt.global().classdb().new_instance("Folder").unwrap();
    let binder = rt.global().binder("Folder").unwrap();

    t.push_object(obj);
    <String as StackOp>::push(&t, "ClassName".to_string());
    <String as StackOp>::push(&t, "Imposter".to_string());
    t.begin_frame(3);
    let err = binder.newindex(&t).unwrap_err();
    t.end_frame(0);
    assert_eq!(
        err,
        ScriptError::ReadOnly {
            name: "ClassName".into(),
            class: "Folder".into(),
        }
    );
}

#[test]
fn test_parent_dispatches_through_overrides() {
    let rt = runtime();
    let t = rt.main_thread().clone();
    let db = rt.global().classdb();
    let parent = db.new_instance("Folder").unwrap();
    let child = db.new_instance("Folder").unwrap();
    let binder = rt.global().binder("Folder").unwrap();

    // Unparented reads surface nil.
    t.push_object(child.clone());
    <String as StackOp>::push(&t, "Parent".to_string());
    t.begin_frame(2);
    let n = binder.index(&t).unwrap();
    t.end_frame(n);
    assert_eq!(t.pop(), Some(ScriptValue::Nil));

    // Writes go through the reparent path.
    t.push_object(child.clone());
    <String as StackOp>::push(&t, "Parent".to_string());
    t.push_object(parent.clone());
    t.begin_frame(3);
    binder.newindex(&t).unwrap();
    t.end_frame(0);
    assert_eq!(
        child.instance().parent().unwrap().instance().object_id(),
        parent.instance().object_id()
    );

    t.push_object(child.clone());
    <String as StackOp>::push(&t, "Parent".to_string());
    t.begin_frame(2);
    let n = binder.index(&t).unwrap();
    t.end_frame(n);
    match t.pop() {
        Some(ScriptValue::Object(o)) => {
            assert_eq!(o.instance().object_id(), parent.instance().object_id())
        }
        other => panic!("expected an object, got {other:?}"),
    }
}

#[test]
fn test_signal_member_reads_as_connectable_handle() {
    let rt = runtime();
    let t = rt.main_thread().clone();
    let obj = rt.global().classdb().new_instance("Folder").unwrap();
    let binder = rt.global().binder("Folder").unwrap();

    t.push_object(obj);
    <String as StackOp>::push(&t, "ChildAdded".to_string());
    t.begin_frame(2);
    let n = binder.index(&t).unwrap();
    t.end_frame(n);
    match t.pop() {
        Some(ScriptValue::Userdata(u)) => assert_eq!(u.class, "ScriptSignal"),
        other => panic!("expected userdata, got {other:?}"),
    }
}

#[test]
fn test_member_resolution_errors() {
    let rt = runtime();
    let t = rt.main_thread().clone();
    let obj = rt.global().classdb().new_instance("Folder").unwrap();
    let binder = rt.global().binder("Folder").unwrap();

    t.push_object(obj.clone());
    <String as StackOp>::push(&t, "Bogus".to_string());
    t.begin_frame(2);
    let err = binder.index(&t).unwrap_err();
    t.end_frame(0);
    assert_eq!(
        err,
        ScriptError::NotAMember {
            name: "Bogus".into(),
            class: "Folder".into(),
        }
    );

    t.push_object(obj);
    t.begin_frame(1);
    let err = binder.namecall(&t, "Bogus").unwrap_err();
    t.end_frame(0);
    assert_eq!(
        err,
        ScriptError::NoSuchMethod {
            name: "Bogus".into(),
            class: "Folder".into(),
        }
    );
}

#[test]
fn test_namecall_tree_queries() {
    let rt = runtime();
    let t = rt.main_thread().clone();
    let db = rt.global().classdb();
    let root = db.new_instance("Folder").unwrap();
    let child = db.new_instance("Folder").unwrap();
    child.instance().set_name("Leaf");
    child.instance().set_parent(Some(&root));
    let binder = rt.global().binder("Folder").unwrap();

    t.push_object(root.clone());
    <String as StackOp>::push(&t, "Leaf".to_string());
    t.begin_frame(2);
    let n = binder.namecall(&t, "FindFirstChild").unwrap();
    t.end_frame(n);
    match t.pop() {
        Some(ScriptValue::Object(o)) => assert_eq!(o.instance().name(), "Leaf"),
        other => panic!("expected an object, got {other:?}"),
    }

    t.push_object(child);
    t.begin_frame(1);
    let n = binder.namecall(&t, "GetFullName").unwrap();
    t.end_frame(n);
    assert_eq!(t.pop(), Some(ScriptValue::Str("Folder.Leaf".to_string())));

    t.push_object(root);
    <String as StackOp>::push(&t, "Instance".to_string());
    t.begin_frame(2);
    let n = binder.namecall(&t, "IsA").unwrap();
    t.end_frame(n);
    assert_eq!(t.pop(), Some(ScriptValue::Bool(true)));
}

#[test]
fn test_get_property_changed_signal() {
    let rt = runtime();
    let t = rt.main_thread().clone();
    let obj = rt.global().classdb().new_instance("Folder").unwrap();
    let binder = rt.global().binder("Folder").unwrap();

    t.push_object(obj.clone());
    <String as StackOp>::push(&t, "Name".to_string());
    t.begin_frame(2);
    let n = binder.namecall(&t, "GetPropertyChangedSignal").unwrap();
    t.end_frame(n);
    match t.pop() {
        Some(ScriptValue::Userdata(u)) => assert_eq!(u.class, "ScriptSignal"),
        other => panic!("expected userdata, got {other:?}"),
    }

    t.push_object(obj);
    <String as StackOp>::push(&t, "Bogus".to_string());
    t.begin_frame(2);
    let err = binder.namecall(&t, "GetPropertyChangedSignal").unwrap_err();
    t.end_frame(0);
    assert!(matches!(err, ScriptError::NotAMember { .. }));
}

#[test]
fn test_reflection_property_access() {
    let rt = runtime();
    let db = rt.global().classdb();
    let obj = db.new_instance("Folder").unwrap();

    assert_eq!(
        db.get_property(obj.as_ref(), "Name"),
        Some(Variant::from("Folder"))
    );
    assert!(db.set_property(obj.as_ref(), "Name", &Variant::from("Renamed")));
    assert_eq!(obj.instance().name(), "Renamed");

    // A mistyped write is rejected without touching the object.
    assert!(!db.set_property(obj.as_ref(), "Name", &Variant::Double(5.0)));
    assert_eq!(obj.instance().name(), "Renamed");

    assert!(db.get_property(obj.as_ref(), "Bogus").is_none());
}

#[test]
fn test_int64_boxing_threshold() {
    let rt = runtime();
    let t = rt.main_thread().clone();

    i64::push(&t, 42);
    assert_eq!(t.pop(), Some(ScriptValue::Number(42.0)));

    i64::push(&t, MAX_SAFE_INTEGER + 1);
    assert_eq!(t.pop(), Some(ScriptValue::Int64(MAX_SAFE_INTEGER + 1)));
}

#[test]
fn test_int64_arithmetic_through_binder() {
    let rt = runtime();
    let t = rt.main_thread().clone();
    let binder = rt.global().binder("Int64").unwrap();

    let big = MAX_SAFE_INTEGER + 10;
    i64::push(&t, big);
    i64::push(&t, big);
    t.begin_frame(2);
    let n = binder.binary(&t, trellis_runtime::BinOp::Add).unwrap();
    t.end_frame(n);
    assert_eq!(t.pop(), Some(ScriptValue::Int64(big + big)));
}

#[test]
fn test_vector3_builtin_operators() {
    use trellis_core::Vector3;

    let rt = runtime();
    let t = rt.main_thread().clone();
    let binder = rt.global().binder("Vector3").unwrap();

    Vector3::push(&t, Vector3::new(1.0, 2.0, 3.0));
    f64::push(&t, 2.0);
    t.begin_frame(2);
    let n = binder.binary(&t, trellis_runtime::BinOp::Mul).unwrap();
    t.end_frame(n);
    assert_eq!(Vector3::get(&t, 1), Vector3::new(2.0, 4.0, 6.0));
    t.pop();

    Vector3::push(&t, Vector3::new(3.0, 4.0, 0.0));
    <String as StackOp>::push(&t, "Magnitude".to_string());
    t.begin_frame(2);
    let n = binder.index(&t).unwrap();
    t.end_frame(n);
    assert_eq!(t.pop(), Some(ScriptValue::Number(5.0)));
}

#[test]
fn test_handle_identity_stable_across_pushes() {
    let rt = runtime();
    let t = rt.main_thread().clone();
    let obj = rt.global().classdb().new_instance("Folder").unwrap();

    t.push_object(obj.clone());
    t.push_object(obj.clone());
    let a = t.pop();
    let b = t.pop();
    match (a, b) {
        (Some(ScriptValue::Object(a)), Some(ScriptValue::Object(b))) => {
            assert!(Arc::ptr_eq(&a, &b));
        }
        other => panic!("expected two objects, got {other:?}"),
    }
}

#[test]
fn test_dump_shape() {
    let rt = runtime();
    let dump = rt.global().classdb().dump();

    let classes = dump["Classes"].as_array().unwrap();
    let folder = classes
        .iter()
        .find(|c| c["Name"] == "Folder")
        .expect("Folder missing from dump");
    assert_eq!(folder["Superclass"], "Instance");

    let props: Vec<&str> = folder["Properties"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["Name"].as_str().unwrap())
        .collect();
    assert!(props.contains(&"Name"));
    assert!(props.contains(&"Parent"));

    let signals: Vec<&str> = folder["Signals"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["Name"].as_str().unwrap())
        .collect();
    assert!(signals.contains(&"ChildAdded"));
    // Auto-registered change notifications are unlisted.
    assert!(!signals.contains(&"NameChanged"));
}

#[test]
fn test_destroyed_object_rejects_reparent_quietly() {
    let rt = runtime();
    let db = rt.global().classdb();
    let root = db.new_instance("Folder").unwrap();
    let child = db.new_instance("Folder").unwrap();

    child.instance().destroy();
    assert!(!child.instance().set_parent(Some(&root)));
    assert!(root.instance().children().is_empty());
}

#[test]
fn test_orphan_instances_usable_without_registry() {
    // Plain instances work as tree nodes even when their class record is
    // abstract; only script-side construction is gated.
    let orphan = Instance::new_orphan();
    assert_eq!(orphan.class_name(), "Instance");
    assert_eq!(orphan.instance().name(), "Instance");
}
