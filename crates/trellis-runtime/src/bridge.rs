//! C FFI bindings for the Trellis runtime
//!
//! This module provides a C-compatible API for embedders that do not link
//! the interpreter: object creation by class name, primitive property
//! access through reflection, and tree linkage. The API follows these
//! principles:
//! - ABI-stable (uses only C-compatible types)
//! - Error handling via out-parameters
//! - Opaque pointers for runtime objects
//! - Manual memory management

use crate::classdb::ClassDb;
use crate::instance::Folder;
use crate::object::{ObjectHandle, ScriptClass};
use crate::runtime::ScriptRuntime;
use crate::variant::Variant;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Arc;

// ============================================================================
// Opaque Types
// ============================================================================

/// Opaque handle to a Trellis runtime instance
#[repr(C)]
pub struct TrellisRuntime {
    _private: [u8; 0],
}

/// Opaque handle to a tree object
#[repr(C)]
pub struct TrellisObject {
    _private: [u8; 0],
}

/// Error information
#[repr(C)]
pub struct TrellisError {
    message: *mut c_char,
}

// Internal representation of the runtime (not exposed to C)
struct RuntimeHandle {
    runtime: ScriptRuntime,
}

// Internal representation of an object handle (not exposed to C)
struct ObjectBox {
    object: ObjectHandle,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert Rust string to C string (caller must free)
unsafe fn rust_to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Set error out-parameter from string
unsafe fn set_error_str(error_out: *mut *mut TrellisError, msg: &str) {
    if error_out.is_null() {
        return;
    }
    let message = rust_to_c_string(msg);
    let err = Box::new(TrellisError { message });
    *error_out = Box::into_raw(err);
}

/// Borrow a C string argument as &str, or fail with an error out-parameter
unsafe fn borrow_str<'a>(
    s: *const c_char,
    what: &str,
    error: *mut *mut TrellisError,
) -> Option<&'a str> {
    if s.is_null() {
        set_error_str(error, &format!("Invalid arguments (null {what})"));
        return None;
    }
    match CStr::from_ptr(s).to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            set_error_str(error, &format!("Invalid UTF-8 in {what}"));
            None
        }
    }
}

unsafe fn object_of(obj: *const TrellisObject) -> &'static ObjectHandle {
    &(*(obj as *const ObjectBox)).object
}

unsafe fn wrap_object(object: ObjectHandle) -> *mut TrellisObject {
    Box::into_raw(Box::new(ObjectBox { object })) as *mut TrellisObject
}

// ============================================================================
// Runtime Lifecycle Functions
// ============================================================================

/// Create a runtime with the built-in classes registered
///
/// # Returns
/// * Non-null pointer to TrellisRuntime on success
///
/// # Safety
/// The returned runtime must be freed with `trellis_runtime_destroy()`
#[no_mangle]
pub unsafe extern "C" fn trellis_runtime_new(_error: *mut *mut TrellisError) -> *mut TrellisRuntime {
    let mut db = ClassDb::new();
    Folder::initialize_class(&mut db);
    let runtime = ScriptRuntime::new(Arc::new(db));
    runtime.register_classes();
    let handle = Box::new(RuntimeHandle { runtime });
    Box::into_raw(handle) as *mut TrellisRuntime
}

/// Destroy a runtime and free all resources
///
/// # Safety
/// - Runtime pointer must be valid (created by `trellis_runtime_new()`)
/// - Runtime must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn trellis_runtime_destroy(runtime: *mut TrellisRuntime) {
    if runtime.is_null() {
        return;
    }
    let handle = Box::from_raw(runtime as *mut RuntimeHandle);
    handle.runtime.shutdown();
    drop(handle);
}

// ============================================================================
// Object Functions
// ============================================================================

/// Create an object by class name
///
/// # Returns
/// * Non-null pointer to TrellisObject on success
/// * NULL when the class is unknown or not creatable
///
/// # Safety
/// - Runtime pointer and class name must be valid
/// - The returned object must be freed with `trellis_object_free()`
#[no_mangle]
pub unsafe extern "C" fn trellis_instance_new(
    runtime: *mut TrellisRuntime,
    class_name: *const c_char,
    error: *mut *mut TrellisError,
) -> *mut TrellisObject {
    if runtime.is_null() {
        set_error_str(error, "Invalid arguments (null runtime)");
        return ptr::null_mut();
    }
    let Some(class) = borrow_str(class_name, "class name", error) else {
        return ptr::null_mut();
    };
    let handle = &*(runtime as *const RuntimeHandle);
    match handle.runtime.global().classdb().new_instance(class) {
        Some(object) => wrap_object(object),
        None => {
            set_error_str(error, &format!("Class '{class}' is unknown or not creatable"));
            ptr::null_mut()
        }
    }
}

/// Free an object handle. The object itself stays alive while other
/// handles or the tree reference it; this only releases this handle.
///
/// # Safety
/// - Object pointer must be valid (returned by a trellis function)
/// - Object must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn trellis_object_free(obj: *mut TrellisObject) {
    if obj.is_null() {
        return;
    }
    let boxed = Box::from_raw(obj as *mut ObjectBox);
    drop(boxed);
}

/// Get the object's class name (caller frees with `trellis_string_free()`)
///
/// # Safety
/// Object pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_class_name(obj: *const TrellisObject) -> *mut c_char {
    if obj.is_null() {
        return ptr::null_mut();
    }
    rust_to_c_string(object_of(obj).class_name())
}

/// Get the object's name (caller frees with `trellis_string_free()`)
///
/// # Safety
/// Object pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_get_name(obj: *const TrellisObject) -> *mut c_char {
    if obj.is_null() {
        return ptr::null_mut();
    }
    rust_to_c_string(&object_of(obj).instance().name())
}

/// Rename the object
///
/// # Returns
/// * 1 on success, 0 on invalid arguments
///
/// # Safety
/// Object and name pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_set_name(
    obj: *mut TrellisObject,
    name: *const c_char,
) -> c_int {
    if obj.is_null() {
        return 0;
    }
    let Some(name) = borrow_str(name, "name", ptr::null_mut()) else {
        return 0;
    };
    object_of(obj).instance().set_name(name);
    1
}

/// Get the dot-joined path from the tree root (caller frees with
/// `trellis_string_free()`)
///
/// # Safety
/// Object pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_full_name(obj: *const TrellisObject) -> *mut c_char {
    if obj.is_null() {
        return ptr::null_mut();
    }
    rust_to_c_string(&object_of(obj).instance().full_name())
}

// ============================================================================
// Tree Linkage Functions
// ============================================================================

/// Reparent `obj` under `parent` (NULL unparents)
///
/// # Returns
/// * 1 on success, 0 when the move was rejected (cycle, destroyed node)
///
/// # Safety
/// Object pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_set_parent(
    obj: *mut TrellisObject,
    parent: *const TrellisObject,
) -> c_int {
    if obj.is_null() {
        return 0;
    }
    let parent_handle = if parent.is_null() {
        None
    } else {
        Some(object_of(parent).clone())
    };
    c_int::from(object_of(obj).instance().set_parent(parent_handle.as_ref()))
}

/// Get the object's parent
///
/// # Returns
/// * Non-null pointer on success (free with `trellis_object_free()`)
/// * NULL when unparented
///
/// # Safety
/// Object pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_get_parent(obj: *const TrellisObject) -> *mut TrellisObject {
    if obj.is_null() {
        return ptr::null_mut();
    }
    match object_of(obj).instance().parent() {
        Some(parent) => wrap_object(parent),
        None => ptr::null_mut(),
    }
}

/// Number of direct children
///
/// # Safety
/// Object pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_child_count(obj: *const TrellisObject) -> usize {
    if obj.is_null() {
        return 0;
    }
    object_of(obj).instance().children().len()
}

/// Child at `index`, in insertion order
///
/// # Returns
/// * Non-null pointer on success (free with `trellis_object_free()`)
/// * NULL when out of range
///
/// # Safety
/// Object pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_child_at(
    obj: *const TrellisObject,
    index: usize,
) -> *mut TrellisObject {
    if obj.is_null() {
        return ptr::null_mut();
    }
    match object_of(obj).instance().children().get(index) {
        Some(child) => wrap_object(child.clone()),
        None => ptr::null_mut(),
    }
}

/// First child named `name`; non-zero `recursive` searches the subtree
///
/// # Returns
/// * Non-null pointer on success (free with `trellis_object_free()`)
/// * NULL when nothing matches
///
/// # Safety
/// Object and name pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_find_first_child(
    obj: *const TrellisObject,
    name: *const c_char,
    recursive: c_int,
) -> *mut TrellisObject {
    if obj.is_null() {
        return ptr::null_mut();
    }
    let Some(name) = borrow_str(name, "name", ptr::null_mut()) else {
        return ptr::null_mut();
    };
    match object_of(obj)
        .instance()
        .find_first_child(name, recursive != 0)
    {
        Some(child) => wrap_object(child),
        None => ptr::null_mut(),
    }
}

/// Whether the object's class is `class_name` or derives from it
///
/// # Safety
/// All pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_is_a(
    runtime: *const TrellisRuntime,
    obj: *const TrellisObject,
    class_name: *const c_char,
) -> c_int {
    if runtime.is_null() || obj.is_null() {
        return 0;
    }
    let Some(class) = borrow_str(class_name, "class name", ptr::null_mut()) else {
        return 0;
    };
    let handle = &*(runtime as *const RuntimeHandle);
    let db = handle.runtime.global().classdb();
    c_int::from(db.is_a(object_of(obj).class_name(), class))
}

/// Tear the object down: unparent, destroy the subtree, drop all signal
/// connections. The handle itself must still be freed with
/// `trellis_object_free()`.
///
/// # Safety
/// Object pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_destroy(obj: *mut TrellisObject) {
    if obj.is_null() {
        return;
    }
    object_of(obj).instance().destroy();
}

// ============================================================================
// Property Functions
// ============================================================================

/// Read a numeric property through reflection
///
/// # Returns
/// * 1 and writes `out` on success
/// * 0 when the property is unknown or not numeric
///
/// # Safety
/// All pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_get_number(
    runtime: *const TrellisRuntime,
    obj: *const TrellisObject,
    name: *const c_char,
    out: *mut f64,
) -> c_int {
    if runtime.is_null() || obj.is_null() || out.is_null() {
        return 0;
    }
    let Some(name) = borrow_str(name, "property name", ptr::null_mut()) else {
        return 0;
    };
    let handle = &*(runtime as *const RuntimeHandle);
    let db = handle.runtime.global().classdb();
    match db
        .get_property(object_of(obj).as_ref(), name)
        .and_then(|v| v.cast::<f64>())
    {
        Some(value) => {
            *out = value;
            1
        }
        None => 0,
    }
}

/// Write a numeric property through reflection
///
/// # Returns
/// * 1 on success, 0 when the property is unknown, read-only, or not
///   numeric
///
/// # Safety
/// All pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_set_number(
    runtime: *const TrellisRuntime,
    obj: *mut TrellisObject,
    name: *const c_char,
    value: f64,
) -> c_int {
    if runtime.is_null() || obj.is_null() {
        return 0;
    }
    let Some(name) = borrow_str(name, "property name", ptr::null_mut()) else {
        return 0;
    };
    let handle = &*(runtime as *const RuntimeHandle);
    let db = handle.runtime.global().classdb();
    c_int::from(db.set_property(object_of(obj).as_ref(), name, &Variant::Double(value)))
}

/// Read a boolean property through reflection
///
/// # Safety
/// All pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_get_bool(
    runtime: *const TrellisRuntime,
    obj: *const TrellisObject,
    name: *const c_char,
    out: *mut c_int,
) -> c_int {
    if runtime.is_null() || obj.is_null() || out.is_null() {
        return 0;
    }
    let Some(name) = borrow_str(name, "property name", ptr::null_mut()) else {
        return 0;
    };
    let handle = &*(runtime as *const RuntimeHandle);
    let db = handle.runtime.global().classdb();
    match db
        .get_property(object_of(obj).as_ref(), name)
        .and_then(|v| v.cast::<bool>())
    {
        Some(value) => {
            *out = c_int::from(value);
            1
        }
        None => 0,
    }
}

/// Write a boolean property through reflection
///
/// # Safety
/// All pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_set_bool(
    runtime: *const TrellisRuntime,
    obj: *mut TrellisObject,
    name: *const c_char,
    value: c_int,
) -> c_int {
    if runtime.is_null() || obj.is_null() {
        return 0;
    }
    let Some(name) = borrow_str(name, "property name", ptr::null_mut()) else {
        return 0;
    };
    let handle = &*(runtime as *const RuntimeHandle);
    let db = handle.runtime.global().classdb();
    c_int::from(db.set_property(object_of(obj).as_ref(), name, &Variant::Bool(value != 0)))
}

/// Read a string property through reflection (caller frees with
/// `trellis_string_free()`)
///
/// # Returns
/// * Non-null string on success
/// * NULL when the property is unknown or not a string
///
/// # Safety
/// All pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_get_string(
    runtime: *const TrellisRuntime,
    obj: *const TrellisObject,
    name: *const c_char,
) -> *mut c_char {
    if runtime.is_null() || obj.is_null() {
        return ptr::null_mut();
    }
    let Some(name) = borrow_str(name, "property name", ptr::null_mut()) else {
        return ptr::null_mut();
    };
    let handle = &*(runtime as *const RuntimeHandle);
    let db = handle.runtime.global().classdb();
    match db
        .get_property(object_of(obj).as_ref(), name)
        .and_then(|v| v.cast::<String>())
    {
        Some(value) => rust_to_c_string(&value),
        None => ptr::null_mut(),
    }
}

/// Write a string property through reflection
///
/// # Safety
/// All pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn trellis_object_set_string(
    runtime: *const TrellisRuntime,
    obj: *mut TrellisObject,
    name: *const c_char,
    value: *const c_char,
) -> c_int {
    if runtime.is_null() || obj.is_null() {
        return 0;
    }
    let Some(name) = borrow_str(name, "property name", ptr::null_mut()) else {
        return 0;
    };
    let Some(value) = borrow_str(value, "property value", ptr::null_mut()) else {
        return 0;
    };
    let handle = &*(runtime as *const RuntimeHandle);
    let db = handle.runtime.global().classdb();
    c_int::from(db.set_property(
        object_of(obj).as_ref(),
        name,
        &Variant::String(value.to_string()),
    ))
}

// ============================================================================
// String and Error Functions
// ============================================================================

/// Free a string returned by this API
///
/// # Safety
/// - String must have been returned by a trellis function
/// - String must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn trellis_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    let _ = CString::from_raw(s);
}

/// Get the error message
///
/// # Returns
/// * Null-terminated error message string
/// * NULL if error is NULL
///
/// # Safety
/// - Error pointer must be valid
/// - Returned string is valid until `trellis_error_free()` is called
#[no_mangle]
pub unsafe extern "C" fn trellis_error_message(error: *const TrellisError) -> *const c_char {
    if error.is_null() {
        return ptr::null();
    }
    (*error).message
}

/// Free an error
///
/// # Safety
/// - Error pointer must be valid (created by the Trellis API)
/// - Error must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn trellis_error_free(error: *mut TrellisError) {
    if error.is_null() {
        return;
    }
    if !(*error).message.is_null() {
        let _ = CString::from_raw((*error).message);
    }
    let _ = Box::from_raw(error);
}

/// Get the runtime version string
///
/// # Safety
/// The returned string is static and must not be freed
#[no_mangle]
pub unsafe extern "C" fn trellis_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_lifecycle() {
        unsafe {
            let mut error: *mut TrellisError = ptr::null_mut();
            let rt = trellis_runtime_new(&mut error);
            assert!(!rt.is_null());
            assert!(error.is_null());
            trellis_runtime_destroy(rt);
        }
    }

    #[test]
    fn test_create_and_link() {
        unsafe {
            let mut error: *mut TrellisError = ptr::null_mut();
            let rt = trellis_runtime_new(&mut error);

            let class = CString::new("Folder").unwrap();
            let parent = trellis_instance_new(rt, class.as_ptr(), &mut error);
            let child = trellis_instance_new(rt, class.as_ptr(), &mut error);
            assert!(!parent.is_null());
            assert!(!child.is_null());

            let name = CString::new("Drawer").unwrap();
            assert_eq!(trellis_object_set_name(child, name.as_ptr()), 1);
            assert_eq!(trellis_object_set_parent(child, parent), 1);
            assert_eq!(trellis_object_child_count(parent), 1);

            let full = trellis_object_full_name(child);
            assert_eq!(CStr::from_ptr(full).to_str().unwrap(), "Folder.Drawer");
            trellis_string_free(full);

            let found = trellis_object_find_first_child(parent, name.as_ptr(), 0);
            assert!(!found.is_null());
            trellis_object_free(found);

            trellis_object_free(child);
            trellis_object_free(parent);
            trellis_runtime_destroy(rt);
        }
    }

    #[test]
    fn test_unknown_class_sets_error() {
        unsafe {
            let mut error: *mut TrellisError = ptr::null_mut();
            let rt = trellis_runtime_new(&mut error);

            let class = CString::new("Nonesuch").unwrap();
            let obj = trellis_instance_new(rt, class.as_ptr(), &mut error);
            assert!(obj.is_null());
            assert!(!error.is_null());
            let msg = CStr::from_ptr(trellis_error_message(error)).to_str().unwrap();
            assert!(msg.contains("Nonesuch"));
            trellis_error_free(error);
            trellis_runtime_destroy(rt);
        }
    }

    #[test]
    fn test_string_property_round_trip() {
        unsafe {
            let mut error: *mut TrellisError = ptr::null_mut();
            let rt = trellis_runtime_new(&mut error);

            let class = CString::new("Folder").unwrap();
            let obj = trellis_instance_new(rt, class.as_ptr(), &mut error);
            let prop = CString::new("Name").unwrap();
            let value = CString::new("Renamed").unwrap();
            assert_eq!(trellis_object_set_string(rt, obj, prop.as_ptr(), value.as_ptr()), 1);

            let got = trellis_object_get_string(rt, obj, prop.as_ptr());
            assert_eq!(CStr::from_ptr(got).to_str().unwrap(), "Renamed");
            trellis_string_free(got);

            trellis_object_free(obj);
            trellis_runtime_destroy(rt);
        }
    }

    #[test]
    fn test_is_a_walks_hierarchy() {
        unsafe {
            let mut error: *mut TrellisError = ptr::null_mut();
            let rt = trellis_runtime_new(&mut error);

            let class = CString::new("Folder").unwrap();
            let obj = trellis_instance_new(rt, class.as_ptr(), &mut error);
            let base = CString::new("Instance").unwrap();
            assert_eq!(trellis_object_is_a(rt, obj, base.as_ptr()), 1);

            trellis_object_free(obj);
            trellis_runtime_destroy(rt);
        }
    }
}
