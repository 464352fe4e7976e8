//! Trellis Runtime
//!
//! This crate provides the reflection and binding engine of the Trellis
//! scripting-object runtime:
//! - **Class registry**: class records, reflection, and registration
//!   (`classdb` module)
//! - **Binding**: per-class dispatch tables and stack marshaling (`binder`,
//!   `stack` modules)
//! - **Objects**: the instance tree, host-object traits, and declaration
//!   macro (`instance`, `object` modules)
//! - **Signals and scheduling**: signal emission with re-entrancy limits
//!   and the cooperative task scheduler (`signals`, `scheduler` modules)
//! - **Embedding**: the runtime facade, wire codec, and C bridge
//!   (`runtime`, `wire`, `bridge` modules)
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_runtime::{ClassDb, Folder, ScriptClass, ScriptRuntime};
//! use std::sync::Arc;
//!
//! let mut db = ClassDb::new();
//! Folder::initialize_class(&mut db);
//!
//! let runtime = ScriptRuntime::new(Arc::new(db));
//! runtime.register_classes();
//!
//! let folder = runtime.global().classdb().new_instance("Folder").unwrap();
//! assert_eq!(folder.class_name(), "Folder");
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::not_unsafe_ptr_arg_deref)]

/// Per-class dispatch tables and metamethod resolution
pub mod binder;

/// C FFI bindings for non-interpreter embedders
pub mod bridge;

/// Identity and capability model
pub mod capabilities;

/// Class registry and reflection database
pub mod classdb;

/// Runtime error taxonomy
pub mod error;

/// Instance tree base object
pub mod instance;

/// Host object traits and the class declaration macro
pub mod object;

/// Runtime assembly and shared global state
pub mod runtime;

/// Cooperative task scheduler and GC pacing
pub mod scheduler;

/// Signal emission and connection ownership
pub mod signals;

/// Stack marshaling between host types and script values
pub mod stack;

/// Script thread data and the framed value stack
pub mod thread;

/// Script-facing value representation
pub mod value;

/// The closed tagged union crossing the host boundary
pub mod variant;

/// Remote-call argument codec
pub mod wire;

pub use binder::{BinOp, ClassBinder};
pub use capabilities::{identity_capabilities, Capability, Identity};
pub use classdb::{
    CallbackDesc, ClassDb, ClassInfo, ClassRegistration, ClassTag, FunctionDesc, MemberTag,
    MemoryCategory, PropertyDesc, SignalDesc, ThreadSafety,
};
pub use error::ScriptError;
pub use instance::{Folder, Instance};
pub use object::{new_object, ObjectHandle, ScriptClass, ScriptObject};
pub use runtime::{GlobalState, ScriptRuntime, VmKind};
pub use scheduler::{GcHost, ResumptionPoint, ScheduledTask, TaskScheduler};
pub use signals::{
    ConnectionRef, SignalEmitter, SignalRef, DEFERRED_REENTRANCY_LIMIT,
    IMMEDIATE_REENTRANCY_LIMIT,
};
pub use stack::StackOp;
pub use thread::{ScriptThread, ThreadState};
pub use value::{ScriptTable, ScriptValue, Userdata, MAX_SAFE_INTEGER};
pub use variant::{ScriptFunction, Variant, VariantKind};
