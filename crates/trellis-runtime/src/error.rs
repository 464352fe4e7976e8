//! Script-visible error taxonomy
//!
//! Everything a script can observe as a runtime error is a [`ScriptError`].
//! Host-facing APIs never surface these: registry lookups return `Option`,
//! tree mutations fail silently, and the bridge reports booleans. Only the
//! interpreter-facing call protocol (bound methods, property access, operator
//! dispatch, emits) speaks `Result<_, ScriptError>`.

use thiserror::Error;

/// Error raised through the interpreter-facing call protocol.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptError {
    /// The calling thread's identity lacks a required permission.
    #[error("The current identity ({identity}) cannot {action} (lacking permission {permission})")]
    CapabilityViolation {
        /// Numeric identity of the calling thread.
        identity: u8,
        /// The attempted action, e.g. `read 'Name'`.
        action: String,
        /// Bit index of the missing permission.
        permission: u32,
    },

    /// Indexed read/write of a name that is not a member at all.
    #[error("{name} is not a valid member of {class}")]
    NotAMember {
        /// The requested member name.
        name: String,
        /// The class that was indexed.
        class: String,
    },

    /// Write to a property that has no setter.
    #[error("Unable to assign property {name} of {class}. Property is read only")]
    ReadOnly {
        /// The property name.
        name: String,
        /// The owning class.
        class: String,
    },

    /// Read of a property that has no getter.
    #[error("Property {name} of {class} is write only")]
    WriteOnly {
        /// The property name.
        name: String,
        /// The owning class.
        class: String,
    },

    /// Name-based call of a method that was never declared.
    #[error("{name} is not a valid method of {class}")]
    NoSuchMethod {
        /// The requested method name.
        name: String,
        /// The class that was called.
        class: String,
    },

    /// Reads of callback members are not allowed, only assignment.
    #[error("{name} is a callback member of {class}; you can only set the callback value, get is not available")]
    CallbackWriteOnly {
        /// The callback name.
        name: String,
        /// The owning class.
        class: String,
    },

    /// Argument or value marshaling failed.
    #[error("invalid argument #{index} (expected {expected}, got {got})")]
    TypeMismatch {
        /// 1-based argument position.
        index: usize,
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        got: &'static str,
    },

    /// No operator overload matched the operand types.
    #[error("attempt to perform arithmetic ({op}) on {lhs} and {rhs}")]
    ArithTypeMismatch {
        /// Operator name, e.g. `add`.
        op: &'static str,
        /// Left operand type name.
        lhs: &'static str,
        /// Right operand type name.
        rhs: &'static str,
    },

    /// Immediate or deferred signal delivery exceeded its re-entrancy limit.
    #[error("Maximum event re-entrancy depth exceeded for {signal}")]
    Reentrancy {
        /// `Class.Signal` of the offending emission.
        signal: String,
    },

    /// A wait primitive was invoked with no scheduler installed.
    #[error("Cannot wait: no task scheduler is attached to this runtime")]
    NoScheduler,

    /// Name-based call dispatch without a method name.
    #[error("no namecall method")]
    NoNamecall,

    /// Anything else surfaced by a bound function.
    #[error("{0}")]
    Runtime(String),
}

impl ScriptError {
    /// Wrap an arbitrary message, for bound functions raising ad-hoc errors.
    pub fn runtime(msg: impl Into<String>) -> Self {
        ScriptError::Runtime(msg.into())
    }
}
