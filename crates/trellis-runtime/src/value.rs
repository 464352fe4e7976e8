//! Interpreter stack value representation
//!
//! [`ScriptValue`] is the slot type of a [`ScriptThread`](crate::ScriptThread)
//! stack. It is deliberately close to a dynamic language's value set: nil,
//! boolean, number, string, table, function, and two host-backed cases.
//! Integers above the double-precision exact range get a dedicated `Int64`
//! case so magnitude survives marshaling.

use crate::object::ObjectHandle;
use crate::variant::ScriptFunction;
use std::any::Any;
use std::sync::Arc;
use trellis_core::NameMap;

/// Largest magnitude exactly representable in an f64 (2^53). Integers at or
/// below this travel as plain numbers; anything larger is boxed as `Int64`.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_992;

/// A single stack slot.
#[derive(Clone, Default)]
pub enum ScriptValue {
    /// Absence of a value.
    #[default]
    Nil,
    /// Boolean.
    Bool(bool),
    /// Double-precision number.
    Number(f64),
    /// Boxed integer outside the f64-exact range.
    Int64(i64),
    /// UTF-8 string.
    Str(String),
    /// Table with an array part and a string-keyed map part.
    Table(ScriptTable),
    /// Callable closure reference.
    Function(ScriptFunction),
    /// Scriptable host object.
    Object(ObjectHandle),
    /// Opaque typed payload dispatched through a class binder.
    Userdata(Userdata),
}

impl ScriptValue {
    /// Push-side integer classification. See [`MAX_SAFE_INTEGER`].
    pub fn from_i64(v: i64) -> ScriptValue {
        if v.unsigned_abs() <= MAX_SAFE_INTEGER as u64 {
            ScriptValue::Number(v as f64)
        } else {
            ScriptValue::Int64(v)
        }
    }

    /// Script-visible type name. Host-backed cases report their class.
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::Int64(_) => "Int64",
            ScriptValue::Str(_) => "string",
            ScriptValue::Table(_) => "table",
            ScriptValue::Function(_) => "function",
            ScriptValue::Object(o) => o.class_name(),
            ScriptValue::Userdata(u) => u.class,
        }
    }

    /// Truthiness: everything except `Nil` and `false` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, ScriptValue::Nil | ScriptValue::Bool(false))
    }
}

impl std::fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptValue::Nil => write!(f, "nil"),
            ScriptValue::Bool(v) => write!(f, "{v}"),
            ScriptValue::Number(v) => write!(f, "{v}"),
            ScriptValue::Int64(v) => write!(f, "{v}L"),
            ScriptValue::Str(v) => write!(f, "{v:?}"),
            ScriptValue::Table(t) => {
                write!(f, "table(#{}+{})", t.array.len(), t.map.len())
            }
            ScriptValue::Function(v) => write!(f, "{v:?}"),
            ScriptValue::Object(o) => {
                write!(f, "{}({})", o.class_name(), o.instance().object_id())
            }
            ScriptValue::Userdata(u) => write!(f, "{}(..)", u.class),
        }
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScriptValue::Nil, ScriptValue::Nil) => true,
            (ScriptValue::Bool(a), ScriptValue::Bool(b)) => a == b,
            (ScriptValue::Number(a), ScriptValue::Number(b)) => a == b,
            (ScriptValue::Int64(a), ScriptValue::Int64(b)) => a == b,
            (ScriptValue::Str(a), ScriptValue::Str(b)) => a == b,
            (ScriptValue::Table(a), ScriptValue::Table(b)) => a == b,
            (ScriptValue::Function(a), ScriptValue::Function(b)) => a == b,
            (ScriptValue::Object(a), ScriptValue::Object(b)) => {
                a.instance().object_id() == b.instance().object_id()
            }
            (ScriptValue::Userdata(a), ScriptValue::Userdata(b)) => Arc::ptr_eq(&a.value, &b.value),
            _ => false,
        }
    }
}

/// Table value with separate array and string-keyed parts.
#[derive(Clone, Default, PartialEq)]
pub struct ScriptTable {
    /// Positional entries.
    pub array: Vec<ScriptValue>,
    /// Named entries.
    pub map: NameMap<ScriptValue>,
}

impl ScriptTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Opaque host payload tagged with the class binder that dispatches it.
#[derive(Clone)]
pub struct Userdata {
    /// Binder class name, e.g. `Vector3`.
    pub class: &'static str,
    /// The payload.
    pub value: Arc<dyn Any + Send + Sync>,
}

impl Userdata {
    /// Wrap a payload under a binder class.
    pub fn new<T: Any + Send + Sync>(class: &'static str, value: T) -> Self {
        Self {
            class,
            value: Arc::new(value),
        }
    }

    /// Borrow the payload as a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Clone out an owning handle to the payload.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_classification() {
        assert!(matches!(ScriptValue::from_i64(42), ScriptValue::Number(_)));
        assert!(matches!(
            ScriptValue::from_i64(MAX_SAFE_INTEGER),
            ScriptValue::Number(_)
        ));
        assert!(matches!(
            ScriptValue::from_i64(MAX_SAFE_INTEGER + 1),
            ScriptValue::Int64(_)
        ));
        assert!(matches!(
            ScriptValue::from_i64(-MAX_SAFE_INTEGER - 1),
            ScriptValue::Int64(_)
        ));
    }

    #[test]
    fn test_truthiness() {
        assert!(!ScriptValue::Nil.is_truthy());
        assert!(!ScriptValue::Bool(false).is_truthy());
        assert!(ScriptValue::Bool(true).is_truthy());
        assert!(ScriptValue::Number(0.0).is_truthy());
        assert!(ScriptValue::Str(String::new()).is_truthy());
    }

    #[test]
    fn test_userdata_downcast() {
        let u = Userdata::new("Point", (1i32, 2i32));
        assert_eq!(u.downcast_ref::<(i32, i32)>(), Some(&(1, 2)));
        assert!(u.downcast_ref::<String>().is_none());
    }
}
