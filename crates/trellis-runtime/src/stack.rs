//! Typed stack marshaling
//!
//! [`StackOp`] gives every marshalable type four verbs against a thread's
//! stack: `push`, `get` (lenient, returns a default on mismatch), `is`
//! (type test), and `check` (strict, raises a typed argument error). Bound
//! functions are written against these verbs and never touch the raw slot
//! representation.
//!
//! Integer semantics follow the value layer: `i64` pushes as a plain number
//! when the magnitude fits an f64 exactly and as a boxed `Int64` otherwise,
//! and both readings accept either representation.

use crate::error::ScriptError;
use crate::object::{ObjectHandle, ScriptClass};
use crate::thread::ScriptThread;
use crate::value::{ScriptTable, ScriptValue, Userdata};
use crate::variant::{Dictionary, ScriptFunction, Variant};
use std::sync::Arc;
use trellis_core::{Color3, EnumItem, Vector3};

/// Stack marshaling for one type.
pub trait StackOp: Sized {
    /// Script-visible name used in typed argument errors.
    const TYPE_NAME: &'static str;

    /// Push a value onto the thread's current frame.
    fn push(t: &ScriptThread, value: Self);

    /// Read the value at frame position `index` leniently, substituting a
    /// default when the slot holds something else.
    fn get(t: &ScriptThread, index: usize) -> Self;

    /// Whether the slot at `index` holds this type.
    fn is(t: &ScriptThread, index: usize) -> bool;

    /// Read the value at `index` strictly.
    fn check(t: &ScriptThread, index: usize) -> Result<Self, ScriptError> {
        if Self::is(t, index) {
            Ok(Self::get(t, index))
        } else {
            Err(ScriptError::TypeMismatch {
                index,
                expected: Self::TYPE_NAME,
                got: t.type_name_at(index),
            })
        }
    }
}

impl StackOp for bool {
    const TYPE_NAME: &'static str = "boolean";

    fn push(t: &ScriptThread, value: Self) {
        t.push(ScriptValue::Bool(value));
    }

    // Truthiness, matching the interpreter convention.
    fn get(t: &ScriptThread, index: usize) -> Self {
        t.arg(index).is_truthy()
    }

    fn is(t: &ScriptThread, index: usize) -> bool {
        matches!(t.arg(index), ScriptValue::Bool(_))
    }
}

impl StackOp for f64 {
    const TYPE_NAME: &'static str = "number";

    fn push(t: &ScriptThread, value: Self) {
        t.push(ScriptValue::Number(value));
    }

    fn get(t: &ScriptThread, index: usize) -> Self {
        match t.arg(index) {
            ScriptValue::Number(v) => v,
            ScriptValue::Int64(v) => v as f64,
            _ => 0.0,
        }
    }

    fn is(t: &ScriptThread, index: usize) -> bool {
        matches!(t.arg(index), ScriptValue::Number(_) | ScriptValue::Int64(_))
    }
}

impl StackOp for i64 {
    const TYPE_NAME: &'static str = "Int64";

    fn push(t: &ScriptThread, value: Self) {
        t.push(ScriptValue::from_i64(value));
    }

    fn get(t: &ScriptThread, index: usize) -> Self {
        match t.arg(index) {
            ScriptValue::Number(v) => v as i64,
            ScriptValue::Int64(v) => v,
            _ => 0,
        }
    }

    fn is(t: &ScriptThread, index: usize) -> bool {
        matches!(t.arg(index), ScriptValue::Number(_) | ScriptValue::Int64(_))
    }
}

macro_rules! stack_op_via_f64 {
    ($($t:ty),*) => {$(
        impl StackOp for $t {
            const TYPE_NAME: &'static str = "number";

            fn push(t: &ScriptThread, value: Self) {
                f64::push(t, value as f64);
            }

            fn get(t: &ScriptThread, index: usize) -> Self {
                f64::get(t, index) as $t
            }

            fn is(t: &ScriptThread, index: usize) -> bool {
                f64::is(t, index)
            }
        }
    )*};
}

stack_op_via_f64!(i32, u32, f32);

impl StackOp for String {
    const TYPE_NAME: &'static str = "string";

    fn push(t: &ScriptThread, value: Self) {
        t.push(ScriptValue::Str(value));
    }

    fn get(t: &ScriptThread, index: usize) -> Self {
        match t.arg(index) {
            ScriptValue::Str(s) => s,
            _ => String::new(),
        }
    }

    fn is(t: &ScriptThread, index: usize) -> bool {
        matches!(t.arg(index), ScriptValue::Str(_))
    }
}

impl StackOp for ScriptFunction {
    const TYPE_NAME: &'static str = "function";

    fn push(t: &ScriptThread, value: Self) {
        t.push(ScriptValue::Function(value));
    }

    fn get(t: &ScriptThread, index: usize) -> Self {
        match t.arg(index) {
            ScriptValue::Function(f) => f,
            _ => ScriptFunction::new(|_, _| Ok(0)),
        }
    }

    fn is(t: &ScriptThread, index: usize) -> bool {
        matches!(t.arg(index), ScriptValue::Function(_))
    }
}

impl StackOp for ObjectHandle {
    const TYPE_NAME: &'static str = "Instance";

    fn push(t: &ScriptThread, value: Self) {
        t.push_object(value);
    }

    fn get(t: &ScriptThread, index: usize) -> Self {
        match t.arg(index) {
            ScriptValue::Object(o) => o,
            _ => crate::instance::Instance::new_orphan(),
        }
    }

    fn is(t: &ScriptThread, index: usize) -> bool {
        matches!(t.arg(index), ScriptValue::Object(_))
    }
}

impl<T: ScriptClass + Default> StackOp for Arc<T> {
    const TYPE_NAME: &'static str = T::CLASS_NAME;

    fn push(t: &ScriptThread, value: Self) {
        t.push_object(value);
    }

    fn get(t: &ScriptThread, index: usize) -> Self {
        Self::check(t, index).unwrap_or_else(|_| crate::object::new_object::<T>())
    }

    fn is(t: &ScriptThread, index: usize) -> bool {
        match t.arg(index) {
            ScriptValue::Object(o) => o.as_any().is::<T>(),
            _ => false,
        }
    }

    fn check(t: &ScriptThread, index: usize) -> Result<Self, ScriptError> {
        let mismatch = || ScriptError::TypeMismatch {
            index,
            expected: Self::TYPE_NAME,
            got: t.type_name_at(index),
        };
        match t.arg(index) {
            ScriptValue::Object(o) => o.as_any_arc().downcast::<T>().map_err(|_| mismatch()),
            _ => Err(mismatch()),
        }
    }
}

macro_rules! stack_op_userdata {
    ($ty:ty, $name:expr, $default:expr) => {
        impl StackOp for $ty {
            const TYPE_NAME: &'static str = $name;

            fn push(t: &ScriptThread, value: Self) {
                t.push(ScriptValue::Userdata(Userdata::new($name, value)));
            }

            fn get(t: &ScriptThread, index: usize) -> Self {
                match t.arg(index) {
                    ScriptValue::Userdata(u) => {
                        u.downcast_ref::<$ty>().copied().unwrap_or($default)
                    }
                    _ => $default,
                }
            }

            fn is(t: &ScriptThread, index: usize) -> bool {
                matches!(t.arg(index), ScriptValue::Userdata(u) if u.downcast_ref::<$ty>().is_some())
            }
        }
    };
}

stack_op_userdata!(Vector3, "Vector3", Vector3::ZERO);
stack_op_userdata!(Color3, "Color3", Color3::new(0.0, 0.0, 0.0));

impl StackOp for &'static EnumItem {
    const TYPE_NAME: &'static str = "EnumItem";

    fn push(t: &ScriptThread, value: Self) {
        t.push(ScriptValue::Userdata(Userdata::new("EnumItem", value)));
    }

    fn get(t: &ScriptThread, index: usize) -> Self {
        match t.arg(index) {
            ScriptValue::Userdata(u) => u
                .downcast_ref::<&'static EnumItem>()
                .copied()
                .unwrap_or(&trellis_core::SIGNAL_BEHAVIOR.items()[0]),
            _ => &trellis_core::SIGNAL_BEHAVIOR.items()[0],
        }
    }

    fn is(t: &ScriptThread, index: usize) -> bool {
        matches!(t.arg(index), ScriptValue::Userdata(u)
            if u.downcast_ref::<&'static EnumItem>().is_some())
    }
}

impl<T: StackOp> StackOp for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn push(t: &ScriptThread, value: Self) {
        match value {
            Some(v) => T::push(t, v),
            None => t.push(ScriptValue::Nil),
        }
    }

    fn get(t: &ScriptThread, index: usize) -> Self {
        if T::is(t, index) {
            Some(T::get(t, index))
        } else {
            None
        }
    }

    fn is(t: &ScriptThread, index: usize) -> bool {
        matches!(t.arg(index), ScriptValue::Nil) || T::is(t, index)
    }

    fn check(t: &ScriptThread, index: usize) -> Result<Self, ScriptError> {
        if matches!(t.arg(index), ScriptValue::Nil) {
            Ok(None)
        } else {
            T::check(t, index).map(Some)
        }
    }
}

impl StackOp for Variant {
    const TYPE_NAME: &'static str = "Variant";

    fn push(t: &ScriptThread, value: Self) {
        match value {
            Variant::Null => t.push(ScriptValue::Nil),
            Variant::Bool(v) => t.push(ScriptValue::Bool(v)),
            Variant::Int(v) => t.push(ScriptValue::from_i64(v)),
            Variant::Double(v) => t.push(ScriptValue::Number(v)),
            Variant::String(v) => t.push(ScriptValue::Str(v)),
            Variant::Function(v) => t.push(ScriptValue::Function(v)),
            Variant::Dictionary(map) => {
                let mut table = ScriptTable::new();
                for (k, v) in map.iter() {
                    table.map.insert(k, to_value(t, v.clone()));
                }
                t.push(ScriptValue::Table(table));
            }
            Variant::Array(items) => {
                let mut table = ScriptTable::new();
                table.array = items.into_iter().map(|v| to_value(t, v)).collect();
                t.push(ScriptValue::Table(table));
            }
            Variant::EnumItem(item) => <&'static EnumItem>::push(t, item),
            Variant::Object(o) => t.push_object(o),
        }
    }

    fn get(t: &ScriptThread, index: usize) -> Self {
        from_value(t.arg(index))
    }

    fn is(_t: &ScriptThread, _index: usize) -> bool {
        true
    }
}

fn to_value(t: &ScriptThread, v: Variant) -> ScriptValue {
    // Routes through push so nested objects hit the handle registry too.
    Variant::push(t, v);
    t.pop().unwrap_or(ScriptValue::Nil)
}

/// Convert a stack value into a Variant. Tables with named entries become
/// dictionaries; purely positional tables become arrays. Userdata that is
/// not an enum item has no Variant form and collapses to `Null`.
pub fn from_value(v: ScriptValue) -> Variant {
    match v {
        ScriptValue::Nil => Variant::Null,
        ScriptValue::Bool(b) => Variant::Bool(b),
        ScriptValue::Number(n) => Variant::Double(n),
        ScriptValue::Int64(n) => Variant::Int(n),
        ScriptValue::Str(s) => Variant::String(s),
        ScriptValue::Function(f) => Variant::Function(f),
        ScriptValue::Table(table) => {
            if table.map.is_empty() {
                Variant::Array(table.array.into_iter().map(from_value).collect())
            } else {
                let mut dict = Dictionary::new();
                for (k, v) in table.map.iter() {
                    dict.insert(k, from_value(v.clone()));
                }
                Variant::Dictionary(dict)
            }
        }
        ScriptValue::Object(o) => Variant::Object(o),
        ScriptValue::Userdata(u) => match u.downcast_ref::<&'static EnumItem>() {
            Some(item) => Variant::EnumItem(item),
            None => Variant::Null,
        },
    }
}

/// Push every element of `args`, returning how many were pushed.
pub fn push_all(t: &ScriptThread, args: &[Variant]) -> usize {
    for arg in args {
        Variant::push(t, arg.clone());
    }
    args.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ScriptRuntime;

    fn test_thread() -> Arc<ScriptThread> {
        ScriptRuntime::new(Arc::new(crate::classdb::ClassDb::new()))
            .main_thread()
            .clone()
    }

    #[test]
    fn test_number_round_trip() {
        let t = test_thread();
        f64::push(&t, 2.5);
        assert!(f64::is(&t, 1));
        assert_eq!(f64::get(&t, 1), 2.5);
        assert_eq!(f64::check(&t, 1).unwrap(), 2.5);
    }

    #[test]
    fn test_i64_crosses_exact_range() {
        let t = test_thread();
        i64::push(&t, 12);
        i64::push(&t, crate::value::MAX_SAFE_INTEGER + 5);
        assert!(matches!(t.arg(1), ScriptValue::Number(_)));
        assert!(matches!(t.arg(2), ScriptValue::Int64(_)));
        assert_eq!(i64::get(&t, 1), 12);
        assert_eq!(i64::get(&t, 2), crate::value::MAX_SAFE_INTEGER + 5);
        // Both representations satisfy the number reading.
        assert!(f64::is(&t, 2));
    }

    #[test]
    fn test_check_reports_position_and_types() {
        let t = test_thread();
        <String as StackOp>::push(&t, "x".into());
        let err = f64::check(&t, 1).unwrap_err();
        assert_eq!(
            err,
            ScriptError::TypeMismatch {
                index: 1,
                expected: "number",
                got: "string",
            }
        );
    }

    #[test]
    fn test_get_defaults_on_mismatch() {
        let t = test_thread();
        t.push(ScriptValue::Nil);
        assert_eq!(f64::get(&t, 1), 0.0);
        assert_eq!(String::get(&t, 1), "");
        assert_eq!(Vector3::get(&t, 1), Vector3::ZERO);
    }

    #[test]
    fn test_bool_get_is_truthiness() {
        let t = test_thread();
        f64::push(&t, 5.0);
        t.push(ScriptValue::Nil);
        assert!(bool::get(&t, 1));
        assert!(!bool::get(&t, 2));
        assert!(!bool::is(&t, 1));
    }

    #[test]
    fn test_optional_argument() {
        let t = test_thread();
        t.push(ScriptValue::Nil);
        f64::push(&t, 1.0);
        assert_eq!(Option::<f64>::check(&t, 1).unwrap(), None);
        assert_eq!(Option::<f64>::check(&t, 2).unwrap(), Some(1.0));
        // Absent trailing arguments read as None too.
        assert_eq!(Option::<String>::check(&t, 9).unwrap(), None);
    }

    #[test]
    fn test_typed_object_get_is_lenient() {
        use crate::instance::Instance;
        use crate::object::ScriptObject;

        let t = test_thread();
        <String as StackOp>::push(&t, "not an object".into());

        // A mismatched slot reads as a fresh orphan, never a panic; the
        // strict reading reports the typed error.
        let obj = <Arc<Instance> as StackOp>::get(&t, 1);
        assert_eq!(obj.class_name(), "Instance");
        assert!(<Arc<Instance> as StackOp>::check(&t, 1).is_err());
    }

    #[test]
    fn test_vector3_round_trip() {
        let t = test_thread();
        Vector3::push(&t, Vector3::new(1.0, 2.0, 3.0));
        assert!(Vector3::is(&t, 1));
        assert_eq!(Vector3::check(&t, 1).unwrap(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(t.type_name_at(1), "Vector3");
    }

    #[test]
    fn test_variant_table_conversions() {
        let t = test_thread();
        Variant::push(&t, Variant::Array(vec![Variant::Int(1), Variant::Int(2)]));
        let back = Variant::get(&t, 1);
        assert_eq!(back, Variant::Array(vec![Variant::Int(1), Variant::Int(2)]));

        let mut dict = Dictionary::new();
        dict.insert("k", Variant::from("v"));
        Variant::push(&t, Variant::Dictionary(dict.clone()));
        assert_eq!(Variant::get(&t, 2), Variant::Dictionary(dict));
    }
}
