//! The dynamic value type bridging host and script type systems
//!
//! [`Variant`] is the sole type crossing a true dynamic boundary: generic
//! property access by name, signal arguments, and the wire codec all speak
//! Variant. Typed bindings bypass it entirely in favor of direct stack
//! marshaling.
//!
//! The closed tag set matches the original engine: switching the active case
//! destroys the old payload (the enum does this for us), a default Variant is
//! `Null`, and object/function payloads carry their own reference semantics.

use crate::error::ScriptError;
use crate::object::ObjectHandle;
use crate::thread::ScriptThread;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use trellis_core::{EnumItem, NameMap};

/// String-keyed map of Variants.
pub type Dictionary = NameMap<Variant>;

/// Ordered sequence of Variants.
pub type Array = Vec<Variant>;

/// Discriminant of a [`Variant`], stable across the script boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VariantKind {
    /// No value.
    Null = 0,
    /// Boolean.
    Bool,
    /// 64-bit integer.
    Int,
    /// Double-precision float.
    Double,
    /// UTF-8 string.
    String,
    /// Script closure reference.
    Function,
    /// String-keyed map.
    Dictionary,
    /// Ordered sequence.
    Array,
    /// Process-wide enumeration item.
    EnumItem,
    /// Reference-counted host object.
    Object,
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Variant {
    /// No value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Script closure reference.
    Function(ScriptFunction),
    /// String-keyed map of Variants.
    Dictionary(Dictionary),
    /// Ordered sequence of Variants.
    Array(Array),
    /// Process-wide enumeration item.
    EnumItem(&'static EnumItem),
    /// Reference-counted host object.
    Object(ObjectHandle),
}

impl Variant {
    /// The active tag.
    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::Null => VariantKind::Null,
            Variant::Bool(_) => VariantKind::Bool,
            Variant::Int(_) => VariantKind::Int,
            Variant::Double(_) => VariantKind::Double,
            Variant::String(_) => VariantKind::String,
            Variant::Function(_) => VariantKind::Function,
            Variant::Dictionary(_) => VariantKind::Dictionary,
            Variant::Array(_) => VariantKind::Array,
            Variant::EnumItem(_) => VariantKind::EnumItem,
            Variant::Object(_) => VariantKind::Object,
        }
    }

    /// Whether the value is non-null.
    pub fn is_some(&self) -> bool {
        !matches!(self, Variant::Null)
    }

    /// Typed extraction. Numeric targets convert between Bool/Int/Double;
    /// everything else requires the exact tag. Returns `None` on mismatch.
    pub fn cast<T: FromVariant>(&self) -> Option<T> {
        T::from_variant(self)
    }

    /// Downcast the Object payload to a concrete host type.
    pub fn cast_obj<T: crate::object::ScriptObject>(&self) -> Option<Arc<T>> {
        match self {
            Variant::Object(obj) => obj.clone().as_any_arc().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Script-visible type name of the active tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Null => "nil",
            Variant::Bool(_) => "boolean",
            Variant::Int(_) => "Int64",
            Variant::Double(_) => "number",
            Variant::String(_) => "string",
            Variant::Function(_) => "function",
            Variant::Dictionary(_) => "Dictionary",
            Variant::Array(_) => "Array",
            Variant::EnumItem(_) => "EnumItem",
            Variant::Object(_) => "Instance",
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => write!(f, "Null"),
            Variant::Bool(v) => write!(f, "Bool({v})"),
            Variant::Int(v) => write!(f, "Int({v})"),
            Variant::Double(v) => write!(f, "Double({v})"),
            Variant::String(v) => write!(f, "String({v:?})"),
            Variant::Function(v) => write!(f, "Function(#{})", v.id()),
            Variant::Dictionary(v) => write!(f, "Dictionary({v:?})"),
            Variant::Array(v) => write!(f, "Array({v:?})"),
            Variant::EnumItem(v) => write!(f, "EnumItem({})", v.full_name()),
            Variant::Object(v) => write!(f, "Object({})", v.class_name()),
        }
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Variant::Null, Variant::Null) => true,
            (Variant::Bool(a), Variant::Bool(b)) => a == b,
            (Variant::Int(a), Variant::Int(b)) => a == b,
            (Variant::Double(a), Variant::Double(b)) => a == b,
            (Variant::String(a), Variant::String(b)) => a == b,
            (Variant::Function(a), Variant::Function(b)) => a == b,
            (Variant::Dictionary(a), Variant::Dictionary(b)) => a == b,
            (Variant::Array(a), Variant::Array(b)) => a == b,
            (Variant::EnumItem(a), Variant::EnumItem(b)) => std::ptr::eq(*a, *b),
            (Variant::Object(a), Variant::Object(b)) => {
                a.instance().object_id() == b.instance().object_id()
            }
            _ => false,
        }
    }
}

// Constructors. Narrow integers widen to Int, f32 widens to Double, and an
// absent object/function handle collapses to Null.

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

macro_rules! variant_from_int {
    ($($t:ty),*) => {$(
        impl From<$t> for Variant {
            fn from(v: $t) -> Self {
                Variant::Int(v as i64)
            }
        }
    )*};
}

variant_from_int!(i8, u8, i16, u16, i32, u32, i64);

impl From<f32> for Variant {
    fn from(v: f32) -> Self {
        Variant::Double(v as f64)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

impl From<ScriptFunction> for Variant {
    fn from(v: ScriptFunction) -> Self {
        Variant::Function(v)
    }
}

impl From<Dictionary> for Variant {
    fn from(v: Dictionary) -> Self {
        Variant::Dictionary(v)
    }
}

impl From<Array> for Variant {
    fn from(v: Array) -> Self {
        Variant::Array(v)
    }
}

impl From<&'static EnumItem> for Variant {
    fn from(v: &'static EnumItem) -> Self {
        Variant::EnumItem(v)
    }
}

impl From<ObjectHandle> for Variant {
    fn from(v: ObjectHandle) -> Self {
        Variant::Object(v)
    }
}

impl<T: crate::object::ScriptObject> From<Arc<T>> for Variant {
    fn from(v: Arc<T>) -> Self {
        Variant::Object(v)
    }
}

impl<T> From<Option<T>> for Variant
where
    T: Into<Variant>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Variant::Null,
        }
    }
}

/// Typed extraction from a [`Variant`]. See [`Variant::cast`].
pub trait FromVariant: Sized {
    /// Extract `Self` from a Variant, or `None` on tag mismatch.
    fn from_variant(v: &Variant) -> Option<Self>;
}

macro_rules! from_variant_numeric {
    ($($t:ty),*) => {$(
        impl FromVariant for $t {
            fn from_variant(v: &Variant) -> Option<Self> {
                match v {
                    Variant::Int(n) => Some(*n as $t),
                    Variant::Double(n) => Some(*n as $t),
                    Variant::Bool(b) => Some(*b as u8 as $t),
                    _ => None,
                }
            }
        }
    )*};
}

from_variant_numeric!(i8, u8, i16, u16, i32, u32, i64, f32, f64);

impl FromVariant for bool {
    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::Bool(b) => Some(*b),
            Variant::Int(n) => Some(*n != 0),
            Variant::Double(n) => Some(*n != 0.0),
            _ => None,
        }
    }
}

impl FromVariant for String {
    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromVariant for ScriptFunction {
    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::Function(f) => Some(f.clone()),
            _ => None,
        }
    }
}

impl FromVariant for Dictionary {
    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::Dictionary(d) => Some(d.clone()),
            _ => None,
        }
    }
}

impl FromVariant for Array {
    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::Array(a) => Some(a.clone()),
            _ => None,
        }
    }
}

impl FromVariant for &'static EnumItem {
    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::EnumItem(e) => Some(*e),
            _ => None,
        }
    }
}

impl FromVariant for ObjectHandle {
    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::Object(o) => Some(o.clone()),
            _ => None,
        }
    }
}

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

/// A reference to a script closure.
///
/// Cloning duplicates the reference, not the closure: a queued deferred event
/// holds its own reference so the original can be dropped without breaking
/// the still-pending call.
#[derive(Clone)]
pub struct ScriptFunction {
    id: u64,
    #[allow(clippy::type_complexity)]
    func: Arc<dyn Fn(&Arc<ScriptThread>, usize) -> Result<usize, ScriptError> + Send + Sync>,
}

impl ScriptFunction {
    /// Wrap a callable. The callable receives the invoking thread and its
    /// argument count; arguments occupy stack slots `1..=nargs` of the
    /// current frame, and the callable returns how many results it pushed.
    pub fn new(
        func: impl Fn(&Arc<ScriptThread>, usize) -> Result<usize, ScriptError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed),
            func: Arc::new(func),
        }
    }

    /// Reference identity, unique per wrapped closure.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Invoke with `nargs` arguments already pushed on `thread`'s stack.
    /// Returns the number of results left on the stack.
    pub fn call(&self, thread: &Arc<ScriptThread>, nargs: usize) -> Result<usize, ScriptError> {
        thread.begin_frame(nargs);
        match (self.func)(thread, nargs) {
            Ok(nresults) => {
                thread.end_frame(nresults);
                Ok(nresults)
            }
            Err(e) => {
                thread.end_frame(0);
                Err(e)
            }
        }
    }
}

impl PartialEq for ScriptFunction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptFunction(#{})", self.id)
    }
}
