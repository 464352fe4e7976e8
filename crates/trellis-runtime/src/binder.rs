//! Class binders: per-type metamethod dispatch
//!
//! A [`ClassBinder`] is the materialized dispatch surface of one scriptable
//! type. It holds the method table, property getter/setter pairs, ordered
//! index/newindex overrides, a tostring hook, and operator overload chains.
//! Resolution order is fixed:
//!
//! - index:    overrides, then properties, then methods, else not-a-member
//! - newindex: overrides, then property setters, else not-a-member
//! - namecall: methods only, else no-such-method
//!
//! All dispatch entry points use the framed stack protocol: `index` expects
//! `[self, key]`, `newindex` expects `[self, key, value]`, `namecall` and
//! plain calls expect `[self, args..]`, operators expect their operands.

use crate::error::ScriptError;
use crate::stack::StackOp;
use crate::thread::ScriptThread;
use crate::variant::ScriptFunction;
use std::sync::Arc;
use trellis_core::NameMap;

/// A bound function operating directly on the caller's frame.
pub type RawFn = Arc<dyn Fn(&Arc<ScriptThread>) -> Result<usize, ScriptError> + Send + Sync>;

/// An index override. Returns `Ok(Some(nresults))` when it handled the key,
/// `Ok(None)` to fall through to normal resolution.
pub type IndexOverride =
    Arc<dyn Fn(&Arc<ScriptThread>, &str) -> Result<Option<usize>, ScriptError> + Send + Sync>;

/// A newindex override. Returns `Ok(true)` when it consumed the write.
pub type NewindexOverride =
    Arc<dyn Fn(&Arc<ScriptThread>, &str) -> Result<bool, ScriptError> + Send + Sync>;

/// Operand type test for operator overload selection.
pub type TypePredicate = fn(&ScriptThread, usize) -> bool;

/// Predicate over a [`StackOp`] type, usable as a [`TypePredicate`].
pub fn is_type<T: StackOp>(t: &ScriptThread, index: usize) -> bool {
    T::is(t, index)
}

/// Binary operators a binder can overload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `a % b`
    Mod,
    /// `a ^ b`
    Pow,
    /// `a == b`
    Eq,
    /// `a < b`
    Lt,
    /// `a <= b`
    Le,
}

impl BinOp {
    /// Operator name used in mismatch errors.
    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::Pow => "pow",
            BinOp::Eq => "eq",
            BinOp::Lt => "lt",
            BinOp::Le => "le",
        }
    }
}

#[derive(Clone, Default)]
struct PropertyBinding {
    getter: Option<RawFn>,
    setter: Option<RawFn>,
}

/// Materialized dispatch surface of one scriptable type.
#[derive(Clone)]
pub struct ClassBinder {
    class: &'static str,
    type_tag: Option<u32>,
    methods: NameMap<RawFn>,
    statics: NameMap<RawFn>,
    properties: NameMap<PropertyBinding>,
    index_overrides: Vec<IndexOverride>,
    newindex_overrides: Vec<NewindexOverride>,
    tostring: Option<RawFn>,
    call_op: Option<RawFn>,
    neg_op: Option<RawFn>,
    binary_ops: Vec<(BinOp, TypePredicate, TypePredicate, RawFn)>,
}

impl ClassBinder {
    /// Empty binder for `class`. The optional `type_tag` embeds a fast
    /// runtime type classification usable without a downcast.
    pub fn new(class: &'static str, type_tag: Option<u32>) -> Self {
        Self {
            class,
            type_tag,
            methods: NameMap::new(),
            statics: NameMap::new(),
            properties: NameMap::new(),
            index_overrides: Vec::new(),
            newindex_overrides: Vec::new(),
            tostring: None,
            call_op: None,
            neg_op: None,
            binary_ops: Vec::new(),
        }
    }

    /// The bound class name.
    pub fn class(&self) -> &'static str {
        self.class
    }

    /// The embedded type classification tag, if any.
    pub fn type_tag(&self) -> Option<u32> {
        self.type_tag
    }

    // ---- construction ----

    pub(crate) fn add_method(&mut self, name: &str, f: RawFn) {
        self.methods.insert(name, f);
    }

    pub(crate) fn add_static(&mut self, name: &str, f: RawFn) {
        self.statics.insert(name, f);
    }

    pub(crate) fn add_property(&mut self, name: &str, getter: Option<RawFn>, setter: Option<RawFn>) {
        self.properties.insert(name, PropertyBinding { getter, setter });
    }

    pub(crate) fn add_index_override(&mut self, f: IndexOverride) {
        self.index_overrides.push(f);
    }

    pub(crate) fn add_newindex_override(&mut self, f: NewindexOverride) {
        self.newindex_overrides.push(f);
    }

    pub(crate) fn set_tostring(&mut self, f: RawFn) {
        self.tostring = Some(f);
    }

    pub(crate) fn set_call(&mut self, f: RawFn) {
        self.call_op = Some(f);
    }

    pub(crate) fn set_neg(&mut self, f: RawFn) {
        self.neg_op = Some(f);
    }

    /// Overloads are tried in registration order; the first whose operand
    /// predicates both match wins.
    pub(crate) fn add_binary(
        &mut self,
        op: BinOp,
        lhs: TypePredicate,
        rhs: TypePredicate,
        f: RawFn,
    ) {
        self.binary_ops.push((op, lhs, rhs, f));
    }

    // ---- dispatch ----

    /// Member read. Frame: `[self, key]`.
    pub fn index(&self, t: &Arc<ScriptThread>) -> Result<usize, ScriptError> {
        let key = String::check(t, 2)?;

        for ov in &self.index_overrides {
            if let Some(nresults) = ov(t, &key)? {
                return Ok(nresults);
            }
        }

        if let Some(prop) = self.properties.get(key.as_str()) {
            let getter = prop.getter.as_ref().ok_or_else(|| ScriptError::WriteOnly {
                name: key.clone(),
                class: self.class.to_string(),
            })?;
            t.remove(2);
            return getter(t);
        }

        if let Some(method) = self.methods.get(key.as_str()) {
            let method = method.clone();
            ScriptFunction::push(t, ScriptFunction::new(move |t, _nargs| method(t)));
            return Ok(1);
        }

        Err(ScriptError::NotAMember {
            name: key,
            class: self.class.to_string(),
        })
    }

    /// Member write. Frame: `[self, key, value]`.
    pub fn newindex(&self, t: &Arc<ScriptThread>) -> Result<(), ScriptError> {
        let key = String::check(t, 2)?;

        for ov in &self.newindex_overrides {
            if ov(t, &key)? {
                return Ok(());
            }
        }

        if let Some(prop) = self.properties.get(key.as_str()) {
            let setter = prop.setter.as_ref().ok_or_else(|| ScriptError::ReadOnly {
                name: key.clone(),
                class: self.class.to_string(),
            })?;
            t.remove(2);
            setter(t)?;
            return Ok(());
        }

        Err(ScriptError::NotAMember {
            name: key,
            class: self.class.to_string(),
        })
    }

    /// Name-based method call. Frame: `[self, args..]`. Only the method
    /// table participates.
    pub fn namecall(&self, t: &Arc<ScriptThread>, name: &str) -> Result<usize, ScriptError> {
        match self.methods.get(name) {
            Some(method) => method(t),
            None => Err(ScriptError::NoSuchMethod {
                name: name.to_string(),
                class: self.class.to_string(),
            }),
        }
    }

    /// Static (namespace-level) function lookup.
    pub fn static_fn(&self, name: &str) -> Option<RawFn> {
        self.statics.get(name).cloned()
    }

    /// Binary operator dispatch. Frame: `[lhs, rhs]`.
    pub fn binary(&self, t: &Arc<ScriptThread>, op: BinOp) -> Result<usize, ScriptError> {
        for (candidate, lhs, rhs, f) in &self.binary_ops {
            if *candidate == op && lhs(t, 1) && rhs(t, 2) {
                return f(t);
            }
        }
        Err(ScriptError::ArithTypeMismatch {
            op: op.name(),
            lhs: t.type_name_at(1),
            rhs: t.type_name_at(2),
        })
    }

    /// Unary negation. Frame: `[operand]`.
    pub fn negate(&self, t: &Arc<ScriptThread>) -> Result<usize, ScriptError> {
        match &self.neg_op {
            Some(f) => f(t),
            None => Err(ScriptError::ArithTypeMismatch {
                op: "unm",
                lhs: t.type_name_at(1),
                rhs: "nil",
            }),
        }
    }

    /// String conversion. Frame: `[self]`. Falls back to the class name.
    pub fn tostring(&self, t: &Arc<ScriptThread>) -> Result<usize, ScriptError> {
        match &self.tostring {
            Some(f) => f(t),
            None => {
                <String as StackOp>::push(t, self.class.to_string());
                Ok(1)
            }
        }
    }

    /// Call of the value itself. Frame: `[self, args..]`.
    pub fn call(&self, t: &Arc<ScriptThread>) -> Result<usize, ScriptError> {
        match &self.call_op {
            Some(f) => f(t),
            None => Err(ScriptError::runtime(format!(
                "attempt to call a {} value",
                self.class
            ))),
        }
    }
}

/// Wrap `f` with a capability check performed on the calling thread.
pub(crate) fn guarded(
    required: crate::capabilities::Capability,
    action: String,
    f: RawFn,
) -> RawFn {
    if required == crate::capabilities::Capability::NONE {
        return f;
    }
    Arc::new(move |t: &Arc<ScriptThread>| {
        t.check_capability(required, &action)?;
        f(t)
    })
}

/// Results a bound function can return, pushed back onto the frame.
pub trait PushResults {
    /// Push the results, returning how many values were pushed.
    fn push_results(self, t: &Arc<ScriptThread>) -> Result<usize, ScriptError>;
}

impl PushResults for () {
    fn push_results(self, _t: &Arc<ScriptThread>) -> Result<usize, ScriptError> {
        Ok(0)
    }
}

impl<T: StackOp> PushResults for T {
    fn push_results(self, t: &Arc<ScriptThread>) -> Result<usize, ScriptError> {
        T::push(t, self);
        Ok(1)
    }
}

impl<A: StackOp, B: StackOp> PushResults for (A, B) {
    fn push_results(self, t: &Arc<ScriptThread>) -> Result<usize, ScriptError> {
        A::push(t, self.0);
        B::push(t, self.1);
        Ok(2)
    }
}

impl<A: StackOp, B: StackOp, C: StackOp> PushResults for (A, B, C) {
    fn push_results(self, t: &Arc<ScriptThread>) -> Result<usize, ScriptError> {
        A::push(t, self.0);
        B::push(t, self.1);
        C::push(t, self.2);
        Ok(3)
    }
}

impl<T: PushResults> PushResults for Result<T, ScriptError> {
    fn push_results(self, t: &Arc<ScriptThread>) -> Result<usize, ScriptError> {
        self?.push_results(t)
    }
}

// Marshaling adapters turning typed closures into RawFns. The receiver is
// argument 1; parameters follow. Arguments are checked strictly, so a typed
// error names the offending position before the closure runs.

/// Bind a nullary method `f(self)`.
pub fn bind_fn0<S, R>(f: impl Fn(S) -> R + Send + Sync + 'static) -> RawFn
where
    S: StackOp,
    R: PushResults + 'static,
{
    Arc::new(move |t: &Arc<ScriptThread>| {
        let this = S::check(t, 1)?;
        f(this).push_results(t)
    })
}

/// Bind a unary method `f(self, a)`.
pub fn bind_fn1<S, A, R>(f: impl Fn(S, A) -> R + Send + Sync + 'static) -> RawFn
where
    S: StackOp,
    A: StackOp,
    R: PushResults + 'static,
{
    Arc::new(move |t: &Arc<ScriptThread>| {
        let this = S::check(t, 1)?;
        let a = A::check(t, 2)?;
        f(this, a).push_results(t)
    })
}

/// Bind a binary method `f(self, a, b)`.
pub fn bind_fn2<S, A, B, R>(f: impl Fn(S, A, B) -> R + Send + Sync + 'static) -> RawFn
where
    S: StackOp,
    A: StackOp,
    B: StackOp,
    R: PushResults + 'static,
{
    Arc::new(move |t: &Arc<ScriptThread>| {
        let this = S::check(t, 1)?;
        let a = A::check(t, 2)?;
        let b = B::check(t, 3)?;
        f(this, a, b).push_results(t)
    })
}

/// Bind a ternary method `f(self, a, b, c)`.
pub fn bind_fn3<S, A, B, C, R>(f: impl Fn(S, A, B, C) -> R + Send + Sync + 'static) -> RawFn
where
    S: StackOp,
    A: StackOp,
    B: StackOp,
    C: StackOp,
    R: PushResults + 'static,
{
    Arc::new(move |t: &Arc<ScriptThread>| {
        let this = S::check(t, 1)?;
        let a = A::check(t, 2)?;
        let b = B::check(t, 3)?;
        let c = C::check(t, 4)?;
        f(this, a, b, c).push_results(t)
    })
}

/// Bind a receiverless function `f()`.
pub fn bind_static0<R>(f: impl Fn() -> R + Send + Sync + 'static) -> RawFn
where
    R: PushResults + 'static,
{
    Arc::new(move |t: &Arc<ScriptThread>| f().push_results(t))
}

/// Bind a receiverless function `f(a)`.
pub fn bind_static1<A, R>(f: impl Fn(A) -> R + Send + Sync + 'static) -> RawFn
where
    A: StackOp,
    R: PushResults + 'static,
{
    Arc::new(move |t: &Arc<ScriptThread>| {
        let a = A::check(t, 1)?;
        f(a).push_results(t)
    })
}

/// Bind a receiverless function `f(a, b, c)`.
pub fn bind_static3<A, B, C, R>(f: impl Fn(A, B, C) -> R + Send + Sync + 'static) -> RawFn
where
    A: StackOp,
    B: StackOp,
    C: StackOp,
    R: PushResults + 'static,
{
    Arc::new(move |t: &Arc<ScriptThread>| {
        let a = A::check(t, 1)?;
        let b = B::check(t, 2)?;
        let c = C::check(t, 3)?;
        f(a, b, c).push_results(t)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classdb::ClassDb;
    use crate::runtime::ScriptRuntime;
    use crate::value::ScriptValue;
    use trellis_core::Vector3;

    fn test_thread() -> Arc<ScriptThread> {
        ScriptRuntime::new(Arc::new(ClassDb::new()))
            .main_thread()
            .clone()
    }

    fn vector_binder() -> ClassBinder {
        let mut b = ClassBinder::new("Vector3", None);
        b.add_method("Dot", bind_fn1(|a: Vector3, b: Vector3| a.dot(&b)));
        b.add_property(
            "Magnitude",
            Some(bind_fn0(|v: Vector3| v.magnitude())),
            None,
        );
        b.add_binary(
            BinOp::Add,
            is_type::<Vector3>,
            is_type::<Vector3>,
            bind_fn1(|a: Vector3, b: Vector3| a + b),
        );
        b.add_binary(
            BinOp::Mul,
            is_type::<Vector3>,
            is_type::<f64>,
            bind_fn1(|a: Vector3, s: f64| a * s),
        );
        b
    }

    #[test]
    fn test_namecall_dispatch() {
        let t = test_thread();
        let b = vector_binder();
        Vector3::push(&t, Vector3::new(1.0, 0.0, 0.0));
        Vector3::push(&t, Vector3::new(2.0, 5.0, 0.0));
        t.begin_frame(2);
        let n = b.namecall(&t, "Dot").unwrap();
        t.end_frame(n);
        assert_eq!(f64::get(&t, 1), 2.0);
    }

    #[test]
    fn test_namecall_unknown_method() {
        let t = test_thread();
        let b = vector_binder();
        Vector3::push(&t, Vector3::ZERO);
        t.begin_frame(1);
        let err = b.namecall(&t, "Cross").unwrap_err();
        t.end_frame(0);
        assert_eq!(
            err,
            ScriptError::NoSuchMethod {
                name: "Cross".into(),
                class: "Vector3".into(),
            }
        );
    }

    #[test]
    fn test_index_property_then_method_then_error() {
        let t = test_thread();
        let b = vector_binder();

        Vector3::push(&t, Vector3::new(3.0, 4.0, 0.0));
        <String as StackOp>::push(&t, "Magnitude".into());
        t.begin_frame(2);
        let n = b.index(&t).unwrap();
        t.end_frame(n);
        assert_eq!(f64::get(&t, 1), 5.0);
        t.pop();

        Vector3::push(&t, Vector3::ZERO);
        <String as StackOp>::push(&t, "Dot".into());
        t.begin_frame(2);
        let n = b.index(&t).unwrap();
        t.end_frame(n);
        assert!(matches!(t.arg(1), ScriptValue::Function(_)));
        t.pop();

        Vector3::push(&t, Vector3::ZERO);
        <String as StackOp>::push(&t, "Bogus".into());
        t.begin_frame(2);
        let err = b.index(&t).unwrap_err();
        t.end_frame(0);
        assert_eq!(
            err,
            ScriptError::NotAMember {
                name: "Bogus".into(),
                class: "Vector3".into(),
            }
        );
    }

    #[test]
    fn test_tostring_falls_back_to_class_name() {
        let t = test_thread();
        let b = vector_binder();
        Vector3::push(&t, Vector3::ZERO);
        t.begin_frame(1);
        let n = b.tostring(&t).unwrap();
        t.end_frame(n);
        assert_eq!(String::get(&t, 1), "Vector3");
    }

    #[test]
    fn test_readonly_property_write() {
        let t = test_thread();
        let b = vector_binder();
        Vector3::push(&t, Vector3::ZERO);
        <String as StackOp>::push(&t, "Magnitude".into());
        f64::push(&t, 9.0);
        t.begin_frame(3);
        let err = b.newindex(&t).unwrap_err();
        t.end_frame(0);
        assert_eq!(
            err,
            ScriptError::ReadOnly {
                name: "Magnitude".into(),
                class: "Vector3".into(),
            }
        );
    }

    #[test]
    fn test_operator_overload_order_and_mismatch() {
        let t = test_thread();
        let b = vector_binder();

        Vector3::push(&t, Vector3::new(1.0, 2.0, 3.0));
        f64::push(&t, 2.0);
        t.begin_frame(2);
        let n = b.binary(&t, BinOp::Mul).unwrap();
        t.end_frame(n);
        assert_eq!(Vector3::get(&t, 1), Vector3::new(2.0, 4.0, 6.0));
        t.pop();

        Vector3::push(&t, Vector3::ZERO);
        <String as StackOp>::push(&t, "x".into());
        t.begin_frame(2);
        let err = b.binary(&t, BinOp::Add).unwrap_err();
        t.end_frame(0);
        assert_eq!(
            err,
            ScriptError::ArithTypeMismatch {
                op: "add",
                lhs: "Vector3",
                rhs: "string",
            }
        );
    }

    #[test]
    fn test_capability_guard() {
        let t = test_thread();
        let restricted = t.new_child(crate::capabilities::Identity::GameScript);
        let f = guarded(
            crate::capabilities::Capability::ENGINE_SCRIPT,
            "call 'Reset'".into(),
            bind_static0(|| 1.0f64),
        );
        restricted.begin_frame(0);
        let err = f(&restricted).unwrap_err();
        restricted.end_frame(0);
        assert!(matches!(err, ScriptError::CapabilityViolation { .. }));

        t.begin_frame(0);
        assert_eq!(f(&t).unwrap(), 1);
        t.end_frame(1);
    }
}
