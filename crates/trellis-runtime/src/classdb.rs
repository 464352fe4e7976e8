//! Class reflection database
//!
//! The [`ClassDb`] records every scriptable class: its place in the
//! single-inheritance hierarchy, its member descriptors (functions,
//! properties, signals, callbacks), its constructor, and the
//! [`ClassBinder`] that dispatches script access to it. The database is
//! built once at startup, shared immutably by runtimes, and materialized
//! into a runtime's dispatch table by [`ClassDb::register`].
//!
//! Member sets are flattened: binding a class replays its ancestors'
//! members into the class's own tables, so lookup never walks the chain.
//! Only `is_a` does.

use crate::binder::{
    bind_fn0, bind_fn1, bind_fn2, bind_static0, bind_static1, bind_static3, guarded, is_type, BinOp,
    ClassBinder, RawFn,
};
use crate::capabilities::Capability;
use crate::error::ScriptError;
use crate::object::{ObjectHandle, ScriptClass, ScriptObject};
use crate::runtime::GlobalState;
use crate::signals::SignalRef;
use crate::stack::StackOp;
use crate::thread::ScriptThread;
use crate::value::{ScriptValue, Userdata};
use crate::variant::{FromVariant, ScriptFunction, Variant, VariantKind};
use serde_json::json;
use std::sync::Arc;
use trellis_core::{Color3, EnumItem, NameMap, Vector3};

/// Memory accounting category of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCategory {
    /// Ordinary tree instances.
    Instances,
    /// Script containers.
    Script,
    /// UI objects.
    Gui,
    /// Engine-internal objects.
    Internal,
    /// Texture-backed objects.
    GraphicsTexture,
    /// Animation objects.
    Animation,
}

/// Class-level reflection tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassTag {
    /// Superseded; kept for compatibility.
    Deprecated,
    /// No script-reachable constructor.
    NotCreatable,
    /// Hidden from catalog UIs.
    NotBrowsable,
    /// Excluded from replication.
    NotReplicated,
    /// Singleton service.
    Service,
    /// Replicated to the owning player only.
    PlayerReplicated,
}

/// Member-level reflection tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberTag {
    /// Superseded; kept for compatibility.
    Deprecated,
    /// Excluded from replication.
    NotReplicated,
    /// Hidden from catalog UIs.
    Hidden,
    /// Hidden from browsers but still scriptable.
    NotBrowsable,
    /// Always yields the calling thread.
    Yields,
    /// Never yields.
    NoYield,
    /// May yield.
    CanYield,
    /// No script-visible setter.
    ReadOnly,
    /// Dispatch bypasses the generated marshaling.
    CustomState,
    /// Reflection-only; invisible to scripts.
    NotScriptable,
}

/// Thread-safety classification of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSafety {
    /// Main-thread only.
    Unsafe,
    /// Parallel reads allowed.
    ReadSafe,
    /// Fully parallel-safe.
    Safe,
}

/// A named, typed parameter in a member descriptor.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Script-visible type name.
    pub type_name: String,
}

/// Descriptor of a bound function.
#[derive(Debug, Clone)]
pub struct FunctionDesc {
    /// Member name.
    pub name: String,
    /// Declared parameters, receiver excluded.
    pub parameters: Vec<Parameter>,
    /// Declared return types.
    pub returns: Vec<String>,
    /// Member tags.
    pub tags: Vec<MemberTag>,
    /// Capability required to call.
    pub security: Capability,
    /// Thread-safety classification.
    pub safety: ThreadSafety,
}

impl FunctionDesc {
    /// Start a descriptor for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            returns: Vec::new(),
            tags: Vec::new(),
            security: Capability::NONE,
            safety: ThreadSafety::Unsafe,
        }
    }

    /// Append a parameter.
    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            type_name: type_name.into(),
        });
        self
    }

    /// Append a return type.
    pub fn returns(mut self, type_name: impl Into<String>) -> Self {
        self.returns.push(type_name.into());
        self
    }

    /// Require a capability.
    pub fn security(mut self, cap: Capability) -> Self {
        self.security = cap;
        self
    }

    /// Set the thread-safety classification.
    pub fn safety(mut self, safety: ThreadSafety) -> Self {
        self.safety = safety;
        self
    }

    /// Append a member tag.
    pub fn tag(mut self, tag: MemberTag) -> Self {
        self.tags.push(tag);
        self
    }
}

/// Descriptor of a bound property.
#[derive(Debug, Clone)]
pub struct PropertyDesc {
    /// Member name.
    pub name: String,
    /// Catalog category, e.g. `Data`.
    pub category: String,
    /// Script-visible value type name.
    pub type_name: String,
    /// Member tags.
    pub tags: Vec<MemberTag>,
    /// Capability required to read.
    pub read_security: Capability,
    /// Capability required to write.
    pub write_security: Capability,
    /// Thread-safety classification.
    pub safety: ThreadSafety,
    /// Whether serialization may load it.
    pub can_load: bool,
    /// Whether serialization may save it.
    pub can_save: bool,
}

impl PropertyDesc {
    /// Start a descriptor for `name` of type `type_name`.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: "Data".to_string(),
            type_name: type_name.into(),
            tags: Vec::new(),
            read_security: Capability::NONE,
            write_security: Capability::NONE,
            safety: ThreadSafety::Unsafe,
            can_load: true,
            can_save: true,
        }
    }

    /// Set the catalog category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Require a capability for both read and write.
    pub fn security(mut self, cap: Capability) -> Self {
        self.read_security = cap;
        self.write_security = cap;
        self
    }

    /// Require a capability for writes only.
    pub fn write_security(mut self, cap: Capability) -> Self {
        self.write_security = cap;
        self
    }

    /// Set the thread-safety classification.
    pub fn safety(mut self, safety: ThreadSafety) -> Self {
        self.safety = safety;
        self
    }

    /// Exclude from serialization entirely.
    pub fn transient(mut self) -> Self {
        self.can_load = false;
        self.can_save = false;
        self
    }

    /// Append a member tag.
    pub fn tag(mut self, tag: MemberTag) -> Self {
        self.tags.push(tag);
        self
    }
}

/// Descriptor of a declared signal.
#[derive(Debug, Clone)]
pub struct SignalDesc {
    /// Signal name.
    pub name: String,
    /// Declared handler parameters.
    pub parameters: Vec<Parameter>,
    /// Member tags.
    pub tags: Vec<MemberTag>,
    /// Capability required to connect or wait.
    pub security: Capability,
    /// Auto-registered signals (property change notifications) are
    /// unlisted: connectable, but absent from the reflection dump.
    pub unlisted: bool,
}

impl SignalDesc {
    /// Start a descriptor for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            tags: Vec::new(),
            security: Capability::NONE,
            unlisted: false,
        }
    }

    /// Append a handler parameter.
    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            type_name: type_name.into(),
        });
        self
    }

    /// Require a capability.
    pub fn security(mut self, cap: Capability) -> Self {
        self.security = cap;
        self
    }

    /// Hide from the reflection dump.
    pub fn unlisted(mut self) -> Self {
        self.unlisted = true;
        self
    }
}

/// Descriptor of an assignable callback member.
#[derive(Debug, Clone)]
pub struct CallbackDesc {
    /// Member name.
    pub name: String,
    /// Declared callback parameters.
    pub parameters: Vec<Parameter>,
    /// Declared callback return types.
    pub returns: Vec<String>,
    /// Capability required to assign.
    pub security: Capability,
}

impl CallbackDesc {
    /// Start a descriptor for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            returns: Vec::new(),
            security: Capability::NONE,
        }
    }

    /// Append a callback parameter.
    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            type_name: type_name.into(),
        });
        self
    }

    /// Require a capability.
    pub fn security(mut self, cap: Capability) -> Self {
        self.security = cap;
        self
    }
}

/// Type-erased reflection property getter.
pub type ReflectionGetter = Arc<dyn Fn(&dyn ScriptObject) -> Variant + Send + Sync>;
/// Type-erased reflection property setter. Returns false on a type or
/// downcast mismatch.
pub type ReflectionSetter = Arc<dyn Fn(&dyn ScriptObject, &Variant) -> bool + Send + Sync>;
/// Stores an assigned callback on the object.
pub type CallbackSetter = Arc<dyn Fn(&dyn ScriptObject, ScriptFunction) + Send + Sync>;

/// A declared property with its reflection accessors.
#[derive(Clone)]
pub struct PropertyInfo {
    /// The descriptor.
    pub desc: PropertyDesc,
    pub(crate) getter: Option<ReflectionGetter>,
    pub(crate) setter: Option<ReflectionSetter>,
}

/// A declared callback with its storage hook.
#[derive(Clone)]
pub struct CallbackInfo {
    /// The descriptor.
    pub desc: CallbackDesc,
    pub(crate) set: CallbackSetter,
}

/// One class's reflection record.
pub struct ClassInfo {
    /// Class name.
    pub name: &'static str,
    /// Parent class name; `Instance` is the hierarchy root.
    pub parent: &'static str,
    /// Memory accounting category.
    pub category: MemoryCategory,
    /// Class tags.
    pub tags: &'static [ClassTag],
    /// Bound functions, flattened across ancestors.
    pub functions: NameMap<FunctionDesc>,
    /// Bound properties, flattened across ancestors.
    pub properties: NameMap<PropertyInfo>,
    /// Declared signals, flattened across ancestors.
    pub signals: NameMap<SignalDesc>,
    /// Declared callbacks, flattened across ancestors.
    pub callbacks: NameMap<CallbackInfo>,
}

impl ClassInfo {
    fn new<T: ScriptClass>() -> Self {
        Self {
            name: T::CLASS_NAME,
            parent: T::PARENT_NAME,
            category: T::CATEGORY,
            tags: T::TAGS,
            functions: NameMap::new(),
            properties: NameMap::new(),
            signals: NameMap::new(),
            callbacks: NameMap::new(),
        }
    }

    /// Whether the class carries `tag`.
    pub fn has_tag(&self, tag: ClassTag) -> bool {
        self.tags.contains(&tag)
    }
}

type Constructor = fn() -> Option<ObjectHandle>;

/// The class reflection database.
pub struct ClassDb {
    classes: NameMap<ClassInfo>,
    constructors: NameMap<Constructor>,
    binders: NameMap<ClassBinder>,
}

impl ClassDb {
    /// Database preloaded with the built-in value classes (`Int64`,
    /// `Vector3`, `Color3`, `EnumItem`, `ScriptSignal`, `ScriptConnection`).
    pub fn new() -> Self {
        let mut db = Self {
            classes: NameMap::new(),
            constructors: NameMap::new(),
            binders: NameMap::new(),
        };
        db.register_builtins();
        db
    }

    /// Whether `name` has a reflection record.
    pub fn contains_class(&self, name: &str) -> bool {
        self.classes.contains(name)
    }

    /// The reflection record for `name`.
    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    /// Registered class names, in no particular order.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys()
    }

    /// Whether `class` is `ancestor` or descends from it. A name that is
    /// not registered is nobody's ancestor, itself included.
    pub fn is_a(&self, class: &str, ancestor: &str) -> bool {
        if !self.classes.contains(ancestor) {
            return false;
        }
        let mut current = class;
        loop {
            if current == ancestor {
                return true;
            }
            match self.classes.get(current) {
                Some(info) if info.parent != current && !info.parent.is_empty() => {
                    current = info.parent;
                }
                _ => return false,
            }
        }
    }

    /// Construct a fresh unparented object of `class`, if creatable.
    pub fn new_instance(&self, class: &str) -> Option<ObjectHandle> {
        if self.class(class)?.has_tag(ClassTag::NotCreatable) {
            return None;
        }
        self.constructors.get(class).and_then(|ctor| ctor())
    }

    /// A declared signal of `class`, including unlisted ones.
    pub fn signal(&self, class: &str, name: &str) -> Option<&SignalDesc> {
        self.classes.get(class)?.signals.get(name)
    }

    /// A declared callback of `class`.
    pub fn callback(&self, class: &str, name: &str) -> Option<&CallbackInfo> {
        self.classes.get(class)?.callbacks.get(name)
    }

    /// Generic property read through reflection.
    pub fn get_property(&self, obj: &dyn ScriptObject, name: &str) -> Option<Variant> {
        let info = self.classes.get(obj.class_name())?;
        let getter = info.properties.get(name)?.getter.as_ref()?;
        Some(getter(obj))
    }

    /// Generic property write through reflection. Returns false when the
    /// property is unknown, read-only, or the value's type does not fit.
    pub fn set_property(&self, obj: &dyn ScriptObject, name: &str, value: &Variant) -> bool {
        let Some(info) = self.classes.get(obj.class_name()) else {
            return false;
        };
        let Some(setter) = info.properties.get(name).and_then(|p| p.setter.as_ref()) else {
            return false;
        };
        setter(obj, value)
    }

    /// Record `T` and install its object binder. Members are bound
    /// separately through [`ClassDb::registration`].
    pub fn add_class<T: ScriptClass>(&mut self) {
        let class = T::CLASS_NAME;
        self.classes.insert(class, ClassInfo::new::<T>());
        self.constructors.insert(class, T::construct as Constructor);

        let mut binder = ClassBinder::new(class, Some(VariantKind::Object as u32));

        // Signals resolve ahead of properties and methods; a read of a
        // declared signal yields a connectable handle. Callback members
        // reject reads outright.
        binder.add_index_override(Arc::new(move |t, name| {
            let db = t.classdb().clone();
            if let Some(sig) = db.signal(class, name) {
                let security = sig.security;
                let this = ObjectHandle::check(t, 1)?;
                let sref = SignalRef {
                    emitter: Arc::downgrade(this.instance().emitter()),
                    signal: name.to_string(),
                    security,
                };
                t.push(ScriptValue::Userdata(Userdata::new("ScriptSignal", sref)));
                return Ok(Some(1));
            }
            if db.callback(class, name).is_some() {
                return Err(ScriptError::CallbackWriteOnly {
                    name: name.to_string(),
                    class: class.to_string(),
                });
            }
            Ok(None)
        }));

        binder.add_newindex_override(Arc::new(move |t, name| {
            let db = t.classdb().clone();
            let Some(cb) = db.callback(class, name) else {
                return Ok(false);
            };
            t.check_capability(cb.desc.security, &format!("set callback '{name}'"))?;
            let this = ObjectHandle::check(t, 1)?;
            let func = ScriptFunction::check(t, 3)?;
            (cb.set)(this.as_ref(), func);
            Ok(true)
        }));

        self.binders.insert(class, binder);
    }

    /// Open the member-binding surface of `class`.
    ///
    /// Panics if `class` was not added first; class declaration macros
    /// uphold that ordering.
    pub fn registration(&mut self, class: &'static str) -> ClassRegistration<'_> {
        let info = self
            .classes
            .get_mut(class)
            .expect("add_class must precede registration");
        let binder = self
            .binders
            .get_mut(class)
            .expect("add_class must precede registration");
        ClassRegistration {
            class,
            info,
            binder,
        }
    }

    /// Materialize every binder into `global`'s dispatch table. Classes
    /// already materialized are skipped, making repeat registration a
    /// no-op.
    pub fn register(&self, global: &GlobalState) {
        let mut installed = 0usize;
        for (name, binder) in self.binders.iter() {
            if global.install_binder(name, Arc::new(binder.clone())) {
                installed += 1;
            }
        }
        tracing::debug!(classes = installed, "class binders materialized");
    }

    /// Serialize the reflection catalog. Unlisted signals are omitted.
    pub fn dump(&self) -> serde_json::Value {
        let mut classes = Vec::new();
        for (_, info) in self.classes.iter() {
            let functions: Vec<_> = info
                .functions
                .values()
                .map(|f| {
                    json!({
                        "Name": f.name,
                        "Parameters": f.parameters.iter().map(|p| json!({
                            "Name": p.name, "Type": p.type_name,
                        })).collect::<Vec<_>>(),
                        "Returns": f.returns,
                        "Tags": f.tags.iter().map(|t| format!("{t:?}")).collect::<Vec<_>>(),
                        "Security": f.security.0,
                        "ThreadSafety": format!("{:?}", f.safety),
                    })
                })
                .collect();
            let properties: Vec<_> = info
                .properties
                .values()
                .map(|p| {
                    json!({
                        "Name": p.desc.name,
                        "Category": p.desc.category,
                        "ValueType": p.desc.type_name,
                        "Tags": p.desc.tags.iter().map(|t| format!("{t:?}")).collect::<Vec<_>>(),
                        "Security": {
                            "Read": p.desc.read_security.0,
                            "Write": p.desc.write_security.0,
                        },
                        "ThreadSafety": format!("{:?}", p.desc.safety),
                        "Serialization": {
                            "CanLoad": p.desc.can_load,
                            "CanSave": p.desc.can_save,
                        },
                    })
                })
                .collect();
            let signals: Vec<_> = info
                .signals
                .values()
                .filter(|s| !s.unlisted)
                .map(|s| {
                    json!({
                        "Name": s.name,
                        "Parameters": s.parameters.iter().map(|p| json!({
                            "Name": p.name, "Type": p.type_name,
                        })).collect::<Vec<_>>(),
                        "Security": s.security.0,
                    })
                })
                .collect();
            let callbacks: Vec<_> = info
                .callbacks
                .values()
                .map(|c| {
                    json!({
                        "Name": c.desc.name,
                        "Parameters": c.desc.parameters.iter().map(|p| json!({
                            "Name": p.name, "Type": p.type_name,
                        })).collect::<Vec<_>>(),
                        "Returns": c.desc.returns,
                        "Security": c.desc.security.0,
                    })
                })
                .collect();
            classes.push(json!({
                "Name": info.name,
                "Superclass": info.parent,
                "MemoryCategory": format!("{:?}", info.category),
                "Tags": info.tags.iter().map(|t| format!("{t:?}")).collect::<Vec<_>>(),
                "Functions": functions,
                "Properties": properties,
                "Signals": signals,
                "Callbacks": callbacks,
            }));
        }
        json!({ "Classes": classes })
    }

    // ---- built-in value classes ----

    fn register_builtins(&mut self) {
        self.binders.insert("Int64", int64_binder());
        self.binders.insert("Vector3", vector3_binder());
        self.binders.insert("Color3", color3_binder());
        self.binders.insert("EnumItem", enum_item_binder());
        self.binders.insert("ScriptSignal", script_signal_binder());
        self.binders
            .insert("ScriptConnection", script_connection_binder());
    }
}

impl Default for ClassDb {
    fn default() -> Self {
        Self::new()
    }
}

/// Member-binding surface of one class, writing the descriptor table and
/// the dispatch binder in lockstep.
pub struct ClassRegistration<'a> {
    class: &'static str,
    info: &'a mut ClassInfo,
    binder: &'a mut ClassBinder,
}

impl ClassRegistration<'_> {
    /// The class being bound.
    pub fn class(&self) -> &'static str {
        self.class
    }

    /// Bind a method from a pre-marshaled [`RawFn`] (see the `bind_fn*`
    /// helpers in [`crate::binder`]).
    pub fn method(&mut self, desc: FunctionDesc, f: RawFn) {
        let action = format!("call '{}'", desc.name);
        self.binder
            .add_method(&desc.name, guarded(desc.security, action, f));
        self.info.functions.insert(desc.name.clone(), desc);
    }

    /// Bind a namespace-level function.
    pub fn static_method(&mut self, desc: FunctionDesc, f: RawFn) {
        let action = format!("call '{}'", desc.name);
        self.binder
            .add_static(&desc.name, guarded(desc.security, action, f));
        self.info.functions.insert(desc.name.clone(), desc);
    }

    /// Declare a signal.
    pub fn signal(&mut self, desc: SignalDesc) {
        self.info.signals.insert(desc.name.clone(), desc);
    }

    /// Declare an assignable callback member.
    pub fn callback(&mut self, desc: CallbackDesc, set: CallbackSetter) {
        self.info
            .callbacks
            .insert(desc.name.clone(), CallbackInfo { desc, set });
    }

    /// Bind a read-write property. A `<Name>Changed` signal is registered
    /// automatically unless one was declared explicitly.
    pub fn property_rw<D, V, G, S>(&mut self, desc: PropertyDesc, getter: G, setter: S)
    where
        D: ScriptClass + Default,
        V: StackOp + Into<Variant> + FromVariant + Clone + Send + Sync + 'static,
        G: Fn(&D) -> V + Send + Sync + 'static,
        S: Fn(&D, V) + Send + Sync + 'static,
    {
        self.property_inner::<D, V, G, S>(desc, Some(getter), Some(setter));
    }

    /// Bind a read-only property.
    pub fn property_ro<D, V, G>(&mut self, desc: PropertyDesc, getter: G)
    where
        D: ScriptClass + Default,
        V: StackOp + Into<Variant> + FromVariant + Clone + Send + Sync + 'static,
        G: Fn(&D) -> V + Send + Sync + 'static,
    {
        let desc = desc.tag(MemberTag::ReadOnly);
        self.property_inner::<D, V, G, fn(&D, V)>(desc, Some(getter), None);
    }

    /// Bind a write-only property.
    pub fn property_wo<D, V, S>(&mut self, desc: PropertyDesc, setter: S)
    where
        D: ScriptClass + Default,
        V: StackOp + Into<Variant> + FromVariant + Clone + Send + Sync + 'static,
        S: Fn(&D, V) + Send + Sync + 'static,
    {
        self.property_inner::<D, V, fn(&D) -> V, S>(desc, None, Some(setter));
    }

    /// Record a property descriptor whose dispatch is handled by
    /// index/newindex overrides instead of generated accessors.
    pub fn property_meta(&mut self, desc: PropertyDesc) {
        self.ensure_changed_signal(&desc.name);
        self.info.properties.insert(
            desc.name.clone(),
            PropertyInfo {
                desc,
                getter: None,
                setter: None,
            },
        );
    }

    fn ensure_changed_signal(&mut self, property: &str) {
        let changed = format!("{property}Changed");
        if !self.info.signals.contains(changed.as_str()) {
            self.info
                .signals
                .insert(changed.clone(), SignalDesc::new(changed).unlisted());
        }
    }

    fn property_inner<D, V, G, S>(&mut self, desc: PropertyDesc, getter: Option<G>, setter: Option<S>)
    where
        D: ScriptClass + Default,
        V: StackOp + Into<Variant> + FromVariant + Clone + Send + Sync + 'static,
        G: Fn(&D) -> V + Send + Sync + 'static,
        S: Fn(&D, V) + Send + Sync + 'static,
    {
        self.ensure_changed_signal(&desc.name);
        let scriptable = !desc.tags.contains(&MemberTag::NotScriptable);

        let getter = getter.map(Arc::new);
        let setter = setter.map(Arc::new);

        let reflection_getter: Option<ReflectionGetter> = getter.clone().map(|g| {
            Arc::new(move |obj: &dyn ScriptObject| -> Variant {
                match obj.as_any().downcast_ref::<D>() {
                    Some(this) => g(this).into(),
                    None => Variant::Null,
                }
            }) as ReflectionGetter
        });
        let reflection_setter: Option<ReflectionSetter> = setter.clone().map(|s| {
            Arc::new(move |obj: &dyn ScriptObject, value: &Variant| -> bool {
                match (obj.as_any().downcast_ref::<D>(), value.cast::<V>()) {
                    (Some(this), Some(value)) => {
                        s(this, value);
                        true
                    }
                    _ => false,
                }
            }) as ReflectionSetter
        });

        if scriptable {
            let script_getter: Option<RawFn> = getter.map(|g| {
                let action = format!("read property '{}'", desc.name);
                let raw: RawFn = Arc::new(move |t: &Arc<ScriptThread>| {
                    let this = Arc::<D>::check(t, 1)?;
                    V::push(t, g(&this));
                    Ok(1)
                });
                guarded(desc.read_security, action, raw)
            });
            let script_setter: Option<RawFn> = setter.map(|s| {
                let action = format!("write property '{}'", desc.name);
                let raw: RawFn = Arc::new(move |t: &Arc<ScriptThread>| {
                    let this = Arc::<D>::check(t, 1)?;
                    let value = V::check(t, 2)?;
                    s(&this, value);
                    Ok(0)
                });
                guarded(desc.write_security, action, raw)
            });
            self.binder
                .add_property(&desc.name, script_getter, script_setter);
        }

        self.info.properties.insert(
            desc.name.clone(),
            PropertyInfo {
                desc,
                getter: reflection_getter,
                setter: reflection_setter,
            },
        );
    }

    /// Install an index override, tried before property and method lookup.
    pub fn index_override(&mut self, f: crate::binder::IndexOverride) {
        self.binder.add_index_override(f);
    }

    /// Install a newindex override, tried before property setters.
    pub fn newindex_override(&mut self, f: crate::binder::NewindexOverride) {
        self.binder.add_newindex_override(f);
    }

    /// Install a tostring hook.
    pub fn tostring(&mut self, f: RawFn) {
        self.binder.set_tostring(f);
    }
}

fn userdata_check<T: Clone + 'static>(
    t: &Arc<ScriptThread>,
    index: usize,
    expected: &'static str,
) -> Result<T, ScriptError> {
    match t.arg(index) {
        ScriptValue::Userdata(u) => u.downcast_ref::<T>().cloned().ok_or(ScriptError::TypeMismatch {
            index,
            expected,
            got: u.class,
        }),
        other => Err(ScriptError::TypeMismatch {
            index,
            expected,
            got: other.type_name(),
        }),
    }
}

fn is_number(t: &ScriptThread, index: usize) -> bool {
    f64::is(t, index)
}

fn int64_binder() -> ClassBinder {
    let mut b = ClassBinder::new("Int64", Some(VariantKind::Int as u32));
    // Integer pairs stay exact; division and exponentiation go through
    // doubles like plain numbers do.
    b.add_binary(
        BinOp::Add,
        is_number,
        is_number,
        bind_fn1(|a: i64, b: i64| a.wrapping_add(b)),
    );
    b.add_binary(
        BinOp::Sub,
        is_number,
        is_number,
        bind_fn1(|a: i64, b: i64| a.wrapping_sub(b)),
    );
    b.add_binary(
        BinOp::Mul,
        is_number,
        is_number,
        bind_fn1(|a: i64, b: i64| a.wrapping_mul(b)),
    );
    b.add_binary(
        BinOp::Div,
        is_number,
        is_number,
        bind_fn1(|a: f64, b: f64| a / b),
    );
    b.add_binary(
        BinOp::Mod,
        is_number,
        is_number,
        bind_fn1(|a: i64, b: i64| if b == 0 { 0 } else { a.wrapping_rem(b) }),
    );
    b.add_binary(
        BinOp::Pow,
        is_number,
        is_number,
        bind_fn1(|a: f64, b: f64| a.powf(b)),
    );
    b.add_binary(
        BinOp::Eq,
        is_number,
        is_number,
        bind_fn1(|a: i64, b: i64| a == b),
    );
    b.add_binary(
        BinOp::Lt,
        is_number,
        is_number,
        bind_fn1(|a: i64, b: i64| a < b),
    );
    b.add_binary(
        BinOp::Le,
        is_number,
        is_number,
        bind_fn1(|a: i64, b: i64| a <= b),
    );
    b.set_neg(bind_fn0(|v: i64| v.wrapping_neg()));
    b.set_tostring(bind_fn0(|v: i64| v.to_string()));
    b
}

fn vector3_binder() -> ClassBinder {
    let mut b = ClassBinder::new("Vector3", None);

    b.add_property("X", Some(bind_fn0(|v: Vector3| v.x)), None);
    b.add_property("Y", Some(bind_fn0(|v: Vector3| v.y)), None);
    b.add_property("Z", Some(bind_fn0(|v: Vector3| v.z)), None);
    b.add_property("Magnitude", Some(bind_fn0(|v: Vector3| v.magnitude())), None);
    b.add_property("Unit", Some(bind_fn0(|v: Vector3| v.unit())), None);

    b.add_method("Dot", bind_fn1(|a: Vector3, b: Vector3| a.dot(&b)));
    b.add_method("Cross", bind_fn1(|a: Vector3, b: Vector3| a.cross(&b)));
    b.add_method(
        "Lerp",
        bind_fn2(|a: Vector3, b: Vector3, alpha: f64| a.lerp(&b, alpha)),
    );
    b.add_method("Max", bind_fn1(|a: Vector3, b: Vector3| a.max(&b)));
    b.add_method("Min", bind_fn1(|a: Vector3, b: Vector3| a.min(&b)));
    b.add_method("Abs", bind_fn0(|v: Vector3| v.abs()));
    b.add_method("Ceil", bind_fn0(|v: Vector3| v.ceil()));
    b.add_method("Floor", bind_fn0(|v: Vector3| v.floor()));
    b.add_method("Sign", bind_fn0(|v: Vector3| v.sign()));
    b.add_method(
        "Angle",
        bind_fn2(|a: Vector3, b: Vector3, axis: Option<Vector3>| a.angle(&b, axis.as_ref())),
    );
    b.add_method(
        "FuzzyEq",
        bind_fn2(|a: Vector3, b: Vector3, epsilon: Option<f64>| {
            a.fuzzy_eq(&b, epsilon.unwrap_or(1e-5))
        }),
    );

    b.add_static(
        "new",
        bind_static3(|x: Option<f64>, y: Option<f64>, z: Option<f64>| {
            Vector3::new(x.unwrap_or(0.0), y.unwrap_or(0.0), z.unwrap_or(0.0))
        }),
    );
    b.add_static("zero", bind_static0(|| Vector3::ZERO));
    b.add_static("one", bind_static0(|| Vector3::ONE));

    b.add_binary(
        BinOp::Add,
        is_type::<Vector3>,
        is_type::<Vector3>,
        bind_fn1(|a: Vector3, b: Vector3| a + b),
    );
    b.add_binary(
        BinOp::Sub,
        is_type::<Vector3>,
        is_type::<Vector3>,
        bind_fn1(|a: Vector3, b: Vector3| a - b),
    );
    b.add_binary(
        BinOp::Mul,
        is_type::<Vector3>,
        is_type::<Vector3>,
        bind_fn1(|a: Vector3, b: Vector3| a * b),
    );
    b.add_binary(
        BinOp::Mul,
        is_type::<Vector3>,
        is_number,
        bind_fn1(|a: Vector3, s: f64| a * s),
    );
    b.add_binary(
        BinOp::Mul,
        is_number,
        is_type::<Vector3>,
        bind_fn1(|s: f64, a: Vector3| s * a),
    );
    b.add_binary(
        BinOp::Div,
        is_type::<Vector3>,
        is_type::<Vector3>,
        bind_fn1(|a: Vector3, b: Vector3| a / b),
    );
    b.add_binary(
        BinOp::Div,
        is_type::<Vector3>,
        is_number,
        bind_fn1(|a: Vector3, s: f64| a / s),
    );
    b.add_binary(
        BinOp::Eq,
        is_type::<Vector3>,
        is_type::<Vector3>,
        bind_fn1(|a: Vector3, b: Vector3| a == b),
    );
    b.set_neg(bind_fn0(|v: Vector3| -v));
    b.set_tostring(bind_fn0(|v: Vector3| v.to_string()));
    b
}

fn color3_binder() -> ClassBinder {
    let mut b = ClassBinder::new("Color3", None);

    b.add_property("R", Some(bind_fn0(|c: Color3| c.r)), None);
    b.add_property("G", Some(bind_fn0(|c: Color3| c.g)), None);
    b.add_property("B", Some(bind_fn0(|c: Color3| c.b)), None);

    b.add_method(
        "Lerp",
        bind_fn2(|a: Color3, b: Color3, alpha: f64| a.lerp(&b, alpha)),
    );
    b.add_method("ToHex", bind_fn0(|c: Color3| c.to_hex()));
    b.add_method("ToHSV", bind_fn0(|c: Color3| c.to_hsv()));

    b.add_static(
        "new",
        bind_static3(|r: Option<f64>, g: Option<f64>, b: Option<f64>| {
            Color3::new(r.unwrap_or(0.0), g.unwrap_or(0.0), b.unwrap_or(0.0))
        }),
    );
    b.add_static(
        "fromRGB",
        bind_static3(|r: f64, g: f64, b: f64| Color3::from_rgb(r as u8, g as u8, b as u8)),
    );
    b.add_static(
        "fromHSV",
        bind_static3(|h: f64, s: f64, v: f64| Color3::from_hsv(h, s, v)),
    );
    b.add_static(
        "fromHex",
        bind_static1(|hex: String| {
            Color3::from_hex(&hex)
                .ok_or_else(|| ScriptError::runtime(format!("invalid hex color '{hex}'")))
        }),
    );

    b.add_binary(
        BinOp::Eq,
        is_type::<Color3>,
        is_type::<Color3>,
        bind_fn1(|a: Color3, b: Color3| a == b),
    );
    b.set_tostring(bind_fn0(|c: Color3| c.to_string()));
    b
}

fn enum_item_binder() -> ClassBinder {
    let mut b = ClassBinder::new("EnumItem", Some(VariantKind::EnumItem as u32));
    b.add_property(
        "Name",
        Some(bind_fn0(|e: &'static EnumItem| e.name().to_string())),
        None,
    );
    b.add_property(
        "Value",
        Some(bind_fn0(|e: &'static EnumItem| f64::from(e.value()))),
        None,
    );
    b.add_property(
        "EnumType",
        Some(bind_fn0(|e: &'static EnumItem| e.enum_name().to_string())),
        None,
    );
    b.add_binary(
        BinOp::Eq,
        is_type::<&'static EnumItem>,
        is_type::<&'static EnumItem>,
        bind_fn1(|a: &'static EnumItem, b: &'static EnumItem| std::ptr::eq(a, b)),
    );
    b.set_tostring(bind_fn0(|e: &'static EnumItem| e.full_name()));
    b
}

fn script_signal_binder() -> ClassBinder {
    let mut b = ClassBinder::new("ScriptSignal", None);
    b.add_method(
        "Connect",
        Arc::new(|t: &Arc<ScriptThread>| {
            let sref = userdata_check::<SignalRef>(t, 1, "ScriptSignal")?;
            let func = ScriptFunction::check(t, 2)?;
            let conn = sref.connect(t, func, false)?;
            t.push(ScriptValue::Userdata(Userdata::new("ScriptConnection", conn)));
            Ok(1)
        }),
    );
    b.add_method(
        "Once",
        Arc::new(|t: &Arc<ScriptThread>| {
            let sref = userdata_check::<SignalRef>(t, 1, "ScriptSignal")?;
            let func = ScriptFunction::check(t, 2)?;
            let conn = sref.connect(t, func, true)?;
            t.push(ScriptValue::Userdata(Userdata::new("ScriptConnection", conn)));
            Ok(1)
        }),
    );
    b.add_method(
        "Wait",
        Arc::new(|t: &Arc<ScriptThread>| {
            let sref = userdata_check::<SignalRef>(t, 1, "ScriptSignal")?;
            sref.wait(t)?;
            // Results arrive when the scheduler resumes the thread.
            Ok(0)
        }),
    );
    b
}

fn script_connection_binder() -> ClassBinder {
    let mut b = ClassBinder::new("ScriptConnection", None);
    b.add_property(
        "Connected",
        Some(Arc::new(|t: &Arc<ScriptThread>| {
            let conn = userdata_check::<crate::signals::ConnectionRef>(t, 1, "ScriptConnection")?;
            bool::push(t, conn.connected());
            Ok(1usize)
        }) as RawFn),
        None,
    );
    b.add_method(
        "Disconnect",
        Arc::new(|t: &Arc<ScriptThread>| {
            let conn = userdata_check::<crate::signals::ConnectionRef>(t, 1, "ScriptConnection")?;
            conn.disconnect();
            Ok(0)
        }),
    );
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_binders_present() {
        let db = ClassDb::new();
        for name in [
            "Int64",
            "Vector3",
            "Color3",
            "EnumItem",
            "ScriptSignal",
            "ScriptConnection",
        ] {
            assert!(db.binders.contains(name), "missing builtin {name}");
        }
        // Builtins are binder-only; they have no reflection record.
        assert!(!db.contains_class("Vector3"));
    }

    #[test]
    fn test_function_desc_builder() {
        let desc = FunctionDesc::new("FindFirstChild")
            .param("name", "string")
            .param("recursive", "bool")
            .returns("Instance")
            .safety(ThreadSafety::Safe);
        assert_eq!(desc.parameters.len(), 2);
        assert_eq!(desc.returns, vec!["Instance".to_string()]);
        assert_eq!(desc.security, Capability::NONE);
    }

    #[test]
    fn test_is_a_unknown_class() {
        let db = ClassDb::new();
        assert!(!db.is_a("Mystery", "Instance"));
        // An unregistered name never satisfies is_a, not even against itself.
        assert!(!db.is_a("Mystery", "Mystery"));
        assert!(!db.is_a("Instance", "Mystery"));
    }
}
