//! The instance tree
//!
//! [`Instance`] is the base every scriptable object embeds: identity, name,
//! parent/children links, and the per-object [`SignalEmitter`]. It is also
//! the root of the class hierarchy, contributing the members every class
//! inherits (`Name`, `Parent`, `IsA`, `FindFirstChild`, the ancestry
//! signals, and so on).
//!
//! Host-facing tree mutation is fail-quiet: reparenting onto a destroyed
//! node or into a cycle returns false and changes nothing. Member access
//! through the binder, by contrast, fails loudly with a typed error.

use crate::capabilities::Capability;
use crate::classdb::{
    ClassDb, ClassRegistration, ClassTag, FunctionDesc, MemoryCategory, PropertyDesc, SignalDesc,
    ThreadSafety,
};
use crate::error::ScriptError;
use crate::object::{ObjectHandle, ScriptClass, ScriptObject};
use crate::signals::{SignalEmitter, SignalRef};
use crate::stack::StackOp;
use crate::thread::ScriptThread;
use crate::value::{ScriptTable, ScriptValue, Userdata};
use crate::variant::Variant;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

struct InstanceInner {
    name: String,
    archivable: bool,
    parent: Option<Weak<dyn ScriptObject>>,
    children: Vec<ObjectHandle>,
    destroyed: bool,
}

/// Identity, tree links, and signals of a scriptable object.
pub struct Instance {
    id: u64,
    emitter: Arc<SignalEmitter>,
    self_weak: Mutex<Option<Weak<dyn ScriptObject>>>,
    inner: Mutex<InstanceInner>,
}

impl Default for Instance {
    fn default() -> Self {
        Self {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            emitter: SignalEmitter::new(),
            self_weak: Mutex::new(None),
            inner: Mutex::new(InstanceInner {
                name: "Instance".to_string(),
                archivable: true,
                parent: None,
                children: Vec::new(),
                destroyed: false,
            }),
        }
    }
}

impl Instance {
    /// Allocate a plain, unparented instance.
    pub fn new_orphan() -> ObjectHandle {
        let obj = Arc::new(Instance::default());
        crate::object::attach_self(&obj);
        obj
    }

    /// Process-unique object id.
    pub fn object_id(&self) -> u64 {
        self.id
    }

    /// This object's signal emitter.
    pub fn emitter(&self) -> &Arc<SignalEmitter> {
        &self.emitter
    }

    /// Store the owning object's weak self-reference. Called once at
    /// allocation by [`crate::object::attach_self`].
    pub fn attach_self(&self, weak: Weak<dyn ScriptObject>) {
        if let Some(obj) = weak.upgrade() {
            self.emitter.set_owner(obj.class_name());
        }
        *self.self_weak.lock() = Some(weak);
    }

    /// A strong handle to the full object embedding this instance.
    pub fn handle(&self) -> Option<ObjectHandle> {
        self.self_weak.lock().as_ref().and_then(Weak::upgrade)
    }

    /// The object's name.
    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    /// Rename. Emits `NameChanged`; writing the current name is a no-op.
    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        {
            let mut inner = self.inner.lock();
            if inner.name == name {
                return;
            }
            inner.name = name;
        }
        self.property_changed("Name");
    }

    /// Whether serialization may persist this object.
    pub fn archivable(&self) -> bool {
        self.inner.lock().archivable
    }

    /// Toggle persistence. Emits `ArchivableChanged` on actual change.
    pub fn set_archivable(&self, archivable: bool) {
        {
            let mut inner = self.inner.lock();
            if inner.archivable == archivable {
                return;
            }
            inner.archivable = archivable;
        }
        self.property_changed("Archivable");
    }

    /// Whether [`Instance::destroy`] ran.
    pub fn destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    // ---- tree links ----

    /// The current parent, if any.
    pub fn parent(&self) -> Option<ObjectHandle> {
        self.inner
            .lock()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Strong handles to the children, in insertion order.
    pub fn children(&self) -> Vec<ObjectHandle> {
        self.inner.lock().children.clone()
    }

    /// All descendants, preorder.
    pub fn descendants(&self) -> Vec<ObjectHandle> {
        let mut out = Vec::new();
        let mut stack: Vec<ObjectHandle> = self.children();
        stack.reverse();
        while let Some(node) = stack.pop() {
            out.push(node.clone());
            let mut kids = node.instance().children();
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    /// Reparent this object. Returns false, changing nothing, when the
    /// move is illegal: self or a destroyed node as target, a cycle, or a
    /// destroyed self.
    pub fn set_parent(&self, new_parent: Option<&ObjectHandle>) -> bool {
        let Some(this) = self.handle() else {
            return false;
        };
        if self.inner.lock().destroyed {
            return false;
        }

        let old_parent = self.parent();
        match (&old_parent, new_parent) {
            (Some(a), Some(b)) if a.instance().id == b.instance().id => return true,
            (None, None) => return true,
            _ => {}
        }

        if let Some(np) = new_parent {
            if np.instance().id == self.id || self.is_ancestor_of(np.as_ref()) {
                return false;
            }
            if np.instance().destroyed() {
                return false;
            }
        }

        if let Some(op) = &old_parent {
            let mut ancestor = Some(op.clone());
            while let Some(a) = ancestor {
                a.instance()
                    .emit_quiet("DescendantRemoving", &[Variant::Object(this.clone())]);
                ancestor = a.instance().parent();
            }
            op.instance()
                .inner
                .lock()
                .children
                .retain(|c| c.instance().id != self.id);
            op.instance()
                .emit_quiet("ChildRemoved", &[Variant::Object(this.clone())]);
        }

        self.inner.lock().parent = new_parent.map(Arc::downgrade);

        if let Some(np) = new_parent {
            np.instance().inner.lock().children.push(this.clone());
            np.instance()
                .emit_quiet("ChildAdded", &[Variant::Object(this.clone())]);
            let mut ancestor = Some(np.clone());
            while let Some(a) = ancestor {
                a.instance()
                    .emit_quiet("DescendantAdded", &[Variant::Object(this.clone())]);
                ancestor = a.instance().parent();
            }
        }

        let parent_arg = match new_parent {
            Some(p) => Variant::Object(p.clone()),
            None => Variant::Null,
        };
        self.emit_quiet(
            "AncestryChanged",
            &[Variant::Object(this.clone()), parent_arg.clone()],
        );
        for descendant in self.descendants() {
            descendant.instance().emit_quiet(
                "AncestryChanged",
                &[Variant::Object(this.clone()), parent_arg.clone()],
            );
        }
        self.property_changed("Parent");
        true
    }

    /// Whether `other` sits below this object.
    pub fn is_ancestor_of(&self, other: &dyn ScriptObject) -> bool {
        let mut current = other.instance().parent();
        while let Some(node) = current {
            if node.instance().id == self.id {
                return true;
            }
            current = node.instance().parent();
        }
        false
    }

    /// Whether this object sits below `other`.
    pub fn is_descendant_of(&self, other: &dyn ScriptObject) -> bool {
        other.instance().is_ancestor_of_instance(self)
    }

    fn is_ancestor_of_instance(&self, other: &Instance) -> bool {
        let mut current = other.parent();
        while let Some(node) = current {
            if node.instance().id == self.id {
                return true;
            }
            current = node.instance().parent();
        }
        false
    }

    /// First child named `name`; `recursive` searches the subtree preorder.
    pub fn find_first_child(&self, name: &str, recursive: bool) -> Option<ObjectHandle> {
        for child in self.children() {
            if child.instance().name() == name {
                return Some(child);
            }
        }
        if recursive {
            for child in self.children() {
                if let Some(found) = child.instance().find_first_child(name, true) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// First child of exactly `class`.
    pub fn find_first_child_of_class(&self, class: &str) -> Option<ObjectHandle> {
        self.children()
            .into_iter()
            .find(|c| c.class_name() == class)
    }

    /// First child that is `class` or derives from it.
    pub fn find_first_child_which_is_a(&self, class: &str, db: &ClassDb) -> Option<ObjectHandle> {
        self.children()
            .into_iter()
            .find(|c| db.is_a(c.class_name(), class))
    }

    /// Nearest ancestor named `name`.
    pub fn find_first_ancestor(&self, name: &str) -> Option<ObjectHandle> {
        let mut current = self.parent();
        while let Some(node) = current {
            if node.instance().name() == name {
                return Some(node);
            }
            current = node.instance().parent();
        }
        None
    }

    /// Nearest ancestor of exactly `class`.
    pub fn find_first_ancestor_of_class(&self, class: &str) -> Option<ObjectHandle> {
        let mut current = self.parent();
        while let Some(node) = current {
            if node.class_name() == class {
                return Some(node);
            }
            current = node.instance().parent();
        }
        None
    }

    /// Nearest ancestor that is `class` or derives from it.
    pub fn find_first_ancestor_which_is_a(
        &self,
        class: &str,
        db: &ClassDb,
    ) -> Option<ObjectHandle> {
        let mut current = self.parent();
        while let Some(node) = current {
            if db.is_a(node.class_name(), class) {
                return Some(node);
            }
            current = node.instance().parent();
        }
        None
    }

    /// Dot-joined path from the tree root to this object.
    pub fn full_name(&self) -> String {
        let mut parts = vec![self.name()];
        let mut current = self.parent();
        while let Some(node) = current {
            parts.push(node.instance().name());
            current = node.instance().parent();
        }
        parts.reverse();
        parts.join(".")
    }

    /// Destroy every child.
    pub fn clear_all_children(&self) {
        for child in self.children() {
            child.instance().destroy();
        }
    }

    /// Tear the object down: emit `Destroying`, unparent, destroy the
    /// subtree, and drop every signal connection. Permanent; destroyed
    /// objects reject reparenting.
    pub fn destroy(&self) {
        if self.inner.lock().destroyed {
            return;
        }
        self.emit_quiet("Destroying", &[]);
        self.set_parent(None);
        self.inner.lock().destroyed = true;
        for child in self.children() {
            child.instance().destroy();
        }
        self.inner.lock().children.clear();
        self.emitter.disconnect_all();
    }

    // ---- signals ----

    /// Emit a signal on this object's emitter.
    pub fn emit(&self, signal: &str, args: &[Variant]) -> Result<(), ScriptError> {
        self.emitter.emit(signal, args)
    }

    fn emit_quiet(&self, signal: &str, args: &[Variant]) {
        if let Err(e) = self.emitter.emit(signal, args) {
            tracing::debug!(signal, error = %e, "signal emission reported an error");
        }
    }

    /// Emit the property's change notification signal.
    pub fn property_changed(&self, property: &str) {
        self.emit_quiet(&format!("{property}Changed"), &[]);
    }

    // ---- member bindings ----

    pub(crate) fn bind<D: ScriptClass + Default>(reg: &mut ClassRegistration<'_>) {
        reg.property_rw::<D, String, _, _>(
            PropertyDesc::new("Name", "string").safety(ThreadSafety::ReadSafe),
            |d| d.instance().name(),
            |d, v| d.instance().set_name(v),
        );
        reg.property_rw::<D, bool, _, _>(
            PropertyDesc::new("Archivable", "bool").category("Behavior"),
            |d| d.instance().archivable(),
            |d, v| d.instance().set_archivable(v),
        );
        reg.property_ro::<D, String, _>(
            PropertyDesc::new("ClassName", "string").transient(),
            |d| d.class_name().to_string(),
        );

        // Parent dispatches through overrides: reads may surface nil and
        // writes go through the fail-quiet reparent path.
        reg.property_meta(PropertyDesc::new("Parent", "Instance").transient());
        reg.index_override(Arc::new(|t, name| {
            if name != "Parent" {
                return Ok(None);
            }
            let this = ObjectHandle::check(t, 1)?;
            match this.instance().parent() {
                Some(parent) => t.push_object(parent),
                None => t.push(ScriptValue::Nil),
            }
            Ok(Some(1))
        }));
        reg.newindex_override(Arc::new(|t, name| {
            if name != "Parent" {
                return Ok(false);
            }
            let this = ObjectHandle::check(t, 1)?;
            let parent = Option::<ObjectHandle>::check(t, 3)?;
            this.instance().set_parent(parent.as_ref());
            Ok(true)
        }));

        reg.method(
            FunctionDesc::new("IsA")
                .param("className", "string")
                .returns("bool")
                .safety(ThreadSafety::Safe),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let class = String::check(t, 2)?;
                bool::push(t, t.classdb().is_a(this.class_name(), &class));
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("GetFullName")
                .returns("string")
                .safety(ThreadSafety::Safe),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                <String as StackOp>::push(t, this.instance().full_name());
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("FindFirstChild")
                .param("name", "string")
                .param("recursive", "bool")
                .returns("Instance"),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let name = String::check(t, 2)?;
                let recursive = Option::<bool>::check(t, 3)?.unwrap_or(false);
                Option::<ObjectHandle>::push(t, this.instance().find_first_child(&name, recursive));
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("FindFirstChildOfClass")
                .param("className", "string")
                .returns("Instance"),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let class = String::check(t, 2)?;
                Option::<ObjectHandle>::push(t, this.instance().find_first_child_of_class(&class));
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("FindFirstChildWhichIsA")
                .param("className", "string")
                .returns("Instance"),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let class = String::check(t, 2)?;
                let found = this
                    .instance()
                    .find_first_child_which_is_a(&class, t.classdb());
                Option::<ObjectHandle>::push(t, found);
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("FindFirstAncestor")
                .param("name", "string")
                .returns("Instance"),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let name = String::check(t, 2)?;
                Option::<ObjectHandle>::push(t, this.instance().find_first_ancestor(&name));
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("FindFirstAncestorOfClass")
                .param("className", "string")
                .returns("Instance"),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let class = String::check(t, 2)?;
                Option::<ObjectHandle>::push(t, this.instance().find_first_ancestor_of_class(&class));
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("FindFirstAncestorWhichIsA")
                .param("className", "string")
                .returns("Instance"),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let class = String::check(t, 2)?;
                let found = this
                    .instance()
                    .find_first_ancestor_which_is_a(&class, t.classdb());
                Option::<ObjectHandle>::push(t, found);
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("GetChildren")
                .returns("Array")
                .safety(ThreadSafety::Safe),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let mut table = ScriptTable::new();
                table.array = this
                    .instance()
                    .children()
                    .into_iter()
                    .map(ScriptValue::Object)
                    .collect();
                t.push(ScriptValue::Table(table));
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("GetDescendants")
                .returns("Array")
                .safety(ThreadSafety::Safe),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let mut table = ScriptTable::new();
                table.array = this
                    .instance()
                    .descendants()
                    .into_iter()
                    .map(ScriptValue::Object)
                    .collect();
                t.push(ScriptValue::Table(table));
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("IsAncestorOf")
                .param("descendant", "Instance")
                .returns("bool"),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let other = ObjectHandle::check(t, 2)?;
                bool::push(t, this.instance().is_ancestor_of(other.as_ref()));
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("IsDescendantOf")
                .param("ancestor", "Instance")
                .returns("bool"),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let other = ObjectHandle::check(t, 2)?;
                bool::push(t, this.instance().is_descendant_of(other.as_ref()));
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("GetPropertyChangedSignal")
                .param("property", "string")
                .returns("ScriptSignal"),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                let property = String::check(t, 2)?;
                let class = this.class_name();
                let declared = t
                    .classdb()
                    .class(class)
                    .is_some_and(|c| c.properties.contains(&property));
                if !declared {
                    return Err(ScriptError::NotAMember {
                        name: property,
                        class: class.to_string(),
                    });
                }
                let sref = SignalRef {
                    emitter: Arc::downgrade(this.instance().emitter()),
                    signal: format!("{property}Changed"),
                    security: Capability::NONE,
                };
                t.push(ScriptValue::Userdata(Userdata::new("ScriptSignal", sref)));
                Ok(1)
            }),
        );
        reg.method(
            FunctionDesc::new("ClearAllChildren"),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                this.instance().clear_all_children();
                Ok(0)
            }),
        );
        reg.method(
            FunctionDesc::new("Destroy"),
            Arc::new(|t: &Arc<ScriptThread>| {
                let this = ObjectHandle::check(t, 1)?;
                this.instance().destroy();
                Ok(0)
            }),
        );

        reg.signal(SignalDesc::new("ChildAdded").param("child", "Instance"));
        reg.signal(SignalDesc::new("ChildRemoved").param("child", "Instance"));
        reg.signal(SignalDesc::new("DescendantAdded").param("descendant", "Instance"));
        reg.signal(SignalDesc::new("DescendantRemoving").param("descendant", "Instance"));
        reg.signal(
            SignalDesc::new("AncestryChanged")
                .param("child", "Instance")
                .param("parent", "Instance"),
        );
        reg.signal(SignalDesc::new("Destroying"));

        reg.tostring(Arc::new(|t: &Arc<ScriptThread>| {
            let this = ObjectHandle::check(t, 1)?;
            <String as StackOp>::push(t, this.instance().name());
            Ok(1)
        }));
    }
}

impl ScriptObject for Instance {
    fn class_name(&self) -> &'static str {
        "Instance"
    }

    fn instance(&self) -> &Instance {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A plain container node with no behavior of its own.
#[derive(Default)]
pub struct Folder {
    base: Instance,
}

crate::declare_class! {
    Folder: Instance, "Folder", MemoryCategory::Instances, creatable
}

impl Folder {
    fn bind<D: ScriptClass + Default>(reg: &mut ClassRegistration<'_>) {
        Instance::bind_members::<D>(reg);
    }
}

impl ScriptClass for Instance {
    const CLASS_NAME: &'static str = "Instance";
    const PARENT_NAME: &'static str = "";
    const CATEGORY: MemoryCategory = MemoryCategory::Instances;
    const TAGS: &'static [ClassTag] = &[ClassTag::NotCreatable];

    fn initialize_class(db: &mut ClassDb) {
        if db.contains_class(Self::CLASS_NAME) {
            return;
        }
        db.add_class::<Self>();
        let mut reg = db.registration(Self::CLASS_NAME);
        Self::bind_members::<Self>(&mut reg);
    }

    fn bind_members<D: ScriptClass + Default>(reg: &mut ClassRegistration<'_>) {
        Instance::bind::<D>(reg);
    }
}
