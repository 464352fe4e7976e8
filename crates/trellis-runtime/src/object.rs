//! Host object traits
//!
//! Every scriptable host type implements [`ScriptObject`] (the dynamic view
//! the runtime dispatches on) and [`ScriptClass`] (the static view the
//! registry and marshaling layers need). The [`declare_class!`] macro
//! generates both from a struct embedding an [`Instance`](crate::Instance)
//! base, mirroring how concrete classes are declared throughout the tree.

use crate::classdb::ClassDb;
use crate::classdb::{ClassTag, MemoryCategory};
use crate::instance::Instance;
use std::any::Any;
use std::sync::Arc;

/// Shared handle to a scriptable host object.
pub type ObjectHandle = Arc<dyn ScriptObject>;

/// Dynamic view of a scriptable host object.
pub trait ScriptObject: Send + Sync + 'static {
    /// The concrete class name, as registered in the [`ClassDb`].
    fn class_name(&self) -> &'static str;

    /// The embedded instance base carrying identity, tree links, and the
    /// signal emitter.
    fn instance(&self) -> &Instance;

    /// Borrow as `Any` for reference downcasts.
    fn as_any(&self) -> &dyn Any;

    /// Convert into `Any` for owning downcasts. Implementations return
    /// `self` unchanged.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Static view of a scriptable host type, consumed by the registry.
pub trait ScriptClass: ScriptObject + Sized {
    /// Registered class name.
    const CLASS_NAME: &'static str;
    /// Parent class name. `Instance` is the root of the hierarchy.
    const PARENT_NAME: &'static str;
    /// Memory accounting category.
    const CATEGORY: MemoryCategory;
    /// Class-level tags.
    const TAGS: &'static [ClassTag];

    /// Construct a fresh, unparented object. `None` for abstract classes.
    fn construct() -> Option<ObjectHandle> {
        None
    }

    /// Record this class (and its ancestors) in `db`. Idempotent.
    fn initialize_class(db: &mut ClassDb);

    /// Bind members into the class registration. `D` is the most-derived
    /// class being registered: inherited accessors are instantiated against
    /// it, so the flattened member set dispatches without chain walks.
    /// Implementations start by delegating to the parent class.
    fn bind_members<D: ScriptClass + Default>(reg: &mut crate::classdb::ClassRegistration<'_>);
}

/// Allocate a creatable object and attach its self-reference, so the
/// embedded [`Instance`] can hand out handles to the full object.
pub fn new_object<T: ScriptClass + Default>() -> Arc<T> {
    let obj = Arc::new(T::default());
    attach_self(&obj);
    obj
}

/// Attach `obj`'s weak self-reference to its instance base. Must be called
/// once on every freshly allocated object before it enters the tree.
pub fn attach_self<T: ScriptObject>(obj: &Arc<T>) {
    let weak: std::sync::Weak<dyn ScriptObject> = Arc::downgrade(obj) as _;
    obj.instance().attach_self(weak);
}

/// Declare a scriptable class over a struct with an `base: Instance` field.
///
/// ```ignore
/// #[derive(Default)]
/// struct Folder { base: Instance }
///
/// declare_class! {
///     Folder: Instance, "Folder", MemoryCategory::Instances, creatable
/// }
///
/// impl Folder {
///     fn bind(reg: &mut ClassRegistration<'_>) {
///         Instance::bind_members(reg);
///     }
/// }
/// ```
#[macro_export]
macro_rules! declare_class {
    ($ty:ident : $parent:ty, $name:expr, $category:expr $(, tags: [$($tag:expr),* $(,)?])? $(, $creatable:ident)?) => {
        impl $crate::ScriptObject for $ty {
            fn class_name(&self) -> &'static str {
                <$ty as $crate::ScriptClass>::CLASS_NAME
            }

            fn instance(&self) -> &$crate::Instance {
                &self.base
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_arc(
                self: ::std::sync::Arc<Self>,
            ) -> ::std::sync::Arc<dyn ::std::any::Any + Send + Sync> {
                self
            }
        }

        impl $crate::ScriptClass for $ty {
            const CLASS_NAME: &'static str = $name;
            const PARENT_NAME: &'static str = <$parent as $crate::ScriptClass>::CLASS_NAME;
            const CATEGORY: $crate::MemoryCategory = $category;
            const TAGS: &'static [$crate::ClassTag] = &[$($($tag),*)?];

            $(
                fn construct() -> Option<$crate::ObjectHandle> {
                    $crate::declare_class!(@$creatable);
                    let obj = $crate::object::new_object::<$ty>();
                    obj.instance().set_name(Self::CLASS_NAME);
                    Some(obj)
                }
            )?

            fn initialize_class(db: &mut $crate::ClassDb) {
                if db.contains_class(Self::CLASS_NAME) {
                    return;
                }
                <$parent as $crate::ScriptClass>::initialize_class(db);
                db.add_class::<Self>();
                let mut reg = db.registration(Self::CLASS_NAME);
                Self::bind_members::<Self>(&mut reg);
            }

            fn bind_members<D: $crate::ScriptClass + ::std::default::Default>(reg: &mut $crate::ClassRegistration<'_>) {
                $ty::bind::<D>(reg);
            }
        }
    };
    (@creatable) => {};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classdb::ClassRegistration;

    #[derive(Default)]
    struct Marker {
        base: Instance,
    }

    declare_class! {
        Marker: Instance, "Marker", MemoryCategory::Internal, creatable
    }

    impl Marker {
        fn bind<D: ScriptClass + Default>(reg: &mut ClassRegistration<'_>) {
            Instance::bind_members::<D>(reg);
        }
    }

    #[test]
    fn test_declared_class_constants() {
        assert_eq!(Marker::CLASS_NAME, "Marker");
        assert_eq!(Marker::PARENT_NAME, "Instance");
        assert!(Marker::TAGS.is_empty());
    }

    #[test]
    fn test_construct_attaches_self() {
        let obj = Marker::construct().unwrap();
        let back = obj.instance().handle().unwrap();
        assert_eq!(back.instance().object_id(), obj.instance().object_id());
    }

    #[test]
    fn test_as_any_downcast() {
        let obj: ObjectHandle = new_object::<Marker>();
        assert!(obj.as_any().downcast_ref::<Marker>().is_some());
        assert!(obj.as_any_arc().downcast::<Marker>().is_ok());
    }
}
