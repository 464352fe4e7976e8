//! Process-wide enumeration singletons
//!
//! Script code refers to enumeration values as `EnumItem` handles. Each item
//! is a `&'static EnumItem` living in a process-wide table, so handles can be
//! compared by address and carried in value types without ownership.

use crate::NameMap;
use once_cell::sync::Lazy;

/// An enumeration: a named, closed set of [`EnumItem`]s.
#[derive(Debug)]
pub struct Enum {
    name: &'static str,
    items: &'static [EnumItem],
}

impl Enum {
    /// Declare an enumeration over a static item table.
    pub const fn new(name: &'static str, items: &'static [EnumItem]) -> Self {
        Self { name, items }
    }

    /// The enumeration's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// All items, in declaration order.
    pub fn items(&self) -> &'static [EnumItem] {
        self.items
    }

    /// Find an item by name.
    pub fn item(&self, name: &str) -> Option<&'static EnumItem> {
        self.items.iter().find(|i| i.name == name)
    }

    /// Find an item by numeric value.
    pub fn from_value(&self, value: i32) -> Option<&'static EnumItem> {
        self.items.iter().find(|i| i.value == value)
    }
}

/// A single value of an [`Enum`].
#[derive(Debug, PartialEq, Eq)]
pub struct EnumItem {
    enum_name: &'static str,
    name: &'static str,
    value: i32,
}

impl EnumItem {
    /// Declare an item. Only meaningful inside an [`Enum`] item table.
    pub const fn new(enum_name: &'static str, name: &'static str, value: i32) -> Self {
        Self {
            enum_name,
            name,
            value,
        }
    }

    /// The owning enumeration's name.
    pub fn enum_name(&self) -> &'static str {
        self.enum_name
    }

    /// The item's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The item's numeric value.
    pub fn value(&self) -> i32 {
        self.value
    }

    /// Render as `Enum.<EnumName>.<ItemName>`, the script-visible spelling.
    pub fn full_name(&self) -> String {
        format!("Enum.{}.{}", self.enum_name, self.name)
    }
}

/// Signal delivery behavior selectable per emitter.
pub static SIGNAL_BEHAVIOR: Enum = Enum::new(
    "SignalBehavior",
    &[
        EnumItem::new("SignalBehavior", "Default", 0),
        EnumItem::new("SignalBehavior", "Immediate", 1),
        EnumItem::new("SignalBehavior", "Deferred", 2),
    ],
);

/// The ambient identities a script thread can run under. Values line up
/// with the runtime's `Identity` discriminants.
pub static SECURITY_CONTEXT: Enum = Enum::new(
    "SecurityContext",
    &[
        EnumItem::new("SecurityContext", "Anonymous", 0),
        EnumItem::new("SecurityContext", "LocalGui", 1),
        EnumItem::new("SecurityContext", "GameScript", 2),
        EnumItem::new("SecurityContext", "ElevatedGameScript", 3),
        EnumItem::new("SecurityContext", "CommandBar", 4),
        EnumItem::new("SecurityContext", "Plugin", 5),
        EnumItem::new("SecurityContext", "ElevatedPlugin", 6),
        EnumItem::new("SecurityContext", "Com", 7),
        EnumItem::new("SecurityContext", "WebService", 8),
        EnumItem::new("SecurityContext", "Replicator", 9),
        EnumItem::new("SecurityContext", "Assistant", 10),
        EnumItem::new("SecurityContext", "CloudSession", 11),
        EnumItem::new("SecurityContext", "TestingGameScript", 12),
    ],
);

static ENUMS: Lazy<NameMap<&'static Enum>> = Lazy::new(|| {
    [&SIGNAL_BEHAVIOR, &SECURITY_CONTEXT]
        .into_iter()
        .map(|e: &'static Enum| (e.name(), e))
        .collect()
});

/// Look up an enumeration by name in the process-wide catalog.
pub fn find_enum(name: &str) -> Option<&'static Enum> {
    ENUMS.get(name).copied()
}

/// Look up a single item by enumeration and item name.
pub fn find_enum_item(enum_name: &str, item: &str) -> Option<&'static EnumItem> {
    find_enum(enum_name)?.item(item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_lookup_by_name_and_value() {
        let deferred = SIGNAL_BEHAVIOR.item("Deferred").unwrap();
        assert_eq!(deferred.value(), 2);
        assert_eq!(SIGNAL_BEHAVIOR.from_value(2), Some(deferred));
        assert!(SIGNAL_BEHAVIOR.item("Eventually").is_none());
    }

    #[test]
    fn test_full_name() {
        let item = SIGNAL_BEHAVIOR.item("Immediate").unwrap();
        assert_eq!(item.full_name(), "Enum.SignalBehavior.Immediate");
    }

    #[test]
    fn test_items_are_singletons() {
        let a = SIGNAL_BEHAVIOR.item("Default").unwrap();
        let b = SIGNAL_BEHAVIOR.from_value(0).unwrap();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_catalog_lookup() {
        let e = find_enum("SignalBehavior").unwrap();
        assert!(std::ptr::eq(e, &SIGNAL_BEHAVIOR));
        assert!(find_enum("NoSuchEnum").is_none());

        let item = find_enum_item("SecurityContext", "Plugin").unwrap();
        assert_eq!(item.value(), 5);
        assert!(find_enum_item("SecurityContext", "Root").is_none());
    }
}
