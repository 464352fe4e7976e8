//! String-keyed map with allocation-free lookups
//!
//! The registry, binder, and signal tables are all keyed by member name and
//! queried far more often than they are populated. Keys are stored as
//! `Box<str>` so lookups can borrow a plain `&str` without building an owned
//! `String` per query.

use rustc_hash::FxHashMap;
use std::fmt;

/// A hash map from names to values.
///
/// Thin wrapper over `FxHashMap<Box<str>, V>` exposing only the operations
/// the runtime needs. Iteration order is unspecified.
#[derive(Clone)]
pub struct NameMap<V> {
    inner: FxHashMap<Box<str>, V>,
}

impl<V> NameMap<V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            inner: FxHashMap::default(),
        }
    }

    /// Look up a value by name.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.inner.get(name)
    }

    /// Look up a value by name, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut V> {
        self.inner.get_mut(name)
    }

    /// Insert a value, replacing any previous entry with the same name.
    pub fn insert(&mut self, name: impl Into<Box<str>>, value: V) -> Option<V> {
        self.inner.insert(name.into(), value)
    }

    /// Remove an entry by name, returning the value if present.
    pub fn remove(&mut self, name: &str) -> Option<V> {
        self.inner.remove(name)
    }

    /// Whether an entry with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Get the value for `name`, inserting one built by `default` if absent.
    pub fn get_or_insert_with(&mut self, name: &str, default: impl FnOnce() -> V) -> &mut V {
        if !self.inner.contains_key(name) {
            self.inner.insert(Box::from(name), default());
        }
        self.inner.get_mut(name).expect("entry just inserted")
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.inner.iter().map(|(k, v)| (k.as_ref(), v))
    }

    /// Iterate over values.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }

    /// Iterate over names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(|k| k.as_ref())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl<V> Default for NameMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> fmt::Debug for NameMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.iter()).finish()
    }
}

impl<V: PartialEq> PartialEq for NameMap<V> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<V, S: Into<Box<str>>> FromIterator<(S, V)> for NameMap<V> {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut map = NameMap::new();
        map.insert("Name", 1);
        map.insert("Parent", 2);

        assert_eq!(map.get("Name"), Some(&1));
        assert_eq!(map.get("Parent"), Some(&2));
        assert_eq!(map.get("Missing"), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_lookup_borrows_str() {
        let mut map = NameMap::new();
        map.insert(String::from("GetFullName"), "method");

        // Query with a borrowed key built at a different call site.
        let key: &str = "GetFullName";
        assert!(map.contains(key));
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut map: NameMap<Vec<i32>> = NameMap::new();
        map.get_or_insert_with("Changed", Vec::new).push(1);
        map.get_or_insert_with("Changed", Vec::new).push(2);

        assert_eq!(map.get("Changed"), Some(&vec![1, 2]));
    }

    #[test]
    fn test_remove() {
        let mut map = NameMap::new();
        map.insert("a", 1);
        assert_eq!(map.remove("a"), Some(1));
        assert_eq!(map.remove("a"), None);
        assert!(map.is_empty());
    }
}
