//! Insertion-ordered key/value tables.
//!
//! TOML tables are decoded in document order so that rule sets where the
//! first match wins (redirects, SCGI prefixes) behave the same on every run.
//! Merging replaces an existing key in place and appends new keys at the end.

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// An ordered sequence of unique string keys with associated values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedTable<V> {
    entries: Vec<(String, V)>,
}

impl<V> OrderedTable<V> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert a value, replacing any previous value for the key while keeping
    /// its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Iterate entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `other` into `self`; `other` wins on key collisions.
    pub fn merge(&mut self, other: OrderedTable<V>) {
        for (key, value) in other.entries {
            self.insert(key, value);
        }
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &V) -> bool) {
        self.entries.retain(|(k, v)| keep(k, v));
    }

    /// Mutable access to every value, in order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().map(|(_, v)| v)
    }
}

impl<V> Default for OrderedTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FromIterator<(String, V)> for OrderedTable<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (key, value) in iter {
            table.insert(key, value);
        }
        table
    }
}

impl<V> IntoIterator for OrderedTable<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<V: Serialize> Serialize for OrderedTable<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct OrderedTableVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedTableVisitor<V> {
    type Value = OrderedTable<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a table of string keys")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut table = OrderedTable::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            table.insert(key, value);
        }
        Ok(table)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedTable<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedTableVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize)]
    struct Doc {
        rules: OrderedTable<String>,
    }

    #[test]
    fn keeps_document_order() {
        let doc: Doc = toml::from_str(
            r#"
            [rules]
            "^/z" = "/last"
            "^/a" = "/first"
            "^/m" = "/middle"
            "#,
        )
        .unwrap();

        let keys: Vec<&str> = doc.rules.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["^/z", "^/a", "^/m"]);
    }

    #[test]
    fn merge_replaces_in_place_and_appends() {
        let mut base: OrderedTable<u32> =
            vec![("a".to_string(), 1), ("b".to_string(), 2)].into_iter().collect();
        let overlay: OrderedTable<u32> =
            vec![("c".to_string(), 3), ("a".to_string(), 10)].into_iter().collect();

        base.merge(overlay);

        let entries: Vec<(&str, u32)> = base.iter().map(|(k, v)| (k, *v)).collect();
        assert_eq!(entries, vec![("a", 10), ("b", 2), ("c", 3)]);
    }
}
