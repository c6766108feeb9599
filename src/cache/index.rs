use super::instance::Instance;
use crate::core::{Row, Value};
use std::collections::HashMap;

/// Attribute positions of an index, ordered by attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AttributeKey(Vec<usize>);

impl AttributeKey {
    /// Builds the key from `(position, name)` pairs in any order.
    pub(crate) fn new<'a>(mut attributes: Vec<(usize, &'a str)>) -> Self {
        attributes.sort_by(|a, b| a.1.cmp(b.1));
        Self(attributes.into_iter().map(|(idx, _)| idx).collect())
    }

    pub(crate) fn positions(&self) -> &[usize] {
        &self.0
    }

    pub(crate) fn instance_key(&self, values: &Row) -> Row {
        self.0.iter().map(|idx| values[*idx].clone()).collect()
    }
}

/// Buckets of instance slots keyed by their current values for one
/// attribute key. Each bucket keeps its slots in insertion order.
#[derive(Debug, Clone)]
pub(crate) struct SecondaryIndex {
    key: AttributeKey,
    buckets: HashMap<Row, Vec<usize>>,
}

impl SecondaryIndex {
    pub(crate) fn build(key: AttributeKey, instances: &[Instance]) -> Self {
        let mut index = Self {
            key,
            buckets: HashMap::new(),
        };
        for (slot, instance) in instances.iter().enumerate() {
            index.insert(slot, &instance.values);
        }
        index
    }

    pub(crate) fn lookup(&self, instance_key: &Row) -> &[usize] {
        self.buckets
            .get(instance_key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn insert(&mut self, slot: usize, values: &Row) {
        let bucket = self.buckets.entry(self.key.instance_key(values)).or_default();
        if !bucket.contains(&slot) {
            bucket.push(slot);
        }
    }

    /// Moves `slot` after attribute `attribute` changed from `old` to the
    /// value now held in `values`.
    fn reindex(&mut self, slot: usize, attribute: usize, old: &Value, values: &Row) {
        let Some(position) = self.key.positions().iter().position(|idx| *idx == attribute) else {
            return;
        };

        let mut old_key = self.key.instance_key(values);
        old_key[position] = old.clone();
        self.remove(slot, &old_key);
        self.insert(slot, values);
    }

    fn remove(&mut self, slot: usize, instance_key: &Row) {
        let Some(bucket) = self.buckets.get_mut(instance_key) else {
            return;
        };
        bucket.retain(|s| *s != slot);
        if bucket.is_empty() {
            self.buckets.remove(instance_key);
        }
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn estimated_bytes(&self) -> usize {
        self.buckets
            .iter()
            .map(|(key, slots)| {
                crate::core::estimated_row_bytes(key) + slots.len() * std::mem::size_of::<usize>()
            })
            .sum()
    }
}

/// Every index built so far for one entity type.
#[derive(Debug, Clone, Default)]
pub(crate) struct IndexSet {
    indices: HashMap<AttributeKey, SecondaryIndex>,
}

impl IndexSet {
    /// Returns the index for `key`, scanning `instances` once if it does not
    /// exist yet.
    pub(crate) fn get_or_build(&mut self, key: AttributeKey, instances: &[Instance]) -> &SecondaryIndex {
        self.indices
            .entry(key)
            .or_insert_with_key(|key| SecondaryIndex::build(key.clone(), instances))
    }

    /// Adds a freshly created instance to every existing index.
    pub(crate) fn insert(&mut self, slot: usize, values: &Row) {
        for index in self.indices.values_mut() {
            index.insert(slot, values);
        }
    }

    pub(crate) fn reindex(&mut self, slot: usize, attribute: usize, old: &Value, values: &Row) {
        for index in self.indices.values_mut() {
            index.reindex(slot, attribute, old, values);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.indices.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &SecondaryIndex> {
        self.indices.values()
    }
}
