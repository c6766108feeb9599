use crate::core::{CacheError, Result, Row, Value};
use crate::schema::{EntityType, EntityTypeId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Reference to one cached instance.
///
/// Handles are only meaningful for the cache that issued them and only until
/// its next `flush` or `clear`; after that every cache call taking the
/// handle fails with [`CacheError::InvalidatedInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    pub(crate) entity: EntityTypeId,
    pub(crate) slot: usize,
    pub(crate) generation: u64,
}

impl EntityHandle {
    pub fn entity(&self) -> EntityTypeId {
        self.entity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstanceStatus {
    /// Not yet written to the store.
    New,
    /// Loaded from the store; changes are written back as updates.
    Persistent,
    /// Loaded through a column projection; indexed but never written.
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Created,
    Loaded,
    Projection,
}

#[derive(Debug, Clone)]
pub(crate) struct Instance {
    pub(crate) values: Row,
    /// Identity tuple the row was loaded under; `None` until persisted.
    pub(crate) persisted_key: Option<Row>,
    pub(crate) origin: Origin,
    pub(crate) dirty: bool,
    /// Explicit relationship targets, one slot per declared relationship.
    pub(crate) related: Vec<Option<EntityHandle>>,
}

impl Instance {
    pub(crate) fn created(values: Row, relationships: usize) -> Self {
        Self {
            values,
            persisted_key: None,
            origin: Origin::Created,
            dirty: false,
            related: vec![None; relationships],
        }
    }

    pub(crate) fn loaded(entity: &EntityType, values: Row, projected: bool) -> Self {
        let key = entity
            .primary_key()
            .iter()
            .map(|idx| values[*idx].clone())
            .collect();
        Self {
            values,
            persisted_key: Some(key),
            origin: if projected { Origin::Projection } else { Origin::Loaded },
            dirty: false,
            related: vec![None; entity.relationships().len()],
        }
    }

    pub(crate) fn status(&self) -> InstanceStatus {
        match (self.origin, &self.persisted_key) {
            (Origin::Projection, _) => InstanceStatus::ReadOnly,
            (_, None) => InstanceStatus::New,
            (_, Some(_)) => InstanceStatus::Persistent,
        }
    }
}

/// An ordered list of `(attribute, value)` pairs.
///
/// Used both as the conjunctive equality of a lookup and as the initial
/// values of a created instance.
///
/// ```
/// use modelcache::Attrs;
///
/// let attrs = Attrs::new().with("id", 1).with("titel", "foo");
/// assert_eq!(attrs.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attrs(Vec<(String, Value)>);

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((attribute.into(), value.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolves every name against the entity type and checks each value
    /// against the attribute's declared type.
    pub(crate) fn resolve(&self, entity: &EntityType) -> Result<Vec<(usize, Value)>> {
        let mut seen = HashSet::new();
        self.0
            .iter()
            .map(|(name, value)| {
                let idx = entity.require_attribute(name)?;
                if !seen.insert(idx) {
                    return Err(CacheError::DuplicateAttribute(name.clone()));
                }
                let data_type = entity.attributes()[idx].data_type;
                let accepted = data_type.accept(value.clone()).map_err(|_| {
                    CacheError::TypeMismatch(format!(
                        "'{}.{}' expects {}, got {}",
                        entity.name(),
                        name,
                        data_type,
                        value.type_name()
                    ))
                })?;
                Ok((idx, accepted))
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Attrs {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Attrs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}
