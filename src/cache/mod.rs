//! The write-deferring entity cache.
//!
//! An [`EntityCache`] keeps one instance list per entity type, loaded from
//! the backing store on first access, plus secondary indices built lazily
//! for every attribute combination that is looked up. Changes accumulate in
//! memory until [`EntityCache::flush`] writes them in bulk and resets the
//! cache.

mod bulk_load;
mod flush;
mod index;
mod instance;
mod load;
mod stats;

pub use flush::{FlushReport, TypeFlush};
pub use instance::{Attrs, EntityHandle, InstanceStatus};
pub use stats::{CacheStats, sizeof_fmt};

use crate::config::CacheConfig;
use crate::core::{CacheError, Result, Value};
use crate::schema::{EntityRegistry, EntityTypeId};
use crate::store::BackingStore;
use index::{AttributeKey, IndexSet};
use instance::Instance;
use log::Level;
use std::sync::Arc;

/// Cached state of one entity type.
#[derive(Debug, Default)]
struct TypeCache {
    instances: Vec<Instance>,
    indices: IndexSet,
}

impl TypeCache {
    /// Assigns one attribute and moves the instance between index buckets.
    fn assign(&mut self, slot: usize, attribute: usize, value: Value) {
        let instance = &mut self.instances[slot];
        if instance.values[attribute] == value {
            return;
        }
        let old = std::mem::replace(&mut instance.values[attribute], value);
        instance.dirty = true;
        self.indices.reindex(slot, attribute, &old, &instance.values);
    }
}

pub struct EntityCache<S: BackingStore> {
    store: S,
    registry: Arc<EntityRegistry>,
    config: CacheConfig,
    /// One entry per registered type; `None` until the type is first accessed.
    types: Vec<Option<TypeCache>>,
    generation: u64,
}

impl<S: BackingStore> EntityCache<S> {
    pub fn new(registry: Arc<EntityRegistry>, config: CacheConfig, store: S) -> Result<Self> {
        config.validate(&registry)?;
        let types = (0..registry.len()).map(|_| None).collect();
        Ok(Self {
            store,
            registry,
            config,
            types,
            generation: 0,
        })
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// All cached instances of `entity` whose attributes equal `attrs`.
    ///
    /// Loads the type on first access and builds the index for the given
    /// attribute set on first use. No match yields an empty list.
    pub fn find(&mut self, entity: &str, attrs: impl Into<Attrs>) -> Result<Vec<EntityHandle>> {
        let id = self.registry.resolve(entity)?;
        let slots = self.lookup(id, &attrs.into())?;
        Ok(slots.into_iter().map(|slot| self.handle(id, slot)).collect())
    }

    /// The single instance matching `attrs`, if any.
    ///
    /// More than one match is a caller error reported as
    /// [`CacheError::MultipleResults`].
    pub fn get(&mut self, entity: &str, attrs: impl Into<Attrs>) -> Result<Option<EntityHandle>> {
        let id = self.registry.resolve(entity)?;
        let slots = self.lookup(id, &attrs.into())?;
        match slots.as_slice() {
            [] => Ok(None),
            [slot] => Ok(Some(self.handle(id, *slot))),
            _ => Err(CacheError::MultipleResults {
                entity: entity.to_string(),
                count: slots.len(),
            }),
        }
    }

    /// Adds a new instance. Attributes not named in `attrs` start unset.
    /// The store is not touched until the next flush.
    pub fn create(&mut self, entity: &str, attrs: impl Into<Attrs>) -> Result<EntityHandle> {
        let id = self.registry.resolve(entity)?;
        self.create_instance(id, &attrs.into())
    }

    pub fn get_or_create(&mut self, entity: &str, attrs: impl Into<Attrs>) -> Result<EntityHandle> {
        let attrs = attrs.into();
        match self.get(entity, attrs.clone())? {
            Some(handle) => Ok(handle),
            None => self.create(entity, attrs),
        }
    }

    /// Assigns an attribute of a cached instance, keeping every index built
    /// for its type in step.
    pub fn set(&mut self, handle: EntityHandle, attribute: &str, value: impl Into<Value>) -> Result<()> {
        self.instance(handle)?;
        let (idx, value) = Attrs::new()
            .with(attribute, value)
            .resolve(self.registry.get(handle.entity))?
            .remove(0);
        self.type_cache_mut(handle.entity)?.assign(handle.slot, idx, value);
        Ok(())
    }

    pub fn value(&self, handle: EntityHandle, attribute: &str) -> Result<&Value> {
        let idx = self.registry.get(handle.entity).require_attribute(attribute)?;
        Ok(&self.instance(handle)?.values[idx])
    }

    /// All attribute values of an instance, in declaration order.
    pub fn values(&self, handle: EntityHandle) -> Result<&[Value]> {
        Ok(&self.instance(handle)?.values)
    }

    pub fn status(&self, handle: EntityHandle) -> Result<InstanceStatus> {
        Ok(self.instance(handle)?.status())
    }

    /// Points a relationship of `handle` at `target`, or unlinks it.
    ///
    /// Foreign-key attributes are left alone here; flush fills the unset ones
    /// from the linked instance.
    pub fn link(
        &mut self,
        handle: EntityHandle,
        relationship: &str,
        target: Option<EntityHandle>,
    ) -> Result<()> {
        self.instance(handle)?;
        let entity = self.registry.get(handle.entity);
        let rel = entity.relationship_index(relationship)?;
        if let Some(target) = target {
            let expected = self.registry.links(handle.entity)[rel].target;
            if target.entity != expected {
                return Err(CacheError::TypeMismatch(format!(
                    "relationship '{}.{}' targets '{}', got an instance of '{}'",
                    entity.name(),
                    relationship,
                    self.registry.get(expected).name(),
                    self.registry.get(target.entity).name()
                )));
            }
            self.instance(target)?;
        }
        self.type_cache_mut(handle.entity)?.instances[handle.slot].related[rel] = target;
        Ok(())
    }

    /// The instance a relationship of `handle` refers to.
    ///
    /// An explicit link wins; otherwise the target is looked up through its
    /// own cache by the foreign-key values. Unset foreign keys yield `None`.
    pub fn related(&mut self, handle: EntityHandle, relationship: &str) -> Result<Option<EntityHandle>> {
        let instance = self.instance(handle)?;
        let rel = self.registry.get(handle.entity).relationship_index(relationship)?;
        if let Some(target) = instance.related[rel] {
            self.instance(target)?;
            return Ok(Some(target));
        }

        let link = &self.registry.links(handle.entity)[rel];
        let target = self.registry.get(link.target);
        let mut attrs = Attrs::new();
        for (local, remote) in link.local.iter().zip(&link.remote) {
            let value = &instance.values[*local];
            if value.is_null() {
                return Ok(None);
            }
            attrs = attrs.with(target.attributes()[*remote].name.clone(), value.clone());
        }

        let name = target.name().to_string();
        self.get(&name, attrs)
    }

    /// Drops every cached list and index. Handles issued so far become
    /// invalid.
    pub fn clear(&mut self) {
        for cache in self.types.iter_mut() {
            *cache = None;
        }
        self.generation += 1;
        self.log(Level::Debug, format_args!("Cache cleared"));
        if self.config.check_memory_usage {
            self.log_memory_usage();
        }
    }

    /// Number of cached instances of `entity`, without loading it.
    pub fn len(&self, entity: &str) -> Result<usize> {
        let id = self.registry.resolve(entity)?;
        Ok(self.types[id.index()]
            .as_ref()
            .map_or(0, |cache| cache.instances.len()))
    }

    pub fn is_loaded(&self, entity: &str) -> Result<bool> {
        let id = self.registry.resolve(entity)?;
        Ok(self.types[id.index()].is_some())
    }

    fn lookup(&mut self, id: EntityTypeId, attrs: &Attrs) -> Result<Vec<usize>> {
        let entity = self.registry.get(id);
        let resolved = attrs.resolve(entity)?;
        let key = AttributeKey::new(
            resolved
                .iter()
                .map(|(idx, _)| (*idx, entity.attributes()[*idx].name.as_str()))
                .collect(),
        );
        let instance_key: Vec<Value> = key
            .positions()
            .iter()
            .map(|pos| {
                resolved
                    .iter()
                    .find(|(idx, _)| idx == pos)
                    .map(|(_, value)| value.clone())
                    .unwrap_or(Value::Null)
            })
            .collect();

        self.ensure_loaded(id)?;
        let cache = self.type_cache_mut(id)?;
        let index = cache.indices.get_or_build(key, &cache.instances);
        Ok(index.lookup(&instance_key).to_vec())
    }

    fn create_instance(&mut self, id: EntityTypeId, attrs: &Attrs) -> Result<EntityHandle> {
        let entity = self.registry.get(id);
        let mut values = vec![Value::Null; entity.attributes().len()];
        for (idx, value) in attrs.resolve(entity)? {
            values[idx] = value;
        }
        let relationships = entity.relationships().len();

        self.ensure_loaded(id)?;
        let cache = self.type_cache_mut(id)?;
        let slot = cache.instances.len();
        cache.indices.insert(slot, &values);
        cache.instances.push(Instance::created(values, relationships));
        Ok(self.handle(id, slot))
    }

    fn handle(&self, entity: EntityTypeId, slot: usize) -> EntityHandle {
        EntityHandle {
            entity,
            slot,
            generation: self.generation,
        }
    }

    fn instance(&self, handle: EntityHandle) -> Result<&Instance> {
        let invalidated = || {
            CacheError::InvalidatedInstance(self.registry.get(handle.entity).name().to_string())
        };
        if handle.generation != self.generation {
            return Err(invalidated());
        }
        self.types
            .get(handle.entity.index())
            .and_then(Option::as_ref)
            .and_then(|cache| cache.instances.get(handle.slot))
            .ok_or_else(invalidated)
    }

    fn type_cache_mut(&mut self, id: EntityTypeId) -> Result<&mut TypeCache> {
        let name = self.registry.get(id).name();
        self.types[id.index()]
            .as_mut()
            .ok_or_else(|| CacheError::InvalidatedInstance(name.to_string()))
    }

    /// Sends a message to the configured log target, if any.
    fn log(&self, level: Level, message: std::fmt::Arguments<'_>) {
        if let Some(target) = &self.config.log_target {
            log::log!(target: target.as_str(), level, "{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::schema::EntityType;
    use crate::store::MemoryStore;

    fn cache() -> EntityCache<MemoryStore> {
        let registry = Arc::new(
            EntityRegistry::new(vec![
                EntityType::builder("PlainModel")
                    .primary_key("id", DataType::Text)
                    .attribute("titel", DataType::Text)
                    .build()
                    .unwrap(),
            ])
            .unwrap(),
        );
        let store = MemoryStore::with_schema(&registry).unwrap();
        EntityCache::new(registry, CacheConfig::new(["PlainModel"]), store).unwrap()
    }

    #[test]
    fn test_create_then_find() {
        let mut cache = cache();
        let created = cache.create("PlainModel", [("id", "1"), ("titel", "foo")]).unwrap();

        assert_eq!(cache.find("PlainModel", [("titel", "foo")]).unwrap(), vec![created]);
        assert_eq!(cache.get("PlainModel", [("id", "1")]).unwrap(), Some(created));
        assert_eq!(cache.status(created).unwrap(), InstanceStatus::New);
    }

    #[test]
    fn test_unknown_names_fail_fast() {
        let mut cache = cache();
        assert!(matches!(
            cache.find("Nope", Attrs::new()),
            Err(CacheError::UnknownEntity(_))
        ));
        assert!(matches!(
            cache.find("PlainModel", [("title", "foo")]),
            Err(CacheError::UnknownAttribute { .. })
        ));
        assert_eq!(cache.store().stats().unwrap().loads, 0);
    }

    #[test]
    fn test_set_short_circuits_equal_values() {
        let mut cache = cache();
        let created = cache.create("PlainModel", [("id", "1")]).unwrap();
        cache.find("PlainModel", [("titel", "foo")]).unwrap();

        cache.set(created, "titel", Value::Null).unwrap();
        assert!(cache.find("PlainModel", [("titel", "foo")]).unwrap().is_empty());

        cache.set(created, "titel", "foo").unwrap();
        assert_eq!(cache.find("PlainModel", [("titel", "foo")]).unwrap(), vec![created]);
    }

    #[test]
    fn test_handles_die_with_clear() {
        let mut cache = cache();
        let created = cache.create("PlainModel", [("id", "1")]).unwrap();
        cache.clear();

        assert!(matches!(
            cache.value(created, "id"),
            Err(CacheError::InvalidatedInstance(_))
        ));
        assert!(matches!(
            cache.set(created, "titel", "x"),
            Err(CacheError::InvalidatedInstance(_))
        ));
        assert_eq!(cache.len("PlainModel").unwrap(), 0);
        assert!(!cache.is_loaded("PlainModel").unwrap());
    }
}
