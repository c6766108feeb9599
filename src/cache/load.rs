use super::instance::Instance;
use super::{EntityCache, TypeCache};
use crate::config::CacheConfig;
use crate::core::{Result, Row};
use crate::schema::{EntityRegistry, EntityTypeId};
use crate::store::{BackingStore, LoadQuery, LoadResult};
use log::Level;
use std::sync::Arc;

impl<S: BackingStore> EntityCache<S> {
    /// Initializes the instance list of `id` with one store read, unless
    /// that already happened since the last clear.
    ///
    /// Targets of the type's prefetched relationships travel in the same
    /// read and are installed too when they are not cached yet.
    pub(super) fn ensure_loaded(&mut self, id: EntityTypeId) -> Result<()> {
        if self.types[id.index()].is_some() {
            return Ok(());
        }

        let registry = Arc::clone(&self.registry);
        let targets = self.prefetch_targets(&registry, id)?;
        let mut query = query_for(&registry, &self.config, id);
        query.prefetch = targets
            .iter()
            .map(|target| query_for(&registry, &self.config, *target))
            .collect();

        let LoadResult { rows, prefetched } = self.store.load(&query)?;
        self.install(&registry, id, rows);
        for (target, result) in targets.into_iter().zip(prefetched) {
            if self.types[target.index()].is_none() {
                self.install(&registry, target, result.rows);
            }
        }
        Ok(())
    }

    fn prefetch_targets(&self, registry: &EntityRegistry, id: EntityTypeId) -> Result<Vec<EntityTypeId>> {
        let entity = registry.get(id);
        let Some(relationships) = self.config.prefetch.get(entity.name()) else {
            return Ok(Vec::new());
        };

        let mut targets = Vec::new();
        for relationship in relationships {
            let target = registry.links(id)[entity.relationship_index(relationship)?].target;
            if target != id && self.types[target.index()].is_none() && !targets.contains(&target) {
                targets.push(target);
            }
        }
        Ok(targets)
    }

    fn install(&mut self, registry: &EntityRegistry, id: EntityTypeId, rows: Vec<Row>) {
        let entity = registry.get(id);
        let projected = self.config.preload_columns.contains_key(entity.name());
        let instances: Vec<Instance> = rows
            .into_iter()
            .map(|row| Instance::loaded(entity, row, projected))
            .collect();

        self.log(
            Level::Debug,
            format_args!("Loaded {} {} instances", instances.len(), entity.name()),
        );
        self.types[id.index()] = Some(TypeCache {
            instances,
            indices: Default::default(),
        });
    }
}

/// The initial read of one type under its configured preload policy.
fn query_for<'a>(registry: &'a EntityRegistry, config: &'a CacheConfig, id: EntityTypeId) -> LoadQuery<'a> {
    let entity = registry.get(id);
    LoadQuery {
        entity,
        mode: config.mode_for(entity.name()),
        columns: config.preload_columns.get(entity.name()).map(Vec::as_slice),
        filter: config.preload_filter.get(entity.name()),
        prefetch: Vec::new(),
    }
}
