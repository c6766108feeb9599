use super::bulk_load::stream_instances;
use super::instance::{Instance, Origin};
use super::EntityCache;
use crate::core::{CacheError, Result, Value};
use crate::store::{BackingStore, UpdateRecord};
use log::Level;
use serde::Serialize;
use std::sync::Arc;
use tracing::{Level as TraceLevel, event, info_span};

/// What one flush wrote, per entity type in save order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub types: Vec<TypeFlush>,
    /// Values drawn from store sequences.
    pub sequence_values: usize,
    pub streamed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeFlush {
    pub entity: String,
    pub inserted: usize,
    pub updated: usize,
}

impl FlushReport {
    pub fn inserted(&self) -> usize {
        self.types.iter().map(|t| t.inserted).sum()
    }

    pub fn updated(&self) -> usize {
        self.types.iter().map(|t| t.updated).sum()
    }
}

impl<S: BackingStore> EntityCache<S> {
    /// Writes every pending change to the store and resets the cache.
    ///
    /// Sequence-backed attributes that are still unset get one batched draw
    /// per binding, unset foreign keys are filled from linked instances,
    /// then types are written in save order: new instances in one bulk
    /// insert (or the streaming loader), changed persistent ones in one bulk
    /// update, followed by one store flush per type.
    ///
    /// The cache is cleared whether or not the writes succeed; on error the
    /// store may hold a prefix of the writes, and every handle is
    /// invalidated either way. Callers needing all-or-nothing semantics
    /// roll back at the store level.
    pub fn flush(&mut self) -> Result<FlushReport> {
        let span = info_span!(
            "cache.flush",
            streaming = self.config.use_streaming_bulk_load,
            generation = self.generation
        );
        let _enter = span.enter();

        if self.config.check_memory_usage {
            self.log_memory_usage();
        }
        let result = self.write_changes();
        if let Err(err) = &result {
            event!(TraceLevel::ERROR, error = %err, "cache flush failed");
        }
        self.clear();
        result
    }

    /// Flushes through `store` instead of the cache's own store, e.g. a
    /// second connection to the same backend. The cache's store is put
    /// back afterwards, also when the flush fails.
    pub fn flush_with(&mut self, store: &mut S) -> Result<FlushReport> {
        std::mem::swap(&mut self.store, store);
        let result = self.flush();
        std::mem::swap(&mut self.store, store);
        result
    }

    fn write_changes(&mut self) -> Result<FlushReport> {
        let mut report = FlushReport {
            sequence_values: self.assign_sequences()?,
            ..FlushReport::default()
        };
        self.sync_relationships()?;
        self.warn_unordered_types();

        let registry = Arc::clone(&self.registry);
        for name in &self.config.save_order {
            let id = registry.resolve(name)?;
            let Some(cache) = self.types[id.index()].as_ref() else {
                continue;
            };
            let entity = registry.get(id);

            let (new, existing): (Vec<&Instance>, Vec<&Instance>) = cache
                .instances
                .iter()
                .filter(|instance| instance.origin != Origin::Projection)
                .partition(|instance| instance.persisted_key.is_none());
            let updates: Vec<UpdateRecord> = existing
                .into_iter()
                .filter(|instance| instance.dirty)
                .filter_map(|instance| {
                    Some(UpdateRecord {
                        key: instance.persisted_key.clone()?,
                        values: instance.values.clone(),
                    })
                })
                .collect();
            if new.is_empty() && updates.is_empty() {
                continue;
            }

            let written = TypeFlush {
                entity: name.clone(),
                inserted: new.len(),
                updated: updates.len(),
            };

            if !new.is_empty() {
                if self.config.use_streaming_bulk_load {
                    stream_instances(&mut self.store, entity, &new)?;
                    report.streamed = true;
                } else {
                    let rows = new.iter().map(|instance| instance.values.clone()).collect();
                    self.store.bulk_insert(entity, rows)?;
                }
            }
            if !updates.is_empty() {
                self.store.bulk_update(entity, updates)?;
            }
            self.store.flush(entity)?;

            event!(
                TraceLevel::INFO,
                entity = %name,
                inserted = written.inserted,
                updated = written.updated,
                "entity type written"
            );
            report.types.push(written);
        }

        if self.config.use_streaming_bulk_load {
            self.store.commit()?;
        }
        Ok(report)
    }

    /// Fills unset sequence-backed attributes, one draw per binding.
    /// Returns the number of values drawn.
    fn assign_sequences(&mut self) -> Result<usize> {
        let registry = Arc::clone(&self.registry);
        let mut drawn = 0;

        for (name, bindings) in &self.config.sequences {
            let id = registry.resolve(name)?;
            let entity = registry.get(id);
            let Some(cache) = self.types[id.index()].as_mut() else {
                continue;
            };

            for binding in bindings {
                let attribute = entity.require_attribute(&binding.attribute)?;
                let pending: Vec<usize> = cache
                    .instances
                    .iter()
                    .enumerate()
                    .filter(|(_, instance)| {
                        instance.origin != Origin::Projection && instance.values[attribute].is_null()
                    })
                    .map(|(slot, _)| slot)
                    .collect();
                if pending.is_empty() {
                    continue;
                }

                let values = self.store.next_sequence_values(&binding.sequence, pending.len())?;
                if values.len() != pending.len() {
                    return Err(CacheError::Store(format!(
                        "sequence '{}' returned {} values, {} requested",
                        binding.sequence,
                        values.len(),
                        pending.len()
                    )));
                }
                for (slot, value) in pending.iter().zip(values) {
                    cache.assign(*slot, attribute, Value::Integer(value));
                }
                drawn += pending.len();
            }
        }

        Ok(drawn)
    }

    /// Copies identity values of linked instances into unset foreign-key
    /// attributes.
    fn sync_relationships(&mut self) -> Result<()> {
        let registry = Arc::clone(&self.registry);

        for (id, entity) in registry.iter() {
            let Some(cache) = self.types[id.index()].as_ref() else {
                continue;
            };

            let mut repairs = Vec::new();
            for (rel, link) in registry.links(id).iter().enumerate() {
                for (slot, instance) in cache.instances.iter().enumerate() {
                    let Some(target) = instance.related[rel] else {
                        continue;
                    };
                    for (local, remote) in link.local.iter().zip(&link.remote) {
                        if instance.values[*local].is_null() {
                            repairs.push((slot, *local, target, *remote));
                        }
                    }
                }
            }

            for (slot, local, target, remote) in repairs {
                let value = self.instance(target)?.values[remote].clone();
                self.type_cache_mut(id)?.assign(slot, local, value);
                self.log(
                    Level::Debug,
                    format_args!("Set {}.{} from related instance", entity.name(), entity.attributes()[local].name),
                );
            }
        }
        Ok(())
    }

    /// Types holding instances but missing from the save order are never
    /// written.
    fn warn_unordered_types(&self) {
        for (id, entity) in self.registry.iter() {
            let pending = self.types[id.index()]
                .as_ref()
                .is_some_and(|cache| cache.instances.iter().any(|i| i.origin != Origin::Projection));
            if pending && !self.config.save_order.iter().any(|name| name == entity.name()) {
                self.log(
                    Level::Warn,
                    format_args!("{} has cached instances but is not in save_order", entity.name()),
                );
            }
        }
    }
}
