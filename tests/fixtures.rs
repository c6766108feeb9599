#![allow(dead_code)]

use modelcache::{
    CacheConfig, Column, DataType, EntityCache, EntityRegistry, EntityType, MemoryStore, Result,
    Row, TableMapping, Value,
};
use std::sync::Arc;

pub const SAVE_ORDER: [&str; 5] = ["PlainModel", "SequenceModel", "LinkedModel", "Manager", "Reading"];

/// Entity types shared by the integration tests.
///
/// * `PlainModel`: text identity, `titel` defaults to `''`.
/// * `SequenceModel`: integer identity drawn from `sequence_model_id_seq`.
/// * `LinkedModel`: composite identity, part of it a reference to `SequenceModel`.
/// * `Manager`: spread over the `employee` and `manager` tables.
/// * `Reading`: text attribute stored in an integer column.
pub fn registry() -> Arc<EntityRegistry> {
    let types = vec![
        EntityType::builder("PlainModel")
            .primary_key("id", DataType::Text)
            .attribute("titel", DataType::Text)
            .default("titel", "")
            .build(),
        EntityType::builder("SequenceModel")
            .primary_key("id", DataType::Integer)
            .attribute("titel", DataType::Text)
            .build(),
        EntityType::builder("LinkedModel")
            .primary_key("id", DataType::Text)
            .primary_key("sequence_model_id", DataType::Integer)
            .relationship("sequence_model", "SequenceModel", &[("sequence_model_id", "id")])
            .build(),
        EntityType::builder("Manager")
            .primary_key("id", DataType::Integer)
            .attribute("name", DataType::Text)
            .attribute("budget", DataType::Float)
            .default("budget", 0.0)
            .table("employee", &["name"])
            .table("manager", &["budget"])
            .build(),
        EntityType::builder("Reading")
            .primary_key("id", DataType::Integer)
            .attribute("value", DataType::Text)
            .mapped_table(
                TableMapping::new("reading")
                    .column("id", Column::new("id", DataType::Integer).primary_key())
                    .column("value", Column::new("value", DataType::Integer)),
            )
            .build(),
    ];

    let types = types
        .into_iter()
        .collect::<Result<Vec<_>>>()
        .expect("fixture entity types are valid");
    Arc::new(EntityRegistry::new(types).expect("fixture registry is valid"))
}

pub fn config() -> CacheConfig {
    CacheConfig::new(SAVE_ORDER).sequence("SequenceModel", "id", "sequence_model_id_seq")
}

pub fn store(registry: &EntityRegistry) -> MemoryStore {
    let store = MemoryStore::with_schema(registry).expect("schema is created");
    store
        .create_sequence("sequence_model_id_seq", 1)
        .expect("sequence is created");
    store
}

/// A cache over a fresh store, plus a second handle to the same store.
pub fn setup_with(config: CacheConfig) -> (MemoryStore, EntityCache<MemoryStore>) {
    let registry = registry();
    let store = store(&registry);
    let cache = EntityCache::new(registry, config, store.clone()).expect("config is valid");
    (store, cache)
}

pub fn setup() -> (MemoryStore, EntityCache<MemoryStore>) {
    setup_with(config())
}

/// Inserts rows straight into the store, bypassing the cache.
pub fn seed(store: &MemoryStore, entity: &str, rows: Vec<Row>) {
    let registry = registry();
    let entity = registry.entity(entity).expect("fixture type exists");
    store.seed(entity, rows).expect("seed rows are valid");
}

pub fn plain(id: &str, titel: Option<&str>) -> Row {
    vec![Value::from(id), Value::from(titel)]
}
