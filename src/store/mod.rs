//! The backing relational store, seen from the cache.
//!
//! The cache only ever talks to a store through [`BackingStore`]; the
//! in-memory [`MemoryStore`] is the reference implementation used by the
//! tests and the benchmark binary.

pub mod memory;
pub mod table;

pub use memory::{MemoryStore, StoreOperation};
pub use table::Table;

use crate::config::PreloadMode;
use crate::core::{Result, Row};
use crate::filter::Filter;
use crate::schema::EntityType;
use serde::Serialize;

/// One type-scoped read.
///
/// Rows come back in attribute declaration order. When `columns` is set,
/// attributes outside the projection come back as `Null`.
#[derive(Debug, Clone)]
pub struct LoadQuery<'a> {
    pub entity: &'a EntityType,
    pub mode: PreloadMode,
    pub columns: Option<&'a [String]>,
    pub filter: Option<&'a Filter>,
    /// Related types to read in the same round-trip.
    pub prefetch: Vec<LoadQuery<'a>>,
}

impl<'a> LoadQuery<'a> {
    pub fn full(entity: &'a EntityType) -> Self {
        Self {
            entity,
            mode: PreloadMode::Full,
            columns: None,
            filter: None,
            prefetch: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub rows: Vec<Row>,
    /// One entry per `LoadQuery::prefetch` element, in the same order.
    pub prefetched: Vec<LoadResult>,
}

/// Record of an existing row to rewrite: the identity it was loaded under
/// and its current attribute values.
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub key: Row,
    pub values: Row,
}

/// Round-trip counters, one per store call kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub loads: usize,
    pub sequence_draws: usize,
    pub bulk_inserts: usize,
    pub bulk_updates: usize,
    pub bulk_loads: usize,
    pub flushes: usize,
    pub commits: usize,
}

/// A blocking handle to the relational store.
///
/// Every method is one round-trip. Errors are returned unchanged to the
/// cache's caller; implementations must not retry on their own.
pub trait BackingStore {
    fn load(&mut self, query: &LoadQuery<'_>) -> Result<LoadResult>;

    /// Draws exactly `count` values from a named sequence.
    fn next_sequence_values(&mut self, sequence: &str, count: usize) -> Result<Vec<i64>>;

    /// Inserts new records (attribute-ordered rows) into every table of the type.
    fn bulk_insert(&mut self, entity: &EntityType, rows: Vec<Row>) -> Result<()>;

    fn bulk_update(&mut self, entity: &EntityType, records: Vec<UpdateRecord>) -> Result<()>;

    /// Native bulk-load of pre-built physical rows into one table.
    ///
    /// The stream is consumed until exhausted or until it yields an error,
    /// which aborts the load of that table. Returns the number of rows loaded.
    fn bulk_load(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &mut dyn Iterator<Item = Result<Row>>,
    ) -> Result<usize>;

    /// Pushes pending writes for one entity type to the store.
    fn flush(&mut self, entity: &EntityType) -> Result<()>;

    fn commit(&mut self) -> Result<()>;
}

impl<S: BackingStore + ?Sized> BackingStore for &mut S {
    fn load(&mut self, query: &LoadQuery<'_>) -> Result<LoadResult> {
        (**self).load(query)
    }

    fn next_sequence_values(&mut self, sequence: &str, count: usize) -> Result<Vec<i64>> {
        (**self).next_sequence_values(sequence, count)
    }

    fn bulk_insert(&mut self, entity: &EntityType, rows: Vec<Row>) -> Result<()> {
        (**self).bulk_insert(entity, rows)
    }

    fn bulk_update(&mut self, entity: &EntityType, records: Vec<UpdateRecord>) -> Result<()> {
        (**self).bulk_update(entity, records)
    }

    fn bulk_load(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &mut dyn Iterator<Item = Result<Row>>,
    ) -> Result<usize> {
        (**self).bulk_load(table, columns, rows)
    }

    fn flush(&mut self, entity: &EntityType) -> Result<()> {
        (**self).flush(entity)
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }
}
