use super::{BackingStore, LoadQuery, LoadResult, StoreStats, Table, UpdateRecord};
use crate::config::PreloadMode;
use crate::core::{CacheError, Column, Result, Row, Value};
use crate::filter::{Filter, FilterSubject};
use crate::schema::{EntityRegistry, EntityType, TableMapping};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Store calls that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Load,
    SequenceDraw,
    BulkInsert,
    BulkUpdate,
    BulkLoad,
    Flush,
    Commit,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<String, Table>,
    sequences: HashMap<String, i64>,
    stats: StoreStats,
    /// Table contents as of the last commit, taken by the first write after it.
    rollback_point: Option<HashMap<String, Table>>,
    injected_failures: HashSet<StoreOperation>,
}

/// An in-memory relational store.
///
/// Cloning yields another handle to the same tables, so a test can keep one
/// handle while the cache owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding every table of the registry's entity types.
    pub fn with_schema(registry: &EntityRegistry) -> Result<Self> {
        let store = Self::new();
        store.create_schema(registry)?;
        Ok(store)
    }

    pub fn create_schema(&self, registry: &EntityRegistry) -> Result<()> {
        for (_, entity) in registry.iter() {
            for mapping in entity.tables() {
                self.create_table(
                    &mapping.name,
                    mapping.columns.iter().map(|c| c.column.clone()).collect(),
                )?;
            }
        }
        Ok(())
    }

    pub fn create_table(&self, name: &str, columns: Vec<Column>) -> Result<()> {
        let mut state = self.lock()?;
        if state.tables.contains_key(name) {
            return Err(CacheError::Store(format!("Table '{}' already exists", name)));
        }
        state.tables.insert(name.to_string(), Table::new(name, columns));
        Ok(())
    }

    /// Creates a sequence whose first drawn value is `start`.
    pub fn create_sequence(&self, name: &str, start: i64) -> Result<()> {
        self.lock()?.sequences.insert(name.to_string(), start);
        Ok(())
    }

    /// Inserts rows outside of any counted round-trip, for test setup.
    pub fn seed(&self, entity: &EntityType, rows: Vec<Row>) -> Result<()> {
        let mut state = self.lock()?;
        for row in rows {
            state.insert_entity_row(entity, &row)?;
        }
        Ok(())
    }

    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self.lock()?.table(table)?.scan().cloned().collect())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.lock()?.table(table)?.row_count())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.lock()?.stats.clone())
    }

    /// True while writes are pending a commit.
    pub fn in_transaction(&self) -> Result<bool> {
        Ok(self.lock()?.rollback_point.is_some())
    }

    /// Discards every write since the last commit.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(tables) = state.rollback_point.take() {
            state.tables = tables;
        }
        Ok(())
    }

    /// Makes the next call of the given kind fail with a store error.
    pub fn fail_next(&self, operation: StoreOperation) -> Result<()> {
        self.lock()?.injected_failures.insert(operation);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        Ok(self.state.lock()?)
    }
}

impl BackingStore for MemoryStore {
    fn load(&mut self, query: &LoadQuery<'_>) -> Result<LoadResult> {
        let mut state = self.lock()?;
        state.enter(StoreOperation::Load)?;
        state.load(query)
    }

    fn next_sequence_values(&mut self, sequence: &str, count: usize) -> Result<Vec<i64>> {
        let mut state = self.lock()?;
        state.enter(StoreOperation::SequenceDraw)?;
        let next = state
            .sequences
            .get_mut(sequence)
            .ok_or_else(|| CacheError::SequenceNotFound(sequence.to_string()))?;
        let start = *next;
        *next += count as i64;
        Ok((start..start + count as i64).collect())
    }

    fn bulk_insert(&mut self, entity: &EntityType, rows: Vec<Row>) -> Result<()> {
        let mut state = self.lock()?;
        state.enter(StoreOperation::BulkInsert)?;
        state.begin_write();
        for row in rows {
            state.insert_entity_row(entity, &row)?;
        }
        Ok(())
    }

    fn bulk_update(&mut self, entity: &EntityType, records: Vec<UpdateRecord>) -> Result<()> {
        let mut state = self.lock()?;
        state.enter(StoreOperation::BulkUpdate)?;
        state.begin_write();
        for record in records {
            state.update_entity_row(entity, &record)?;
        }
        Ok(())
    }

    fn bulk_load(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &mut dyn Iterator<Item = Result<Row>>,
    ) -> Result<usize> {
        let mut state = self.lock()?;
        state.enter(StoreOperation::BulkLoad)?;

        let mut staged = state.table(table)?.clone();
        let positions = columns
            .iter()
            .map(|name| staged.require_column(name))
            .collect::<Result<Vec<_>>>()?;

        let mut loaded = 0;
        for row in rows {
            let row = row?;
            if row.len() != positions.len() {
                return Err(CacheError::Store(format!(
                    "bulk load into '{}' expects {} values per row, got {}",
                    table,
                    positions.len(),
                    row.len()
                )));
            }

            let mut full: Row = staged
                .columns()
                .iter()
                .map(|c| c.default.clone().unwrap_or(Value::Null))
                .collect();
            for (position, value) in positions.iter().zip(row) {
                full[*position] = value;
            }

            staged.validate(&full)?;
            state.check_references(staged.columns(), &full, Some(&staged))?;
            staged.insert(full)?;
            loaded += 1;
        }

        state.begin_write();
        state.tables.insert(table.to_string(), staged);
        Ok(loaded)
    }

    fn flush(&mut self, _entity: &EntityType) -> Result<()> {
        self.lock()?.enter(StoreOperation::Flush)
    }

    fn commit(&mut self) -> Result<()> {
        let mut state = self.lock()?;
        state.enter(StoreOperation::Commit)?;
        state.rollback_point = None;
        Ok(())
    }
}

impl StoreState {
    fn enter(&mut self, operation: StoreOperation) -> Result<()> {
        let counter = match operation {
            StoreOperation::Load => &mut self.stats.loads,
            StoreOperation::SequenceDraw => &mut self.stats.sequence_draws,
            StoreOperation::BulkInsert => &mut self.stats.bulk_inserts,
            StoreOperation::BulkUpdate => &mut self.stats.bulk_updates,
            StoreOperation::BulkLoad => &mut self.stats.bulk_loads,
            StoreOperation::Flush => &mut self.stats.flushes,
            StoreOperation::Commit => &mut self.stats.commits,
        };
        *counter += 1;

        if self.injected_failures.remove(&operation) {
            return Err(CacheError::Store(format!("injected {:?} failure", operation)));
        }
        Ok(())
    }

    fn begin_write(&mut self) {
        if self.rollback_point.is_none() {
            self.rollback_point = Some(self.tables.clone());
        }
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| CacheError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| CacheError::TableNotFound(name.to_string()))
    }

    fn load(&self, query: &LoadQuery<'_>) -> Result<LoadResult> {
        let rows = match query.mode {
            PreloadMode::Empty => Vec::new(),
            PreloadMode::Full => self.scan_entity(query.entity, query.columns, query.filter)?,
        };
        let prefetched = query
            .prefetch
            .iter()
            .map(|related| self.load(related))
            .collect::<Result<Vec<_>>>()?;
        Ok(LoadResult { rows, prefetched })
    }

    /// Joins every table of the entity on its primary key.
    fn scan_entity(
        &self,
        entity: &EntityType,
        columns: Option<&[String]>,
        filter: Option<&Filter>,
    ) -> Result<Vec<Row>> {
        let Some((primary, secondary)) = entity.tables().split_first() else {
            return Ok(Vec::new());
        };
        let primary_key = entity.primary_key();
        let mut rows = Vec::new();

        'rows: for physical in self.table(&primary.name)?.scan() {
            let mut row = vec![Value::Null; entity.attributes().len()];
            fill_attributes(entity, primary, physical, &mut row)?;

            let key: Row = primary_key.iter().map(|idx| row[*idx].clone()).collect();
            for mapping in secondary {
                let table_key = table_key(entity, mapping, &key)?;
                let Some((_, joined)) = self.table(&mapping.name)?.find_by_key(&table_key) else {
                    continue 'rows;
                };
                fill_attributes(entity, mapping, joined, &mut row)?;
            }

            if let Some(filter) = filter
                && !filter.matches(&AttributeRow { entity, row: &row })?
            {
                continue;
            }

            if let Some(columns) = columns {
                for (idx, attribute) in entity.attributes().iter().enumerate() {
                    if !columns.contains(&attribute.name) {
                        row[idx] = Value::Null;
                    }
                }
            }
            rows.push(row);
        }

        Ok(rows)
    }

    fn insert_entity_row(&mut self, entity: &EntityType, row: &Row) -> Result<()> {
        for mapping in entity.tables() {
            let physical = physical_row(entity, mapping, row)?;
            let prepared = self.table(&mapping.name)?.prepare(physical)?;
            let columns = self.table(&mapping.name)?.columns().to_vec();
            self.check_references(&columns, &prepared, None)?;
            self.table_mut(&mapping.name)?.insert(prepared)?;
        }
        Ok(())
    }

    fn update_entity_row(&mut self, entity: &EntityType, record: &UpdateRecord) -> Result<()> {
        for mapping in entity.tables() {
            let key = table_key(entity, mapping, &record.key)?;
            let physical = physical_row(entity, mapping, &record.values)?;
            let table = self.table(&mapping.name)?;
            let prepared = table.prepare(physical)?;
            let key = table.prepare_key(key)?;
            let Some((id, _)) = table.find_by_key(&key) else {
                return Err(CacheError::Store(format!(
                    "no row in '{}' with key ({}) to update",
                    mapping.name,
                    render(&key)
                )));
            };
            let columns = table.columns().to_vec();
            self.check_references(&columns, &prepared, None)?;
            self.table_mut(&mapping.name)?.update(id, prepared)?;
        }
        Ok(())
    }

    fn check_references(&self, columns: &[Column], row: &Row, staged: Option<&Table>) -> Result<()> {
        for (column, value) in columns.iter().zip(row.iter()) {
            let Some(reference) = &column.references else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            let target = match staged {
                Some(table) if table.name() == reference.table => table,
                _ => self.table(&reference.table)?,
            };
            let position = target.require_column(&reference.column)?;
            let value = target.columns()[position].data_type.cast(value)?;
            if !target.contains_value(position, &value) {
                return Err(CacheError::ConstraintViolation(format!(
                    "Column '{}' references non-existent key {} in '{}'",
                    column.name, value, reference.table
                )));
            }
        }
        Ok(())
    }
}

struct AttributeRow<'a> {
    entity: &'a EntityType,
    row: &'a Row,
}

impl FilterSubject for AttributeRow<'_> {
    fn attribute(&self, name: &str) -> Option<&Value> {
        self.entity.attribute_index(name).map(|idx| &self.row[idx])
    }
}

fn fill_attributes(
    entity: &EntityType,
    mapping: &TableMapping,
    physical: &Row,
    row: &mut Row,
) -> Result<()> {
    for (column, value) in mapping.columns.iter().zip(physical.iter()) {
        let idx = entity.require_attribute(&column.attribute)?;
        row[idx] = entity.attributes()[idx].data_type.cast(value)?;
    }
    Ok(())
}

fn physical_row(entity: &EntityType, mapping: &TableMapping, row: &Row) -> Result<Row> {
    mapping
        .columns
        .iter()
        .map(|column| Ok(row[entity.require_attribute(&column.attribute)?].clone()))
        .collect()
}

/// Orders an entity identity tuple the way the table's key columns expect it.
fn table_key(entity: &EntityType, mapping: &TableMapping, key: &Row) -> Result<Row> {
    let primary_key = entity.primary_key();
    mapping
        .columns
        .iter()
        .filter(|c| c.column.primary_key)
        .map(|column| {
            let idx = entity.require_attribute(&column.attribute)?;
            let position = primary_key.iter().position(|pk| *pk == idx).ok_or_else(|| {
                CacheError::Store(format!(
                    "key column '{}' of '{}' is not an identity attribute",
                    column.column.name, mapping.name
                ))
            })?;
            Ok(key[position].clone())
        })
        .collect()
}

fn render(row: &Row) -> String {
    row.iter().map(Value::to_string).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    fn registry() -> EntityRegistry {
        EntityRegistry::new(vec![
            EntityType::builder("Author")
                .primary_key("id", DataType::Integer)
                .attribute("name", DataType::Text)
                .build()
                .unwrap(),
            EntityType::builder("Book")
                .primary_key("id", DataType::Integer)
                .attribute("author_id", DataType::Integer)
                .attribute("title", DataType::Text)
                .relationship("author", "Author", &[("author_id", "id")])
                .build()
                .unwrap(),
            EntityType::builder("Manager")
                .primary_key("id", DataType::Integer)
                .attribute("name", DataType::Text)
                .attribute("budget", DataType::Float)
                .table("employee", &["name"])
                .table("manager", &["budget"])
                .build()
                .unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_load_applies_filter_and_projection() {
        let registry = registry();
        let mut store = MemoryStore::with_schema(&registry).unwrap();
        let author = registry.entity("Author").unwrap();
        store
            .seed(author, vec![vec![1.into(), "Ann".into()], vec![2.into(), "Bob".into()]])
            .unwrap();

        let filter = Filter::equals("name", "Bob");
        let columns = vec!["id".to_string()];
        let query = LoadQuery {
            columns: Some(&columns),
            filter: Some(&filter),
            ..LoadQuery::full(author)
        };
        let result = store.load(&query).unwrap();

        assert_eq!(result.rows, vec![vec![Value::Integer(2), Value::Null]]);
        assert_eq!(store.stats().unwrap().loads, 1);
    }

    #[test]
    fn test_empty_mode_reads_nothing_but_counts() {
        let registry = registry();
        let mut store = MemoryStore::with_schema(&registry).unwrap();
        let author = registry.entity("Author").unwrap();
        store.seed(author, vec![vec![1.into(), "Ann".into()]]).unwrap();

        let query = LoadQuery {
            mode: PreloadMode::Empty,
            ..LoadQuery::full(author)
        };
        assert!(store.load(&query).unwrap().rows.is_empty());
        assert_eq!(store.stats().unwrap().loads, 1);
    }

    #[test]
    fn test_joined_tables_round_trip() {
        let registry = registry();
        let mut store = MemoryStore::with_schema(&registry).unwrap();
        let manager = registry.entity("Manager").unwrap();
        store
            .bulk_insert(manager, vec![vec![7.into(), "Eve".into(), 1.5.into()]])
            .unwrap();

        assert_eq!(store.rows("employee").unwrap(), vec![vec![Value::Integer(7), "Eve".into()]]);
        assert_eq!(store.rows("manager").unwrap(), vec![vec![Value::Integer(7), 1.5.into()]]);

        store
            .bulk_update(
                manager,
                vec![UpdateRecord {
                    key: vec![7.into()],
                    values: vec![8.into(), "Eve".into(), 2.0.into()],
                }],
            )
            .unwrap();
        let rows = store.load(&LoadQuery::full(manager)).unwrap().rows;
        assert_eq!(rows, vec![vec![Value::Integer(8), "Eve".into(), Value::Float(2.0)]]);
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let registry = registry();
        let mut store = MemoryStore::with_schema(&registry).unwrap();
        let book = registry.entity("Book").unwrap();

        let orphan = store.bulk_insert(book, vec![vec![1.into(), 99.into(), "Lost".into()]]);
        assert!(matches!(orphan, Err(CacheError::ConstraintViolation(_))));
    }

    #[test]
    fn test_sequences_and_rollback() {
        let registry = registry();
        let mut store = MemoryStore::with_schema(&registry).unwrap();
        store.create_sequence("author_id_seq", 10).unwrap();

        assert_eq!(store.next_sequence_values("author_id_seq", 3).unwrap(), vec![10, 11, 12]);
        assert_eq!(store.next_sequence_values("author_id_seq", 1).unwrap(), vec![13]);
        assert!(matches!(
            store.next_sequence_values("missing", 1),
            Err(CacheError::SequenceNotFound(_))
        ));

        let author = registry.entity("Author").unwrap();
        store.bulk_insert(author, vec![vec![1.into(), "Ann".into()]]).unwrap();
        assert!(store.in_transaction().unwrap());
        store.rollback().unwrap();
        assert_eq!(store.row_count("author").unwrap(), 0);
    }

    #[test]
    fn test_bulk_load_is_atomic_per_table() {
        let registry = registry();
        let mut store = MemoryStore::with_schema(&registry).unwrap();
        let columns = vec!["id".to_string(), "name".to_string()];
        let mut rows = vec![
            Ok(vec![Value::Integer(1), Value::from("Ann")]),
            Err(CacheError::TypeMismatch("bad row".into())),
        ]
        .into_iter();

        assert!(store.bulk_load("author", &columns, &mut rows).is_err());
        assert_eq!(store.row_count("author").unwrap(), 0);
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let registry = registry();
        let mut store = MemoryStore::with_schema(&registry).unwrap();
        store.fail_next(StoreOperation::Commit).unwrap();

        assert!(matches!(store.commit(), Err(CacheError::Store(_))));
        assert!(store.commit().is_ok());
        assert_eq!(store.stats().unwrap().commits, 2);
    }
}
