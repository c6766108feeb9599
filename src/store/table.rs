use crate::core::{CacheError, Column, Result, Row, Value};
use std::collections::{BTreeMap, HashMap};

/// A physical table of the in-memory store.
///
/// Rows are kept in insertion order under a monotonically increasing row id,
/// with a unique index over the primary-key columns.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    rows: BTreeMap<usize, Row>,
    next_row_id: usize,
    primary_index: HashMap<Row, usize>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: BTreeMap::new(),
            next_row_id: 0,
            primary_index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.find_column_index(name).ok_or_else(|| {
            CacheError::Store(format!("Column '{}' not found in table '{}'", name, self.name))
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn scan(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    /// Fills defaults for NULLs, casts values to the column types and
    /// validates nullability.
    pub fn prepare(&self, mut row: Row) -> Result<Row> {
        if row.len() != self.columns.len() {
            return Err(CacheError::Store(format!(
                "Table '{}' expects {} columns, got {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(row.iter_mut()) {
            if value.is_null()
                && let Some(default) = &column.default
            {
                *value = default.clone();
            }
            *value = column.data_type.cast(value)?;
            column.validate(value)?;
        }
        Ok(row)
    }

    /// Validates a row that must already match the column types exactly.
    pub fn validate(&self, row: &Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(CacheError::Store(format!(
                "Table '{}' expects {} columns, got {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }

    pub fn primary_key_of(&self, row: &Row) -> Row {
        self.columns
            .iter()
            .zip(row.iter())
            .filter(|(column, _)| column.primary_key)
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.primary_key)
    }

    /// Casts a key tuple to the types of the primary-key columns.
    pub fn prepare_key(&self, key: Row) -> Result<Row> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .zip(key)
            .map(|(column, value)| column.data_type.cast(&value))
            .collect()
    }

    pub fn insert(&mut self, row: Row) -> Result<usize> {
        let key = self.primary_key_of(&row);
        if self.has_primary_key() && self.primary_index.contains_key(&key) {
            return Err(self.duplicate_key(&key));
        }

        let id = self.next_row_id;
        self.next_row_id += 1;
        if self.has_primary_key() {
            self.primary_index.insert(key, id);
        }
        self.rows.insert(id, row);
        Ok(id)
    }

    pub fn find_by_key(&self, key: &Row) -> Option<(usize, &Row)> {
        let id = *self.primary_index.get(key)?;
        self.rows.get(&id).map(|row| (id, row))
    }

    pub fn update(&mut self, id: usize, new_row: Row) -> Result<bool> {
        let Some(old_row) = self.rows.get(&id) else {
            return Ok(false);
        };
        let old_key = self.primary_key_of(old_row);
        let new_key = self.primary_key_of(&new_row);

        if old_key != new_key && self.has_primary_key() {
            if self.primary_index.contains_key(&new_key) {
                return Err(self.duplicate_key(&new_key));
            }
            self.primary_index.remove(&old_key);
            self.primary_index.insert(new_key, id);
        }
        self.rows.insert(id, new_row);
        Ok(true)
    }

    /// True if some row holds `value` in `column`.
    pub fn contains_value(&self, column: usize, value: &Value) -> bool {
        let key_columns: Vec<usize> = (0..self.columns.len())
            .filter(|idx| self.columns[*idx].primary_key)
            .collect();
        if key_columns == [column] {
            return self.primary_index.contains_key(&vec![value.clone()]);
        }
        self.rows.values().any(|row| &row[column] == value)
    }

    fn duplicate_key(&self, key: &Row) -> CacheError {
        let rendered = key.iter().map(Value::to_string).collect::<Vec<_>>().join(", ");
        CacheError::ConstraintViolation(format!(
            "Unique constraint violation: table '{}' already contains key ({})",
            self.name, rendered
        ))
    }
}
