use super::instance::Instance;
use crate::core::{Column, Result, Row, Value};
use crate::schema::{EntityType, TableMapping};
use crate::store::BackingStore;

/// Streams new instances into every physical table of their type through
/// the store's native bulk-load call, committing after each table.
///
/// Rows are built while the store consumes them. Store-side defaults are
/// not read back into the instances.
pub(super) fn stream_instances<S: BackingStore + ?Sized>(
    store: &mut S,
    entity: &EntityType,
    instances: &[&Instance],
) -> Result<usize> {
    let mut loaded = 0;
    for table in entity.tables() {
        let plan = column_plan(entity, table)?;
        let columns = table.column_names();
        let mut rows = instances.iter().map(|instance| build_row(&plan, &instance.values));

        loaded += store.bulk_load(&table.name, &columns, &mut rows)?;
        store.commit()?;
    }
    Ok(loaded)
}

/// Attribute position and column definition of every column, in table order.
fn column_plan<'a>(entity: &EntityType, table: &'a TableMapping) -> Result<Vec<(usize, &'a Column)>> {
    table
        .columns
        .iter()
        .map(|mapping| Ok((entity.require_attribute(&mapping.attribute)?, &mapping.column)))
        .collect()
}

fn build_row(plan: &[(usize, &Column)], values: &Row) -> Result<Row> {
    plan.iter()
        .map(|(idx, column)| {
            let value = match &values[*idx] {
                Value::Null => column.default.clone().unwrap_or(Value::Null),
                value => value.clone(),
            };
            if column.data_type.is_compatible(&value) {
                Ok(value)
            } else {
                column.data_type.cast(&value)
            }
        })
        .collect()
}
