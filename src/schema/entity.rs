use crate::core::{CacheError, Column, DataType, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A declared, typed attribute of an entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub data_type: DataType,
    pub primary_key: bool,
    pub default: Option<Value>,
}

/// A many-to-one reference from one entity type to another.
///
/// `pairs` holds `(local_attribute, remote_attribute)` tuples: the local
/// attributes are the foreign-key scalars, the remote ones the referenced
/// identity attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    pub pairs: Vec<(String, String)>,
}

/// Maps one attribute onto a physical column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub attribute: String,
    pub column: Column,
}

/// One physical table backing (part of) an entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapping {
    pub name: String,
    pub columns: Vec<ColumnMapping>,
}

impl TableMapping {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Adds a column stored under the given physical definition.
    pub fn column(mut self, attribute: impl Into<String>, column: Column) -> Self {
        self.columns.push(ColumnMapping {
            attribute: attribute.into(),
            column,
        });
        self
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.column.name.clone()).collect()
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(|c| c.column.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityType {
    name: String,
    attributes: Vec<Attribute>,
    relationships: Vec<Relationship>,
    tables: Vec<TableMapping>,
}

impl EntityType {
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            tables: Vec::new(),
            table_specs: Vec::new(),
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn require_attribute(&self, name: &str) -> Result<usize> {
        self.attribute_index(name)
            .ok_or_else(|| CacheError::UnknownAttribute {
                entity: self.name.clone(),
                attribute: name.to_string(),
            })
    }

    /// Positions of the identity attributes, in declaration order.
    pub fn primary_key(&self) -> Vec<usize> {
        self.attributes
            .iter()
            .enumerate()
            .filter(|(_, a)| a.primary_key)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn relationship_index(&self, name: &str) -> Result<usize> {
        self.relationships
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| CacheError::UnknownRelationship {
                entity: self.name.clone(),
                relationship: name.to_string(),
            })
    }

    pub fn tables(&self) -> &[TableMapping] {
        &self.tables
    }

    pub(crate) fn tables_mut(&mut self) -> &mut [TableMapping] {
        &mut self.tables
    }
}

pub struct EntityTypeBuilder {
    name: String,
    attributes: Vec<Attribute>,
    relationships: Vec<Relationship>,
    tables: Vec<TableMapping>,
    table_specs: Vec<(String, Vec<String>)>,
    error: Option<CacheError>,
}

impl EntityTypeBuilder {
    pub fn attribute(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            data_type,
            primary_key: false,
            default: None,
        });
        self
    }

    pub fn primary_key(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            data_type,
            primary_key: true,
            default: None,
        });
        self
    }

    /// Declares the insert-time default of an already declared attribute.
    pub fn default(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if let Some(attribute) = self.attributes.iter_mut().find(|a| a.name == name) {
            attribute.default = Some(value);
        } else if self.error.is_none() {
            self.error = Some(CacheError::UnknownAttribute {
                entity: self.name.clone(),
                attribute: name.to_string(),
            });
        }
        self
    }

    pub fn relationship(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        pairs: &[(&str, &str)],
    ) -> Self {
        self.relationships.push(Relationship {
            name: name.into(),
            target: target.into(),
            pairs: pairs
                .iter()
                .map(|(local, remote)| (local.to_string(), remote.to_string()))
                .collect(),
        });
        self
    }

    /// Maps the listed attributes onto a table, one same-named column each.
    /// Primary-key attributes are added to every table automatically.
    pub fn table(mut self, name: impl Into<String>, attributes: &[&str]) -> Self {
        self.table_specs.push((
            name.into(),
            attributes.iter().map(|a| a.to_string()).collect(),
        ));
        self
    }

    /// Adds a table with explicit physical column definitions.
    pub fn mapped_table(mut self, table: TableMapping) -> Self {
        self.tables.push(table);
        self
    }

    pub fn build(self) -> Result<EntityType> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut seen = HashSet::new();
        for attribute in &self.attributes {
            if !seen.insert(attribute.name.as_str()) {
                return Err(CacheError::DuplicateAttribute(attribute.name.clone()));
            }
            if let Some(default) = &attribute.default
                && !attribute.data_type.is_compatible(default)
            {
                return Err(CacheError::TypeMismatch(format!(
                    "default of '{}.{}' expects {}, got {}",
                    self.name,
                    attribute.name,
                    attribute.data_type,
                    default.type_name()
                )));
            }
        }
        if !self.attributes.iter().any(|a| a.primary_key) {
            return Err(CacheError::InvalidConfig(format!(
                "entity type '{}' declares no primary key",
                self.name
            )));
        }

        let mut entity = EntityType {
            name: self.name,
            attributes: self.attributes,
            relationships: self.relationships,
            tables: self.tables,
        };

        for (table_name, attributes) in self.table_specs {
            let mut table = TableMapping::new(table_name);
            let pk_first = entity
                .attributes
                .iter()
                .filter(|a| a.primary_key && !attributes.contains(&a.name))
                .map(|a| a.name.clone())
                .collect::<Vec<_>>();
            for name in pk_first.iter().chain(attributes.iter()) {
                let idx = entity.require_attribute(name)?;
                table = table.column(name.clone(), default_column(&entity.attributes[idx]));
            }
            entity.tables.push(table);
        }

        if entity.tables.is_empty() {
            let mut table = TableMapping::new(entity.name.to_lowercase());
            for attribute in &entity.attributes {
                table = table.column(attribute.name.clone(), default_column(attribute));
            }
            entity.tables.push(table);
        }

        for table in &entity.tables {
            for mapping in &table.columns {
                entity.require_attribute(&mapping.attribute)?;
            }
            for pk in entity.primary_key() {
                let name = &entity.attributes[pk].name;
                if !table.columns.iter().any(|c| &c.attribute == name) {
                    return Err(CacheError::InvalidConfig(format!(
                        "table '{}' of '{}' must carry primary key attribute '{}'",
                        table.name, entity.name, name
                    )));
                }
            }
        }

        Ok(entity)
    }
}

fn default_column(attribute: &Attribute) -> Column {
    let mut column = Column::new(attribute.name.clone(), attribute.data_type);
    if attribute.primary_key {
        column = column.primary_key();
    }
    if let Some(default) = &attribute.default {
        column = column.default_value(default.clone());
    }
    column
}
