use super::{EntityType, Relationship};
use crate::core::{CacheError, Result};
use std::collections::HashMap;
use std::fmt;

/// Index of an entity type inside its [`EntityRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityTypeId(pub(crate) usize);

impl EntityTypeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A relationship with every name resolved to positions.
#[derive(Debug, Clone)]
pub struct RelationshipLink {
    pub target: EntityTypeId,
    pub local: Vec<usize>,
    pub remote: Vec<usize>,
}

/// The set of entity types a cache and its store agree on.
///
/// Passed explicitly to both at construction; there is no process-wide
/// registration.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    types: Vec<EntityType>,
    by_name: HashMap<String, EntityTypeId>,
    links: Vec<Vec<RelationshipLink>>,
}

impl EntityRegistry {
    pub fn new(types: Vec<EntityType>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for (idx, entity) in types.iter().enumerate() {
            if by_name
                .insert(entity.name().to_string(), EntityTypeId(idx))
                .is_some()
            {
                return Err(CacheError::InvalidConfig(format!(
                    "entity type '{}' registered twice",
                    entity.name()
                )));
            }
        }

        let mut registry = Self {
            types,
            by_name,
            links: Vec::new(),
        };
        registry.links = registry
            .types
            .iter()
            .map(|entity| {
                entity
                    .relationships()
                    .iter()
                    .map(|rel| registry.resolve_link(entity, rel))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        registry.infer_foreign_keys();

        Ok(registry)
    }

    fn resolve_link(&self, entity: &EntityType, rel: &Relationship) -> Result<RelationshipLink> {
        let target = self.resolve(&rel.target)?;
        let target_type = self.get(target);
        if rel.pairs.is_empty() {
            return Err(CacheError::InvalidConfig(format!(
                "relationship '{}.{}' has no attribute pairs",
                entity.name(),
                rel.name
            )));
        }

        let mut local = Vec::with_capacity(rel.pairs.len());
        let mut remote = Vec::with_capacity(rel.pairs.len());
        for (local_name, remote_name) in &rel.pairs {
            local.push(entity.require_attribute(local_name)?);
            remote.push(target_type.require_attribute(remote_name)?);
        }

        Ok(RelationshipLink {
            target,
            local,
            remote,
        })
    }

    /// Columns carrying a relationship's local attribute reference the
    /// target's column for the remote attribute, unless declared otherwise.
    fn infer_foreign_keys(&mut self) {
        let mut inferred = Vec::new();
        for (type_idx, entity) in self.types.iter().enumerate() {
            for (rel, link) in entity.relationships().iter().zip(&self.links[type_idx]) {
                let target = &self.types[link.target.0];
                for (local_name, remote_name) in &rel.pairs {
                    let Some((table, column)) = target.tables().iter().find_map(|table| {
                        table
                            .columns
                            .iter()
                            .find(|c| &c.attribute == remote_name)
                            .map(|c| (table.name.clone(), c.column.name.clone()))
                    }) else {
                        continue;
                    };
                    inferred.push((type_idx, local_name.clone(), table, column));
                }
            }
        }

        for (type_idx, local_name, table, column) in inferred {
            for mapping in self.types[type_idx].tables_mut() {
                for col in mapping.columns.iter_mut() {
                    if col.attribute == local_name && col.column.references.is_none() {
                        col.column = col.column.clone().references(table.clone(), column.clone());
                    }
                }
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Result<EntityTypeId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| CacheError::UnknownEntity(name.to_string()))
    }

    pub fn get(&self, id: EntityTypeId) -> &EntityType {
        &self.types[id.0]
    }

    pub fn entity(&self, name: &str) -> Result<&EntityType> {
        Ok(self.get(self.resolve(name)?))
    }

    pub fn links(&self, id: EntityTypeId) -> &[RelationshipLink] {
        &self.links[id.0]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityTypeId, &EntityType)> {
        self.types
            .iter()
            .enumerate()
            .map(|(idx, entity)| (EntityTypeId(idx), entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    fn types() -> Vec<EntityType> {
        vec![
            EntityType::builder("SequenceModel")
                .primary_key("id", DataType::Integer)
                .attribute("titel", DataType::Text)
                .build()
                .unwrap(),
            EntityType::builder("LinkedModel")
                .primary_key("id", DataType::Text)
                .attribute("sequence_model_id", DataType::Integer)
                .relationship("sequence_model", "SequenceModel", &[("sequence_model_id", "id")])
                .build()
                .unwrap(),
        ]
    }

    #[test]
    fn test_resolves_relationships() {
        let registry = EntityRegistry::new(types()).unwrap();
        let linked = registry.resolve("LinkedModel").unwrap();
        let link = &registry.links(linked)[0];

        assert_eq!(link.target, registry.resolve("SequenceModel").unwrap());
        assert_eq!(link.local, vec![1]);
        assert_eq!(link.remote, vec![0]);
    }

    #[test]
    fn test_infers_foreign_key_columns() {
        let registry = EntityRegistry::new(types()).unwrap();
        let table = &registry.entity("LinkedModel").unwrap().tables()[0];
        let fk = table.find_column("sequence_model_id").unwrap();
        let reference = fk.column.references.as_ref().unwrap();

        assert_eq!(reference.table, "sequencemodel");
        assert_eq!(reference.column, "id");
    }

    #[test]
    fn test_rejects_unknown_targets_and_duplicates() {
        let dangling = EntityType::builder("A")
            .primary_key("id", DataType::Integer)
            .attribute("b_id", DataType::Integer)
            .relationship("b", "B", &[("b_id", "id")])
            .build()
            .unwrap();
        assert!(matches!(
            EntityRegistry::new(vec![dangling]),
            Err(CacheError::UnknownEntity(name)) if name == "B"
        ));

        let mut twice = types();
        twice.push(twice[0].clone());
        assert!(matches!(EntityRegistry::new(twice), Err(CacheError::InvalidConfig(_))));
    }
}
