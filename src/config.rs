use crate::core::{CacheError, DataType, Result};
use crate::filter::Filter;
use crate::schema::EntityRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// How the first access to an entity type reads from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreloadMode {
    /// Fetch every (filtered) row of the type.
    #[default]
    Full,
    /// Issue a definitionally-empty read: the type's cache state is
    /// established without pulling rows.
    Empty,
}

/// Binds an attribute to the store sequence that fills it on flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceBinding {
    pub attribute: String,
    pub sequence: String,
}

/// Cache construction settings.
///
/// Built either through the builder methods or deserialized from JSON with
/// [`CacheConfig::from_json`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entity type names in write order; referenced types come first.
    pub save_order: Vec<String>,

    /// Sequence-filled attributes per entity type.
    pub sequences: BTreeMap<String, Vec<SequenceBinding>>,

    /// Relationships whose target types are read together with the type.
    pub prefetch: BTreeMap<String, Vec<String>>,

    /// Preload mode for types without an entry in `preload_modes`.
    pub preload_mode: PreloadMode,

    pub preload_modes: BTreeMap<String, PreloadMode>,

    /// Column restriction of the initial read. Instances loaded through a
    /// projection are read-only: they are indexed but never written back.
    pub preload_columns: BTreeMap<String, Vec<String>>,

    pub preload_filter: BTreeMap<String, Filter>,

    /// Insert new instances through the store's native bulk-load path.
    pub use_streaming_bulk_load: bool,

    /// `log` target receiving cache messages; `None` keeps the cache silent.
    pub log_target: Option<String>,

    /// Log estimated memory usage before each flush and after each clear.
    pub check_memory_usage: bool,
}

impl CacheConfig {
    pub fn new<I, S>(save_order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            save_order: save_order.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn sequence(mut self, entity: &str, attribute: &str, sequence: &str) -> Self {
        self.sequences
            .entry(entity.to_string())
            .or_default()
            .push(SequenceBinding {
                attribute: attribute.to_string(),
                sequence: sequence.to_string(),
            });
        self
    }

    pub fn prefetch(mut self, entity: &str, relationships: &[&str]) -> Self {
        self.prefetch.insert(
            entity.to_string(),
            relationships.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    pub fn preload_mode(mut self, mode: PreloadMode) -> Self {
        self.preload_mode = mode;
        self
    }

    pub fn preload_mode_for(mut self, entity: &str, mode: PreloadMode) -> Self {
        self.preload_modes.insert(entity.to_string(), mode);
        self
    }

    pub fn preload_columns(mut self, entity: &str, columns: &[&str]) -> Self {
        self.preload_columns.insert(
            entity.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn preload_filter(mut self, entity: &str, filter: Filter) -> Self {
        self.preload_filter.insert(entity.to_string(), filter);
        self
    }

    pub fn streaming_bulk_load(mut self, enabled: bool) -> Self {
        self.use_streaming_bulk_load = enabled;
        self
    }

    pub fn log_target(mut self, target: &str) -> Self {
        self.log_target = Some(target.to_string());
        self
    }

    pub fn check_memory_usage(mut self, enabled: bool) -> Self {
        self.check_memory_usage = enabled;
        self
    }

    pub fn mode_for(&self, entity: &str) -> PreloadMode {
        self.preload_modes
            .get(entity)
            .copied()
            .unwrap_or(self.preload_mode)
    }

    /// Checks every name in the configuration against the registry.
    pub fn validate(&self, registry: &EntityRegistry) -> Result<()> {
        let mut seen = HashSet::new();
        for name in &self.save_order {
            registry.resolve(name).map_err(|_| invalid(format!(
                "save_order names unknown entity type '{}'",
                name
            )))?;
            if !seen.insert(name.as_str()) {
                return Err(invalid(format!("save_order lists '{}' twice", name)));
            }
        }

        for (entity_name, bindings) in &self.sequences {
            let entity = registry.entity(entity_name)?;
            for binding in bindings {
                let idx = entity.require_attribute(&binding.attribute)?;
                if entity.attributes()[idx].data_type != DataType::Integer {
                    return Err(invalid(format!(
                        "sequence attribute '{}.{}' must be INTEGER",
                        entity_name, binding.attribute
                    )));
                }
                if binding.sequence.is_empty() {
                    return Err(invalid(format!(
                        "sequence for '{}.{}' has an empty name",
                        entity_name, binding.attribute
                    )));
                }
            }
        }

        for (entity_name, relationships) in &self.prefetch {
            let entity = registry.entity(entity_name)?;
            for relationship in relationships {
                entity.relationship_index(relationship)?;
            }
        }

        for name in self.preload_modes.keys() {
            registry.resolve(name)?;
        }

        for (entity_name, columns) in &self.preload_columns {
            let entity = registry.entity(entity_name)?;
            for column in columns {
                entity.require_attribute(column)?;
            }
        }

        for (entity_name, filter) in &self.preload_filter {
            let entity = registry.entity(entity_name)?;
            for attribute in filter.attributes() {
                entity.require_attribute(attribute)?;
            }
        }

        Ok(())
    }
}

fn invalid(message: String) -> CacheError {
    CacheError::InvalidConfig(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityType;

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
        ])
        .unwrap()
    }

    #[test]
    fn test_builder_validates() {
        let config = CacheConfig::new(["Author", "Book"])
            .sequence("Author", "id", "author_id_seq")
            .prefetch("Book", &["author"])
            .preload_mode_for("Author", PreloadMode::Empty)
            .preload_columns("Book", &["id", "title"])
            .preload_filter("Book", Filter::like("title", "R%"));

        config.validate(&registry()).unwrap();
        assert_eq!(config.mode_for("Author"), PreloadMode::Empty);
        assert_eq!(config.mode_for("Book"), PreloadMode::Full);
    }

    #[test]
    fn test_rejects_unknown_names() {
        let registry = registry();
        assert!(matches!(
            CacheConfig::new(["Author", "Nope"]).validate(&registry),
            Err(CacheError::InvalidConfig(_))
        ));
        assert!(matches!(
            CacheConfig::new(["Author", "Author"]).validate(&registry),
            Err(CacheError::InvalidConfig(_))
        ));
        assert!(matches!(
            CacheConfig::new(["Book"]).sequence("Book", "title", "s").validate(&registry),
            Err(CacheError::InvalidConfig(_))
        ));
        assert!(matches!(
            CacheConfig::new(["Book"]).prefetch("Book", &["publisher"]).validate(&registry),
            Err(CacheError::UnknownRelationship { .. })
        ));
        assert!(matches!(
            CacheConfig::new(["Book"])
                .preload_filter("Book", Filter::equals("isbn", "x"))
                .validate(&registry),
            Err(CacheError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_from_json() {
        let config = CacheConfig::from_json(
            r#"{
                "save_order": ["Author", "Book"],
                "sequences": {"Author": [{"attribute": "id", "sequence": "author_id_seq"}]},
                "preload_mode": "Empty",
                "preload_filter": {"Book": {"Gt": ["id", 10]}},
                "use_streaming_bulk_load": true,
                "log_target": "modelcache"
            }"#,
        )
        .unwrap();

        config.validate(&registry()).unwrap();
        assert_eq!(config.preload_mode, PreloadMode::Empty);
        assert!(config.use_streaming_bulk_load);
        assert_eq!(config.log_target.as_deref(), Some("modelcache"));
        assert_eq!(config.sequences["Author"][0].sequence, "author_id_seq");
    }
}
