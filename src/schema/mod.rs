pub mod entity;
pub mod registry;

pub use entity::{Attribute, ColumnMapping, EntityType, EntityTypeBuilder, Relationship, TableMapping};
pub use registry::{EntityRegistry, EntityTypeId, RelationshipLink};
