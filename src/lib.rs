// ============================================================================
// ModelCache Library
// ============================================================================

pub mod cache;
pub mod config;
pub mod core;
pub mod filter;
pub mod schema;
pub mod store;

// Re-export main types for convenience
pub use cache::{
    Attrs, CacheStats, EntityCache, EntityHandle, FlushReport, InstanceStatus, TypeFlush,
    sizeof_fmt,
};
pub use config::{CacheConfig, PreloadMode, SequenceBinding};
pub use core::{CacheError, Column, DataType, Result, Row, Value};
pub use filter::Filter;
pub use schema::{EntityRegistry, EntityType, EntityTypeId, TableMapping};

// Re-export store API
pub use store::{
    BackingStore, LoadQuery, LoadResult, MemoryStore, StoreOperation, StoreStats, UpdateRecord,
};
