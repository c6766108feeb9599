use super::EntityCache;
use crate::core::estimated_row_bytes;
use crate::store::BackingStore;
use log::Level;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub loaded_types: usize,
    pub instances: usize,
    pub indices: usize,
    pub buckets: usize,
    /// Rough footprint of cached values and index buckets.
    pub estimated_bytes: usize,
}

impl<S: BackingStore> EntityCache<S> {
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for cache in self.types.iter().flatten() {
            stats.loaded_types += 1;
            stats.instances += cache.instances.len();
            stats.indices += cache.indices.len();
            for instance in &cache.instances {
                stats.estimated_bytes += estimated_row_bytes(&instance.values)
                    + instance.persisted_key.as_deref().map_or(0, estimated_row_bytes);
            }
            for index in cache.indices.iter() {
                stats.buckets += index.bucket_count();
                stats.estimated_bytes += index.estimated_bytes();
            }
        }
        stats
    }

    pub(super) fn log_memory_usage(&self) {
        let bytes = self.stats().estimated_bytes;
        self.log(
            Level::Info,
            format_args!("Memory usage: {} ({})", sizeof_fmt(bytes), bytes),
        );
    }
}

/// Formats a byte count with binary prefixes, e.g. `1.5 KiB`.
pub fn sizeof_fmt(bytes: usize) -> String {
    let mut num = bytes as f64;
    for unit in ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"] {
        if num.abs() < 1024.0 {
            return format!("{:3.1} {}B", num, unit);
        }
        num /= 1024.0;
    }
    format!("{:.1} YiB", num)
}
