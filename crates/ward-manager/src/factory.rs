//! Index construction for new managers.

use std::sync::Arc;

use tracing::debug;
use ward_index::{ChunkHashTable, HashMapIndex, PriorityRTreeIndex, RegionIndex};

use crate::config::ContainerConfig;

/// Builds a fresh, empty index for the named world.
pub type IndexFactory = Arc<dyn Fn(&str) -> Arc<dyn RegionIndex> + Send + Sync>;

/// Factory for the index stack the config asks for: a hash map or priority
/// R-tree, optionally wrapped in a chunk cache.
pub fn index_factory(config: &ContainerConfig) -> IndexFactory {
    let use_rtree = config.use_rtree;
    let use_chunk_cache = config.use_chunk_cache;
    let workers = config.chunk_workers;

    Arc::new(move |name: &str| {
        debug!("{name}: new index (rtree: {use_rtree}, chunk cache: {use_chunk_cache})");
        let base: Arc<dyn RegionIndex> = if use_rtree {
            Arc::new(PriorityRTreeIndex::with_accelerator())
        } else {
            Arc::new(HashMapIndex::new())
        };
        if use_chunk_cache {
            Arc::new(ChunkHashTable::with_workers(base, name, workers))
        } else {
            base
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ward_region::ChunkPos;

    #[test]
    fn test_chunk_cache_toggle() {
        let cached = index_factory(&ContainerConfig::default())("world");
        cached.bias(ChunkPos::new(0, 0));
        assert_eq!(cached.cached_chunks(), [ChunkPos::new(0, 0)]);
        cached.shutdown();

        let config = ContainerConfig {
            use_chunk_cache: false,
            use_rtree: false,
            ..ContainerConfig::default()
        };
        let plain = index_factory(&config)("world");
        plain.bias(ChunkPos::new(0, 0));
        assert!(plain.cached_chunks().is_empty());
    }
}
