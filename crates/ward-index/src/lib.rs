//! Region indexes for ward.
//!
//! Every index implements [`RegionIndex`]. Three are provided:
//!
//! - [`HashMapIndex`]: a map from id to region; spatial queries scan every
//!   region.
//! - [`PriorityRTreeIndex`]: the same map plus a bulk-loaded priority R-tree
//!   that is rebuilt after each structural change.
//! - [`ChunkHashTable`]: wraps another index and caches, per chunk column,
//!   the regions touching that column. Columns are filled by a small worker
//!   pool; until a column is ready, queries go to the wrapped index.
//!
//! All three answer spatial queries identically. Callbacks never run while an
//! index lock is held, so a consumer may call back into the index.

mod chunk;
mod difference;
mod error;
mod hash_map;
mod pool;
mod rtree;

use std::time::Duration;

use ward_region::{BlockVector3, ChunkPos, Region, RegionLookup, RegionRef};

pub use chunk::{ChunkHashTable, ChunkState, DEFAULT_CHUNK_WORKERS};
pub use difference::RegionDifference;
pub use error::{IndexError, IndexResult};
pub use hash_map::{HashMapIndex, LinearScan, PriorityRTreeIndex, SpatialAccelerator};
pub use pool::{CancelToken, WorkerPool};
pub use rtree::{BRANCH_FACTOR, PriorityRTree};

/// What happens to the children of a removed region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RemovalStrategy {
    /// Remove every descendant as well.
    #[default]
    RemoveChildren,
    /// Keep descendants; direct children lose their parent or are moved to a
    /// replacement.
    UnsetParentInChildren,
}

/// A per-world collection of regions.
///
/// Ids are case-insensitive. Consumers passed to the `apply*` methods return
/// `false` to stop iteration early.
pub trait RegionIndex: Send + Sync {
    // ==================== Chunk hints ====================

    /// Queries are about to target this chunk.
    fn bias(&self, _chunk: ChunkPos) {}

    fn bias_all(&self, chunks: &[ChunkPos]) {
        for chunk in chunks {
            self.bias(*chunk);
        }
    }

    /// The chunk is no longer interesting.
    fn forget(&self, _chunk: ChunkPos) {}

    fn forget_all(&self) {}

    /// Chunks currently held in a cache, if the index keeps one.
    fn cached_chunks(&self) -> Vec<ChunkPos> {
        Vec::new()
    }

    // ==================== Mutation ====================

    /// Add or replace a region. Its parent, if set, must already be present
    /// and must not lead back to it.
    fn add(&self, region: RegionRef) -> IndexResult<()>;

    /// Add many regions at once. Parents may appear in any order; dangling or
    /// circular parent links are logged and cleared.
    fn add_all(&self, regions: Vec<RegionRef>);

    fn remove(&self, id: &str, strategy: RemovalStrategy) -> Vec<RegionRef> {
        self.remove_and_replace_parents(id, strategy, None)
    }

    /// Remove a region and return everything removed. With
    /// [`RemovalStrategy::UnsetParentInChildren`] and a replacement that is
    /// present, direct children are re-parented to it.
    fn remove_and_replace_parents(
        &self,
        id: &str,
        strategy: RemovalStrategy,
        replacement: Option<&str>,
    ) -> Vec<RegionRef>;

    /// Change the parent of a stored region.
    fn set_parent(&self, child: &str, parent: Option<&str>) -> IndexResult<()>;

    // ==================== Lookup ====================

    fn get(&self, id: &str) -> Option<RegionRef>;

    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn apply(&self, consumer: &mut dyn FnMut(&RegionRef) -> bool);

    /// Visit each region containing the point once.
    fn apply_containing(&self, point: BlockVector3, consumer: &mut dyn FnMut(&RegionRef) -> bool);

    /// Visit each region intersecting `region` once. Pairs whose
    /// intersection cannot be computed count as not intersecting.
    fn apply_intersecting(&self, region: &Region, consumer: &mut dyn FnMut(&RegionRef) -> bool);

    fn size(&self) -> usize;

    fn values(&self) -> Vec<RegionRef>;

    // ==================== Dirty tracking ====================

    /// Drain changes since the previous call and clear dirty bits.
    fn get_and_clear_difference(&self) -> RegionDifference;

    /// Put back a difference that could not be persisted.
    fn set_dirty(&self, difference: RegionDifference);

    fn is_dirty(&self) -> bool;

    fn clear_dirty(&self);

    // ==================== Lifecycle ====================

    /// Wait for background work to finish.
    fn await_completion(&self, _timeout: Duration) -> bool {
        true
    }

    fn shutdown(&self) {}
}

/// Resolve parent ids through an index.
pub struct IndexLookup<'a>(pub &'a dyn RegionIndex);

impl RegionLookup for IndexLookup<'_> {
    fn lookup(&self, id: &str) -> Option<RegionRef> {
        self.0.get(id)
    }
}
