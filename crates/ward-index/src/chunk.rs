//! Chunk-column cache in front of another index.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};
use ward_region::{BlockVector3, ChunkPos, Region, RegionRef, Shape};

use crate::difference::RegionDifference;
use crate::error::IndexResult;
use crate::pool::{CancelToken, WorkerPool};
use crate::{RegionIndex, RemovalStrategy};

/// Worker threads used to fill chunk columns.
pub const DEFAULT_CHUNK_WORKERS: usize = 4;

/// Regions touching one chunk column, once computed.
#[derive(Debug)]
pub struct ChunkState {
    position: ChunkPos,
    regions: OnceLock<Vec<RegionRef>>,
}

impl ChunkState {
    fn new(position: ChunkPos) -> Self {
        Self {
            position,
            regions: OnceLock::new(),
        }
    }

    #[must_use]
    pub const fn position(&self) -> ChunkPos {
        self.position
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.regions.get().is_some()
    }

    /// Regions in priority order, or `None` while the column is pending.
    #[must_use]
    pub fn regions(&self) -> Option<&[RegionRef]> {
        self.regions.get().map(Vec::as_slice)
    }
}

struct ChunkCache {
    states: HashMap<ChunkPos, Arc<ChunkState>>,
    pool: WorkerPool,
    last: Option<Arc<ChunkState>>,
}

/// Caches the regions of each biased chunk column and answers point queries
/// from that cache.
///
/// Any structural change discards every column and queues one task that
/// refills all of them. While a column is pending, queries fall through to
/// the wrapped index, so answers never depend on cache timing.
pub struct ChunkHashTable {
    index: Arc<dyn RegionIndex>,
    name: String,
    workers: usize,
    cache: Mutex<ChunkCache>,
}

impl ChunkHashTable {
    #[must_use]
    pub fn new(index: Arc<dyn RegionIndex>, name: &str) -> Self {
        Self::with_workers(index, name, DEFAULT_CHUNK_WORKERS)
    }

    #[must_use]
    pub fn with_workers(index: Arc<dyn RegionIndex>, name: &str, workers: usize) -> Self {
        let pool = WorkerPool::new(format!("ward-chunks-{name}"), workers);
        Self {
            index,
            name: name.to_owned(),
            workers,
            cache: Mutex::new(ChunkCache {
                states: HashMap::new(),
                pool,
                last: None,
            }),
        }
    }

    fn new_pool(&self) -> WorkerPool {
        WorkerPool::new(format!("ward-chunks-{}", self.name), self.workers)
    }

    /// State for a chunk. With `create`, an unknown chunk gets a pending
    /// state and a fill task.
    pub fn chunk_state(&self, position: ChunkPos, create: bool) -> Option<Arc<ChunkState>> {
        let mut cache = self.cache.lock();
        if let Some(state) = cache.states.get(&position) {
            return Some(Arc::clone(state));
        }
        if !create {
            return None;
        }

        let state = Arc::new(ChunkState::new(position));
        cache.states.insert(position, Arc::clone(&state));
        let index = Arc::clone(&self.index);
        let task = vec![Arc::clone(&state)];
        cache.pool.submit(move |token| fill(index.as_ref(), &task, token));
        Some(state)
    }

    /// Discard every column and queue a refill of the same positions.
    fn rebuild(&self) {
        let mut cache = self.cache.lock();
        let old = std::mem::replace(&mut cache.pool, self.new_pool());
        old.shutdown_now();

        let positions: Vec<ChunkPos> = cache.states.keys().copied().collect();
        let fresh: Vec<Arc<ChunkState>> = positions
            .into_iter()
            .map(|p| Arc::new(ChunkState::new(p)))
            .collect();
        cache.states = fresh
            .iter()
            .map(|s| (s.position(), Arc::clone(s)))
            .collect();
        cache.last = None;

        if !fresh.is_empty() {
            debug!("{}: refilling {} chunk column(s)", self.name, fresh.len());
            let index = Arc::clone(&self.index);
            cache.pool.submit(move |token| fill(index.as_ref(), &fresh, token));
        }
    }

    /// Loaded state of the chunk holding `point`, reusing the last hit.
    fn loaded_state(&self, point: BlockVector3) -> Option<Arc<ChunkState>> {
        let position = point.chunk();
        let mut cache = self.cache.lock();
        if let Some(last) = &cache.last
            && last.position() == position
        {
            return Some(Arc::clone(last));
        }
        let state = cache.states.get(&position).filter(|s| s.is_loaded()).cloned()?;
        cache.last = Some(Arc::clone(&state));
        Some(state)
    }
}

/// Compute and publish the regions of each column.
fn fill(index: &dyn RegionIndex, states: &[Arc<ChunkState>], token: &CancelToken) {
    for state in states {
        if token.is_cancelled() {
            return;
        }
        let probe = Region::new_transient("_", Shape::Cuboid(state.position().column()));
        let mut regions = Vec::new();
        index.apply_intersecting(&probe, &mut |r| {
            regions.push(RegionRef::clone(r));
            true
        });
        regions.sort_by(|a, b| Region::priority_order(a, b));
        trace!("Chunk {} touches {} region(s)", state.position(), regions.len());
        let _ = state.regions.set(regions);
    }
}

impl RegionIndex for ChunkHashTable {
    fn bias(&self, chunk: ChunkPos) {
        self.chunk_state(chunk, true);
    }

    fn bias_all(&self, chunks: &[ChunkPos]) {
        let mut cache = self.cache.lock();
        let fresh: Vec<Arc<ChunkState>> = chunks
            .iter()
            .filter(|p| !cache.states.contains_key(*p))
            .map(|p| Arc::new(ChunkState::new(*p)))
            .collect();
        if fresh.is_empty() {
            return;
        }
        for state in &fresh {
            cache.states.insert(state.position(), Arc::clone(state));
        }
        let index = Arc::clone(&self.index);
        cache.pool.submit(move |token| fill(index.as_ref(), &fresh, token));
    }

    fn forget(&self, chunk: ChunkPos) {
        let mut cache = self.cache.lock();
        cache.states.remove(&chunk);
        if cache.last.as_ref().is_some_and(|s| s.position() == chunk) {
            cache.last = None;
        }
    }

    fn forget_all(&self) {
        let mut cache = self.cache.lock();
        let old = std::mem::replace(&mut cache.pool, self.new_pool());
        old.shutdown_now();
        cache.states.clear();
        cache.last = None;
    }

    fn cached_chunks(&self) -> Vec<ChunkPos> {
        self.cache.lock().states.keys().copied().collect()
    }

    fn add(&self, region: RegionRef) -> IndexResult<()> {
        self.index.add(region)?;
        self.rebuild();
        Ok(())
    }

    fn add_all(&self, regions: Vec<RegionRef>) {
        self.index.add_all(regions);
        self.rebuild();
    }

    fn remove_and_replace_parents(
        &self,
        id: &str,
        strategy: RemovalStrategy,
        replacement: Option<&str>,
    ) -> Vec<RegionRef> {
        let removed = self.index.remove_and_replace_parents(id, strategy, replacement);
        if !removed.is_empty() {
            self.rebuild();
        }
        removed
    }

    fn set_parent(&self, child: &str, parent: Option<&str>) -> IndexResult<()> {
        self.index.set_parent(child, parent)
    }

    fn get(&self, id: &str) -> Option<RegionRef> {
        self.index.get(id)
    }

    fn apply(&self, consumer: &mut dyn FnMut(&RegionRef) -> bool) {
        self.index.apply(consumer);
    }

    fn apply_containing(&self, point: BlockVector3, consumer: &mut dyn FnMut(&RegionRef) -> bool) {
        let Some(state) = self.loaded_state(point) else {
            self.index.apply_containing(point, consumer);
            return;
        };
        for region in state.regions().unwrap_or_default() {
            if region.contains(point) && !consumer(region) {
                break;
            }
        }
    }

    fn apply_intersecting(&self, region: &Region, consumer: &mut dyn FnMut(&RegionRef) -> bool) {
        self.index.apply_intersecting(region, consumer);
    }

    fn size(&self) -> usize {
        self.index.size()
    }

    fn values(&self) -> Vec<RegionRef> {
        self.index.values()
    }

    fn get_and_clear_difference(&self) -> RegionDifference {
        self.index.get_and_clear_difference()
    }

    fn set_dirty(&self, difference: RegionDifference) {
        self.index.set_dirty(difference);
    }

    fn is_dirty(&self) -> bool {
        self.index.is_dirty()
    }

    fn clear_dirty(&self) {
        self.index.clear_dirty();
    }

    fn await_completion(&self, timeout: Duration) -> bool {
        let old = {
            let mut cache = self.cache.lock();
            std::mem::replace(&mut cache.pool, self.new_pool())
        };
        old.shutdown();
        old.await_termination(timeout)
    }

    fn shutdown(&self) {
        self.cache.lock().pool.shutdown_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_map::HashMapIndex;

    fn table() -> ChunkHashTable {
        ChunkHashTable::new(Arc::new(HashMapIndex::new()), "test")
    }

    fn cuboid(id: &str, min: (i32, i32, i32), max: (i32, i32, i32)) -> RegionRef {
        Arc::new(
            Region::new(
                id,
                Shape::cuboid(
                    BlockVector3::new(min.0, min.1, min.2),
                    BlockVector3::new(max.0, max.1, max.2),
                ),
            )
            .unwrap(),
        )
    }

    fn containing(index: &dyn RegionIndex, p: BlockVector3) -> Vec<String> {
        let mut ids = Vec::new();
        index.apply_containing(p, &mut |r| {
            ids.push(r.id().to_owned());
            true
        });
        ids
    }

    #[test]
    fn test_fill_orders_by_priority() {
        let table = table();
        let low = cuboid("low", (0, 0, 0), (20, 20, 20));
        let high = cuboid("high", (0, 0, 0), (20, 20, 20));
        high.set_priority(5);
        table.add(low).unwrap();
        table.add(high).unwrap();

        table.bias(ChunkPos::new(0, 0));
        assert!(table.await_completion(Duration::from_secs(5)));
        let state = table.chunk_state(ChunkPos::new(0, 0), false).unwrap();
        let ids: Vec<_> = state.regions().unwrap().iter().map(|r| r.id()).collect();
        assert_eq!(ids, ["high", "low"]);
        assert_eq!(containing(&table, BlockVector3::new(3, 3, 3)), ["high", "low"]);
    }

    #[test]
    fn test_pending_chunk_falls_through() {
        let table = table();
        table.add(cuboid("a", (0, 0, 0), (5, 5, 5))).unwrap();
        assert!(table.chunk_state(ChunkPos::new(0, 0), false).is_none());
        assert_eq!(containing(&table, BlockVector3::new(1, 1, 1)), ["a"]);
    }

    #[test]
    fn test_changes_refill_cached_chunks() {
        let table = table();
        table.bias_all(&[ChunkPos::new(0, 0), ChunkPos::new(1, 0)]);
        assert!(table.await_completion(Duration::from_secs(5)));

        table.add(cuboid("late", (16, 0, 0), (17, 1, 1))).unwrap();
        assert!(table.await_completion(Duration::from_secs(5)));
        let mut cached = table.cached_chunks();
        cached.sort();
        assert_eq!(cached, [ChunkPos::new(0, 0), ChunkPos::new(1, 0)]);
        let state = table.chunk_state(ChunkPos::new(1, 0), false).unwrap();
        assert_eq!(state.regions().unwrap().len(), 1);
        assert_eq!(containing(&table, BlockVector3::new(16, 0, 0)), ["late"]);

        table.remove("late", RemovalStrategy::RemoveChildren);
        assert!(table.await_completion(Duration::from_secs(5)));
        assert!(containing(&table, BlockVector3::new(16, 0, 0)).is_empty());
    }

    #[test]
    fn test_bias_at_range_edge() {
        let table = table();
        table.add(cuboid("a", (0, 0, 0), (5, 5, 5))).unwrap();
        table.bias_all(&[ChunkPos::new(i32::MAX, i32::MIN), ChunkPos::new(i32::MIN, i32::MAX)]);
        assert!(table.await_completion(Duration::from_secs(5)));
        let state = table.chunk_state(ChunkPos::new(i32::MAX, i32::MIN), false).unwrap();
        assert_eq!(state.regions().unwrap().len(), 0);
    }

    #[test]
    fn test_forget() {
        let table = table();
        table.bias(ChunkPos::new(2, 2));
        table.bias(ChunkPos::new(3, 3));
        table.forget(ChunkPos::new(2, 2));
        assert_eq!(table.cached_chunks(), [ChunkPos::new(3, 3)]);
        table.forget_all();
        assert!(table.cached_chunks().is_empty());
    }
}
