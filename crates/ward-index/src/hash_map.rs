//! Map-backed region index with a pluggable spatial accelerator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tracing::{debug, trace, warn};
use ward_region::{Aabb, BlockVector3, Region, RegionError, RegionRef, creates_cycle, normalize_id};

use crate::difference::RegionDifference;
use crate::error::{IndexError, IndexResult};
use crate::rtree::PriorityRTree;
use crate::{RegionIndex, RemovalStrategy};

/// Narrows spatial queries to candidate regions.
///
/// Rebuilt under the index write lock after every structural change.
pub trait SpatialAccelerator: Default + Send + Sync {
    fn rebuild(&mut self, regions: &HashMap<String, RegionRef>);

    /// Regions whose bounds may touch `bounds`, or `None` to scan everything.
    fn candidates(&self, bounds: &Aabb) -> Option<Vec<RegionRef>>;
}

/// No acceleration.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearScan;

impl SpatialAccelerator for LinearScan {
    fn rebuild(&mut self, _regions: &HashMap<String, RegionRef>) {}

    fn candidates(&self, _bounds: &Aabb) -> Option<Vec<RegionRef>> {
        None
    }
}

/// Hash map index answering spatial queries through a [`PriorityRTree`].
pub type PriorityRTreeIndex = HashMapIndex<PriorityRTree>;

#[derive(Debug, Default)]
struct IndexState<A> {
    regions: HashMap<String, RegionRef>,
    removed: HashSet<String>,
    accelerator: A,
}

impl<A: SpatialAccelerator> IndexState<A> {
    fn rebuild(&mut self) {
        self.accelerator.rebuild(&self.regions);
    }

    fn insert(&mut self, region: RegionRef) {
        region.set_dirty(true);
        self.removed.remove(region.id());
        trace!("Indexed region {}", region.id());
        self.regions.insert(region.id().to_owned(), region);
    }

    /// Clear parent links that dangle or loop.
    fn repair_parents(&self) {
        let mut regions: Vec<_> = self.regions.values().cloned().collect();
        regions.sort_by(|a, b| a.id().cmp(b.id()));

        for region in regions {
            let Some(parent_id) = region.parent_id() else {
                continue;
            };
            match self.regions.get(&parent_id) {
                None => {
                    warn!(
                        "Region {} names missing parent {parent_id}; clearing its parent",
                        region.id()
                    );
                    region.clear_parent();
                }
                Some(parent) if creates_cycle(region.id(), parent, &self.regions) => {
                    warn!(
                        "Region {} has circular inheritance through {parent_id}; clearing its parent",
                        region.id()
                    );
                    region.clear_parent();
                }
                Some(_) => {}
            }
        }
    }
}

/// Region index keyed by lower-cased id.
#[derive(Debug, Default)]
pub struct HashMapIndex<A: SpatialAccelerator = LinearScan> {
    state: RwLock<IndexState<A>>,
    warned_unsupported: AtomicBool,
}

impl HashMapIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A: SpatialAccelerator> HashMapIndex<A> {
    #[must_use]
    pub fn with_accelerator() -> Self {
        Self::default()
    }

    fn candidates(&self, bounds: &Aabb) -> Vec<RegionRef> {
        let state = self.state.read();
        state
            .accelerator
            .candidates(bounds)
            .unwrap_or_else(|| state.regions.values().cloned().collect())
    }
}

impl<A: SpatialAccelerator> RegionIndex for HashMapIndex<A> {
    fn add(&self, region: RegionRef) -> IndexResult<()> {
        let mut state = self.state.write();
        if let Some(parent_id) = region.parent_id() {
            let Some(parent) = state.regions.get(&parent_id) else {
                return Err(IndexError::UnknownParent {
                    child: region.id().to_owned(),
                    parent: parent_id,
                });
            };
            if creates_cycle(region.id(), parent, &state.regions) {
                return Err(RegionError::CircularInheritance {
                    child: region.id().to_owned(),
                    parent: parent_id,
                }
                .into());
            }
        }
        state.insert(region);
        state.rebuild();
        Ok(())
    }

    fn add_all(&self, regions: Vec<RegionRef>) {
        let count = regions.len();
        let mut state = self.state.write();
        for region in regions {
            state.insert(region);
        }
        state.repair_parents();
        state.rebuild();
        debug!("Indexed {count} regions ({} total)", state.regions.len());
    }

    fn remove_and_replace_parents(
        &self,
        id: &str,
        strategy: RemovalStrategy,
        replacement: Option<&str>,
    ) -> Vec<RegionRef> {
        let id = normalize_id(id);
        let mut state = self.state.write();
        if !state.regions.contains_key(&id) {
            return Vec::new();
        }

        let mut doomed: HashSet<String> = HashSet::new();
        doomed.insert(id.clone());
        if strategy == RemovalStrategy::RemoveChildren {
            loop {
                let before = doomed.len();
                let children: Vec<String> = state
                    .regions
                    .values()
                    .filter(|r| r.parent_id().is_some_and(|p| doomed.contains(&p)))
                    .map(|r| r.id().to_owned())
                    .collect();
                doomed.extend(children);
                if doomed.len() == before {
                    break;
                }
            }
        }

        let mut removed: Vec<RegionRef> = doomed
            .iter()
            .filter_map(|id| state.regions.remove(id))
            .collect();
        removed.sort_by(|a, b| a.id().cmp(b.id()));
        state.removed.extend(doomed);

        if strategy == RemovalStrategy::UnsetParentInChildren {
            let replacement = replacement.and_then(|r| state.regions.get(&normalize_id(r)).cloned());
            let children: Vec<RegionRef> = state
                .regions
                .values()
                .filter(|r| r.parent_id().as_deref() == Some(id.as_str()))
                .cloned()
                .collect();
            for child in children {
                match &replacement {
                    Some(parent) => {
                        if let Err(e) = child.set_parent(Some(parent.as_ref()), &state.regions) {
                            warn!("Cannot move {} under {}: {e}; clearing its parent", child.id(), parent.id());
                            child.clear_parent();
                        }
                    }
                    None => child.clear_parent(),
                }
            }
        }

        state.rebuild();
        debug!("Removed {} region(s) starting at {id}", removed.len());
        removed
    }

    fn set_parent(&self, child: &str, parent: Option<&str>) -> IndexResult<()> {
        let state = self.state.write();
        let child_id = normalize_id(child);
        let child = state
            .regions
            .get(&child_id)
            .ok_or_else(|| IndexError::NotFound(child_id.clone()))?;

        let Some(parent_id) = parent.map(normalize_id) else {
            child.clear_parent();
            return Ok(());
        };
        let parent = state
            .regions
            .get(&parent_id)
            .ok_or_else(|| IndexError::UnknownParent {
                child: child_id.clone(),
                parent: parent_id.clone(),
            })?;
        child.set_parent(Some(parent.as_ref()), &state.regions)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Option<RegionRef> {
        self.state.read().regions.get(&normalize_id(id)).cloned()
    }

    fn apply(&self, consumer: &mut dyn FnMut(&RegionRef) -> bool) {
        for region in self.values() {
            if !consumer(&region) {
                break;
            }
        }
    }

    fn apply_containing(&self, point: BlockVector3, consumer: &mut dyn FnMut(&RegionRef) -> bool) {
        let mut seen = FxHashSet::default();
        for region in self.candidates(&Aabb::point(point)) {
            if !region.contains(point) || !seen.insert(Arc::as_ptr(&region)) {
                continue;
            }
            if !consumer(&region) {
                break;
            }
        }
    }

    fn apply_intersecting(&self, region: &Region, consumer: &mut dyn FnMut(&RegionRef) -> bool) {
        let mut seen = FxHashSet::default();
        for candidate in self.candidates(&region.aabb()) {
            match region.intersects(&candidate) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    if !self.warned_unsupported.swap(true, Ordering::Relaxed) {
                        warn!("{e}; treating {} as not intersecting {}", candidate.id(), region.id());
                    }
                    continue;
                }
            }
            if !seen.insert(Arc::as_ptr(&candidate)) {
                continue;
            }
            if !consumer(&candidate) {
                break;
            }
        }
    }

    fn size(&self) -> usize {
        self.state.read().regions.len()
    }

    fn values(&self) -> Vec<RegionRef> {
        self.state.read().regions.values().cloned().collect()
    }

    fn get_and_clear_difference(&self) -> RegionDifference {
        let mut state = self.state.write();
        let changed: Vec<RegionRef> = state
            .regions
            .values()
            .filter(|r| r.is_dirty())
            .cloned()
            .collect();
        for region in &changed {
            region.set_dirty(false);
        }
        let removed = std::mem::take(&mut state.removed);
        RegionDifference::new(changed, removed)
    }

    fn set_dirty(&self, difference: RegionDifference) {
        let mut state = self.state.write();
        for region in difference.changed() {
            let current = state.regions.get(region.id());
            if current.is_some_and(|c| Arc::ptr_eq(c, region)) {
                region.set_dirty(true);
            }
        }
        for id in difference.removed() {
            if !state.regions.contains_key(id) {
                state.removed.insert(id.clone());
            }
        }
    }

    fn is_dirty(&self) -> bool {
        let state = self.state.read();
        !state.removed.is_empty() || state.regions.values().any(|r| r.is_dirty())
    }

    fn clear_dirty(&self) {
        let mut state = self.state.write();
        state.removed.clear();
        for region in state.regions.values() {
            region.set_dirty(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ward_region::{BlockVector2, Shape};

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

    fn containing(index: &dyn RegionIndex, x: i32, y: i32, z: i32) -> Vec<String> {
        let mut ids = Vec::new();
        index.apply_containing(BlockVector3::new(x, y, z), &mut |r| {
            ids.push(r.id().to_owned());
            true
        });
        ids.sort();
        ids
    }

    #[test]
    fn test_add_and_get_case_insensitive() {
        let index = HashMapIndex::new();
        index.add(cuboid("Spawn", (0, 0, 0), (10, 10, 10))).unwrap();
        assert!(index.contains("SPAWN"));
        assert_eq!(index.get("spawn").unwrap().id(), "spawn");
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn test_add_requires_known_parent() {
        let index = HashMapIndex::new();
        let parent = cuboid("parent", (0, 0, 0), (1, 1, 1));
        let child = cuboid("child", (0, 0, 0), (1, 1, 1));
        child.set_parent(Some(parent.as_ref()), &HashMap::<String, RegionRef>::new()).unwrap();

        assert!(matches!(index.add(Arc::clone(&child)), Err(IndexError::UnknownParent { .. })));
        index.add(parent).unwrap();
        index.add(child).unwrap();
        assert_eq!(index.size(), 2);
    }

    #[test]
    fn test_add_all_clears_bad_parents() {
        let index = HashMapIndex::new();
        let a = cuboid("a", (0, 0, 0), (1, 1, 1));
        let b = cuboid("b", (0, 0, 0), (1, 1, 1));
        let c = cuboid("c", (0, 0, 0), (1, 1, 1));
        let orphan = cuboid("orphan", (0, 0, 0), (1, 1, 1));

        // a -> b -> c -> a, built through lookups that hide the loop
        let empty = HashMap::<String, RegionRef>::new();
        a.set_parent(Some(b.as_ref()), &empty).unwrap();
        b.set_parent(Some(c.as_ref()), &empty).unwrap();
        c.set_parent(Some(a.as_ref()), &empty).unwrap();
        let ghost = Region::new("ghost", Shape::Global).unwrap();
        orphan.set_parent(Some(&ghost), &empty).unwrap();

        index.add_all(vec![Arc::clone(&a), b, c, Arc::clone(&orphan)]);
        assert_eq!(orphan.parent_id(), None);
        assert_eq!(a.parent_id(), None);
        assert_eq!(index.get("b").unwrap().parent_id().as_deref(), Some("c"));
        assert_eq!(index.get("c").unwrap().parent_id().as_deref(), Some("a"));
    }

    #[test]
    fn test_containing_is_inclusive() {
        let index = HashMapIndex::new();
        index.add(cuboid("box", (0, 0, 0), (10, 10, 10))).unwrap();
        assert_eq!(containing(&index, 10, 10, 10), ["box"]);
        assert_eq!(containing(&index, 0, 0, 0), ["box"]);
        assert!(containing(&index, 11, 10, 10).is_empty());
    }

    #[test]
    fn test_early_stop() {
        let index = HashMapIndex::new();
        index.add(cuboid("a", (0, 0, 0), (10, 10, 10))).unwrap();
        index.add(cuboid("b", (0, 0, 0), (10, 10, 10))).unwrap();
        let mut visits = 0;
        index.apply_containing(BlockVector3::new(1, 1, 1), &mut |_| {
            visits += 1;
            false
        });
        assert_eq!(visits, 1);
    }

    #[test]
    fn test_remove_children() {
        let index = HashMapIndex::new();
        let root = cuboid("root", (0, 0, 0), (1, 1, 1));
        let mid = cuboid("mid", (0, 0, 0), (1, 1, 1));
        let leaf = cuboid("leaf", (0, 0, 0), (1, 1, 1));
        index.add(Arc::clone(&root)).unwrap();
        index.add(Arc::clone(&mid)).unwrap();
        index.add(Arc::clone(&leaf)).unwrap();
        index.set_parent("mid", Some("root")).unwrap();
        index.set_parent("leaf", Some("mid")).unwrap();

        let removed = index.remove("root", RemovalStrategy::RemoveChildren);
        let ids: Vec<_> = removed.iter().map(|r| r.id()).collect();
        assert_eq!(ids, ["leaf", "mid", "root"]);
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn test_remove_unset_parent_with_replacement() {
        let index = HashMapIndex::new();
        for id in ["old", "new", "kid", "grandkid"] {
            index.add(cuboid(id, (0, 0, 0), (1, 1, 1))).unwrap();
        }
        index.set_parent("kid", Some("old")).unwrap();
        index.set_parent("grandkid", Some("kid")).unwrap();

        let removed = index.remove_and_replace_parents(
            "old",
            RemovalStrategy::UnsetParentInChildren,
            Some("new"),
        );
        assert_eq!(removed.len(), 1);
        assert_eq!(index.get("kid").unwrap().parent_id().as_deref(), Some("new"));
        assert_eq!(index.get("grandkid").unwrap().parent_id().as_deref(), Some("kid"));

        index.remove("new", RemovalStrategy::UnsetParentInChildren);
        assert_eq!(index.get("kid").unwrap().parent_id(), None);
    }

    #[test]
    fn test_remove_missing_is_empty() {
        let index = HashMapIndex::new();
        assert!(index.remove("nothing", RemovalStrategy::RemoveChildren).is_empty());
        assert!(index.get_and_clear_difference().is_empty());
    }

    #[test]
    fn test_set_parent_rejects_cycle() {
        let index = HashMapIndex::new();
        index.add(cuboid("a", (0, 0, 0), (1, 1, 1))).unwrap();
        index.add(cuboid("b", (0, 0, 0), (1, 1, 1))).unwrap();
        index.set_parent("b", Some("a")).unwrap();
        assert!(matches!(
            index.set_parent("a", Some("b")),
            Err(IndexError::Region(RegionError::CircularInheritance { .. }))
        ));
        assert!(matches!(index.set_parent("zzz", None), Err(IndexError::NotFound(_))));
    }

    #[test]
    fn test_difference_tracking() {
        let index = HashMapIndex::new();
        index.add(cuboid("a", (0, 0, 0), (1, 1, 1))).unwrap();
        index.add(cuboid("b", (0, 0, 0), (1, 1, 1))).unwrap();
        assert!(index.is_dirty());

        let first = index.get_and_clear_difference();
        assert_eq!(first.changed_ids(), ["a", "b"]);
        assert!(!index.is_dirty());

        index.get("a").unwrap().set_priority(3);
        index.remove("b", RemovalStrategy::RemoveChildren);
        let second = index.get_and_clear_difference();
        assert_eq!(second.changed_ids(), ["a"]);
        assert!(second.removed().contains("b"));

        index.set_dirty(second);
        assert!(index.is_dirty());
        let third = index.get_and_clear_difference();
        assert_eq!(third.changed_ids(), ["a"]);
        assert!(third.removed().contains("b"));
    }

    #[test]
    fn test_set_dirty_skips_replaced_regions() {
        let index = HashMapIndex::new();
        index.add(cuboid("a", (0, 0, 0), (1, 1, 1))).unwrap();
        let diff = index.get_and_clear_difference();
        let replacement = cuboid("a", (5, 5, 5), (6, 6, 6));
        index.add(Arc::clone(&replacement)).unwrap();
        index.get_and_clear_difference();

        index.set_dirty(diff);
        assert!(!index.is_dirty());
    }

    #[test]
    fn test_readding_cancels_removal() {
        let index = HashMapIndex::new();
        index.add(cuboid("a", (0, 0, 0), (1, 1, 1))).unwrap();
        index.remove("a", RemovalStrategy::RemoveChildren);
        index.add(cuboid("a", (0, 0, 0), (1, 1, 1))).unwrap();
        let diff = index.get_and_clear_difference();
        assert!(diff.removed().is_empty());
        assert_eq!(diff.changed_ids(), ["a"]);
    }

    #[test]
    fn test_unsupported_intersection_skipped() {
        let index = HashMapIndex::new();
        let line = Region::new(
            "line",
            Shape::polygon(vec![BlockVector2::new(0, 0), BlockVector2::new(5, 5)], 0, 5).unwrap(),
        )
        .unwrap();
        index.add(Arc::new(line)).unwrap();
        index.add(cuboid("box", (0, 0, 0), (5, 5, 5))).unwrap();

        let probe = Region::new_transient(
            "probe",
            Shape::cuboid(BlockVector3::new(1, 1, 1), BlockVector3::new(2, 2, 2)),
        );
        let mut hits = Vec::new();
        index.apply_intersecting(&probe, &mut |r| {
            hits.push(r.id().to_owned());
            true
        });
        assert_eq!(hits, ["box"]);
    }
}
