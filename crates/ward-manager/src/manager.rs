//! Per-world region manager.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};
use ward_index::{IndexLookup, RegionDifference, RegionIndex, RemovalStrategy};
use ward_query::{ApplicableRegionSet, RegionResultSet};
use ward_region::{BlockVector3, ChunkPos, FlagRegistry, GLOBAL_REGION, Region, RegionRef, Subject};

use crate::database::RegionDatabase;
use crate::error::{ManagerResult, StorageError};
use crate::factory::IndexFactory;

/// Regions of one world: an index plus the database behind it.
///
/// A load replaces the index wholesale. Structural changes and the swap are
/// serialized by the manager's lock, so no caller sees a half-built index.
pub struct RegionManager {
    store: Arc<dyn RegionDatabase>,
    factory: IndexFactory,
    registry: Arc<FlagRegistry>,
    index: RwLock<Arc<dyn RegionIndex>>,
}

impl RegionManager {
    pub fn new(store: Arc<dyn RegionDatabase>, factory: IndexFactory, registry: Arc<FlagRegistry>) -> Self {
        let index = factory(store.name());
        Self {
            store,
            factory,
            registry,
            index: RwLock::new(index),
        }
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// Current index. Later loads install a new one; this handle keeps
    /// answering from the old data.
    pub fn index(&self) -> Arc<dyn RegionIndex> {
        Arc::clone(&self.index.read())
    }

    // ==================== Persistence ====================

    /// Replace the index with the stored regions. Returns how many loaded.
    pub fn load(&self) -> ManagerResult<usize> {
        let regions = self.store.load_all(&self.registry)?;
        for region in &regions {
            region.set_dirty(false);
        }
        let count = regions.len();
        self.set_regions(regions.into_iter().map(Arc::new).collect());
        info!("{}: loaded {count} regions", self.name());
        Ok(count)
    }

    /// Save every non-transient region.
    pub fn save(&self) -> ManagerResult<()> {
        let index = self.index();
        let pending = index.get_and_clear_difference();
        let regions: Vec<RegionRef> = index.values().into_iter().filter(|r| !r.is_transient()).collect();

        if let Err(e) = self.store.save_all(&regions) {
            index.set_dirty(pending);
            return Err(e.into());
        }
        debug!("{}: saved {} regions", self.name(), regions.len());
        Ok(())
    }

    /// Save only what changed since the last save. Falls back to a full save
    /// when the database cannot save partially. Returns `false` when there
    /// was nothing to save.
    ///
    /// On failure the drained changes are put back so a later call retries
    /// them.
    pub fn save_changes(&self) -> ManagerResult<bool> {
        let index = self.index();
        let difference = index.get_and_clear_difference();
        if difference.is_empty() {
            return Ok(false);
        }

        match self.save_difference(&difference) {
            Ok(()) => Ok(true),
            Err(e) => {
                index.set_dirty(difference);
                Err(e)
            }
        }
    }

    fn save_difference(&self, difference: &RegionDifference) -> ManagerResult<()> {
        match self.store.save_changes(difference) {
            Ok(()) => {
                debug!(
                    "{}: saved {} changed and {} removed regions",
                    self.name(),
                    difference.changed_ids().len(),
                    difference.removed().len()
                );
                Ok(())
            }
            Err(StorageError::PartialSaveUnsupported) => self.save(),
            Err(e) => Err(e.into()),
        }
    }

    // ==================== Chunks ====================

    pub fn load_chunk(&self, chunk: ChunkPos) {
        self.index().bias(chunk);
    }

    pub fn load_chunks(&self, chunks: &[ChunkPos]) {
        self.index().bias_all(chunks);
    }

    pub fn unload_chunk(&self, chunk: ChunkPos) {
        self.index().forget(chunk);
    }

    // ==================== Regions ====================

    /// Snapshot of every region by id.
    pub fn regions(&self) -> BTreeMap<String, RegionRef> {
        self.index()
            .values()
            .into_iter()
            .map(|r| (r.id().to_owned(), r))
            .collect()
    }

    /// Replace the index with a new one holding `regions`. The new index
    /// starts clean.
    pub fn set_regions(&self, regions: Vec<RegionRef>) {
        let mut index = self.index.write();
        let fresh = (self.factory)(self.name());
        fresh.add_all(regions);
        fresh.get_and_clear_difference();
        let old = std::mem::replace(&mut *index, fresh);
        old.shutdown();
    }

    /// Add or replace a region. Its parent must already be present.
    pub fn add_region(&self, region: RegionRef) -> ManagerResult<()> {
        let index = self.index.read();
        index.add(region)?;
        Ok(())
    }

    pub fn set_parent(&self, child: &str, parent: Option<&str>) -> ManagerResult<()> {
        let index = self.index.read();
        index.set_parent(child, parent)?;
        Ok(())
    }

    pub fn has_region(&self, id: &str) -> bool {
        self.index().contains(id)
    }

    pub fn region(&self, id: &str) -> Option<RegionRef> {
        self.index().get(id)
    }

    /// Remove a region and all of its descendants.
    pub fn remove_region(&self, id: &str) -> Vec<RegionRef> {
        self.remove_region_with(id, RemovalStrategy::RemoveChildren)
    }

    pub fn remove_region_with(&self, id: &str, strategy: RemovalStrategy) -> Vec<RegionRef> {
        let index = self.index.read();
        index.remove(id, strategy)
    }

    pub fn size(&self) -> usize {
        self.index().size()
    }

    /// Unsaved changes exist.
    pub fn is_dirty(&self) -> bool {
        self.index().is_dirty()
    }

    // ==================== Queries ====================

    /// Regions containing the point, with their ancestors, resolved against
    /// the world's global region.
    pub fn applicable_regions(&self, point: BlockVector3) -> ApplicableRegionSet {
        let index = self.index();
        let mut hits = Vec::new();
        index.apply_containing(point, &mut |r| {
            hits.push(RegionRef::clone(r));
            true
        });
        Self::resolve(index.as_ref(), hits)
    }

    /// Regions intersecting `area`, with their ancestors.
    pub fn applicable_regions_for(&self, area: &Region) -> ApplicableRegionSet {
        let index = self.index();
        let mut hits = Vec::new();
        index.apply_intersecting(area, &mut |r| {
            hits.push(RegionRef::clone(r));
            true
        });
        Self::resolve(index.as_ref(), hits)
    }

    fn resolve(index: &dyn RegionIndex, hits: Vec<RegionRef>) -> ApplicableRegionSet {
        let lookup = IndexLookup(index);
        let mut regions = Vec::with_capacity(hits.len());
        for region in hits.into_iter().filter(|r| !r.is_global()) {
            regions.extend(region.ancestors(&lookup));
            regions.push(region);
        }
        RegionResultSet::new(regions, index.get(GLOBAL_REGION), &lookup).into()
    }

    /// Ids of the regions containing the point, without ancestors.
    pub fn applicable_region_ids(&self, point: BlockVector3) -> Vec<String> {
        let mut ids = Vec::new();
        self.index().apply_containing(point, &mut |r| {
            ids.push(r.id().to_owned());
            true
        });
        ids
    }

    /// Whether `area` overlaps a region that `subject` is not directly an
    /// owner of. The global region covers everything and is not counted.
    pub fn overlaps_unowned_region(&self, area: &Region, subject: &dyn Subject) -> bool {
        let mut unowned = false;
        self.index().apply_intersecting(area, &mut |r| {
            if !r.is_physical_area() {
                return true;
            }
            unowned = !r.owners().contains(subject);
            !unowned
        });
        unowned
    }

    /// Regions listing `subject` as an owner.
    pub fn region_count_of_player(&self, subject: &dyn Subject) -> usize {
        let mut count = 0;
        self.index().apply(&mut |r| {
            if r.owners().contains(subject) {
                count += 1;
            }
            true
        });
        count
    }

    // ==================== Lifecycle ====================

    /// Wait for background index work, up to `timeout`.
    pub fn await_completion(&self, timeout: Duration) -> bool {
        self.index().await_completion(timeout)
    }

    /// Cancel background index work.
    pub fn shutdown(&self) {
        self.index().shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use crate::factory::index_factory;
    use crate::memory::MemoryRegionDatabase;
    use ward_query::FlagQuery;
    use ward_region::{Player, Shape, State, flags};

    fn cuboid(id: &str, min: (i32, i32, i32), max: (i32, i32, i32)) -> Region {
        Region::new(
            id,
            Shape::cuboid(
                BlockVector3::new(min.0, min.1, min.2),
                BlockVector3::new(max.0, max.1, max.2),
            ),
        )
        .unwrap()
    }

    fn manager(db: Arc<MemoryRegionDatabase>) -> RegionManager {
        let config = ContainerConfig {
            use_chunk_cache: false,
            ..ContainerConfig::default()
        };
        RegionManager::new(db, index_factory(&config), Arc::new(FlagRegistry::with_defaults()))
    }

    #[test]
    fn test_load_replaces_index() {
        let db = Arc::new(MemoryRegionDatabase::with_regions(
            "world",
            [&cuboid("a", (0, 0, 0), (5, 5, 5)), &cuboid("b", (10, 0, 10), (15, 5, 15))],
        ));
        let manager = manager(Arc::clone(&db));
        let before = manager.index();

        assert_eq!(manager.load().unwrap(), 2);
        assert!(!Arc::ptr_eq(&before, &manager.index()));
        assert_eq!(manager.size(), 2);
        assert!(!manager.is_dirty());
        assert!(manager.index().get_and_clear_difference().is_empty());
    }

    #[test]
    fn test_save_changes_noop_when_clean() {
        let db = Arc::new(MemoryRegionDatabase::new("world"));
        let manager = manager(Arc::clone(&db));
        assert!(!manager.save_changes().unwrap());
        assert_eq!(db.partial_save_count(), 0);
        assert_eq!(db.full_save_count(), 0);
    }

    #[test]
    fn test_save_changes_partial() {
        let db = Arc::new(MemoryRegionDatabase::new("world"));
        let manager = manager(Arc::clone(&db));
        manager.add_region(Arc::new(cuboid("a", (0, 0, 0), (5, 5, 5)))).unwrap();

        assert!(manager.save_changes().unwrap());
        assert_eq!(db.partial_save_count(), 1);
        assert_eq!(db.stored_ids(), ["a"]);
        assert!(!manager.save_changes().unwrap());
    }

    #[test]
    fn test_save_changes_falls_back_to_full_save() {
        let db = Arc::new(MemoryRegionDatabase::new("world"));
        db.set_partial_saves(false);
        let manager = manager(Arc::clone(&db));
        manager.add_region(Arc::new(cuboid("a", (0, 0, 0), (5, 5, 5)))).unwrap();

        assert!(manager.save_changes().unwrap());
        assert_eq!(db.full_save_count(), 1);
        assert_eq!(db.partial_save_count(), 0);
        assert_eq!(db.stored_ids(), ["a"]);
    }

    #[test]
    fn test_failed_save_keeps_changes() {
        let db = Arc::new(MemoryRegionDatabase::new("world"));
        let manager = manager(Arc::clone(&db));
        manager.add_region(Arc::new(cuboid("a", (0, 0, 0), (5, 5, 5)))).unwrap();

        db.set_fail_saves(true);
        assert!(manager.save_changes().is_err());
        assert!(manager.is_dirty());

        db.set_fail_saves(false);
        assert!(manager.save_changes().unwrap());
        assert_eq!(db.stored_ids(), ["a"]);
    }

    #[test]
    fn test_failed_full_save_keeps_changes() {
        let db = Arc::new(MemoryRegionDatabase::new("world"));
        db.set_partial_saves(false);
        let manager = manager(Arc::clone(&db));
        manager.add_region(Arc::new(cuboid("a", (0, 0, 0), (5, 5, 5)))).unwrap();

        db.set_fail_saves(true);
        assert!(manager.save_changes().is_err());
        assert!(manager.save().is_err());
        assert!(manager.is_dirty());

        db.set_fail_saves(false);
        assert!(manager.save_changes().unwrap());
        assert_eq!(db.full_save_count(), 1);
    }

    #[test]
    fn test_transient_regions_not_saved() {
        let db = Arc::new(MemoryRegionDatabase::new("world"));
        let manager = manager(Arc::clone(&db));
        manager.add_region(Arc::new(cuboid("a", (0, 0, 0), (5, 5, 5)))).unwrap();
        manager
            .add_region(Arc::new(Region::new_transient(
                "probe",
                Shape::cuboid(BlockVector3::new(0, 0, 0), BlockVector3::new(1, 1, 1)),
            )))
            .unwrap();

        manager.save().unwrap();
        assert_eq!(db.stored_ids(), ["a"]);
    }

    #[test]
    fn test_applicable_regions_include_parents() {
        let db = Arc::new(MemoryRegionDatabase::new("world"));
        let manager = manager(db);
        let parent = Arc::new(cuboid("parent", (100, 0, 100), (110, 10, 110)));
        parent.set_flag(&flags::PVP, Some(State::Deny));
        manager.add_region(Arc::clone(&parent)).unwrap();

        let child = cuboid("child", (0, 0, 0), (5, 5, 5));
        child.set_parent(Some(&*parent), &manager.regions()).unwrap();
        manager.add_region(Arc::new(child)).unwrap();

        let set = manager.applicable_regions(BlockVector3::new(1, 1, 1));
        assert_eq!(set.size(), 2);
        assert_eq!(set.query_state(None, &[&*flags::PVP]), Some(State::Deny));
        assert_eq!(manager.applicable_region_ids(BlockVector3::new(1, 1, 1)), ["child"]);
    }

    #[test]
    fn test_global_region_is_not_applicable() {
        let db = Arc::new(MemoryRegionDatabase::new("world"));
        let manager = manager(db);
        let global = Arc::new(Region::global());
        global.set_flag(&flags::PVP, Some(State::Deny));
        manager.add_region(global).unwrap();

        let set = manager.applicable_regions(BlockVector3::new(1, 1, 1));
        assert_eq!(set.size(), 0);
        assert!(set.global().is_some());
        assert_eq!(set.query_state(None, &[&*flags::PVP]), Some(State::Deny));
    }

    #[test]
    fn test_owner_queries() {
        let db = Arc::new(MemoryRegionDatabase::new("world"));
        let manager = manager(db);
        let alice = Player::named("alice");

        let owned = cuboid("owned", (0, 0, 0), (5, 5, 5));
        owned.owners_mut().add_player_name("alice");
        manager.add_region(Arc::new(owned)).unwrap();
        manager.add_region(Arc::new(cuboid("other", (4, 0, 4), (9, 5, 9)))).unwrap();

        assert_eq!(manager.region_count_of_player(&alice), 1);

        let inside = Region::new_transient("_", Shape::cuboid(BlockVector3::new(0, 0, 0), BlockVector3::new(2, 2, 2)));
        let across = Region::new_transient("_", Shape::cuboid(BlockVector3::new(3, 0, 3), BlockVector3::new(6, 2, 6)));
        assert!(!manager.overlaps_unowned_region(&inside, &alice));
        assert!(manager.overlaps_unowned_region(&across, &alice));
    }

    #[test]
    fn test_owner_queries_ignore_global() {
        let db = Arc::new(MemoryRegionDatabase::new("world"));
        let manager = manager(db);
        let alice = Player::named("alice");

        manager.add_region(Arc::new(Region::global())).unwrap();
        let owned = cuboid("owned", (0, 0, 0), (5, 5, 5));
        owned.owners_mut().add_player_name("alice");
        manager.add_region(Arc::new(owned)).unwrap();

        let inside = Region::new_transient("_", Shape::cuboid(BlockVector3::new(0, 0, 0), BlockVector3::new(2, 2, 2)));
        let outside = Region::new_transient("_", Shape::cuboid(BlockVector3::new(50, 0, 50), BlockVector3::new(60, 2, 60)));
        assert!(!manager.overlaps_unowned_region(&inside, &alice));
        assert!(!manager.overlaps_unowned_region(&outside, &alice));
        assert!(manager.overlaps_unowned_region(&inside, &Player::named("bob")));
        assert_eq!(manager.region_count_of_player(&alice), 1);
    }

    #[test]
    fn test_remove_region_defaults_to_children() {
        let db = Arc::new(MemoryRegionDatabase::new("world"));
        let manager = manager(db);
        let root = Arc::new(cuboid("root", (0, 0, 0), (5, 5, 5)));
        manager.add_region(Arc::clone(&root)).unwrap();
        let leaf = cuboid("leaf", (0, 0, 0), (1, 1, 1));
        leaf.set_parent(Some(&*root), &manager.regions()).unwrap();
        manager.add_region(Arc::new(leaf)).unwrap();

        let removed = manager.remove_region("ROOT");
        assert_eq!(removed.len(), 2);
        assert_eq!(manager.size(), 0);
        assert!(!manager.has_region("leaf"));
    }
}
