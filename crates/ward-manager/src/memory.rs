//! In-memory region storage.
//!
//! Useful for tests and for worlds that are never persisted. Failures can be
//! switched on to exercise retry paths.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::trace;
use ward_index::RegionDifference;
use ward_region::{FlagRegistry, Region, RegionRef, normalize_id};

use crate::database::{RegionDatabase, RegionDriver};
use crate::error::{StorageError, StorageResult};

/// Regions kept as detached copies, so later edits to live regions only
/// reach the database through a save.
pub struct MemoryRegionDatabase {
    name: String,
    regions: Mutex<BTreeMap<String, Region>>,
    partial_saves: AtomicBool,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    full_save_count: AtomicUsize,
    partial_save_count: AtomicUsize,
}

impl MemoryRegionDatabase {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            regions: Mutex::new(BTreeMap::new()),
            partial_saves: AtomicBool::new(true),
            fail_loads: AtomicBool::new(false),
            fail_saves: AtomicBool::new(false),
            full_save_count: AtomicUsize::new(0),
            partial_save_count: AtomicUsize::new(0),
        }
    }

    /// Database pre-filled with copies of `regions`.
    #[must_use]
    pub fn with_regions<'a>(name: impl Into<String>, regions: impl IntoIterator<Item = &'a Region>) -> Self {
        let db = Self::new(name);
        {
            let mut stored = db.regions.lock();
            for region in regions {
                stored.insert(region.id().to_owned(), region.duplicate());
            }
        }
        db
    }

    /// Toggle support for partial saves.
    pub fn set_partial_saves(&self, enabled: bool) {
        self.partial_saves.store(enabled, Ordering::Release);
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::Release);
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::Release);
    }

    /// Completed full saves.
    #[must_use]
    pub fn full_save_count(&self) -> usize {
        self.full_save_count.load(Ordering::Acquire)
    }

    /// Completed partial saves.
    #[must_use]
    pub fn partial_save_count(&self) -> usize {
        self.partial_save_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stored_ids(&self) -> Vec<String> {
        self.regions.lock().keys().cloned().collect()
    }

    /// Copy of a stored region.
    #[must_use]
    pub fn stored(&self, id: &str) -> Option<Region> {
        self.regions.lock().get(&normalize_id(id)).map(Region::duplicate)
    }

    fn check_save(&self) -> StorageResult<()> {
        if self.fail_saves.load(Ordering::Acquire) {
            return Err(StorageError::Backend(format!("{}: save failed", self.name)));
        }
        Ok(())
    }
}

impl RegionDatabase for MemoryRegionDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_all(&self, _registry: &FlagRegistry) -> StorageResult<Vec<Region>> {
        if self.fail_loads.load(Ordering::Acquire) {
            return Err(StorageError::Backend(format!("{}: load failed", self.name)));
        }
        Ok(self.regions.lock().values().map(Region::duplicate).collect())
    }

    fn save_all(&self, regions: &[RegionRef]) -> StorageResult<()> {
        self.check_save()?;
        let snapshot = regions
            .iter()
            .filter(|r| !r.is_transient())
            .map(|r| (r.id().to_owned(), r.duplicate()))
            .collect();
        *self.regions.lock() = snapshot;
        self.full_save_count.fetch_add(1, Ordering::AcqRel);
        trace!("{}: saved {} regions", self.name, regions.len());
        Ok(())
    }

    fn save_changes(&self, difference: &RegionDifference) -> StorageResult<()> {
        if !self.partial_saves.load(Ordering::Acquire) {
            return Err(StorageError::PartialSaveUnsupported);
        }
        self.check_save()?;

        let mut stored = self.regions.lock();
        for region in difference.changed().filter(|r| !r.is_transient()) {
            stored.insert(region.id().to_owned(), region.duplicate());
        }
        for id in difference.removed() {
            stored.remove(id);
        }
        self.partial_save_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// One [`MemoryRegionDatabase`] per world, created on first use.
#[derive(Default)]
pub struct MemoryDriver {
    databases: Mutex<HashMap<String, Arc<MemoryRegionDatabase>>>,
}

impl MemoryDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The database for a world, with its test controls.
    pub fn database(&self, world: &str) -> Arc<MemoryRegionDatabase> {
        let key = world.to_lowercase();
        Arc::clone(
            self.databases
                .lock()
                .entry(key)
                .or_insert_with(|| Arc::new(MemoryRegionDatabase::new(world))),
        )
    }
}

impl RegionDriver for MemoryDriver {
    fn get(&self, world: &str) -> StorageResult<Arc<dyn RegionDatabase>> {
        Ok(self.database(world))
    }

    fn worlds(&self) -> StorageResult<Vec<String>> {
        let mut worlds: Vec<String> = self.databases.lock().keys().cloned().collect();
        worlds.sort();
        Ok(worlds)
    }
}
