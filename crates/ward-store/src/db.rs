//! LMDB region storage.

use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use tracing::{debug, trace, warn};
use ward_index::RegionDifference;
use ward_manager::{RegionDatabase, RegionDriver, StorageResult};
use ward_region::{FlagRegistry, Region, RegionRef};

use crate::error::{StoreError, StoreResult};
use crate::record::{RegionRecord, StoredRegion};

/// Separates the world from the region id in keys. Region ids never contain
/// it.
const KEY_SEPARATOR: u8 = b':';

/// One LMDB environment holding the regions of every world.
///
/// Keys are `"{world}:{region id}"`, values are bincode [`StoredRegion`]s.
pub struct RegionStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl RegionStore {
    /// Open or create a store at the given directory.
    ///
    /// # Errors
    /// Returns an error if the directory or environment cannot be created.
    ///
    /// # Safety
    /// Uses unsafe to call heed's open method which requires ensuring
    /// the environment is not opened twice with different options.
    #[allow(unsafe_code)]
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        // SAFETY: each store directory is opened once per process
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1024 * 1024 * 1024) // 1GB max
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let db = env.create_database(&mut wtxn, Some("regions"))?;
        wtxn.commit()?;

        Ok(Self { env, db })
    }

    fn prefix(world: &str) -> String {
        format!("{}{}", world.to_lowercase(), char::from(KEY_SEPARATOR))
    }

    fn key(world: &str, id: &str) -> String {
        format!("{}{id}", Self::prefix(world))
    }

    /// Raw records of one world, keyed by region id.
    pub fn records(&self, world: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let prefix = Self::prefix(world);
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for entry in self.db.prefix_iter(&rtxn, prefix.as_bytes())? {
            let (key, value) = entry?;
            let Some(id) = key.strip_prefix(prefix.as_bytes()) else {
                continue;
            };
            // A longer world name that happens to share the prefix.
            if id.contains(&KEY_SEPARATOR) {
                continue;
            }
            out.push((String::from_utf8_lossy(id).into_owned(), value.to_vec()));
        }
        Ok(out)
    }

    /// Store one record, replacing any previous value.
    pub fn put(&self, world: &str, id: &str, record: &StoredRegion) -> StoreResult<()> {
        let bytes = record.encode()?;
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, Self::key(world, id).as_bytes(), &bytes)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Store raw bytes under a region key. Only useful to plant bad data.
    pub fn put_raw(&self, world: &str, id: &str, bytes: &[u8]) -> StoreResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, Self::key(world, id).as_bytes(), bytes)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Worlds with at least one record, sorted.
    pub fn worlds(&self) -> StoreResult<Vec<String>> {
        let rtxn = self.env.read_txn()?;
        let mut worlds = Vec::new();
        for entry in self.db.iter(&rtxn)? {
            let (key, _) = entry?;
            if let Some(split) = key.iter().rposition(|&b| b == KEY_SEPARATOR) {
                worlds.push(String::from_utf8_lossy(&key[..split]).into_owned());
            }
        }
        worlds.sort();
        worlds.dedup();
        Ok(worlds)
    }

    fn delete_world(&self, wtxn: &mut RwTxn<'_>, world: &str) -> StoreResult<usize> {
        let prefix = Self::prefix(world);
        let keys: Vec<Vec<u8>> = {
            let mut keys = Vec::new();
            for entry in self.db.prefix_iter(wtxn, prefix.as_bytes())? {
                let (key, _) = entry?;
                let is_world = key
                    .strip_prefix(prefix.as_bytes())
                    .is_some_and(|id| !id.contains(&KEY_SEPARATOR));
                if is_world {
                    keys.push(key.to_vec());
                }
            }
            keys
        };
        for key in &keys {
            self.db.delete(wtxn, key)?;
        }
        Ok(keys.len())
    }

    fn write_regions<'r>(
        &self,
        wtxn: &mut RwTxn<'_>,
        world: &str,
        regions: impl Iterator<Item = &'r RegionRef>,
        registry: &FlagRegistry,
    ) -> StoreResult<usize> {
        let mut written = 0;
        for region in regions.filter(|r| !r.is_transient()) {
            let record = StoredRegion::V2(RegionRecord::capture(region, registry));
            self.db.put(wtxn, Self::key(world, region.id()).as_bytes(), &record.encode()?)?;
            written += 1;
        }
        Ok(written)
    }
}

/// Regions of one world inside a [`RegionStore`].
pub struct LmdbRegionDatabase {
    store: Arc<RegionStore>,
    world: String,
    registry: Arc<FlagRegistry>,
}

impl LmdbRegionDatabase {
    pub fn new(store: Arc<RegionStore>, world: &str, registry: Arc<FlagRegistry>) -> Self {
        Self {
            store,
            world: world.to_lowercase(),
            registry,
        }
    }
}

impl RegionDatabase for LmdbRegionDatabase {
    fn name(&self) -> &str {
        &self.world
    }

    fn load_all(&self, registry: &FlagRegistry) -> StorageResult<Vec<Region>> {
        let mut regions = Vec::new();
        let mut migrated = 0;
        for (id, bytes) in self.store.records(&self.world)? {
            let stored = match StoredRegion::decode(&bytes) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!("{}: skipping unreadable region {id}: {e}", self.world);
                    continue;
                }
            };
            if stored.version() < StoredRegion::CURRENT_VERSION {
                migrated += 1;
            }
            match stored.into_current().into_region(registry) {
                Ok(region) => regions.push(region),
                Err(e) => warn!("{}: skipping region: {e}", self.world),
            }
        }
        if migrated > 0 {
            debug!("{}: migrated {migrated} legacy region records", self.world);
        }
        trace!("{}: read {} regions", self.world, regions.len());
        Ok(regions)
    }

    fn save_all(&self, regions: &[RegionRef]) -> StorageResult<()> {
        let store = &self.store;
        let mut wtxn = store.env.write_txn().map_err(StoreError::from)?;
        let deleted = store.delete_world(&mut wtxn, &self.world)?;
        let written = store.write_regions(&mut wtxn, &self.world, regions.iter(), &self.registry)?;
        wtxn.commit().map_err(StoreError::from)?;
        trace!("{}: replaced {deleted} records with {written}", self.world);
        Ok(())
    }

    fn save_changes(&self, difference: &RegionDifference) -> StorageResult<()> {
        let store = &self.store;
        let mut wtxn = store.env.write_txn().map_err(StoreError::from)?;
        let written = store.write_regions(&mut wtxn, &self.world, difference.changed(), &self.registry)?;
        for id in difference.removed() {
            store
                .db
                .delete(&mut wtxn, RegionStore::key(&self.world, id).as_bytes())
                .map_err(StoreError::from)?;
        }
        wtxn.commit().map_err(StoreError::from)?;
        trace!(
            "{}: wrote {written} and deleted {} records",
            self.world,
            difference.removed().len()
        );
        Ok(())
    }
}

/// Hands out [`LmdbRegionDatabase`]s sharing one [`RegionStore`].
pub struct LmdbDriver {
    store: Arc<RegionStore>,
    registry: Arc<FlagRegistry>,
}

impl LmdbDriver {
    pub fn new(store: Arc<RegionStore>, registry: Arc<FlagRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn open(path: impl AsRef<Path>, registry: Arc<FlagRegistry>) -> StoreResult<Self> {
        Ok(Self::new(Arc::new(RegionStore::open(path)?), registry))
    }

    pub fn store(&self) -> &Arc<RegionStore> {
        &self.store
    }
}

impl RegionDriver for LmdbDriver {
    fn get(&self, world: &str) -> StorageResult<Arc<dyn RegionDatabase>> {
        Ok(Arc::new(LmdbRegionDatabase::new(
            Arc::clone(&self.store),
            world,
            Arc::clone(&self.registry),
        )))
    }

    fn worlds(&self) -> StorageResult<Vec<String>> {
        Ok(self.store.worlds()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{LegacyRecord, ShapeRecord};
    use ward_region::{BlockVector3, Shape, State, flags};

    fn region(id: &str) -> RegionRef {
        Arc::new(Region::new(id, Shape::cuboid(BlockVector3::new(0, 0, 0), BlockVector3::new(4, 4, 4))).unwrap())
    }

    fn open() -> (tempfile::TempDir, LmdbDriver) {
        let dir = tempfile::tempdir().unwrap();
        let driver = LmdbDriver::open(dir.path(), Arc::new(FlagRegistry::with_defaults())).unwrap();
        (dir, driver)
    }

    #[test]
    fn test_save_and_load() {
        let (_dir, driver) = open();
        let db = driver.get("World").unwrap();
        let a = region("a");
        a.set_flag(&flags::PVP, Some(State::Deny));
        db.save_all(&[a, region("b")]).unwrap();

        let loaded = db.load_all(&FlagRegistry::with_defaults()).unwrap();
        let mut ids: Vec<_> = loaded.iter().map(|r| r.id().to_owned()).collect();
        ids.sort();
        assert_eq!(ids, ["a", "b"]);
        let a = loaded.iter().find(|r| r.id() == "a").unwrap();
        assert_eq!(a.flag(&flags::PVP), Some(State::Deny));
        assert_eq!(driver.worlds().unwrap(), ["world"]);
    }

    #[test]
    fn test_save_all_replaces_world_only() {
        let (_dir, driver) = open();
        let world = driver.get("world").unwrap();
        let nether = driver.get("nether").unwrap();
        world.save_all(&[region("a"), region("b")]).unwrap();
        nether.save_all(&[region("c")]).unwrap();

        world.save_all(&[region("b")]).unwrap();
        let registry = FlagRegistry::with_defaults();
        assert_eq!(world.load_all(&registry).unwrap().len(), 1);
        assert_eq!(nether.load_all(&registry).unwrap().len(), 1);
        assert_eq!(driver.worlds().unwrap(), ["nether", "world"]);
    }

    #[test]
    fn test_save_changes() {
        let (_dir, driver) = open();
        let db = driver.get("world").unwrap();
        db.save_all(&[region("a"), region("b")]).unwrap();

        let diff = RegionDifference::new([region("c")], ["a".to_owned()]);
        db.save_changes(&diff).unwrap();

        let mut ids: Vec<_> = db
            .load_all(&FlagRegistry::with_defaults())
            .unwrap()
            .iter()
            .map(|r| r.id().to_owned())
            .collect();
        ids.sort();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn test_bad_records_skipped() {
        let (_dir, driver) = open();
        let db = driver.get("world").unwrap();
        db.save_all(&[region("good")]).unwrap();
        driver.store().put_raw("world", "garbage", b"not a record").unwrap();

        let loaded = db.load_all(&FlagRegistry::with_defaults()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id(), "good");
    }

    #[test]
    fn test_legacy_records_migrate() {
        let (_dir, driver) = open();
        let legacy = StoredRegion::V1(LegacyRecord {
            id: "old".to_owned(),
            shape: ShapeRecord::Cuboid {
                min: BlockVector3::new(0, 0, 0),
                max: BlockVector3::new(1, 1, 1),
            },
            priority: 2,
            parent: None,
            owners: vec!["g:admins".to_owned()],
            members: Vec::new(),
            flags: "-b".to_owned(),
        });
        driver.store().put("world", "old", &legacy).unwrap();

        let db = driver.get("world").unwrap();
        let loaded = db.load_all(&FlagRegistry::with_defaults()).unwrap();
        assert_eq!(loaded[0].flag(&flags::BUILD), Some(State::Deny));
        assert_eq!(loaded[0].priority(), 2);

        // Saving writes the current format.
        db.save_all(&[Arc::new(loaded.into_iter().next().unwrap())]).unwrap();
        let records = driver.store().records("world").unwrap();
        assert_eq!(StoredRegion::decode(&records[0].1).unwrap().version(), StoredRegion::CURRENT_VERSION);
    }
}
