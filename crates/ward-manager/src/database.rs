//! Storage contract between managers and persistence backends.

use std::sync::Arc;

use ward_index::RegionDifference;
use ward_region::{FlagRegistry, Region, RegionRef};

use crate::error::{StorageError, StorageResult};

/// Persistent region storage for one world.
///
/// Regions travel with their parent as an id, never as a reference, so a
/// database may return them in any order.
pub trait RegionDatabase: Send + Sync {
    /// Name shown in logs, usually the world name.
    fn name(&self) -> &str;

    /// Load every stored region. Flag keys are resolved through `registry`;
    /// entries that cannot be decoded are logged and skipped.
    fn load_all(&self, registry: &FlagRegistry) -> StorageResult<Vec<Region>>;

    /// Replace the stored set with `regions`.
    fn save_all(&self, regions: &[RegionRef]) -> StorageResult<()>;

    /// Persist only what changed. Databases without partial saves return
    /// [`StorageError::PartialSaveUnsupported`] and get a full save instead.
    fn save_changes(&self, _difference: &RegionDifference) -> StorageResult<()> {
        Err(StorageError::PartialSaveUnsupported)
    }
}

/// Hands out the database for each world.
pub trait RegionDriver: Send + Sync {
    fn get(&self, world: &str) -> StorageResult<Arc<dyn RegionDatabase>>;

    /// Worlds with stored data.
    fn worlds(&self) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }
}
