//! Supervisor owning one region manager per world.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use ward_query::ApplicableRegionSet;
use ward_region::{BlockVector3, FlagRegistry};

use crate::config::ContainerConfig;
use crate::database::RegionDriver;
use crate::error::{ManagerError, ManagerResult};
use crate::factory::{IndexFactory, index_factory};
use crate::manager::RegionManager;
use crate::scheduler::{Backoff, Scheduler};

#[derive(Default)]
struct Failures {
    loads: BTreeMap<String, Backoff>,
    saves: BTreeMap<String, Backoff>,
}

/// Lock order: `io`, then `managers`, then `failures`. Queries only take
/// the last two, and never while storage is being read or written.
struct Shared {
    driver: Arc<dyn RegionDriver>,
    registry: Arc<FlagRegistry>,
    factory: IndexFactory,
    config: ContainerConfig,
    managers: RwLock<HashMap<String, Arc<RegionManager>>>,
    failures: Mutex<Failures>,
    /// Serializes loads, saves and unloads.
    io: Mutex<()>,
}

/// Loads, saves and unloads the regions of every world.
///
/// A background thread retries worlds that failed to load and saves changed
/// regions, each on its own interval. Worlds that keep failing are retried
/// less often, and a repeated identical error is logged only briefly.
pub struct RegionContainer {
    shared: Arc<Shared>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl RegionContainer {
    pub fn new(driver: Arc<dyn RegionDriver>, registry: Arc<FlagRegistry>, config: ContainerConfig) -> Self {
        let shared = Arc::new(Shared {
            driver,
            registry,
            factory: index_factory(&config),
            config,
            managers: RwLock::new(HashMap::new()),
            failures: Mutex::new(Failures::default()),
            io: Mutex::new(()),
        });

        let loader = Arc::downgrade(&shared);
        let saver = Arc::downgrade(&shared);
        let scheduler = Scheduler::start(
            "ward-region-io",
            shared.config.load_retry_interval,
            shared.config.save_interval,
            move || with_shared(&loader, |s| s.retry_failed_loads()),
            move || with_shared(&saver, |s| s.save_all_changes()),
        );
        let scheduler = match scheduler {
            Ok(scheduler) => Some(scheduler),
            Err(e) => {
                error!("failed to start region I/O thread, background saves are disabled: {e}");
                None
            }
        };

        Self {
            shared,
            scheduler: Mutex::new(scheduler),
        }
    }

    pub fn driver(&self) -> &Arc<dyn RegionDriver> {
        &self.shared.driver
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.shared.config
    }

    /// Manager for a world, loading it on first use. Returns `None` if the
    /// load failed; the world is then retried in the background.
    pub fn load(&self, world: &str) -> Option<Arc<RegionManager>> {
        self.shared.load(world)
    }

    /// Save and drop a world's manager.
    pub fn unload(&self, world: &str) {
        let key = world_key(world);
        let _io = self.shared.io.lock();
        let manager = self.shared.managers.read().get(&key).cloned();
        if let Some(manager) = manager {
            if let Err(e) = manager.save() {
                warn!("{world}: failed to save regions while unloading: {e}");
            }
            self.shared.managers.write().remove(&key);
            manager.shutdown();
        }
        let mut failures = self.shared.failures.lock();
        failures.saves.remove(&key);
        failures.loads.remove(&key);
    }

    /// Save changes of every world and drop all managers.
    pub fn unload_all(&self) {
        let _io = self.shared.io.lock();
        for (world, manager) in self.shared.loaded() {
            if let Err(e) = manager.save_changes() {
                warn!("{world}: failed to save regions while unloading all worlds: {e}");
            }
            if !manager.await_completion(self.shared.config.shutdown_timeout) {
                debug!("{world}: background index work did not finish in time");
            }
            self.shared.managers.write().remove(&world);
            manager.shutdown();
        }
        let mut failures = self.shared.failures.lock();
        failures.loads.clear();
        failures.saves.clear();
    }

    /// Stop background work, then save and unload every world.
    pub fn shutdown(&self) {
        if let Some(mut scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
        }
        self.unload_all();
    }

    pub fn get(&self, world: &str) -> Option<Arc<RegionManager>> {
        self.shared.managers.read().get(&world_key(world)).cloned()
    }

    pub fn get_loaded(&self) -> Vec<Arc<RegionManager>> {
        self.shared.managers.read().values().cloned().collect()
    }

    /// Worlds whose last background save failed.
    pub fn get_save_failures(&self) -> Vec<String> {
        self.shared.failures.lock().saves.keys().cloned().collect()
    }

    /// Worlds waiting for a load retry.
    pub fn get_load_failures(&self) -> Vec<String> {
        self.shared.failures.lock().loads.keys().cloned().collect()
    }

    /// Regions at a point of a world. A world whose data failed to load
    /// answers with the fail-closed set.
    pub fn applicable_regions(&self, world: &str, point: BlockVector3) -> ManagerResult<ApplicableRegionSet> {
        let key = world_key(world);
        if self.shared.failures.lock().loads.contains_key(&key) {
            return Ok(ApplicableRegionSet::failed_load());
        }
        let manager = self.shared.managers.read().get(&key).cloned();
        manager
            .map(|m| m.applicable_regions(point))
            .ok_or_else(|| ManagerError::NotLoaded(world.to_owned()))
    }

    /// Retry due failed loads now. Returns how many worlds loaded.
    pub fn retry_failed_loads(&self) -> usize {
        self.shared.retry_failed_loads()
    }

    /// Save changes of every loaded world now. Returns how many saved
    /// something.
    pub fn save_all_changes(&self) -> usize {
        self.shared.save_all_changes()
    }
}

impl Drop for RegionContainer {
    fn drop(&mut self) {
        if let Some(mut scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
        }
    }
}

fn world_key(world: &str) -> String {
    world.to_lowercase()
}

/// Run a background task if the container still exists.
fn with_shared<R>(shared: &Weak<Shared>, task: impl FnOnce(&Shared) -> R) -> bool {
    let Some(shared) = shared.upgrade() else {
        return false;
    };
    task(&shared);
    true
}

impl Shared {
    fn create_and_load(&self, world: &str) -> ManagerResult<Arc<RegionManager>> {
        let store = self.driver.get(world)?;
        let manager = RegionManager::new(store, Arc::clone(&self.factory), Arc::clone(&self.registry));
        manager.load()?;
        Ok(Arc::new(manager))
    }

    fn loaded(&self) -> Vec<(String, Arc<RegionManager>)> {
        self.managers
            .read()
            .iter()
            .map(|(world, manager)| (world.clone(), Arc::clone(manager)))
            .collect()
    }

    fn load(&self, world: &str) -> Option<Arc<RegionManager>> {
        let key = world_key(world);
        if let Some(manager) = self.managers.read().get(&key) {
            return Some(Arc::clone(manager));
        }

        let _io = self.io.lock();
        // Loaded by another thread while we waited.
        if let Some(manager) = self.managers.read().get(&key) {
            return Some(Arc::clone(manager));
        }

        match self.create_and_load(world) {
            Ok(manager) => {
                self.managers.write().insert(key.clone(), Arc::clone(&manager));
                self.failures.lock().loads.remove(&key);
                Some(manager)
            }
            Err(e) => {
                warn!("{world}: failed to load region data, retrying in the background: {e}");
                let now = Instant::now();
                let config = &self.config;
                self.failures
                    .lock()
                    .loads
                    .entry(key)
                    .or_insert_with(|| Backoff::new(now))
                    .fail(now, &e.to_string(), config.load_retry_interval, config.max_backoff);
                None
            }
        }
    }

    fn retry_failed_loads(&self) -> usize {
        let _io = self.io.lock();
        let now = Instant::now();
        let due: Vec<String> = self
            .failures
            .lock()
            .loads
            .iter()
            .filter(|(_, backoff)| backoff.is_due(now))
            .map(|(world, _)| world.clone())
            .collect();

        let mut loaded = 0;
        for world in due {
            match self.create_and_load(&world) {
                Ok(manager) => {
                    self.managers.write().insert(world.clone(), manager);
                    self.failures.lock().loads.remove(&world);
                    info!("{world}: region data loaded after earlier failures");
                    loaded += 1;
                }
                Err(e) => {
                    let message = e.to_string();
                    let mut failures = self.failures.lock();
                    let Some(backoff) = failures.loads.get_mut(&world) else {
                        continue;
                    };
                    let fresh = backoff.fail(now, &message, self.config.load_retry_interval, self.config.max_backoff);
                    if fresh {
                        warn!("{world}: region data still fails to load: {message}");
                    } else {
                        debug!("{world}: region data still fails to load ({} attempts)", backoff.failures());
                    }
                }
            }
        }
        loaded
    }

    fn save_all_changes(&self) -> usize {
        let _io = self.io.lock();
        let now = Instant::now();

        let mut saved = 0;
        for (world, manager) in self.loaded() {
            if self.failures.lock().saves.get(&world).is_some_and(|b| !b.is_due(now)) {
                continue;
            }
            let result = manager.save_changes();
            let mut failures = self.failures.lock();
            match result {
                Ok(changed) => {
                    if changed {
                        info!("{world}: region changes saved in the background");
                        saved += 1;
                    }
                    if failures.saves.remove(&world).is_some() {
                        info!("{world}: background saves recovered");
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    let backoff = failures.saves.entry(world.clone()).or_insert_with(|| Backoff::new(now));
                    if backoff.fail(now, &message, self.config.save_interval, self.config.max_backoff) {
                        warn!("{world}: failed to save region data during a periodic save: {message}");
                    } else {
                        debug!("{world}: periodic save still failing ({} attempts)", backoff.failures());
                    }
                }
            }
        }
        saved
    }
}
