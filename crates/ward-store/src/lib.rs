//! LMDB-backed region storage.
//!
//! A single [`RegionStore`] environment holds every world. [`LmdbDriver`]
//! plugs it into a `RegionContainer`:
//!
//! ```text
//! RegionContainer ──▶ LmdbDriver ──get(world)──▶ LmdbRegionDatabase
//!                          │                            │
//!                          └──────── Arc<RegionStore> ◀─┘
//! ```
//!
//! Records are versioned (see [`StoredRegion`]); legacy ones are migrated
//! when loaded and rewritten in the current format on the next save.

mod db;
mod error;
mod record;

pub use db::{LmdbDriver, LmdbRegionDatabase, RegionStore};
pub use error::{StoreError, StoreResult};
pub use record::{DomainRecord, LegacyRecord, RegionRecord, ShapeRecord, StoredRegion};
