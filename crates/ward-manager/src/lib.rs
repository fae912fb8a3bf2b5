//! World-level orchestration for ward.
//!
//! ```text
//! RegionContainer ── one per server
//!   ├─ Scheduler         (load retries, periodic saves)
//!   └─ RegionManager     ── one per world
//!        ├─ RegionIndex    (built by an IndexFactory)
//!        └─ RegionDatabase (from a RegionDriver)
//! ```
//!
//! Storage backends implement [`RegionDatabase`] and [`RegionDriver`].
//! [`MemoryDriver`] keeps everything in memory.

mod config;
mod container;
mod database;
mod error;
mod factory;
mod manager;
mod memory;
mod scheduler;

pub use config::ContainerConfig;
pub use container::RegionContainer;
pub use database::{RegionDatabase, RegionDriver};
pub use error::{ManagerError, ManagerResult, StorageError, StorageResult};
pub use factory::{IndexFactory, index_factory};
pub use manager::RegionManager;
pub use memory::{MemoryDriver, MemoryRegionDatabase};
pub use scheduler::{Backoff, Scheduler};
