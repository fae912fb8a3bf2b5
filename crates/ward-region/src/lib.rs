//! Region model for ward.
//!
//! A region is a named volume of a world with a priority, an optional parent,
//! owner and member domains, and a map of flags:
//!
//! ```text
//!                  ┌──────────────┐
//!                  │   courtyard  │ priority 5, owners {g:courtyard}
//!                  └──────┬───────┘
//!                         │ parent (by id)
//!                  ┌──────┴───────┐
//!                  │   fountain   │ priority 10, members {g:member}
//!                  └──────────────┘
//! ```
//!
//! Shapes are a closed set ([`Shape::Cuboid`], [`Shape::Polygon`],
//! [`Shape::Global`]). Flags are typed through [`Flag<T>`] and stored
//! untyped as [`FlagValue`]. Nothing in this crate knows about indexes or
//! storage.

mod domain;
mod error;
mod flag;
pub mod flags;
pub mod legacy;
mod math;
mod region;
mod shape;
mod subject;

pub use domain::{CustomDomain, Domain};
pub use error::{RegionError, RegionResult};
pub use flag::{AnyFlag, Flag, FlagType, FlagValue, RegionGroup, State, group_flag_name};
pub use flags::FlagRegistry;
pub use math::{Aabb, BlockVector2, BlockVector3, CHUNK_SIZE, ChunkPos, MAX_Y, MIN_Y};
pub use region::{
    GLOBAL_REGION, Region, RegionLookup, RegionRef, creates_cycle, is_valid_id, normalize_id,
};
pub use shape::{Polygon, Shape};
pub use subject::{Association, Player, Subject};
