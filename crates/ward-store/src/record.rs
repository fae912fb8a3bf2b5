//! Versioned on-disk region records.
//!
//! Every value in the store is a bincode-encoded [`StoredRegion`]. The enum
//! tag is the format version:
//!
//! - `V1`: legacy records. Flags are the compact legacy text (`"bp-tc"`) and
//!   owners/members are flat name lists where `g:` marks a group.
//! - `V2`: typed flags as `name -> persisted string`, plus player ids.
//!
//! Only `V2` is written. `V1` is migrated when read.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;
use ward_manager::{StorageError, StorageResult};
use ward_region::{
    BlockVector2, BlockVector3, Domain, FlagRegistry, FlagType, GLOBAL_REGION, Region, Shape, legacy,
};

use crate::error::StoreResult;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeRecord {
    Cuboid { min: BlockVector3, max: BlockVector3 },
    Polygon { points: Vec<BlockVector2>, min_y: i32, max_y: i32 },
    Global,
}

impl ShapeRecord {
    fn capture(shape: &Shape) -> Self {
        match shape {
            Shape::Cuboid(aabb) => Self::Cuboid {
                min: aabb.min,
                max: aabb.max,
            },
            Shape::Polygon(polygon) => Self::Polygon {
                points: polygon.points().to_vec(),
                min_y: polygon.min_y(),
                max_y: polygon.max_y(),
            },
            Shape::Global => Self::Global,
        }
    }

    fn into_shape(self) -> Result<Shape, String> {
        match self {
            Self::Cuboid { min, max } => Ok(Shape::cuboid(min, max)),
            Self::Polygon { points, min_y, max_y } => Shape::polygon(points, min_y, max_y).map_err(|e| e.to_string()),
            Self::Global => Ok(Shape::Global),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub players: Vec<Uuid>,
    pub names: Vec<String>,
    pub groups: Vec<String>,
}

impl DomainRecord {
    /// Custom sub-domains belong to their extensions and are not stored.
    fn capture(domain: &Domain) -> Self {
        Self {
            players: domain.players().collect(),
            names: domain.player_names().map(str::to_owned).collect(),
            groups: domain.groups().map(str::to_owned).collect(),
        }
    }

    fn into_domain(self) -> Domain {
        let mut domain = Domain::new();
        for id in self.players {
            domain.add_player(id);
        }
        for name in &self.names {
            domain.add_player_name(name);
        }
        for group in &self.groups {
            domain.add_group(group);
        }
        domain
    }

    /// Legacy lists: `g:name` is a group, anything else a player name.
    fn from_legacy(entries: Vec<String>) -> Self {
        let mut record = Self::default();
        for entry in entries {
            match entry.strip_prefix("g:") {
                Some(group) => record.groups.push(group.to_owned()),
                None => record.names.push(entry),
            }
        }
        record
    }
}

/// Current record format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub id: String,
    pub shape: ShapeRecord,
    pub priority: i32,
    pub parent: Option<String>,
    pub owners: DomainRecord,
    pub members: DomainRecord,
    pub flags: BTreeMap<String, String>,
}

impl RegionRecord {
    /// Snapshot a region. Flags the registry cannot write are logged and
    /// left out.
    pub fn capture(region: &Region, registry: &FlagRegistry) -> Self {
        let mut flags = BTreeMap::new();
        for (name, value) in region.flags() {
            match registry.marshal(&name, &value) {
                Ok(raw) => {
                    flags.insert(name, raw);
                }
                Err(e) => warn!("{}: not saving flag {name}: {e}", region.id()),
            }
        }

        Self {
            id: region.id().to_owned(),
            shape: ShapeRecord::capture(region.shape()),
            priority: region.priority(),
            parent: region.parent_id(),
            owners: DomainRecord::capture(&region.owners()),
            members: DomainRecord::capture(&region.members()),
            flags,
        }
    }

    /// Rebuild the region. Unknown flags and unparsable values are logged
    /// and skipped; a bad id or shape rejects the record.
    pub fn into_region(self, registry: &FlagRegistry) -> StorageResult<Region> {
        let corrupt = |reason: String| StorageError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let shape = self.shape.clone().into_shape().map_err(corrupt)?;
        let region = if matches!(shape, Shape::Global) {
            if self.id != GLOBAL_REGION {
                return Err(corrupt(format!("global shape on non-global region {}", self.id)));
            }
            Region::global()
        } else {
            Region::new(&self.id, shape).map_err(|e| corrupt(e.to_string()))?
        };

        region.set_priority(self.priority);
        region.set_parent_id(self.parent.as_deref());
        region.set_owners(self.owners.into_domain());
        region.set_members(self.members.into_domain());

        let mut flags = BTreeMap::new();
        for (name, raw) in self.flags {
            match registry.parse(&name, &raw) {
                Ok(value) => {
                    flags.insert(name.to_lowercase(), value);
                }
                Err(e) => warn!("{}: skipping flag {name}: {e}", self.id),
            }
        }
        region.set_flags(flags);
        Ok(region)
    }
}

/// Format of the first release.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRecord {
    pub id: String,
    pub shape: ShapeRecord,
    pub priority: i32,
    pub parent: Option<String>,
    pub owners: Vec<String>,
    pub members: Vec<String>,
    pub flags: String,
}

impl LegacyRecord {
    /// Convert to the current format. Legacy flag codes become typed state
    /// flags.
    pub fn migrate(self) -> RegionRecord {
        let flags = legacy::parse_flags(&self.flags)
            .into_iter()
            .map(|(flag, state)| (flag.name().to_owned(), state.marshal()))
            .collect();

        RegionRecord {
            id: self.id,
            shape: self.shape,
            priority: self.priority,
            parent: self.parent,
            owners: DomainRecord::from_legacy(self.owners),
            members: DomainRecord::from_legacy(self.members),
            flags,
        }
    }
}

/// A record as stored, tagged with its format version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredRegion {
    V1(LegacyRecord),
    V2(RegionRecord),
}

impl StoredRegion {
    pub const CURRENT_VERSION: u32 = 2;

    pub const fn version(&self) -> u32 {
        match self {
            Self::V1(_) => 1,
            Self::V2(_) => 2,
        }
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// The record in the current format.
    pub fn into_current(self) -> RegionRecord {
        match self {
            Self::V1(legacy) => legacy.migrate(),
            Self::V2(record) => record,
        }
    }
}
