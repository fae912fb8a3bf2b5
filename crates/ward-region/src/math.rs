//! Integer block coordinates, chunk columns and axis-aligned boxes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lowest block Y a region may cover.
pub const MIN_Y: i32 = i32::MIN;

/// Highest block Y a region may cover.
pub const MAX_Y: i32 = i32::MAX;

/// Width of a chunk column in blocks.
pub const CHUNK_SIZE: i32 = 16;

/// A block position in a world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockVector3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockVector3 {
    /// Create a new block position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Component-wise minimum.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    /// Component-wise maximum.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    /// Drop the Y axis.
    #[must_use]
    pub const fn to_2d(self) -> BlockVector2 {
        BlockVector2::new(self.x, self.z)
    }

    /// Chunk column this block falls into.
    #[must_use]
    pub const fn chunk(self) -> ChunkPos {
        ChunkPos::from_block(self.x, self.z)
    }
}

impl fmt::Display for BlockVector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A block position on the horizontal plane (X and Z).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockVector2 {
    pub x: i32,
    pub z: i32,
}

impl BlockVector2 {
    /// Create a new planar position.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Lift to three dimensions at the given Y.
    #[must_use]
    pub const fn at_y(self, y: i32) -> BlockVector3 {
        BlockVector3::new(self.x, y, self.z)
    }
}

/// Coordinates of a 16x16 chunk column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    /// Create a chunk position.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing the given block column.
    #[must_use]
    pub const fn from_block(x: i32, z: i32) -> Self {
        Self::new(x >> 4, z >> 4)
    }

    /// Full-height bounds of this chunk column. Columns past the edge of the
    /// block range are clamped to it.
    #[must_use]
    pub const fn column(self) -> Aabb {
        let min_x = self.x.saturating_mul(CHUNK_SIZE);
        let min_z = self.z.saturating_mul(CHUNK_SIZE);
        Aabb::new(
            BlockVector3::new(min_x, MIN_Y, min_z),
            BlockVector3::new(
                min_x.saturating_add(CHUNK_SIZE - 1),
                MAX_Y,
                min_z.saturating_add(CHUNK_SIZE - 1),
            ),
        )
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

/// Inclusive axis-aligned bounding box in block space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aabb {
    pub min: BlockVector3,
    pub max: BlockVector3,
}

impl Aabb {
    /// Box covering every block in a world.
    pub const EVERYTHING: Self = Self::new(
        BlockVector3::new(i32::MIN, MIN_Y, i32::MIN),
        BlockVector3::new(i32::MAX, MAX_Y, i32::MAX),
    );

    /// Create a box from corners that are already ordered.
    #[must_use]
    pub const fn new(min: BlockVector3, max: BlockVector3) -> Self {
        Self { min, max }
    }

    /// Create a box from any two opposite corners.
    #[must_use]
    pub fn from_corners(a: BlockVector3, b: BlockVector3) -> Self {
        Self::new(a.min(b), a.max(b))
    }

    /// Degenerate box around a single block.
    #[must_use]
    pub const fn point(p: BlockVector3) -> Self {
        Self::new(p, p)
    }

    /// Inclusive containment.
    #[must_use]
    pub const fn contains(&self, p: BlockVector3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Inclusive overlap; boxes that share a face intersect.
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        !(other.max.x < self.min.x
            || other.max.y < self.min.y
            || other.max.z < self.min.z
            || other.min.x > self.max.x
            || other.min.y > self.max.y
            || other.min.z > self.max.z)
    }

    /// Smallest box enclosing both.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Sort key along one of six directions: the three minimum faces ascending,
    /// then the three maximum faces descending.
    #[must_use]
    pub const fn extreme(&self, direction: usize) -> i64 {
        match direction {
            0 => self.min.x as i64,
            1 => self.min.y as i64,
            2 => self.min.z as i64,
            3 => -(self.max.x as i64),
            4 => -(self.max.y as i64),
            _ => -(self.max.z as i64),
        }
    }

    /// Center along one axis (0 = x, 1 = y, 2 = z), doubled to stay integral.
    #[must_use]
    pub const fn center2(&self, axis: usize) -> i64 {
        match axis {
            0 => self.min.x as i64 + self.max.x as i64,
            1 => self.min.y as i64 + self.max.y as i64,
            _ => self.min.z as i64 + self.max.z as i64,
        }
    }
}
