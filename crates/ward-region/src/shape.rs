//! Region shapes.
//!
//! Every shape answers three questions: does it contain a block, what is its
//! bounding box, and does it intersect another shape. Cuboid pairs compare
//! boxes; any pair involving a polygon compares outlines on the X/Z plane
//! after checking that the Y spans overlap.

use crate::error::{RegionError, RegionResult};
use crate::math::{Aabb, BlockVector2, BlockVector3};

/// Vertical prism with a polygonal outline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Polygon {
    points: Vec<BlockVector2>,
    min_y: i32,
    max_y: i32,
    bounds: Aabb,
}

impl Polygon {
    /// Create a polygon prism. The Y bounds may be given in either order.
    pub fn new(points: Vec<BlockVector2>, y1: i32, y2: i32) -> RegionResult<Self> {
        let first = points.first().ok_or(RegionError::DegeneratePolygon)?;
        let (min_y, max_y) = (y1.min(y2), y1.max(y2));

        let mut min = first.at_y(min_y);
        let mut max = first.at_y(max_y);
        for p in &points {
            min = min.min(p.at_y(min_y));
            max = max.max(p.at_y(max_y));
        }

        Ok(Self {
            points,
            min_y,
            max_y,
            bounds: Aabb::new(min, max),
        })
    }

    /// Outline vertices in order.
    #[must_use]
    pub fn points(&self) -> &[BlockVector2] {
        &self.points
    }

    #[must_use]
    pub const fn min_y(&self) -> i32 {
        self.min_y
    }

    #[must_use]
    pub const fn max_y(&self) -> i32 {
        self.max_y
    }

    /// Fewer than three points enclose no area.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.points.len() < 3
    }

    fn contains(&self, p: BlockVector3) -> bool {
        if self.is_degenerate() || p.y < self.min_y || p.y > self.max_y {
            return false;
        }
        if !self.bounds.contains(p) {
            return false;
        }
        outline_contains(&self.points, p.to_2d())
    }

    fn area_doubled(&self) -> i128 {
        let n = self.points.len();
        let mut sum: i128 = 0;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            sum += i128::from(a.x) * i128::from(b.z) - i128::from(b.x) * i128::from(a.z);
        }
        sum.abs()
    }
}

/// Geometry of a region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    /// Inclusive box.
    Cuboid(Aabb),
    /// Polygonal prism.
    Polygon(Polygon),
    /// Covers the whole world.
    Global,
}

impl Shape {
    /// Box between two opposite corners, both inclusive.
    #[must_use]
    pub fn cuboid(a: BlockVector3, b: BlockVector3) -> Self {
        Self::Cuboid(Aabb::from_corners(a, b))
    }

    /// Polygonal prism between two Y levels.
    pub fn polygon(points: Vec<BlockVector2>, y1: i32, y2: i32) -> RegionResult<Self> {
        Polygon::new(points, y1, y2).map(Self::Polygon)
    }

    /// Short name used in logs and errors.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Cuboid(_) => "cuboid",
            Self::Polygon(_) => "polygon",
            Self::Global => "global",
        }
    }

    /// Whether this shape occupies a bounded volume of the world.
    #[must_use]
    pub const fn is_physical_area(&self) -> bool {
        !matches!(self, Self::Global)
    }

    /// Inclusive containment. Points on a cuboid's maximum face and on a
    /// polygon's edges are inside.
    #[must_use]
    pub fn contains(&self, p: BlockVector3) -> bool {
        match self {
            Self::Cuboid(aabb) => aabb.contains(p),
            Self::Polygon(polygon) => polygon.contains(p),
            Self::Global => true,
        }
    }

    /// Bounding box used by spatial indexes.
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        match self {
            Self::Cuboid(aabb) => *aabb,
            Self::Polygon(polygon) => polygon.bounds,
            Self::Global => Aabb::EVERYTHING,
        }
    }

    #[must_use]
    pub fn minimum_point(&self) -> BlockVector3 {
        self.aabb().min
    }

    #[must_use]
    pub fn maximum_point(&self) -> BlockVector3 {
        self.aabb().max
    }

    /// Horizontal outline: the four corners of a cuboid, the vertices of a
    /// polygon, nothing for the global shape.
    #[must_use]
    pub fn points(&self) -> Vec<BlockVector2> {
        match self {
            Self::Cuboid(aabb) => vec![
                BlockVector2::new(aabb.min.x, aabb.min.z),
                BlockVector2::new(aabb.max.x, aabb.min.z),
                BlockVector2::new(aabb.max.x, aabb.max.z),
                BlockVector2::new(aabb.min.x, aabb.max.z),
            ],
            Self::Polygon(polygon) => polygon.points.clone(),
            Self::Global => Vec::new(),
        }
    }

    /// Number of blocks covered, saturating at `i32::MAX`.
    #[must_use]
    pub fn volume(&self) -> i32 {
        let blocks: i128 = match self {
            Self::Cuboid(aabb) => {
                let span = |min: i32, max: i32| i128::from(max) - i128::from(min) + 1;
                span(aabb.min.x, aabb.max.x) * span(aabb.min.y, aabb.max.y) * span(aabb.min.z, aabb.max.z)
            }
            Self::Polygon(polygon) if polygon.is_degenerate() => 0,
            Self::Polygon(polygon) => {
                let height = i128::from(polygon.max_y) - i128::from(polygon.min_y) + 1;
                (polygon.area_doubled() * height + 1) / 2
            }
            Self::Global => 0,
        };
        i32::try_from(blocks).unwrap_or(i32::MAX)
    }

    /// Exact intersection test.
    ///
    /// Pairs involving a polygon with fewer than three points have no exact
    /// answer and report [`RegionError::UnsupportedIntersection`].
    pub fn intersects(&self, other: &Self) -> RegionResult<bool> {
        match (self, other) {
            (Self::Global, _) | (_, Self::Global) => Ok(true),
            (Self::Cuboid(a), Self::Cuboid(b)) => Ok(a.intersects(b)),
            _ => {
                if self.is_degenerate() || other.is_degenerate() {
                    return Err(RegionError::UnsupportedIntersection(self.kind(), other.kind()));
                }
                if !self.aabb().intersects(&other.aabb()) {
                    return Ok(false);
                }
                let ours = self.points();
                let theirs = other.points();
                Ok(ours.iter().any(|p| outline_contains(&theirs, *p))
                    || theirs.iter().any(|p| outline_contains(&ours, *p))
                    || outlines_cross(&ours, &theirs))
            }
        }
    }

    fn is_degenerate(&self) -> bool {
        matches!(self, Self::Polygon(polygon) if polygon.is_degenerate())
    }
}

/// Point-in-polygon on the X/Z plane. Vertices and edges count as inside.
fn outline_contains(points: &[BlockVector2], target: BlockVector2) -> bool {
    let Some(last) = points.last() else {
        return false;
    };

    let tx = i128::from(target.x);
    let tz = i128::from(target.z);
    let mut inside = false;
    let mut old = *last;

    for &new in points {
        if new == target {
            return true;
        }

        let (a, b) = if new.x > old.x { (old, new) } else { (new, old) };
        let (x1, z1) = (i128::from(a.x), i128::from(a.z));
        let (x2, z2) = (i128::from(b.x), i128::from(b.z));

        if x1 <= tx && tx <= x2 {
            let cross = (tz - z1) * (x2 - x1) - (z2 - z1) * (tx - x1);
            if cross == 0 {
                if (z1 <= tz) == (tz <= z2) {
                    return true;
                }
            } else if cross < 0 && x1 != tx {
                inside = !inside;
            }
        }

        old = new;
    }

    inside
}

fn orientation(a: BlockVector2, b: BlockVector2, c: BlockVector2) -> i128 {
    let cross = (i128::from(b.x) - i128::from(a.x)) * (i128::from(c.z) - i128::from(a.z))
        - (i128::from(b.z) - i128::from(a.z)) * (i128::from(c.x) - i128::from(a.x));
    cross.signum()
}

fn within_span(a: BlockVector2, b: BlockVector2, p: BlockVector2) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.z >= a.z.min(b.z) && p.z <= a.z.max(b.z)
}

fn segments_intersect(p1: BlockVector2, p2: BlockVector2, q1: BlockVector2, q2: BlockVector2) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if d1 * d2 < 0 && d3 * d4 < 0 {
        return true;
    }

    (d1 == 0 && within_span(q1, q2, p1))
        || (d2 == 0 && within_span(q1, q2, p2))
        || (d3 == 0 && within_span(p1, p2, q1))
        || (d4 == 0 && within_span(p1, p2, q2))
}

fn outlines_cross(a: &[BlockVector2], b: &[BlockVector2]) -> bool {
    let (Some(&a_last), Some(&b_last)) = (a.last(), b.last()) else {
        return false;
    };

    let mut prev_a = a_last;
    for &pa in a {
        let mut prev_b = b_last;
        for &pb in b {
            if segments_intersect(prev_a, pa, prev_b, pb) {
                return true;
            }
            prev_b = pb;
        }
        prev_a = pa;
    }
    false
}
