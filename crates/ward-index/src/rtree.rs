//! Bulk-loaded priority R-tree over region bounding boxes.
//!
//! Each internal node first peels off up to six "priority leaves" holding the
//! most extreme boxes in each direction (lowest min x/y/z, highest max
//! x/y/z), then splits the remainder at the median center along one axis and
//! recurses. Boxes that stick out in some direction end up near the root, so
//! a query that misses them prunes early. The tree is rebuilt from scratch on
//! every change; nothing is inserted incrementally.

use hashbrown::HashMap;
use ward_region::{Aabb, RegionRef};

use crate::hash_map::SpatialAccelerator;

/// Entries per leaf and priority leaves per node.
pub const BRANCH_FACTOR: usize = 30;

const DIRECTIONS: usize = 6;

#[derive(Debug)]
enum NodeKind {
    Leaf(Vec<usize>),
    Branch(Vec<usize>),
}

#[derive(Debug)]
struct Node {
    bounds: Aabb,
    kind: NodeKind,
}

#[derive(Debug, Default)]
pub struct PriorityRTree {
    boxes: Vec<Aabb>,
    regions: Vec<RegionRef>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl PriorityRTree {
    #[must_use]
    pub fn build(regions: impl IntoIterator<Item = RegionRef>) -> Self {
        let regions: Vec<RegionRef> = regions.into_iter().collect();
        let boxes: Vec<Aabb> = regions.iter().map(|r| r.aabb()).collect();
        let mut nodes = Vec::new();

        let root = if regions.is_empty() {
            None
        } else {
            let items: Vec<usize> = (0..regions.len()).collect();
            Some(build_node(&mut nodes, &boxes, items, 0))
        };

        Self {
            boxes,
            regions,
            nodes,
            root,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Append every region whose box intersects `bounds` to `out`.
    pub fn query(&self, bounds: &Aabb, out: &mut Vec<RegionRef>) {
        let Some(root) = self.root else {
            return;
        };

        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !node.bounds.intersects(bounds) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf(items) => out.extend(
                    items
                        .iter()
                        .filter(|&&i| self.boxes[i].intersects(bounds))
                        .map(|&i| RegionRef::clone(&self.regions[i])),
                ),
                NodeKind::Branch(children) => stack.extend(children.iter().copied()),
            }
        }
    }

    /// Levels from the root down to the deepest leaf.
    #[must_use]
    pub fn height(&self) -> usize {
        let Some(root) = self.root else {
            return 0;
        };
        let mut deepest = 0;
        let mut stack = vec![(root, 1)];
        while let Some((index, level)) = stack.pop() {
            deepest = deepest.max(level);
            if let NodeKind::Branch(children) = &self.nodes[index].kind {
                stack.extend(children.iter().map(|&c| (c, level + 1)));
            }
        }
        deepest
    }
}

impl SpatialAccelerator for PriorityRTree {
    fn rebuild(&mut self, regions: &HashMap<String, RegionRef>) {
        *self = Self::build(regions.values().cloned());
    }

    fn candidates(&self, bounds: &Aabb) -> Option<Vec<RegionRef>> {
        let mut out = Vec::new();
        self.query(bounds, &mut out);
        Some(out)
    }
}

fn build_node(nodes: &mut Vec<Node>, boxes: &[Aabb], mut items: Vec<usize>, depth: usize) -> usize {
    if items.len() <= BRANCH_FACTOR {
        return push_node(nodes, boxes, NodeKind::Leaf(items));
    }

    let mut children = Vec::with_capacity(DIRECTIONS + 2);
    for direction in 0..DIRECTIONS {
        if items.is_empty() {
            break;
        }
        let take = BRANCH_FACTOR.min(items.len());
        if take < items.len() {
            items.select_nth_unstable_by_key(take - 1, |&i| boxes[i].extreme(direction));
        }
        let rest = items.split_off(take);
        let leaf = std::mem::replace(&mut items, rest);
        children.push(push_node(nodes, boxes, NodeKind::Leaf(leaf)));
    }

    if items.len() > BRANCH_FACTOR {
        let axis = depth % 3;
        let mid = items.len() / 2;
        items.select_nth_unstable_by_key(mid, |&i| boxes[i].center2(axis));
        let upper = items.split_off(mid);
        children.push(build_node(nodes, boxes, items, depth + 1));
        children.push(build_node(nodes, boxes, upper, depth + 1));
    } else if !items.is_empty() {
        children.push(push_node(nodes, boxes, NodeKind::Leaf(items)));
    }

    push_node(nodes, boxes, NodeKind::Branch(children))
}

fn push_node(nodes: &mut Vec<Node>, boxes: &[Aabb], kind: NodeKind) -> usize {
    let bounds = match &kind {
        NodeKind::Leaf(items) => items.iter().map(|&i| boxes[i]).reduce(|a, b| a.union(&b)),
        NodeKind::Branch(children) => children
            .iter()
            .map(|&c| nodes[c].bounds)
            .reduce(|a, b| a.union(&b)),
    };
    nodes.push(Node {
        bounds: bounds.unwrap_or(Aabb::EVERYTHING),
        kind,
    });
    nodes.len() - 1
}
