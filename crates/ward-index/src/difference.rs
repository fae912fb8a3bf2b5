//! Accumulated changes between two persistence sweeps.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ward_region::RegionRef;

/// Regions changed and ids removed since the difference was last drained.
#[derive(Clone, Debug, Default)]
pub struct RegionDifference {
    changed: BTreeMap<String, RegionRef>,
    removed: BTreeSet<String>,
}

impl RegionDifference {
    #[must_use]
    pub fn new(
        changed: impl IntoIterator<Item = RegionRef>,
        removed: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            changed: changed
                .into_iter()
                .map(|r| (r.id().to_owned(), r))
                .collect(),
            removed: removed.into_iter().collect(),
        }
    }

    /// Changed regions, by id.
    pub fn changed(&self) -> impl Iterator<Item = &RegionRef> {
        self.changed.values()
    }

    #[must_use]
    pub fn changed_ids(&self) -> Vec<&str> {
        self.changed.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub const fn removed(&self) -> &BTreeSet<String> {
        &self.removed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    /// Fold a newer difference into this one. A later removal cancels an
    /// earlier change and a later change cancels an earlier removal.
    pub fn merge(&mut self, newer: Self) {
        for id in &newer.removed {
            self.changed.remove(id);
        }
        for (id, region) in newer.changed {
            self.removed.remove(&id);
            self.changed.insert(id, region);
        }
        self.removed.extend(newer.removed);
    }

    /// Whether `region` itself (not just its id) is recorded as changed.
    #[must_use]
    pub fn contains_changed(&self, region: &RegionRef) -> bool {
        self.changed
            .get(region.id())
            .is_some_and(|r| Arc::ptr_eq(r, region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ward_region::{Region, Shape};

    fn region(id: &str) -> RegionRef {
        Arc::new(Region::new(id, Shape::Global).unwrap())
    }

    #[test]
    fn test_empty() {
        assert!(RegionDifference::default().is_empty());
        assert!(!RegionDifference::new([region("a")], []).is_empty());
        assert!(!RegionDifference::new([], ["a".to_owned()]).is_empty());
    }

    #[test]
    fn test_merge_later_wins() {
        let a = region("a");
        let b = region("b");
        let mut older = RegionDifference::new([Arc::clone(&a)], ["b".to_owned()]);
        let newer = RegionDifference::new([Arc::clone(&b)], ["a".to_owned()]);
        older.merge(newer);

        assert_eq!(older.changed_ids(), ["b"]);
        assert!(older.removed().contains("a"));
        assert!(!older.removed().contains("b"));
        assert!(older.contains_changed(&b));
        assert!(!older.contains_changed(&region("b")));
    }
}
