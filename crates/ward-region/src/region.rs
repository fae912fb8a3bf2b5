//! The region entity.
//!
//! A region's id, shape and transient bit never change after creation.
//! Everything else sits behind one lock and marks the region dirty when
//! written. Parents are stored by id; resolving them needs a
//! [`RegionLookup`], usually the index the region lives in.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::Domain;
use crate::error::{RegionError, RegionResult};
use crate::flag::{Flag, FlagType, FlagValue, RegionGroup, group_flag_name};
use crate::math::{Aabb, BlockVector2, BlockVector3};
use crate::shape::Shape;
use crate::subject::Subject;

/// Id of the implicit region covering a whole world.
pub const GLOBAL_REGION: &str = "__global__";

/// Shared handle to a region. Identity matters: two handles are the same
/// region only if they point at the same allocation.
pub type RegionRef = Arc<Region>;

/// Resolves region ids to regions.
pub trait RegionLookup {
    fn lookup(&self, id: &str) -> Option<RegionRef>;
}

impl<S: BuildHasher> RegionLookup for std::collections::HashMap<String, RegionRef, S> {
    fn lookup(&self, id: &str) -> Option<RegionRef> {
        self.get(id).cloned()
    }
}

impl<S: BuildHasher> RegionLookup for hashbrown::HashMap<String, RegionRef, S> {
    fn lookup(&self, id: &str) -> Option<RegionRef> {
        self.get(id).cloned()
    }
}

impl RegionLookup for BTreeMap<String, RegionRef> {
    fn lookup(&self, id: &str) -> Option<RegionRef> {
        self.get(id).cloned()
    }
}

/// Check an id against the accepted character set: ASCII letters, digits and
/// `_ , ' - + /`.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ',' | '\'' | '-' | '+' | '/'))
}

/// Ids are case-insensitive and stored lower-cased.
#[must_use]
pub fn normalize_id(id: &str) -> String {
    id.to_lowercase()
}

#[derive(Clone, Debug, Default)]
struct RegionData {
    priority: i32,
    parent: Option<String>,
    owners: Domain,
    members: Domain,
    flags: BTreeMap<String, FlagValue>,
}

/// A named, prioritized volume with flags and owners.
#[derive(Debug)]
pub struct Region {
    id: String,
    shape: Shape,
    transient: bool,
    dirty: AtomicBool,
    data: RwLock<RegionData>,
}

impl Region {
    /// Create a region. New regions start dirty.
    pub fn new(id: &str, shape: Shape) -> RegionResult<Self> {
        if !is_valid_id(id) {
            return Err(RegionError::InvalidId(id.to_owned()));
        }
        Ok(Self::build(normalize_id(id), shape, false))
    }

    /// The world-wide default region.
    #[must_use]
    pub fn global() -> Self {
        Self::build(GLOBAL_REGION.to_owned(), Shape::Global, false)
    }

    /// Helper region that never reaches storage.
    #[must_use]
    pub fn new_transient(id: &str, shape: Shape) -> Self {
        Self::build(normalize_id(id), shape, true)
    }

    fn build(id: String, shape: Shape, transient: bool) -> Self {
        Self {
            id,
            shape,
            transient,
            dirty: AtomicBool::new(true),
            data: RwLock::new(RegionData::default()),
        }
    }

    /// Explicit deep copy with its own identity.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            id: self.id.clone(),
            shape: self.shape.clone(),
            transient: self.transient,
            dirty: AtomicBool::new(self.dirty.load(AtomicOrdering::Acquire)),
            data: RwLock::new(self.data.read().clone()),
        }
    }

    // ==================== Identity & geometry ====================

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn shape(&self) -> &Shape {
        &self.shape
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.transient
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.id == GLOBAL_REGION
    }

    #[must_use]
    pub fn contains(&self, p: BlockVector3) -> bool {
        self.shape.contains(p)
    }

    pub fn intersects(&self, other: &Self) -> RegionResult<bool> {
        self.shape.intersects(&other.shape)
    }

    #[must_use]
    pub fn aabb(&self) -> Aabb {
        self.shape.aabb()
    }

    #[must_use]
    pub fn minimum_point(&self) -> BlockVector3 {
        self.shape.minimum_point()
    }

    #[must_use]
    pub fn maximum_point(&self) -> BlockVector3 {
        self.shape.maximum_point()
    }

    #[must_use]
    pub fn points(&self) -> Vec<BlockVector2> {
        self.shape.points()
    }

    #[must_use]
    pub fn volume(&self) -> i32 {
        self.shape.volume()
    }

    #[must_use]
    pub const fn is_physical_area(&self) -> bool {
        self.shape.is_physical_area()
    }

    /// Priority descending, then id ascending.
    #[must_use]
    pub fn priority_order(a: &Self, b: &Self) -> Ordering {
        b.priority().cmp(&a.priority()).then_with(|| a.id.cmp(&b.id))
    }

    // ==================== Dirty tracking ====================

    /// Unsaved changes on the region or its domains. Transient regions are
    /// never dirty.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        if self.transient {
            return false;
        }
        if self.dirty.load(AtomicOrdering::Acquire) {
            return true;
        }
        let data = self.data.read();
        data.owners.is_dirty() || data.members.is_dirty()
    }

    pub fn set_dirty(&self, dirty: bool) {
        let mut data = self.data.write();
        data.owners.set_dirty(dirty);
        data.members.set_dirty(dirty);
        self.dirty.store(dirty, AtomicOrdering::Release);
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegionData> {
        self.dirty.store(true, AtomicOrdering::Release);
        self.data.write()
    }

    // ==================== Priority & parent ====================

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.data.read().priority
    }

    pub fn set_priority(&self, priority: i32) {
        self.write().priority = priority;
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<String> {
        self.data.read().parent.clone()
    }

    /// Set or clear the parent.
    ///
    /// Walks upward from the proposed parent; if the walk reaches this region
    /// the call fails with [`RegionError::CircularInheritance`] and neither
    /// region changes.
    pub fn set_parent(&self, parent: Option<&Self>, lookup: &dyn RegionLookup) -> RegionResult<()> {
        let Some(parent) = parent else {
            self.write().parent = None;
            return Ok(());
        };

        if creates_cycle(&self.id, parent, lookup) {
            return Err(RegionError::CircularInheritance {
                child: self.id.clone(),
                parent: parent.id.clone(),
            });
        }

        self.write().parent = Some(parent.id.clone());
        Ok(())
    }

    pub fn clear_parent(&self) {
        self.write().parent = None;
    }

    /// Record a parent by id without walking the chain. Loaders use this
    /// before every region exists; an index's `add_all` later clears links
    /// that dangle or loop.
    pub fn set_parent_id(&self, parent: Option<&str>) {
        self.write().parent = parent.map(normalize_id);
    }

    /// Ancestors from the direct parent upward. Stops at a missing id or a
    /// repeated one.
    pub fn ancestors(&self, lookup: &dyn RegionLookup) -> Vec<RegionRef> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(self.id.clone());

        let mut next = self.parent_id();
        while let Some(id) = next {
            if !seen.insert(id.clone()) {
                break;
            }
            let Some(region) = lookup.lookup(&id) else {
                break;
            };
            next = region.parent_id();
            chain.push(region);
        }
        chain
    }

    /// Number of resolvable ancestors.
    #[must_use]
    pub fn depth(&self, lookup: &dyn RegionLookup) -> usize {
        self.ancestors(lookup).len()
    }

    // ==================== Domains ====================

    pub fn owners(&self) -> MappedRwLockReadGuard<'_, Domain> {
        RwLockReadGuard::map(self.data.read(), |d| &d.owners)
    }

    /// Mutable owners. The domain tracks its own dirty state.
    pub fn owners_mut(&self) -> MappedRwLockWriteGuard<'_, Domain> {
        RwLockWriteGuard::map(self.data.write(), |d| &mut d.owners)
    }

    pub fn set_owners(&self, owners: Domain) {
        self.write().owners = owners;
    }

    pub fn members(&self) -> MappedRwLockReadGuard<'_, Domain> {
        RwLockReadGuard::map(self.data.read(), |d| &d.members)
    }

    pub fn members_mut(&self) -> MappedRwLockWriteGuard<'_, Domain> {
        RwLockWriteGuard::map(self.data.write(), |d| &mut d.members)
    }

    pub fn set_members(&self, members: Domain) {
        self.write().members = members;
    }

    #[must_use]
    pub fn has_members_or_owners(&self) -> bool {
        let data = self.data.read();
        !data.owners.is_empty() || !data.members.is_empty()
    }

    /// Owner of this region or any ancestor.
    pub fn is_owner(&self, subject: &dyn Subject, lookup: &dyn RegionLookup) -> bool {
        self.owners().contains(subject)
            || self
                .ancestors(lookup)
                .iter()
                .any(|r| r.owners().contains(subject))
    }

    /// Owner or member of this region or any ancestor.
    pub fn is_member(&self, subject: &dyn Subject, lookup: &dyn RegionLookup) -> bool {
        self.is_owner(subject, lookup) || self.is_member_only(subject, lookup)
    }

    /// Listed as a member of this region or any ancestor, ignoring owners.
    pub fn is_member_only(&self, subject: &dyn Subject, lookup: &dyn RegionLookup) -> bool {
        self.members().contains(subject)
            || self
                .ancestors(lookup)
                .iter()
                .any(|r| r.members().contains(subject))
    }

    // ==================== Flags ====================

    #[must_use]
    pub fn flag<T: FlagType>(&self, flag: &Flag<T>) -> Option<T> {
        self.data.read().flags.get(flag.name()).and_then(T::from_value)
    }

    /// Set or clear a flag. Clearing a flag also clears its group restriction.
    pub fn set_flag<T: FlagType>(&self, flag: &Flag<T>, value: Option<T>) {
        let mut data = self.write();
        match value {
            Some(value) => {
                data.flags.insert(flag.name().to_owned(), value.into_value());
            }
            None => {
                data.flags.remove(flag.name());
                data.flags.remove(&flag.group_flag_name());
            }
        }
    }

    /// Group restriction set on this region for the flag.
    #[must_use]
    pub fn flag_group<T: FlagType>(&self, flag: &Flag<T>) -> Option<RegionGroup> {
        match self.data.read().flags.get(&flag.group_flag_name()) {
            Some(FlagValue::Group(group)) => Some(*group),
            _ => None,
        }
    }

    pub fn set_flag_group<T: FlagType>(&self, flag: &Flag<T>, group: Option<RegionGroup>) {
        self.set_flag_value(&flag.group_flag_name(), group.map(FlagValue::Group));
    }

    /// Raw value under a flag name.
    #[must_use]
    pub fn flag_value(&self, name: &str) -> Option<FlagValue> {
        self.data.read().flags.get(name).cloned()
    }

    /// Group restriction stored for a flag name.
    #[must_use]
    pub fn group_for(&self, name: &str) -> Option<RegionGroup> {
        match self.data.read().flags.get(&group_flag_name(name)) {
            Some(FlagValue::Group(group)) => Some(*group),
            _ => None,
        }
    }

    pub fn set_flag_value(&self, name: &str, value: Option<FlagValue>) {
        let mut data = self.write();
        match value {
            Some(value) => {
                data.flags.insert(name.to_lowercase(), value);
            }
            None => {
                data.flags.remove(&name.to_lowercase());
            }
        }
    }

    /// Snapshot of every flag set on this region.
    #[must_use]
    pub fn flags(&self) -> BTreeMap<String, FlagValue> {
        self.data.read().flags.clone()
    }

    pub fn set_flags(&self, flags: BTreeMap<String, FlagValue>) {
        self.write().flags = flags;
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, priority {})", self.id, self.shape.kind(), self.priority())
    }
}

/// Whether making `parent` the parent of `child_id` would close a loop.
#[must_use]
pub fn creates_cycle(child_id: &str, parent: &Region, lookup: &dyn RegionLookup) -> bool {
    if parent.id == child_id {
        return true;
    }

    let mut seen = HashSet::new();
    let mut next = parent.parent_id();
    while let Some(id) = next {
        if id == child_id {
            return true;
        }
        if !seen.insert(id.clone()) {
            return false;
        }
        next = lookup.lookup(&id).and_then(|r| r.parent_id());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::State;
    use crate::subject::Player;

    fn cuboid(id: &str) -> RegionRef {
        Arc::new(
            Region::new(
                id,
                Shape::cuboid(BlockVector3::new(0, 0, 0), BlockVector3::new(10, 10, 10)),
            )
            .unwrap(),
        )
    }

    fn lookup(regions: &[&RegionRef]) -> BTreeMap<String, RegionRef> {
        regions
            .iter()
            .map(|r| (r.id().to_owned(), Arc::clone(*r)))
            .collect()
    }

    #[test]
    fn test_id_validation_and_normalization() {
        assert!(is_valid_id("Spawn_1,a'b-c+d/e"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id("ünicode"));

        let region = cuboid("MixedCase");
        assert_eq!(region.id(), "mixedcase");
        assert!(matches!(
            Region::new("bad id", Shape::Global),
            Err(RegionError::InvalidId(_))
        ));
    }

    #[test]
    fn test_self_parent_rejected() {
        let a = cuboid("a");
        let map = lookup(&[&a]);
        let err = a.set_parent(Some(a.as_ref()), &map).unwrap_err();
        assert!(matches!(err, RegionError::CircularInheritance { .. }));
        assert_eq!(a.parent_id(), None);
    }

    #[test]
    fn test_cycle_rejected_without_mutation() {
        let a = cuboid("a");
        let b = cuboid("b");
        let c = cuboid("c");
        let map = lookup(&[&a, &b, &c]);

        b.set_parent(Some(a.as_ref()), &map).unwrap();
        c.set_parent(Some(b.as_ref()), &map).unwrap();

        let err = a.set_parent(Some(c.as_ref()), &map).unwrap_err();
        assert_eq!(
            err,
            RegionError::CircularInheritance {
                child: "a".into(),
                parent: "c".into(),
            }
        );
        assert_eq!(a.parent_id(), None);
        assert_eq!(b.parent_id().as_deref(), Some("a"));
        assert_eq!(c.parent_id().as_deref(), Some("b"));
    }

    #[test]
    fn test_ancestors_and_inherited_ownership() {
        let root = cuboid("root");
        let mid = cuboid("mid");
        let leaf = cuboid("leaf");
        let map = lookup(&[&root, &mid, &leaf]);
        mid.set_parent(Some(root.as_ref()), &map).unwrap();
        leaf.set_parent(Some(mid.as_ref()), &map).unwrap();

        let ids: Vec<_> = leaf.ancestors(&map).iter().map(|r| r.id().to_owned()).collect();
        assert_eq!(ids, ["mid", "root"]);
        assert_eq!(leaf.depth(&map), 2);

        root.owners_mut().add_player_name("alice");
        mid.members_mut().add_group("builders");

        let alice = Player::named("alice");
        let builder = Player::named("bob").in_group("builders");
        assert!(leaf.is_owner(&alice, &map));
        assert!(leaf.is_member(&alice, &map));
        assert!(!leaf.is_owner(&builder, &map));
        assert!(leaf.is_member(&builder, &map));
        assert!(!root.is_member(&builder, &map));
    }

    #[test]
    fn test_dirty_tracking() {
        let region = cuboid("a");
        assert!(region.is_dirty(), "new regions are dirty");

        region.set_dirty(false);
        assert!(!region.is_dirty());

        region.members_mut().add_player_name("x");
        assert!(region.is_dirty(), "domain mutation dirties the region");

        region.set_dirty(false);
        region.set_priority(3);
        assert!(region.is_dirty());

        let transient = Region::new_transient("_", Shape::Global);
        transient.set_priority(1);
        assert!(!transient.is_dirty());
    }

    #[test]
    fn test_typed_flags_and_groups() {
        let region = cuboid("a");
        let pvp: Flag<State> = Flag::new("pvp");

        region.set_flag(&pvp, Some(State::Deny));
        region.set_flag_group(&pvp, Some(RegionGroup::NonMembers));
        assert_eq!(region.flag(&pvp), Some(State::Deny));
        assert_eq!(region.flag_group(&pvp), Some(RegionGroup::NonMembers));
        assert_eq!(region.group_for("pvp"), Some(RegionGroup::NonMembers));

        region.set_flag(&pvp, None);
        assert_eq!(region.flag(&pvp), None);
        assert_eq!(region.flag_group(&pvp), None);
        assert!(region.flags().is_empty());
    }

    #[test]
    fn test_priority_order() {
        let a = cuboid("a");
        let b = cuboid("b");
        let c = cuboid("c");
        c.set_priority(5);

        let mut regions = vec![Arc::clone(&b), Arc::clone(&a), Arc::clone(&c)];
        regions.sort_by(|x, y| Region::priority_order(x, y));
        let ids: Vec<_> = regions.iter().map(|r| r.id()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn test_duplicate_has_new_identity() {
        let a = cuboid("a");
        a.set_priority(9);
        let copy = Arc::new(a.duplicate());
        assert!(!Arc::ptr_eq(&a, &copy));
        assert_eq!(copy.priority(), 9);

        copy.set_priority(1);
        assert_eq!(a.priority(), 9);
    }
}
