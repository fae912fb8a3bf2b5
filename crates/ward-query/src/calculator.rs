//! Per-flag resolution over a sorted region list.
//!
//! Regions arrive ordered by priority (highest first), then nesting depth
//! (children before their parents), then id. Walking that order:
//!
//! - a region's effective value is its own value or the nearest ancestor's,
//!   subject to the group restriction stored beside the flag;
//! - once a region has been examined, its ancestors are skipped, so a child's
//!   value shadows its parent's;
//! - non-state flags stop at the first priority tier that produced a value,
//!   while state flags gather values from every tier so a deny anywhere wins;
//! - the global region is consulted only when no other region answered, then
//!   membership (for flags that use it), then the flag default.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::trace;
use ward_region::{
    AnyFlag, Association, FlagValue, Region, RegionGroup, RegionLookup, RegionRef, State, Subject,
    flags,
};

/// Outcome of a membership test over the applicable regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    /// No region took part, either because there are none or because all of
    /// them are passthrough.
    NoRegions,
    /// The subject is not a member of some counted region.
    Fail,
    /// The subject is a member of every counted region.
    Success,
}

/// How `subject` relates to a chain of regions: owner of any beats member of
/// any beats neither.
pub fn association(subject: &dyn Subject, regions: &[RegionRef], lookup: &dyn RegionLookup) -> Association {
    if regions.iter().any(|r| r.is_owner(subject, lookup)) {
        Association::Owner
    } else if regions.iter().any(|r| r.is_member(subject, lookup)) {
        Association::Member
    } else {
        Association::NonMember
    }
}

/// Resolves flag values for one query.
pub struct FlagValueCalculator<'a> {
    regions: &'a [RegionRef],
    global: Option<&'a RegionRef>,
    lookup: &'a dyn RegionLookup,
}

impl<'a> FlagValueCalculator<'a> {
    /// `regions` must already be sorted and must not contain the global
    /// region.
    pub fn new(regions: &'a [RegionRef], global: Option<&'a RegionRef>, lookup: &'a dyn RegionLookup) -> Self {
        Self {
            regions,
            global,
            lookup,
        }
    }

    fn is_global(&self, region: &RegionRef) -> bool {
        self.global.is_some_and(|g| Arc::ptr_eq(g, region))
    }

    fn add_parents(&self, ignored: &mut FxHashSet<String>, region: &Region) {
        for parent in region.ancestors(self.lookup) {
            ignored.insert(parent.id().to_owned());
        }
    }

    fn group_applies(&self, group: RegionGroup, subject: Option<&dyn Subject>, chain: &[RegionRef]) -> bool {
        match subject {
            None => group == RegionGroup::All,
            Some(subject) => group.contains(association(subject, chain, self.lookup)),
        }
    }

    fn is_member(&self, region: &RegionRef, subject: Option<&dyn Subject>) -> bool {
        subject.is_some_and(|s| {
            RegionGroup::Members.contains(association(s, std::slice::from_ref(region), self.lookup))
        })
    }

    fn passthrough(&self, region: &RegionRef, subject: Option<&dyn Subject>) -> bool {
        self.effective_value(region, &*flags::PASSTHROUGH, subject)
            .and_then(|v| v.as_state())
            == Some(State::Allow)
    }

    /// Membership of the subject across the applicable regions. A missing
    /// subject is a member of nothing.
    pub fn membership(&self, subject: Option<&dyn Subject>) -> Membership {
        let mut minimum = i32::MIN;
        let mut result = Membership::NoRegions;
        let mut ignored = FxHashSet::default();

        for region in self.regions {
            let priority = region.priority();
            if priority < minimum {
                break;
            }
            if self.passthrough(region, subject) || ignored.contains(region.id()) {
                continue;
            }

            minimum = priority;
            if !self.is_member(region, subject) {
                return Membership::Fail;
            }
            result = Membership::Success;
            self.add_parents(&mut ignored, region);
        }

        if result == Membership::NoRegions
            && let Some(global) = self.global
            && !self.passthrough(global, subject)
        {
            return if self.is_member(global, subject) {
                Membership::Success
            } else {
                Membership::Fail
            };
        }

        result
    }

    /// Value of a flag on one region, inherited from ancestors and filtered
    /// by each level's group restriction.
    pub fn effective_value(
        &self,
        region: &RegionRef,
        flag: &dyn AnyFlag,
        subject: Option<&dyn Subject>,
    ) -> Option<FlagValue> {
        if self.is_global(region) {
            if flag.name() == flags::PASSTHROUGH.name() {
                // With owners or members the global region counts like any
                // other region.
                let denied = region.flag_value(flag.name()).and_then(|v| v.as_state()) == Some(State::Deny);
                return if region.has_members_or_owners() || denied {
                    None
                } else {
                    Some(FlagValue::State(State::Allow))
                };
            }
            if flag.prevents_allow_on_global() {
                return region
                    .flag_value(flag.name())
                    .filter(|v| v.as_state() != Some(State::Allow));
            }
        }

        let mut chain = vec![Arc::clone(region)];
        chain.extend(region.ancestors(self.lookup));
        for (level, current) in chain.iter().enumerate() {
            let Some(value) = current.flag_value(flag.name()) else {
                continue;
            };
            let group = current.group_for(flag.name()).unwrap_or(flag.default_group());
            if self.group_applies(group, subject, &chain[..=level]) {
                return Some(value);
            }
        }
        None
    }

    /// Every value that competes for the flag, strongest first. Falls back to
    /// the global region, then membership, then the flag default.
    pub fn query_all_values(&self, flag: &dyn AnyFlag, subject: Option<&dyn Subject>) -> Vec<FlagValue> {
        let independent = flag.priority_independent();
        let mut minimum = i32::MIN;
        let mut values = Vec::new();
        let mut ignored = FxHashSet::default();

        for region in self.regions {
            let priority = region.priority();
            if !independent && priority < minimum {
                break;
            }
            if ignored.contains(region.id()) {
                continue;
            }
            if let Some(value) = self.effective_value(region, flag, subject) {
                trace!("{} = {value:?} from {}", flag.name(), region.id());
                minimum = priority;
                values.push(value);
            }
            self.add_parents(&mut ignored, region);
        }

        if values.is_empty()
            && let Some(global) = self.global
            && let Some(value) = self.effective_value(global, flag, subject)
        {
            values.push(value);
        }

        if values.is_empty() && flag.uses_membership_as_default() {
            match self.membership(subject) {
                Membership::Fail => return Vec::new(),
                Membership::Success => return vec![FlagValue::State(State::Allow)],
                Membership::NoRegions => {}
            }
        }

        if values.is_empty() {
            values.extend(flag.default_value());
        }
        values
    }

    fn effective_map_entry(
        &self,
        region: &RegionRef,
        flag: &dyn AnyFlag,
        key: &str,
        subject: Option<&dyn Subject>,
    ) -> Option<FlagValue> {
        let mut chain = vec![Arc::clone(region)];
        chain.extend(region.ancestors(self.lookup));
        for (level, current) in chain.iter().enumerate() {
            let Some(FlagValue::Map(map)) = current.flag_value(flag.name()) else {
                continue;
            };
            let Some(value) = map.get(key) else {
                continue;
            };
            let group = current.group_for(flag.name()).unwrap_or(flag.default_group());
            if self.group_applies(group, subject, &chain[..=level]) {
                return Some(value.clone());
            }
        }
        None
    }

    /// Competing values for one key of a map flag, and, when no region sets
    /// the key, the competing values of the fallback flag.
    pub fn query_map_entries(
        &self,
        flag: &dyn AnyFlag,
        key: &str,
        fallback: Option<&dyn AnyFlag>,
        subject: Option<&dyn Subject>,
    ) -> (Vec<FlagValue>, Vec<FlagValue>) {
        let mut minimum = i32::MIN;
        let mut entries = Vec::new();
        let mut fallbacks = Vec::new();
        let mut ignored = FxHashSet::default();

        let consider = |region: &RegionRef, entries: &mut Vec<FlagValue>, fallbacks: &mut Vec<FlagValue>| {
            if let Some(value) = self.effective_map_entry(region, flag, key, subject) {
                entries.push(value);
                true
            } else if let Some(value) = fallback.and_then(|f| self.effective_value(region, f, subject)) {
                fallbacks.push(value);
                true
            } else {
                false
            }
        };

        for region in self.regions {
            let priority = region.priority();
            if priority < minimum {
                break;
            }
            if ignored.contains(region.id()) {
                continue;
            }
            if consider(region, &mut entries, &mut fallbacks) {
                minimum = priority;
            }
            self.add_parents(&mut ignored, region);
        }

        if entries.is_empty()
            && fallbacks.is_empty()
            && let Some(global) = self.global
        {
            consider(global, &mut entries, &mut fallbacks);
        }

        (entries, fallbacks)
    }
}
