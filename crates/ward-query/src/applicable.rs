//! The region set callers receive from a manager query.

use std::collections::BTreeMap;

use ward_region::{Flag, FlagType, RegionRef, State, Subject};

use crate::failed::FailedLoadRegionSet;
use crate::query::FlagQuery;
use crate::result_set::RegionResultSet;

/// Either a resolved set of regions or the fail-closed set for a world
/// whose regions did not load.
#[derive(Clone, Debug)]
pub enum ApplicableRegionSet {
    Resolved(RegionResultSet),
    FailedLoad(FailedLoadRegionSet),
}

impl ApplicableRegionSet {
    #[must_use]
    pub const fn failed_load() -> Self {
        Self::FailedLoad(FailedLoadRegionSet)
    }

    /// `true` for sets that do not come from real region data.
    pub const fn is_virtual(&self) -> bool {
        matches!(self, Self::FailedLoad(_))
    }

    pub fn regions(&self) -> &[RegionRef] {
        match self {
            Self::Resolved(set) => set.regions(),
            Self::FailedLoad(set) => set.regions(),
        }
    }

    pub fn size(&self) -> usize {
        self.regions().len()
    }

    pub fn global(&self) -> Option<&RegionRef> {
        match self {
            Self::Resolved(set) => set.global(),
            Self::FailedLoad(_) => None,
        }
    }

    pub fn is_owner_of_all(&self, subject: &dyn Subject) -> bool {
        match self {
            Self::Resolved(set) => set.is_owner_of_all(subject),
            Self::FailedLoad(set) => set.is_owner_of_all(subject),
        }
    }

    pub fn is_member_of_all(&self, subject: &dyn Subject) -> bool {
        match self {
            Self::Resolved(set) => set.is_member_of_all(subject),
            Self::FailedLoad(set) => set.is_member_of_all(subject),
        }
    }
}

impl From<RegionResultSet> for ApplicableRegionSet {
    fn from(set: RegionResultSet) -> Self {
        Self::Resolved(set)
    }
}

impl FlagQuery for ApplicableRegionSet {
    fn query_all_values<T: FlagType>(&self, subject: Option<&dyn Subject>, flag: &Flag<T>) -> Vec<T> {
        match self {
            Self::Resolved(set) => set.query_all_values(subject, flag),
            Self::FailedLoad(set) => set.query_all_values(subject, flag),
        }
    }

    fn query_map_value<V: FlagType>(
        &self,
        subject: Option<&dyn Subject>,
        flag: &Flag<BTreeMap<String, V>>,
        key: &str,
        fallback: Option<&Flag<V>>,
    ) -> Option<V> {
        match self {
            Self::Resolved(set) => set.query_map_value(subject, flag, key, fallback),
            Self::FailedLoad(set) => set.query_map_value(subject, flag, key, fallback),
        }
    }

    fn test_build(&self, subject: &dyn Subject, overrides: &[&Flag<State>]) -> bool {
        match self {
            Self::Resolved(set) => set.test_build(subject, overrides),
            Self::FailedLoad(set) => set.test_build(subject, overrides),
        }
    }

    fn test_build_with_map(
        &self,
        subject: &dyn Subject,
        flag: &Flag<BTreeMap<String, State>>,
        key: &str,
        fallback: Option<&Flag<State>>,
        overrides: &[&Flag<State>],
    ) -> bool {
        match self {
            Self::Resolved(set) => set.test_build_with_map(subject, flag, key, fallback, overrides),
            Self::FailedLoad(set) => set.test_build_with_map(subject, flag, key, fallback, overrides),
        }
    }
}
