//! Region set resolved from an index query.

use std::collections::{BTreeMap, HashMap, HashSet};

use ward_region::{AnyFlag, Flag, FlagType, RegionLookup, RegionRef, Subject};

use crate::calculator::{FlagValueCalculator, Membership};
use crate::query::FlagQuery;

/// Regions that apply to a point or area, plus the world's global region.
#[derive(Clone, Debug, Default)]
pub struct RegionResultSet {
    regions: Vec<RegionRef>,
    global: Option<RegionRef>,
    known: BTreeMap<String, RegionRef>,
}

impl RegionResultSet {
    /// Sort `regions` for resolution and capture their ancestors through
    /// `lookup`. A global region found in `regions` is moved to the global
    /// slot if none was given.
    pub fn new(regions: Vec<RegionRef>, global: Option<RegionRef>, lookup: &dyn RegionLookup) -> Self {
        let mut global = global;
        let mut seen = HashSet::new();
        let mut applicable = Vec::with_capacity(regions.len());
        for region in regions {
            if region.is_global() {
                global.get_or_insert(region);
            } else if seen.insert(region.id().to_owned()) {
                applicable.push(region);
            }
        }

        let mut known = BTreeMap::new();
        for region in applicable.iter().chain(global.iter()) {
            known.insert(region.id().to_owned(), RegionRef::clone(region));
            for ancestor in region.ancestors(lookup) {
                known.entry(ancestor.id().to_owned()).or_insert(ancestor);
            }
        }

        let keys: HashMap<String, (i32, usize)> = applicable
            .iter()
            .map(|r| (r.id().to_owned(), (r.priority(), r.depth(&known))))
            .collect();
        applicable.sort_by(|a, b| {
            let (pa, da) = keys[a.id()];
            let (pb, db) = keys[b.id()];
            pb.cmp(&pa).then(db.cmp(&da)).then_with(|| a.id().cmp(b.id()))
        });

        Self {
            regions: applicable,
            global,
            known,
        }
    }

    fn calculator(&self) -> FlagValueCalculator<'_> {
        FlagValueCalculator::new(&self.regions, self.global.as_ref(), &self.known)
    }

    /// Applicable regions in resolution order, without the global region.
    pub fn regions(&self) -> &[RegionRef] {
        &self.regions
    }

    pub fn global(&self) -> Option<&RegionRef> {
        self.global.as_ref()
    }

    pub fn size(&self) -> usize {
        self.regions.len()
    }

    pub fn membership(&self, subject: Option<&dyn Subject>) -> Membership {
        self.calculator().membership(subject)
    }

    /// Owner of every applicable region. Vacuously true with no regions.
    pub fn is_owner_of_all(&self, subject: &dyn Subject) -> bool {
        self.regions.iter().all(|r| r.is_owner(subject, &self.known))
    }

    /// Owner or member of every applicable region.
    pub fn is_member_of_all(&self, subject: &dyn Subject) -> bool {
        self.regions.iter().all(|r| r.is_member(subject, &self.known))
    }
}

impl FlagQuery for RegionResultSet {
    fn query_all_values<T: FlagType>(&self, subject: Option<&dyn Subject>, flag: &Flag<T>) -> Vec<T> {
        self.calculator()
            .query_all_values(flag, subject)
            .iter()
            .filter_map(T::from_value)
            .collect()
    }

    fn query_map_value<V: FlagType>(
        &self,
        subject: Option<&dyn Subject>,
        flag: &Flag<BTreeMap<String, V>>,
        key: &str,
        fallback: Option<&Flag<V>>,
    ) -> Option<V> {
        let fallback_erased = fallback.map(|f| f as &dyn AnyFlag);
        let (entries, fallbacks) = self
            .calculator()
            .query_map_entries(flag, key, fallback_erased, subject);

        if !entries.is_empty() {
            return V::choose(entries.iter().filter_map(V::from_value).collect());
        }
        if !fallbacks.is_empty() {
            return V::choose(fallbacks.iter().filter_map(V::from_value).collect());
        }
        flag.default_value()
            .and_then(|mut map| map.remove(key))
            .or_else(|| fallback.and_then(Flag::default_value))
    }
}
