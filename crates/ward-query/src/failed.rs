//! Region set handed out when a world's regions could not be loaded.

use std::collections::BTreeMap;

use ward_region::{Flag, FlagType, FlagValue, RegionRef, State, Subject, flags};

use crate::query::FlagQuery;

/// Deny message reported for worlds whose region data failed to load.
pub const FAILED_LOAD_MESSAGE: &str =
    "Region data failed to load for this world. Contact a server administrator.";

/// Fail-closed stand-in for a world with no usable region data.
///
/// Building is always denied and nobody owns anything. Other flags answer
/// with their defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FailedLoadRegionSet;

#[allow(clippy::unused_self, clippy::trivially_copy_pass_by_ref)]
impl FailedLoadRegionSet {
    pub fn regions(&self) -> &[RegionRef] {
        &[]
    }

    pub const fn size(&self) -> usize {
        0
    }

    pub const fn is_virtual(&self) -> bool {
        true
    }

    pub const fn is_owner_of_all(&self, _subject: &dyn Subject) -> bool {
        false
    }

    pub const fn is_member_of_all(&self, _subject: &dyn Subject) -> bool {
        false
    }

    fn value_of<T: FlagType>(flag: &Flag<T>) -> Option<T> {
        if flag.name() == flags::BUILD.name() {
            T::from_value(&FlagValue::State(State::Deny))
        } else if flag.name() == flags::DENY_MESSAGE.name() {
            T::from_value(&FlagValue::String(FAILED_LOAD_MESSAGE.to_owned()))
        } else {
            flag.default_value()
        }
    }
}

impl FlagQuery for FailedLoadRegionSet {
    fn query_all_values<T: FlagType>(&self, _subject: Option<&dyn Subject>, flag: &Flag<T>) -> Vec<T> {
        Self::value_of(flag).into_iter().collect()
    }

    fn query_map_value<V: FlagType>(
        &self,
        _subject: Option<&dyn Subject>,
        flag: &Flag<BTreeMap<String, V>>,
        key: &str,
        fallback: Option<&Flag<V>>,
    ) -> Option<V> {
        flag.default_value()
            .and_then(|mut map| map.remove(key))
            .or_else(|| fallback.and_then(Self::value_of))
    }

    fn test_build(&self, _subject: &dyn Subject, _overrides: &[&Flag<State>]) -> bool {
        false
    }

    fn test_build_with_map(
        &self,
        _subject: &dyn Subject,
        _flag: &Flag<BTreeMap<String, State>>,
        _key: &str,
        _fallback: Option<&Flag<State>>,
        _overrides: &[&Flag<State>],
    ) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ward_region::Player;

    #[test]
    fn test_build_always_denied() {
        let set = FailedLoadRegionSet;
        let player = Player::named("alice");
        assert_eq!(set.query_state(Some(&player), &[&*flags::BUILD]), Some(State::Deny));
        assert!(!set.test_build(&player, &[]));
        assert!(!set.test_build(&player, &[&*flags::BLOCK_PLACE]));
        assert!(!set.test_build_with_map(&player, &flags::PLAYER_PERMISSIONS, "x", None, &[]));
    }

    #[test]
    fn test_deny_message_replaced() {
        let set = FailedLoadRegionSet;
        assert_eq!(
            set.query_value(None, &flags::DENY_MESSAGE).as_deref(),
            Some(FAILED_LOAD_MESSAGE)
        );
    }

    #[test]
    fn test_other_flags_use_defaults() {
        let set = FailedLoadRegionSet;
        assert_eq!(set.query_value(None, &flags::MOB_DAMAGE), Some(State::Allow));
        assert_eq!(set.query_value(None, &flags::PVP), None);
        assert_eq!(set.query_value(None, &flags::GREETING), None);
    }

    #[test]
    fn test_nobody_owns_anything() {
        let set = FailedLoadRegionSet;
        let player = Player::named("alice");
        assert!(!set.is_owner_of_all(&player));
        assert!(!set.is_member_of_all(&player));
        assert_eq!(set.size(), 0);
        assert!(set.regions().is_empty());
        assert!(set.is_virtual());
    }
}
