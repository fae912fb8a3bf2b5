//! The query surface shared by every region set.

use std::collections::BTreeMap;

use ward_region::{Flag, FlagType, State, Subject, flags};

/// Flag queries against a set of applicable regions.
///
/// Implementors supply [`FlagQuery::query_all_values`] and
/// [`FlagQuery::query_map_value`]; the state helpers build on those.
pub trait FlagQuery {
    /// Every competing value of a flag, strongest first.
    fn query_all_values<T: FlagType>(&self, subject: Option<&dyn Subject>, flag: &Flag<T>) -> Vec<T>;

    /// Effective value of one key of a map flag. When no region sets the key,
    /// `fallback` is resolved like an ordinary flag.
    fn query_map_value<V: FlagType>(
        &self,
        subject: Option<&dyn Subject>,
        flag: &Flag<BTreeMap<String, V>>,
        key: &str,
        fallback: Option<&Flag<V>>,
    ) -> Option<V>;

    /// Effective value of a flag, picked by the flag type.
    fn query_value<T: FlagType>(&self, subject: Option<&dyn Subject>, flag: &Flag<T>) -> Option<T> {
        T::choose(self.query_all_values(subject, flag))
    }

    /// Combined state of several flags; stops at the first deny.
    fn query_state(&self, subject: Option<&dyn Subject>, flags: &[&Flag<State>]) -> Option<State> {
        let mut value = None;
        for flag in flags {
            value = State::combine([value, self.query_value(subject, flag)]);
            if value == Some(State::Deny) {
                break;
            }
        }
        value
    }

    /// Whether the flags combine to an allow.
    fn test_state(&self, subject: Option<&dyn Subject>, flags: &[&Flag<State>]) -> bool {
        State::test([self.query_state(subject, flags)])
    }

    /// Build check with optional override flags.
    ///
    /// Without overrides this is `test_state(build)`. With overrides, a build
    /// deny is dropped to no opinion so an override can still allow, while a
    /// deny from an override always wins.
    fn test_build(&self, subject: &dyn Subject, overrides: &[&Flag<State>]) -> bool {
        if overrides.is_empty() {
            return self.test_state(Some(subject), &[&*flags::BUILD]);
        }
        State::test([
            State::deny_to_none(self.query_state(Some(subject), &[&*flags::BUILD])),
            self.query_state(Some(subject), overrides),
        ])
    }

    /// Build check where one key of a state map flag also takes part.
    fn test_build_with_map(
        &self,
        subject: &dyn Subject,
        flag: &Flag<BTreeMap<String, State>>,
        key: &str,
        fallback: Option<&Flag<State>>,
        overrides: &[&Flag<State>],
    ) -> bool {
        let build = State::deny_to_none(self.query_state(Some(subject), &[&*flags::BUILD]));
        let mapped = self.query_map_value(Some(subject), flag, key, fallback);
        if overrides.is_empty() {
            State::test([build, mapped])
        } else {
            State::test([build, mapped, self.query_state(Some(subject), overrides)])
        }
    }
}
