//! Typed flags and their values.
//!
//! A region stores flag values untyped as [`FlagValue`] keyed by flag name.
//! A [`Flag<T>`] gives a typed view onto one key and carries the behaviour the
//! resolver needs: default value, default group and the membership rules.
//! [`AnyFlag`] erases the type so a registry can hold flags of every kind.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::subject::Association;

// ==================== Values ====================

/// Value of a state flag. Absence is expressed as `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Allow,
    Deny,
}

impl State {
    /// Deny beats allow, allow beats nothing.
    pub fn combine(states: impl IntoIterator<Item = Option<Self>>) -> Option<Self> {
        let mut result = None;
        for state in states.into_iter().flatten() {
            match state {
                Self::Deny => return Some(Self::Deny),
                Self::Allow => result = Some(Self::Allow),
            }
        }
        result
    }

    /// Allowed only when something allows and nothing denies.
    pub fn test(states: impl IntoIterator<Item = Option<Self>>) -> bool {
        Self::combine(states) == Some(Self::Allow)
    }

    /// Turn a deny into no opinion.
    #[must_use]
    pub const fn deny_to_none(state: Option<Self>) -> Option<Self> {
        match state {
            Some(Self::Deny) => None,
            other => other,
        }
    }

    /// Keep only an allow.
    #[must_use]
    pub const fn allow_only(state: Option<Self>) -> Option<Self> {
        match state {
            Some(Self::Allow) => Some(Self::Allow),
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        })
    }
}

/// Subjects a flag value applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionGroup {
    All,
    Members,
    Owners,
    NonMembers,
    NonOwners,
    None,
}

impl RegionGroup {
    /// Whether a subject with this association falls in the group.
    #[must_use]
    pub const fn contains(self, association: Association) -> bool {
        match self {
            Self::All => true,
            Self::Members => matches!(association, Association::Owner | Association::Member),
            Self::Owners => matches!(association, Association::Owner),
            Self::NonMembers => matches!(association, Association::NonMember),
            Self::NonOwners => matches!(association, Association::Member | Association::NonMember),
            Self::None => false,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Members => "members",
            Self::Owners => "owners",
            Self::NonMembers => "nonmembers",
            Self::NonOwners => "nonowners",
            Self::None => "none",
        }
    }

    /// Accepts the canonical names plus common singular and spaced forms.
    #[must_use]
    pub fn detect(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "all" | "everyone" | "everybody" => Some(Self::All),
            "member" | "members" => Some(Self::Members),
            "owner" | "owners" => Some(Self::Owners),
            "nonmember" | "nonmembers" => Some(Self::NonMembers),
            "nonowner" | "nonowners" => Some(Self::NonOwners),
            "none" | "nobody" => Some(Self::None),
            _ => None,
        }
    }
}

/// Untyped flag value as stored on a region.
#[derive(Clone, Debug, PartialEq)]
pub enum FlagValue {
    State(State),
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Group(RegionGroup),
    Set(BTreeSet<String>),
    Map(BTreeMap<String, FlagValue>),
}

impl FlagValue {
    #[must_use]
    pub const fn as_state(&self) -> Option<State> {
        match self {
            Self::State(state) => Some(*state),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

// ==================== Flag types ====================

/// A Rust type usable as a flag value.
pub trait FlagType: Clone + fmt::Debug + Send + Sync + 'static {
    /// Values combine across every applicable region instead of the
    /// highest-priority one.
    const PRIORITY_INDEPENDENT: bool = false;

    fn from_value(value: &FlagValue) -> Option<Self>;

    fn into_value(self) -> FlagValue;

    /// Parse the persisted string form.
    fn parse(raw: &str) -> Option<Self>;

    /// Persisted string form.
    fn marshal(&self) -> String;

    /// Pick the effective value out of candidates ordered strongest first.
    fn choose(values: Vec<Self>) -> Option<Self> {
        values.into_iter().next()
    }
}

impl FlagType for State {
    const PRIORITY_INDEPENDENT: bool = true;

    fn from_value(value: &FlagValue) -> Option<Self> {
        value.as_state()
    }

    fn into_value(self) -> FlagValue {
        FlagValue::State(self)
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }

    fn marshal(&self) -> String {
        self.to_string()
    }

    fn choose(values: Vec<Self>) -> Option<Self> {
        Self::combine(values.into_iter().map(Some))
    }
}

impl FlagType for bool {
    fn from_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    fn into_value(self) -> FlagValue {
        FlagValue::Boolean(self)
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "allow" => Some(true),
            "false" | "no" | "off" | "deny" => Some(false),
            _ => None,
        }
    }

    fn marshal(&self) -> String {
        self.to_string()
    }
}

impl FlagType for i64 {
    fn from_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    fn into_value(self) -> FlagValue {
        FlagValue::Integer(self)
    }

    fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }

    fn marshal(&self) -> String {
        self.to_string()
    }
}

impl FlagType for f64 {
    fn from_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    fn into_value(self) -> FlagValue {
        FlagValue::Double(self)
    }

    fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<Self>().ok().filter(|d| d.is_finite())
    }

    fn marshal(&self) -> String {
        self.to_string()
    }
}

impl FlagType for String {
    fn from_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> FlagValue {
        FlagValue::String(self)
    }

    fn parse(raw: &str) -> Option<Self> {
        Some(raw.to_owned())
    }

    fn marshal(&self) -> String {
        self.clone()
    }
}

impl FlagType for RegionGroup {
    fn from_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Group(g) => Some(*g),
            _ => None,
        }
    }

    fn into_value(self) -> FlagValue {
        FlagValue::Group(self)
    }

    fn parse(raw: &str) -> Option<Self> {
        Self::detect(raw)
    }

    fn marshal(&self) -> String {
        self.as_str().to_owned()
    }
}

impl FlagType for BTreeSet<String> {
    fn from_value(value: &FlagValue) -> Option<Self> {
        match value {
            FlagValue::Set(set) => Some(set.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> FlagValue {
        FlagValue::Set(self)
    }

    fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    fn marshal(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl<V: FlagType> FlagType for BTreeMap<String, V> {
    fn from_value(value: &FlagValue) -> Option<Self> {
        value
            .as_map()?
            .iter()
            .map(|(k, v)| V::from_value(v).map(|v| (k.clone(), v)))
            .collect()
    }

    fn into_value(self) -> FlagValue {
        FlagValue::Map(self.into_iter().map(|(k, v)| (k, v.into_value())).collect())
    }

    fn parse(raw: &str) -> Option<Self> {
        let entries: BTreeMap<String, String> = serde_json::from_str(raw).ok()?;
        entries
            .into_iter()
            .map(|(k, v)| V::parse(&v).map(|v| (k, v)))
            .collect()
    }

    fn marshal(&self) -> String {
        let entries: BTreeMap<&str, String> =
            self.iter().map(|(k, v)| (k.as_str(), v.marshal())).collect();
        serde_json::to_string(&entries).unwrap_or_default()
    }
}

// ==================== Flags ====================

/// A named, typed flag.
#[derive(Clone, Debug)]
pub struct Flag<T: FlagType> {
    name: String,
    default: Option<T>,
    default_group: RegionGroup,
    uses_membership_as_default: bool,
    prevents_allow_on_global: bool,
}

impl<T: FlagType> Flag<T> {
    /// Flag with no default that applies to everyone.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            default: None,
            default_group: RegionGroup::All,
            uses_membership_as_default: false,
            prevents_allow_on_global: false,
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: T) -> Self {
        self.default = Some(value);
        self
    }

    /// Group used when a region sets the flag without a group restriction.
    #[must_use]
    pub fn with_default_group(mut self, group: RegionGroup) -> Self {
        self.default_group = group;
        self
    }

    /// Fall back to region membership when no region sets the flag.
    #[must_use]
    pub fn using_membership_as_default(mut self) -> Self {
        self.uses_membership_as_default = true;
        self
    }

    /// Ignore an allow set on the global region.
    #[must_use]
    pub fn preventing_allow_on_global(mut self) -> Self {
        self.prevents_allow_on_global = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn default_value(&self) -> Option<T> {
        self.default.clone()
    }

    #[must_use]
    pub const fn default_group(&self) -> RegionGroup {
        self.default_group
    }

    /// Name of the companion flag holding this flag's group restriction.
    #[must_use]
    pub fn group_flag_name(&self) -> String {
        group_flag_name(&self.name)
    }
}

/// `<name>-group`.
#[must_use]
pub fn group_flag_name(name: &str) -> String {
    format!("{name}-group")
}

/// Type-erased view of a flag.
pub trait AnyFlag: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn default_value(&self) -> Option<FlagValue>;

    fn default_group(&self) -> RegionGroup;

    fn uses_membership_as_default(&self) -> bool;

    fn prevents_allow_on_global(&self) -> bool;

    fn priority_independent(&self) -> bool;

    /// Parse a persisted string into a value of this flag's type.
    fn parse(&self, raw: &str) -> Option<FlagValue>;

    /// Persisted string form, or `None` if the value has the wrong type.
    fn marshal(&self, value: &FlagValue) -> Option<String>;
}

impl<T: FlagType> AnyFlag for Flag<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_value(&self) -> Option<FlagValue> {
        self.default.clone().map(T::into_value)
    }

    fn default_group(&self) -> RegionGroup {
        self.default_group
    }

    fn uses_membership_as_default(&self) -> bool {
        self.uses_membership_as_default
    }

    fn prevents_allow_on_global(&self) -> bool {
        self.prevents_allow_on_global
    }

    fn priority_independent(&self) -> bool {
        T::PRIORITY_INDEPENDENT
    }

    fn parse(&self, raw: &str) -> Option<FlagValue> {
        T::parse(raw).map(T::into_value)
    }

    fn marshal(&self, value: &FlagValue) -> Option<String> {
        T::from_value(value).map(|v| v.marshal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_combine() {
        use State::{Allow, Deny};
        assert_eq!(State::combine([None, None]), None);
        assert_eq!(State::combine([None, Some(Allow)]), Some(Allow));
        assert_eq!(State::combine([Some(Allow), Some(Deny), Some(Allow)]), Some(Deny));
        assert!(State::test([Some(Allow), None]));
        assert!(!State::test([Some(Allow), Some(Deny)]));
        assert!(!State::test([None]));
        assert_eq!(State::deny_to_none(Some(Deny)), None);
        assert_eq!(State::allow_only(Some(Deny)), None);
        assert_eq!(State::allow_only(Some(Allow)), Some(Allow));
    }

    #[test]
    fn test_region_group_membership() {
        use Association::{Member, NonMember, Owner};
        assert!(RegionGroup::Members.contains(Owner));
        assert!(RegionGroup::Members.contains(Member));
        assert!(!RegionGroup::Members.contains(NonMember));
        assert!(RegionGroup::NonOwners.contains(Member));
        assert!(!RegionGroup::NonOwners.contains(Owner));
        assert!(!RegionGroup::None.contains(Owner));
        assert!(RegionGroup::All.contains(NonMember));
    }

    #[test]
    fn test_region_group_detect() {
        assert_eq!(RegionGroup::detect("non_members"), Some(RegionGroup::NonMembers));
        assert_eq!(RegionGroup::detect("Owner"), Some(RegionGroup::Owners));
        assert_eq!(RegionGroup::detect("everyone"), Some(RegionGroup::All));
        assert_eq!(RegionGroup::detect("staff"), None);
    }

    #[test]
    fn test_marshal_map_and_set() {
        let flag: Flag<BTreeMap<String, State>> = Flag::new("perms");
        let value = flag.parse(r#"{"a":"allow","b":"DENY"}"#).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map["a"], FlagValue::State(State::Allow));
        assert_eq!(map["b"], FlagValue::State(State::Deny));
        assert_eq!(flag.marshal(&value).unwrap(), r#"{"a":"allow","b":"deny"}"#);

        let set: Flag<BTreeSet<String>> = Flag::new("cmds");
        let value = set.parse(r#"["/tp","/home"]"#).unwrap();
        assert_eq!(set.marshal(&value).unwrap(), r#"["/home","/tp"]"#);
    }

    #[test]
    fn test_marshal_wrong_type() {
        let flag: Flag<i64> = Flag::new("heal-amount");
        assert!(flag.marshal(&FlagValue::String("x".into())).is_none());
        assert!(flag.parse("twelve").is_none());
        assert_eq!(flag.parse(" 12 "), Some(FlagValue::Integer(12)));
    }

    #[test]
    fn test_flag_names_lowercase() {
        let flag: Flag<State> = Flag::new("Block-Break");
        assert_eq!(flag.name(), "block-break");
        assert_eq!(flag.group_flag_name(), "block-break-group");
    }
}
