//! Built-in flags and the flag registry.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

use hashbrown::HashMap;

use crate::error::{RegionError, RegionResult};
use crate::flag::{AnyFlag, Flag, FlagType, FlagValue, RegionGroup, State};

/// Message shown when an action is denied. `{what}` names the action.
pub const DEFAULT_DENY_MESSAGE: &str = "Hey! Sorry, but you can't {what} here.";

fn state(name: &str) -> Flag<State> {
    Flag::new(name)
}

fn allowed(name: &str) -> Flag<State> {
    Flag::new(name).with_default(State::Allow)
}

// ==================== Protection ====================

/// Region does not take part in membership checks.
pub static PASSTHROUGH: LazyLock<Flag<State>> = LazyLock::new(|| state("passthrough"));

/// Master build flag. Falls back to membership when unset.
pub static BUILD: LazyLock<Flag<State>> = LazyLock::new(|| {
    allowed("build")
        .using_membership_as_default()
        .preventing_allow_on_global()
});

pub static BLOCK_BREAK: LazyLock<Flag<State>> = LazyLock::new(|| state("block-break"));
pub static BLOCK_PLACE: LazyLock<Flag<State>> = LazyLock::new(|| state("block-place"));
pub static USE: LazyLock<Flag<State>> = LazyLock::new(|| state("use"));
pub static INTERACT: LazyLock<Flag<State>> = LazyLock::new(|| state("interact"));
pub static DAMAGE_ANIMALS: LazyLock<Flag<State>> = LazyLock::new(|| state("damage-animals"));
pub static PVP: LazyLock<Flag<State>> = LazyLock::new(|| state("pvp"));
pub static TNT: LazyLock<Flag<State>> = LazyLock::new(|| state("tnt"));
pub static CHEST_ACCESS: LazyLock<Flag<State>> = LazyLock::new(|| state("chest-access"));
pub static LIGHTER: LazyLock<Flag<State>> = LazyLock::new(|| state("lighter"));

// ==================== Environment ====================

pub static MOB_DAMAGE: LazyLock<Flag<State>> = LazyLock::new(|| allowed("mob-damage"));
pub static CREEPER_EXPLOSION: LazyLock<Flag<State>> = LazyLock::new(|| allowed("creeper-explosion"));
pub static FIRE_SPREAD: LazyLock<Flag<State>> = LazyLock::new(|| allowed("fire-spread"));
pub static LAVA_FIRE: LazyLock<Flag<State>> = LazyLock::new(|| allowed("lava-fire"));
pub static ITEM_DROP: LazyLock<Flag<State>> = LazyLock::new(|| allowed("item-drop"));

// ==================== Movement ====================

pub static ENTRY: LazyLock<Flag<State>> =
    LazyLock::new(|| allowed("entry").with_default_group(RegionGroup::NonMembers));
pub static EXIT: LazyLock<Flag<State>> =
    LazyLock::new(|| allowed("exit").with_default_group(RegionGroup::NonMembers));

// ==================== Messages & misc ====================

pub static GREETING: LazyLock<Flag<String>> = LazyLock::new(|| Flag::new("greeting"));
pub static FAREWELL: LazyLock<Flag<String>> = LazyLock::new(|| Flag::new("farewell"));
pub static DENY_MESSAGE: LazyLock<Flag<String>> =
    LazyLock::new(|| Flag::new("deny-message").with_default(DEFAULT_DENY_MESSAGE.to_owned()));
pub static ENTRY_DENY_MESSAGE: LazyLock<Flag<String>> = LazyLock::new(|| {
    Flag::new("entry-deny-message")
        .with_default("Hey! You are not permitted to enter this area.".to_owned())
});
pub static TIME_LOCK: LazyLock<Flag<String>> = LazyLock::new(|| Flag::new("time-lock"));
pub static BLOCKED_CMDS: LazyLock<Flag<BTreeSet<String>>> = LazyLock::new(|| Flag::new("blocked-cmds"));
pub static ALLOWED_CMDS: LazyLock<Flag<BTreeSet<String>>> = LazyLock::new(|| Flag::new("allowed-cmds"));
pub static HEAL_AMOUNT: LazyLock<Flag<i64>> = LazyLock::new(|| Flag::new("heal-amount"));
pub static HEAL_DELAY: LazyLock<Flag<i64>> = LazyLock::new(|| Flag::new("heal-delay"));
pub static PRICE: LazyLock<Flag<f64>> = LazyLock::new(|| Flag::new("price"));
pub static BUYABLE: LazyLock<Flag<bool>> = LazyLock::new(|| Flag::new("buyable"));

/// Per-permission allow/deny overrides keyed by permission node.
pub static PLAYER_PERMISSIONS: LazyLock<Flag<BTreeMap<String, State>>> =
    LazyLock::new(|| Flag::new("player-permissions"));

// ==================== Registry ====================

/// Flags known to a server, by case-insensitive name.
///
/// The group restriction of every registered flag resolves as the companion
/// flag `<name>-group` without registering it separately.
#[derive(Debug, Default)]
pub struct FlagRegistry {
    flags: HashMap<String, Arc<dyn AnyFlag>>,
}

impl FlagRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in flag.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for flag in [
            &*PASSTHROUGH,
            &*BUILD,
            &*BLOCK_BREAK,
            &*BLOCK_PLACE,
            &*USE,
            &*INTERACT,
            &*DAMAGE_ANIMALS,
            &*PVP,
            &*TNT,
            &*CHEST_ACCESS,
            &*LIGHTER,
            &*MOB_DAMAGE,
            &*CREEPER_EXPLOSION,
            &*FIRE_SPREAD,
            &*LAVA_FIRE,
            &*ITEM_DROP,
            &*ENTRY,
            &*EXIT,
        ] {
            registry.insert(flag);
        }
        for flag in [
            &*GREETING,
            &*FAREWELL,
            &*DENY_MESSAGE,
            &*ENTRY_DENY_MESSAGE,
            &*TIME_LOCK,
        ] {
            registry.insert(flag);
        }
        registry.insert(&*BLOCKED_CMDS);
        registry.insert(&*ALLOWED_CMDS);
        registry.insert(&*HEAL_AMOUNT);
        registry.insert(&*HEAL_DELAY);
        registry.insert(&*PRICE);
        registry.insert(&*BUYABLE);
        registry.insert(&*PLAYER_PERMISSIONS);
        registry
    }

    fn insert<T: FlagType>(&mut self, flag: &Flag<T>) {
        self.flags
            .insert(flag.name().to_owned(), Arc::new(flag.clone()));
    }

    /// Register a flag. Names are unique.
    pub fn register<T: FlagType>(&mut self, flag: &Flag<T>) -> RegionResult<()> {
        let name = flag.name().to_owned();
        if self.flags.contains_key(&name) {
            return Err(RegionError::FlagConflict(name));
        }
        tracing::debug!("Registered flag {name}");
        self.insert(flag);
        Ok(())
    }

    /// Look up a flag, including `<name>-group` companions.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AnyFlag>> {
        let name = name.to_lowercase();
        if let Some(flag) = self.flags.get(&name) {
            return Some(Arc::clone(flag));
        }
        let base = self.flags.get(name.strip_suffix("-group")?)?;
        let group: Flag<RegionGroup> = Flag::new(name).with_default(base.default_group());
        Some(Arc::new(group))
    }

    /// Parse a persisted value for the named flag.
    pub fn parse(&self, name: &str, raw: &str) -> RegionResult<FlagValue> {
        let flag = self
            .get(name)
            .ok_or_else(|| RegionError::UnknownFlag(name.to_owned()))?;
        flag.parse(raw).ok_or_else(|| RegionError::InvalidFlagValue {
            flag: flag.name().to_owned(),
            value: raw.to_owned(),
        })
    }

    /// Persisted string form of a value for the named flag.
    pub fn marshal(&self, name: &str, value: &FlagValue) -> RegionResult<String> {
        let flag = self
            .get(name)
            .ok_or_else(|| RegionError::UnknownFlag(name.to_owned()))?;
        flag.marshal(value).ok_or_else(|| RegionError::InvalidFlagValue {
            flag: flag.name().to_owned(),
            value: format!("{value:?}"),
        })
    }

    /// Names of registered flags, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.flags.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = FlagRegistry::with_defaults();
        assert_eq!(registry.len(), 30);
        assert!(registry.get("BUILD").is_some());
        assert!(registry.get("no-such-flag").is_none());
        assert!(registry.names().contains(&"player-permissions".to_owned()));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = FlagRegistry::with_defaults();
        let custom: Flag<State> = Flag::new("PvP");
        assert_eq!(
            registry.register(&custom),
            Err(RegionError::FlagConflict("pvp".into()))
        );

        let fresh: Flag<i64> = Flag::new("max-visitors");
        registry.register(&fresh).unwrap();
        assert_eq!(registry.parse("max-visitors", "4").unwrap(), FlagValue::Integer(4));
    }

    #[test]
    fn test_group_companion_resolves() {
        let registry = FlagRegistry::with_defaults();
        let group = registry.get("entry-group").unwrap();
        assert_eq!(group.name(), "entry-group");
        assert_eq!(group.default_value(), Some(FlagValue::Group(RegionGroup::NonMembers)));
        assert_eq!(
            registry.parse("build-group", "owners").unwrap(),
            FlagValue::Group(RegionGroup::Owners)
        );
        assert!(registry.get("nothing-group").is_none());
    }

    #[test]
    fn test_parse_errors() {
        let registry = FlagRegistry::with_defaults();
        assert!(matches!(registry.parse("nope", "allow"), Err(RegionError::UnknownFlag(_))));
        assert!(matches!(
            registry.parse("pvp", "maybe"),
            Err(RegionError::InvalidFlagValue { .. })
        ));
        assert_eq!(
            registry.marshal("pvp", &FlagValue::State(State::Deny)).unwrap(),
            "deny"
        );
    }

    #[test]
    fn test_builtin_behaviour() {
        assert!(BUILD.uses_membership_as_default());
        assert!(BUILD.prevents_allow_on_global());
        assert_eq!(BUILD.default_value(), Some(State::Allow));
        assert_eq!(PVP.default_value(), None);
        assert_eq!(EXIT.default_group(), RegionGroup::NonMembers);
    }
}
