//! Ownership domains: who counts as an owner or member of a region.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::subject::Subject;

/// Pluggable membership rule contributed by an extension.
pub trait CustomDomain: Send + Sync + fmt::Debug {
    /// Unique name of this sub-domain within its parent domain.
    fn name(&self) -> &str;

    /// Whether the subject is matched by this sub-domain.
    fn contains(&self, subject: &dyn Subject) -> bool;
}

/// Set of players, groups and custom sub-domains.
///
/// Player names are a legacy form kept for old data; they compare
/// case-insensitively. Group names are also case-insensitive. Any mutation
/// marks the domain dirty.
#[derive(Clone, Debug, Default)]
pub struct Domain {
    players: BTreeSet<Uuid>,
    names: BTreeSet<String>,
    groups: BTreeSet<String>,
    custom: Vec<Arc<dyn CustomDomain>>,
    dirty: bool,
}

impl Domain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Players ====================

    pub fn add_player(&mut self, id: Uuid) {
        self.dirty |= self.players.insert(id);
    }

    pub fn remove_player(&mut self, id: Uuid) {
        self.dirty |= self.players.remove(&id);
    }

    /// Add a player by legacy name.
    pub fn add_player_name(&mut self, name: &str) {
        self.dirty |= self.names.insert(name.to_lowercase());
    }

    pub fn remove_player_name(&mut self, name: &str) {
        self.dirty |= self.names.remove(&name.to_lowercase());
    }

    #[must_use]
    pub fn contains_uuid(&self, id: Uuid) -> bool {
        self.players.contains(&id)
    }

    #[must_use]
    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    pub fn players(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.players.iter().copied()
    }

    pub fn player_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    // ==================== Groups ====================

    pub fn add_group(&mut self, group: &str) {
        self.dirty |= self.groups.insert(group.to_lowercase());
    }

    pub fn remove_group(&mut self, group: &str) {
        self.dirty |= self.groups.remove(&group.to_lowercase());
    }

    #[must_use]
    pub fn contains_group(&self, group: &str) -> bool {
        self.groups.contains(&group.to_lowercase())
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(String::as_str)
    }

    // ==================== Custom domains ====================

    /// Add a custom sub-domain, replacing one with the same name.
    pub fn add_custom_domain(&mut self, domain: Arc<dyn CustomDomain>) {
        self.custom.retain(|d| d.name() != domain.name());
        self.custom.push(domain);
        self.dirty = true;
    }

    pub fn remove_custom_domain(&mut self, name: &str) {
        let before = self.custom.len();
        self.custom.retain(|d| d.name() != name);
        self.dirty |= self.custom.len() != before;
    }

    #[must_use]
    pub fn custom_domains(&self) -> &[Arc<dyn CustomDomain>] {
        &self.custom
    }

    // ==================== Whole domain ====================

    /// Identifier match, group match or custom sub-domain match.
    #[must_use]
    pub fn contains(&self, subject: &dyn Subject) -> bool {
        if let Some(id) = subject.unique_id() {
            if self.players.contains(&id) {
                return true;
            }
        }
        if self.contains_name(subject.name()) {
            return true;
        }
        if self.groups.iter().any(|g| subject.has_group(g)) {
            return true;
        }
        self.custom.iter().any(|d| d.contains(subject))
    }

    /// Copy every entry of `other` into this domain.
    pub fn add_all(&mut self, other: &Self) {
        for id in &other.players {
            self.add_player(*id);
        }
        for name in &other.names {
            self.add_player_name(name);
        }
        for group in &other.groups {
            self.add_group(group);
        }
        for custom in &other.custom {
            self.add_custom_domain(Arc::clone(custom));
        }
    }

    /// Remove every entry of `other` from this domain.
    pub fn remove_all(&mut self, other: &Self) {
        for id in &other.players {
            self.remove_player(*id);
        }
        for name in &other.names {
            self.remove_player_name(name);
        }
        for group in &other.groups {
            self.remove_group(group);
        }
        for custom in &other.custom {
            self.remove_custom_domain(custom.name());
        }
    }

    /// Number of entries across all parts.
    #[must_use]
    pub fn size(&self) -> usize {
        self.players.len() + self.names.len() + self.groups.len() + self.custom.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn clear(&mut self) {
        if !self.is_empty() {
            self.dirty = true;
        }
        self.players.clear();
        self.names.clear();
        self.groups.clear();
        self.custom.clear();
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }
}

impl fmt::Display for Domain {
    /// Comma separated list: names, then ids, then `g:`-prefixed groups.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let entries = self
            .names
            .iter()
            .map(|n| (None, n.clone()))
            .chain(self.players.iter().map(|id| (None, id.to_string())))
            .chain(self.groups.iter().map(|g| (Some("g:"), g.clone())))
            .chain(self.custom.iter().map(|c| (Some("*"), c.name().to_owned())));

        for (prefix, entry) in entries {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            if let Some(prefix) = prefix {
                f.write_str(prefix)?;
            }
            f.write_str(&entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::Player;

    #[derive(Debug)]
    struct NamePrefix(&'static str);

    impl CustomDomain for NamePrefix {
        fn name(&self) -> &str {
            "prefix"
        }

        fn contains(&self, subject: &dyn Subject) -> bool {
            subject.name().starts_with(self.0)
        }
    }

    #[test]
    fn test_contains_by_uuid_name_and_group() {
        let id = Uuid::from_u128(7);
        let mut domain = Domain::new();
        domain.add_player(id);
        domain.add_player_name("Alice");
        domain.add_group("Builders");

        assert!(domain.contains(&Player::with_id(id, "anyone")));
        assert!(domain.contains(&Player::named("ALICE")));
        assert!(domain.contains(&Player::named("bob").in_group("builders")));
        assert!(!domain.contains(&Player::named("bob").in_group("guests")));
    }

    #[test]
    fn test_custom_domain_match() {
        let mut domain = Domain::new();
        domain.add_custom_domain(Arc::new(NamePrefix("staff_")));
        assert!(domain.contains(&Player::named("staff_carol")));
        assert!(!domain.contains(&Player::named("carol")));

        domain.remove_custom_domain("prefix");
        assert!(!domain.contains(&Player::named("staff_carol")));
    }

    #[test]
    fn test_mutation_marks_dirty() {
        let mut domain = Domain::new();
        assert!(!domain.is_dirty());

        domain.add_group("a");
        assert!(domain.is_dirty());

        domain.set_dirty(false);
        domain.add_group("A");
        assert!(!domain.is_dirty(), "re-adding an existing group changes nothing");

        domain.remove_group("a");
        assert!(domain.is_dirty());
    }

    #[test]
    fn test_add_all_remove_all_and_size() {
        let mut a = Domain::new();
        a.add_player_name("x");
        a.add_group("g");

        let mut b = Domain::new();
        b.add_all(&a);
        b.add_player(Uuid::from_u128(1));
        assert_eq!(b.size(), 3);

        b.remove_all(&a);
        assert_eq!(b.size(), 1);

        b.clear();
        assert!(b.is_empty());
    }

    #[test]
    fn test_display() {
        let mut domain = Domain::new();
        domain.add_player_name("Zed");
        domain.add_group("mods");
        assert_eq!(domain.to_string(), "zed, g:mods");
    }
}
