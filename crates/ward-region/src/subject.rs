//! Subjects that regions protect against, and how they relate to a region.

use std::fmt;

use uuid::Uuid;

/// Something that acts in the world: usually a player.
pub trait Subject: Send + Sync {
    /// Stable identity, when known.
    fn unique_id(&self) -> Option<Uuid>;

    /// Display name. Compared case-insensitively against legacy name entries.
    fn name(&self) -> &str;

    /// Group membership oracle, supplied by the host permission system.
    fn has_group(&self, group: &str) -> bool;
}

/// How a subject relates to a set of regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Association {
    Owner,
    Member,
    NonMember,
}

/// A plain player record with a fixed group list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Player {
    pub id: Option<Uuid>,
    pub name: String,
    pub groups: Vec<String>,
}

impl Player {
    /// Player known only by name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            groups: Vec::new(),
        }
    }

    /// Player with a stable id.
    #[must_use]
    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
            groups: Vec::new(),
        }
    }

    /// Add a group to this player.
    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }
}

impl Subject for Player {
    fn unique_id(&self) -> Option<Uuid> {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g.eq_ignore_ascii_case(group))
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} ({id})", self.name),
            None => f.write_str(&self.name),
        }
    }
}
