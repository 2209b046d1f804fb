//! The group registry: which network groups this session owns.
//!
//! The shared world is partitioned into *network groups*, one per location.
//! For every group the server tells each client whether it is the owner
//! (the authoritative simulator) of that group. The registry stores those
//! answers.
//!
//! Four default groups exist in every session, installed by
//! [`GroupRegistry::reset`] on join:
//!
//! | group | owned |
//! |---|---|
//! | local-player | yes |
//! | remote-player | no |
//! | local-physicals | yes |
//! | remote-physicals | no |
//!
//! # Concurrency note
//!
//! Like the rest of the session core, the registry is a plain `HashMap`
//! with no locking. It is owned by the session context and mutated only
//! from the session thread.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use shardlink_protocol::LocationId;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

/// The answer to "is this locally authoritative?".
///
/// `Unknown` is a real answer, not an error: it means the session doesn't
/// have enough information yet. Callers must not treat it as `No` by
/// accident; the usual fallback is "don't simulate it until it resolves".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// The local session is authoritative.
    Yes,
    /// A remote session is authoritative.
    No,
    /// Can't be decided yet (object or its group not loaded).
    Unknown,
}

impl Ownership {
    /// `Yes` for `true`, `No` for `false`.
    pub fn from_owned(owned: bool) -> Self {
        if owned { Self::Yes } else { Self::No }
    }

    /// Returns `true` only for `Yes`.
    pub fn is_yes(self) -> bool {
        self == Self::Yes
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => f.write_str("yes"),
            Self::No => f.write_str("no"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// NetworkGroup
// ---------------------------------------------------------------------------

/// A location-scoped partition of the world.
///
/// Equality and hashing look at the location only: two groups with the
/// same location and different descriptions are the same group.
#[derive(Debug, Clone)]
pub struct NetworkGroup {
    location: LocationId,
    desc: String,
}

impl NetworkGroup {
    /// Creates a group whose description is derived from the location.
    pub fn new(location: LocationId) -> Self {
        Self {
            location,
            desc: location.to_string(),
        }
    }

    /// Creates a group with an explicit description (diagnostics only).
    pub fn with_desc(location: LocationId, desc: impl Into<String>) -> Self {
        Self {
            location,
            desc: desc.into(),
        }
    }

    pub fn location(&self) -> LocationId {
        self.location
    }

    /// Human-readable description, for logs.
    pub fn desc(&self) -> &str {
        &self.desc
    }

    /// Returns `true` for the four session-scoped default groups.
    pub fn is_default(&self) -> bool {
        DEFAULT_GROUPS.iter().any(|(loc, _)| *loc == self.location)
    }
}

impl PartialEq for NetworkGroup {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl Eq for NetworkGroup {}

impl Hash for NetworkGroup {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
    }
}

impl From<LocationId> for NetworkGroup {
    fn from(location: LocationId) -> Self {
        Self::new(location)
    }
}

impl fmt::Display for NetworkGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.desc)
    }
}

/// A group plus whether this session owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedGroup {
    pub group: NetworkGroup,
    pub owns_it: bool,
}

/// The four default groups and their fixed ownership.
const DEFAULT_GROUPS: [(LocationId, bool); 4] = [
    (LocationId::LOCAL_PLAYER, true),
    (LocationId::REMOTE_PLAYER, false),
    (LocationId::LOCAL_PHYSICALS, true),
    (LocationId::REMOTE_PHYSICALS, false),
];

// ---------------------------------------------------------------------------
// GroupRegistry
// ---------------------------------------------------------------------------

/// What a [`GroupRegistry::set_group`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupUpdate {
    /// The location had no entry; one was added.
    Inserted,
    /// The entry existed with the other ownership value; it was flipped.
    Changed,
    /// The entry already had this ownership value. Nothing changed.
    Unchanged,
    /// A default group was re-registered with ownership that contradicts
    /// its fixed value. The new value was applied anyway.
    ConflictingDefault,
}

/// Per-location ownership table for one session.
#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    /// At most one entry per location, by construction of the map key.
    groups: HashMap<LocationId, OwnedGroup>,
}

impl GroupRegistry {
    /// Creates an empty registry (no default groups yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry and installs the default groups.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.reset();
        registry
    }

    /// Clears every entry, then installs the four default groups.
    ///
    /// Called once per session join.
    pub fn reset(&mut self) {
        self.groups.clear();
        for (location, owns_it) in DEFAULT_GROUPS {
            self.groups.insert(
                location,
                OwnedGroup {
                    group: NetworkGroup::new(location),
                    owns_it,
                },
            );
        }
        debug!("group registry reset to defaults");
    }

    /// Inserts or updates the entry for `group`'s location.
    ///
    /// Replaying the same value is a no-op ([`GroupUpdate::Unchanged`]).
    ///
    /// Giving a default group the opposite of its fixed ownership is a
    /// programming error. Debug builds assert; release builds log a warning,
    /// apply the new value (last write wins) and return
    /// [`GroupUpdate::ConflictingDefault`] so the caller can report it.
    pub fn set_group(&mut self, group: NetworkGroup, owns_it: bool) -> GroupUpdate {
        let location = group.location();
        let fixed = DEFAULT_GROUPS
            .iter()
            .find(|(loc, _)| *loc == location)
            .map(|(_, owned)| *owned);

        let conflict = fixed.is_some_and(|fixed| fixed != owns_it);
        if conflict {
            debug_assert!(
                false,
                "conflicting ownership for default group {group}: set to {owns_it}"
            );
            warn!(group = %group, owns_it, "conflicting ownership for default group, last write wins");
        }

        let previous = self
            .groups
            .insert(location, OwnedGroup { group, owns_it })
            .map(|entry| entry.owns_it);

        if conflict {
            return GroupUpdate::ConflictingDefault;
        }
        match previous {
            None => GroupUpdate::Inserted,
            Some(prev) if prev == owns_it => GroupUpdate::Unchanged,
            Some(_) => GroupUpdate::Changed,
        }
    }

    /// Removes every entry, defaults included. Used on session teardown.
    pub fn clear_groups(&mut self) {
        self.groups.clear();
    }

    /// Ownership of `group`: `Unknown` if the registry has no entry for it.
    pub fn is_group_local(&self, group: &NetworkGroup) -> Ownership {
        self.ownership_of(group.location())
    }

    /// Same as [`is_group_local`](Self::is_group_local), by location.
    pub fn ownership_of(&self, location: LocationId) -> Ownership {
        match self.groups.get(&location) {
            Some(entry) => Ownership::from_owned(entry.owns_it),
            None => Ownership::Unknown,
        }
    }

    /// The entry for a location, if any.
    pub fn get(&self, location: LocationId) -> Option<&OwnedGroup> {
        self.groups.get(&location)
    }

    /// Iterates over every entry in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &OwnedGroup> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: u32) -> NetworkGroup {
        NetworkGroup::new(LocationId(id))
    }

    // =====================================================================
    // reset()
    // =====================================================================

    #[test]
    fn test_reset_installs_default_groups_with_fixed_ownership() {
        let registry = GroupRegistry::with_defaults();

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.ownership_of(LocationId::LOCAL_PLAYER), Ownership::Yes);
        assert_eq!(registry.ownership_of(LocationId::LOCAL_PHYSICALS), Ownership::Yes);
        assert_eq!(registry.ownership_of(LocationId::REMOTE_PLAYER), Ownership::No);
        assert_eq!(registry.ownership_of(LocationId::REMOTE_PHYSICALS), Ownership::No);
    }

    #[test]
    fn test_reset_discards_previous_entries() {
        let mut registry = GroupRegistry::with_defaults();
        registry.set_group(room(0x21), true);

        registry.reset();

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.is_group_local(&room(0x21)), Ownership::Unknown);
    }

    // =====================================================================
    // is_group_local()
    // =====================================================================

    #[test]
    fn test_is_group_local_unregistered_returns_unknown() {
        let registry = GroupRegistry::with_defaults();
        assert_eq!(registry.is_group_local(&room(0x99)), Ownership::Unknown);
    }

    #[test]
    fn test_is_group_local_ignores_description() {
        let mut registry = GroupRegistry::new();
        registry.set_group(NetworkGroup::with_desc(LocationId(5), "Cleft"), true);

        let other_name = NetworkGroup::with_desc(LocationId(5), "something else");
        assert_eq!(registry.is_group_local(&other_name), Ownership::Yes);
    }

    // =====================================================================
    // set_group()
    // =====================================================================

    #[test]
    fn test_set_group_true_then_false_leaves_single_false_entry() {
        let mut registry = GroupRegistry::new();

        assert_eq!(registry.set_group(room(7), true), GroupUpdate::Inserted);
        assert_eq!(registry.set_group(room(7), false), GroupUpdate::Changed);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.is_group_local(&room(7)), Ownership::No);
    }

    #[test]
    fn test_set_group_replay_same_value_is_unchanged() {
        let mut registry = GroupRegistry::new();
        registry.set_group(room(7), true);

        assert_eq!(registry.set_group(room(7), true), GroupUpdate::Unchanged);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_group_default_with_matching_ownership_is_unchanged() {
        let mut registry = GroupRegistry::with_defaults();
        let update = registry.set_group(LocationId::LOCAL_PLAYER.into(), true);
        assert_eq!(update, GroupUpdate::Unchanged);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "conflicting ownership"))]
    fn test_set_group_conflicting_default_asserts_or_last_write_wins() {
        let mut registry = GroupRegistry::with_defaults();

        let update = registry.set_group(LocationId::LOCAL_PLAYER.into(), false);

        // Only reached in release builds.
        assert_eq!(update, GroupUpdate::ConflictingDefault);
        assert_eq!(registry.ownership_of(LocationId::LOCAL_PLAYER), Ownership::No);
    }

    // =====================================================================
    // clear_groups()
    // =====================================================================

    #[test]
    fn test_clear_groups_removes_defaults_too() {
        let mut registry = GroupRegistry::with_defaults();
        registry.set_group(room(1), true);

        registry.clear_groups();

        assert!(registry.is_empty());
        assert_eq!(registry.ownership_of(LocationId::LOCAL_PLAYER), Ownership::Unknown);
    }

    #[test]
    fn test_network_group_default_detection() {
        assert!(NetworkGroup::new(LocationId::REMOTE_PHYSICALS).is_default());
        assert!(!room(3).is_default());
    }
}
