//! Proximity voice routing: who I hear, and who hears me.
//!
//! Two membership lists drive voice traffic:
//!
//! - The [`ListenList`] (who I hear) is computed locally. Every so often the
//!   router samples avatar positions and keeps the nearest participants
//!   within range, up to a size cap. Changes are sent to the server as
//!   diffs, and every so often as a full list so a lost diff can't leave
//!   the server's view stale forever.
//! - The [`TalkList`] (who hears me) is purely reactive. Other clients tell
//!   us when they start or stop listening to us; the list just records it
//!   and raises a dirty flag until the voice transport has been told.
//!
//! ```text
//!            ProximitySample
//!                  │
//!                  ▼
//!   VoiceRouter::tick ──► ListenList::update ──► ListenListChange ──► wire
//!
//!   inbound ListenListUpdate ──► TalkList::add/remove ──► dirty ──► voice transport
//! ```

use std::collections::HashSet;

use shardlink_protocol::SessionId;
use tracing::{debug, trace};

use crate::{ProximitySample, VoiceConfig};

// ---------------------------------------------------------------------------
// MemberList
// ---------------------------------------------------------------------------

/// An insertion-ordered set of remote participants.
///
/// Order carries no meaning; it is just stable, which keeps logs and tests
/// readable. A participant appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberList {
    members: Vec<SessionId>,
}

impl MemberList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `member`. Returns `false` (and does nothing) if already present.
    pub fn add(&mut self, member: SessionId) -> bool {
        if self.contains(member) {
            return false;
        }
        self.members.push(member);
        true
    }

    /// Removes `member`. Returns `false` if it wasn't present.
    pub fn remove(&mut self, member: SessionId) -> bool {
        match self.members.iter().position(|m| *m == member) {
            Some(idx) => {
                self.members.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, member: SessionId) -> bool {
        self.members.contains(&member)
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn as_slice(&self) -> &[SessionId] {
        &self.members
    }

    pub fn iter(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.members.iter().copied()
    }
}

// ---------------------------------------------------------------------------
// ListenList
// ---------------------------------------------------------------------------

/// How the listen list is maintained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenMode {
    /// Rebuilt from proximity samples.
    #[default]
    Distance,
    /// Set explicitly by the application (private conversation). Sampling
    /// is suspended until the mode goes back to `Distance`.
    Forced,
}

/// The result of one listen-list update that has to go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenListChange {
    /// `true` if the whole list was rebuilt and must be retransmitted.
    pub full_resync: bool,
    /// Participants that entered the list.
    pub added: Vec<SessionId>,
    /// Participants that left the list.
    pub removed: Vec<SessionId>,
    /// The complete list after the update.
    pub members: Vec<SessionId>,
}

/// Who the local session hears.
#[derive(Debug, Clone, Default)]
pub struct ListenList {
    members: MemberList,
    mode: ListenMode,
    /// Time of the last sample, `None` before the first one.
    last_update_time: Option<f64>,
    /// Time of the last full rebuild.
    last_force_time: f64,
    /// Samples since the last full rebuild.
    num_updates_since_force: u32,
    /// Total full rebuilds so far.
    full_rebuilds: u64,
    /// The next due sample must be a full rebuild.
    resync_requested: bool,
}

impl ListenList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self) -> &[SessionId] {
        self.members.as_slice()
    }

    pub fn contains(&self, member: SessionId) -> bool {
        self.members.contains(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn mode(&self) -> ListenMode {
        self.mode
    }

    pub fn last_update_time(&self) -> Option<f64> {
        self.last_update_time
    }

    /// Incremental samples since the last full rebuild.
    pub fn num_updates_since_force(&self) -> u32 {
        self.num_updates_since_force
    }

    /// How many full rebuilds have happened.
    pub fn full_rebuilds(&self) -> u64 {
        self.full_rebuilds
    }

    /// Whether the next due sample will be a full rebuild on request.
    pub fn resync_requested(&self) -> bool {
        self.resync_requested
    }

    /// Makes the next due sample a full rebuild, e.g. after the last change
    /// failed to reach the server.
    pub fn request_full_resync(&mut self) {
        self.resync_requested = true;
    }

    /// Adds one participant. Returns `false` if already present.
    pub fn add_member(&mut self, member: SessionId) -> bool {
        self.members.add(member)
    }

    /// Removes one participant. Returns `false` if absent.
    pub fn remove_member(&mut self, member: SessionId) -> bool {
        self.members.remove(member)
    }

    /// Whether a sample taken at `now` would be processed.
    pub fn is_due(&self, now: f64, config: &VoiceConfig) -> bool {
        self.mode == ListenMode::Distance
            && self
                .last_update_time
                .is_none_or(|last| now - last >= config.update_interval)
    }

    /// Processes one proximity sample.
    ///
    /// Returns `None` if the sample isn't due, the list is in
    /// [`ListenMode::Forced`], or nothing changed in an incremental update.
    /// A full rebuild always returns a change, even an empty one, because
    /// the server must hear the whole list.
    ///
    /// Within one update every removal is applied before any addition, so
    /// slots vacated by participants who left range are available to
    /// newcomers in the same sample.
    pub fn update(
        &mut self,
        now: f64,
        sample: &ProximitySample,
        config: &VoiceConfig,
    ) -> Option<ListenListChange> {
        if !self.is_due(now, config) {
            return None;
        }

        let desired = desired_members(sample, config);
        let full_resync = self.last_update_time.is_none()
            || self.resync_requested
            || self.num_updates_since_force >= config.max_updates_before_force
            || now - self.last_force_time >= config.force_resync_interval;

        self.last_update_time = Some(now);

        let wanted: HashSet<SessionId> = desired.iter().copied().collect();
        let removed: Vec<SessionId> = self
            .members
            .iter()
            .filter(|m| !wanted.contains(m))
            .collect();
        for member in &removed {
            self.members.remove(*member);
        }
        let mut added = Vec::new();
        for member in &desired {
            if self.members.add(*member) {
                added.push(*member);
            }
        }

        if full_resync {
            // Rebuild in distance order so the retransmitted list is
            // canonical, not an accumulation of past diffs.
            self.members.clear();
            for member in &desired {
                self.members.add(*member);
            }
            self.num_updates_since_force = 0;
            self.last_force_time = now;
            self.resync_requested = false;
            self.full_rebuilds += 1;
            debug!(
                members = self.members.len(),
                rebuilds = self.full_rebuilds,
                "listen list full resync"
            );
        } else {
            self.num_updates_since_force += 1;
            if added.is_empty() && removed.is_empty() {
                return None;
            }
            trace!(added = added.len(), removed = removed.len(), "listen list diff");
        }

        Some(ListenListChange {
            full_resync,
            added,
            removed,
            members: self.members.as_slice().to_vec(),
        })
    }

    /// Switches to [`ListenMode::Forced`] with exactly `members`, or back
    /// to [`ListenMode::Distance`] with `None`.
    ///
    /// Always produces a full resync: forcing replaces the list, and
    /// leaving forced mode clears it so the next sample starts over.
    pub fn set_forced(&mut self, members: Option<Vec<SessionId>>, now: f64) -> ListenListChange {
        let old: Vec<SessionId> = self.members.as_slice().to_vec();
        self.members.clear();

        match members {
            Some(forced) => {
                self.mode = ListenMode::Forced;
                for member in forced {
                    self.members.add(member);
                }
            }
            None => {
                self.mode = ListenMode::Distance;
                // Next sample is due immediately and will be a full rebuild.
                self.last_update_time = None;
            }
        }

        self.num_updates_since_force = 0;
        self.last_force_time = now;
        self.full_rebuilds += 1;
        debug!(mode = ?self.mode, members = self.members.len(), "listen mode changed");

        let added = self.members.iter().filter(|m| !old.contains(m)).collect();
        let removed = old
            .iter()
            .copied()
            .filter(|m| !self.members.contains(*m))
            .collect();
        ListenListChange {
            full_resync: true,
            added,
            removed,
            members: self.members.as_slice().to_vec(),
        }
    }

    /// Empties the list and restarts the update schedule.
    pub fn clear(&mut self) {
        self.members.clear();
        self.last_update_time = None;
        self.num_updates_since_force = 0;
    }
}

/// Candidates within range, nearest first, capped at the configured size.
fn desired_members(sample: &ProximitySample, config: &VoiceConfig) -> Vec<SessionId> {
    let mut in_range: Vec<(f32, SessionId)> = sample
        .candidates
        .iter()
        .map(|(id, pos)| (sample.listener.distance_sq(pos), *id))
        .filter(|(dist_sq, _)| *dist_sq <= config.max_listen_dist_sq)
        .collect();

    // Ties broken by id so the result doesn't depend on candidate order.
    in_range.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    // A participant listed twice keeps its nearest entry and one slot.
    let mut seen = HashSet::new();
    let nearest = in_range
        .into_iter()
        .map(|(_, id)| id)
        .filter(|id| seen.insert(*id));
    match config.max_listen_list_size {
        Some(cap) => nearest.take(cap).collect(),
        None => nearest.collect(),
    }
}

// ---------------------------------------------------------------------------
// TalkList
// ---------------------------------------------------------------------------

/// Who hears the local session. Driven by inbound notifications only.
#[derive(Debug, Clone, Default)]
pub struct TalkList {
    members: MemberList,
    dirty: bool,
}

impl TalkList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener. Marks the list dirty if it changed.
    pub fn add_member(&mut self, member: SessionId) -> bool {
        let changed = self.members.add(member);
        self.dirty |= changed;
        changed
    }

    /// Removes a listener. Marks the list dirty if it changed.
    pub fn remove_member(&mut self, member: SessionId) -> bool {
        let changed = self.members.remove(member);
        self.dirty |= changed;
        changed
    }

    pub fn members(&self) -> &[SessionId] {
        self.members.as_slice()
    }

    pub fn contains(&self, member: SessionId) -> bool {
        self.members.contains(member)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// If dirty, clears the flag and returns the list to propagate.
    pub fn take_dirty(&mut self) -> Option<Vec<SessionId>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.members.as_slice().to_vec())
    }

    /// Empties the list (dirty if it wasn't already empty).
    pub fn clear(&mut self) {
        self.dirty |= !self.members.is_empty();
        self.members.clear();
    }
}

// ---------------------------------------------------------------------------
// VoiceRouter
// ---------------------------------------------------------------------------

/// Both voice lists plus the policy that drives them.
#[derive(Debug, Clone, Default)]
pub struct VoiceRouter {
    config: VoiceConfig,
    listen: ListenList,
    talk: TalkList,
}

impl VoiceRouter {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            listen: ListenList::new(),
            talk: TalkList::new(),
        }
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn listen_list(&self) -> &ListenList {
        &self.listen
    }

    pub fn listen_list_mut(&mut self) -> &mut ListenList {
        &mut self.listen
    }

    pub fn talk_list(&self) -> &TalkList {
        &self.talk
    }

    pub fn talk_list_mut(&mut self) -> &mut TalkList {
        &mut self.talk
    }

    /// Whether a sample would be used if taken now. Callers check this
    /// before asking the proximity source, so samples aren't wasted.
    pub fn wants_sample(&self, now: f64) -> bool {
        self.listen.is_due(now, &self.config)
    }

    /// One sampling tick.
    ///
    /// `None` for `sample` means the candidate source was unavailable: the
    /// tick is skipped entirely (no partial rebuild, no schedule change)
    /// and the next tick tries again.
    pub fn tick(&mut self, now: f64, sample: Option<&ProximitySample>) -> Option<ListenListChange> {
        let Some(sample) = sample else {
            trace!("proximity source unavailable, skipping voice tick");
            return None;
        };
        self.listen.update(now, sample, &self.config)
    }

    /// A remote participant left: drop it from both lists.
    pub fn remove_participant(&mut self, member: SessionId) {
        self.listen.remove_member(member);
        self.talk.remove_member(member);
    }

    /// See [`ListenList::request_full_resync`].
    pub fn request_full_resync(&mut self) {
        self.listen.request_full_resync();
    }

    /// Empties both lists.
    pub fn clear(&mut self) {
        self.listen.clear();
        self.talk.clear();
    }
}
