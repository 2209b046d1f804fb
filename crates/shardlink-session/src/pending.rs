//! The pending state-load queue.
//!
//! State for an object can arrive before the object exists locally: the
//! server streams state as soon as we join, while the client is still
//! paging in the age. Those records wait here and are retried once per
//! tick until their object shows up, or until they've waited too long.
//!
//! # Lifecycle of a record
//!
//! ```text
//!                  place_or_enqueue()
//!                         │
//!          ┌──────────────┼──────────────────┐
//!          ▼              ▼                  ▼
//!      [Applied]      [Queued]          [Discarded]
//!                         │  try_place_all() each tick
//!          ┌──────────────┼─────────────┬────────────┐
//!          ▼              ▼             ▼            ▼
//!      [Applied]   [still Queued]   [TimedOut]   [Rejected]
//!                  reset_count += 1
//! ```
//!
//! Records live in a `BTreeMap` keyed by a monotonically increasing
//! [`PendingId`], so iteration order is arrival order and ids stay stable
//! while other records are removed.
//!
//! A record is applied at most once: it leaves the queue on the first
//! attempt that reaches the world store, whether that attempt succeeds or
//! is rejected.

use std::collections::BTreeMap;
use std::fmt;

use shardlink_protocol::{SessionId, StateRecord, Uoid};
use tracing::{debug, trace};

use crate::{DiagnosticCategory, DiagnosticsSink, PendingConfig, WorldObjectStore};

/// Stable handle of a queued record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PendingId(u64);

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pending-{}", self.0)
    }
}

/// A state record waiting for its target object.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingStateLoad {
    pub object: Uoid,
    pub state: StateRecord,
    /// The session that produced the state, if known.
    pub origin: Option<SessionId>,
    /// When the record first entered the queue.
    pub first_queued: f64,
    /// When the record was last (re)queued.
    pub queued_time: f64,
    /// Failed placement attempts so far.
    pub reset_count: u32,
}

impl PendingStateLoad {
    pub fn new(object: Uoid, state: StateRecord, origin: Option<SessionId>, now: f64) -> Self {
        Self {
            object,
            state,
            origin,
            first_queued: now,
            queued_time: now,
            reset_count: 0,
        }
    }
}

/// What happened to one record handed to
/// [`PendingStateQueue::place_or_enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The object was available and accepted the state.
    Applied,
    /// The object isn't available yet; the record is queued.
    Queued(PendingId),
    /// The object isn't in the dataset at all; the record was dropped.
    Discarded,
    /// The object refused the state; the record was dropped.
    Rejected,
}

/// Summary of one [`PendingStateQueue::try_place_all`] pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementReport {
    /// Records that were applied, in arrival order.
    pub applied: Vec<PendingStateLoad>,
    /// Records dropped (timed out, rejected, or no longer in the dataset).
    pub dropped: usize,
    /// Records still waiting.
    pub waiting: usize,
}

enum Attempt {
    Applied,
    NotReady,
    Discarded,
    Rejected,
}

/// Holds state records until their objects can take them.
#[derive(Debug, Clone, Default)]
pub struct PendingStateQueue {
    config: PendingConfig,
    records: BTreeMap<PendingId, PendingStateLoad>,
    next_id: u64,
}

impl PendingStateQueue {
    pub fn new(config: PendingConfig) -> Self {
        Self {
            config,
            records: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &PendingConfig {
        &self.config
    }

    /// Queues a record without attempting placement.
    pub fn enqueue(&mut self, load: PendingStateLoad) -> PendingId {
        let id = PendingId(self.next_id);
        self.next_id += 1;
        trace!(%id, object = %load.object, "state queued");
        self.records.insert(id, load);
        id
    }

    /// Tries to place a freshly received record right away, and queues it
    /// only if the object isn't available yet.
    pub fn place_or_enqueue<W, D>(
        &mut self,
        load: PendingStateLoad,
        world: &mut W,
        diagnostics: &mut D,
    ) -> Delivery
    where
        W: WorldObjectStore + ?Sized,
        D: DiagnosticsSink + ?Sized,
    {
        match attempt(&load, world, diagnostics) {
            Attempt::Applied => Delivery::Applied,
            Attempt::Discarded => Delivery::Discarded,
            Attempt::Rejected => Delivery::Rejected,
            Attempt::NotReady => Delivery::Queued(self.enqueue(load)),
        }
    }

    /// One placement pass over every queued record, in arrival order.
    ///
    /// Each record that still can't be placed has its reset count bumped
    /// and its queue time refreshed. A record whose count exceeds
    /// `max_queue_resets`, or whose age exceeds `max_age`, is dropped with
    /// exactly one [`DiagnosticCategory::PendingTimeout`] report.
    pub fn try_place_all<W, D>(
        &mut self,
        now: f64,
        world: &mut W,
        diagnostics: &mut D,
    ) -> PlacementReport
    where
        W: WorldObjectStore + ?Sized,
        D: DiagnosticsSink + ?Sized,
    {
        let mut report = PlacementReport::default();
        if self.records.is_empty() {
            return report;
        }

        let ids: Vec<PendingId> = self.records.keys().copied().collect();
        for id in ids {
            let Some(load) = self.records.get_mut(&id) else {
                continue;
            };

            match attempt(load, world, diagnostics) {
                Attempt::NotReady => {
                    load.reset_count += 1;
                    load.queued_time = now;
                    let age = now - load.first_queued;
                    if load.reset_count > self.config.max_queue_resets || age > self.config.max_age
                    {
                        diagnostics.report(
                            DiagnosticCategory::PendingTimeout,
                            &format!(
                                "gave up on state `{}` for {} after {} attempts ({age:.1}s)",
                                load.state.descriptor, load.object, load.reset_count
                            ),
                        );
                        self.records.remove(&id);
                        report.dropped += 1;
                    }
                }
                Attempt::Applied => {
                    if let Some(load) = self.records.remove(&id) {
                        report.applied.push(load);
                    }
                }
                Attempt::Discarded | Attempt::Rejected => {
                    self.records.remove(&id);
                    report.dropped += 1;
                }
            }
        }

        report.waiting = self.records.len();
        if !report.applied.is_empty() || report.dropped > 0 {
            debug!(
                applied = report.applied.len(),
                dropped = report.dropped,
                waiting = report.waiting,
                "pending state pass"
            );
        }
        report
    }

    /// Discards every record, reporting each one as
    /// [`DiagnosticCategory::PendingDiscarded`]. Returns how many.
    pub fn clear<D>(&mut self, diagnostics: &mut D) -> usize
    where
        D: DiagnosticsSink + ?Sized,
    {
        let records = std::mem::take(&mut self.records);
        for load in records.values() {
            diagnostics.report(
                DiagnosticCategory::PendingDiscarded,
                &format!(
                    "discarded pending state `{}` for {} on clear",
                    load.state.descriptor, load.object
                ),
            );
        }
        records.len()
    }

    pub fn get(&self, id: PendingId) -> Option<&PendingStateLoad> {
        self.records.get(&id)
    }

    /// Queued records in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (PendingId, &PendingStateLoad)> {
        self.records.iter().map(|(id, load)| (*id, load))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One placement attempt. Reports discards and rejections itself.
fn attempt<W, D>(load: &PendingStateLoad, world: &mut W, diagnostics: &mut D) -> Attempt
where
    W: WorldObjectStore + ?Sized,
    D: DiagnosticsSink + ?Sized,
{
    if !world.is_known(&load.object) {
        diagnostics.report(
            DiagnosticCategory::PendingDiscarded,
            &format!(
                "discarded state `{}` for {}: object not in dataset",
                load.state.descriptor, load.object
            ),
        );
        return Attempt::Discarded;
    }

    let Some(handle) = world.resolve_object(&load.object) else {
        return Attempt::NotReady;
    };

    match world.apply_state(handle, &load.state) {
        Ok(()) => {
            trace!(object = %load.object, descriptor = %load.state.descriptor, "state applied");
            Attempt::Applied
        }
        Err(e) => {
            diagnostics.report(
                DiagnosticCategory::StateRejected,
                &format!("state `{}` for {} rejected: {e}", load.state.descriptor, load.object),
            );
            Attempt::Rejected
        }
    }
}
