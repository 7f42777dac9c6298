//! Suspended supply sessions and completed-session bookkeeping.

use crate::cache::{EntryInfo, ListenerRegistration, PartitionReservation};
use crate::types::{NodeId, PartitionId, SupplyKey};
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Where iteration of a partition stands.
///
/// Phases only move forward: local entries, then the overflow tier, then
/// whatever was captured while the overflow tier was being read.
#[derive(Debug)]
pub enum SupplyPhase {
    /// Reading in-memory entries; keys up to `after` were already taken.
    LocalEntries { after: Option<Bytes> },
    /// Reading the overflow tier; keys up to `after` were already taken.
    OverflowEntries { after: Option<Bytes> },
    /// Supplying entries captured by the overflow listener.
    CapturedEntries {
        pending: std::vec::IntoIter<EntryInfo>,
    },
    /// Nothing left to read.
    Done,
}

impl SupplyPhase {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SupplyPhase::LocalEntries { .. } => "local",
            SupplyPhase::OverflowEntries { .. } => "overflow",
            SupplyPhase::CapturedEntries { .. } => "captured",
            SupplyPhase::Done => "done",
        }
    }
}

/// The partition currently being supplied in a session.
///
/// Dropping it detaches the listener (if any) and then releases the
/// reservation.
#[derive(Debug)]
pub struct PartitionSupply {
    // Field order is drop order.
    pub(crate) listener: Option<ListenerRegistration>,
    pub(crate) phase: SupplyPhase,
    pub(crate) reservation: PartitionReservation,
}

impl PartitionSupply {
    /// Start supplying a reserved partition from the beginning.
    pub fn new(reservation: PartitionReservation) -> Self {
        Self {
            listener: None,
            phase: SupplyPhase::LocalEntries { after: None },
            reservation,
        }
    }

    /// The partition being supplied.
    pub fn partition(&self) -> PartitionId {
        self.reservation.partition()
    }

    /// Current phase.
    pub fn phase(&self) -> &SupplyPhase {
        &self.phase
    }

    /// Whether an overflow listener is attached.
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }
}

/// Resumption state of one suspended session.
#[derive(Debug)]
pub struct SupplyContext {
    /// Requested partitions not started yet, in order.
    pub(crate) remaining: VecDeque<PartitionId>,

    /// Partition in progress, holding its reservation.
    pub(crate) current: Option<PartitionSupply>,

    /// When the session was last suspended.
    pub(crate) suspended_at: Instant,
}

impl SupplyContext {
    /// Fresh context for a list of requested partitions.
    pub fn new(partitions: impl IntoIterator<Item = PartitionId>) -> Self {
        Self {
            remaining: partitions.into_iter().collect(),
            current: None,
            suspended_at: Instant::now(),
        }
    }

    /// Partitions not started yet.
    pub fn remaining(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.remaining.iter().copied()
    }

    /// Partition in progress.
    pub fn current(&self) -> Option<&PartitionSupply> {
        self.current.as_ref()
    }

    /// Time since the session was suspended.
    pub fn idle_for(&self) -> Duration {
        self.suspended_at.elapsed()
    }
}

/// Suspended sessions by (requester, topic).
///
/// A key is taken out before it is processed and put back only when the
/// session suspends again, so at most one processing owns a context.
#[derive(Debug, Default)]
pub struct SupplyContextStore {
    contexts: DashMap<SupplyKey, SupplyContext>,
}

impl SupplyContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return the context of a key.
    pub fn take(&self, key: &SupplyKey) -> Option<SupplyContext> {
        self.contexts.remove(key).map(|(_, ctx)| ctx)
    }

    /// Store the context of a suspended session.
    pub fn put(&self, key: SupplyKey, ctx: SupplyContext) {
        // Replacing drops the previous context, releasing what it held.
        self.contexts.insert(key, ctx);
    }

    /// Check if a key has a suspended session.
    pub fn contains_key(&self, key: &SupplyKey) -> bool {
        self.contexts.contains_key(key)
    }

    /// Drop the context of a key. Returns true if there was one.
    pub fn remove(&self, key: &SupplyKey) -> bool {
        self.contexts.remove(key).is_some()
    }

    /// Drop every context of a requester.
    pub fn purge_requester(&self, requester: NodeId) -> usize {
        let before = self.contexts.len();
        self.contexts.retain(|key, _| key.requester != requester);
        before.saturating_sub(self.contexts.len())
    }

    /// Drop contexts suspended for longer than `timeout`.
    pub fn sweep_idle(&self, timeout: Duration) -> usize {
        let before = self.contexts.len();
        self.contexts.retain(|_, ctx| ctx.idle_for() < timeout);
        before.saturating_sub(self.contexts.len())
    }

    /// Number of suspended sessions.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Check if no session is suspended.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Sessions that have supplied everything they requested.
#[derive(Debug, Default)]
pub struct CompletionRegistry {
    completed: DashMap<SupplyKey, Instant>,
}

impl CompletionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session as complete.
    pub fn put(&self, key: SupplyKey) {
        self.completed.insert(key, Instant::now());
    }

    /// Check if a session is complete.
    pub fn contains_key(&self, key: &SupplyKey) -> bool {
        self.completed.contains_key(key)
    }

    /// Forget a session. Returns true if it was complete.
    pub fn remove(&self, key: &SupplyKey) -> bool {
        self.completed.remove(key).is_some()
    }

    /// Forget every session of a requester.
    pub fn purge_requester(&self, requester: NodeId) -> usize {
        let before = self.completed.len();
        self.completed.retain(|key, _| key.requester != requester);
        before.saturating_sub(self.completed.len())
    }

    /// Forget sessions completed more than `timeout` ago.
    pub fn sweep_idle(&self, timeout: Duration) -> usize {
        let before = self.completed.len();
        self.completed.retain(|_, at| at.elapsed() < timeout);
        before.saturating_sub(self.completed.len())
    }

    /// Number of completed sessions remembered.
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    /// Check if no session is remembered.
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }
}
