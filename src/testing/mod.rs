//! Testing utilities for the partition supplier.
//!
//! This module provides test doubles for the collaborators of
//! [`SupplyEngine`] and a harness wiring them together:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         SupplyHarness                           │
//! │                                                                 │
//! │  MemoryPartitionStore ──▶ SupplyEngine ──▶ RecordingTransport   │
//! │                               ▲                                 │
//! │          AffinityTracker / ScriptedAffinity                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use crema_supply::testing::SupplyHarness;
//! use crema_supply::SupplyConfig;
//!
//! let harness = SupplyHarness::new(SupplyConfig::new(1))?;
//! harness.fill(3, 100);
//! harness.run_to_completion(&[3], 10).await;
//! assert_eq!(harness.transport.entries_for(3).len(), 100);
//! ```

mod pool_tests;
mod utils;

#[cfg(test)]
pub use utils::init_tracing;
pub use utils::wait_for;

use crate::cache::{EntryInfo, MemoryPartitionStore, OverflowEntry, PartitionStore};
use crate::config::SupplyConfig;
use crate::error::{MembershipError, NetworkError, Result};
use crate::network::{DemandMessage, PartitionFlag, SupplyMessage, SupplyTransport};
use crate::partitioning::{Affinity, AffinityTracker, PartitionAssignment};
use crate::rebalancing::SupplyEngine;
use crate::types::{IoPolicy, NodeId, PartitionId, PartitionState, SupplyKey, Topic, TopologyVersion};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Node the harness demands partitions for.
pub const REQUESTER: NodeId = 2;

/// Node the harness supplies partitions from.
pub const SUPPLIER: NodeId = 1;

/// Partitions covered by the harness assignment.
pub const PARTITIONS: u32 = 64;

/// A supply message captured by [`RecordingTransport`].
#[derive(Debug, Clone)]
pub struct SentSupply {
    pub node: NodeId,
    pub topic: Topic,
    pub policy: IoPolicy,
    pub message: SupplyMessage,
}

/// Transport that records every message instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentSupply>>,
    gone: Mutex<HashSet<NodeId>>,
    fail_after: Mutex<Option<usize>>,
}

impl RecordingTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `node` as having left the cluster on every send.
    pub fn mark_gone(&self, node: NodeId) {
        self.gone.lock().insert(node);
    }

    /// Fail every send once `n` messages have been recorded.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock() = Some(n);
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<SentSupply> {
        self.sent.lock().clone()
    }

    /// Messages sent so far.
    pub fn messages(&self) -> Vec<SupplyMessage> {
        self.sent.lock().iter().map(|s| s.message.clone()).collect()
    }

    /// Number of messages sent.
    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    /// Check if nothing was sent.
    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }

    /// Forget everything sent so far.
    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// All entries sent for a partition, in send order.
    pub fn entries_for(&self, partition: PartitionId) -> Vec<EntryInfo> {
        self.sent
            .lock()
            .iter()
            .flat_map(|s| s.message.entries_for(partition).cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Number of messages flagging a partition with `flag`.
    pub fn flag_count(&self, partition: PartitionId, flag: PartitionFlag) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.message.flag(partition) == Some(flag))
            .count()
    }
}

#[async_trait::async_trait]
impl SupplyTransport for RecordingTransport {
    async fn send_supply(
        &self,
        node: NodeId,
        topic: &Topic,
        message: SupplyMessage,
        policy: IoPolicy,
        _timeout: Duration,
    ) -> Result<()> {
        if self.gone.lock().contains(&node) {
            return Err(MembershipError::NodeLeft(node).into());
        }

        let mut sent = self.sent.lock();
        if matches!(*self.fail_after.lock(), Some(n) if sent.len() >= n) {
            return Err(NetworkError::SendFailed("injected failure".into()).into());
        }
        sent.push(SentSupply {
            node,
            topic: topic.clone(),
            policy,
            message,
        });
        Ok(())
    }
}

/// Affinity that owns everything until told otherwise.
///
/// A partition can be revoked after a number of `belongs` checks, which
/// simulates ownership moving away while a partition is being streamed.
#[derive(Debug, Default)]
pub struct ScriptedAffinity {
    limits: Mutex<HashMap<PartitionId, usize>>,
    checks: Mutex<HashMap<PartitionId, usize>>,
}

impl ScriptedAffinity {
    /// Create an affinity owning every partition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer false for `partition` after `checks` positive answers.
    pub fn revoke_after(&self, partition: PartitionId, checks: usize) {
        self.limits.lock().insert(partition, checks);
    }

    /// Answer false for `partition` from now on.
    pub fn revoke(&self, partition: PartitionId) {
        let done = self.checks(partition);
        self.revoke_after(partition, done);
    }

    /// Number of `belongs` checks made for a partition.
    pub fn checks(&self, partition: PartitionId) -> usize {
        self.checks.lock().get(&partition).copied().unwrap_or(0)
    }
}

impl Affinity for ScriptedAffinity {
    fn belongs(&self, _node: NodeId, partition: PartitionId, _version: TopologyVersion) -> bool {
        let mut checks = self.checks.lock();
        let count = checks.entry(partition).or_insert(0);
        *count += 1;
        self.limits
            .lock()
            .get(&partition)
            .map_or(true, |&limit| *count <= limit)
    }
}

/// An engine wired to in-memory collaborators.
pub struct SupplyHarness {
    pub store: Arc<MemoryPartitionStore>,
    pub transport: Arc<RecordingTransport>,
    pub engine: Arc<SupplyEngine>,
    pub topic: Topic,
    pub version: TopologyVersion,
}

impl SupplyHarness {
    /// Harness where the requester owns every partition.
    pub fn new(config: SupplyConfig) -> Result<Self> {
        let version = TopologyVersion::new(1, 0);
        let tracker = AffinityTracker::new();
        tracker.apply(
            version,
            PartitionAssignment::new(vec![vec![REQUESTER, SUPPLIER]; PARTITIONS as usize]),
        );
        Self::with_affinity(config, Arc::new(tracker))
    }

    /// Harness with a custom affinity.
    pub fn with_affinity(config: SupplyConfig, affinity: Arc<dyn Affinity>) -> Result<Self> {
        let version = TopologyVersion::new(1, 0);
        let store = Arc::new(MemoryPartitionStore::new());
        let transport = Arc::new(RecordingTransport::new());
        let topic = Topic::rebalance(config.cache_id, version, 0);

        let engine = SupplyEngine::new(
            config,
            store.clone() as Arc<dyn PartitionStore>,
            affinity,
            transport.clone() as Arc<dyn SupplyTransport>,
        )?;

        Ok(Self {
            store,
            transport,
            engine: Arc::new(engine),
            topic,
            version,
        })
    }

    /// Entry `index` of a partition. All entries have the same size.
    pub fn entry(partition: PartitionId, index: usize) -> EntryInfo {
        EntryInfo::new(
            format!("p{partition:03}-k{index:06}"),
            format!("value-{index:06}"),
            1,
        )
    }

    /// Size of every entry produced by [`entry`](Self::entry).
    pub fn entry_size() -> usize {
        Self::entry(0, 0).size()
    }

    /// Create an owned partition with `count` in-memory entries.
    pub fn fill(&self, partition: PartitionId, count: usize) -> Vec<EntryInfo> {
        self.ensure_partition(partition);
        (0..count)
            .map(|i| {
                let entry = Self::entry(partition, i);
                self.store.put(partition, entry.clone());
                entry
            })
            .collect()
    }

    /// Add `count` entries to the overflow tier of a partition, numbered
    /// after `offset`.
    pub fn fill_overflow(&self, partition: PartitionId, offset: usize, count: usize) -> Vec<EntryInfo> {
        self.ensure_partition(partition);
        (offset..offset + count)
            .map(|i| {
                let entry = Self::entry(partition, i);
                self.store
                    .write_overflow_entry(partition, OverflowEntry::from_info(entry.clone()));
                entry
            })
            .collect()
    }

    fn ensure_partition(&self, partition: PartitionId) {
        if self.store.state(partition).is_none() {
            self.store.create_partition(partition, PartitionState::Owning);
        }
    }

    /// Demand message for some partitions on the harness topic.
    pub fn demand(&self, partitions: &[PartitionId]) -> DemandMessage {
        DemandMessage::new(self.topic.clone(), partitions.to_vec(), self.version)
            .with_timeout(Duration::from_secs(5))
            .with_worker(7, 1)
    }

    /// Session key of the harness requester.
    pub fn key(&self) -> SupplyKey {
        SupplyKey::new(REQUESTER, self.topic.clone())
    }

    /// Deliver one demand.
    pub async fn demand_once(&self, partitions: &[PartitionId]) {
        self.engine.on_demand(REQUESTER, self.demand(partitions)).await;
    }

    /// Demand until the session completes.
    ///
    /// Returns the number of calls, or None if the session was still not
    /// complete after `max_calls`.
    pub async fn run_to_completion(&self, partitions: &[PartitionId], max_calls: usize) -> Option<usize> {
        for call in 1..=max_calls {
            self.demand_once(partitions).await;
            if self.is_complete() {
                return Some(call);
            }
        }
        None
    }

    /// Check if the harness session completed.
    pub fn is_complete(&self) -> bool {
        self.engine.completed().contains_key(&self.key())
    }

    /// Check if the harness session is suspended.
    pub fn is_suspended(&self) -> bool {
        self.engine.contexts().contains_key(&self.key())
    }
}
