//! Affinity checks used to re-validate ownership while streaming.

use super::assignment::PartitionAssignment;
use crate::types::{NodeId, PartitionId, TopologyVersion};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Answers whether a partition still belongs to a node.
pub trait Affinity: Send + Sync + std::fmt::Debug {
    /// Check if `node` is an owner of `partition` at `version`.
    fn belongs(&self, node: NodeId, partition: PartitionId, version: TopologyVersion) -> bool;
}

/// Tracks partition assignments per topology version.
///
/// A node belongs to a partition at a version only if it owned the
/// partition at that version and still owns it at the latest known version;
/// a newer assignment that moves the partition away invalidates any stream
/// started at an older version.
pub struct AffinityTracker {
    /// Assignments by version.
    history: RwLock<BTreeMap<TopologyVersion, Arc<PartitionAssignment>>>,

    /// Maximum number of versions kept.
    max_history: usize,
}

impl AffinityTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            history: RwLock::new(BTreeMap::new()),
            max_history: 16,
        }
    }

    /// Set how many versions are kept.
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    /// Record the assignment computed for a topology version.
    pub fn apply(&self, version: TopologyVersion, assignment: PartitionAssignment) {
        let mut history = self.history.write();
        history.insert(version, Arc::new(assignment));

        // Trim history if needed
        while history.len() > self.max_history {
            history.pop_first();
        }

        debug!(%version, versions = history.len(), "Applied partition assignment");
    }

    /// The latest known topology version.
    pub fn latest_version(&self) -> Option<TopologyVersion> {
        self.history.read().keys().next_back().copied()
    }

    /// Assignment at an exact version.
    pub fn assignment(&self, version: TopologyVersion) -> Option<Arc<PartitionAssignment>> {
        self.history.read().get(&version).cloned()
    }

    /// The latest assignment.
    pub fn latest(&self) -> Option<Arc<PartitionAssignment>> {
        self.history.read().values().next_back().cloned()
    }
}

impl Default for AffinityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Affinity for AffinityTracker {
    fn belongs(&self, node: NodeId, partition: PartitionId, version: TopologyVersion) -> bool {
        let history = self.history.read();

        let Some(at_version) = history.get(&version) else {
            return false;
        };
        if !at_version.is_owner(node, partition) {
            return false;
        }

        history
            .values()
            .next_back()
            .is_some_and(|latest| latest.is_owner(node, partition))
    }
}

impl std::fmt::Debug for AffinityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityTracker")
            .field("latest_version", &self.latest_version())
            .field("max_history", &self.max_history)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(major: u64) -> TopologyVersion {
        TopologyVersion::new(major, 0)
    }

    #[test]
    fn test_belongs_at_current_version() {
        let tracker = AffinityTracker::new();
        tracker.apply(v(1), PartitionAssignment::new(vec![vec![1, 2], vec![3]]));

        assert!(tracker.belongs(1, 0, v(1)));
        assert!(tracker.belongs(2, 0, v(1)));
        assert!(!tracker.belongs(3, 0, v(1)));
        assert!(!tracker.belongs(1, 0, v(7)));
    }

    #[test]
    fn test_newer_assignment_revokes_ownership() {
        let tracker = AffinityTracker::new();
        tracker.apply(v(1), PartitionAssignment::new(vec![vec![2]]));
        assert!(tracker.belongs(2, 0, v(1)));

        tracker.apply(v(2), PartitionAssignment::new(vec![vec![3]]));
        assert!(!tracker.belongs(2, 0, v(1)));
        assert!(tracker.belongs(3, 0, v(2)));
    }

    #[test]
    fn test_history_is_trimmed() {
        let tracker = AffinityTracker::new().with_max_history(2);
        for major in 1..=4 {
            tracker.apply(v(major), PartitionAssignment::new(vec![vec![1]]));
        }
        assert!(tracker.assignment(v(1)).is_none());
        assert!(tracker.assignment(v(3)).is_some());
        assert_eq!(tracker.latest_version(), Some(v(4)));
    }
}
