//! Core types used throughout the partition supplier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node identifier in the cluster.
pub type NodeId = u64;

/// Partition index within a cache.
pub type PartitionId = u32;

/// Identifier of the cache a supply session belongs to.
pub type CacheId = u32;

/// Epoch of a partition-to-member assignment.
///
/// Ordered by `major` (membership changes) and then `minor`
/// (assignment-only changes within the same membership).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TopologyVersion {
    /// Incremented on every membership change.
    pub major: u64,
    /// Incremented on assignment changes within one membership.
    pub minor: u32,
}

impl TopologyVersion {
    /// Create a new topology version.
    pub const fn new(major: u64, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for TopologyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Logical channel identifying one rebalancing session.
///
/// Unique per cache and assignment epoch; demand and supply messages of a
/// session travel on the same topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    /// Create a topic from a raw name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Topic used for rebalancing a cache at a given topology version.
    pub fn rebalance(cache_id: CacheId, version: TopologyVersion, lane: u32) -> Self {
        Self(format!("rebalance/{cache_id}/{version}/{lane}"))
    }

    /// The topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a supply session: who is asking, and on which topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SupplyKey {
    /// The demanding node.
    pub requester: NodeId,
    /// The session topic.
    pub topic: Topic,
}

impl SupplyKey {
    /// Create a new supply key.
    pub fn new(requester: NodeId, topic: Topic) -> Self {
        Self { requester, topic }
    }
}

impl fmt::Display for SupplyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.requester, self.topic)
    }
}

/// State of a local partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionState {
    /// Being loaded from another owner.
    Moving,
    /// Fully owned and readable. The only state that may be supplied.
    Owning,
    /// Being handed off; still readable locally but no longer owned.
    Renting,
    /// Removed from this node.
    Evicted,
    /// All owners left; data lost.
    Lost,
}

impl PartitionState {
    /// Whether this partition may be supplied to other nodes.
    pub fn is_owning(&self) -> bool {
        matches!(self, PartitionState::Owning)
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionState::Moving => write!(f, "moving"),
            PartitionState::Owning => write!(f, "owning"),
            PartitionState::Renting => write!(f, "renting"),
            PartitionState::Evicted => write!(f, "evicted"),
            PartitionState::Lost => write!(f, "lost"),
        }
    }
}

/// Transport priority class for outgoing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IoPolicy {
    /// Cluster-internal control traffic.
    System,
    /// Bulk data movement such as rebalancing.
    #[default]
    Data,
    /// Low-priority housekeeping.
    Utility,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_version_ordering() {
        assert!(TopologyVersion::new(2, 0) > TopologyVersion::new(1, 9));
        assert!(TopologyVersion::new(2, 1) > TopologyVersion::new(2, 0));
        assert_eq!(TopologyVersion::new(3, 1).to_string(), "3.1");
    }

    #[test]
    fn test_rebalance_topic_is_unique_per_epoch() {
        let a = Topic::rebalance(1, TopologyVersion::new(4, 0), 0);
        let b = Topic::rebalance(1, TopologyVersion::new(5, 0), 0);
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "rebalance/1/4.0/0");
    }

    #[test]
    fn test_only_owning_is_suppliable() {
        assert!(PartitionState::Owning.is_owning());
        assert!(!PartitionState::Moving.is_owning());
        assert!(!PartitionState::Renting.is_owning());
        assert!(!PartitionState::Evicted.is_owning());
    }
}
