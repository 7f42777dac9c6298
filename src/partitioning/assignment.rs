//! Partition-to-node assignments.

use crate::types::{NodeId, PartitionId};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Owners of every partition of a cache at one topology version.
///
/// Owners are listed in order of preference: the first is the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    owners: Vec<Vec<NodeId>>,
}

impl PartitionAssignment {
    /// Create an assignment from explicit owner lists, indexed by partition.
    pub fn new(owners: Vec<Vec<NodeId>>) -> Self {
        Self { owners }
    }

    /// Assign partitions with rendezvous (highest random weight) hashing.
    ///
    /// Every partition goes to the `replicas` nodes with the highest
    /// `hash(node, partition)` weight, so adding or removing a node only
    /// moves the partitions that node gains or loses.
    pub fn rendezvous(nodes: &[NodeId], partitions: u32, replicas: usize) -> Self {
        let replicas = replicas.max(1).min(nodes.len());
        let owners = (0..partitions)
            .map(|partition| {
                let mut weighted: Vec<(u64, NodeId)> = nodes
                    .iter()
                    .map(|&node| (Self::weight(node, partition), node))
                    .collect();
                weighted.sort_unstable_by(|a, b| b.cmp(a));
                weighted.into_iter().take(replicas).map(|(_, node)| node).collect()
            })
            .collect();
        Self { owners }
    }

    /// Number of partitions covered.
    pub fn partitions(&self) -> u32 {
        self.owners.len() as u32
    }

    /// Owners of a partition, primary first.
    pub fn owners(&self, partition: PartitionId) -> &[NodeId] {
        self.owners
            .get(partition as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Primary owner of a partition.
    pub fn primary(&self, partition: PartitionId) -> Option<NodeId> {
        self.owners(partition).first().copied()
    }

    /// Check if a node owns a partition.
    pub fn is_owner(&self, node: NodeId, partition: PartitionId) -> bool {
        self.owners(partition).contains(&node)
    }

    /// Partitions owned by a node.
    pub fn partitions_of(&self, node: NodeId) -> Vec<PartitionId> {
        (0..self.partitions())
            .filter(|&partition| self.is_owner(node, partition))
            .collect()
    }

    fn weight(node: NodeId, partition: PartitionId) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write_u64(node);
        hasher.write_u32(partition);
        hasher.finish()
    }
}
