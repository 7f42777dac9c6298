//! Wire messages exchanged between demanding and supplying nodes.

use crate::cache::EntryInfo;
use crate::error::{NetworkError, Result};
use crate::types::{CacheId, PartitionId, Topic, TopologyVersion};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Network message wrapper for all rebalancing communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Request for partition data, sent by the demanding node.
    Demand(DemandMessage),

    /// Batch of partition data, sent by the supplying node.
    Supply(SupplyMessage),
}

/// Request for the data of a set of partitions.
///
/// The first demand on a topic starts a session; every following demand on
/// the same topic acknowledges the previous batch and resumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandMessage {
    /// Session topic.
    pub topic: Topic,

    /// Requested partitions, in the order they should be supplied.
    pub partitions: Vec<PartitionId>,

    /// Topology version the demander believes is current.
    pub topology_version: TopologyVersion,

    /// Send timeout for replies.
    pub timeout: Duration,

    /// Demander worker to route replies to. Echoed back.
    pub worker_id: u32,

    /// Demander update sequence. Echoed back.
    pub update_sequence: u64,
}

impl DemandMessage {
    /// Create a new demand.
    pub fn new(topic: Topic, partitions: Vec<PartitionId>, topology_version: TopologyVersion) -> Self {
        Self {
            topic,
            partitions,
            topology_version,
            timeout: Duration::from_secs(10),
            worker_id: 0,
            update_sequence: 0,
        }
    }

    /// Set the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the worker id and update sequence used for correlation.
    pub fn with_worker(mut self, worker_id: u32, update_sequence: u64) -> Self {
        self.worker_id = worker_id;
        self.update_sequence = update_sequence;
        self
    }
}

/// Per-partition outcome carried by a supply message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionFlag {
    /// This node cannot supply the partition; ask another owner.
    Missed,
    /// No more data follows for the partition.
    Last,
}

/// Deployment metadata needed to deserialize custom key/value types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    /// Class loader the types were deployed with.
    pub loader_id: Uuid,
    /// User version of the deployment.
    pub user_version: String,
}

impl DeploymentInfo {
    /// Create deployment metadata.
    pub fn new(loader_id: Uuid, user_version: impl Into<String>) -> Self {
        Self {
            loader_id,
            user_version: user_version.into(),
        }
    }
}

/// Batch of partition data sent in reply to a demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyMessage {
    /// Echoed demander worker id.
    pub worker_id: u32,

    /// Echoed demander update sequence.
    pub update_sequence: u64,

    /// Cache the entries belong to.
    pub cache_id: CacheId,

    /// Partition outcomes, in the order they were decided.
    flags: Vec<(PartitionId, PartitionFlag)>,

    /// Entries, in the order they were read.
    entries: Vec<(PartitionId, EntryInfo)>,

    /// Demander must acknowledge before more data is sent.
    ack: bool,

    /// Deployment metadata for the entries, if any.
    deployment: Option<DeploymentInfo>,

    /// Bytes of entry data, recomputed on decode.
    #[serde(skip)]
    message_size: usize,
}

impl SupplyMessage {
    /// Create an empty supply message.
    pub fn new(worker_id: u32, update_sequence: u64, cache_id: CacheId) -> Self {
        Self {
            worker_id,
            update_sequence,
            cache_id,
            flags: Vec::new(),
            entries: Vec::new(),
            ack: false,
            deployment: None,
            message_size: 0,
        }
    }

    /// Create an empty message correlated with a demand.
    pub fn reply_to(demand: &DemandMessage, cache_id: CacheId) -> Self {
        Self::new(demand.worker_id, demand.update_sequence, cache_id)
    }

    /// Add an entry for a partition.
    ///
    /// Returns false, without adding, if the partition is already marked
    /// missed in this message.
    pub fn add_entry(&mut self, partition: PartitionId, entry: EntryInfo) -> bool {
        if self.flag(partition) == Some(PartitionFlag::Missed) {
            return false;
        }
        self.message_size += entry.size();
        self.entries.push((partition, entry));
        true
    }

    /// Mark a partition as not suppliable by this node.
    pub fn missed(&mut self, partition: PartitionId) {
        self.set_flag(partition, PartitionFlag::Missed);
    }

    /// Mark a partition as complete.
    pub fn last(&mut self, partition: PartitionId) {
        self.set_flag(partition, PartitionFlag::Last);
    }

    fn set_flag(&mut self, partition: PartitionId, flag: PartitionFlag) {
        match self.flags.iter_mut().find(|(p, _)| *p == partition) {
            // A missed partition stays missed.
            Some((_, PartitionFlag::Missed)) => {}
            Some((_, existing)) => *existing = flag,
            None => self.flags.push((partition, flag)),
        }
    }

    /// Outcome recorded for a partition, if any.
    pub fn flag(&self, partition: PartitionId) -> Option<PartitionFlag> {
        self.flags
            .iter()
            .find(|(p, _)| *p == partition)
            .map(|(_, flag)| *flag)
    }

    /// All partition outcomes in order.
    pub fn flags(&self) -> &[(PartitionId, PartitionFlag)] {
        &self.flags
    }

    /// Partitions marked missed.
    pub fn missed_partitions(&self) -> Vec<PartitionId> {
        self.partitions_flagged(PartitionFlag::Missed)
    }

    /// Partitions marked last.
    pub fn last_partitions(&self) -> Vec<PartitionId> {
        self.partitions_flagged(PartitionFlag::Last)
    }

    fn partitions_flagged(&self, flag: PartitionFlag) -> Vec<PartitionId> {
        self.flags
            .iter()
            .filter(|(_, f)| *f == flag)
            .map(|(p, _)| *p)
            .collect()
    }

    /// Request an acknowledgement from the demander.
    pub fn mark_ack(&mut self) {
        self.ack = true;
    }

    /// Whether the demander must acknowledge this message.
    pub fn is_ack(&self) -> bool {
        self.ack
    }

    /// Attach deployment metadata.
    pub fn prepare(&mut self, deployment: DeploymentInfo) {
        self.deployment = Some(deployment);
    }

    /// Attached deployment metadata.
    pub fn deployment(&self) -> Option<&DeploymentInfo> {
        self.deployment.as_ref()
    }

    /// All entries in order.
    pub fn entries(&self) -> &[(PartitionId, EntryInfo)] {
        &self.entries
    }

    /// Entries of one partition.
    pub fn entries_for(&self, partition: PartitionId) -> impl Iterator<Item = &EntryInfo> + '_ {
        self.entries
            .iter()
            .filter(move |(p, _)| *p == partition)
            .map(|(_, e)| e)
    }

    /// Number of entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Running byte size used to decide when to flush.
    pub fn message_size(&self) -> usize {
        self.message_size
    }

    /// Check if the message carries neither entries nor flags.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.flags.is_empty()
    }

    /// Recompute the byte size from the entries; it is not sent on the wire.
    fn restore_size(&mut self) {
        self.message_size = self.entries.iter().map(|(_, e)| e.size()).sum();
    }
}

/// Encode a message to bytes.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    Ok(bincode::serialize(msg)?)
}

/// Decode a message from bytes.
pub fn decode_message(data: &[u8]) -> Result<Message> {
    let mut msg: Message = bincode::deserialize(data)
        .map_err(|e| NetworkError::Deserialization(e.to_string()))?;
    if let Message::Supply(supply) = &mut msg {
        supply.restore_size();
    }
    Ok(msg)
}

/// Frame a message with a length prefix for stream transmission.
pub fn frame_message(msg: &Message) -> Result<Vec<u8>> {
    let data = encode_message(msg)?;
    let len = data.len() as u32;

    let mut framed = Vec::with_capacity(4 + data.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&data);

    Ok(framed)
}

/// Decode a length-prefixed frame.
pub fn unframe_message(frame: &[u8]) -> Result<Message> {
    let Some((prefix, body)) = frame.split_first_chunk::<4>() else {
        return Err(NetworkError::TruncatedFrame {
            expected: 4,
            actual: frame.len(),
        }
        .into());
    };
    let len = u32::from_be_bytes(*prefix) as usize;
    if body.len() < len {
        return Err(NetworkError::TruncatedFrame {
            expected: len,
            actual: body.len(),
        }
        .into());
    }
    decode_message(&body[..len])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &'static str) -> EntryInfo {
        EntryInfo::new(key, "value", 1)
    }

    #[test]
    fn test_missed_partition_rejects_entries() {
        let mut msg = SupplyMessage::new(1, 2, 3);
        assert!(msg.add_entry(5, entry("a")));

        msg.missed(5);
        assert!(!msg.add_entry(5, entry("b")));
        assert_eq!(msg.entries_for(5).count(), 1);

        // Missed is not downgraded to last.
        msg.last(5);
        assert_eq!(msg.flag(5), Some(PartitionFlag::Missed));
        assert_eq!(msg.missed_partitions(), vec![5]);
        assert!(msg.last_partitions().is_empty());
    }

    #[test]
    fn test_message_size_tracks_entries() {
        let mut msg = SupplyMessage::new(0, 0, 0);
        assert_eq!(msg.message_size(), 0);
        assert!(msg.is_empty());

        let e = entry("key");
        let size = e.size();
        msg.add_entry(1, e);
        msg.add_entry(2, entry("key"));
        assert_eq!(msg.message_size(), 2 * size);
        assert_eq!(msg.entry_count(), 2);
    }

    #[test]
    fn test_flags_keep_decision_order() {
        let mut msg = SupplyMessage::new(0, 0, 0);
        msg.last(4);
        msg.missed(2);
        msg.last(9);
        assert_eq!(
            msg.flags(),
            &[
                (4, PartitionFlag::Last),
                (2, PartitionFlag::Missed),
                (9, PartitionFlag::Last)
            ]
        );
    }

    #[test]
    fn test_frame_supply_message() {
        let mut supply = SupplyMessage::new(7, 11, 1);
        supply.add_entry(3, entry("k"));
        supply.last(3);
        supply.mark_ack();
        supply.prepare(DeploymentInfo::new(Uuid::new_v4(), "1.0"));

        let framed = frame_message(&Message::Supply(supply.clone())).unwrap();

        // First 4 bytes should be length
        let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
        assert_eq!(len, framed.len() - 4);

        match unframe_message(&framed).unwrap() {
            Message::Supply(decoded) => {
                assert_eq!(decoded.worker_id, 7);
                assert_eq!(decoded.update_sequence, 11);
                assert!(decoded.is_ack());
                assert_eq!(decoded.last_partitions(), vec![3]);
                assert_eq!(decoded.entries(), supply.entries());
                assert_eq!(decoded.deployment(), supply.deployment());
                assert_eq!(decoded.message_size(), supply.message_size());
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_unframe_truncated() {
        let demand = DemandMessage::new(Topic::new("t"), vec![1, 2], TopologyVersion::new(1, 0));
        let framed = frame_message(&Message::Demand(demand)).unwrap();

        assert!(unframe_message(&framed[..2]).is_err());
        assert!(unframe_message(&framed[..framed.len() - 1]).is_err());
    }
}
