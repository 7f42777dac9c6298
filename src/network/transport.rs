//! Outbound delivery of supply messages.

use super::rpc::{frame_message, unframe_message, Message, SupplyMessage};
use crate::error::{Error, MembershipError, NetworkError, Result};
use crate::types::{IoPolicy, NodeId, Topic};
use bytes::Bytes;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Sends supply messages to demanding nodes.
///
/// Implementations must deliver messages sent to the same node on the same
/// topic in send order. A node that is no longer part of the cluster is
/// reported as [`MembershipError::NodeLeft`].
#[async_trait::async_trait]
pub trait SupplyTransport: Send + Sync + std::fmt::Debug {
    /// Send one supply message on a topic.
    async fn send_supply(
        &self,
        node: NodeId,
        topic: &Topic,
        message: SupplyMessage,
        policy: IoPolicy,
        timeout: Duration,
    ) -> Result<()>;
}

/// A framed message delivered to a node's inbox.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Topic the message was sent on.
    pub topic: Topic,
    /// I/O policy requested by the sender.
    pub policy: IoPolicy,
    /// Length-prefixed encoded message.
    pub frame: Bytes,
}

impl Delivery {
    /// Decode the carried supply message.
    pub fn supply(&self) -> Result<SupplyMessage> {
        match unframe_message(&self.frame)? {
            Message::Supply(msg) => Ok(msg),
            other => Err(NetworkError::Deserialization(format!(
                "expected supply message, got {other:?}"
            ))
            .into()),
        }
    }
}

/// In-process transport delivering framed messages over bounded channels.
///
/// Each registered node gets an inbox. Messages to one node share a single
/// FIFO channel, so per-topic order is preserved.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    inboxes: DashMap<NodeId, mpsc::Sender<Delivery>>,
}

impl ChannelTransport {
    /// Create a transport with no registered nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and return its inbox.
    ///
    /// Re-registering a node replaces its previous inbox.
    pub fn register(&self, node: NodeId, capacity: usize) -> mpsc::Receiver<Delivery> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.inboxes.insert(node, tx);
        rx
    }

    /// Remove a node. Later sends to it fail with `NodeLeft`.
    pub fn unregister(&self, node: NodeId) {
        self.inboxes.remove(&node);
    }

    /// Check if a node is registered.
    pub fn is_registered(&self, node: NodeId) -> bool {
        self.inboxes.contains_key(&node)
    }
}

#[async_trait::async_trait]
impl SupplyTransport for ChannelTransport {
    async fn send_supply(
        &self,
        node: NodeId,
        topic: &Topic,
        message: SupplyMessage,
        policy: IoPolicy,
        timeout: Duration,
    ) -> Result<()> {
        // Clone the sender out so no map guard is held across the await.
        let sender = self
            .inboxes
            .get(&node)
            .map(|entry| entry.value().clone())
            .ok_or(MembershipError::NodeLeft(node))?;

        let frame = Bytes::from(frame_message(&Message::Supply(message))?);
        trace!(node, %topic, bytes = frame.len(), "Sending supply message");

        let delivery = Delivery {
            topic: topic.clone(),
            policy,
            frame,
        };

        match tokio::time::timeout(timeout, sender.send(delivery)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.inboxes.remove(&node);
                Err(MembershipError::NodeLeft(node).into())
            }
            Err(_) => Err(Error::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntryInfo;

    #[tokio::test]
    async fn test_send_to_registered_node() {
        let transport = ChannelTransport::new();
        let mut inbox = transport.register(2, 8);
        let topic = Topic::new("rebalance/1/1.0/0");

        let mut msg = SupplyMessage::new(4, 9, 1);
        msg.add_entry(0, EntryInfo::new("k", "v", 1));
        msg.last(0);

        transport
            .send_supply(2, &topic, msg.clone(), IoPolicy::Data, Duration::from_secs(1))
            .await
            .unwrap();

        let delivery = inbox.recv().await.unwrap();
        assert_eq!(delivery.topic, topic);
        assert_eq!(delivery.policy, IoPolicy::Data);
        assert_eq!(delivery.supply().unwrap().entries(), msg.entries());
    }

    #[tokio::test]
    async fn test_send_to_unknown_node_is_member_gone() {
        let transport = ChannelTransport::new();
        let err = transport
            .send_supply(
                5,
                &Topic::new("t"),
                SupplyMessage::new(0, 0, 0),
                IoPolicy::Data,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(err.is_member_gone());
    }

    #[tokio::test]
    async fn test_dropped_inbox_unregisters_node() {
        let transport = ChannelTransport::new();
        drop(transport.register(3, 1));

        let err = transport
            .send_supply(
                3,
                &Topic::new("t"),
                SupplyMessage::new(0, 0, 0),
                IoPolicy::Data,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(err.is_member_gone());
        assert!(!transport.is_registered(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_inbox_times_out() {
        let transport = ChannelTransport::new();
        let _inbox = transport.register(1, 1);
        let topic = Topic::new("t");

        transport
            .send_supply(1, &topic, SupplyMessage::new(0, 0, 0), IoPolicy::Data, Duration::from_millis(50))
            .await
            .unwrap();

        let err = transport
            .send_supply(1, &topic, SupplyMessage::new(0, 0, 0), IoPolicy::Data, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }
}
