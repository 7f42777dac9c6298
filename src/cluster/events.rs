//! Cluster membership events.

use crate::types::NodeId;

/// Events related to cluster membership changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberEvent {
    /// A new node joined the cluster.
    NodeJoin {
        /// The node's ID.
        node_id: NodeId,
    },

    /// A node left the cluster gracefully.
    NodeLeave {
        /// The node's ID.
        node_id: NodeId,
    },

    /// A node has been confirmed as failed.
    NodeFailed {
        /// The node's ID.
        node_id: NodeId,
    },
}

impl MemberEvent {
    /// Get the node ID associated with this event.
    pub fn node_id(&self) -> NodeId {
        match self {
            MemberEvent::NodeJoin { node_id }
            | MemberEvent::NodeLeave { node_id }
            | MemberEvent::NodeFailed { node_id } => *node_id,
        }
    }

    /// Check if the node is gone for good.
    pub fn is_leave(&self) -> bool {
        matches!(
            self,
            MemberEvent::NodeLeave { .. } | MemberEvent::NodeFailed { .. }
        )
    }
}

/// Listener for membership events.
pub trait MemberEventListener: Send + Sync + 'static {
    /// Called when a membership event occurs.
    fn on_event(&self, event: MemberEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        let join = MemberEvent::NodeJoin { node_id: 1 };
        assert!(!join.is_leave());
        assert_eq!(join.node_id(), 1);

        assert!(MemberEvent::NodeLeave { node_id: 2 }.is_leave());
        assert!(MemberEvent::NodeFailed { node_id: 3 }.is_leave());
    }
}
