//! Supply side of partition rebalancing for a partitioned cache.
//!
//! When ownership of a partition moves, the new owner demands its data from
//! a node that already holds it. This crate answers those demands:
//!
//! - **Bounded batches**: data is streamed in messages of a configured size,
//!   and at most a configured number of them per demand.
//! - **Resumable sessions**: between demands, the position inside every
//!   partition is kept in a [`SupplyContext`](rebalancing::SupplyContext),
//!   so multi-gigabyte partitions are supplied over many round-trips.
//! - **Ownership checks**: an entry is only sent while the requester still
//!   owns its partition; otherwise the partition is reported as missed.
//! - **Overflow tier**: entries relocated to off-heap/swap storage while a
//!   partition is being read are captured by a listener and sent afterwards.
//!
//! # Example
//!
//! ```rust,no_run
//! use crema_supply::cache::{EntryInfo, MemoryPartitionStore, PartitionStore};
//! use crema_supply::network::{ChannelTransport, DemandMessage};
//! use crema_supply::partitioning::{AffinityTracker, PartitionAssignment};
//! use crema_supply::types::{PartitionState, Topic, TopologyVersion};
//! use crema_supply::{SupplyConfig, SupplyEngine, SupplyPool};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let version = TopologyVersion::new(1, 0);
//!     let affinity = AffinityTracker::new();
//!     affinity.apply(version, PartitionAssignment::rendezvous(&[1, 2], 64, 2));
//!
//!     let store = Arc::new(MemoryPartitionStore::new());
//!     store.create_partition(7, PartitionState::Owning);
//!     store.put(7, EntryInfo::new("user:123", "Alice", 1));
//!
//!     let transport = Arc::new(ChannelTransport::new());
//!     let mut inbox = transport.register(2, 64);
//!
//!     let engine = SupplyEngine::new(SupplyConfig::new(1), store, Arc::new(affinity), transport)?;
//!     let pool = SupplyPool::start(Arc::new(engine));
//!
//!     let topic = Topic::rebalance(1, version, 0);
//!     pool.dispatch(2, DemandMessage::new(topic, vec![7], version)).await?;
//!
//!     let supply = inbox.recv().await.ok_or("inbox closed")?.supply()?;
//!     println!("received {} entries", supply.entry_count());
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │      DemandMessage (from requester)          │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │    SupplyPool (lanes per requester/topic)    │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │               SupplyEngine                   │
//! │  contexts · completions · metrics            │
//! └─────────────────────────────────────────────┘
//!     │               │               │
//!     ▼               ▼               ▼
//! ┌─────────┐   ┌──────────┐   ┌───────────┐
//! │Partition│   │ Affinity │   │  Supply   │
//! │  Store  │   │          │   │ Transport │
//! └─────────┘   └──────────┘   └───────────┘
//! ```
//!
//! # Delivery Model
//!
//! - **Order**: messages of a session are sent in order on one lane; the
//!   transport is expected to keep per-topic order.
//! - **Acknowledgement**: a message flagged `ack` asks the requester to
//!   demand again; the next demand resumes the suspended session.
//! - **Completion**: a partition is flagged `Last` once all its phases are
//!   exhausted, or `Missed` if it could not be supplied.

pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;
pub mod network;
pub mod partitioning;
pub mod rebalancing;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use config::SupplyConfig;
pub use error::{Error, Result};
pub use types::{CacheId, IoPolicy, NodeId, PartitionId, PartitionState, SupplyKey, Topic, TopologyVersion};

// Re-export cluster types
pub use cluster::{MemberEvent, MemberEventListener};

// Re-export storage types
pub use cache::{EntryInfo, MemoryPartitionStore, OverflowEntry, PartitionStore};

// Re-export partitioning types
pub use partitioning::{Affinity, AffinityTracker, PartitionAssignment};

// Re-export network types
pub use network::{
    ChannelTransport, DemandMessage, DeploymentInfo, PartitionFlag, SupplyMessage, SupplyTransport,
};

// Re-export rebalancing types
pub use rebalancing::{
    CompletionRegistry, DeploymentResolver, PreloadPredicate, SupplyContext, SupplyContextStore,
    SupplyEngine, SupplyPhase, SupplyPool,
};

// Re-export metrics types
pub use metrics::{Counter, Gauge, SupplyMetrics, SupplyMetricsSnapshot};

// Re-export testing types
pub use testing::{RecordingTransport, ScriptedAffinity, SupplyHarness};
