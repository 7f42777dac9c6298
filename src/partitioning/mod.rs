//! Partition ownership as seen by the supplier.
//!
//! Supplying a partition is only valid while the demanding node is still an
//! owner of it. Assignments can change at any time while a session is in
//! flight, so the engine consults an [`Affinity`] before every entry.
//!
//! # Example
//!
//! ```rust
//! use crema_supply::partitioning::{Affinity, AffinityTracker, PartitionAssignment};
//! use crema_supply::types::TopologyVersion;
//!
//! let tracker = AffinityTracker::new();
//! let version = TopologyVersion::new(1, 0);
//! tracker.apply(version, PartitionAssignment::rendezvous(&[1, 2, 3], 64, 2));
//!
//! let owned = tracker.latest().unwrap().partitions_of(2);
//! assert!(owned.iter().all(|&p| tracker.belongs(2, p, version)));
//! ```

mod affinity;
mod assignment;

pub use affinity::{Affinity, AffinityTracker};
pub use assignment::PartitionAssignment;
