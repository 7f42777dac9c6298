//! Partition storage consumed by the supplier.
//!
//! The supplier never owns partition data. It borrows partitions from a
//! [`PartitionStore`] by pinning them against eviction for as long as they
//! are being streamed, and reads three tiers of entries:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    PartitionStore                         │
//! │  ┌──────────────┐  ┌───────────────┐  ┌───────────────┐  │
//! │  │ local entries │  │ overflow tier │  │   listeners   │  │
//! │  │  (in-heap)    │  │ (off-heap/    │  │ (writes to    │  │
//! │  │               │  │   swap)       │  │  overflow)    │  │
//! │  └──────────────┘  └───────────────┘  └───────────────┘  │
//! │           reservation count · partition state             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! [`MemoryPartitionStore`] is a complete in-process implementation.

mod entry;
mod listener;
pub mod storage;

pub use entry::{EntryInfo, OverflowEntry, ENTRY_METADATA_SIZE};
pub use listener::{ListenerRegistration, OverflowChangeListener};
pub use storage::MemoryPartitionStore;

use crate::types::{PartitionId, PartitionState};
use std::sync::Arc;

/// Lazy iterator over the in-memory entries of a partition.
pub type LocalEntries<'a> = Box<dyn Iterator<Item = EntryInfo> + Send + 'a>;

/// Lazy iterator over the overflow tier of a partition.
pub type OverflowEntries<'a> = Box<dyn Iterator<Item = OverflowEntry> + Send + 'a>;

/// Access to local partitions.
///
/// Iterators yield entries in ascending key order and are restartable only
/// from the beginning; resuming at a given key is done by the caller skipping
/// every key up to it.
pub trait PartitionStore: Send + Sync + std::fmt::Debug {
    /// Current state of a local partition, or None if it is not local.
    fn state(&self, partition: PartitionId) -> Option<PartitionState>;

    /// Pin a partition against eviction. Returns false if it cannot be pinned.
    fn reserve(&self, partition: PartitionId) -> bool;

    /// Undo one successful [`reserve`](PartitionStore::reserve).
    fn release(&self, partition: PartitionId);

    /// Iterate the in-memory entries of a partition.
    fn local_entries(&self, partition: PartitionId) -> LocalEntries<'_>;

    /// Iterate the overflow tier of a partition, if it has one.
    fn overflow_entries(&self, partition: PartitionId) -> Option<OverflowEntries<'_>>;

    /// Start reporting overflow writes of a partition to `listener`.
    fn attach_overflow_listener(&self, partition: PartitionId, listener: Arc<OverflowChangeListener>);

    /// Stop reporting overflow writes to `listener`.
    fn detach_overflow_listener(&self, partition: PartitionId, listener: &Arc<OverflowChangeListener>);
}

/// A successful partition reservation, released exactly once on drop.
pub struct PartitionReservation {
    store: Arc<dyn PartitionStore>,
    partition: PartitionId,
}

impl PartitionReservation {
    /// Try to pin a partition.
    pub fn acquire(store: &Arc<dyn PartitionStore>, partition: PartitionId) -> Option<Self> {
        store.reserve(partition).then(|| Self {
            store: Arc::clone(store),
            partition,
        })
    }

    /// The pinned partition.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// The store the partition belongs to.
    pub fn store(&self) -> &Arc<dyn PartitionStore> {
        &self.store
    }

    /// Whether the pinned partition may still be supplied.
    pub fn is_owning(&self) -> bool {
        self.store
            .state(self.partition)
            .is_some_and(|state| state.is_owning())
    }
}

impl Drop for PartitionReservation {
    fn drop(&mut self) {
        self.store.release(self.partition);
    }
}

impl std::fmt::Debug for PartitionReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionReservation")
            .field("partition", &self.partition)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_released_on_drop() {
        let memory = Arc::new(MemoryPartitionStore::new());
        memory.create_partition(1, PartitionState::Owning);
        let store: Arc<dyn PartitionStore> = memory.clone();

        let reservation = PartitionReservation::acquire(&store, 1).unwrap();
        assert_eq!(memory.reservations(1), 1);
        assert!(reservation.is_owning());

        drop(reservation);
        assert_eq!(memory.reservations(1), 0);
    }

    #[test]
    fn test_reservation_fails_for_unknown_partition() {
        let store: Arc<dyn PartitionStore> = Arc::new(MemoryPartitionStore::new());
        assert!(PartitionReservation::acquire(&store, 9).is_none());
    }

    #[test]
    fn test_listener_registration_detaches_once() {
        let memory = Arc::new(MemoryPartitionStore::new());
        memory.create_partition(2, PartitionState::Owning);
        let store: Arc<dyn PartitionStore> = memory.clone();

        let registration = ListenerRegistration::attach(Arc::clone(&store), 2);
        assert_eq!(memory.listener_count(2), 1);

        memory.write_overflow(2, EntryInfo::new(&b"k"[..], &b"v"[..], 1));
        assert_eq!(registration.captured(), 1);

        let captured = registration.detach();
        assert_eq!(captured.len(), 1);
        assert_eq!(memory.listener_count(2), 0);
        assert_eq!(memory.listener_detaches(2), 1);
    }

    #[test]
    fn test_listener_registration_detaches_on_drop() {
        let memory = Arc::new(MemoryPartitionStore::new());
        memory.create_partition(3, PartitionState::Owning);
        let store: Arc<dyn PartitionStore> = memory.clone();

        drop(ListenerRegistration::attach(store, 3));
        assert_eq!(memory.listener_count(3), 0);
        assert_eq!(memory.listener_attaches(3), 1);
        assert_eq!(memory.listener_detaches(3), 1);
    }
}
