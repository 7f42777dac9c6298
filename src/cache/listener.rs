//! Capture of entries moved to the overflow tier while a partition is iterated.

use super::entry::EntryInfo;
use super::PartitionStore;
use crate::types::PartitionId;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// Collects entries written to the overflow tier of one partition.
///
/// The snapshot iteration over the overflow tier cannot see entries that are
/// relocated there after it started. While attached, the store reports every
/// such write here so that they can be supplied afterwards. Only the newest
/// version of each key is kept.
#[derive(Debug, Default)]
pub struct OverflowChangeListener {
    entries: Mutex<BTreeMap<Bytes, EntryInfo>>,
}

impl OverflowChangeListener {
    /// Create an empty listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry written to the overflow tier.
    pub fn on_overflow_write(&self, entry: EntryInfo) {
        let mut entries = self.entries.lock();
        match entries.get(&entry.key) {
            Some(existing) if existing.version >= entry.version => {}
            _ => {
                trace!(version = entry.version, "Captured overflow write");
                entries.insert(entry.key.clone(), entry);
            }
        }
    }

    /// Number of captured entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Take everything captured so far, ordered by key.
    pub fn drain(&self) -> Vec<EntryInfo> {
        std::mem::take(&mut *self.entries.lock())
            .into_values()
            .collect()
    }
}

/// A listener attached to a partition of a store.
///
/// Detaches from the store exactly once: either through [`detach`], which
/// also hands back the captured entries, or on drop.
///
/// [`detach`]: ListenerRegistration::detach
pub struct ListenerRegistration {
    store: Arc<dyn PartitionStore>,
    partition: PartitionId,
    listener: Option<Arc<OverflowChangeListener>>,
}

impl ListenerRegistration {
    /// Attach a fresh listener to a partition.
    pub fn attach(store: Arc<dyn PartitionStore>, partition: PartitionId) -> Self {
        let listener = Arc::new(OverflowChangeListener::new());
        store.attach_overflow_listener(partition, Arc::clone(&listener));
        Self {
            store,
            partition,
            listener: Some(listener),
        }
    }

    /// The partition this listener is attached to.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Number of entries captured so far.
    pub fn captured(&self) -> usize {
        self.listener.as_ref().map_or(0, |l| l.len())
    }

    /// Stop capturing and return what was captured.
    pub fn detach(mut self) -> Vec<EntryInfo> {
        match self.listener.take() {
            Some(listener) => {
                self.store.detach_overflow_listener(self.partition, &listener);
                listener.drain()
            }
            None => Vec::new(),
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.store.detach_overflow_listener(self.partition, &listener);
        }
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("partition", &self.partition)
            .field("attached", &self.listener.is_some())
            .field("captured", &self.captured())
            .finish()
    }
}
