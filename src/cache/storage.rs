//! In-memory partition store.

use super::entry::{EntryInfo, OverflowEntry};
use super::listener::OverflowChangeListener;
use super::{LocalEntries, OverflowEntries, PartitionStore};
use crate::types::{PartitionId, PartitionState};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// One partition held by [`MemoryPartitionStore`].
#[derive(Debug)]
struct MemoryPartition {
    state: RwLock<PartitionState>,
    reservations: AtomicI64,
    entries: RwLock<BTreeMap<Bytes, EntryInfo>>,
    /// Created on the first overflow write.
    overflow: RwLock<Option<BTreeMap<Bytes, OverflowEntry>>>,
    listeners: Mutex<Vec<Arc<OverflowChangeListener>>>,
    stats: PartitionCallStats,
}

/// Call counters, kept for inspection by embedders and tests.
#[derive(Debug, Default)]
struct PartitionCallStats {
    reserve_calls: AtomicU64,
    release_calls: AtomicU64,
    listener_attaches: AtomicU64,
    listener_detaches: AtomicU64,
    overflow_scans: AtomicU64,
}

impl MemoryPartition {
    fn new(state: PartitionState) -> Self {
        Self {
            state: RwLock::new(state),
            reservations: AtomicI64::new(0),
            entries: RwLock::new(BTreeMap::new()),
            overflow: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            stats: PartitionCallStats::default(),
        }
    }

    fn notify_overflow_write(&self, entry: &EntryInfo) {
        for listener in self.listeners.lock().iter() {
            listener.on_overflow_write(entry.clone());
        }
    }
}

/// Partition store keeping every tier in process memory.
///
/// Iteration is lazy: each step looks up the successor of the last returned
/// key under a short read lock, so concurrent writes never block on an
/// in-flight supply session and iterators can be held across await points.
#[derive(Debug, Default)]
pub struct MemoryPartitionStore {
    partitions: RwLock<HashMap<PartitionId, Arc<MemoryPartition>>>,
}

impl MemoryPartitionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, partition: PartitionId) -> Option<Arc<MemoryPartition>> {
        self.partitions.read().get(&partition).cloned()
    }

    /// Create (or reset the state of) a local partition.
    pub fn create_partition(&self, partition: PartitionId, state: PartitionState) {
        let mut partitions = self.partitions.write();
        match partitions.get(&partition) {
            Some(existing) => *existing.state.write() = state,
            None => {
                partitions.insert(partition, Arc::new(MemoryPartition::new(state)));
            }
        }
    }

    /// Change the state of a local partition.
    pub fn set_state(&self, partition: PartitionId, state: PartitionState) {
        if let Some(part) = self.partition(partition) {
            debug!(partition, %state, "Partition state changed");
            *part.state.write() = state;
        }
    }

    /// Insert or replace an in-memory entry.
    pub fn put(&self, partition: PartitionId, entry: EntryInfo) {
        if let Some(part) = self.partition(partition) {
            part.entries.write().insert(entry.key.clone(), entry);
        }
    }

    /// Remove an entry from every tier.
    pub fn remove(&self, partition: PartitionId, key: &[u8]) {
        if let Some(part) = self.partition(partition) {
            part.entries.write().remove(key);
            if let Some(overflow) = part.overflow.write().as_mut() {
                overflow.remove(key);
            }
        }
    }

    /// Write an entry directly to the overflow tier.
    pub fn write_overflow(&self, partition: PartitionId, entry: EntryInfo) {
        self.write_overflow_entry(partition, OverflowEntry::from_info(entry));
    }

    /// Write an overflow entry, including its deployment metadata.
    pub fn write_overflow_entry(&self, partition: PartitionId, entry: OverflowEntry) {
        let Some(part) = self.partition(partition) else {
            return;
        };
        let info = entry.info();
        part.overflow
            .write()
            .get_or_insert_with(BTreeMap::new)
            .insert(entry.key.clone(), entry);
        part.notify_overflow_write(&info);
    }

    /// Move an in-memory entry to the overflow tier, as eviction would.
    ///
    /// Returns false if the key was not in memory.
    pub fn move_to_overflow(&self, partition: PartitionId, key: &[u8]) -> bool {
        let Some(part) = self.partition(partition) else {
            return false;
        };
        let Some(entry) = part.entries.write().remove(key) else {
            return false;
        };
        part.overflow
            .write()
            .get_or_insert_with(BTreeMap::new)
            .insert(entry.key.clone(), OverflowEntry::from_info(entry.clone()));
        part.notify_overflow_write(&entry);
        true
    }

    /// Number of in-memory entries of a partition.
    pub fn entry_count(&self, partition: PartitionId) -> usize {
        self.partition(partition)
            .map_or(0, |part| part.entries.read().len())
    }

    /// Number of overflow entries of a partition.
    pub fn overflow_count(&self, partition: PartitionId) -> usize {
        self.partition(partition).map_or(0, |part| {
            part.overflow.read().as_ref().map_or(0, |o| o.len())
        })
    }

    /// Current reservation count of a partition.
    pub fn reservations(&self, partition: PartitionId) -> i64 {
        self.partition(partition)
            .map_or(0, |part| part.reservations.load(Ordering::SeqCst))
    }

    /// Total successful and failed reserve calls.
    pub fn reserve_calls(&self, partition: PartitionId) -> u64 {
        self.stat(partition, |s| &s.reserve_calls)
    }

    /// Total release calls.
    pub fn release_calls(&self, partition: PartitionId) -> u64 {
        self.stat(partition, |s| &s.release_calls)
    }

    /// Total listener attachments.
    pub fn listener_attaches(&self, partition: PartitionId) -> u64 {
        self.stat(partition, |s| &s.listener_attaches)
    }

    /// Total listener detachments.
    pub fn listener_detaches(&self, partition: PartitionId) -> u64 {
        self.stat(partition, |s| &s.listener_detaches)
    }

    /// Total overflow iterations started.
    pub fn overflow_scans(&self, partition: PartitionId) -> u64 {
        self.stat(partition, |s| &s.overflow_scans)
    }

    /// Listeners currently attached to a partition.
    pub fn listener_count(&self, partition: PartitionId) -> usize {
        self.partition(partition)
            .map_or(0, |part| part.listeners.lock().len())
    }

    fn stat(&self, partition: PartitionId, f: impl Fn(&PartitionCallStats) -> &AtomicU64) -> u64 {
        self.partition(partition)
            .map_or(0, |part| f(&part.stats).load(Ordering::SeqCst))
    }
}

impl PartitionStore for MemoryPartitionStore {
    fn state(&self, partition: PartitionId) -> Option<PartitionState> {
        self.partition(partition).map(|part| *part.state.read())
    }

    fn reserve(&self, partition: PartitionId) -> bool {
        let Some(part) = self.partition(partition) else {
            return false;
        };
        part.stats.reserve_calls.fetch_add(1, Ordering::SeqCst);

        // Hold the state lock so eviction cannot slip in between check and pin.
        let state = part.state.read();
        if matches!(*state, PartitionState::Evicted | PartitionState::Lost) {
            return false;
        }
        part.reservations.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn release(&self, partition: PartitionId) {
        let Some(part) = self.partition(partition) else {
            return;
        };
        part.stats.release_calls.fetch_add(1, Ordering::SeqCst);
        let previous = part.reservations.fetch_sub(1, Ordering::SeqCst);
        if previous <= 0 {
            warn!(partition, previous, "Partition released more times than reserved");
        }
    }

    fn local_entries(&self, partition: PartitionId) -> LocalEntries<'_> {
        match self.partition(partition) {
            Some(part) => Box::new(RangeScan::new(part, |p, after| {
                next_after(&*p.entries.read(), after).cloned()
            })),
            None => Box::new(std::iter::empty()),
        }
    }

    fn overflow_entries(&self, partition: PartitionId) -> Option<OverflowEntries<'_>> {
        let part = self.partition(partition)?;
        if part.overflow.read().is_none() {
            return None;
        }
        part.stats.overflow_scans.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(RangeScan::new(part, |p, after| {
            p.overflow
                .read()
                .as_ref()
                .and_then(|overflow| next_after(overflow, after).cloned())
        })))
    }

    fn attach_overflow_listener(&self, partition: PartitionId, listener: Arc<OverflowChangeListener>) {
        if let Some(part) = self.partition(partition) {
            part.stats.listener_attaches.fetch_add(1, Ordering::SeqCst);
            part.listeners.lock().push(listener);
        }
    }

    fn detach_overflow_listener(&self, partition: PartitionId, listener: &Arc<OverflowChangeListener>) {
        if let Some(part) = self.partition(partition) {
            part.stats.listener_detaches.fetch_add(1, Ordering::SeqCst);
            part.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
        }
    }
}

fn next_after<'a, V>(map: &'a BTreeMap<Bytes, V>, after: Option<&Bytes>) -> Option<&'a V> {
    match after {
        Some(key) => map
            .range::<Bytes, _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(_, v)| v),
        None => map.values().next(),
    }
}

/// Keyed entry types a [`RangeScan`] can walk.
trait Keyed {
    fn key(&self) -> &Bytes;
}

impl Keyed for EntryInfo {
    fn key(&self) -> &Bytes {
        &self.key
    }
}

impl Keyed for OverflowEntry {
    fn key(&self) -> &Bytes {
        &self.key
    }
}

/// Ordered scan that re-seeks past the last returned key on every step.
struct RangeScan<T, F> {
    partition: Arc<MemoryPartition>,
    last_key: Option<Bytes>,
    seek: F,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, F> RangeScan<T, F>
where
    F: Fn(&MemoryPartition, Option<&Bytes>) -> Option<T>,
{
    fn new(partition: Arc<MemoryPartition>, seek: F) -> Self {
        Self {
            partition,
            last_key: None,
            seek,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, F> Iterator for RangeScan<T, F>
where
    T: Keyed,
    F: Fn(&MemoryPartition, Option<&Bytes>) -> Option<T>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let next = (self.seek)(&self.partition, self.last_key.as_ref())?;
        self.last_key = Some(next.key().clone());
        Some(next)
    }
}
