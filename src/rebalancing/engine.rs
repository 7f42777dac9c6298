//! The supply engine: answers demands with batches of partition data.

use super::context::{
    CompletionRegistry, PartitionSupply, SupplyContext, SupplyContextStore, SupplyPhase,
};
use super::source::EntrySource;
use crate::cache::{EntryInfo, ListenerRegistration, PartitionReservation, PartitionStore};
use crate::config::SupplyConfig;
use crate::error::Result;
use crate::metrics::SupplyMetrics;
use crate::network::{DemandMessage, DeploymentInfo, SupplyMessage, SupplyTransport};
use crate::partitioning::Affinity;
use crate::types::{NodeId, PartitionId, SupplyKey};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Filter deciding which entries are worth supplying.
pub type PreloadPredicate = Arc<dyn Fn(&EntryInfo) -> bool + Send + Sync>;

/// Resolves the deployment metadata of a class loader.
pub trait DeploymentResolver: Send + Sync + std::fmt::Debug {
    /// Deployment of a class loader, if it is known.
    fn resolve(&self, loader_id: Uuid) -> Option<DeploymentInfo>;
}

/// How supplying one partition ended within a call.
enum PartitionOutcome {
    /// All phases exhausted.
    Completed,
    /// The partition can no longer be supplied to the requester.
    Missed,
    /// The flush cap was reached; the partition is mid-phase.
    Suspended,
}

/// How draining one entry source ended.
enum Drain {
    Exhausted,
    Missed,
    Suspended,
}

/// Supplies local partitions to demanding nodes.
///
/// Each demand is answered with up to `max_flushes_per_call` full batches.
/// If there is more to send, the session is suspended in the context store
/// and resumed by the next demand on the same topic, which doubles as the
/// acknowledgement of the batches sent so far.
pub struct SupplyEngine {
    config: SupplyConfig,
    store: Arc<dyn PartitionStore>,
    affinity: Arc<dyn Affinity>,
    transport: Arc<dyn SupplyTransport>,
    deployment: Option<Arc<dyn DeploymentResolver>>,
    preload_predicate: RwLock<Option<PreloadPredicate>>,
    contexts: SupplyContextStore,
    completed: CompletionRegistry,
    /// Purges per requester, to catch a purge racing a running call.
    purges: DashMap<NodeId, u64>,
    metrics: Arc<SupplyMetrics>,
}

impl SupplyEngine {
    /// Create a new engine.
    pub fn new(
        config: SupplyConfig,
        store: Arc<dyn PartitionStore>,
        affinity: Arc<dyn Affinity>,
        transport: Arc<dyn SupplyTransport>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            affinity,
            transport,
            deployment: None,
            preload_predicate: RwLock::new(None),
            contexts: SupplyContextStore::new(),
            completed: CompletionRegistry::new(),
            purges: DashMap::new(),
            metrics: Arc::new(SupplyMetrics::new()),
        })
    }

    /// Set the resolver for class deployment metadata.
    pub fn with_deployment_resolver(mut self, resolver: Arc<dyn DeploymentResolver>) -> Self {
        self.deployment = Some(resolver);
        self
    }

    /// Only supply entries accepted by `predicate`.
    pub fn set_preload_predicate(&self, predicate: PreloadPredicate) {
        *self.preload_predicate.write() = Some(predicate);
    }

    /// Supply every entry again.
    pub fn clear_preload_predicate(&self) {
        *self.preload_predicate.write() = None;
    }

    /// Engine configuration.
    pub fn config(&self) -> &SupplyConfig {
        &self.config
    }

    /// Suspended sessions.
    pub fn contexts(&self) -> &SupplyContextStore {
        &self.contexts
    }

    /// Completed sessions.
    pub fn completed(&self) -> &CompletionRegistry {
        &self.completed
    }

    /// Engine metrics.
    pub fn metrics(&self) -> &Arc<SupplyMetrics> {
        &self.metrics
    }

    /// Handle a demand from `requester`.
    ///
    /// Failures end this call only: a session whose send failed is dropped
    /// together with what it held, and the requester is expected to demand
    /// again.
    pub async fn on_demand(&self, requester: NodeId, demand: DemandMessage) {
        self.metrics.demands_total.inc();
        let key = SupplyKey::new(requester, demand.topic.clone());
        let epoch = self.purge_epoch(requester);

        let saved = self.contexts.take(&key);
        self.update_suspended_gauge();

        let ctx = match saved {
            Some(ctx) => {
                trace!(%key, "Resuming supply session");
                ctx
            }
            None if self.completed.contains_key(&key) => {
                self.metrics.demands_ignored.inc();
                debug!(%key, "Ignoring demand for completed session");
                return;
            }
            None => {
                debug!(
                    %key,
                    partitions = demand.partitions.len(),
                    topology_version = %demand.topology_version,
                    "Starting supply session"
                );
                SupplyContext::new(demand.partitions.iter().copied())
            }
        };

        if let Err(e) = self.supply(&key, &demand, ctx, epoch).await {
            self.metrics.send_failures.inc();
            if e.is_member_gone() {
                debug!(%key, error = %e, "Requester left, abandoning supply session");
            } else {
                error!(%key, error = ?e, "Failed to supply partitions");
            }
        }
    }

    /// Drop suspended sessions idle for longer than `timeout`.
    pub fn sweep_idle(&self, timeout: Duration) -> usize {
        let swept = self.contexts.sweep_idle(timeout);
        self.update_suspended_gauge();

        if swept > 0 {
            self.metrics.contexts_swept.inc_by(swept as u64);
            warn!(swept, ?timeout, "Dropped idle supply sessions");
        }
        swept
    }

    /// Forget sessions completed more than `retention` ago. A demand for a
    /// forgotten session starts it again.
    pub fn forget_completed(&self, retention: Duration) -> usize {
        let forgotten = self.completed.sweep_idle(retention);
        if forgotten > 0 {
            debug!(forgotten, ?retention, "Forgot completed supply sessions");
        }
        forgotten
    }

    /// Drop everything kept for a requester that left the cluster.
    ///
    /// A call already running for the requester drops its session instead
    /// of suspending or completing it.
    pub fn purge_requester(&self, requester: NodeId) -> usize {
        *self.purges.entry(requester).or_insert(0) += 1;
        let purged = self.contexts.purge_requester(requester);
        let forgotten = self.completed.purge_requester(requester);
        self.update_suspended_gauge();

        if purged > 0 || forgotten > 0 {
            self.metrics.contexts_purged.inc_by(purged as u64);
            warn!(requester, purged, forgotten, "Purged supply sessions of departed node");
        }
        purged
    }

    async fn supply(
        &self,
        key: &SupplyKey,
        demand: &DemandMessage,
        mut ctx: SupplyContext,
        epoch: u64,
    ) -> Result<()> {
        let requester = key.requester;
        let predicate = self.preload_predicate.read().clone();
        let mut msg = SupplyMessage::reply_to(demand, self.config.cache_id);
        let mut flushes = 0u32;

        loop {
            let mut part = match ctx.current.take() {
                Some(part) if part.reservation.is_owning() => part,
                Some(part) => {
                    debug!(%key, partition = part.partition(), "Partition no longer owned");
                    self.miss(&mut msg, part.partition());
                    continue;
                }
                None => match ctx.remaining.pop_front() {
                    Some(partition) => match self.begin(partition) {
                        Some(part) => part,
                        None => {
                            debug!(%key, partition, "Cannot reserve partition");
                            self.miss(&mut msg, partition);
                            continue;
                        }
                    },
                    None => break,
                },
            };

            let partition = part.partition();
            let outcome = self
                .supply_partition(
                    requester,
                    demand,
                    &mut part,
                    &mut msg,
                    &mut flushes,
                    predicate.as_ref(),
                )
                .await?;

            match outcome {
                PartitionOutcome::Completed => {
                    // Detach and release before the requester learns about it.
                    drop(part);
                    msg.last(partition);
                    self.metrics.partitions_completed.inc();
                    trace!(%key, partition, "Partition supplied");

                    if flushes > 0 && !ctx.remaining.is_empty() {
                        msg.mark_ack();
                        self.send(requester, demand, msg).await?;
                        self.suspend(key, ctx, epoch);
                        return Ok(());
                    }
                }
                PartitionOutcome::Missed => {
                    drop(part);
                    debug!(%key, partition, "Partition lost affinity while supplying");
                    self.miss(&mut msg, partition);
                }
                PartitionOutcome::Suspended => {
                    trace!(%key, partition, phase = part.phase().name(), "Suspending supply session");
                    ctx.current = Some(part);
                    self.suspend(key, ctx, epoch);
                    return Ok(());
                }
            }
        }

        if flushes > 0 {
            msg.mark_ack();
        }
        self.send(requester, demand, msg).await?;

        self.completed.put(key.clone());
        if self.purge_epoch(key.requester) != epoch {
            self.completed.remove(key);
            debug!(%key, "Requester purged while supplying, not recording completion");
            return Ok(());
        }
        self.metrics.sessions_completed.inc();
        info!(%key, "Supply session complete");
        Ok(())
    }

    /// Reserve an owned partition.
    fn begin(&self, partition: PartitionId) -> Option<PartitionSupply> {
        if !self.store.state(partition).is_some_and(|s| s.is_owning()) {
            return None;
        }
        PartitionReservation::acquire(&self.store, partition).map(PartitionSupply::new)
    }

    async fn supply_partition(
        &self,
        requester: NodeId,
        demand: &DemandMessage,
        part: &mut PartitionSupply,
        msg: &mut SupplyMessage,
        flushes: &mut u32,
        predicate: Option<&PreloadPredicate>,
    ) -> Result<PartitionOutcome> {
        let partition = part.partition();

        loop {
            let mut source = match std::mem::replace(&mut part.phase, SupplyPhase::Done) {
                SupplyPhase::LocalEntries { after } => {
                    EntrySource::local(self.store.local_entries(partition), after)
                }
                SupplyPhase::OverflowEntries { after } => {
                    if !self.config.overflow_enabled {
                        return Ok(PartitionOutcome::Completed);
                    }
                    if part.listener.is_none() {
                        trace!(partition, "Attaching overflow listener");
                        part.listener =
                            Some(ListenerRegistration::attach(Arc::clone(&self.store), partition));
                    }
                    match self.store.overflow_entries(partition) {
                        Some(iter) => EntrySource::overflow(iter, after),
                        None => {
                            part.phase = Self::captured_phase(part);
                            continue;
                        }
                    }
                }
                SupplyPhase::CapturedEntries { pending } => EntrySource::captured(pending),
                SupplyPhase::Done => return Ok(PartitionOutcome::Completed),
            };

            match self
                .drain(requester, demand, partition, &mut source, msg, flushes, predicate)
                .await?
            {
                Drain::Exhausted => {
                    part.phase = match source {
                        EntrySource::Local { .. } => SupplyPhase::OverflowEntries { after: None },
                        EntrySource::Overflow { .. } => Self::captured_phase(part),
                        EntrySource::Captured(_) => SupplyPhase::Done,
                    };
                }
                Drain::Missed => return Ok(PartitionOutcome::Missed),
                Drain::Suspended => {
                    part.phase = source.into_phase();
                    return Ok(PartitionOutcome::Suspended);
                }
            }
        }
    }

    /// Detach the listener and move on to what it captured.
    fn captured_phase(part: &mut PartitionSupply) -> SupplyPhase {
        let captured = part
            .listener
            .take()
            .map(ListenerRegistration::detach)
            .unwrap_or_default();
        trace!(partition = part.partition(), captured = captured.len(), "Detached overflow listener");
        SupplyPhase::CapturedEntries {
            pending: captured.into_iter(),
        }
    }

    /// Move entries from `source` into batches until it runs dry, the
    /// partition stops belonging to the requester, or the flush cap is hit.
    #[allow(clippy::too_many_arguments)]
    async fn drain(
        &self,
        requester: NodeId,
        demand: &DemandMessage,
        partition: PartitionId,
        source: &mut EntrySource<'_>,
        msg: &mut SupplyMessage,
        flushes: &mut u32,
        predicate: Option<&PreloadPredicate>,
    ) -> Result<Drain> {
        while source.has_next() {
            if !self.affinity.belongs(requester, partition, demand.topology_version) {
                return Ok(Drain::Missed);
            }

            if msg.message_size() >= self.config.batch_size_bytes {
                let next = SupplyMessage::reply_to(demand, self.config.cache_id);
                let mut full = std::mem::replace(msg, next);
                full.mark_ack();
                self.send(requester, demand, full).await?;
                *flushes += 1;
                self.throttle().await;

                if *flushes >= self.config.max_flushes_per_call {
                    return Ok(Drain::Suspended);
                }
            }

            let Some(entry) = source.next_entry() else {
                break;
            };
            if entry.info.is_expired() {
                trace!(partition, "Skipping expired entry");
                continue;
            }
            if predicate.is_some_and(|accept| !(**accept)(&entry.info)) {
                continue;
            }

            if self.config.deployment_enabled && msg.deployment().is_none() {
                if let (Some(resolver), Some(loader)) = (&self.deployment, entry.loader) {
                    if let Some(deployment) = resolver.resolve(loader) {
                        msg.prepare(deployment);
                    }
                }
            }

            msg.add_entry(partition, entry.info);
        }

        Ok(Drain::Exhausted)
    }

    fn miss(&self, msg: &mut SupplyMessage, partition: PartitionId) {
        msg.missed(partition);
        self.metrics.partitions_missed.inc();
    }

    async fn send(&self, requester: NodeId, demand: &DemandMessage, msg: SupplyMessage) -> Result<()> {
        let entries = msg.entry_count();
        let bytes = msg.message_size();
        let ack = msg.is_ack();

        self.transport
            .send_supply(requester, &demand.topic, msg, self.config.io_policy, demand.timeout)
            .await?;

        self.metrics.record_sent(entries, bytes);
        trace!(requester, topic = %demand.topic, entries, bytes, ack, "Sent supply message");
        Ok(())
    }

    async fn throttle(&self) {
        if !self.config.throttle.is_zero() {
            tokio::time::sleep(self.config.throttle).await;
        }
    }

    fn suspend(&self, key: &SupplyKey, mut ctx: SupplyContext, epoch: u64) {
        ctx.suspended_at = tokio::time::Instant::now();
        self.contexts.put(key.clone(), ctx);

        // Put before checking: a purge bumps the epoch before it clears.
        if self.purge_epoch(key.requester) != epoch {
            self.contexts.remove(key);
            debug!(%key, "Requester purged while supplying, dropping session");
        } else {
            self.metrics.suspensions.inc();
        }
        self.update_suspended_gauge();
    }

    fn purge_epoch(&self, requester: NodeId) -> u64 {
        self.purges.get(&requester).map_or(0, |epoch| *epoch)
    }

    fn update_suspended_gauge(&self) {
        self.metrics.suspended_contexts.set(self.contexts.len() as i64);
    }
}

impl std::fmt::Debug for SupplyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupplyEngine")
            .field("cache_id", &self.config.cache_id)
            .field("suspended", &self.contexts.len())
            .field("completed", &self.completed.len())
            .finish()
    }
}
