//! Worker lanes driving the supply engine.

use super::engine::SupplyEngine;
use crate::cluster::{MemberEvent, MemberEventListener};
use crate::error::{Error, Result};
use crate::network::DemandMessage;
use crate::types::NodeId;
use parking_lot::Mutex;
use std::hash::Hasher;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use twox_hash::XxHash64;

type Job = (NodeId, DemandMessage);

/// Runs demands on a fixed set of worker lanes.
///
/// Every (requester, topic) maps to one lane, so demands of a session are
/// handled one at a time and in arrival order while different sessions run
/// in parallel.
pub struct SupplyPool {
    engine: Arc<SupplyEngine>,
    lanes: Vec<mpsc::Sender<Job>>,
    cancellation: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SupplyPool {
    /// Spawn the lanes and the idle sweep on the current runtime.
    pub fn start(engine: Arc<SupplyEngine>) -> Self {
        let config = engine.config().clone();
        let cancellation = CancellationToken::new();
        let mut lanes = Vec::with_capacity(config.worker_lanes);
        let mut tasks = Vec::with_capacity(config.worker_lanes + 1);

        for lane in 0..config.worker_lanes {
            let (tx, rx) = mpsc::channel(config.lane_capacity);
            lanes.push(tx);
            tasks.push(tokio::spawn(run_lane(
                lane,
                Arc::clone(&engine),
                rx,
                cancellation.clone(),
            )));
        }

        if let Some(interval) = config.idle_sweep_interval {
            let engine = Arc::clone(&engine);
            let cancellation = cancellation.clone();
            let timeout = config.idle_context_timeout;
            let retention = config.completed_retention;

            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(interval);
                // The first tick completes immediately.
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            engine.sweep_idle(timeout);
                            engine.forget_completed(retention);
                        }
                        _ = cancellation.cancelled() => {
                            debug!("Idle sweep shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        info!(
            cache_id = config.cache_id,
            lanes = config.worker_lanes,
            "Supply pool started"
        );

        Self {
            engine,
            lanes,
            cancellation,
            tasks: Mutex::new(tasks),
        }
    }

    /// The engine run by this pool.
    pub fn engine(&self) -> &Arc<SupplyEngine> {
        &self.engine
    }

    /// Queue a demand without waiting.
    ///
    /// Fails with [`Error::ServerBusy`] if the lane of the session is full.
    pub fn submit(&self, requester: NodeId, demand: DemandMessage) -> Result<()> {
        let lane = &self.lanes[self.lane_for(requester, &demand)];
        lane.try_send((requester, demand)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::ServerBusy {
                pending: lane.max_capacity() - lane.capacity(),
            },
            mpsc::error::TrySendError::Closed(_) => Error::Cancelled,
        })
    }

    /// Queue a demand, waiting for room in its lane.
    pub async fn dispatch(&self, requester: NodeId, demand: DemandMessage) -> Result<()> {
        let lane = &self.lanes[self.lane_for(requester, &demand)];
        lane.send((requester, demand))
            .await
            .map_err(|_| Error::Cancelled)
    }

    /// React to a membership change.
    pub fn on_member_event(&self, event: &MemberEvent) {
        if event.is_leave() {
            self.engine.purge_requester(event.node_id());
        }
    }

    /// Stop all lanes and the sweep and wait for them.
    ///
    /// Queued demands that were not started are dropped.
    pub async fn shutdown(&self) {
        self.cancellation.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!("Supply pool stopped");
    }

    fn lane_for(&self, requester: NodeId, demand: &DemandMessage) -> usize {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write_u64(requester);
        hasher.write(demand.topic.as_str().as_bytes());
        (hasher.finish() % self.lanes.len() as u64) as usize
    }
}

impl MemberEventListener for SupplyPool {
    fn on_event(&self, event: MemberEvent) {
        self.on_member_event(&event);
    }
}

impl Drop for SupplyPool {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

impl std::fmt::Debug for SupplyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupplyPool")
            .field("lanes", &self.lanes.len())
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("engine", &self.engine)
            .finish()
    }
}

async fn run_lane(
    lane: usize,
    engine: Arc<SupplyEngine>,
    mut jobs: mpsc::Receiver<Job>,
    cancellation: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            job = jobs.recv() => match job {
                Some((requester, demand)) => engine.on_demand(requester, demand).await,
                None => break,
            },
        }
    }
    debug!(lane, "Supply lane stopped");
}
