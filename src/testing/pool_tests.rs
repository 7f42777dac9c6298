//! Supply Pool Test Suite
//!
//! Runs the engine behind [`SupplyPool`](crate::rebalancing::SupplyPool)
//! lanes with a [`ChannelTransport`](crate::network::ChannelTransport), the
//! requester side being played by the test itself.
//!
//! # Test Cases
//!
//! | Test ID     | Scenario                          | Verification                       |
//! |-------------|-----------------------------------|------------------------------------|
//! | TC_POOL_01  | Requester demands on every ack    | All partitions delivered once      |
//! | TC_POOL_02  | Requester leaves mid-session      | Session purged, partition released |
//! | TC_POOL_03  | Requester stops demanding         | Idle sweep drops the session       |
//! | TC_POOL_04  | Demand after shutdown             | Rejected as cancelled              |
//! | TC_POOL_05  | Lane full                         | Rejected as busy                   |

#[cfg(test)]
mod tests {
    use crate::cache::{EntryInfo, MemoryPartitionStore, PartitionStore};
    use crate::cluster::{MemberEvent, MemberEventListener};
    use crate::config::SupplyConfig;
    use crate::error::Error;
    use crate::network::{ChannelTransport, Delivery, DemandMessage, PartitionFlag, SupplyTransport};
    use crate::partitioning::{Affinity, AffinityTracker, PartitionAssignment};
    use crate::rebalancing::{SupplyEngine, SupplyPool};
    use crate::testing::{init_tracing, wait_for, SupplyHarness, PARTITIONS, REQUESTER, SUPPLIER};
    use crate::types::{PartitionId, PartitionState, SupplyKey, Topic, TopologyVersion};
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct TestCluster {
        store: Arc<MemoryPartitionStore>,
        pool: Arc<SupplyPool>,
        inbox: mpsc::Receiver<Delivery>,
        topic: Topic,
        version: TopologyVersion,
    }

    impl TestCluster {
        fn start(config: SupplyConfig) -> Self {
            let version = TopologyVersion::new(3, 0);
            let affinity = AffinityTracker::new();
            affinity.apply(
                version,
                PartitionAssignment::new(vec![vec![REQUESTER, SUPPLIER]; PARTITIONS as usize]),
            );

            let store = Arc::new(MemoryPartitionStore::new());
            let transport = Arc::new(ChannelTransport::new());
            let inbox = transport.register(REQUESTER, 256);
            let topic = Topic::rebalance(config.cache_id, version, 0);

            let engine = SupplyEngine::new(
                config,
                store.clone() as Arc<dyn PartitionStore>,
                Arc::new(affinity) as Arc<dyn Affinity>,
                transport as Arc<dyn SupplyTransport>,
            )
            .unwrap();

            Self {
                store,
                pool: Arc::new(SupplyPool::start(Arc::new(engine))),
                inbox,
                topic,
                version,
            }
        }

        fn fill(&self, partition: PartitionId, count: usize) -> Vec<EntryInfo> {
            self.store.create_partition(partition, PartitionState::Owning);
            (0..count)
                .map(|i| {
                    let entry = SupplyHarness::entry(partition, i);
                    self.store.put(partition, entry.clone());
                    entry
                })
                .collect()
        }

        fn demand(&self, partitions: &[PartitionId]) -> DemandMessage {
            DemandMessage::new(self.topic.clone(), partitions.to_vec(), self.version)
        }

        fn key(&self) -> SupplyKey {
            SupplyKey::new(REQUESTER, self.topic.clone())
        }

        fn is_suspended(&self) -> bool {
            self.pool.engine().contexts().contains_key(&self.key())
        }
    }

    fn batched(entries: usize, max_flushes: u32) -> SupplyConfig {
        SupplyConfig::new(9)
            .with_batch_size_bytes(SupplyHarness::entry_size() * entries)
            .with_max_flushes_per_call(max_flushes)
            .with_worker_lanes(2)
    }

    #[tokio::test]
    async fn test_requester_receives_every_partition() {
        init_tracing();
        let mut cluster = TestCluster::start(batched(20, 2).without_idle_sweep());
        let partitions = [0, 1, 2, 3];
        let mut expected = HashMap::new();
        for &partition in &partitions {
            expected.insert(partition, cluster.fill(partition, 150));
        }

        cluster
            .pool
            .dispatch(REQUESTER, cluster.demand(&partitions))
            .await
            .unwrap();

        let mut received: HashMap<PartitionId, Vec<EntryInfo>> = HashMap::new();
        let mut done = HashSet::new();
        while done.len() < partitions.len() {
            let delivery = tokio::time::timeout(Duration::from_secs(5), cluster.inbox.recv())
                .await
                .expect("supply message within timeout")
                .expect("inbox open");
            assert_eq!(delivery.topic, cluster.topic);

            let msg = delivery.supply().unwrap();
            for (partition, entry) in msg.entries() {
                received.entry(*partition).or_default().push(entry.clone());
            }
            done.extend(msg.last_partitions());
            assert!(msg.missed_partitions().is_empty());

            if msg.is_ack() {
                cluster
                    .pool
                    .dispatch(REQUESTER, cluster.demand(&partitions))
                    .await
                    .unwrap();
            }
        }

        for &partition in &partitions {
            assert_eq!(received[&partition], expected[&partition]);
        }
        let key = cluster.key();
        let engine = cluster.pool.engine().clone();
        assert!(wait_for(|| engine.completed().contains_key(&key), Duration::from_secs(2), Duration::from_millis(10)).await);
        for &partition in &partitions {
            assert_eq!(cluster.store.reservations(partition), 0);
        }

        cluster.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_member_leave_purges_session() {
        let cluster = TestCluster::start(batched(10, 1).without_idle_sweep());
        cluster.fill(7, 100);

        cluster.pool.submit(REQUESTER, cluster.demand(&[7])).unwrap();
        assert!(
            wait_for(|| cluster.is_suspended(), Duration::from_secs(2), Duration::from_millis(5)).await
        );
        assert_eq!(cluster.store.reservations(7), 1);

        cluster.pool.on_event(MemberEvent::NodeLeave { node_id: REQUESTER });

        assert!(!cluster.is_suspended());
        assert_eq!(cluster.store.reservations(7), 0);
        assert_eq!(cluster.pool.engine().metrics().snapshot().contexts_purged, 1);

        // Unrelated nodes leaving change nothing.
        cluster.pool.on_event(MemberEvent::NodeFailed { node_id: 42 });
        assert_eq!(cluster.pool.engine().metrics().snapshot().contexts_purged, 1);

        cluster.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_idle_session_swept() {
        let config = batched(10, 1)
            .with_idle_sweep(Duration::from_millis(20), Duration::from_millis(50));
        let cluster = TestCluster::start(config);
        cluster.fill(8, 100);

        cluster.pool.submit(REQUESTER, cluster.demand(&[8])).unwrap();
        assert!(
            wait_for(|| cluster.is_suspended(), Duration::from_secs(2), Duration::from_millis(5)).await
        );

        // The requester never demands again.
        assert!(
            wait_for(|| !cluster.is_suspended(), Duration::from_secs(2), Duration::from_millis(10)).await
        );
        assert_eq!(cluster.store.reservations(8), 0);

        let snapshot = cluster.pool.engine().metrics().snapshot();
        assert_eq!(snapshot.contexts_swept, 1);
        assert_eq!(snapshot.suspended_contexts, 0);

        cluster.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_cancelled() {
        let cluster = TestCluster::start(SupplyConfig::new(9).without_idle_sweep());
        cluster.pool.shutdown().await;

        let result = cluster.pool.submit(REQUESTER, cluster.demand(&[1]));
        assert!(matches!(result, Err(Error::Cancelled)));

        let result = cluster.pool.dispatch(REQUESTER, cluster.demand(&[1])).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_full_lane_reports_busy() {
        // Single-threaded runtime: the lane cannot drain between submits.
        let config = SupplyConfig::new(9)
            .with_worker_lanes(1)
            .with_lane_capacity(1)
            .without_idle_sweep();
        let cluster = TestCluster::start(config);
        cluster.fill(2, 5);

        cluster.pool.submit(REQUESTER, cluster.demand(&[2])).unwrap();
        let result = cluster.pool.submit(REQUESTER, cluster.demand(&[2]));
        assert!(matches!(result, Err(Error::ServerBusy { pending: 1 })));

        cluster.pool.shutdown().await;
    }
}
