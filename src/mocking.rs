//! Mocking functionality.
//!
//! Provides an in-memory broker cluster and coordination service satisfying
//! the [`BrokerClient`] and [`CoordinationClient`] interfaces, plus a
//! manually advanced clock. Together they make every timer- and
//! notification-driven code path of the crate testable without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use std::time::Duration;

use crate::broker::BrokerClient;
use crate::coordination::{CoordinationClient, CoordinationEvent};
use crate::error::{KafkaError, KafkaResult};
use crate::message::Message;
use crate::topic_partition::TopicPartition;
use crate::util::Clock;

#[derive(Default)]
struct PartitionLog {
    earliest: i64,
    next: i64,
    messages: VecDeque<Message>,
}

#[derive(Default)]
struct ClusterState {
    topics: HashMap<String, Vec<PartitionLog>>,
    committed: HashMap<(String, TopicPartition), i64>,
    commit_calls: u64,
    unreachable: bool,
}

/// In-memory broker cluster.
///
/// Messages are produced directly into per-partition logs; retention can be
/// truncated to exercise offset validation, and the cluster can be made
/// unreachable to exercise connection failures.
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<ClusterState>,
}

impl MockCluster {
    /// Creates an empty cluster.
    pub fn new() -> MockCluster {
        MockCluster::default()
    }

    /// Creates a topic with the given number of partitions. Recreating a
    /// topic resets its logs.
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        let mut state = self.lock();
        let logs = (0..partitions).map(|_| PartitionLog::default()).collect();
        state.topics.insert(topic.to_owned(), logs);
    }

    /// Appends a message and returns its offset.
    pub fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> KafkaResult<i64> {
        let mut state = self.lock();
        let log = log_mut(&mut state, topic, partition)?;
        let offset = log.next;
        log.messages.push_back(Message::new(
            topic.to_owned(),
            partition,
            offset,
            key.map(|k| k.to_vec()),
            payload.to_vec(),
        ));
        log.next += 1;
        Ok(offset)
    }

    /// Drops all messages below `offset`, simulating retention expiry.
    pub fn expire_until(&self, topic: &str, partition: i32, offset: i64) -> KafkaResult<()> {
        let mut state = self.lock();
        let log = log_mut(&mut state, topic, partition)?;
        while log
            .messages
            .front()
            .map_or(false, |m| m.offset() < offset)
        {
            log.messages.pop_front();
        }
        log.earliest = offset.min(log.next).max(log.earliest);
        Ok(())
    }

    /// Makes every broker operation fail with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Last committed offset of a group for a pair, if any.
    pub fn committed(&self, group: &str, tp: &TopicPartition) -> Option<i64> {
        self.lock()
            .committed
            .get(&(group.to_owned(), tp.clone()))
            .copied()
    }

    /// Number of commit requests the cluster has served.
    pub fn commit_calls(&self) -> u64 {
        self.lock().commit_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        self.state.lock().expect("mock cluster lock poisoned")
    }

    fn check_reachable(&self, state: &ClusterState) -> KafkaResult<()> {
        if state.unreachable {
            Err(KafkaError::BrokerConnection(
                "mock cluster unreachable".to_owned(),
            ))
        } else {
            Ok(())
        }
    }
}

fn log_ref<'a>(
    state: &'a ClusterState,
    topic: &str,
    partition: i32,
) -> KafkaResult<&'a PartitionLog> {
    let logs = state
        .topics
        .get(topic)
        .ok_or_else(|| KafkaError::UnknownTopic(topic.to_owned()))?;
    usize::try_from(partition)
        .ok()
        .and_then(|p| logs.get(p))
        .ok_or_else(|| KafkaError::UnknownPartition(topic.to_owned(), partition))
}

fn log_mut<'a>(
    state: &'a mut ClusterState,
    topic: &str,
    partition: i32,
) -> KafkaResult<&'a mut PartitionLog> {
    let logs = state
        .topics
        .get_mut(topic)
        .ok_or_else(|| KafkaError::UnknownTopic(topic.to_owned()))?;
    usize::try_from(partition)
        .ok()
        .and_then(|p| logs.get_mut(p))
        .ok_or_else(|| KafkaError::UnknownPartition(topic.to_owned(), partition))
}

impl BrokerClient for MockCluster {
    fn partitions_for(&self, topic: &str) -> KafkaResult<Vec<i32>> {
        let state = self.lock();
        self.check_reachable(&state)?;
        let logs = state
            .topics
            .get(topic)
            .ok_or_else(|| KafkaError::UnknownTopic(topic.to_owned()))?;
        Ok((0..logs.len() as i32).collect())
    }

    fn earliest_offset(&self, tp: &TopicPartition) -> KafkaResult<i64> {
        let state = self.lock();
        self.check_reachable(&state)?;
        Ok(log_ref(&state, &tp.topic, tp.partition)?.earliest)
    }

    fn latest_offset(&self, tp: &TopicPartition) -> KafkaResult<i64> {
        let state = self.lock();
        self.check_reachable(&state)?;
        Ok(log_ref(&state, &tp.topic, tp.partition)?.next)
    }

    fn committed_offset(&self, group: &str, tp: &TopicPartition) -> KafkaResult<Option<i64>> {
        let state = self.lock();
        self.check_reachable(&state)?;
        Ok(state
            .committed
            .get(&(group.to_owned(), tp.clone()))
            .copied())
    }

    fn commit_offsets(&self, group: &str, offsets: &[(TopicPartition, i64)]) -> KafkaResult<()> {
        let mut state = self.lock();
        self.check_reachable(&state)?;
        for (tp, offset) in offsets {
            state
                .committed
                .insert((group.to_owned(), tp.clone()), *offset);
        }
        state.commit_calls += 1;
        Ok(())
    }

    // The in-memory cluster has no server-side batching: the `min_bytes`
    // accumulation wait is treated as already elapsed and whatever is
    // retained gets returned at once.
    fn fetch(
        &self,
        tp: &TopicPartition,
        offset: i64,
        _min_bytes: usize,
        max_bytes: usize,
    ) -> KafkaResult<Vec<Message>> {
        let state = self.lock();
        self.check_reachable(&state)?;
        let log = log_ref(&state, &tp.topic, tp.partition)?;
        if offset < log.earliest {
            return Err(KafkaError::MessageFetch(format!(
                "offset {} for {} below the earliest retained offset {}",
                offset, tp, log.earliest
            )));
        }
        let mut batch = Vec::new();
        let mut budget = max_bytes;
        for message in log.messages.iter().filter(|m| m.offset() >= offset) {
            if message.size() > budget {
                break;
            }
            budget -= message.size();
            batch.push(message.clone());
        }
        Ok(batch)
    }
}

#[derive(Default)]
struct CoordinationState {
    nodes: HashMap<String, Vec<u8>>,
    watchers: Vec<(String, Sender<CoordinationEvent>)>,
    expired: bool,
}

/// In-memory coordination service with one implicit session.
///
/// Every node is ephemeral: expiring the session removes them all and
/// notifies the watchers, which is how session-loss handling is exercised.
#[derive(Default)]
pub struct MockCoordination {
    state: Mutex<CoordinationState>,
}

impl MockCoordination {
    /// Creates a coordination service with a live session.
    pub fn new() -> MockCoordination {
        MockCoordination::default()
    }

    /// Expires the session: all nodes vanish and watchers are notified.
    pub fn expire_session(&self) {
        let mut state = self.lock();
        state.expired = true;
        state.nodes.clear();
        for (_, sender) in &state.watchers {
            let _ = sender.send(CoordinationEvent::SessionLost);
        }
    }

    /// Nodes currently present, sorted. Test inspection helper.
    pub fn node_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.lock().nodes.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoordinationState> {
        self.state.lock().expect("mock coordination lock poisoned")
    }

    fn check_session(&self, state: &CoordinationState) -> KafkaResult<()> {
        if state.expired {
            Err(KafkaError::CoordinationConnection(
                "session expired".to_owned(),
            ))
        } else {
            Ok(())
        }
    }

    fn notify_parent(state: &CoordinationState, path: &str) {
        let parent = match path.rsplit_once('/') {
            Some((parent, _)) => parent,
            None => return,
        };
        for (watched, sender) in &state.watchers {
            if watched == parent {
                let _ = sender.send(CoordinationEvent::ChildrenChanged(parent.to_owned()));
            }
        }
    }
}

impl CoordinationClient for MockCoordination {
    fn register_ephemeral(&self, path: &str, data: &[u8]) -> KafkaResult<()> {
        let mut state = self.lock();
        self.check_session(&state)?;
        if state.nodes.contains_key(path) {
            return Err(KafkaError::CoordinationConnection(format!(
                "node already exists: {}",
                path
            )));
        }
        state.nodes.insert(path.to_owned(), data.to_vec());
        Self::notify_parent(&state, path);
        Ok(())
    }

    fn delete(&self, path: &str) -> KafkaResult<()> {
        let mut state = self.lock();
        self.check_session(&state)?;
        if state.nodes.remove(path).is_some() {
            Self::notify_parent(&state, path);
        }
        Ok(())
    }

    fn children(&self, path: &str) -> KafkaResult<Vec<String>> {
        let state = self.lock();
        self.check_session(&state)?;
        let prefix = format!("{}/", path);
        let mut children: Vec<String> = state
            .nodes
            .keys()
            .filter_map(|node| node.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(|rest| rest.to_owned())
            .collect();
        children.sort();
        Ok(children)
    }

    fn watch_children(&self, path: &str, events: Sender<CoordinationEvent>) -> KafkaResult<()> {
        let mut state = self.lock();
        self.check_session(&state)?;
        state.watchers.push((path.to_owned(), events));
        Ok(())
    }

    fn session_alive(&self) -> bool {
        !self.lock().expired
    }
}

/// Manually advanced clock for deterministic timer tests.
pub struct MockClock {
    now_ms: AtomicI64,
}

impl MockClock {
    /// Creates a clock starting at the given epoch time.
    pub fn new(start_ms: i64) -> MockClock {
        MockClock {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    /// Advances the clock.
    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produce_and_fetch() {
        let cluster = MockCluster::new();
        cluster.create_topic("events", 1);
        cluster.produce("events", 0, None, b"a").unwrap();
        cluster.produce("events", 0, None, b"b").unwrap();

        let tp = TopicPartition::new("events", 0);
        let batch = cluster.fetch(&tp, 0, 0, 1024).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].offset(), 0);
        assert_eq!(batch[1].offset(), 1);
        assert_eq!(cluster.latest_offset(&tp).unwrap(), 2);
    }

    #[test]
    fn fetch_respects_byte_budget() {
        let cluster = MockCluster::new();
        cluster.create_topic("events", 1);
        cluster.produce("events", 0, None, &[0u8; 100]).unwrap();
        cluster.produce("events", 0, None, &[0u8; 100]).unwrap();

        let tp = TopicPartition::new("events", 0);
        assert_eq!(cluster.fetch(&tp, 0, 0, 150).unwrap().len(), 1);
        assert!(cluster.fetch(&tp, 0, 0, 50).unwrap().is_empty());
    }

    #[test]
    fn retention_truncation() {
        let cluster = MockCluster::new();
        cluster.create_topic("events", 1);
        for _ in 0..5 {
            cluster.produce("events", 0, None, b"m").unwrap();
        }
        cluster.expire_until("events", 0, 3).unwrap();

        let tp = TopicPartition::new("events", 0);
        assert_eq!(cluster.earliest_offset(&tp).unwrap(), 3);
        assert!(cluster.fetch(&tp, 1, 0, 1024).is_err());
        assert_eq!(cluster.fetch(&tp, 3, 0, 1024).unwrap().len(), 2);
    }

    #[test]
    fn ephemeral_nodes_vanish_on_expiry() {
        let coordination = MockCoordination::new();
        coordination
            .register_ephemeral("/group/members/a", b"{}")
            .unwrap();
        assert_eq!(coordination.children("/group/members").unwrap(), vec!["a"]);

        coordination.expire_session();
        assert!(!coordination.session_alive());
        assert!(coordination.children("/group/members").is_err());
    }

    #[test]
    fn watches_notify_on_membership_change() {
        use std::sync::mpsc::channel;

        let coordination = MockCoordination::new();
        let (tx, rx) = channel();
        coordination.watch_children("/group/members", tx).unwrap();
        coordination
            .register_ephemeral("/group/members/a", b"{}")
            .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            CoordinationEvent::ChildrenChanged("/group/members".to_owned())
        );
        coordination.delete("/group/members/a").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            CoordinationEvent::ChildrenChanged("/group/members".to_owned())
        );
    }
}
