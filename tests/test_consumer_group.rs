//! Consumer group lifecycle: unified stream, rebalances, session loss.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kafka_flock::broker::BrokerClient;
use kafka_flock::consumer::{Consumer, ConsumerGroup};
use kafka_flock::coordination::CoordinationClient;
use kafka_flock::error::{KafkaError, KafkaResult};
use kafka_flock::message::Message;
use kafka_flock::mocking::{MockClock, MockCluster, MockCoordination};
use kafka_flock::topic_partition::TopicPartition;
use kafka_flock::util::Timeout;

mod utils;
use utils::*;

const START_MS: i64 = 1_700_000_000_000;

struct Fixture {
    cluster: Arc<MockCluster>,
    coordination: Arc<MockCoordination>,
    clock: Arc<MockClock>,
}

impl Fixture {
    fn new(partitions: i32) -> Fixture {
        let cluster = Arc::new(MockCluster::new());
        cluster.create_topic("events", partitions);
        Fixture {
            cluster,
            coordination: Arc::new(MockCoordination::new()),
            clock: Arc::new(MockClock::new(START_MS)),
        }
    }

    fn start_group(&self, group: &str) -> KafkaResult<ConsumerGroup> {
        let mut config = fast_config(group);
        config.set("auto_offset_reset", "smallest").unwrap();
        ConsumerGroup::start_with_clock(
            self.cluster.clone() as Arc<dyn BrokerClient>,
            self.coordination.clone() as Arc<dyn CoordinationClient>,
            &["events"],
            config,
            self.clock.clone(),
        )
    }

    fn join_raw(&self, group: &str, member_id: &str) {
        let path = format!("/kafka-flock/{}/members/{}", group, member_id);
        self.coordination.register_ephemeral(&path, b"{}").unwrap();
    }

    fn leave_raw(&self, group: &str, member_id: &str) {
        let path = format!("/kafka-flock/{}/members/{}", group, member_id);
        self.coordination.delete(&path).unwrap();
    }
}

fn drain(group: &mut ConsumerGroup, count: usize) -> Vec<Message> {
    (0..count)
        .map(|_| {
            group
                .next_message(Timeout::After(Duration::from_secs(5)))
                .unwrap()
        })
        .collect()
}

// Messages from every owned partition arrive exactly once, ordered within
// each partition.
#[test]
fn test_unified_stream_over_all_partitions() {
    init_logger();
    let fixture = Fixture::new(2);
    populate_partition(&fixture.cluster, "events", 0, 50);
    populate_partition(&fixture.cluster, "events", 1, 50);

    let mut group = fixture.start_group("streaming").unwrap();
    assert_eq!(group.owned_partitions().len(), 2);

    let messages = drain(&mut group, 100);
    let mut seen: HashMap<i32, Vec<i64>> = HashMap::new();
    for message in &messages {
        seen.entry(message.partition())
            .or_default()
            .push(message.offset());
    }
    assert_eq!(seen[&0], (0..50).collect::<Vec<i64>>());
    assert_eq!(seen[&1], (0..50).collect::<Vec<i64>>());

    // Caught up.
    assert!(matches!(
        group.next_message(Timeout::After(Duration::ZERO)),
        Err(KafkaError::NoMessageReceived)
    ));
    group.close().unwrap();
}

// A joining member takes over part of the assignment; the released pair is
// committed before it is handed off.
#[test]
fn test_member_join_hands_off_partition() {
    init_logger();
    let fixture = Fixture::new(2);
    populate_partition(&fixture.cluster, "events", 0, 50);
    populate_partition(&fixture.cluster, "events", 1, 50);

    let mut group = fixture.start_group("handoff").unwrap();
    drain(&mut group, 100);

    fixture.join_raw("handoff", "aaaa-member");
    assert!(group
        .poll(Timeout::After(Duration::ZERO))
        .unwrap()
        .is_none());
    assert_eq!(group.owned_partitions(), [tp("events", 1)]);
    // The revoked consumer committed its delivered position on close.
    assert_eq!(
        fixture.cluster.committed("handoff", &tp("events", 0)),
        Some(50)
    );
    group.close().unwrap();
}

// A leaving member's pairs are reacquired and consumed from the committed
// offset.
#[test]
fn test_member_leave_reacquires_partition() {
    init_logger();
    let fixture = Fixture::new(2);
    fixture.join_raw("takeback", "aaaa-member");
    populate_partition(&fixture.cluster, "events", 0, 5);
    populate_partition(&fixture.cluster, "events", 1, 5);

    let mut group = fixture.start_group("takeback").unwrap();
    assert_eq!(group.owned_partitions(), [tp("events", 1)]);
    let messages = drain(&mut group, 5);
    assert!(messages.iter().all(|m| m.partition() == 1));

    fixture.leave_raw("takeback", "aaaa-member");
    let messages = drain(&mut group, 5);
    assert!(messages.iter().all(|m| m.partition() == 0));
    assert_eq!(group.owned_partitions().len(), 2);
    group.close().unwrap();
}

// Session loss tears the whole group down.
#[test]
fn test_session_loss_closes_group() {
    init_logger();
    let fixture = Fixture::new(2);
    let mut group = fixture.start_group("fragile").unwrap();

    fixture.coordination.expire_session();
    match group.poll(Timeout::After(Duration::ZERO)) {
        Err(error @ KafkaError::PartitionerZookeeper(_)) => {
            // A lost session counts as a connection failure for callers
            // deciding whether to rebuild the group.
            assert!(error.is_connection_error());
        }
        other => panic!("expected a coordination failure, got {:?}", other),
    }
    assert!(matches!(
        group.poll(Timeout::After(Duration::ZERO)),
        Err(KafkaError::ConsumerClosed)
    ));
}

// Dropping the group releases its membership record.
#[test]
fn test_drop_releases_membership() {
    init_logger();
    let fixture = Fixture::new(1);
    {
        let group = fixture.start_group("scoped").unwrap();
        assert_eq!(fixture.coordination.node_paths().len(), 1);
        drop(group);
    }
    assert!(fixture.coordination.node_paths().is_empty());
}

// Starting against a topic with no partitions fails and leaves no record
// behind.
#[test]
fn test_start_failure_cleans_up() {
    init_logger();
    let fixture = Fixture::new(1);
    let mut config = fast_config("doomed");
    config.set("auto_offset_reset", "smallest").unwrap();
    let result = ConsumerGroup::start_with_clock(
        fixture.cluster.clone() as Arc<dyn BrokerClient>,
        fixture.coordination.clone(),
        &["no-such-topic"],
        config,
        fixture.clock.clone(),
    );
    assert!(matches!(result, Err(KafkaError::Partitioner(_))));
    assert!(fixture.coordination.node_paths().is_empty());
}

/// Delegates to the mock cluster but fails offset reads for one partition on
/// demand. Lets a rebalance succeed in the partitioner and fail while the
/// group opens the acquired consumer.
struct FlakyBroker {
    inner: Arc<MockCluster>,
    fail_offsets_for: TopicPartition,
    failing: AtomicBool,
}

impl BrokerClient for FlakyBroker {
    fn partitions_for(&self, topic: &str) -> KafkaResult<Vec<i32>> {
        self.inner.partitions_for(topic)
    }

    fn earliest_offset(&self, tp: &TopicPartition) -> KafkaResult<i64> {
        if self.failing.load(Ordering::SeqCst) && *tp == self.fail_offsets_for {
            return Err(KafkaError::BrokerConnection("injected failure".to_owned()));
        }
        self.inner.earliest_offset(tp)
    }

    fn latest_offset(&self, tp: &TopicPartition) -> KafkaResult<i64> {
        self.inner.latest_offset(tp)
    }

    fn committed_offset(&self, group: &str, tp: &TopicPartition) -> KafkaResult<Option<i64>> {
        self.inner.committed_offset(group, tp)
    }

    fn commit_offsets(&self, group: &str, offsets: &[(TopicPartition, i64)]) -> KafkaResult<()> {
        self.inner.commit_offsets(group, offsets)
    }

    fn fetch(
        &self,
        tp: &TopicPartition,
        offset: i64,
        min_bytes: usize,
        max_bytes: usize,
    ) -> KafkaResult<Vec<Message>> {
        self.inner.fetch(tp, offset, min_bytes, max_bytes)
    }
}

// A rebalance that cannot open an acquired consumer keeps the prior
// assignment running and is retried later.
#[test]
fn test_failed_rebalance_preserves_prior_assignment() {
    init_logger();
    let fixture = Fixture::new(2);
    populate_partition(&fixture.cluster, "events", 0, 5);
    populate_partition(&fixture.cluster, "events", 1, 5);
    fixture.join_raw("sticky", "aaaa-member");

    let broker = Arc::new(FlakyBroker {
        inner: fixture.cluster.clone(),
        fail_offsets_for: tp("events", 0),
        failing: AtomicBool::new(false),
    });
    let mut config = fast_config("sticky");
    config.set("auto_offset_reset", "smallest").unwrap();
    let mut group = ConsumerGroup::start_with_clock(
        broker.clone(),
        fixture.coordination.clone(),
        &["events"],
        config,
        fixture.clock.clone(),
    )
    .unwrap();
    assert_eq!(group.owned_partitions(), [tp("events", 1)]);
    let messages = drain(&mut group, 5);
    assert!(messages.iter().all(|m| m.partition() == 1));

    // The other member leaves while its old pair cannot be opened.
    broker.failing.store(true, Ordering::SeqCst);
    fixture.leave_raw("sticky", "aaaa-member");
    match group.poll(Timeout::After(Duration::ZERO)) {
        Err(KafkaError::ConsumerGroup(_)) => {}
        other => panic!("expected a rebalance failure, got {:?}", other),
    }
    // Prior assignment survives, the group is not torn down, and the cycle
    // is retried on the next poll.
    assert_eq!(group.owned_partitions(), [tp("events", 1)]);
    assert!(matches!(
        group.poll(Timeout::After(Duration::ZERO)),
        Err(KafkaError::ConsumerGroup(_))
    ));

    // Once the broker recovers the retry acquires the pair.
    broker.failing.store(false, Ordering::SeqCst);
    let messages = drain(&mut group, 5);
    assert!(messages.iter().all(|m| m.partition() == 0));
    assert_eq!(group.owned_partitions().len(), 2);
    group.close().unwrap();
}
