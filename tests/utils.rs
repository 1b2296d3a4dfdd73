#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kafka_flock::config::{ClusterConfig, ConsumerConfig};
use kafka_flock::mocking::{MockClock, MockCluster};
use kafka_flock::topic_partition::TopicPartition;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_cluster_config() -> ClusterConfig {
    ClusterConfig::new(
        "standard",
        "test-cluster",
        &["broker1:9092", "broker2:9092"],
        "zk1:2181,zk2:2181",
    )
}

pub fn test_config(group: &str) -> ConsumerConfig {
    ConsumerConfig::new(group, test_cluster_config())
}

/// A config whose timers never get in the way of a single-threaded test.
pub fn fast_config(group: &str) -> ConsumerConfig {
    let mut config = test_config(group);
    config
        .set("consumer_timeout_ms", "0")
        .unwrap()
        .set("partitioner_cooldown", "0")
        .unwrap();
    config
}

pub fn tp(topic: &str, partition: i32) -> TopicPartition {
    TopicPartition::new(topic, partition)
}

/// Produces `count` numbered messages into one partition and returns the
/// payloads in order.
pub fn populate_partition(
    cluster: &MockCluster,
    topic: &str,
    partition: i32,
    count: usize,
) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let payload = format!("message {}", i).into_bytes();
            let key = format!("key {}", i).into_bytes();
            cluster
                .produce(topic, partition, Some(&key), &payload)
                .unwrap();
            payload
        })
        .collect()
}

pub fn advance(clock: &Arc<MockClock>, secs: u64) {
    clock.advance(Duration::from_secs(secs));
}
