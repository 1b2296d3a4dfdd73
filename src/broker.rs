//! Broker client interface.
//!
//! The wire protocol, connection pooling and request framing live outside
//! this crate; consumers talk to the cluster through this narrow trait.
//! Tests use the in-memory implementation in [`crate::mocking`].

use crate::error::KafkaResult;
use crate::message::Message;
use crate::topic_partition::TopicPartition;

/// Handle to a broker cluster, keyed by topic, partition and group.
///
/// All offsets follow the broker convention: `earliest_offset` is the first
/// offset still retained, `latest_offset` is the offset the next produced
/// message will get (one past the last retained message).
pub trait BrokerClient: Send + Sync {
    /// Returns the partition ids of a topic, or `UnknownTopic`.
    fn partitions_for(&self, topic: &str) -> KafkaResult<Vec<i32>>;

    /// Returns the earliest offset still available for the partition.
    fn earliest_offset(&self, tp: &TopicPartition) -> KafkaResult<i64>;

    /// Returns the offset one past the newest message of the partition.
    fn latest_offset(&self, tp: &TopicPartition) -> KafkaResult<i64>;

    /// Returns the last offset committed by the group for the partition, or
    /// `None` if the group never committed.
    fn committed_offset(&self, group: &str, tp: &TopicPartition) -> KafkaResult<Option<i64>>;

    /// Persists the given offsets for the group.
    fn commit_offsets(&self, group: &str, offsets: &[(TopicPartition, i64)]) -> KafkaResult<()>;

    /// Fetches messages starting at `offset`, up to `max_bytes` of payload.
    ///
    /// `min_bytes` asks the broker to accumulate at least that much data
    /// before answering; implementations without server-side batching answer
    /// with whatever is available.
    ///
    /// Returns an empty batch when the partition has no newer messages, and
    /// also when the first pending message alone exceeds `max_bytes`; in the
    /// latter case `latest_offset` is still ahead of `offset` and the caller
    /// is expected to retry with a larger buffer.
    fn fetch(
        &self,
        tp: &TopicPartition,
        offset: i64,
        min_bytes: usize,
        max_bytes: usize,
    ) -> KafkaResult<Vec<Message>>;
}
