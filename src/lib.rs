//! A high-level Kafka consumption library with cluster discovery, a simple
//! per-partition consumer, and coordinated consumer groups that divide
//! partitions among distributed members.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod coordination;
pub mod discovery;
pub mod error;
pub mod message;
pub mod mocking;
pub mod partitioner;
pub mod topic_partition;
pub mod util;

pub use crate::config::{AutoOffsetReset, ClusterConfig, ConsumerConfig};
pub use crate::consumer::{Consumer, ConsumerGroup, ConsumerRunner, MessageHandler, SimpleConsumer};
pub use crate::error::{KafkaError, KafkaResult};
pub use crate::message::Message;
pub use crate::topic_partition::TopicPartition;
pub use crate::util::Timeout;
