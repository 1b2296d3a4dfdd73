//! Error manipulations.

use std::{error, fmt};

use crate::message::Message;

/// Kafka result.
pub type KafkaResult<T> = Result<T, KafkaError>;

/// Represents all possible errors of this crate.
///
/// Every failure mode is a variant of this one enum, so callers can match
/// broadly (any `KafkaError`) or narrowly (a specific variant).
#[derive(Clone, PartialEq, Eq)]
pub enum KafkaError {
    /// Invalid client configuration: key, value, reason.
    ClientConfig(String, String, String),
    /// Cluster topology discovery failed.
    Discovery(String),
    /// Broker unreachable or connection broken.
    BrokerConnection(String),
    /// Coordination service unreachable or request failed.
    CoordinationConnection(String),
    /// The topic does not exist in the cluster.
    UnknownTopic(String),
    /// The partition does not exist for the topic.
    UnknownPartition(String, i32),
    /// Message fetch failed.
    MessageFetch(String),
    /// Offset commit failed.
    ConsumerCommit(String),
    /// Partition assignment computation or group bookkeeping failed.
    Partitioner(String),
    /// The partitioner lost its coordination service session.
    PartitionerZookeeper(String),
    /// Error in the consumer group coordinator.
    ConsumerGroup(String),
    /// A user callback failed while processing the attached message.
    ProcessMessage {
        /// Description of the underlying failure.
        cause: String,
        /// The message that triggered the failure.
        message: Box<Message>,
    },
    /// No message was received within the given poll interval.
    NoMessageReceived,
    /// The consumer has already been closed.
    ConsumerClosed,
}

impl fmt::Debug for KafkaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KafkaError::ClientConfig(key, value, reason) => write!(
                f,
                "KafkaError (Client config error: {} {} {})",
                reason, key, value
            ),
            KafkaError::Discovery(err) => write!(f, "KafkaError (Discovery error: {})", err),
            KafkaError::BrokerConnection(err) => {
                write!(f, "KafkaError (Broker connection error: {})", err)
            }
            KafkaError::CoordinationConnection(err) => {
                write!(f, "KafkaError (Coordination connection error: {})", err)
            }
            KafkaError::UnknownTopic(topic) => write!(f, "KafkaError (Unknown topic: {})", topic),
            KafkaError::UnknownPartition(topic, partition) => write!(
                f,
                "KafkaError (Unknown partition: {}-{})",
                topic, partition
            ),
            KafkaError::MessageFetch(err) => {
                write!(f, "KafkaError (Message fetch error: {})", err)
            }
            KafkaError::ConsumerCommit(err) => {
                write!(f, "KafkaError (Consumer commit error: {})", err)
            }
            KafkaError::Partitioner(err) => write!(f, "KafkaError (Partitioner error: {})", err),
            KafkaError::PartitionerZookeeper(err) => {
                write!(f, "KafkaError (Partitioner coordination error: {})", err)
            }
            KafkaError::ConsumerGroup(err) => {
                write!(f, "KafkaError (Consumer group error: {})", err)
            }
            KafkaError::ProcessMessage { cause, message } => write!(
                f,
                "KafkaError (Process message error: {} on {:?})",
                cause, message
            ),
            KafkaError::NoMessageReceived => {
                write!(f, "No message received within the given poll interval")
            }
            KafkaError::ConsumerClosed => write!(f, "KafkaError (Consumer closed)"),
        }
    }
}

impl fmt::Display for KafkaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KafkaError::ClientConfig(key, value, reason) => {
                write!(f, "Client config error: {} {} {}", reason, key, value)
            }
            KafkaError::Discovery(err) => write!(f, "Discovery error: {}", err),
            KafkaError::BrokerConnection(err) => write!(f, "Broker connection error: {}", err),
            KafkaError::CoordinationConnection(err) => {
                write!(f, "Coordination connection error: {}", err)
            }
            KafkaError::UnknownTopic(topic) => write!(f, "Unknown topic: {}", topic),
            KafkaError::UnknownPartition(topic, partition) => {
                write!(f, "Unknown partition: {}-{}", topic, partition)
            }
            KafkaError::MessageFetch(err) => write!(f, "Message fetch error: {}", err),
            KafkaError::ConsumerCommit(err) => write!(f, "Consumer commit error: {}", err),
            KafkaError::Partitioner(err) => write!(f, "Partitioner error: {}", err),
            KafkaError::PartitionerZookeeper(err) => {
                write!(f, "Partitioner coordination error: {}", err)
            }
            KafkaError::ConsumerGroup(err) => write!(f, "Consumer group error: {}", err),
            KafkaError::ProcessMessage { cause, .. } => {
                write!(f, "Process message error: {}", cause)
            }
            KafkaError::NoMessageReceived => {
                write!(f, "No message received within the given poll interval")
            }
            KafkaError::ConsumerClosed => write!(f, "Consumer closed"),
        }
    }
}

impl error::Error for KafkaError {}

impl KafkaError {
    /// Reports whether the error is a lost connection to the broker or to the
    /// coordination service. Connection errors are fatal to the component
    /// that observed them; callers recover by reconstructing the consumer.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            KafkaError::BrokerConnection(_)
                | KafkaError::CoordinationConnection(_)
                | KafkaError::PartitionerZookeeper(_)
        )
    }

    /// Returns the message attached to a process error, if any.
    pub fn failed_message(&self) -> Option<&Message> {
        match self {
            KafkaError::ProcessMessage { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors() {
        assert!(KafkaError::BrokerConnection("down".to_owned()).is_connection_error());
        assert!(KafkaError::CoordinationConnection("down".to_owned()).is_connection_error());
        assert!(KafkaError::PartitionerZookeeper("expired".to_owned()).is_connection_error());
        assert!(!KafkaError::MessageFetch("stale".to_owned()).is_connection_error());
        assert!(!KafkaError::ConsumerClosed.is_connection_error());
    }

    #[test]
    fn failed_message_extraction() {
        let message = Message::new("events".to_owned(), 0, 7, None, b"p".to_vec());
        let error = KafkaError::ProcessMessage {
            cause: "handler rejected".to_owned(),
            message: Box::new(message.clone()),
        };
        assert_eq!(error.failed_message(), Some(&message));
        assert_eq!(KafkaError::NoMessageReceived.failed_message(), None);
    }
}
