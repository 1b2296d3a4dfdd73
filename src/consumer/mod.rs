//! Base trait and common functionalities for all consumers.

pub mod group;
pub mod runtime;
pub mod simple;

pub use self::group::ConsumerGroup;
pub use self::runtime::{ConsumerRunner, MessageHandler, RunnerHandle};
pub use self::simple::SimpleConsumer;

use std::time::Duration;

use crate::error::{KafkaError, KafkaResult};
use crate::message::Message;
use crate::util::Timeout;

/// Common trait for all consumers.
pub trait Consumer {
    /// Polls for the next message, blocking up to `timeout`. Returns
    /// `Ok(None)` when the timeout expires without a message.
    fn poll(&mut self, timeout: Timeout) -> KafkaResult<Option<Message>>;

    /// Persists the current consumption positions.
    fn commit(&mut self) -> KafkaResult<()>;

    /// Commits (when auto-commit is enabled) and releases the connection.
    /// Closing twice is not an error.
    fn close(&mut self) -> KafkaResult<()>;

    /// The configured blocking time of one iteration step, used as the
    /// per-attempt poll timeout by [`Consumer::iter`] and by the consumer
    /// runner.
    fn iter_timeout(&self) -> Duration;

    /// Returns a blocking iterator over messages. Each attempt blocks up to
    /// [`Consumer::iter_timeout`]; the iterator is infinite until the
    /// consumer is closed.
    fn iter(&mut self) -> MessageIter<'_, Self>
    where
        Self: Sized,
    {
        MessageIter { consumer: self }
    }
}

/// A blocking message iterator returned by [`Consumer::iter`].
pub struct MessageIter<'a, C: Consumer> {
    consumer: &'a mut C,
}

impl<'a, C: Consumer> Iterator for MessageIter<'a, C> {
    type Item = KafkaResult<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let timeout = Timeout::After(self.consumer.iter_timeout());
            match self.consumer.poll(timeout) {
                Ok(Some(message)) => return Some(Ok(message)),
                Ok(None) => continue,
                Err(KafkaError::ConsumerClosed) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
