//! High level consumer group, coordinated through the partitioner.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::broker::BrokerClient;
use crate::config::ConsumerConfig;
use crate::consumer::{Consumer, SimpleConsumer};
use crate::coordination::CoordinationClient;
use crate::error::{KafkaError, KafkaResult};
use crate::message::Message;
use crate::partitioner::{Partitioner, Rebalance};
use crate::topic_partition::TopicPartition;
use crate::util::{Clock, SystemClock, Timeout};

const GROUP_POLL_BACKOFF: Duration = Duration::from_millis(10);

/// A single logical message stream over a dynamically changing set of owned
/// partitions.
///
/// Starting the group registers a member with the [`Partitioner`] and opens
/// one [`SimpleConsumer`] per owned pair. Rebalances are applied between
/// polls on the caller's thread: revoked consumers are committed and closed
/// before newly acquired pairs get fresh, offset-validated consumers, so
/// `poll` never observes a partition mid-release.
///
/// The group is a scoped resource: dropping it releases the membership
/// record and closes every owned consumer.
///
/// A rebalance cycle that fails to open a consumer keeps the surviving
/// consumers of the prior assignment running, surfaces a
/// [`KafkaError::ConsumerGroup`] and retries the cycle on a later poll.
/// Losing the coordination session instead tears the whole group down, since
/// its membership record is gone and the assignment can no longer be
/// trusted.
pub struct ConsumerGroup {
    broker: Arc<dyn BrokerClient>,
    config: ConsumerConfig,
    clock: Arc<dyn Clock>,
    partitioner: Partitioner,
    owned: Vec<TopicPartition>,
    consumers: Vec<SimpleConsumer>,
    cursor: usize,
    closed: bool,
}

impl ConsumerGroup {
    /// Registers a new group member for the given topics and opens the
    /// consumers of the initial assignment, using the system clock.
    pub fn start(
        broker: Arc<dyn BrokerClient>,
        coordination: Arc<dyn CoordinationClient>,
        topics: &[&str],
        config: ConsumerConfig,
    ) -> KafkaResult<ConsumerGroup> {
        ConsumerGroup::start_with_clock(broker, coordination, topics, config, Arc::new(SystemClock))
    }

    /// Starts a group with an injected clock.
    pub fn start_with_clock(
        broker: Arc<dyn BrokerClient>,
        coordination: Arc<dyn CoordinationClient>,
        topics: &[&str],
        config: ConsumerConfig,
        clock: Arc<dyn Clock>,
    ) -> KafkaResult<ConsumerGroup> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_owned()).collect();
        let mut partitioner = Partitioner::with_clock(
            coordination,
            Arc::clone(&broker),
            topics.clone(),
            config.clone(),
            Arc::clone(&clock),
        )?;
        partitioner.register()?;
        info!(
            "starting consumer group {} for topics {:?} as member {}",
            config.group_id(),
            topics,
            partitioner.member_id()
        );

        let mut group = ConsumerGroup {
            broker,
            config,
            clock,
            partitioner,
            owned: Vec::new(),
            consumers: Vec::new(),
            cursor: 0,
            closed: false,
        };
        if let Err(e) = group.synchronize() {
            group.teardown();
            return Err(e);
        }
        Ok(group)
    }

    /// The member id this group instance registered with.
    pub fn member_id(&self) -> &str {
        self.partitioner.member_id()
    }

    /// Pairs currently owned by this member.
    pub fn owned_partitions(&self) -> &[TopicPartition] {
        &self.owned
    }

    /// Returns the next message from any owned partition, or
    /// [`KafkaError::NoMessageReceived`] when the timeout expires.
    pub fn next_message(&mut self, timeout: Timeout) -> KafkaResult<Message> {
        self.poll(timeout)?.ok_or(KafkaError::NoMessageReceived)
    }

    /// Runs one partitioner refresh and applies the resulting rebalance, if
    /// any. Session loss tears the group down.
    fn synchronize(&mut self) -> KafkaResult<()> {
        match self.partitioner.refresh() {
            Ok(Some(rebalance)) => self.apply_rebalance(rebalance),
            Ok(None) => Ok(()),
            Err(e) => {
                error!("partitioner failed for group {}: {}", self.config.group_id(), e);
                self.teardown();
                Err(e)
            }
        }
    }

    fn apply_rebalance(&mut self, rebalance: Rebalance) -> KafkaResult<()> {
        debug!(
            "applying rebalance for group {}: revoked {:?}, acquired {:?}",
            self.config.group_id(),
            rebalance.revoked,
            rebalance.acquired
        );
        // release first: another member may own these pairs already
        for tp in &rebalance.revoked {
            if let Some(idx) = self.owned.iter().position(|owned| owned == tp) {
                self.owned.remove(idx);
                let mut consumer = self.consumers.remove(idx);
                if let Err(e) = consumer.close() {
                    warn!("error closing consumer for revoked pair {}: {}", tp, e);
                }
            }
        }
        // open all acquired pairs before attaching any of them
        let mut fresh: Vec<(TopicPartition, SimpleConsumer)> = Vec::new();
        for tp in &rebalance.acquired {
            let opened = SimpleConsumer::with_clock(
                Arc::clone(&self.broker),
                &tp.topic,
                Some(vec![tp.partition]),
                self.config.clone(),
                Arc::clone(&self.clock),
            )
            .and_then(|mut consumer| consumer.connect().map(|_| consumer));
            match opened {
                Ok(consumer) => fresh.push((tp.clone(), consumer)),
                Err(e) => {
                    error!("rebalance aborted, cannot open consumer for {}: {}", tp, e);
                    for (_, mut consumer) in fresh {
                        let _ = consumer.close();
                    }
                    self.partitioner.revert(&rebalance);
                    return Err(KafkaError::ConsumerGroup(format!(
                        "cannot open consumer for {}: {}",
                        tp, e
                    )));
                }
            }
        }
        for (tp, consumer) in fresh {
            self.owned.push(tp);
            self.consumers.push(consumer);
        }

        // deterministic polling order across rebalances
        let owned = std::mem::take(&mut self.owned);
        let consumers = std::mem::take(&mut self.consumers);
        let mut zipped: Vec<(TopicPartition, SimpleConsumer)> =
            owned.into_iter().zip(consumers).collect();
        zipped.sort_by(|a, b| a.0.cmp(&b.0));
        for (tp, consumer) in zipped {
            self.owned.push(tp);
            self.consumers.push(consumer);
        }
        self.cursor = 0;
        Ok(())
    }

    /// Releases every held resource before an error is surfaced.
    fn teardown(&mut self) {
        for consumer in &mut self.consumers {
            if let Err(e) = consumer.close() {
                warn!("error closing consumer during teardown: {}", e);
            }
        }
        self.consumers.clear();
        self.owned.clear();
        self.partitioner.close();
        self.closed = true;
    }
}

impl Consumer for ConsumerGroup {
    fn poll(&mut self, timeout: Timeout) -> KafkaResult<Option<Message>> {
        if self.closed {
            return Err(KafkaError::ConsumerClosed);
        }
        let start = Instant::now();
        loop {
            self.synchronize()?;

            // one non-blocking pass over the owned consumers
            let count = self.consumers.len();
            for _ in 0..count {
                let idx = self.cursor % count;
                self.cursor = (self.cursor + 1) % count;
                match self.consumers[idx].poll(Timeout::After(Duration::ZERO)) {
                    Ok(Some(message)) => return Ok(Some(message)),
                    Ok(None) => {}
                    Err(e) => {
                        error!(
                            "consumer for {:?} failed: {}",
                            self.owned.get(idx),
                            e
                        );
                        self.teardown();
                        return Err(e);
                    }
                }
            }
            if timeout.expired(start.elapsed()) {
                return Ok(None);
            }
            thread::sleep(GROUP_POLL_BACKOFF);
        }
    }

    fn commit(&mut self) -> KafkaResult<()> {
        if self.closed {
            return Err(KafkaError::ConsumerClosed);
        }
        let mut result = Ok(());
        for consumer in &mut self.consumers {
            if let Err(e) = consumer.commit() {
                warn!("commit failed for topic {}: {}", consumer.topic(), e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn iter_timeout(&self) -> Duration {
        self.config.iter_timeout()
    }

    fn close(&mut self) -> KafkaResult<()> {
        if self.closed {
            return Ok(());
        }
        info!(
            "closing consumer group {} member {}",
            self.config.group_id(),
            self.partitioner.member_id()
        );
        let mut result = Ok(());
        for consumer in &mut self.consumers {
            if let Err(e) = consumer.close() {
                warn!("error closing consumer for topic {}: {}", consumer.topic(), e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        self.consumers.clear();
        self.owned.clear();
        self.partitioner.close();
        self.closed = true;
        result
    }
}

impl Drop for ConsumerGroup {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                error!("error closing consumer group on drop: {}", e);
            }
        }
    }
}
