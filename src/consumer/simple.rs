//! Low level consumer for a fixed topic and partition set.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::broker::BrokerClient;
use crate::config::{AutoOffsetReset, ConsumerConfig};
use crate::consumer::Consumer;
use crate::error::{KafkaError, KafkaResult};
use crate::message::Message;
use crate::topic_partition::TopicPartition;
use crate::util::{Clock, SystemClock, Timeout};

const FETCH_BACKOFF: Duration = Duration::from_millis(10);

struct PartitionPosition {
    tp: TopicPartition,
    /// Next offset to request from the broker.
    fetch_offset: i64,
    /// Offset to commit: one past the last message handed to the caller.
    commit_offset: i64,
}

/// Consumer for one topic, tracking per-partition offsets.
///
/// On connect the starting offset of every partition is validated against
/// the range the broker still retains; committed offsets outside that range
/// are repaired according to the configured reset policy, so the consumer
/// never requests data the broker has already garbage collected. The same
/// repair is applied during polling when retention expires a position the
/// consumer already holds.
///
/// Partitions are polled round-robin, so one empty partition cannot starve
/// delivery from the others. Offsets advance as messages are handed to the
/// caller, which keeps commits at-least-once: a message is only covered by
/// a commit after it has been delivered.
pub struct SimpleConsumer {
    client: Arc<dyn BrokerClient>,
    config: ConsumerConfig,
    clock: Arc<dyn Clock>,
    topic: String,
    pinned_partitions: Option<Vec<i32>>,
    positions: Vec<PartitionPosition>,
    buffered: VecDeque<Message>,
    fetch_buffer_size: usize,
    cursor: usize,
    uncommitted: u64,
    last_commit_ms: i64,
    connected: bool,
    closed: bool,
}

impl SimpleConsumer {
    /// Creates a consumer for a topic, optionally pinned to an explicit set
    /// of partitions. Arguments are validated before any network I/O.
    pub fn new(
        client: Arc<dyn BrokerClient>,
        topic: &str,
        partitions: Option<Vec<i32>>,
        config: ConsumerConfig,
    ) -> KafkaResult<SimpleConsumer> {
        SimpleConsumer::with_clock(client, topic, partitions, config, Arc::new(SystemClock))
    }

    /// Creates a consumer with an injected clock.
    pub fn with_clock(
        client: Arc<dyn BrokerClient>,
        topic: &str,
        partitions: Option<Vec<i32>>,
        config: ConsumerConfig,
        clock: Arc<dyn Clock>,
    ) -> KafkaResult<SimpleConsumer> {
        if topic.is_empty() {
            return Err(KafkaError::ClientConfig(
                "topic".to_owned(),
                String::new(),
                "topic name must not be empty".to_owned(),
            ));
        }
        if config.group_id().is_empty() {
            return Err(KafkaError::ClientConfig(
                "group_id".to_owned(),
                String::new(),
                "group id must not be empty".to_owned(),
            ));
        }
        if let Some(pinned) = &partitions {
            if pinned.is_empty() {
                return Err(KafkaError::ClientConfig(
                    "partitions".to_owned(),
                    String::new(),
                    "partition list must not be empty".to_owned(),
                ));
            }
            for (i, p) in pinned.iter().enumerate() {
                if *p < 0 {
                    return Err(KafkaError::ClientConfig(
                        "partitions".to_owned(),
                        p.to_string(),
                        "partition must not be negative".to_owned(),
                    ));
                }
                if pinned[..i].contains(p) {
                    return Err(KafkaError::ClientConfig(
                        "partitions".to_owned(),
                        p.to_string(),
                        "duplicate partition".to_owned(),
                    ));
                }
            }
        }
        let fetch_buffer_size = config.buffer_size();
        Ok(SimpleConsumer {
            client,
            config,
            clock,
            topic: topic.to_owned(),
            pinned_partitions: partitions,
            positions: Vec::new(),
            buffered: VecDeque::new(),
            fetch_buffer_size,
            cursor: 0,
            uncommitted: 0,
            last_commit_ms: 0,
            connected: false,
            closed: false,
        })
    }

    /// The topic this consumer reads from.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The partitions assigned to this consumer. Empty until connected when
    /// no explicit partition set was given.
    pub fn assigned_partitions(&self) -> Vec<i32> {
        self.positions.iter().map(|p| p.tp.partition).collect()
    }

    /// The next offset the given partition will be fetched from.
    pub fn position(&self, partition: i32) -> Option<i64> {
        self.positions
            .iter()
            .find(|p| p.tp.partition == partition)
            .map(|p| p.fetch_offset)
    }

    /// Establishes the broker connection and validates the starting offset
    /// of every assigned partition. Connecting twice is a no-op.
    pub fn connect(&mut self) -> KafkaResult<()> {
        if self.closed {
            return Err(KafkaError::ConsumerClosed);
        }
        if self.connected {
            return Ok(());
        }
        let available = self.client.partitions_for(&self.topic)?;
        let assigned = match &self.pinned_partitions {
            Some(pinned) => {
                for p in pinned {
                    if !available.contains(p) {
                        return Err(KafkaError::UnknownPartition(self.topic.clone(), *p));
                    }
                }
                pinned.clone()
            }
            None => {
                let mut all = available;
                all.sort_unstable();
                all
            }
        };
        self.positions.clear();
        for partition in assigned {
            let tp = TopicPartition::new(&self.topic, partition);
            let start = self.validated_offset(&tp)?;
            self.positions.push(PartitionPosition {
                tp,
                fetch_offset: start,
                commit_offset: start,
            });
        }
        self.connected = true;
        self.last_commit_ms = self.clock.now_ms();
        debug!(
            "consumer connected: topic {}, partitions {:?}, group {}",
            self.topic,
            self.assigned_partitions(),
            self.config.group_id()
        );
        Ok(())
    }

    /// Resolves the starting offset for a partition: the committed offset
    /// when it lies within `[earliest, latest]`, otherwise the reset policy
    /// decides between replaying the backlog and skipping to the end.
    fn validated_offset(&self, tp: &TopicPartition) -> KafkaResult<i64> {
        let earliest = self.client.earliest_offset(tp)?;
        let latest = self.client.latest_offset(tp)?;
        let committed = self
            .client
            .committed_offset(self.config.group_id(), tp)?;
        match committed {
            Some(offset) if offset >= earliest && offset <= latest => Ok(offset),
            committed => {
                let reset = match self.config.auto_offset_reset() {
                    AutoOffsetReset::Smallest => earliest,
                    AutoOffsetReset::Largest => latest,
                };
                match committed {
                    Some(offset) => info!(
                        "committed offset {} for {} outside retained range [{}, {}], resetting to {}",
                        offset, tp, earliest, latest, reset
                    ),
                    None => debug!(
                        "no committed offset for {} in group {}, starting at {}",
                        tp,
                        self.config.group_id(),
                        reset
                    ),
                }
                Ok(reset)
            }
        }
    }

    /// Tries one fetch pass over the assigned partitions, starting at the
    /// round-robin cursor, and buffers the first non-empty batch.
    fn fetch_any(&mut self) -> KafkaResult<()> {
        let count = self.positions.len();
        for _ in 0..count {
            let idx = self.cursor % count;
            self.cursor = (self.cursor + 1) % count;
            let tp = self.positions[idx].tp.clone();
            let fetch_offset = self.positions[idx].fetch_offset;

            let batch = match self.client.fetch(
                &tp,
                fetch_offset,
                self.config.fetch_size_bytes(),
                self.fetch_buffer_size,
            ) {
                Ok(batch) => batch,
                Err(e) => {
                    // retention may expire the fetch position while we hold
                    // it; re-validate instead of failing the consumer
                    let earliest = self.client.earliest_offset(&tp)?;
                    if fetch_offset < earliest {
                        let start = self.validated_offset(&tp)?;
                        warn!(
                            "fetch position {} for {} expired by retention, resetting to {}",
                            fetch_offset, tp, start
                        );
                        self.positions[idx].fetch_offset = start;
                        self.positions[idx].commit_offset = start;
                        continue;
                    }
                    return Err(e);
                }
            };
            if batch.is_empty() {
                // either caught up, or the next message does not fit the buffer
                let latest = self.client.latest_offset(&tp)?;
                if latest > fetch_offset {
                    self.grow_buffer(&tp)?;
                }
                continue;
            }
            if let Some(last) = batch.last() {
                self.positions[idx].fetch_offset = last.offset() + 1;
            }
            self.buffered.extend(batch);
            return Ok(());
        }
        Ok(())
    }

    fn grow_buffer(&mut self, tp: &TopicPartition) -> KafkaResult<()> {
        let current = self.fetch_buffer_size;
        let mut grown = current.saturating_mul(2);
        if let Some(max) = self.config.max_buffer_size() {
            grown = grown.min(max);
        }
        if grown <= current {
            return Err(KafkaError::MessageFetch(format!(
                "message on {} exceeds the maximum buffer size {}",
                tp, current
            )));
        }
        warn!(
            "growing fetch buffer for {} from {} to {} bytes",
            tp, current, grown
        );
        self.fetch_buffer_size = grown;
        Ok(())
    }

    fn note_delivered(&mut self, message: &Message) {
        if let Some(position) = self
            .positions
            .iter_mut()
            .find(|p| p.tp.partition == message.partition())
        {
            position.commit_offset = message.offset() + 1;
        }
        self.uncommitted += 1;
    }

    fn maybe_auto_commit(&mut self) -> KafkaResult<()> {
        if !self.config.auto_commit() || self.uncommitted == 0 {
            return Ok(());
        }
        let count_due = self
            .config
            .auto_commit_every_n()
            .map_or(false, |n| self.uncommitted >= n);
        let elapsed_ms = self.clock.now_ms() - self.last_commit_ms;
        let time_due = elapsed_ms >= self.config.auto_commit_every_t().as_millis() as i64;
        if count_due || time_due {
            self.commit_positions()?;
        }
        Ok(())
    }

    fn commit_positions(&mut self) -> KafkaResult<()> {
        let offsets: Vec<(TopicPartition, i64)> = self
            .positions
            .iter()
            .map(|p| (p.tp.clone(), p.commit_offset))
            .collect();
        if offsets.is_empty() {
            return Ok(());
        }
        self.client
            .commit_offsets(self.config.group_id(), &offsets)
            .map_err(|e| KafkaError::ConsumerCommit(e.to_string()))?;
        self.uncommitted = 0;
        self.last_commit_ms = self.clock.now_ms();
        Ok(())
    }
}

impl Consumer for SimpleConsumer {
    fn poll(&mut self, timeout: Timeout) -> KafkaResult<Option<Message>> {
        if self.closed {
            return Err(KafkaError::ConsumerClosed);
        }
        if !self.connected {
            self.connect()?;
        }
        let start = Instant::now();
        loop {
            if let Some(message) = self.buffered.pop_front() {
                self.note_delivered(&message);
                self.maybe_auto_commit()?;
                return Ok(Some(message));
            }
            self.fetch_any()?;
            if let Some(message) = self.buffered.pop_front() {
                self.note_delivered(&message);
                self.maybe_auto_commit()?;
                return Ok(Some(message));
            }
            self.maybe_auto_commit()?;
            if timeout.expired(start.elapsed()) {
                return Ok(None);
            }
            thread::sleep(FETCH_BACKOFF);
        }
    }

    fn commit(&mut self) -> KafkaResult<()> {
        if self.closed {
            return Err(KafkaError::ConsumerClosed);
        }
        if !self.connected {
            return Ok(());
        }
        self.commit_positions()
    }

    fn iter_timeout(&self) -> Duration {
        self.config.iter_timeout()
    }

    fn close(&mut self) -> KafkaResult<()> {
        if self.closed {
            return Ok(());
        }
        let result = if self.connected && self.config.auto_commit() {
            self.commit_positions()
        } else {
            Ok(())
        };
        self.closed = true;
        self.connected = false;
        self.buffered.clear();
        debug!("consumer closed: topic {}", self.topic);
        result
    }
}

impl Drop for SimpleConsumer {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("error closing consumer on drop: {}", e);
            }
        }
    }
}
