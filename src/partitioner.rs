//! Deterministic partition assignment across group members.
//!
//! Every member registers an ephemeral node under the group path and watches
//! the member list. Assignment is a pure function over the sorted pair list
//! and the sorted member list, so all members independently compute the same
//! result from the same coordination state, without a central coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::broker::BrokerClient;
use crate::config::ConsumerConfig;
use crate::coordination::{CoordinationClient, CoordinationEvent};
use crate::error::{KafkaError, KafkaResult};
use crate::topic_partition::TopicPartition;
use crate::util::{Clock, SystemClock};

/// How often topic metadata is re-read from the broker. The broker side
/// refreshes its own view every 600s by default; we re-read every 120s.
pub const PARTITIONS_REFRESH_INTERVAL: Duration = Duration::from_secs(120);

static MEMBER_SEQ: AtomicU64 = AtomicU64::new(0);

/// A full group assignment: member id to owned pairs.
pub type Assignment = HashMap<String, Vec<TopicPartition>>;

/// Distributes pairs over members: sorted pairs are striped round-robin over
/// the sorted member list, so each member receives either `floor(P/M)` or
/// `ceil(P/M)` pairs and the result only depends on the two input sets.
pub fn assign_partitions(pairs: &[TopicPartition], members: &[String]) -> Assignment {
    let mut sorted_pairs = pairs.to_vec();
    sorted_pairs.sort();
    sorted_pairs.dedup();

    let mut sorted_members = members.to_vec();
    sorted_members.sort();
    sorted_members.dedup();
    if sorted_members.is_empty() {
        return Assignment::new();
    }

    let mut shares: Vec<Vec<TopicPartition>> = vec![Vec::new(); sorted_members.len()];
    for (i, pair) in sorted_pairs.into_iter().enumerate() {
        shares[i % sorted_members.len()].push(pair);
    }
    sorted_members.into_iter().zip(shares).collect()
}

/// Membership record stored at the member's ephemeral node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Unique id of the member within the group.
    pub member_id: String,
    /// Client id of the process that registered.
    pub client_id: String,
    /// Topics the member wants to consume.
    pub topics: Vec<String>,
    /// Registration time, milliseconds since the Unix epoch.
    pub registered_at_ms: i64,
}

/// The ownership delta of one member after a completed rebalance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rebalance {
    /// Pairs this member no longer owns.
    pub revoked: Vec<TopicPartition>,
    /// Pairs this member newly owns.
    pub acquired: Vec<TopicPartition>,
}

impl Rebalance {
    /// Reports whether the rebalance changes nothing for this member.
    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty() && self.acquired.is_empty()
    }
}

/// Lifecycle state of a [`Partitioner`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionerState {
    /// Created but not registered with the coordination service.
    Uninitialized,
    /// Registered; membership and metadata changes are being watched.
    Watching,
    /// Registration removed; the partitioner cannot be reused.
    Terminated,
}

/// Tracks group membership and computes this member's partition ownership.
///
/// `register` joins the group; `refresh` must then be called periodically
/// from the consumption thread. It drains watch notifications, re-reads
/// topic metadata when due, recomputes the assignment and reports the
/// ownership delta for this member. Rapid successive changes are debounced
/// by the configured cooldown.
pub struct Partitioner {
    coordination: Arc<dyn CoordinationClient>,
    broker: Arc<dyn BrokerClient>,
    clock: Arc<dyn Clock>,
    config: ConsumerConfig,
    topics: Vec<String>,
    member_id: String,
    members_path: String,
    state: PartitionerState,
    events: Option<Receiver<CoordinationEvent>>,
    owned: Vec<TopicPartition>,
    pending_change: bool,
    last_metadata_refresh_ms: i64,
    last_rebalance_ms: i64,
}

impl Partitioner {
    /// Creates a partitioner for the given topics, using the system clock.
    pub fn new(
        coordination: Arc<dyn CoordinationClient>,
        broker: Arc<dyn BrokerClient>,
        topics: Vec<String>,
        config: ConsumerConfig,
    ) -> KafkaResult<Partitioner> {
        Partitioner::with_clock(coordination, broker, topics, config, Arc::new(SystemClock))
    }

    /// Creates a partitioner with an injected clock.
    pub fn with_clock(
        coordination: Arc<dyn CoordinationClient>,
        broker: Arc<dyn BrokerClient>,
        topics: Vec<String>,
        config: ConsumerConfig,
        clock: Arc<dyn Clock>,
    ) -> KafkaResult<Partitioner> {
        if config.group_id().is_empty() {
            return Err(KafkaError::ClientConfig(
                "group_id".to_owned(),
                String::new(),
                "group id must not be empty".to_owned(),
            ));
        }
        if topics.is_empty() {
            return Err(KafkaError::ClientConfig(
                "topics".to_owned(),
                String::new(),
                "topic list must not be empty".to_owned(),
            ));
        }
        let member_id = format!(
            "{}-{}-{}-{}",
            config.client_id(),
            std::process::id(),
            clock.now_ms(),
            MEMBER_SEQ.fetch_add(1, Ordering::Relaxed),
        );
        let members_path = format!("{}/members", config.group_path());
        Ok(Partitioner {
            coordination,
            broker,
            clock,
            config,
            topics,
            member_id,
            members_path,
            state: PartitionerState::Uninitialized,
            events: None,
            owned: Vec::new(),
            pending_change: false,
            last_metadata_refresh_ms: 0,
            last_rebalance_ms: 0,
        })
    }

    /// The generated member id of this partitioner.
    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PartitionerState {
        self.state
    }

    /// Pairs currently owned by this member.
    pub fn owned_partitions(&self) -> &[TopicPartition] {
        &self.owned
    }

    /// Writes the ephemeral membership record and installs the member watch.
    pub fn register(&mut self) -> KafkaResult<()> {
        if self.state != PartitionerState::Uninitialized {
            return Err(KafkaError::Partitioner(format!(
                "cannot register in state {:?}",
                self.state
            )));
        }
        let (tx, rx) = channel();
        self.coordination.watch_children(&self.members_path, tx)?;

        let info = MemberInfo {
            member_id: self.member_id.clone(),
            client_id: self.config.client_id().to_owned(),
            topics: self.topics.clone(),
            registered_at_ms: self.clock.now_ms(),
        };
        let data = serde_json::to_vec(&info)
            .map_err(|e| KafkaError::Partitioner(format!("cannot encode member info: {}", e)))?;
        self.coordination
            .register_ephemeral(&self.member_path(), &data)?;

        self.events = Some(rx);
        self.state = PartitionerState::Watching;
        self.pending_change = true;
        // the very first rebalance is not held back by the cooldown
        self.last_rebalance_ms =
            self.clock.now_ms() - self.config.partitioner_cooldown().as_millis() as i64;
        debug!(
            "registered member {} for topics {:?} under {}",
            self.member_id, self.topics, self.members_path
        );
        Ok(())
    }

    /// Processes pending notifications and recomputes this member's
    /// ownership when membership or topic metadata changed.
    ///
    /// Returns `Ok(None)` when nothing changed for this member (or a change
    /// is being debounced by the cooldown), and the ownership delta
    /// otherwise. Loss of the coordination session is fatal: the partitioner
    /// terminates and the caller must tear down consumption.
    pub fn refresh(&mut self) -> KafkaResult<Option<Rebalance>> {
        match self.state {
            PartitionerState::Uninitialized => {
                return Err(KafkaError::Partitioner("not registered".to_owned()))
            }
            PartitionerState::Terminated => {
                return Err(KafkaError::Partitioner("already terminated".to_owned()))
            }
            PartitionerState::Watching => {}
        }

        while let Some(event) = self.try_next_event() {
            match event {
                CoordinationEvent::SessionLost => return self.fail_session(),
                CoordinationEvent::ChildrenChanged(path) => {
                    debug!("membership change under {}", path);
                    self.pending_change = true;
                }
            }
        }
        if !self.coordination.session_alive() {
            return self.fail_session();
        }

        let now = self.clock.now_ms();
        let metadata_due = now - self.last_metadata_refresh_ms
            >= PARTITIONS_REFRESH_INTERVAL.as_millis() as i64;
        if !self.pending_change && !metadata_due {
            return Ok(None);
        }
        let cooldown_ms = self.config.partitioner_cooldown().as_millis() as i64;
        if now - self.last_rebalance_ms < cooldown_ms {
            debug!(
                "rebalance for group {} deferred by cooldown",
                self.config.group_id()
            );
            return Ok(None);
        }

        let pairs = self.fetch_pairs()?;
        let members = self.fetch_members()?;
        if !members.iter().any(|m| m == &self.member_id) {
            return self.fail_session();
        }
        self.pending_change = false;
        self.last_metadata_refresh_ms = now;

        let assignment = assign_partitions(&pairs, &members);
        let new_owned = assignment
            .get(&self.member_id)
            .cloned()
            .unwrap_or_default();
        if new_owned == self.owned {
            return Ok(None);
        }
        self.last_rebalance_ms = now;

        let revoked: Vec<TopicPartition> = self
            .owned
            .iter()
            .filter(|tp| !new_owned.contains(tp))
            .cloned()
            .collect();
        let acquired: Vec<TopicPartition> = new_owned
            .iter()
            .filter(|tp| !self.owned.contains(tp))
            .cloned()
            .collect();
        info!(
            "rebalancing group {}: member {} owns {} of {} pairs ({} members), revoked {:?}, acquired {:?}",
            self.config.group_id(),
            self.member_id,
            new_owned.len(),
            pairs.len(),
            members.len(),
            revoked,
            acquired
        );
        self.owned = new_owned;
        Ok(Some(Rebalance { revoked, acquired }))
    }

    /// Rolls back a rebalance whose application failed, restoring the pairs
    /// this member actually holds and scheduling a retry.
    pub fn revert(&mut self, rebalance: &Rebalance) {
        self.owned.retain(|tp| !rebalance.acquired.contains(tp));
        self.pending_change = true;
        warn!(
            "rebalance of group {} rolled back, member {} holds {} pairs",
            self.config.group_id(),
            self.member_id,
            self.owned.len()
        );
    }

    /// Removes the membership record and terminates the partitioner.
    /// Idempotent; the remaining members rebalance once the ephemeral node
    /// is gone.
    pub fn close(&mut self) {
        if self.state == PartitionerState::Watching {
            if let Err(e) = self.coordination.delete(&self.member_path()) {
                warn!("cannot remove membership record: {}", e);
            }
        }
        self.state = PartitionerState::Terminated;
        self.owned.clear();
        self.events = None;
    }

    fn member_path(&self) -> String {
        format!("{}/{}", self.members_path, self.member_id)
    }

    fn try_next_event(&mut self) -> Option<CoordinationEvent> {
        self.events.as_ref().and_then(|rx| rx.try_recv().ok())
    }

    fn fail_session(&mut self) -> KafkaResult<Option<Rebalance>> {
        error!(
            "coordination session lost for group {}, member {}",
            self.config.group_id(),
            self.member_id
        );
        self.state = PartitionerState::Terminated;
        self.owned.clear();
        self.events = None;
        Err(KafkaError::PartitionerZookeeper(
            "coordination session lost".to_owned(),
        ))
    }

    /// Lists all pairs of the watched topics from broker metadata. Missing
    /// topics are skipped; an empty result is an error because an empty
    /// group assignment would silently consume nothing.
    fn fetch_pairs(&self) -> KafkaResult<Vec<TopicPartition>> {
        let mut pairs = Vec::new();
        for topic in &self.topics {
            match self.broker.partitions_for(topic) {
                Ok(partitions) => {
                    pairs.extend(
                        partitions
                            .into_iter()
                            .map(|p| TopicPartition::new(topic, p)),
                    );
                }
                Err(KafkaError::UnknownTopic(_)) => {
                    warn!("topic {} missing from cluster metadata", topic);
                }
                Err(e) => {
                    return Err(KafkaError::Partitioner(format!(
                        "cannot fetch partitions for {}: {}",
                        topic, e
                    )))
                }
            }
        }
        if pairs.is_empty() {
            return Err(KafkaError::Partitioner(format!(
                "no partitions found for topics {:?}",
                self.topics
            )));
        }
        Ok(pairs)
    }

    fn fetch_members(&self) -> KafkaResult<Vec<String>> {
        self.coordination
            .children(&self.members_path)
            .map_err(|e| KafkaError::PartitionerZookeeper(format!("cannot list members: {}", e)))
    }
}
