//! Cluster and consumer configuration.

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KafkaError, KafkaResult};

/// Initial fetch buffer size: twice the largest message the clusters are
/// configured to accept.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 2 * 1024 * 1024;

/// Minimum number of bytes the broker should accumulate before answering a
/// fetch request.
pub const FETCH_MIN_BYTES: usize = 4096;

/// Client id used on connections when none is configured.
pub const DEFAULT_CLIENT_ID: &str = "kafka-flock";

/// Namespace for group membership records in the coordination service.
pub const COORDINATION_BASE_PATH: &str = "/kafka-flock";

const DEFAULT_PARTITIONER_COOLDOWN: Duration = Duration::from_secs(30);
const DEFAULT_AUTO_COMMIT_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_ITER_TIMEOUT: Duration = Duration::from_millis(100);

/// Connection parameters for one named cluster, resolved from topology data.
///
/// Equality and hashing are order-independent over the broker list and over
/// the hosts of the coordination connection string, so two resolutions of the
/// same cluster compare equal regardless of listing order and the config can
/// key maps and sets for deduplication.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    cluster_type: String,
    name: String,
    broker_list: Vec<String>,
    zookeeper: String,
}

impl ClusterConfig {
    /// Creates a new cluster configuration.
    pub fn new(cluster_type: &str, name: &str, broker_list: &[&str], zookeeper: &str) -> ClusterConfig {
        ClusterConfig {
            cluster_type: cluster_type.to_owned(),
            name: name.to_owned(),
            broker_list: broker_list.iter().map(|b| (*b).to_owned()).collect(),
            zookeeper: zookeeper.to_owned(),
        }
    }

    /// The cluster type, e.g. `standard` or `scribe`.
    pub fn cluster_type(&self) -> &str {
        &self.cluster_type
    }

    /// The cluster name within its type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The broker addresses of the cluster.
    pub fn broker_list(&self) -> &[String] {
        &self.broker_list
    }

    /// The coordination service connection string.
    pub fn zookeeper(&self) -> &str {
        &self.zookeeper
    }

    fn sorted_brokers(&self) -> BTreeSet<&str> {
        self.broker_list
            .iter()
            .map(|b| b.as_str())
            .filter(|b| !b.is_empty())
            .collect()
    }

    fn sorted_zookeeper_hosts(&self) -> BTreeSet<&str> {
        self.zookeeper.split(',').filter(|h| !h.is_empty()).collect()
    }
}

impl PartialEq for ClusterConfig {
    fn eq(&self, other: &ClusterConfig) -> bool {
        self.cluster_type == other.cluster_type
            && self.name == other.name
            && self.sorted_brokers() == other.sorted_brokers()
            && self.sorted_zookeeper_hosts() == other.sorted_zookeeper_hosts()
    }
}

impl Eq for ClusterConfig {}

impl Hash for ClusterConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cluster_type.hash(state);
        self.name.hash(state);
        self.sorted_brokers().hash(state);
        self.sorted_zookeeper_hosts().hash(state);
    }
}

/// Policy applied when the committed offset of a partition is missing or
/// falls outside the range the broker still retains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoOffsetReset {
    /// Seek to the earliest retained offset and replay the backlog.
    Smallest,
    /// Seek to the latest offset and skip the unread backlog.
    Largest,
}

impl FromStr for AutoOffsetReset {
    type Err = ();

    fn from_str(s: &str) -> Result<AutoOffsetReset, ()> {
        match s {
            "smallest" => Ok(AutoOffsetReset::Smallest),
            "largest" => Ok(AutoOffsetReset::Largest),
            _ => Err(()),
        }
    }
}

/// Configuration for consumers and consumer groups.
///
/// A config is created with its defaults from a group id and a
/// [`ClusterConfig`], then adjusted through [`ConsumerConfig::set`]:
///
/// ```
/// use kafka_flock::config::{ClusterConfig, ConsumerConfig};
///
/// let cluster = ClusterConfig::new("standard", "local", &["broker:9092"], "zk:2181");
/// let mut config = ConsumerConfig::new("my-group", cluster);
/// config
///     .set("auto_offset_reset", "smallest")?
///     .set("auto_commit", "false")?;
/// # Ok::<(), kafka_flock::error::KafkaError>(())
/// ```
///
/// Unknown keys are rejected with a configuration error. Equality compares
/// the resolved values, so it does not depend on the order in which options
/// were set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerConfig {
    group_id: String,
    cluster: ClusterConfig,
    client_id: String,
    buffer_size: usize,
    max_buffer_size: Option<usize>,
    fetch_size_bytes: usize,
    auto_commit: bool,
    auto_commit_every_n: Option<u64>,
    auto_commit_every_t: Duration,
    auto_offset_reset: AutoOffsetReset,
    iter_timeout: Duration,
    partitioner_cooldown: Duration,
}

impl ConsumerConfig {
    /// Creates a configuration with the default option values.
    pub fn new(group_id: &str, cluster: ClusterConfig) -> ConsumerConfig {
        ConsumerConfig {
            group_id: group_id.to_owned(),
            cluster,
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            buffer_size: MAX_MESSAGE_SIZE_BYTES,
            max_buffer_size: None,
            fetch_size_bytes: FETCH_MIN_BYTES,
            auto_commit: true,
            auto_commit_every_n: None,
            auto_commit_every_t: DEFAULT_AUTO_COMMIT_INTERVAL,
            auto_offset_reset: AutoOffsetReset::Largest,
            iter_timeout: DEFAULT_ITER_TIMEOUT,
            partitioner_cooldown: DEFAULT_PARTITIONER_COOLDOWN,
        }
    }

    /// Sets a recognized option from its string representation.
    ///
    /// Recognized keys: `buffer_size`, `max_buffer_size` (`none` for
    /// unbounded growth), `fetch_size_bytes`, `auto_commit`,
    /// `auto_commit_every_n` (`0` disables the count trigger),
    /// `auto_commit_every_t` (ms), `auto_offset_reset`
    /// (`smallest`/`largest`), `consumer_timeout_ms`,
    /// `partitioner_cooldown` (seconds), `client_id`.
    pub fn set(&mut self, key: &str, value: &str) -> KafkaResult<&mut ConsumerConfig> {
        match key {
            "buffer_size" => self.buffer_size = parse_value(key, value)?,
            "max_buffer_size" => {
                self.max_buffer_size = if value == "none" {
                    None
                } else {
                    Some(parse_value(key, value)?)
                }
            }
            "fetch_size_bytes" => self.fetch_size_bytes = parse_value(key, value)?,
            "auto_commit" => self.auto_commit = parse_value(key, value)?,
            "auto_commit_every_n" => {
                let count: u64 = parse_value(key, value)?;
                self.auto_commit_every_n = if count == 0 { None } else { Some(count) };
            }
            "auto_commit_every_t" => {
                self.auto_commit_every_t = Duration::from_millis(parse_value(key, value)?)
            }
            "auto_offset_reset" => {
                self.auto_offset_reset = value.parse().map_err(|_| {
                    KafkaError::ClientConfig(
                        key.to_owned(),
                        value.to_owned(),
                        "expected smallest or largest".to_owned(),
                    )
                })?
            }
            "consumer_timeout_ms" => {
                self.iter_timeout = Duration::from_millis(parse_value(key, value)?)
            }
            "partitioner_cooldown" => {
                self.partitioner_cooldown = Duration::from_secs(parse_value(key, value)?)
            }
            "client_id" => self.client_id = value.to_owned(),
            _ => {
                return Err(KafkaError::ClientConfig(
                    key.to_owned(),
                    value.to_owned(),
                    "unknown configuration key".to_owned(),
                ))
            }
        }
        Ok(self)
    }

    /// The consumer group id.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// The cluster this config points at.
    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// The broker addresses of the configured cluster.
    pub fn broker_list(&self) -> &[String] {
        self.cluster.broker_list()
    }

    /// The coordination service connection string of the configured cluster.
    pub fn zookeeper(&self) -> &str {
        self.cluster.zookeeper()
    }

    /// The client id used on connections.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The coordination service path under which this group registers its
    /// members.
    pub fn group_path(&self) -> String {
        format!("{}/{}", COORDINATION_BASE_PATH, self.group_id)
    }

    /// Initial fetch buffer size in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Growth ceiling for the fetch buffer; `None` means unbounded.
    pub fn max_buffer_size(&self) -> Option<usize> {
        self.max_buffer_size
    }

    /// Per-request minimum fetch size in bytes.
    pub fn fetch_size_bytes(&self) -> usize {
        self.fetch_size_bytes
    }

    /// Whether offsets are committed automatically.
    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Message-count auto-commit trigger, if enabled.
    pub fn auto_commit_every_n(&self) -> Option<u64> {
        self.auto_commit_every_n
    }

    /// Time-based auto-commit trigger.
    pub fn auto_commit_every_t(&self) -> Duration {
        self.auto_commit_every_t
    }

    /// Reset policy for missing or out-of-range offsets.
    pub fn auto_offset_reset(&self) -> AutoOffsetReset {
        self.auto_offset_reset
    }

    /// Blocking time of one iteration step.
    pub fn iter_timeout(&self) -> Duration {
        self.iter_timeout
    }

    /// Iteration timeout in whole seconds, rounded up.
    pub fn iter_timeout_secs(&self) -> u64 {
        (self.iter_timeout.as_millis() as u64).div_ceil(1000)
    }

    /// Minimum time between two rebalance attempts.
    pub fn partitioner_cooldown(&self) -> Duration {
        self.partitioner_cooldown
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> KafkaResult<T> {
    value.parse().map_err(|_| {
        KafkaError::ClientConfig(
            key.to_owned(),
            value.to_owned(),
            "invalid value".to_owned(),
        )
    })
}
