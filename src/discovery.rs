//! Cluster topology discovery.
//!
//! A topology describes the clusters of one cluster type across regions:
//! their broker lists, coordination connection strings, and which cluster is
//! local to the current execution context. Reading topology files from disk
//! is out of scope; [`TopologyData`] is accepted already deserialized.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::ClusterConfig;
use crate::error::{KafkaError, KafkaResult};

/// Connection data of one named cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterData {
    /// Broker addresses of the cluster.
    pub broker_list: Vec<String>,
    /// Coordination service connection string.
    pub zookeeper: String,
}

/// Which of the declared clusters is local to this execution context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Name of the local cluster.
    pub cluster: String,
}

/// Declared topology for one cluster type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TopologyData {
    /// All clusters of this type, keyed by name.
    pub clusters: HashMap<String, ClusterData>,
    /// Local cluster selection, if one applies to this context.
    #[serde(default)]
    pub local_config: Option<LocalConfig>,
}

/// Resolves named clusters from static topology data.
pub trait TopologyResolver {
    /// Resolves a cluster by type and name; with no name, resolves the
    /// cluster local to the current execution context.
    fn resolve(&self, cluster_type: &str, name: Option<&str>) -> KafkaResult<ClusterConfig>;

    /// Lists all distinct clusters of a type, sorted by name.
    fn list_clusters(&self, cluster_type: &str) -> KafkaResult<Vec<ClusterConfig>>;
}

/// A resolver over in-memory topology data.
#[derive(Default)]
pub struct StaticTopology {
    topologies: HashMap<String, TopologyData>,
}

impl StaticTopology {
    /// Creates an empty topology.
    pub fn new() -> StaticTopology {
        StaticTopology {
            topologies: HashMap::new(),
        }
    }

    /// Declares the topology for a cluster type, replacing any previous one.
    pub fn insert(&mut self, cluster_type: &str, data: TopologyData) -> &mut StaticTopology {
        self.topologies.insert(cluster_type.to_owned(), data);
        self
    }

    fn topology(&self, cluster_type: &str) -> KafkaResult<&TopologyData> {
        self.topologies.get(cluster_type).ok_or_else(|| {
            KafkaError::Discovery(format!("no topology for cluster type {}", cluster_type))
        })
    }

    fn cluster(&self, cluster_type: &str, data: &TopologyData, name: &str) -> KafkaResult<ClusterConfig> {
        let cluster = data.clusters.get(name).ok_or_else(|| {
            KafkaError::Discovery(format!(
                "no cluster named {} for cluster type {}",
                name, cluster_type
            ))
        })?;
        Ok(ClusterConfig::new(
            cluster_type,
            name,
            &cluster.broker_list.iter().map(|b| b.as_str()).collect::<Vec<_>>(),
            &cluster.zookeeper,
        ))
    }
}

impl TopologyResolver for StaticTopology {
    fn resolve(&self, cluster_type: &str, name: Option<&str>) -> KafkaResult<ClusterConfig> {
        let data = self.topology(cluster_type)?;
        match name {
            Some(name) => self.cluster(cluster_type, data, name),
            None => {
                let local = data.local_config.as_ref().ok_or_else(|| {
                    KafkaError::Discovery(format!(
                        "no local cluster declared for cluster type {}",
                        cluster_type
                    ))
                })?;
                self.cluster(cluster_type, data, &local.cluster)
            }
        }
    }

    fn list_clusters(&self, cluster_type: &str) -> KafkaResult<Vec<ClusterConfig>> {
        let data = self.topology(cluster_type)?;
        let mut clusters = Vec::new();
        for name in data.clusters.keys() {
            let cluster = self.cluster(cluster_type, data, name)?;
            // ClusterConfig equality is set based, so duplicate declarations
            // of the same cluster collapse here.
            if !clusters.contains(&cluster) {
                clusters.push(cluster);
            }
        }
        clusters.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(clusters)
    }
}
