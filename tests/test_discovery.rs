//! Topology resolution and cluster configuration semantics.

use std::collections::HashSet;

use maplit::hashmap;

use kafka_flock::config::ClusterConfig;
use kafka_flock::discovery::{ClusterData, LocalConfig, StaticTopology, TopologyData, TopologyResolver};
use kafka_flock::error::KafkaError;

mod utils;
use utils::*;

fn cluster_data(brokers: &[&str], zookeeper: &str) -> ClusterData {
    ClusterData {
        broker_list: brokers.iter().map(|b| (*b).to_owned()).collect(),
        zookeeper: zookeeper.to_owned(),
    }
}

fn sample_topology() -> StaticTopology {
    let mut topology = StaticTopology::new();
    topology.insert(
        "standard",
        TopologyData {
            clusters: hashmap! {
                "uswest1".to_owned() => cluster_data(&["w1:9092", "w2:9092"], "zkw1:2181,zkw2:2181"),
                "useast1".to_owned() => cluster_data(&["e1:9092"], "zke1:2181"),
            },
            local_config: Some(LocalConfig {
                cluster: "uswest1".to_owned(),
            }),
        },
    );
    topology.insert(
        "scribe",
        TopologyData {
            clusters: hashmap! {
                "uswest1".to_owned() => cluster_data(&["s1:9092"], "zks1:2181"),
            },
            local_config: None,
        },
    );
    topology
}

// Resolving by explicit name returns the declared connection data.
#[test]
fn test_resolve_named_cluster() {
    init_logger();
    let topology = sample_topology();
    let cluster = topology.resolve("standard", Some("useast1")).unwrap();
    assert_eq!(cluster.cluster_type(), "standard");
    assert_eq!(cluster.name(), "useast1");
    assert_eq!(cluster.broker_list(), ["e1:9092".to_owned()]);
    assert_eq!(cluster.zookeeper(), "zke1:2181");
}

// With no name the declared local cluster is used.
#[test]
fn test_resolve_local_cluster() {
    init_logger();
    let topology = sample_topology();
    let cluster = topology.resolve("standard", None).unwrap();
    assert_eq!(cluster.name(), "uswest1");
}

// A cluster type without a local declaration cannot resolve implicitly.
#[test]
fn test_resolve_missing_local() {
    init_logger();
    let topology = sample_topology();
    match topology.resolve("scribe", None) {
        Err(KafkaError::Discovery(_)) => {}
        other => panic!("expected a discovery error, got {:?}", other),
    }
}

// Unknown cluster types and names are discovery errors.
#[test]
fn test_resolve_unknown() {
    init_logger();
    let topology = sample_topology();
    assert!(matches!(
        topology.resolve("spark", Some("uswest1")),
        Err(KafkaError::Discovery(_))
    ));
    assert!(matches!(
        topology.resolve("standard", Some("euwest1")),
        Err(KafkaError::Discovery(_))
    ));
}

// Listing returns every cluster of a type, sorted by name.
#[test]
fn test_list_clusters() {
    init_logger();
    let topology = sample_topology();
    let clusters = topology.list_clusters("standard").unwrap();
    let names: Vec<&str> = clusters.iter().map(|c| c.name()).collect();
    assert_eq!(names, ["useast1", "uswest1"]);
}

// Topology data deserializes from its JSON representation, with the local
// declaration optional.
#[test]
fn test_topology_from_json() {
    init_logger();
    let data: TopologyData = serde_json::from_str(
        r#"{
            "clusters": {
                "uswest1": {
                    "broker_list": ["w1:9092", "w2:9092"],
                    "zookeeper": "zkw1:2181,zkw2:2181"
                }
            },
            "local_config": {"cluster": "uswest1"}
        }"#,
    )
    .unwrap();
    let mut topology = StaticTopology::new();
    topology.insert("standard", data);
    let cluster = topology.resolve("standard", None).unwrap();
    assert_eq!(cluster.name(), "uswest1");
    assert_eq!(cluster.broker_list().len(), 2);

    let bare: TopologyData = serde_json::from_str(
        r#"{"clusters": {"c": {"broker_list": ["b:9092"], "zookeeper": "z:2181"}}}"#,
    )
    .unwrap();
    assert!(bare.local_config.is_none());
}

// Two resolutions of the same cluster collapse in a set even when the broker
// and coordination host lists were declared in different orders.
#[test]
fn test_cluster_config_deduplication() {
    init_logger();
    let a = ClusterConfig::new(
        "standard",
        "uswest1",
        &["w1:9092", "w2:9092"],
        "zkw1:2181,zkw2:2181",
    );
    let b = ClusterConfig::new(
        "standard",
        "uswest1",
        &["w2:9092", "w1:9092"],
        "zkw2:2181,zkw1:2181",
    );
    assert_eq!(a, b);

    let mut set = HashSet::new();
    set.insert(a);
    set.insert(b);
    set.insert(test_cluster_config());
    assert_eq!(set.len(), 2);
}
