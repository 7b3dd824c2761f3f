//! Deterministic resource name templates (`spec.md` §3 table). Every
//! engine-owned resource's name is a pure function of the cluster name, so
//! the differ and composite operations never need to round-trip a
//! generated name through storage.

pub fn kafka_stateful_set(cluster: &str) -> String {
    format!("{cluster}-kafka")
}

pub fn zookeeper_stateful_set(cluster: &str) -> String {
    format!("{cluster}-zookeeper")
}

pub fn kafka_headless_service(cluster: &str) -> String {
    format!("{cluster}-kafka-headless")
}

pub fn zookeeper_headless_service(cluster: &str) -> String {
    format!("{cluster}-zookeeper-headless")
}

pub fn kafka_client_service(cluster: &str) -> String {
    format!("{cluster}-kafka")
}

pub fn zookeeper_client_service(cluster: &str) -> String {
    format!("{cluster}-zookeeper")
}

pub fn kafka_metrics_config(cluster: &str) -> String {
    format!("{cluster}-kafka-metrics-config")
}

pub fn zookeeper_metrics_config(cluster: &str) -> String {
    format!("{cluster}-zookeeper-metrics-config")
}

pub fn connect_deployment(cluster: &str) -> String {
    format!("{cluster}-connect")
}

pub fn connect_service(cluster: &str) -> String {
    format!("{cluster}-connect")
}

pub fn kafka_claim(cluster: &str, broker: u32) -> String {
    format!("kafka-storage-{cluster}-kafka-{broker}")
}

pub fn zookeeper_claim(cluster: &str, node: u32) -> String {
    format!("zookeeper-storage-{cluster}-zookeeper-{node}")
}

/// All claim names implied by a Kafka cluster's current broker/zk replica
/// counts (`spec.md` I3: "claim count equals replica count at steady
/// state"). Used to compute which claims to delete on scale-down.
pub fn kafka_claims(cluster: &str, kafka_replicas: u32) -> Vec<String> {
    (0..kafka_replicas).map(|i| kafka_claim(cluster, i)).collect()
}

pub fn zookeeper_claims(cluster: &str, zookeeper_replicas: u32) -> Vec<String> {
    (0..zookeeper_replicas)
        .map(|i| zookeeper_claim(cluster, i))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn templates_match_table() {
        assert_eq!(kafka_stateful_set("my-cluster"), "my-cluster-kafka");
        assert_eq!(zookeeper_stateful_set("my-cluster"), "my-cluster-zookeeper");
        assert_eq!(
            kafka_headless_service("my-cluster"),
            "my-cluster-kafka-headless"
        );
        assert_eq!(kafka_client_service("my-cluster"), "my-cluster-kafka");
        assert_eq!(
            kafka_metrics_config("my-cluster"),
            "my-cluster-kafka-metrics-config"
        );
        assert_eq!(connect_deployment("my-cluster"), "my-cluster-connect");
        assert_eq!(kafka_claim("my-cluster", 2), "kafka-storage-my-cluster-kafka-2");
        assert_eq!(
            zookeeper_claim("my-cluster", 1),
            "zookeeper-storage-my-cluster-zookeeper-1"
        );
    }

    #[test]
    fn claim_lists_track_replica_count() {
        assert_eq!(
            kafka_claims("c", 3),
            vec![
                "kafka-storage-c-kafka-0",
                "kafka-storage-c-kafka-1",
                "kafka-storage-c-kafka-2",
            ]
        );
    }
}
