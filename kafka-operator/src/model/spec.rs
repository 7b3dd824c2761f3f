use super::storage::StorageSpec;
use crate::error::DecodeError;
use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

/// Label the operator watches to discriminate input `ConfigMap`s
/// (`spec.md` §6, default `{kind=cluster}`).
pub const LABEL_KIND: &str = "kind";
pub const LABEL_KIND_VALUE: &str = "cluster";
/// Discriminates the config object by cluster type (`spec.md` §6).
pub const LABEL_TYPE: &str = "type";
/// I1: every engine-owned resource carries `clusterLabel = name`.
pub const LABEL_CLUSTER: &str = "clusterLabel";
/// I1: every engine-owned resource carries `clusterType = kafka|kafka-connect|kafka-connect-s2i`.
pub const LABEL_CLUSTER_TYPE: &str = "clusterType";
/// Annotation a representative resource carries holding the last applied
/// `ClusterSpec`, used by [`super::diff::recover_from_actual`] (`spec.md`
/// §4.2 "Recover from actual").
pub const ANNOTATION_LAST_APPLIED: &str = "kafka-operator.stackable.io/last-applied-spec";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterType {
    Kafka,
    KafkaConnect,
    #[serde(rename = "kafka-connect-s2i")]
    KafkaConnectS2I,
}

impl ClusterType {
    pub fn label_value(&self) -> &'static str {
        match self {
            Self::Kafka => "kafka",
            Self::KafkaConnect => "kafka-connect",
            Self::KafkaConnectS2I => "kafka-connect-s2i",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "kafka" => Some(Self::Kafka),
            "kafka-connect" => Some(Self::KafkaConnect),
            "kafka-connect-s2i" => Some(Self::KafkaConnectS2I),
            _ => None,
        }
    }

    /// Whether this cluster type's representative resource is a Deployment
    /// (Connect variants) rather than a Kafka stateful set.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::KafkaConnect | Self::KafkaConnectS2I)
    }
}

impl Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_value())
    }
}

/// `(clusterType, namespace, name)` — the serializer key and primary
/// identity throughout (`spec.md` §3).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterKey {
    pub cluster_type: ClusterType,
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(cluster_type: ClusterType, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cluster_type,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `spec.md` §4.5 step 1: `"lock::"+clusterType+"::"+namespace+"::"+name`.
    pub fn lock_name(&self) -> String {
        format!("lock::{}::{}::{}", self.cluster_type, self.namespace, self.name)
    }
}

impl Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lock_name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommonSpec {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub replicas: u32,
    pub image: String,
    pub healthcheck_initial_delay_seconds: u32,
    pub healthcheck_timeout_seconds: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig(pub serde_json::Value);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KafkaClusterSpec {
    pub common: CommonSpec,
    pub zookeeper_replicas: u32,
    pub zookeeper_image: String,
    pub zookeeper_healthcheck_initial_delay_seconds: u32,
    pub zookeeper_healthcheck_timeout_seconds: u32,
    pub kafka_storage: StorageSpec,
    pub zookeeper_storage: StorageSpec,
    pub kafka_metrics_config: Option<MetricsConfig>,
    pub zookeeper_metrics_config: Option<MetricsConfig>,
    pub default_replication_factor: u32,
    pub offsets_topic_replication_factor: u32,
    pub transaction_state_log_replication_factor: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectClusterSpec {
    pub common: CommonSpec,
    pub bootstrap_servers: String,
    pub group_id: String,
    pub key_converter: String,
    pub value_converter: String,
    pub key_converter_schemas_enable: bool,
    pub value_converter_schemas_enable: bool,
    pub config_storage_replication_factor: u32,
    pub offset_storage_replication_factor: u32,
    pub status_storage_replication_factor: u32,
}

/// Polymorphic over `clusterType`; `Connect` is shared by `kafka-connect`
/// and `kafka-connect-s2i` (SPEC_FULL.md §3 "KafkaConnectBuild variant") —
/// the two differ only in the `clusterType` tag carried on the key and on
/// resource labels, S2I build orchestration being out of scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ClusterSpec {
    Kafka(KafkaClusterSpec),
    Connect(ConnectClusterSpec),
}

impl ClusterSpec {
    pub fn common(&self) -> &CommonSpec {
        match self {
            Self::Kafka(s) => &s.common,
            Self::Connect(s) => &s.common,
        }
    }
}

fn get_string(data: &BTreeMap<String, String>, key: &str, default: &str) -> String {
    data.get(key).cloned().unwrap_or_else(|| default.to_string())
}

fn get_u32(data: &BTreeMap<String, String>, key: &str, default: u32) -> Result<u32, DecodeError> {
    match data.get(key) {
        Some(raw) => raw.parse().map_err(|_| DecodeError::InvalidField(key.to_string())),
        None => Ok(default),
    }
}

fn get_bool(data: &BTreeMap<String, String>, key: &str, default: bool) -> Result<bool, DecodeError> {
    match data.get(key) {
        Some(raw) => raw.parse().map_err(|_| DecodeError::InvalidField(key.to_string())),
        None => Ok(default),
    }
}

fn get_required_json<T: serde::de::DeserializeOwned>(
    data: &BTreeMap<String, String>,
    key: &str,
) -> Result<T, DecodeError> {
    let raw = data
        .get(key)
        .ok_or_else(|| DecodeError::MissingField(key.to_string()))?;
    serde_json::from_str(raw).map_err(|e| DecodeError::InvalidJson(key.to_string(), e.to_string()))
}

fn get_optional_json<T: serde::de::DeserializeOwned>(
    data: &BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, DecodeError> {
    match data.get(key) {
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| DecodeError::InvalidJson(key.to_string(), e.to_string())),
        None => Ok(None),
    }
}

/// `spec.md` §4.2 "Decode": parse an input `ConfigMap`'s `data` map into a
/// `ClusterSpec` variant selected by the `type` label, applying the default
/// table from §6. Missing required fields fail decode (P4: decode is pure,
/// so repeated decodes of the same input yield equal specs).
pub fn decode(config_map: &ConfigMap) -> Result<ClusterSpec, DecodeError> {
    let name = config_map
        .metadata
        .name
        .clone()
        .ok_or_else(|| DecodeError::MissingField("metadata.name".into()))?;
    let namespace = config_map
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| DecodeError::MissingField("metadata.namespace".into()))?;
    let labels = config_map.metadata.labels.clone().unwrap_or_default();
    let cluster_type_label = labels
        .get(LABEL_TYPE)
        .ok_or_else(|| DecodeError::MissingField(LABEL_TYPE.into()))?;
    let cluster_type = ClusterType::from_label(cluster_type_label)
        .ok_or_else(|| DecodeError::UnknownClusterType(cluster_type_label.clone()))?;
    let data = config_map.data.clone().unwrap_or_default();

    match cluster_type {
        ClusterType::Kafka => decode_kafka(name, namespace, labels, &data).map(ClusterSpec::Kafka),
        ClusterType::KafkaConnect | ClusterType::KafkaConnectS2I => {
            decode_connect(name, namespace, labels, &data).map(ClusterSpec::Connect)
        }
    }
}

fn decode_kafka(
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    data: &BTreeMap<String, String>,
) -> Result<KafkaClusterSpec, DecodeError> {
    Ok(KafkaClusterSpec {
        common: CommonSpec {
            name,
            namespace,
            labels,
            replicas: get_u32(data, "kafka-nodes", 3)?,
            image: get_string(data, "kafka-image", "strimzi/kafka:latest"),
            healthcheck_initial_delay_seconds: get_u32(data, "kafka-healthcheck-delay", 15)?,
            healthcheck_timeout_seconds: get_u32(data, "kafka-healthcheck-timeout", 5)?,
        },
        zookeeper_replicas: get_u32(data, "zookeeper-nodes", 3)?,
        zookeeper_image: get_string(data, "zookeeper-image", "strimzi/zookeeper:latest"),
        zookeeper_healthcheck_initial_delay_seconds: get_u32(data, "zookeeper-healthcheck-delay", 15)?,
        zookeeper_healthcheck_timeout_seconds: get_u32(data, "zookeeper-healthcheck-timeout", 5)?,
        kafka_storage: get_required_json(data, "kafka-storage")?,
        zookeeper_storage: get_required_json(data, "zookeeper-storage")?,
        kafka_metrics_config: get_optional_json(data, "kafka-metrics-config")?,
        zookeeper_metrics_config: get_optional_json(data, "zookeeper-metrics-config")?,
        default_replication_factor: get_u32(data, "KAFKA_DEFAULT_REPLICATION_FACTOR", 3)?,
        offsets_topic_replication_factor: get_u32(data, "KAFKA_OFFSETS_TOPIC_REPLICATION_FACTOR", 3)?,
        transaction_state_log_replication_factor: get_u32(
            data,
            "KAFKA_TRANSACTION_STATE_LOG_REPLICATION_FACTOR",
            3,
        )?,
    })
}

fn decode_connect(
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    data: &BTreeMap<String, String>,
) -> Result<ConnectClusterSpec, DecodeError> {
    Ok(ConnectClusterSpec {
        common: CommonSpec {
            name,
            namespace,
            labels,
            replicas: get_u32(data, "nodes", 1)?,
            image: get_string(data, "image", "strimzi/kafka-connect:latest"),
            healthcheck_initial_delay_seconds: get_u32(data, "healthcheck-delay", 60)?,
            healthcheck_timeout_seconds: get_u32(data, "healthcheck-timeout", 5)?,
        },
        bootstrap_servers: get_string(
            data,
            "KAFKA_CONNECT_BOOTSTRAP_SERVERS",
            "my-cluster-kafka:9092",
        ),
        group_id: get_string(data, "KAFKA_CONNECT_GROUP_ID", "my-connect-cluster"),
        key_converter: get_string(
            data,
            "KAFKA_CONNECT_KEY_CONVERTER",
            "org.apache.kafka.connect.json.JsonConverter",
        ),
        value_converter: get_string(
            data,
            "KAFKA_CONNECT_VALUE_CONVERTER",
            "org.apache.kafka.connect.json.JsonConverter",
        ),
        key_converter_schemas_enable: get_bool(data, "KAFKA_CONNECT_KEY_CONVERTER_SCHEMAS_ENABLE", false)?,
        value_converter_schemas_enable: get_bool(
            data,
            "KAFKA_CONNECT_VALUE_CONVERTER_SCHEMAS_ENABLE",
            false,
        )?,
        config_storage_replication_factor: get_u32(
            data,
            "KAFKA_CONNECT_CONFIG_STORAGE_REPLICATION_FACTOR",
            3,
        )?,
        offset_storage_replication_factor: get_u32(
            data,
            "KAFKA_CONNECT_OFFSET_STORAGE_REPLICATION_FACTOR",
            3,
        )?,
        status_storage_replication_factor: get_u32(
            data,
            "KAFKA_CONNECT_STATUS_STORAGE_REPLICATION_FACTOR",
            3,
        )?,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn config_map(data: &[(&str, &str)]) -> ConfigMap {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some("my-cluster".into());
        cm.metadata.namespace = Some("ns".into());
        cm.metadata.labels = Some(BTreeMap::from([
            (LABEL_KIND.to_string(), LABEL_KIND_VALUE.to_string()),
            (LABEL_TYPE.to_string(), "kafka".to_string()),
        ]));
        cm.data = Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        cm
    }

    #[test]
    fn decodes_kafka_with_defaults() {
        let cm = config_map(&[
            ("kafka-storage", r#"{"type":"ephemeral"}"#),
            ("zookeeper-storage", r#"{"type":"ephemeral"}"#),
        ]);
        let spec = decode(&cm).unwrap();
        match spec {
            ClusterSpec::Kafka(k) => {
                assert_eq!(k.common.replicas, 3);
                assert_eq!(k.common.image, "strimzi/kafka:latest");
                assert_eq!(k.zookeeper_replicas, 3);
                assert_eq!(k.default_replication_factor, 3);
            }
            _ => panic!("expected kafka"),
        }
    }

    #[test]
    fn missing_storage_fails_decode() {
        let cm = config_map(&[]);
        let err = decode(&cm).unwrap_err();
        assert_eq!(err, DecodeError::MissingField("kafka-storage".into()));
    }

    #[test]
    fn decode_is_pure() {
        let cm = config_map(&[
            ("kafka-nodes", "5"),
            ("kafka-storage", r#"{"type":"ephemeral"}"#),
            ("zookeeper-storage", r#"{"type":"ephemeral"}"#),
        ]);
        assert_eq!(decode(&cm).unwrap(), decode(&cm).unwrap());
    }
}
