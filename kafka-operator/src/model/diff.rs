//! `spec.md` §4.2 "Diff" and "Recover from actual".

use super::spec::{ClusterSpec, ConnectClusterSpec, KafkaClusterSpec, ANNOTATION_LAST_APPLIED};
use crate::error::DecodeError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClusterDiff {
    pub scale_up: bool,
    pub scale_down: bool,
    pub rolling_update: bool,
    pub metrics_changed: bool,
}

impl ClusterDiff {
    /// P5: `diff(x, x) = ∅`.
    pub fn is_empty(&self) -> bool {
        !self.scale_up && !self.scale_down && !self.rolling_update && !self.metrics_changed
    }

    /// `different` in `spec.md` §3: any change at all.
    pub fn different(&self) -> bool {
        !self.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// I4 / P6: storage type changed after creation.
    #[error("illegal storage transition for cluster: storage.type is immutable once created")]
    IllegalStorageTransition,
}

/// `diff(current, desired) -> ClusterDiff`, dispatching on the spec variant.
/// Storage-type changes (I4) short-circuit with [`DiffError`] before any
/// other field is compared.
pub fn diff(current: &ClusterSpec, desired: &ClusterSpec) -> Result<ClusterDiff, DiffError> {
    match (current, desired) {
        (ClusterSpec::Kafka(c), ClusterSpec::Kafka(d)) => diff_kafka(c, d),
        (ClusterSpec::Connect(c), ClusterSpec::Connect(d)) => diff_connect(c, d),
        // A clusterType label cannot change under a stable ClusterKey: the
        // engine would have classified this as delete-then-create instead.
        _ => Ok(ClusterDiff {
            rolling_update: true,
            ..Default::default()
        }),
    }
}

/// Fields that affect the pod template and therefore force a rolling
/// update if they differ (`spec.md` §9 open question, resolved explicitly
/// here rather than left implicit): container image, replica-affecting
/// health probe timings, and broker configuration keys baked into the
/// pod's env/config mount. `replicas` alone drives scale flags, not a
/// rolling update. Storage `class`/`size`/`selector` are not pod-template
/// fields and are deliberately excluded — only `StorageSpec.kind()` (I4)
/// is checked, earlier, as a hard rejection.
fn diff_kafka(current: &KafkaClusterSpec, desired: &KafkaClusterSpec) -> Result<ClusterDiff, DiffError> {
    if current.kafka_storage.kind() != desired.kafka_storage.kind()
        || current.zookeeper_storage.kind() != desired.zookeeper_storage.kind()
    {
        return Err(DiffError::IllegalStorageTransition);
    }

    let mut diff = ClusterDiff::default();

    if desired.common.replicas > current.common.replicas {
        diff.scale_up = true;
    } else if desired.common.replicas < current.common.replicas {
        diff.scale_down = true;
    }

    let pod_template_changed = current.common.image != desired.common.image
        || current.common.healthcheck_initial_delay_seconds
            != desired.common.healthcheck_initial_delay_seconds
        || current.common.healthcheck_timeout_seconds != desired.common.healthcheck_timeout_seconds
        || current.zookeeper_replicas != desired.zookeeper_replicas
        || current.zookeeper_image != desired.zookeeper_image
        || current.zookeeper_healthcheck_initial_delay_seconds
            != desired.zookeeper_healthcheck_initial_delay_seconds
        || current.zookeeper_healthcheck_timeout_seconds != desired.zookeeper_healthcheck_timeout_seconds
        || current.default_replication_factor != desired.default_replication_factor
        || current.offsets_topic_replication_factor != desired.offsets_topic_replication_factor
        || current.transaction_state_log_replication_factor
            != desired.transaction_state_log_replication_factor;

    if pod_template_changed {
        diff.rolling_update = true;
    }

    if current.kafka_metrics_config != desired.kafka_metrics_config
        || current.zookeeper_metrics_config != desired.zookeeper_metrics_config
    {
        diff.metrics_changed = true;
    }

    Ok(diff)
}

fn diff_connect(
    current: &ConnectClusterSpec,
    desired: &ConnectClusterSpec,
) -> Result<ClusterDiff, DiffError> {
    let mut diff = ClusterDiff::default();

    if desired.common.replicas > current.common.replicas {
        diff.scale_up = true;
    } else if desired.common.replicas < current.common.replicas {
        diff.scale_down = true;
    }

    let pod_template_changed = current.common.image != desired.common.image
        || current.common.healthcheck_initial_delay_seconds
            != desired.common.healthcheck_initial_delay_seconds
        || current.common.healthcheck_timeout_seconds != desired.common.healthcheck_timeout_seconds
        || current.bootstrap_servers != desired.bootstrap_servers
        || current.group_id != desired.group_id
        || current.key_converter != desired.key_converter
        || current.value_converter != desired.value_converter
        || current.key_converter_schemas_enable != desired.key_converter_schemas_enable
        || current.value_converter_schemas_enable != desired.value_converter_schemas_enable
        || current.config_storage_replication_factor != desired.config_storage_replication_factor
        || current.offset_storage_replication_factor != desired.offset_storage_replication_factor
        || current.status_storage_replication_factor != desired.status_storage_replication_factor;

    if pod_template_changed {
        diff.rolling_update = true;
    }

    Ok(diff)
}

/// Reconstruct the last-applied `ClusterSpec` from a representative
/// resource's metadata (`spec.md` §4.2 "Recover from actual"). We store the
/// full JSON-encoded spec under [`ANNOTATION_LAST_APPLIED`] on that
/// resource at the end of every successful composite apply — the same
/// "last applied configuration" idiom the orchestrator's own CLI tooling
/// uses, and one `spec.md` explicitly allows ("reconstruct... from
/// labels/annotations/spec fields").
pub fn recover_from_actual(meta: &ObjectMeta) -> Result<ClusterSpec, DecodeError> {
    let annotations = meta.annotations.as_ref();
    let raw = annotations
        .and_then(|a| a.get(ANNOTATION_LAST_APPLIED))
        .ok_or_else(|| DecodeError::MissingField(ANNOTATION_LAST_APPLIED.to_string()))?;
    serde_json::from_str(raw)
        .map_err(|e| DecodeError::InvalidJson(ANNOTATION_LAST_APPLIED.to_string(), e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::storage::StorageSpec;
    use crate::model::spec::CommonSpec;
    use std::collections::BTreeMap;

    fn base() -> KafkaClusterSpec {
        KafkaClusterSpec {
            common: CommonSpec {
                name: "my-cluster".into(),
                namespace: "ns".into(),
                labels: BTreeMap::new(),
                replicas: 3,
                image: "strimzi/kafka:latest".into(),
                healthcheck_initial_delay_seconds: 15,
                healthcheck_timeout_seconds: 5,
            },
            zookeeper_replicas: 3,
            zookeeper_image: "strimzi/zookeeper:latest".into(),
            zookeeper_healthcheck_initial_delay_seconds: 15,
            zookeeper_healthcheck_timeout_seconds: 5,
            kafka_storage: StorageSpec::Ephemeral,
            zookeeper_storage: StorageSpec::Ephemeral,
            kafka_metrics_config: None,
            zookeeper_metrics_config: None,
            default_replication_factor: 3,
            offsets_topic_replication_factor: 3,
            transaction_state_log_replication_factor: 3,
        }
    }

    #[test]
    fn identical_specs_diff_empty() {
        let a = ClusterSpec::Kafka(base());
        assert!(diff(&a, &a).unwrap().is_empty());
    }

    #[test]
    fn scale_up_sets_flag_only() {
        let current = base();
        let mut desired = base();
        desired.common.replicas = 5;
        let d = diff_kafka(&current, &desired).unwrap();
        assert!(d.scale_up);
        assert!(!d.scale_down);
        assert!(!d.rolling_update);
    }

    #[test]
    fn scale_down_sets_flag() {
        let current = base();
        let mut desired = base();
        desired.common.replicas = 1;
        let d = diff_kafka(&current, &desired).unwrap();
        assert!(d.scale_down);
        assert!(!d.scale_up);
    }

    #[test]
    fn image_change_forces_rolling_update() {
        let current = base();
        let mut desired = base();
        desired.common.image = "strimzi/kafka:2.8".into();
        let d = diff_kafka(&current, &desired).unwrap();
        assert!(d.rolling_update);
        assert!(!d.scale_up && !d.scale_down);
    }

    #[test]
    fn metrics_only_change_does_not_roll() {
        let current = base();
        let mut desired = base();
        desired.kafka_metrics_config =
            Some(crate::model::spec::MetricsConfig(serde_json::json!({"lowercaseOutputName": true})));
        let d = diff_kafka(&current, &desired).unwrap();
        assert!(d.metrics_changed);
        assert!(!d.rolling_update);
        assert!(!d.scale_up && !d.scale_down);
    }

    #[test]
    fn storage_type_change_is_illegal() {
        let current = base();
        let mut desired = base();
        desired.kafka_storage = StorageSpec::PersistentClaim {
            size: "10Gi".into(),
            class: None,
            selector: None,
            delete_claim: false,
        };
        let err = diff_kafka(&current, &desired).unwrap_err();
        assert!(matches!(err, DiffError::IllegalStorageTransition));
    }
}
