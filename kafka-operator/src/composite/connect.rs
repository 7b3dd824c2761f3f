use super::{ClusterOperation, CompositeOperation, OperationType};
use crate::adapters::ResourceAdapter;
use crate::model::spec::{ANNOTATION_LAST_APPLIED, LABEL_CLUSTER, LABEL_CLUSTER_TYPE};
use crate::model::{self, diff, names, recover_from_actual, ClusterKey, ClusterSpec, ClusterType};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kafka_operator_common::ReconcileError;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Resource adapters backing a Kafka-Connect cluster's composite operation
/// (`spec.md` §3 table, `kafka-connect`/`kafka-connect-s2i` rows). S2I build
/// orchestration is out of scope (`spec.md` §1 NON-GOALS): both variants
/// share this composite, differing only in the `clusterType` tag carried on
/// labels and the lock key.
pub struct ConnectComposite {
    pub cluster_type: ClusterType,
    pub config_maps: Box<dyn ResourceAdapter<ConfigMap>>,
    pub services: Box<dyn ResourceAdapter<Service>>,
    pub deployments: Box<dyn ResourceAdapter<Deployment>>,
}

fn cluster_labels(name: &str, cluster_type: ClusterType) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CLUSTER.to_string(), name.to_string()),
        (LABEL_CLUSTER_TYPE.to_string(), cluster_type.label_value().to_string()),
    ])
}

#[async_trait]
impl CompositeOperation for ConnectComposite {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<ClusterOperation, ReconcileError> {
        let key = ClusterKey::new(self.cluster_type, namespace, name);

        let desired = match self.config_maps.get(namespace, name).await? {
            Some(cm) if is_cluster_config(&cm, self.cluster_type) => {
                Some(model::decode(&cm).map_err(ReconcileError::from)?)
            }
            _ => None,
        };

        let representative = self
            .deployments
            .get(namespace, &names::connect_deployment(name))
            .await?;
        let current = match &representative {
            Some(deployment) => recover_from_actual(&deployment.metadata)
                .ok()
                .filter(|s| matches!(s, ClusterSpec::Connect(_))),
            None => None,
        };

        let op_type = match (&desired, &current) {
            (Some(_), None) => OperationType::Create,
            (Some(_), Some(_)) => OperationType::Update,
            (None, Some(_)) => OperationType::Delete,
            (None, None) => {
                return Err(ReconcileError::permanent(format!(
                    "no input and no actual state for cluster {name}"
                )))
            }
        };

        let diff = match (&current, &desired) {
            (Some(c), Some(d)) => diff::diff(c, d).map_err(ReconcileError::permanent)?,
            _ => Default::default(),
        };

        Ok(ClusterOperation {
            key,
            op_type,
            desired,
            current,
            diff,
        })
    }

    async fn composite(&self, namespace: &str, op: ClusterOperation) -> Result<(), ReconcileError> {
        match op.op_type {
            OperationType::Create => self.create(namespace, op).await,
            OperationType::Update => self.update(namespace, op).await,
            OperationType::Delete => self.delete(namespace, op).await,
        }
    }
}

fn is_cluster_config(cm: &ConfigMap, cluster_type: ClusterType) -> bool {
    cm.labels()
        .get(crate::model::spec::LABEL_TYPE)
        .map(|t| t == cluster_type.label_value())
        .unwrap_or(false)
}

impl ConnectComposite {
    /// `spec.md` §4.3 "Create (Connect)": Deployment, then Service.
    async fn create(&self, namespace: &str, op: ClusterOperation) -> Result<(), ReconcileError> {
        let spec = desired_connect(&op)?;
        let name = spec.common.name.clone();
        let labels = cluster_labels(&name, self.cluster_type);

        self.apply_deployment(namespace, &spec, &labels).await?;
        self.apply_service(namespace, &name, &labels).await?;
        Ok(())
    }

    /// `spec.md` §4.3 "Update": services, then the deployment (omitted when
    /// only `metricsChanged` — Connect carries no metrics config in its
    /// spec, so this reduces to "omitted when diff is empty").
    async fn update(&self, namespace: &str, op: ClusterOperation) -> Result<(), ReconcileError> {
        let spec = desired_connect(&op)?;
        let name = spec.common.name.clone();
        let labels = cluster_labels(&name, self.cluster_type);

        self.apply_service(namespace, &name, &labels).await?;
        if op.diff.different() {
            self.apply_deployment(namespace, &spec, &labels).await?;
        }
        Ok(())
    }

    /// `spec.md` §4.3 "Delete": reverse of create.
    async fn delete(&self, namespace: &str, op: ClusterOperation) -> Result<(), ReconcileError> {
        let current = match &op.current {
            Some(ClusterSpec::Connect(c)) => c,
            _ => return Err(ReconcileError::permanent("delete with no recoverable connect state")),
        };
        let name = &current.common.name;

        self.services
            .reconcile(namespace, &names::connect_service(name), None, Box::new(|s| s))
            .await?;
        self.deployments
            .reconcile(namespace, &names::connect_deployment(name), None, Box::new(|d| d))
            .await?;
        Ok(())
    }

    async fn apply_deployment(
        &self,
        namespace: &str,
        spec: &model::spec::ConnectClusterSpec,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ReconcileError> {
        let labels = labels.clone();
        let spec = spec.clone();
        self.deployments
            .reconcile(
                namespace,
                &names::connect_deployment(&spec.common.name),
                Some(Deployment::default()),
                Box::new(move |deployment| apply_last_applied(deployment, labels, &ClusterSpec::Connect(spec))),
            )
            .await
    }

    async fn apply_service(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ReconcileError> {
        let labels = labels.clone();
        self.services
            .reconcile(
                namespace,
                &names::connect_service(name),
                Some(Service::default()),
                Box::new(move |mut svc| {
                    svc.metadata.labels = Some(labels);
                    svc
                }),
            )
            .await
    }
}

fn apply_last_applied(
    mut deployment: Deployment,
    labels: BTreeMap<String, String>,
    spec: &ClusterSpec,
) -> Deployment {
    deployment.metadata.labels = Some(labels);
    let mut annotations = deployment.metadata.annotations.clone().unwrap_or_default();
    if let Ok(json) = serde_json::to_string(spec) {
        annotations.insert(ANNOTATION_LAST_APPLIED.to_string(), json);
    }
    deployment.metadata.annotations = Some(annotations);
    deployment
}

fn desired_connect(op: &ClusterOperation) -> Result<model::spec::ConnectClusterSpec, ReconcileError> {
    match &op.desired {
        Some(ClusterSpec::Connect(spec)) => Ok(spec.clone()),
        _ => Err(ReconcileError::permanent("missing connect spec for create/update")),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::spec::CommonSpec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct FakeAdapter<T> {
        objects: Arc<Mutex<HashMap<String, T>>>,
        deletes: Arc<AtomicUsize>,
    }

    impl<T> FakeAdapter<T> {
        fn new() -> Self {
            Self {
                objects: Arc::new(Mutex::new(HashMap::new())),
                deletes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl<T: Clone + Default + Send + Sync + 'static> ResourceAdapter<T> for FakeAdapter<T> {
        async fn get(&self, _namespace: &str, name: &str) -> Result<Option<T>, ReconcileError> {
            Ok(self.objects.lock().unwrap().get(name).cloned())
        }

        async fn list(
            &self,
            _namespace: &str,
            _labels: &BTreeMap<String, String>,
        ) -> Result<Vec<T>, ReconcileError> {
            Ok(self.objects.lock().unwrap().values().cloned().collect())
        }

        async fn delete(&self, _namespace: &str, name: &str) -> Result<(), ReconcileError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.objects.lock().unwrap().remove(name);
            Ok(())
        }

        async fn create_or_patch(
            &self,
            _namespace: &str,
            name: &str,
            modify: Box<dyn FnOnce(T) -> T + Send>,
        ) -> Result<(), ReconcileError> {
            let mut objects = self.objects.lock().unwrap();
            let current = objects.get(name).cloned().unwrap_or_default();
            objects.insert(name.to_string(), modify(current));
            Ok(())
        }
    }

    fn spec() -> model::spec::ConnectClusterSpec {
        model::spec::ConnectClusterSpec {
            common: CommonSpec {
                name: "my-connect".into(),
                namespace: "ns".into(),
                labels: BTreeMap::new(),
                replicas: 1,
                image: "strimzi/kafka-connect:latest".into(),
                healthcheck_initial_delay_seconds: 60,
                healthcheck_timeout_seconds: 5,
            },
            bootstrap_servers: "my-cluster-kafka:9092".into(),
            group_id: "my-connect-cluster".into(),
            key_converter: "org.apache.kafka.connect.json.JsonConverter".into(),
            value_converter: "org.apache.kafka.connect.json.JsonConverter".into(),
            key_converter_schemas_enable: false,
            value_converter_schemas_enable: false,
            config_storage_replication_factor: 3,
            offset_storage_replication_factor: 3,
            status_storage_replication_factor: 3,
        }
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let deployments = FakeAdapter::<Deployment>::new();
        let handle = deployments.clone();
        let composite = ConnectComposite {
            cluster_type: ClusterType::KafkaConnect,
            config_maps: Box::new(FakeAdapter::<ConfigMap>::new()),
            services: Box::new(FakeAdapter::<Service>::new()),
            deployments: Box::new(deployments),
        };

        let delete_op = || ClusterOperation {
            key: ClusterKey::new(ClusterType::KafkaConnect, "ns", "my-connect"),
            op_type: OperationType::Delete,
            desired: None,
            current: Some(ClusterSpec::Connect(spec())),
            diff: Default::default(),
        };

        // P7: running the delete composite twice on the same key succeeds
        // both times.
        composite.composite("ns", delete_op()).await.unwrap();
        composite.composite("ns", delete_op()).await.unwrap();
        assert!(handle.deletes.load(Ordering::SeqCst) >= 2);
    }
}
