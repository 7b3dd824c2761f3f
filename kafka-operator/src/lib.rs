//! Bootstrap for the Kafka/Kafka-Connect cluster operator core
//! (`spec.md` §1–§2). Wires a `kube::Client`, builds one resource adapter
//! per orchestrator resource kind, assembles the per-`clusterType`
//! composite operations, and spawns the event-watch stream, sweep loop,
//! and health server as independent tasks — the same shape as the
//! teacher's `topic-strimzi-operator::run` (`kube::Client`, `Api<T>`
//! construction per kind, `watcher(...).run_stream(...)`,
//! `startup.spawn_iter([...])`), generalized from Drogue's device-registry
//! event source + three resource watches down to one `ConfigMap` watch
//! plus a timer.

pub mod adapters;
pub mod composite;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod model;

use adapters::{K8sAdapter, ResourceAdapter};
use async_trait::async_trait;
use composite::{connect::ConnectComposite, kafka::KafkaComposite, CompositeOperation};
use config::Config;
use engine::{ClusterEvent, ClusterLister, ReconciliationEngine};
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, PersistentVolumeClaim, Service},
};
use kafka_operator_common::{watcher::RunStream, ReconcileError};
use kube::{api::ListParams, Client, ResourceExt};
use model::ClusterType;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;

struct K8sClusterLister {
    config_maps: Box<dyn ResourceAdapter<ConfigMap>>,
    representative_kafka: Option<Box<dyn ResourceAdapter<StatefulSet>>>,
    representative_connect: Option<Box<dyn ResourceAdapter<Deployment>>>,
    configmap_labels: BTreeMap<String, String>,
    cluster_type: ClusterType,
}

#[async_trait]
impl ClusterLister for K8sClusterLister {
    async fn config_names(&self, namespace: &str) -> Result<HashSet<String>, ReconcileError> {
        let mut labels = self.configmap_labels.clone();
        labels.insert(
            model::spec::LABEL_TYPE.to_string(),
            self.cluster_type.label_value().to_string(),
        );
        Ok(self
            .config_maps
            .list(namespace, &labels)
            .await?
            .into_iter()
            .filter_map(|cm| cm.name())
            .collect())
    }

    async fn resource_names(&self, namespace: &str) -> Result<HashSet<String>, ReconcileError> {
        let mut labels = BTreeMap::new();
        labels.insert(
            model::spec::LABEL_CLUSTER_TYPE.to_string(),
            self.cluster_type.label_value().to_string(),
        );
        if let Some(adapter) = &self.representative_kafka {
            return Ok(adapter
                .list(namespace, &labels)
                .await?
                .into_iter()
                .filter_map(|res| res.labels().get(model::spec::LABEL_CLUSTER).cloned())
                .collect());
        }
        if let Some(adapter) = &self.representative_connect {
            return Ok(adapter
                .list(namespace, &labels)
                .await?
                .into_iter()
                .filter_map(|res| res.labels().get(model::spec::LABEL_CLUSTER).cloned())
                .collect());
        }
        Ok(HashSet::new())
    }
}

fn new_config_map(name: &str, namespace: &str) -> ConfigMap {
    let mut cm = ConfigMap::default();
    cm.metadata.name = Some(name.to_string());
    cm.metadata.namespace = Some(namespace.to_string());
    cm
}

fn new_service(name: &str, namespace: &str) -> Service {
    let mut svc = Service::default();
    svc.metadata.name = Some(name.to_string());
    svc.metadata.namespace = Some(namespace.to_string());
    svc
}

fn new_stateful_set(name: &str, namespace: &str) -> StatefulSet {
    let mut sts = StatefulSet::default();
    sts.metadata.name = Some(name.to_string());
    sts.metadata.namespace = Some(namespace.to_string());
    sts
}

fn new_deployment(name: &str, namespace: &str) -> Deployment {
    let mut deployment = Deployment::default();
    deployment.metadata.name = Some(name.to_string());
    deployment.metadata.namespace = Some(namespace.to_string());
    deployment
}

fn new_claim(name: &str, namespace: &str) -> PersistentVolumeClaim {
    let mut claim = PersistentVolumeClaim::default();
    claim.metadata.name = Some(name.to_string());
    claim.metadata.namespace = Some(namespace.to_string());
    claim
}

/// Assemble the engine and every background task it depends on. Returns
/// the engine (for shutdown signalling) and the join handles of the
/// spawned tasks; `run` awaits shutdown and then drains them.
async fn build(client: Client, config: &Config) -> anyhow::Result<(Arc<ReconciliationEngine>, Vec<JoinHandle<()>>)> {
    let namespace = &config.namespace;

    let kafka_composite: Arc<dyn CompositeOperation> = Arc::new(KafkaComposite {
        config_maps: Box::new(K8sAdapter::new(client.clone(), namespace, new_config_map)),
        services: Box::new(K8sAdapter::new(client.clone(), namespace, new_service)),
        stateful_sets: Box::new(K8sAdapter::new(client.clone(), namespace, new_stateful_set)),
        claims: Box::new(K8sAdapter::new(client.clone(), namespace, new_claim)),
    });

    let connect_composite: Arc<dyn CompositeOperation> = Arc::new(ConnectComposite {
        cluster_type: ClusterType::KafkaConnect,
        config_maps: Box::new(K8sAdapter::new(client.clone(), namespace, new_config_map)),
        services: Box::new(K8sAdapter::new(client.clone(), namespace, new_service)),
        deployments: Box::new(K8sAdapter::new(client.clone(), namespace, new_deployment)),
    });

    let connect_s2i_composite: Arc<dyn CompositeOperation> = Arc::new(ConnectComposite {
        cluster_type: ClusterType::KafkaConnectS2I,
        config_maps: Box::new(K8sAdapter::new(client.clone(), namespace, new_config_map)),
        services: Box::new(K8sAdapter::new(client.clone(), namespace, new_service)),
        deployments: Box::new(K8sAdapter::new(client.clone(), namespace, new_deployment)),
    });

    let mut composites: HashMap<ClusterType, Arc<dyn CompositeOperation>> = HashMap::new();
    composites.insert(ClusterType::Kafka, kafka_composite);
    composites.insert(ClusterType::KafkaConnect, connect_composite);
    composites.insert(ClusterType::KafkaConnectS2I, connect_s2i_composite);

    let mut listers: HashMap<ClusterType, Arc<dyn ClusterLister>> = HashMap::new();
    listers.insert(
        ClusterType::Kafka,
        Arc::new(K8sClusterLister {
            config_maps: Box::new(K8sAdapter::new(client.clone(), namespace, new_config_map)),
            representative_kafka: Some(Box::new(K8sAdapter::new(client.clone(), namespace, new_stateful_set))),
            representative_connect: None,
            configmap_labels: config.configmap_labels.clone(),
            cluster_type: ClusterType::Kafka,
        }),
    );
    for cluster_type in [ClusterType::KafkaConnect, ClusterType::KafkaConnectS2I] {
        listers.insert(
            cluster_type,
            Arc::new(K8sClusterLister {
                config_maps: Box::new(K8sAdapter::new(client.clone(), namespace, new_config_map)),
                representative_kafka: None,
                representative_connect: Some(Box::new(K8sAdapter::new(client.clone(), namespace, new_deployment))),
                configmap_labels: config.configmap_labels.clone(),
                cluster_type,
            }),
        );
    }

    let engine = Arc::new(ReconciliationEngine::new(composites, listers));

    let mut handles = vec![];

    // Event trigger: watch label-selected ConfigMaps (spec.md §4.5).
    let watch_engine = engine.clone();
    let watch_namespace = namespace.clone();
    let selector = config
        .configmap_labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    let config_maps_api: kube::Api<ConfigMap> = kube::Api::namespaced(client.clone(), namespace);
    let list_params = ListParams::default().labels(&selector);
    let stream = kube_runtime::watcher(config_maps_api, list_params);
    let runner = stream.run_stream(move |cm: ConfigMap| {
        let engine = watch_engine.clone();
        let namespace = watch_namespace.clone();
        async move { handle_config_map_event(&engine, &namespace, cm) }
    });
    handles.push(tokio::spawn(async move {
        // Keep the runner alive for the task's lifetime; it owns its
        // internal JoinHandle and will be dropped (and cancelled) with it.
        let _runner = runner;
        std::future::pending::<()>().await;
    }));

    // Periodic sweep.
    let sweep_engine = engine.clone();
    let sweep_namespace = namespace.clone();
    let interval = config.full_reconciliation_interval;
    handles.push(tokio::spawn(async move {
        sweep_engine.run_sweep_loop(sweep_namespace, interval).await;
    }));

    // Health surface.
    let health_engine = engine.clone();
    let health_config = config.health.clone();
    let health_interval = config.full_reconciliation_interval;
    handles.push(tokio::spawn(async move {
        if let Err(err) = health::run(health_config, health_engine, health_interval).await {
            tracing::error!(error = %err, "health server exited with error");
        }
    }));

    Ok((engine, handles))
}

/// `spec.md` §4.5 "A single event is classified and dispatched immediately
/// (non-blocking; lock is asynchronous)": this runs synchronously on the
/// watch stream's poll loop, so it must never itself await a reconcile —
/// `ReconciliationEngine::dispatch` only spawns the work and returns.
fn handle_config_map_event(
    engine: &Arc<ReconciliationEngine>,
    namespace: &str,
    cm: ConfigMap,
) -> Result<(), ()> {
    let Some(name) = cm.name() else { return Ok(()) };
    let Some(type_label) = cm.labels().get(model::spec::LABEL_TYPE) else {
        return Ok(());
    };
    let Some(cluster_type) = ClusterType::from_label(type_label) else {
        return Ok(());
    };

    engine.dispatch(ClusterEvent {
        cluster_type,
        namespace: namespace.to_string(),
        name,
    });
    Ok(())
}

/// Entry point called from `main`. Runs until `ctrl_c` (or another
/// shutdown signal the caller wires up), draining in-flight operations
/// before returning (`spec.md` §5 "Shutdown").
pub async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(?config, "starting kafka operator");

    let client = Client::try_default().await?;
    let (engine, handles) = build(client, &config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining in-flight operations");
    engine.begin_shutdown();

    for handle in handles {
        handle.abort();
    }

    Ok(())
}
