//! Composite Operation (`spec.md` §4.3, §2 item 3, §9 "Template-method
//! inheritance... becomes a `CompositeOperation` capability").
//!
//! One implementation per `clusterType`: [`kafka::KafkaComposite`] and
//! [`connect::ConnectComposite`]. Each runs an ordered sequence of
//! per-resource adapter calls straight through to a single fail-fast
//! result, matching the teacher's
//! `ApplicationReconciler::construct`/`deconstruct` pair built from a
//! `Progressor` step list (`topic-strimzi-operator::controller::app::mod`),
//! generalized away from finalizers and status `Conditions` — this engine's
//! input has no status subresource to carry them.

pub mod connect;
pub mod kafka;

use crate::model::{ClusterDiff, ClusterKey, ClusterSpec};
use async_trait::async_trait;
use kafka_operator_common::ReconcileError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

/// Desired + recovered-actual + diff for one cluster, computed once under
/// the per-key lock and handed to [`CompositeOperation::composite`].
pub struct ClusterOperation {
    pub key: ClusterKey,
    pub op_type: OperationType,
    pub desired: Option<ClusterSpec>,
    pub current: Option<ClusterSpec>,
    pub diff: ClusterDiff,
}

/// `{getDesired(ns,name) -> ClusterOperation, apply(ns, op) -> deferred
/// result}` from `spec.md` §9, renamed to the verbs the rest of this crate
/// uses (`get_cluster`/`composite`).
#[async_trait]
pub trait CompositeOperation: Send + Sync {
    /// Build the `ClusterOperation` for `(namespace, name)`: decode the
    /// input (if present), recover actual state (if present), classify the
    /// operation type, and diff. Decode/diff errors are reported here, per
    /// `spec.md` §4.5 step 3.
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<ClusterOperation, ReconcileError>;

    /// Apply the plan implied by `op`. Runs under the caller's lock for
    /// `op.key`; must not itself acquire any lock.
    async fn composite(&self, namespace: &str, op: ClusterOperation) -> Result<(), ReconcileError>;
}
