use kafka_operator_common::ReconcileError;
use thiserror::Error;

/// Errors decoding a `ConfigMap`'s `data` map into a [`crate::model::ClusterSpec`]
/// (`spec.md` §4.2 "Decode"). These are always [`ReconcileError::Permanent`]:
/// there is no retry value until the user edits the input (`spec.md` §7 item 2).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid value for field {0}")]
    InvalidField(String),
    #[error("invalid JSON for field {0}: {1}")]
    InvalidJson(String, String),
    #[error("unrecognized cluster type label: {0}")]
    UnknownClusterType(String),
}

impl From<DecodeError> for ReconcileError {
    fn from(err: DecodeError) -> Self {
        ReconcileError::permanent(err)
    }
}

/// Errors the reconciliation engine itself can surface, distinct from
/// composite-operation failures (`spec.md` §7 items 4/5).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("timed out acquiring the cluster lock")]
    LockTimeout,
    #[error("fatal engine error: {0}")]
    Fatal(#[from] anyhow::Error),
}

/// `spec.md` §7: lock timeout is reported by the engine itself, not the
/// composite, and is retryable — the next sweep or event tries again.
impl From<EngineError> for ReconcileError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::LockTimeout => ReconcileError::temporary(err),
            EngineError::Fatal(inner) => ReconcileError::permanent(inner),
        }
    }
}
