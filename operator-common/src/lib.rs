//! Generic reconciliation primitives reused across orchestrator-cluster
//! operators: an error taxonomy, an ordered-step plan runner for composite
//! operations, a keyed serializer for per-cluster mutual exclusion, and a
//! small helper for driving a `kube_runtime` watch stream into a handler.

pub mod error;
pub mod plan;
pub mod serializer;
pub mod watcher;

pub use error::ReconcileError;
pub use plan::{Plan, PlanStep};
pub use serializer::{KeyedSerializer, Lease, LockError};
