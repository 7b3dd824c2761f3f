pub mod diff;
pub mod names;
pub mod spec;
pub mod storage;

pub use diff::{diff, recover_from_actual, ClusterDiff, DiffError};
pub use spec::{decode, ClusterKey, ClusterSpec, ClusterType, CommonSpec};
pub use storage::{StorageKind, StorageSelector, StorageSpec};
