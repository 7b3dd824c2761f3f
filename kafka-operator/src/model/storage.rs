use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `spec.md` §3/§6: `{"type":"ephemeral"}` or a persistent-claim request.
///
/// Invariant I4: once a cluster exists its storage tag is immutable — the
/// differ rejects any plan that would change it (see
/// [`crate::model::diff::diff`]).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageSpec {
    #[serde(rename = "ephemeral")]
    Ephemeral,
    #[serde(rename = "persistent-claim")]
    PersistentClaim {
        size: String,
        #[serde(default)]
        class: Option<String>,
        #[serde(default)]
        selector: Option<StorageSelector>,
        #[serde(rename = "delete-claim", default)]
        delete_claim: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSelector {
    #[serde(rename = "matchLabels", default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Discriminant used by the differ (I4) without comparing claim size/class,
/// which are free to change without an illegal-transition error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Ephemeral,
    PersistentClaim,
}

impl StorageSpec {
    pub fn kind(&self) -> StorageKind {
        match self {
            Self::Ephemeral => StorageKind::Ephemeral,
            Self::PersistentClaim { .. } => StorageKind::PersistentClaim,
        }
    }

    pub fn delete_claim(&self) -> bool {
        match self {
            Self::Ephemeral => false,
            Self::PersistentClaim { delete_claim, .. } => *delete_claim,
        }
    }
}
