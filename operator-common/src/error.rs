use thiserror::Error;

/// The error taxonomy every composite operation and resource adapter call
/// surfaces through its completion.
///
/// `Permanent` covers both decode errors and illegal transitions: there is
/// no retry value until the user edits the input. `Temporary` covers
/// transient orchestrator errors (conflict, timeout, 5xx): the next sweep
/// or event will retry.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("permanent reconciliation error: {0}")]
    Permanent(String),
    #[error("temporary reconciliation error: {0}")]
    Temporary(String),
}

impl ReconcileError {
    pub fn permanent<S: ToString>(s: S) -> Self {
        Self::Permanent(s.to_string())
    }

    pub fn temporary<S: ToString>(s: S) -> Self {
        Self::Temporary(s.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> Self {
        Self::permanent(err)
    }
}

impl From<kube::Error> for ReconcileError {
    fn from(err: kube::Error) -> Self {
        match &err {
            // not-found is handled by callers before it ever reaches here;
            // anything else from the API server we see is either a
            // conflict/5xx (retry later) or a transport-level hiccup.
            kube::Error::Api(e) if e.code == 409 || e.code >= 500 => Self::temporary(err),
            kube::Error::Service(_) | kube::Error::HyperError(_) => Self::temporary(err),
            _ => Self::permanent(err),
        }
    }
}
