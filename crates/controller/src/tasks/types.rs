use crate::tasks::client::RemediationClient;
use crate::tasks::config::ControllerConfig;
use crate::tasks::metrics::RemediationObserver;
use crate::tasks::remediation::identity::IdentityError;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(
        "failed to persist remediation status: {source}{}",
        .pass.as_ref().map(|e| format!("; reconcile error: {e}")).unwrap_or_default()
    )]
    StatusPersist {
        source: Box<Error>,
        /// Error returned by the pass itself, if any
        pass: Option<Box<Error>>,
    },
}

impl Error {
    fn api_code(&self) -> Option<u16> {
        match self {
            Self::KubeError(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    /// Optimistic-concurrency failure: the record changed since it was read.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }
}

/// Shared state handed to every reconcile
#[derive(Clone)]
pub struct Context {
    pub client: Arc<dyn RemediationClient>,
    pub config: Arc<ControllerConfig>,
    pub observer: Arc<dyn RemediationObserver>,
}
