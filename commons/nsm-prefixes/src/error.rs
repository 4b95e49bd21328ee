use std::time::Duration;

use thiserror::Error;

use crate::PrefixSet;

#[derive(Error, Debug)]
pub enum PrefixError {
    /// Cluster bootstrap configuration is missing or malformed. Not retried.
    #[error("Cluster configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// The observed prefix file could not be read this time around.
    #[error("Observation unavailable: {0}")]
    ObservationUnavailable(String),

    #[error(
        "Prefixes did not converge within {timeout:?}: expected {expected}, last observed {}",
        describe(.last_observed)
    )]
    ConvergenceTimeout {
        timeout: Duration,
        expected: PrefixSet,
        last_observed: Option<PrefixSet>,
    },

    #[error("Invalid prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: String },

    #[error("Cannot decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Pod {0} became ready but was expected to fail")]
    UnexpectedReady(String),

    /// No readiness query succeeded, so nothing was actually checked.
    #[error("Readiness of {what} never observed within {window:?}: {last_error}")]
    ReadinessUnknown {
        what: String,
        window: Duration,
        last_error: String,
    },

    #[error(transparent)]
    K8s(#[from] nsm_k8s::Error),

    #[error("Kubernetes reported error: {0}")]
    Kube(#[from] kube::Error),
}

impl PrefixError {
    /// Errors that a polling loop keeps retrying until its deadline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PrefixError::ObservationUnavailable(_))
    }
}

fn describe(observed: &Option<PrefixSet>) -> String {
    observed
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "nothing".to_string())
}

pub type Result<T, E = PrefixError> = std::result::Result<T, E>;
