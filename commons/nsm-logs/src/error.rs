use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single capture step. Logged and skipped, never returned
/// from a finished session.
#[derive(Error, Debug)]
pub enum CaptureFetchError {
    #[error("Kubernetes reported error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Cannot reach cluster: {0}")]
    Connect(#[from] nsm_k8s::Error),

    #[error("{what} did not finish within {timeout:?}")]
    Timeout { what: String, timeout: Duration },

    #[error("Cannot write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot start log workers: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Invalid namespace filter: {0}")]
    InvalidFilter(#[from] regex::Error),

    #[error("{0}")]
    Unavailable(String),
}

pub type Result<T, E = CaptureFetchError> = std::result::Result<T, E>;
