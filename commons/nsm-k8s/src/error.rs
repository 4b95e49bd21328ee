use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes reported error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Cannot load kubeconfig {path:?}: {source}")]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: kube::config::KubeconfigError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot decode manifest {path:?}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("`{cmd}` exited with {status}: {stderr}")]
    Command {
        cmd: String,
        status: i32,
        stderr: String,
    },

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Container {container} of pod {pod} restarted {count} time(s), reason: {reason}")]
    Restarted {
        pod: String,
        container: String,
        count: i32,
        reason: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
