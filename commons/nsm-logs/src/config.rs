use std::path::PathBuf;
use std::time::Duration;

use envconfig::Envconfig;

pub const DEFAULT_ALLOWED_NAMESPACES: &str = "(ns-.*)|(nsm-system)";

#[derive(Envconfig, Debug, Clone)]
pub struct LogsConfig {
    /// Falls back to `$HOME/.kube/config` when unset or empty.
    #[envconfig(from = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    #[envconfig(from = "ARTIFACTS_DIR", default = "logs")]
    pub artifacts_dir: PathBuf,

    /// Bound on each individual Kubernetes query.
    #[envconfig(from = "LOGS_TIMEOUT_SECS", default = "5")]
    pub timeout_secs: u64,

    /// Bound on submitting jobs during one capture pass.
    #[envconfig(from = "LOGS_SESSION_TIMEOUT_SECS", default = "120")]
    pub session_timeout_secs: u64,

    #[envconfig(from = "LOGS_WORKER_COUNT", default = "8")]
    pub worker_count: usize,

    #[envconfig(
        from = "LOGS_ALLOWED_NAMESPACES",
        default = "(ns-.*)|(nsm-system)"
    )]
    pub allowed_namespaces: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            artifacts_dir: PathBuf::from("logs"),
            timeout_secs: 5,
            session_timeout_secs: 120,
            worker_count: 8,
            allowed_namespaces: DEFAULT_ALLOWED_NAMESPACES.to_string(),
        }
    }
}

impl LogsConfig {
    pub fn kubeconfig_path(&self) -> PathBuf {
        match self.kubeconfig.as_deref() {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => nsm_k8s::kubeconfig_path(),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn workers(&self) -> usize {
        self.worker_count.max(1)
    }
}
