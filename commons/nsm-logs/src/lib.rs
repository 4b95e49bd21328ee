//! Best-effort pod log capture for test sessions.
//!
//! ```no_run
//! # async fn example() {
//! let session = nsm_logs::capture("TestSmoke").await;
//! // ... run the test ...
//! session.finish().await;
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod error;
pub mod job;
pub mod source;

use std::path::PathBuf;
use std::sync::Arc;

use envconfig::Envconfig;
use nsm_k8s::{KUBECONFIG_ENV, SharedClient};
use tokio::sync::OnceCell;
use tracing::error;

pub use collector::{CaptureSession, CaptureSummary, ClusterTarget, LogCollector};
pub use config::LogsConfig;
pub use error::{CaptureFetchError, Result};
pub use job::{LogRequest, log_file_name, plan};
pub use source::{KubeLogSource, LogSource};

static COLLECTOR: OnceCell<Option<LogCollector>> = OnceCell::const_new();

/// Alternate cluster credentials from `KUBECONFIG0`, `KUBECONFIG1`, ...,
/// stopping at the first unset or empty one.
pub fn alternate_kubeconfigs() -> Vec<PathBuf> {
    alternate_kubeconfigs_from(|key| std::env::var(key).ok())
}

pub fn alternate_kubeconfigs_from<F>(lookup: F) -> Vec<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    (0..)
        .map(|i| lookup(&format!("{KUBECONFIG_ENV}{i}")))
        .take_while(|v| v.as_deref().is_some_and(|v| !v.is_empty()))
        .flatten()
        .map(PathBuf::from)
        .collect()
}

async fn global_collector() -> Option<&'static LogCollector> {
    COLLECTOR
        .get_or_init(|| async {
            let config = match LogsConfig::init_from_env() {
                Ok(config) => config,
                Err(e) => {
                    error!(error = %e, "invalid log capture configuration");
                    return None;
                }
            };
            let primary = ClusterTarget::Shared(Arc::new(SharedClient::with_path(
                config.kubeconfig_path(),
            )));
            let alternates = alternate_kubeconfigs()
                .into_iter()
                .map(ClusterTarget::Kubeconfig)
                .collect();
            match LogCollector::detached(config, primary, alternates) {
                Ok(collector) => Some(collector.with_shutdown_signal()),
                Err(e) => {
                    error!(error = %e, "cannot start log collector");
                    None
                }
            }
        })
        .await
        .as_ref()
}

/// Start a session on the process-wide collector, configured from the
/// environment on first use. The collector owns its runtime, so sessions
/// keep working across the runtimes of separate `#[tokio::test]` functions. Finishing it captures the primary cluster and
/// then every alternate one.
pub async fn capture(name: &str) -> CaptureSession {
    match global_collector().await {
        Some(collector) => collector.start_capture(name),
        None => CaptureSession::disabled(name),
    }
}
