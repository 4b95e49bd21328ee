use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::ResourceExt;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::{CaptureFetchError, LogSource};

/// One log blob to fetch for a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRequest {
    pub container: String,
    pub previous: bool,
    pub file_name: String,
}

/// `<pod>[-<container>].logs`, or `-previous.logs` for the prior
/// incarnation.
pub fn log_file_name(
    pod: &str,
    container: Option<&str>,
    previous: bool,
) -> String {
    let suffix = if previous { "-previous.logs" } else { ".logs" };
    match container {
        Some(c) => format!("{pod}-{c}{suffix}"),
        None => format!("{pod}{suffix}"),
    }
}

fn was_terminated(statuses: Option<&Vec<ContainerStatus>>, name: &str) -> bool {
    statuses
        .into_iter()
        .flatten()
        .find(|s| s.name == name)
        .and_then(|s| s.last_state.as_ref())
        .is_some_and(|state| state.terminated.is_some())
}

/// Everything worth fetching for `pod`: regular containers then init
/// containers, current logs always and previous logs for containers that
/// terminated before.
pub fn plan(pod: &Pod) -> Vec<LogRequest> {
    let name = pod.name_any();
    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };
    let status = pod.status.as_ref();
    let regular = spec.containers.iter().map(|c| c.name.as_str());
    let init = spec
        .init_containers
        .iter()
        .flatten()
        .map(|c| c.name.as_str());

    let mut requests = Vec::new();
    let mut push = |container: &str,
                    tag: bool,
                    statuses: Option<&Vec<ContainerStatus>>| {
        let suffix = tag.then_some(container);
        requests.push(LogRequest {
            container: container.to_string(),
            previous: false,
            file_name: log_file_name(&name, suffix, false),
        });
        if was_terminated(statuses, container) {
            requests.push(LogRequest {
                container: container.to_string(),
                previous: true,
                file_name: log_file_name(&name, suffix, true),
            });
        }
    };
    let tag_regular = spec.containers.len() > 1;
    for c in regular {
        push(c, tag_regular, status.and_then(|s| s.container_statuses.as_ref()));
    }
    for c in init {
        push(c, true, status.and_then(|s| s.init_container_statuses.as_ref()));
    }
    requests
}

/// Per-pass tallies, shared by every job of the pass.
#[derive(Debug, Default)]
pub(crate) struct PassCounters {
    pub written: AtomicUsize,
    pub failed: AtomicUsize,
}

pub(crate) struct LogJob {
    pub pod: Pod,
    pub source: Arc<dyn LogSource>,
    pub dir: PathBuf,
    pub started: Instant,
    pub query_timeout: Duration,
    pub counters: Arc<PassCounters>,
    /// Dropped when the job finishes or is discarded unrun.
    pub _done: flume::Sender<()>,
}

impl LogJob {
    pub async fn run(self) {
        let namespace = self.pod.namespace().unwrap_or_default();
        let pod = self.pod.name_any();
        for request in plan(&self.pod) {
            match self.save(&namespace, &pod, &request).await {
                Ok(path) => {
                    debug!(%pod, path = %path.display(), "saved logs");
                    self.counters.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(
                        %namespace,
                        %pod,
                        container = %request.container,
                        previous = request.previous,
                        error = %e,
                        "cannot capture logs"
                    );
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    async fn save(
        &self,
        namespace: &str,
        pod: &str,
        request: &LogRequest,
    ) -> Result<PathBuf, CaptureFetchError> {
        let fetch = self.source.fetch_logs(
            namespace,
            pod,
            &request.container,
            request.previous,
            self.started.elapsed(),
        );
        let logs = timeout(self.query_timeout, fetch).await.map_err(|_| {
            CaptureFetchError::Timeout {
                what: format!("logs of {pod}/{}", request.container),
                timeout: self.query_timeout,
            }
        })??;
        let path = self.dir.join(&request.file_name);
        tokio::fs::write(&path, logs).await.map_err(|source| {
            CaptureFetchError::Write {
                path: path.clone(),
                source,
            }
        })?;
        Ok(path)
    }
}
