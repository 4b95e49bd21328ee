use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use kube::ResourceExt;
use nsm_k8s::SharedClient;
use regex::Regex;
use tokio::runtime::Handle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, instrument, warn};

use crate::job::{LogJob, PassCounters};
use crate::{CaptureFetchError, KubeLogSource, LogSource, LogsConfig, Result};

/// A cluster to capture from.
#[derive(Clone)]
pub enum ClusterTarget {
    Source(Arc<dyn LogSource>),
    /// Client built on first use and kept for the whole process.
    Shared(Arc<SharedClient>),
    /// Client built for one pass and dropped right after it.
    Kubeconfig(PathBuf),
}

impl ClusterTarget {
    async fn acquire(&self) -> Result<Arc<dyn LogSource>> {
        match self {
            ClusterTarget::Source(source) => Ok(source.clone()),
            ClusterTarget::Shared(shared) => {
                Ok(Arc::new(KubeLogSource::new(shared.get().await?)))
            }
            ClusterTarget::Kubeconfig(path) => {
                Ok(Arc::new(KubeLogSource::from_kubeconfig(path).await?))
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            ClusterTarget::Source(_) => "custom source".to_string(),
            ClusterTarget::Shared(_) => "shared client".to_string(),
            ClusterTarget::Kubeconfig(path) => path.display().to_string(),
        }
    }
}

/// Outcome of one finished session, summed over every cluster pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Pods handed to workers.
    pub submitted: usize,
    /// Pods skipped because of their namespace.
    pub filtered: usize,
    pub written: usize,
    pub failed: usize,
    /// Passes that ended early: no pod listing, deadline or cancellation.
    pub interrupted: usize,
}

impl std::ops::AddAssign for CaptureSummary {
    fn add_assign(&mut self, other: Self) {
        self.submitted += other.submitted;
        self.filtered += other.filtered;
        self.written += other.written;
        self.failed += other.failed;
        self.interrupted += other.interrupted;
    }
}

struct Inner {
    config: LogsConfig,
    namespaces: Regex,
    primary: ClusterTarget,
    alternates: Vec<ClusterTarget>,
    jobs: flume::Sender<LogJob>,
    token: CancellationToken,
    /// Runtime running the workers and every capture pass.
    runtime: Handle,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Fixed pool of workers writing pod logs under the artifacts directory.
///
/// Cheap to clone; every clone shares the same workers and queue.
#[derive(Clone)]
pub struct LogCollector {
    inner: Arc<Inner>,
}

impl LogCollector {
    /// Collector whose workers live on the current tokio runtime. It stops
    /// working once that runtime shuts down.
    pub fn new(
        config: LogsConfig,
        primary: ClusterTarget,
        alternates: Vec<ClusterTarget>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| CaptureFetchError::Runtime(std::io::Error::other(e)))?;
        Self::start(config, primary, alternates, runtime, CancellationToken::new())
    }

    /// Collector running on a runtime of its own, on a dedicated thread. It
    /// survives the runtimes of its callers, so one instance can serve many
    /// `#[tokio::test]` functions. The thread exits once the collector is
    /// cancelled or dropped.
    pub fn detached(
        config: LogsConfig,
        primary: ClusterTarget,
        alternates: Vec<ClusterTarget>,
    ) -> Result<Self> {
        let token = CancellationToken::new();
        let runtime =
            background_runtime(token.clone()).map_err(CaptureFetchError::Runtime)?;
        Self::start(config, primary, alternates, runtime, token)
    }

    fn start(
        config: LogsConfig,
        primary: ClusterTarget,
        alternates: Vec<ClusterTarget>,
        runtime: Handle,
        token: CancellationToken,
    ) -> Result<Self> {
        let namespaces = Regex::new(&config.allowed_namespaces)?;
        let workers = config.workers();
        let (tx, rx) = flume::bounded::<LogJob>(workers);
        for i in 0..workers {
            let rx = rx.clone();
            let token = token.clone();
            runtime.spawn(async move {
                loop {
                    let job = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        job = rx.recv_async() => match job {
                            Ok(job) => job,
                            Err(_) => break,
                        },
                    };
                    job.run().await;
                }
                debug!("log worker {i} stopped");
            });
        }
        info!(workers, filter = %namespaces, "log collector started");
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                namespaces,
                primary,
                alternates,
                jobs: tx,
                token,
                runtime,
            }),
        })
    }

    /// Cancel every pass on SIGINT or SIGTERM.
    pub fn with_shutdown_signal(self) -> Self {
        let token = self.inner.token.clone();
        self.inner.runtime.spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    warn!("shutdown requested, stopping log capture");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
        self
    }

    pub fn config(&self) -> &LogsConfig {
        &self.inner.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    /// Begin a session; logs written from now on end up in
    /// `<artifacts>/<name>` once [`CaptureSession::finish`] runs. Nothing
    /// touches the filesystem before that.
    pub fn start_capture(&self, name: &str) -> CaptureSession {
        CaptureSession {
            collector: Some(self.clone()),
            name: name.to_string(),
            dir: self.inner.config.artifacts_dir.join(name),
            started: Instant::now(),
        }
    }

    /// Primary pass then the alternates, all under one session deadline.
    async fn capture_session(&self, dir: &Path, started: Instant) -> CaptureSummary {
        let inner = &self.inner;
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "cannot create log directory");
        }
        let deadline = Instant::now() + inner.config.session_timeout();
        let mut summary = self
            .capture_target(&inner.primary, dir, started, deadline)
            .await;
        for target in &inner.alternates {
            if inner.token.is_cancelled() {
                break;
            }
            if Instant::now() >= deadline {
                warn!(cluster = %target.describe(), "session deadline reached, skipping cluster");
                summary.interrupted += 1;
                continue;
            }
            debug!(cluster = %target.describe(), "capturing alternate cluster");
            summary += self.capture_target(target, dir, started, deadline).await;
        }
        summary
    }

    async fn capture_target(
        &self,
        target: &ClusterTarget,
        dir: &Path,
        started: Instant,
        deadline: Instant,
    ) -> CaptureSummary {
        // Kubeconfig targets hold their client only for this pass.
        match target.acquire().await {
            Ok(source) => self.capture_pass(source, dir, started, deadline).await,
            Err(e) => {
                error!(cluster = %target.describe(), error = %e, "cannot capture logs");
                CaptureSummary {
                    interrupted: 1,
                    ..Default::default()
                }
            }
        }
    }

    async fn capture_pass(
        &self,
        source: Arc<dyn LogSource>,
        dir: &Path,
        started: Instant,
        deadline: Instant,
    ) -> CaptureSummary {
        let inner = &self.inner;
        let mut summary = CaptureSummary::default();
        let query_timeout = inner.config.query_timeout();

        let pods = match timeout(query_timeout, source.list_pods()).await {
            Ok(Ok(pods)) => pods,
            Ok(Err(e)) => {
                error!(error = %e, "cannot list pods");
                summary.interrupted = 1;
                return summary;
            }
            Err(_) => {
                let e = CaptureFetchError::Timeout {
                    what: "pod listing".to_string(),
                    timeout: query_timeout,
                };
                error!(error = %e, "cannot list pods");
                summary.interrupted = 1;
                return summary;
            }
        };

        let counters = Arc::new(PassCounters::default());
        let (done_tx, done_rx) = flume::unbounded::<()>();
        for pod in pods {
            let namespace = pod.namespace().unwrap_or_default();
            if !inner.namespaces.is_match(&namespace) {
                summary.filtered += 1;
                continue;
            }
            let job = LogJob {
                pod,
                source: source.clone(),
                dir: dir.to_path_buf(),
                started,
                query_timeout,
                counters: counters.clone(),
                _done: done_tx.clone(),
            };
            let submitted = tokio::select! {
                biased;
                _ = inner.token.cancelled() => false,
                _ = sleep_until(deadline) => {
                    warn!("session deadline reached, not submitting more jobs");
                    false
                }
                sent = inner.jobs.send_async(job) => sent.is_ok(),
            };
            if !submitted {
                summary.interrupted = 1;
                break;
            }
            summary.submitted += 1;
        }

        // Every job holds a sender; the channel closes once all of them ran
        // or were dropped.
        drop(done_tx);
        tokio::select! {
            _ = done_rx.recv_async() => {}
            _ = inner.token.cancelled() => summary.interrupted = 1,
        }
        summary.written = counters.written.load(Ordering::Relaxed);
        summary.failed = counters.failed.load(Ordering::Relaxed);
        summary
    }
}

fn background_runtime(token: CancellationToken) -> std::io::Result<Handle> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("nsm-logs-worker")
        .enable_all()
        .build()?;
    let handle = runtime.handle().clone();
    std::thread::Builder::new()
        .name("nsm-logs".to_string())
        .spawn(move || runtime.block_on(token.cancelled()))?;
    Ok(handle)
}

/// A started capture. Dropping it without calling
/// [`CaptureSession::finish`] captures nothing.
pub struct CaptureSession {
    collector: Option<LogCollector>,
    name: String,
    dir: PathBuf,
    started: Instant,
}

impl CaptureSession {
    /// A session that does nothing when finished.
    pub fn disabled(name: &str) -> Self {
        Self {
            collector: None,
            name: name.to_string(),
            dir: PathBuf::new(),
            started: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture the primary cluster, then each alternate one after the other,
    /// on the collector's runtime. Problems are logged; this never fails.
    #[instrument(skip(self), fields(session = %self.name))]
    pub async fn finish(self) -> CaptureSummary {
        let Some(collector) = self.collector else {
            return CaptureSummary::default();
        };
        let runtime = collector.inner.runtime.clone();
        let (dir, started) = (self.dir, self.started);
        let pass = async move { collector.capture_session(&dir, started).await }
            .instrument(Span::current());
        let summary = match runtime.spawn(pass).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "log capture stopped");
                CaptureSummary {
                    interrupted: 1,
                    ..Default::default()
                }
            }
        };
        info!(
            submitted = summary.submitted,
            written = summary.written,
            failed = summary.failed,
            "logs captured"
        );
        summary
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        )
        .expect("failed to install signal handler")
        .recv()
        .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
