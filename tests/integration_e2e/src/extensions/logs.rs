use anyhow::Result;
use async_trait::async_trait;
use nsm_logs::{CaptureSession, LogCollector};

use crate::Extension;

/// Captures logs for the whole suite and for each test.
///
/// Without an explicit collector the process-wide one is used.
pub struct LogsExtension {
    suite: String,
    collector: Option<LogCollector>,
    suite_session: Option<CaptureSession>,
    test_session: Option<CaptureSession>,
}

impl LogsExtension {
    pub fn new(suite: &str) -> Self {
        Self {
            suite: suite.to_string(),
            collector: None,
            suite_session: None,
            test_session: None,
        }
    }

    pub fn with_collector(mut self, collector: LogCollector) -> Self {
        self.collector = Some(collector);
        self
    }

    async fn start(&self, name: &str) -> CaptureSession {
        match &self.collector {
            Some(collector) => collector.start_capture(name),
            None => nsm_logs::capture(name).await,
        }
    }
}

#[async_trait]
impl Extension for LogsExtension {
    fn name(&self) -> &str {
        "logs"
    }

    async fn setup_suite(&mut self) -> Result<()> {
        self.suite_session = Some(self.start(&self.suite).await);
        Ok(())
    }

    async fn teardown_suite(&mut self) -> Result<()> {
        if let Some(session) = self.suite_session.take() {
            session.finish().await;
        }
        Ok(())
    }

    async fn before_test(&mut self, test: &str) -> Result<()> {
        let name = format!("{}/{test}", self.suite);
        self.test_session = Some(self.start(&name).await);
        Ok(())
    }

    async fn after_test(&mut self, _test: &str) -> Result<()> {
        if let Some(session) = self.test_session.take() {
            session.finish().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use k8s_openapi::api::core::v1::Pod;
    use nsm_logs::{CaptureFetchError, ClusterTarget, LogSource, LogsConfig};

    struct OnePod;

    #[async_trait]
    impl LogSource for OnePod {
        async fn list_pods(&self) -> Result<Vec<Pod>, CaptureFetchError> {
            let mut pod = Pod::default();
            pod.metadata.name = Some("nsmgr-1".to_string());
            pod.metadata.namespace = Some("nsm-system".to_string());
            pod.spec = Some(Default::default());
            if let Some(spec) = pod.spec.as_mut() {
                spec.containers.push(k8s_openapi::api::core::v1::Container {
                    name: "nsmgr".to_string(),
                    ..Default::default()
                });
            }
            Ok(vec![pod])
        }

        async fn fetch_logs(
            &self,
            _namespace: &str,
            _pod: &str,
            _container: &str,
            _previous: bool,
            _since: Duration,
        ) -> Result<String, CaptureFetchError> {
            Ok("started\n".to_string())
        }
    }

    #[tokio::test]
    async fn sessions_land_under_suite_and_test_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let config = LogsConfig {
            artifacts_dir: tmp.path().to_path_buf(),
            ..LogsConfig::default()
        };
        let collector = LogCollector::new(
            config,
            ClusterTarget::Source(Arc::new(OnePod)),
            Vec::new(),
        )
        .unwrap();
        let mut ext =
            LogsExtension::new("ExcludedPrefixes").with_collector(collector);

        ext.setup_suite().await.unwrap();
        ext.before_test("TestKubeadm").await.unwrap();
        ext.after_test("TestKubeadm").await.unwrap();
        let test_log =
            tmp.path().join("ExcludedPrefixes/TestKubeadm/nsmgr-1.logs");
        assert_eq!(std::fs::read_to_string(test_log).unwrap(), "started\n");

        ext.teardown_suite().await.unwrap();
        assert!(tmp.path().join("ExcludedPrefixes/nsmgr-1.logs").exists());
    }
}
