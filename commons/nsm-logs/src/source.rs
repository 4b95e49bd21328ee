use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Api, Client,
    api::{ListParams, LogParams},
};

use crate::Result;

/// Where pods and their logs come from during a capture pass.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Every pod in every namespace.
    async fn list_pods(&self) -> Result<Vec<Pod>>;

    /// Logs of one container written during the last `since`.
    async fn fetch_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        previous: bool,
        since: Duration,
    ) -> Result<String>;
}

pub struct KubeLogSource {
    client: Client,
}

impl KubeLogSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_kubeconfig(path: &Path) -> Result<Self> {
        Ok(Self::new(nsm_k8s::connect(path).await?))
    }
}

#[async_trait]
impl LogSource for KubeLogSource {
    async fn list_pods(&self) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        Ok(pods.list(&ListParams::default()).await?.items)
    }

    async fn fetch_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        previous: bool,
        since: Duration,
    ) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            previous,
            since_seconds: Some(since_seconds(since)),
            ..LogParams::default()
        };
        Ok(pods.logs(pod, &params).await?)
    }
}

/// Whole seconds covering `since`, at least one.
pub fn since_seconds(since: Duration) -> i64 {
    let secs = since.as_secs() + u64::from(since.subsec_nanos() > 0);
    i64::try_from(secs.max(1)).unwrap_or(i64::MAX)
}
