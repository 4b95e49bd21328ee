use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, ResourceExt, api::ListParams};
use nsm_k8s::Kubectl;
use tracing::{debug, info};

use crate::{CollectorConfig, PrefixError, PrefixSet, Result};

/// The pod and in-pod path holding the collector's output.
#[derive(Debug, Clone)]
pub struct PrefixFileTarget {
    pub namespace: String,
    pub pod: String,
    pub remote_path: String,
}

impl PrefixFileTarget {
    /// Look the reader pod (`app=<reader_app>`) up once. A missing or
    /// not yet running pod is [`PrefixError::ObservationUnavailable`], so a
    /// polling caller simply tries again and follows a replaced pod.
    pub async fn locate(
        client: &Client,
        config: &CollectorConfig,
    ) -> Result<PrefixFileTarget> {
        let pods: Api<Pod> = Api::namespaced(client.clone(), &config.namespace);
        let lp = ListParams::default().labels(&format!("app={}", config.reader_app));
        let list = pods.list(&lp).await.map_err(|e| {
            PrefixError::ObservationUnavailable(format!(
                "listing {} pods: {e}",
                config.reader_app
            ))
        })?;
        Self::from_pods(config, &list.items)
    }

    /// Pick the first running reader pod.
    pub fn from_pods(
        config: &CollectorConfig,
        pods: &[Pod],
    ) -> Result<PrefixFileTarget> {
        let pod = pods
            .iter()
            .find(|p| nsm_k8s::pods::is_pod_running(p))
            .ok_or_else(|| {
                PrefixError::ObservationUnavailable(format!(
                    "no running {} pod in {}",
                    config.reader_app, config.namespace
                ))
            })?;
        Ok(PrefixFileTarget {
            namespace: config.namespace.clone(),
            pod: pod.name_any(),
            remote_path: config.remote_file(),
        })
    }
}

/// Remove the prefix file so a later collector cannot be judged on output
/// left behind by an earlier one.
pub async fn clear_prefixes(
    kubectl: &Kubectl,
    target: &PrefixFileTarget,
) -> Result<()> {
    let path = format!("/{}", target.remote_path.trim_start_matches('/'));
    kubectl
        .exec(&target.namespace, &target.pod, &["rm", "-f", &path])
        .await?;
    info!(pod = %target.pod, %path, "cleared prefix file");
    Ok(())
}

/// Copy the prefix file out of the reader pod and decode it.
///
/// Anything that goes wrong here is an [`PrefixError::ObservationUnavailable`]
/// so callers keep polling.
pub async fn observe_prefixes(
    kubectl: &Kubectl,
    target: &PrefixFileTarget,
) -> Result<PrefixSet> {
    let unavailable = |e: &dyn std::fmt::Display| {
        PrefixError::ObservationUnavailable(format!(
            "{}/{}:{}: {e}",
            target.namespace, target.pod, target.remote_path
        ))
    };
    let dir = tempfile::tempdir().map_err(|e| unavailable(&e))?;
    let local = dir.path().join("prefixes.yaml");
    kubectl
        .cp_from_pod(&target.namespace, &target.pod, &target.remote_path, &local)
        .await
        .map_err(|e| unavailable(&e))?;
    let raw = tokio::fs::read_to_string(&local)
        .await
        .map_err(|e| unavailable(&e))?;
    let observed = PrefixSet::from_yaml(&raw).map_err(|e| unavailable(&e))?;
    debug!(pod = %target.pod, %observed, "observed prefixes");
    Ok(observed)
}
