use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, api::ListParams};
use nsm_k8s::Kubectl;
use tracing::{info, instrument};

use crate::{
    CollectorConfig, PrefixError, PrefixFileTarget, PrefixSet, Result,
    compute_cluster_prefixes, compute_expected, convergence,
    expect_never_ready, observe_prefixes, wait_for_convergence,
};

/// Everything a prefix scenario needs to ask "does the collector agree with
/// the layers we put in place?".
#[derive(Clone)]
pub struct Reconciler {
    client: Client,
    kubectl: Kubectl,
    config: CollectorConfig,
}

impl Reconciler {
    pub fn new(client: Client, kubectl: Kubectl, config: CollectorConfig) -> Self {
        Self {
            client,
            kubectl,
            config,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn kubectl(&self) -> &Kubectl {
        &self.kubectl
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Expected output for the given env and user layers. The cluster layer is
    /// read fresh on every call.
    pub async fn expected(
        &self,
        env: &PrefixSet,
        user: &PrefixSet,
    ) -> Result<PrefixSet> {
        let cluster = compute_cluster_prefixes(&self.client).await?;
        env.validate()?;
        user.validate()?;
        let merged = compute_expected([&cluster, env, user]);
        convergence::normalize(&merged, self.config.normalization)
    }

    /// One observation: locate the reader pod, copy the file out and
    /// normalize it.
    pub async fn observe(&self) -> Result<PrefixSet> {
        let target = PrefixFileTarget::locate(&self.client, &self.config).await?;
        let observed = observe_prefixes(&self.kubectl, &target).await?;
        // Malformed output never matches a well-formed expectation, so it is
        // compared as written.
        Ok(convergence::normalize(&observed, self.config.normalization)
            .unwrap_or(observed))
    }

    #[instrument(skip_all, fields(%expected))]
    pub async fn wait_converged(&self, expected: &PrefixSet) -> Result<PrefixSet> {
        wait_for_convergence(
            expected,
            || self.observe(),
            self.config.timeout(),
            self.config.poll_interval(),
        )
        .await
    }

    /// Assert that pods matching `selector` in the collector namespace exist
    /// and none of them becomes ready within `window`.
    #[instrument(skip(self))]
    pub async fn expect_never_ready(
        &self,
        selector: &str,
        window: Duration,
    ) -> Result<()> {
        let pods: Api<Pod> =
            Api::namespaced(self.client.clone(), &self.config.namespace);
        let lp = ListParams::default().labels(selector);
        expect_never_ready(
            selector,
            || async {
                let list = pods.list(&lp).await?;
                any_ready(selector, &list.items)
            },
            window,
            self.config.poll_interval(),
        )
        .await?;
        info!("{selector} stayed unready for {window:?}");
        Ok(())
    }
}

/// Readiness of a selector's pods. No pods at all is not an answer yet.
fn any_ready(selector: &str, pods: &[Pod]) -> Result<bool> {
    if pods.is_empty() {
        return Err(PrefixError::ObservationUnavailable(format!(
            "no pods match {selector}"
        )));
    }
    Ok(pods.iter().any(nsm_k8s::pods::is_pod_ready))
}
