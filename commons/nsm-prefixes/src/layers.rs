//! The three sources of excluded prefixes: cluster bootstrap networking,
//! the collector's environment, and the user ConfigMap.

use std::path::Path;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, PostParams},
};
use nsm_k8s::{Mutator, append_env};
use serde::Deserialize;
use tracing::info;

use crate::{PrefixError, PrefixSet, Result};

pub const KUBEADM_NAMESPACE: &str = "kube-system";
pub const KUBEADM_CONFIG_MAP: &str = "kubeadm-config";
pub const CLUSTER_CONFIGURATION_KEY: &str = "ClusterConfiguration";

/// Collector env var carrying comma separated prefixes.
pub const EXCLUDED_PREFIXES_ENV: &str = "EXCLUDE_PREFIXES_K8S_EXCLUDED_PREFIXES";

/// Key of the prefixes payload inside the user ConfigMap.
pub const PREFIXES_FILE_NAME: &str = "excluded_prefixes.yaml";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterConfiguration {
    networking: Option<Networking>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Networking {
    pod_subnet: Option<String>,
    service_subnet: Option<String>,
}

/// Pod and service subnets out of a kubeadm `ClusterConfiguration`
/// document. Dual-stack values (`a,b`) contribute every entry.
pub fn parse_cluster_configuration(raw: &str) -> Result<PrefixSet> {
    let config: ClusterConfiguration = serde_yaml::from_str(raw)
        .map_err(|e| PrefixError::ConfigUnavailable(e.to_string()))?;
    let networking = config.networking.ok_or_else(|| {
        PrefixError::ConfigUnavailable("networking section is missing".into())
    })?;
    let pod = non_empty(networking.pod_subnet, "networking.podSubnet")?;
    let service =
        non_empty(networking.service_subnet, "networking.serviceSubnet")?;
    Ok(pod.split(',').chain(service.split(',')).collect())
}

fn non_empty(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(PrefixError::ConfigUnavailable(format!("{field} is missing"))),
    }
}

/// Read the cluster-derived layer from `kube-system/kubeadm-config`.
pub async fn compute_cluster_prefixes(client: &Client) -> Result<PrefixSet> {
    let api: Api<ConfigMap> =
        Api::namespaced(client.clone(), KUBEADM_NAMESPACE);
    let cm = api
        .get_opt(KUBEADM_CONFIG_MAP)
        .await?
        .ok_or_else(|| {
            PrefixError::ConfigUnavailable(format!(
                "{KUBEADM_NAMESPACE}/{KUBEADM_CONFIG_MAP} not found"
            ))
        })?;
    let raw = cm
        .data
        .as_ref()
        .and_then(|d| d.get(CLUSTER_CONFIGURATION_KEY))
        .ok_or_else(|| {
            PrefixError::ConfigUnavailable(format!(
                "{CLUSTER_CONFIGURATION_KEY} key is missing"
            ))
        })?;
    parse_cluster_configuration(raw)
}

/// Environment layer as the collector reads it.
pub fn env_prefixes(raw: &str) -> PrefixSet {
    raw.split(',').collect()
}

/// DaemonSet mutator handing `prefixes` to the collector container.
pub fn with_env_prefixes(prefixes: &PrefixSet) -> Mutator<DaemonSet> {
    append_env(EXCLUDED_PREFIXES_ENV, &prefixes.join(","))
}

/// User layer stored under [`PREFIXES_FILE_NAME`]; a ConfigMap without
/// that key contributes nothing.
pub fn user_prefixes(cm: &ConfigMap) -> Result<PrefixSet> {
    match cm.data.as_ref().and_then(|d| d.get(PREFIXES_FILE_NAME)) {
        Some(raw) => PrefixSet::from_yaml(raw),
        None => Ok(PrefixSet::new()),
    }
}

pub fn load_config_map(path: &Path) -> Result<ConfigMap> {
    Ok(nsm_k8s::read_manifest(path)?)
}

/// Lifecycle of the user ConfigMap in the collector namespace.
///
/// [`UserConfig::prefixes`] reflects what the cluster currently holds: it is
/// empty before creation and again after deletion.
pub struct UserConfig {
    api: Api<ConfigMap>,
    template: ConfigMap,
    current: Option<ConfigMap>,
}

impl UserConfig {
    pub fn new(client: Client, template: ConfigMap) -> Self {
        let ns = template
            .namespace()
            .unwrap_or_else(|| nsm_k8s::DEFAULT_NAMESPACE.to_string());
        Self {
            api: Api::namespaced(client, &ns),
            template,
            current: None,
        }
    }

    pub fn name(&self) -> String {
        self.template.name_any()
    }

    pub fn prefixes(&self) -> Result<PrefixSet> {
        match &self.current {
            Some(cm) => user_prefixes(cm),
            None => Ok(PrefixSet::new()),
        }
    }

    pub async fn create(&mut self) -> Result<PrefixSet> {
        let created = self
            .api
            .create(&PostParams::default(), &self.template)
            .await?;
        info!(name = %created.name_any(), "user config created");
        self.current = Some(created);
        self.prefixes()
    }

    /// Replace the prefixes payload, creating the ConfigMap when needed.
    pub async fn update(&mut self, prefixes: &PrefixSet) -> Result<PrefixSet> {
        let mut cm = match self.current.take() {
            Some(cm) => cm,
            None => self.template.clone(),
        };
        cm.data
            .get_or_insert_with(Default::default)
            .insert(PREFIXES_FILE_NAME.to_string(), prefixes.to_yaml());
        let updated = if cm.metadata.resource_version.is_some() {
            self.api
                .replace(&cm.name_any(), &PostParams::default(), &cm)
                .await?
        } else {
            self.api.create(&PostParams::default(), &cm).await?
        };
        info!(name = %updated.name_any(), %prefixes, "user config updated");
        self.current = Some(updated);
        self.prefixes()
    }

    pub async fn delete(&mut self) -> Result<()> {
        if self.current.take().is_some() {
            self.api
                .delete(&self.name(), &DeleteParams::default())
                .await?;
            info!(name = %self.name(), "user config deleted");
        }
        Ok(())
    }
}
