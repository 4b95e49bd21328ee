// Pod, node and namespace helpers shared by the suites.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, ListParams, PostParams},
};
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::{Error, Kubectl, Result};

const POD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Check if a pod reports the `Ready` condition.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

pub fn is_pod_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|phase| phase == "Running")
        .unwrap_or(false)
}

/// True when `pod` carries every `labels` entry.
pub fn has_labels(pod: &Pod, labels: &BTreeMap<String, String>) -> bool {
    let pod_labels = pod.labels();
    labels.iter().all(|(k, v)| pod_labels.get(k) == Some(v))
}

/// First pod in `pods` that has exactly `name`, or that carries all of
/// `labels` when `labels` is non-empty.
pub fn find_pod<'a>(
    pods: &'a [Pod],
    name: &str,
    labels: &BTreeMap<String, String>,
) -> Option<&'a Pod> {
    pods.iter().find(|pod| {
        pod.metadata.name.as_deref() == Some(name)
            || (!labels.is_empty() && has_labels(pod, labels))
    })
}

/// Find a pod by name or by matching all labels passed.
pub async fn describe_pod(
    client: &Client,
    namespace: &str,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> Result<Option<Pod>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = pods.list(&ListParams::default()).await?;
    Ok(find_pod(&list.items, name, labels).cloned())
}

/// Wait until a pod labelled `app=<app>` reaches the `Running` phase.
pub async fn wait_for_pod_running(
    client: &Client,
    namespace: &str,
    app: &str,
    timeout: Duration,
) -> Result<Pod> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(&format!("app={app}"));
    let start = Instant::now();
    loop {
        match pods.list(&lp).await {
            Ok(list) => {
                if let Some(pod) = list.items.into_iter().find(is_pod_running)
                {
                    info!(pod = %pod.name_any(), "{app} pod is running");
                    return Ok(pod);
                }
            }
            Err(e) => debug!(error = %e, "listing {app} pods failed"),
        }
        if start.elapsed() >= timeout {
            return Err(Error::Timeout(format!(
                "{app} pod in {namespace} is not running after {timeout:?}"
            )));
        }
        tokio::time::sleep(POD_POLL_INTERVAL).await;
    }
}

/// Poll `kubectl logs -l <selector>` until `pattern` matches.
///
/// Meant for final assertions only, not for waiting on application state.
pub async fn wait_logs_match(
    kubectl: &Kubectl,
    selector: &str,
    pattern: &str,
    namespace: &str,
    timeout: Duration,
) -> Result<()> {
    let re = Regex::new(pattern)?;
    let start = Instant::now();
    loop {
        let logs = kubectl.logs(namespace, selector).await?;
        if re.is_match(&logs) {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(Error::Timeout(format!(
                "timeout for wait pattern: {pattern}"
            )));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Print logs of every container of every pod in `namespace`.
pub async fn show_logs(client: &Client, kubectl: &Kubectl, namespace: &str) {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = match pods.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            error!("Cannot get pods: {}", e);
            return;
        }
    };
    for pod in list.items {
        let name = pod.name_any();
        let containers = pod
            .spec
            .as_ref()
            .map(|s| s.containers.clone())
            .unwrap_or_default();
        for container in containers {
            match kubectl.container_logs(namespace, &name, &container.name).await
            {
                Ok(logs) => {
                    info!(pod = %name, container = %container.name, "\n{}", logs)
                }
                Err(e) => warn!(pod = %name, error = %e, "cannot read logs"),
            }
        }
    }
}

/// Nodes that workloads can be scheduled on, i.e. everything except the
/// control plane.
pub async fn nodes(client: &Client) -> Result<Vec<Node>> {
    let api: Api<Node> = Api::all(client.clone());
    let list = api.list(&ListParams::default()).await?;
    Ok(schedulable_nodes(list.items))
}

pub fn schedulable_nodes(nodes: Vec<Node>) -> Vec<Node> {
    nodes
        .into_iter()
        .filter(|node| {
            !node
                .labels()
                .get("kubernetes.io/hostname")
                .map(|h| h.ends_with("control-plane"))
                .unwrap_or(false)
        })
        .collect()
}

pub async fn namespace_exists(client: &Client, namespace: &str) -> Result<bool> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    Ok(namespaces.get_opt(namespace).await?.is_some())
}

/// Namespace created with `generateName: ns-`; deleted when dropped.
pub struct NamespaceGuard {
    name: String,
    client: Client,
}

impl NamespaceGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        let name = self.name.clone();
        let client = self.client.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let api: Api<Namespace> = Api::all(client);
                    match api.delete(&name, &DeleteParams::default()).await {
                        Ok(_) => info!(namespace = %name, "deleted namespace"),
                        Err(e) => warn!(
                            namespace = %name,
                            error = %e,
                            "cannot delete namespace"
                        ),
                    }
                });
            }
            Err(_) => {
                warn!(namespace = %name, "no runtime left, namespace not deleted")
            }
        }
    }
}

pub async fn new_namespace(client: &Client) -> Result<NamespaceGuard> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: kube::core::ObjectMeta {
            generate_name: Some("ns-".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let created = api.create(&PostParams::default(), &ns).await?;
    let name = created.name_any();
    info!(namespace = %name, "created namespace");
    Ok(NamespaceGuard {
        name,
        client: client.clone(),
    })
}

/// Delete every pod, deployment and daemonset left in `namespace`.
pub async fn clean_namespace(kubectl: &Kubectl, namespace: &str) -> Result<()> {
    kubectl
        .run([
            "delete",
            "deployments,daemonsets,pods",
            "--all",
            "-n",
            namespace,
            "--now",
        ])
        .await
}

/// Fail when any container in `namespace` restarted.
pub async fn no_restarts(client: &Client, namespace: &str) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = pods.list(&ListParams::default()).await?;
    check_no_restarts(&list.items)
}

pub fn check_no_restarts(pods: &[Pod]) -> Result<()> {
    for pod in pods {
        let statuses = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref());
        for status in statuses.into_iter().flatten() {
            if status.restart_count == 0 {
                continue;
            }
            let reason = status
                .last_state
                .as_ref()
                .and_then(|s| s.terminated.as_ref())
                .and_then(|t| t.reason.clone())
                .unwrap_or_default();
            return Err(Error::Restarted {
                pod: pod.name_any(),
                container: status.name.clone(),
                count: status.restart_count,
                reason,
            });
        }
    }
    Ok(())
}
