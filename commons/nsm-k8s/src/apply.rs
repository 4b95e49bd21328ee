use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{EnvVar, PodSpec};
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{Patch, PatchParams},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::info;

use crate::{Error, Result};

/// Namespace used when a manifest does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

const FIELD_MANAGER: &str = "nsm-integration";

/// In-place edit applied to a decoded manifest before it is submitted.
pub type Mutator<T> = Box<dyn FnOnce(&mut T) + Send>;

/// Workload kinds whose pod template can be edited by the shared mutators.
pub trait PodTemplateOwner {
    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec>;
}

impl PodTemplateOwner for Deployment {
    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut().and_then(|s| s.template.spec.as_mut())
    }
}

impl PodTemplateOwner for DaemonSet {
    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut().and_then(|s| s.template.spec.as_mut())
    }
}

pub fn read_manifest<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&raw).map_err(|source| Error::Manifest {
        path: path.to_path_buf(),
        source,
    })
}

pub fn mutate<T>(obj: &mut T, mutators: Vec<Mutator<T>>) {
    for m in mutators {
        m(obj);
    }
}

/// Equivalent of `kubectl apply -f path` with the decoded object edited by
/// `mutators` first. Submitted through server-side apply.
pub async fn apply_manifest<T>(
    client: Client,
    path: &Path,
    mutators: Vec<Mutator<T>>,
) -> Result<T>
where
    T: Resource<Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
    T::DynamicType: Default,
{
    let mut obj: T = read_manifest(path)?;
    mutate(&mut obj, mutators);
    if obj.meta().namespace.as_deref().unwrap_or_default().is_empty() {
        obj.meta_mut().namespace = Some(DEFAULT_NAMESPACE.to_string());
    }
    let ns = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let api: Api<T> = Api::namespaced(client, &ns);
    let applied = api
        .patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&obj),
        )
        .await?;
    info!(namespace = %ns, name = %name, "applied {}", path.display());
    Ok(applied)
}

pub async fn apply_deployment(
    client: Client,
    path: &Path,
    mutators: Vec<Mutator<Deployment>>,
) -> Result<Deployment> {
    apply_manifest(client, path, mutators).await
}

pub async fn apply_daemonset(
    client: Client,
    path: &Path,
    mutators: Vec<Mutator<DaemonSet>>,
) -> Result<DaemonSet> {
    apply_manifest(client, path, mutators).await
}

pub fn set_namespace<T: Resource + 'static>(namespace: &str) -> Mutator<T> {
    let namespace = namespace.to_string();
    Box::new(move |obj: &mut T| {
        obj.meta_mut().namespace = Some(namespace);
    })
}

/// Pin the pod template to one node through `kubernetes.io/hostname`.
pub fn set_node<T: PodTemplateOwner + 'static>(node: &str) -> Mutator<T> {
    let node = node.to_string();
    Box::new(move |obj: &mut T| {
        if let Some(spec) = obj.pod_spec_mut() {
            spec.node_selector = Some(BTreeMap::from([(
                "kubernetes.io/hostname".to_string(),
                node,
            )]));
        }
    })
}

/// Append an env var to the first container of the pod template.
pub fn append_env<T: PodTemplateOwner + 'static>(
    name: &str,
    value: &str,
) -> Mutator<T> {
    let var = EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    };
    Box::new(move |obj: &mut T| {
        if let Some(container) = obj
            .pod_spec_mut()
            .and_then(|spec| spec.containers.first_mut())
        {
            container.env.get_or_insert_with(Vec::new).push(var);
        }
    })
}
