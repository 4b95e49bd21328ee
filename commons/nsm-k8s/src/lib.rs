// Kubernetes helpers for the NSM integration suites.

pub mod apply;
pub mod client;
pub mod error;
pub mod kind;
pub mod kubectl;
pub mod pods;

pub use apply::{
    DEFAULT_NAMESPACE, Mutator, PodTemplateOwner, append_env, apply_daemonset,
    apply_deployment, apply_manifest, read_manifest, set_namespace, set_node,
};
pub use client::{
    KUBECONFIG_ENV, SharedClient, connect, kubeconfig_path, kubeconfig_path_from,
};
pub use error::{Error, Result};
pub use kind::KindImages;
pub use kubectl::{Kubectl, run_capture};
