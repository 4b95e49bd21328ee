use std::path::{Path, PathBuf};

use kube::{
    Client,
    config::{KubeConfigOptions, Kubeconfig},
};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{Error, Result};

/// Environment variable holding an explicit kubeconfig path.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Resolve the kubeconfig path: `$KUBECONFIG` when set and non-empty,
/// otherwise `$HOME/.kube/config`.
pub fn kubeconfig_path() -> PathBuf {
    kubeconfig_path_from(|key| std::env::var(key).ok())
}

pub fn kubeconfig_path_from<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(KUBECONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => {
            let home = lookup("HOME").unwrap_or_default();
            Path::new(&home).join(".kube").join("config")
        }
    }
}

/// Build a client from an explicit kubeconfig file.
pub async fn connect(path: &Path) -> Result<Client> {
    debug!(path = %path.display(), "building kube client");
    let kubeconfig =
        Kubeconfig::read_from(path).map_err(|source| Error::Kubeconfig {
            path: path.to_path_buf(),
            source,
        })?;
    let config = kube::Config::from_custom_kubeconfig(
        kubeconfig,
        &KubeConfigOptions::default(),
    )
    .await
    .map_err(|source| Error::Kubeconfig {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Client::try_from(config)?)
}

/// Lazily constructed client shared by everything built from the same
/// handle. Concurrent first callers wait on a single initialization.
#[derive(Default)]
pub struct SharedClient {
    path: Option<PathBuf>,
    cell: OnceCell<Client>,
}

impl SharedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the kubeconfig instead of resolving it on first use.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Client> {
        let client = self
            .cell
            .get_or_try_init(|| async {
                let path =
                    self.path.clone().unwrap_or_else(kubeconfig_path);
                connect(&path).await
            })
            .await?;
        Ok(client.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}
