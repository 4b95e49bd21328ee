use std::collections::HashMap;
use std::ffi::OsString;
use std::sync::{Arc, Mutex};

use tracing::{info, instrument};

use crate::{Result, run_capture};

/// Loads locally built images into a kind cluster, once per image name.
///
/// Each image gets its own async lock, so concurrent suites asking for the
/// same image wait for the first load while different images proceed in
/// parallel.
pub struct KindImages {
    cluster: String,
    program: String,
    loaded: Mutex<HashMap<String, Arc<tokio::sync::Mutex<bool>>>>,
}

impl KindImages {
    pub fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            program: "kind".to_string(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    fn slot(&self, image: &str) -> Arc<tokio::sync::Mutex<bool>> {
        let mut loaded = self
            .loaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loaded.entry(image.to_string()).or_default().clone()
    }

    /// Make sure every image is present in the cluster.
    pub async fn require(&self, images: &[&str]) -> Result<()> {
        for image in images {
            self.load(image).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(cluster = %self.cluster))]
    pub async fn load(&self, image: &str) -> Result<bool> {
        let slot = self.slot(image);
        let mut done = slot.lock().await;
        if *done {
            return Ok(false);
        }
        let args: Vec<OsString> = vec![
            "load".into(),
            "docker-image".into(),
            image.into(),
            "--name".into(),
            self.cluster.clone().into(),
        ];
        run_capture(&self.program, args, Vec::new(), None).await?;
        *done = true;
        info!("loaded image {image}");
        Ok(true)
    }

    pub fn is_loaded(&self, image: &str) -> bool {
        self.slot(image)
            .try_lock()
            .map(|done| *done)
            .unwrap_or(false)
    }
}
