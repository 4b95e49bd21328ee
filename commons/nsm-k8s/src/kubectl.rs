use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument};

use crate::{Error, KUBECONFIG_ENV, Result};

/// Run `program args...` on the blocking pool and return captured stdout.
///
/// A non-zero exit status becomes [`Error::Command`] carrying stderr.
pub async fn run_capture(
    program: &str,
    args: Vec<OsString>,
    envs: Vec<(String, OsString)>,
    dir: Option<PathBuf>,
) -> Result<String> {
    let cmdline = render(program, &args);
    let program = program.to_string();
    let output = tokio::task::spawn_blocking(move || {
        let mut expr = duct::cmd(program, args)
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        for (k, v) in envs {
            expr = expr.env(k, v);
        }
        if let Some(dir) = dir {
            expr = expr.dir(dir);
        }
        expr.run()
    })
    .await
    .map_err(std::io::Error::other)??;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        return Err(Error::Command {
            cmd: cmdline,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    debug!(cmd = %cmdline, "{}", stdout.trim_end());
    Ok(stdout)
}

fn render(program: &str, args: &[OsString]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Thin wrapper over the `kubectl` binary bound to one kubeconfig.
///
/// The kubeconfig is handed to each child process through its environment,
/// so switching clusters never touches the parent's `KUBECONFIG`.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: String,
    kubeconfig: Option<PathBuf>,
}

impl Default for Kubectl {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            kubeconfig: None,
        }
    }
}

impl Kubectl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn kubeconfig(&self) -> Option<&Path> {
        self.kubeconfig.as_deref()
    }

    pub async fn output<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let envs = self
            .kubeconfig
            .iter()
            .map(|p| (KUBECONFIG_ENV.to_string(), p.clone().into_os_string()))
            .collect();
        run_capture(
            &self.binary,
            args.into_iter().map(Into::into).collect(),
            envs,
            None,
        )
        .await
    }

    pub async fn run<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.output(args).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn apply_file(&self, path: &Path) -> Result<()> {
        self.run([
            OsString::from("apply"),
            "-f".into(),
            path.as_os_str().to_owned(),
        ])
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete_file(&self, path: &Path, now: bool) -> Result<()> {
        let mut args = vec![
            OsString::from("delete"),
            "-f".into(),
            path.as_os_str().to_owned(),
        ];
        if now {
            args.push("--now".into());
        }
        self.run(args).await
    }

    /// `kubectl delete <kind> -n <ns> -l <selector> --now`
    pub async fn delete_selected(
        &self,
        namespace: &str,
        kind: &str,
        selector: &str,
    ) -> Result<()> {
        self.run(["delete", kind, "-n", namespace, "-l", selector, "--now"])
            .await
    }

    pub async fn delete_named(
        &self,
        namespace: &str,
        kind: &str,
        name: &str,
    ) -> Result<()> {
        self.run(["delete", kind, "-n", namespace, name]).await
    }

    /// Copy `remote` (file or directory) out of a pod into `local`.
    pub async fn cp_from_pod(
        &self,
        namespace: &str,
        pod: &str,
        remote: &str,
        local: &Path,
    ) -> Result<()> {
        self.run([
            OsString::from("cp"),
            "-n".into(),
            namespace.into(),
            format!("{pod}:{remote}").into(),
            local.as_os_str().to_owned(),
        ])
        .await
    }

    /// `kubectl exec -n <ns> <pod> -- <command...>`
    pub async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        command: &[&str],
    ) -> Result<String> {
        let mut args = vec!["exec", "-n", namespace, pod, "--"];
        args.extend_from_slice(command);
        self.output(args).await
    }

    pub async fn wait_ready(
        &self,
        namespace: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.run([
            "wait".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            format!("--timeout={}s", timeout.as_secs()),
            "--for=condition=ready".to_string(),
            "pod".to_string(),
            "-l".to_string(),
            selector.to_string(),
        ])
        .await
    }

    pub async fn logs(&self, namespace: &str, selector: &str) -> Result<String> {
        self.output(["logs", "-l", selector, "-n", namespace]).await
    }

    pub async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String> {
        self.output(["logs", "-n", namespace, pod, "-c", container])
            .await
    }
}
