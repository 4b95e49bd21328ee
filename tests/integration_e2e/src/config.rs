use envconfig::Envconfig;

#[derive(Envconfig, Debug, Clone)]
pub struct SuiteConfig {
    #[envconfig(
        from = "NSM_E2E_DEPLOYMENTS_REPO",
        default = "https://github.com/networkservicemesh/deployments-k8s.git"
    )]
    pub deployments_repo: String,

    #[envconfig(from = "NSM_E2E_DEPLOYMENTS_VERSION", default = "main")]
    pub deployments_version: String,

    /// Where the deployments repository is checked out, relative to the
    /// workspace root unless absolute.
    #[envconfig(from = "NSM_E2E_DEPLOYMENTS_DIR", default = "target/deployments-k8s")]
    pub deployments_dir: String,

    #[envconfig(from = "NSM_E2E_KIND_CLUSTER", default = "kind")]
    pub cluster_name: String,

    #[envconfig(from = "NSM_E2E_NO_CLEANUP", default = "false")]
    pub no_cleanup: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let cfg = SuiteConfig::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(cfg.deployments_version, "main");
        assert_eq!(cfg.cluster_name, "kind");
        assert!(!cfg.no_cleanup);
    }
}
