//! Excluded-prefixes reconciliation: what the collector should publish given
//! the cluster, env and user layers, and polling until it does.

pub mod config;
pub mod convergence;
pub mod error;
pub mod layers;
pub mod observe;
pub mod reconciler;
pub mod set;

pub use config::{CollectorConfig, Normalization};
pub use convergence::{
    compute_expected, expect_never_ready, normalize, wait_for_convergence,
};
pub use error::{PrefixError, Result};
pub use layers::{
    EXCLUDED_PREFIXES_ENV, PREFIXES_FILE_NAME, UserConfig,
    compute_cluster_prefixes, env_prefixes, load_config_map,
    parse_cluster_configuration, user_prefixes, with_env_prefixes,
};
pub use observe::{PrefixFileTarget, clear_prefixes, observe_prefixes};
pub use reconciler::Reconciler;
pub use set::PrefixSet;
