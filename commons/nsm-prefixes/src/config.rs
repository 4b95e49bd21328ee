use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

/// How expected and observed sets are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    /// Both sides are reduced to their minimal covering set first.
    #[default]
    Coalesce,
    /// Entries are compared as written.
    Verbatim,
}

impl FromStr for Normalization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coalesce" => Ok(Normalization::Coalesce),
            "verbatim" => Ok(Normalization::Verbatim),
            other => Err(format!("unknown normalization mode: {other}")),
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Normalization::Coalesce => f.write_str("coalesce"),
            Normalization::Verbatim => f.write_str("verbatim"),
        }
    }
}

#[derive(Envconfig, Debug, Clone)]
pub struct CollectorConfig {
    #[envconfig(
        from = "PREFIXES_COLLECTOR_NAMESPACE",
        default = "excluded-prefixes-collector"
    )]
    pub namespace: String,

    #[envconfig(
        from = "PREFIXES_COLLECTOR_APP",
        default = "excluded-prefixes-collector"
    )]
    pub collector_app: String,

    /// Label value of the pod sharing the collector's output volume.
    #[envconfig(from = "PREFIXES_READER_APP", default = "alpine")]
    pub reader_app: String,

    #[envconfig(
        from = "PREFIXES_CONFIG_DIR",
        default = "var/lib/networkservicemesh/config"
    )]
    pub config_dir: String,

    #[envconfig(from = "PREFIXES_FILE_NAME", default = "excluded_prefixes.yaml")]
    pub file_name: String,

    #[envconfig(from = "PREFIXES_TIMEOUT_SECS", default = "15")]
    pub timeout_secs: u64,

    #[envconfig(from = "PREFIXES_POLL_INTERVAL_SECS", default = "1")]
    pub poll_interval_secs: u64,

    #[envconfig(from = "PREFIXES_NORMALIZATION", default = "coalesce")]
    pub normalization: Normalization,
}

impl CollectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Path of the prefix file inside the reader pod.
    pub fn remote_file(&self) -> String {
        format!(
            "{}/{}",
            self.config_dir.trim_end_matches('/'),
            self.file_name
        )
    }
}
