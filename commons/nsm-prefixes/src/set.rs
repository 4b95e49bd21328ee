use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::{PrefixError, Result};

/// Ordered, de-duplicated list of CIDR strings.
///
/// Insertion order is kept so a merged set serializes the same way every
/// time, while equality ignores order: two sets are equal when they hold the
/// same prefixes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefixSet {
    prefixes: Vec<String>,
}

/// On-disk shape of the collector output and of the user config payload.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PrefixesDocument {
    #[serde(rename = "Prefixes", alias = "prefixes", default)]
    prefixes: Option<Vec<String>>,
}

impl PrefixSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a prefix; returns false when it was already present or blank.
    pub fn insert(&mut self, prefix: impl AsRef<str>) -> bool {
        let prefix = prefix.as_ref().trim();
        if prefix.is_empty() || self.contains(prefix) {
            return false;
        }
        self.prefixes.push(prefix.to_string());
        true
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.prefixes.iter().any(|p| p == prefix)
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.prefixes
    }

    pub fn join(&self, sep: &str) -> String {
        self.prefixes.join(sep)
    }

    /// Parse every entry as a CIDR network.
    pub fn networks(&self) -> Result<Vec<IpNet>> {
        self.prefixes
            .iter()
            .map(|p| {
                IpNet::from_str(p).map_err(|e| PrefixError::InvalidPrefix {
                    prefix: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.networks().map(|_| ())
    }

    /// Minimal covering set: overlapping and adjacent ranges are merged, so
    /// `0.0.0.0/1` and `128.0.0.0/1` become `0.0.0.0/0`. Output is sorted by
    /// address, IPv4 before IPv6.
    pub fn coalesce(&self) -> Result<PrefixSet> {
        let networks = self.networks()?;
        Ok(IpNet::aggregate(&networks)
            .into_iter()
            .map(|n| n.to_string())
            .collect())
    }

    /// Decode the `Prefixes:` YAML document. An empty document is an empty
    /// set.
    pub fn from_yaml(raw: &str) -> Result<PrefixSet> {
        if raw.trim().is_empty() {
            return Ok(PrefixSet::new());
        }
        let doc: PrefixesDocument =
            serde_yaml::from_str(raw).map_err(|source| PrefixError::Decode {
                what: "prefixes document".to_string(),
                source,
            })?;
        Ok(doc.prefixes.unwrap_or_default().into_iter().collect())
    }

    pub fn to_yaml(&self) -> String {
        let doc = PrefixesDocument {
            prefixes: Some(self.prefixes.clone()),
        };
        serde_yaml::to_string(&doc).unwrap_or_default()
    }
}

impl PartialEq for PrefixSet {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let ours: HashSet<&str> = self.iter().collect();
        other.iter().all(|p| ours.contains(p))
    }
}

impl Eq for PrefixSet {}

impl<S: AsRef<str>> FromIterator<S> for PrefixSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = PrefixSet::new();
        set.extend(iter);
        set
    }
}

impl<S: AsRef<str>> Extend<S> for PrefixSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for p in iter {
            self.insert(p);
        }
    }
}

impl fmt::Display for PrefixSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.prefixes.join(", "))
    }
}
