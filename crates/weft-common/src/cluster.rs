//! Logical cluster names
//!
//! A logical cluster (workspace) is addressed by a colon-delimited
//! hierarchical name such as `root:org:team`. Two tokens are reserved:
//! the root cluster `root` and the wildcard `*`, which addresses all
//! workspaces on a shard at once and is only valid for list/watch.

use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Valid cluster names: colon-separated DNS-1123-style segments.
static RE_CLUSTER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z]([a-z0-9-]{0,61}[a-z0-9])?:)*[a-z]([a-z0-9-]{0,61}[a-z0-9])?$")
        .expect("cluster name regex must compile")
});

/// The wildcard cluster name, addressing all workspaces on a shard.
pub const WILDCARD: &str = "*";

/// The root cluster name, the top of the workspace tree.
pub const ROOT: &str = "root";

/// The cluster used when a request carries no cluster at all.
pub const LOCAL_ADMIN: &str = "system:admin";

/// Error produced when a cluster name fails validation.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid cluster: {0:?} does not match the regex")]
pub struct InvalidClusterName(pub String);

/// A logical cluster name.
///
/// The inner string is either a validated hierarchical name, one of the
/// reserved tokens, or empty (the not-yet-resolved zero value).
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ClusterName(String);

impl ClusterName {
    /// Wrap a string without validating it. Use [`ClusterName::parse`] for
    /// names coming off the wire.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The root cluster.
    pub fn root() -> Self {
        Self(ROOT.to_string())
    }

    /// The wildcard cluster.
    pub fn wildcard() -> Self {
        Self(WILDCARD.to_string())
    }

    /// The local-admin cluster that empty names resolve to.
    pub fn local_admin() -> Self {
        Self(LOCAL_ADMIN.to_string())
    }

    /// Validate a wire-format name. Reserved tokens are accepted as-is;
    /// anything else must match the cluster-name regex.
    pub fn parse(name: &str) -> Result<Self, InvalidClusterName> {
        if name == WILDCARD || name == ROOT {
            return Ok(Self(name.to_string()));
        }
        if RE_CLUSTER_NAME.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(InvalidClusterName(name.to_string()))
        }
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the unresolved zero value.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True for the wildcard cluster `*`.
    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    /// True for the root cluster.
    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    /// Split `root:org:team` into the parent path `root:org` and the leaf
    /// `team`. A single-segment name has an empty parent.
    pub fn split(&self) -> (ClusterName, &str) {
        match self.0.rfind(':') {
            Some(i) => (ClusterName::new(&self.0[..i]), &self.0[i + 1..]),
            None => (ClusterName::default(), &self.0),
        }
    }

    /// Append a child segment, producing `self:child`.
    pub fn join(&self, child: &str) -> ClusterName {
        if self.0.is_empty() {
            ClusterName::new(child)
        } else {
            ClusterName::new(format!("{}:{}", self.0, child))
        }
    }
}

impl std::fmt::Display for ClusterName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClusterName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
