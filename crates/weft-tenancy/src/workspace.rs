//! ClusterWorkspace Custom Resource Definitions
//!
//! A ClusterWorkspace is the declarative record of a logical cluster: which
//! type it was created from, which shard serves it, and how far through its
//! lifecycle it has progressed. Workspaces are cluster-scoped; the workspace
//! tree structure comes from the colon-delimited names, not from namespaces.

use std::collections::BTreeMap;

use k8s_openapi::api::authentication::v1::UserInfo;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use weft_common::ClusterName;

/// An opaque token whose removal gates a workspace's transition to Ready.
pub type Initializer = String;

/// Specification for a ClusterWorkspace
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tenancy.kcp.dev",
    version = "v1alpha1",
    kind = "ClusterWorkspace",
    plural = "clusterworkspaces",
    shortname = "cw",
    status = "ClusterWorkspaceStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type.name"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.baseURL"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterWorkspaceSpec {
    /// Reference to the workspace type this workspace was created from.
    /// Immutable after creation.
    #[serde(rename = "type")]
    pub workspace_type: WorkspaceTypeReference,

    /// Constraint on which shard serves the workspace. Omission means any
    /// shard; when present, exactly one of `name` and `selector` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardConstraint>,
}

/// Reference to a ClusterWorkspaceType by name and workspace path
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceTypeReference {
    /// Name of the ClusterWorkspaceType object
    pub name: String,

    /// Logical cluster the type object lives in (e.g. `root:org`)
    #[serde(default, skip_serializing_if = "ClusterName::is_empty")]
    pub path: ClusterName,
}

impl std::fmt::Display for WorkspaceTypeReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}:{}", self.path, self.name)
        }
    }
}

/// Shard placement constraint: a concrete shard name or a label selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShardConstraint {
    /// Name of a specific shard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Label selector over shards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

/// Lifecycle phase of a ClusterWorkspace.
///
/// Phases are forward-only: the declaration order is the legal order and
/// the derived `Ord` is what admission checks transitions against.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum WorkspacePhase {
    /// Waiting for a shard assignment
    #[default]
    Scheduling,
    /// Assigned; initializers still present
    Initializing,
    /// Fully served; initializers drained, URL published
    Ready,
}

impl std::fmt::Display for WorkspacePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduling => write!(f, "Scheduling"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Physical placement of a workspace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceLocation {
    /// Shard currently serving the workspace. Once set it may change but
    /// never become empty again.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current: String,

    /// Shard the workspace is being moved to, if a move is in flight
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
}

/// Status for a ClusterWorkspace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterWorkspaceStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: WorkspacePhase,

    /// Outstanding initializers; must drain before the phase reaches Ready
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initializers: Vec<Initializer>,

    /// Physical placement
    #[serde(default)]
    pub location: WorkspaceLocation,

    /// External URL of the workspace. Once set it may never become empty;
    /// required for phase Ready.
    #[serde(default, rename = "baseURL", skip_serializing_if = "String::is_empty")]
    pub base_url: String,
}

/// Specification for a ClusterWorkspaceType
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tenancy.kcp.dev",
    version = "v1alpha1",
    kind = "ClusterWorkspaceType",
    plural = "clusterworkspacetypes",
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterWorkspaceTypeSpec {
    /// Initializers stamped onto every new workspace of this type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initializers: Vec<Initializer>,
}

/// Identity of the user who created a workspace.
///
/// Serialized into the owner annotation. Field order is the canonical wire
/// order and `extra` is a BTreeMap so keys serialize sorted; the validation
/// side compares the annotation byte-for-byte against this serialization.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct OwnerInfo {
    /// Username of the creator
    pub username: String,
    /// UID of the creator
    pub uid: String,
    /// Groups of the creator
    pub groups: Vec<String>,
    /// Additional authentication attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl OwnerInfo {
    /// Canonical annotation value for this identity.
    pub fn to_annotation_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&UserInfo> for OwnerInfo {
    fn from(user: &UserInfo) -> Self {
        Self {
            username: user.username.clone().unwrap_or_default(),
            uid: user.uid.clone().unwrap_or_default(),
            groups: user.groups.clone().unwrap_or_default(),
            extra: user.extra.clone().unwrap_or_default(),
        }
    }
}
