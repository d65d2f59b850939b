//! Workspace admission
//!
//! Enforces the ClusterWorkspace contract on create and update: the owner
//! annotation is stamped from the caller identity, `spec.type` is immutable,
//! the phase machine only moves forward, and placement/URL fields never
//! regress to empty. All field-level failures for one request are aggregated
//! into a single rejection.

pub mod webhook;

use std::collections::HashSet;
use std::sync::Arc;

use k8s_openapi::api::authentication::v1::UserInfo;
use thiserror::Error;
use tracing::debug;

use weft_common::{ClusterName, OWNER_ANNOTATION};

use crate::workspace::{ClusterWorkspace, ClusterWorkspaceType, OwnerInfo, WorkspacePhase};

/// The resource plural this controller cares about; anything else is
/// passed through untouched.
pub const WORKSPACES_RESOURCE: &str = "clusterworkspaces";

/// Admission operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Object is being created
    Create,
    /// Object is being updated
    Update,
}

/// A single field-level validation failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Path of the offending field, e.g. `spec.type`
    pub field: String,
    /// Human-readable reason
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(FieldError::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced by workspace admission
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The object violates one or more invariants
    #[error("ClusterWorkspace {name:?} is invalid: {}", join_errors(.errors))]
    Invalid {
        /// Name of the rejected object
        name: String,
        /// All field failures found in this request
        errors: Vec<FieldError>,
    },

    /// The caller identity could not be serialized
    #[error("failed to serialize owner identity: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read-only index of known ClusterWorkspaceType objects, keyed by the
/// qualified `path:name`. Published once at startup; writers swap the Arc.
pub trait WorkspaceTypeIndex: Send + Sync {
    /// True if a type `name` exists in the logical cluster `path`.
    fn contains(&self, path: &ClusterName, name: &str) -> bool;
}

/// In-memory type index built from a fixed set of type objects
#[derive(Default)]
pub struct StaticTypeIndex {
    entries: HashSet<(String, String)>,
}

impl StaticTypeIndex {
    /// Build an index from `(path, type)` pairs.
    pub fn new<I>(types: I) -> Self
    where
        I: IntoIterator<Item = (ClusterName, ClusterWorkspaceType)>,
    {
        let entries = types
            .into_iter()
            .map(|(path, t)| (path.as_str().to_string(), t.metadata.name.unwrap_or_default()))
            .collect();
        Self { entries }
    }

    /// Register a type name under a logical cluster path.
    pub fn insert(&mut self, path: ClusterName, name: impl Into<String>) {
        self.entries.insert((path.as_str().to_string(), name.into()));
    }
}

impl WorkspaceTypeIndex for StaticTypeIndex {
    fn contains(&self, path: &ClusterName, name: &str) -> bool {
        self.entries
            .contains(&(path.as_str().to_string(), name.to_string()))
    }
}

/// The ClusterWorkspace admission controller
pub struct WorkspaceAdmission {
    types: Arc<dyn WorkspaceTypeIndex>,
}

impl WorkspaceAdmission {
    /// Create a controller backed by the given type index.
    pub fn new(types: Arc<dyn WorkspaceTypeIndex>) -> Self {
        Self { types }
    }

    /// Mutation phase. On create, stamps the owner annotation with the
    /// canonical JSON identity of the caller. Updates are left untouched.
    pub fn admit(
        &self,
        op: Operation,
        resource: &str,
        workspace: &mut ClusterWorkspace,
        user: &UserInfo,
    ) -> Result<(), AdmissionError> {
        if resource != WORKSPACES_RESOURCE || op != Operation::Create {
            return Ok(());
        }

        let owner = OwnerInfo::from(user);
        let value = owner.to_annotation_value()?;
        debug!(workspace = ?workspace.metadata.name, owner = %value, "stamping owner annotation");

        workspace
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(OWNER_ANNOTATION.to_string(), value);

        Ok(())
    }

    /// Validation phase. `old` is `None` on create. `cluster` is the logical
    /// cluster the request addressed; unqualified type references resolve
    /// against it.
    pub fn validate(
        &self,
        op: Operation,
        resource: &str,
        cluster: &ClusterName,
        old: Option<&ClusterWorkspace>,
        workspace: &ClusterWorkspace,
        user: &UserInfo,
    ) -> Result<(), AdmissionError> {
        if resource != WORKSPACES_RESOURCE {
            return Ok(());
        }

        let mut errors = Vec::new();

        match op {
            Operation::Create => {
                self.validate_create(cluster, workspace, user, &mut errors)?;
            }
            Operation::Update => {
                if let Some(old) = old {
                    validate_update(old, workspace, &mut errors);
                }
            }
        }

        validate_shard(workspace, &mut errors);
        validate_phase(op, old, workspace, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AdmissionError::Invalid {
                name: workspace.metadata.name.clone().unwrap_or_default(),
                errors,
            })
        }
    }

    fn validate_create(
        &self,
        cluster: &ClusterName,
        workspace: &ClusterWorkspace,
        user: &UserInfo,
        errors: &mut Vec<FieldError>,
    ) -> Result<(), AdmissionError> {
        // The owner annotation must be exactly what the mutation phase
        // stamps; anything else means the mutating plugin was bypassed.
        let expected = OwnerInfo::from(user).to_annotation_value()?;
        let actual = workspace
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(OWNER_ANNOTATION));
        if actual != Some(&expected) {
            errors.push(FieldError::new(
                format!("metadata.annotations[{OWNER_ANNOTATION}]"),
                format!("expected user annotation {OWNER_ANNOTATION}={expected}"),
            ));
        }

        let reference = &workspace.spec.workspace_type;
        let path = if reference.path.is_empty() {
            cluster.clone()
        } else {
            reference.path.clone()
        };
        if !self.types.contains(&path, &reference.name) {
            errors.push(FieldError::new(
                "spec.type",
                format!("ClusterWorkspaceType {}:{} does not exist", path, reference.name),
            ));
        }

        Ok(())
    }
}

fn validate_update(old: &ClusterWorkspace, new: &ClusterWorkspace, errors: &mut Vec<FieldError>) {
    if old.spec.workspace_type != new.spec.workspace_type {
        errors.push(FieldError::new("spec.type", "field is immutable"));
    }

    let owner = |ws: &ClusterWorkspace| {
        ws.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(OWNER_ANNOTATION))
            .cloned()
    };
    if owner(old) != owner(new) {
        errors.push(FieldError::new(
            format!("metadata.annotations[{OWNER_ANNOTATION}]"),
            "field is immutable",
        ));
    }

    let old_status = old.status.clone().unwrap_or_default();
    let new_status = new.status.clone().unwrap_or_default();

    if !old_status.location.current.is_empty() && new_status.location.current.is_empty() {
        errors.push(FieldError::new(
            "status.location.current",
            "cannot be unset",
        ));
    }

    if !old_status.base_url.is_empty() && new_status.base_url.is_empty() {
        errors.push(FieldError::new("status.baseURL", "cannot be unset"));
    }

    if new_status.phase < old_status.phase {
        errors.push(FieldError::new(
            "status.phase",
            format!(
                "cannot transition from {:?} to {:?}",
                old_status.phase.to_string(),
                new_status.phase.to_string()
            ),
        ));
    }
}

fn validate_shard(workspace: &ClusterWorkspace, errors: &mut Vec<FieldError>) {
    if let Some(shard) = &workspace.spec.shard {
        if shard.name.is_some() == shard.selector.is_some() {
            errors.push(FieldError::new(
                "spec.shard",
                "exactly one of name or selector must be set",
            ));
        }
    }
}

fn validate_phase(
    op: Operation,
    old: Option<&ClusterWorkspace>,
    new: &ClusterWorkspace,
    errors: &mut Vec<FieldError>,
) {
    let status = new.status.clone().unwrap_or_default();
    if status.phase != WorkspacePhase::Ready {
        return;
    }

    // Only gate the transition into Ready; an object already Ready has
    // these invariants enforced by the unset rules above.
    let entering_ready = match op {
        Operation::Create => true,
        Operation::Update => {
            old.and_then(|o| o.status.as_ref()).map(|s| s.phase) != Some(WorkspacePhase::Ready)
        }
    };
    if !entering_ready {
        return;
    }

    if !status.initializers.is_empty() {
        errors.push(FieldError::new(
            "status.initializers",
            "spec.initializers must be empty for phase Ready",
        ));
    }
    if status.base_url.is_empty() {
        errors.push(FieldError::new(
            "status.baseURL",
            "status.baseURL must be set for phase Ready",
        ));
    }
    if status.location.current.is_empty() {
        errors.push(FieldError::new(
            "status.location.current",
            "status.location.current must be set for phase Ready",
        ));
    }
}
