//! ClusterWorkspace API types and admission
//!
//! The tenancy API models logical clusters as declarative
//! `ClusterWorkspace` objects: a type reference, a shard constraint, and a
//! forward-only lifecycle (`Scheduling` -> `Initializing` -> `Ready`). This
//! crate holds the CRD types plus the admission controller that stamps
//! provenance and enforces the lifecycle invariants.

#![deny(missing_docs)]

pub mod admission;
pub mod workspace;

pub use admission::{
    AdmissionError, FieldError, Operation, StaticTypeIndex, WorkspaceAdmission,
    WorkspaceTypeIndex,
};
pub use workspace::{
    ClusterWorkspace, ClusterWorkspaceSpec, ClusterWorkspaceStatus, ClusterWorkspaceType,
    ClusterWorkspaceTypeSpec, Initializer, OwnerInfo, ShardConstraint, WorkspaceLocation,
    WorkspacePhase, WorkspaceTypeReference,
};
