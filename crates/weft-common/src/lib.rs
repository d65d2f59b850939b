//! Shared building blocks for the weft control plane
//!
//! weft re-exposes a Kubernetes-style declarative API as a tree of logical
//! clusters (workspaces) served out of one or more physical shards. This
//! crate holds the pieces every other crate needs: the logical cluster
//! name type and telemetry setup.

#![deny(missing_docs)]

pub mod cluster;
pub mod telemetry;

pub use cluster::{ClusterName, InvalidClusterName};

/// Audit annotation key recording which workspace served a request.
pub const WORKSPACE_ANNOTATION: &str = "tenancy.kcp.dev/workspace";

/// Annotation key carrying the JSON identity of a workspace's creator.
pub const OWNER_ANNOTATION: &str = "tenancy.kcp.dev/owner";

/// Header addressing a logical cluster without a `/clusters/` URL prefix.
pub const CLUSTER_HEADER: &str = "X-Kubernetes-Cluster";

/// Header marking a request that was fanned out by a shard to its peers.
pub const SHARDED_REQUEST_HEADER: &str = "X-Kubernetes-Sharded-Request";

/// Private header once used to break discovery self-recursion. Clients must
/// never set it and it must never leave the process; the chain strips it on
/// ingress and the front proxy refuses to forward it.
pub const DISCOVERY_PASSTHROUGH_HEADER: &str = "X-Kcp-Api-V1-Discovery-Passthrough";
