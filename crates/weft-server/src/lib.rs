//! Request-dispatch pipeline for the weft control plane
//!
//! A weft shard re-exposes a Kubernetes-style API multiplexed over logical
//! clusters (workspaces). This crate is the front half of that: the handler
//! chain that resolves `(cluster, verb, resource, identity)` from each
//! request, the core-group discovery merger, and the virtual-workspace
//! authorization dispatch.
//!
//! # Request flow
//!
//! ```text
//! client ──► handler chain ──► core-group fork (/api/v1)
//!            (cluster scope,   ├── CRD handler
//!             wildcard guard,  └── native handler
//!             identity, ...)   /services/<vw>/ ──► per-vw authorizer
//! ```

#![deny(missing_docs)]

pub mod authorizer;
pub mod buffer;
pub mod chain;
pub mod context;
pub mod discovery;
pub mod request_info;
pub mod server;
pub mod status;

pub use authorizer::{Attributes, Authorizer, AuthorizerError, Decision, VirtualWorkspaceAuthorizer};
pub use buffer::ResponseBuffer;
pub use context::{
    AcceptHeader, AuditAnnotations, ClusterAttachment, ResourceIdentity, UserAgent,
    VirtualWorkspaceName,
};
pub use discovery::{CoreDiscovery, CrdLister, DirectHandler, StaticCrdLister};
pub use request_info::RequestInfo;
pub use server::{build_router, build_router_with, start_server, AppState, ServerConfig, ServerError};
pub use status::ApiError;
