//! Typed request-context carriers
//!
//! Every piece of cross-cutting per-request state travels as a typed value
//! in the request's `http::Extensions`. The types double as the context
//! keys, so collisions with other middleware are impossible at compile
//! time. Getters return the zero value when a carrier is absent; only the
//! handler chain inserts.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::http::Extensions;

use weft_common::ClusterName;

/// The verbatim `Accept` header of the request.
///
/// Wildcard requests inspect it to decide whether the caller asked for
/// partial object metadata, which relaxes cross-workspace schema checks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcceptHeader(pub String);

/// The verbatim `User-Agent` header of the request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserAgent(pub String);

/// The logical cluster a request is attached to.
///
/// Invariants after the chain: `wildcard` iff `name == "*"`, and `name` is
/// never empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterAttachment {
    /// Resolved cluster name
    pub name: ClusterName,
    /// True when the request spans all workspaces on the shard
    pub wildcard: bool,
    /// True when the Accept header asked for PartialObjectMetadata
    pub partial_metadata_request: bool,
}

/// The API-export identity qualifier split off a wildcard resource path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceIdentity(pub String);

/// Name of the virtual workspace a `/services/` path resolved to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VirtualWorkspaceName(pub String);

/// Request-scoped mutable audit annotations.
///
/// The map is shared between chain layers of one request and never across
/// requests, so a plain mutex is enough.
#[derive(Clone, Debug, Default)]
pub struct AuditAnnotations(Arc<Mutex<BTreeMap<String, String>>>);

impl AuditAnnotations {
    /// Record an annotation. Later writes win.
    pub fn add(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut map) = self.0.lock() {
            map.insert(key.into(), value.into());
        }
    }

    /// Copy of the current annotations.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.0.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

/// Accept header stored by the chain, or empty.
pub fn accept_header_from(extensions: &Extensions) -> AcceptHeader {
    extensions.get::<AcceptHeader>().cloned().unwrap_or_default()
}

/// User agent stored by the chain, or empty.
pub fn user_agent_from(extensions: &Extensions) -> UserAgent {
    extensions.get::<UserAgent>().cloned().unwrap_or_default()
}

/// Cluster attachment, present after the cluster-scope layer ran.
pub fn cluster_from(extensions: &Extensions) -> Option<ClusterAttachment> {
    extensions.get::<ClusterAttachment>().cloned()
}

/// Resource identity split off a wildcard request, or empty.
pub fn identity_from(extensions: &Extensions) -> ResourceIdentity {
    extensions
        .get::<ResourceIdentity>()
        .cloned()
        .unwrap_or_default()
}

/// Virtual workspace name resolved from a `/services/` path, or empty.
pub fn virtual_workspace_from(extensions: &Extensions) -> VirtualWorkspaceName {
    extensions
        .get::<VirtualWorkspaceName>()
        .cloned()
        .unwrap_or_default()
}

/// Audit annotation map, present after the audit layer ran.
pub fn audit_annotations_from(extensions: &Extensions) -> Option<AuditAnnotations> {
    extensions.get::<AuditAnnotations>().cloned()
}

/// True when an Accept header asks for a PartialObjectMetadata rendering.
pub fn is_partial_metadata_accept(accept: &str) -> bool {
    accept
        .split(',')
        .flat_map(|clause| clause.split(';'))
        .map(str::trim)
        .any(|param| {
            param == "as=PartialObjectMetadata" || param == "as=PartialObjectMetadataList"
        })
}
