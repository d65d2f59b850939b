//! The request handler chain
//!
//! A fixed stack of middleware layers that parses a request URL into a
//! `(cluster, verb, resource, identity)` tuple, enriches the request
//! extensions, and enforces the per-mode invariants before a request
//! reaches a terminal handler. Layers are pure transformers over
//! `(request, extensions)`: no layer reads the clock, so the same request
//! always produces the same context.
//!
//! Composition order (outer first):
//!
//! 1. private-header guard
//! 2. accept header
//! 3. user agent
//! 4. in-cluster service-account rewrite
//! 5. cluster scope
//! 6. audit annotations
//! 7. cluster annotation
//! 8. workspace projection
//! 9. request info
//! 10. wildcard list/watch guard
//! 11. wildcard identity
//!
//! The cluster-scope layer reads the accept-header carrier for
//! partial-metadata detection, so the accept layer must stay outside it.

use axum::extract::Request;
use axum::http::uri::{PathAndQuery, Uri};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use percent_encoding::percent_decode_str;
use tracing::debug;

use weft_common::{
    ClusterName, CLUSTER_HEADER, DISCOVERY_PASSTHROUGH_HEADER, SHARDED_REQUEST_HEADER,
    WORKSPACE_ANNOTATION,
};

use crate::context::{
    accept_header_from, audit_annotations_from, cluster_from, is_partial_metadata_accept,
    AcceptHeader, AuditAnnotations, ClusterAttachment, ResourceIdentity, UserAgent,
};
use crate::request_info::{self, RequestInfo};
use crate::status::ApiError;

/// URL prefix addressing a logical cluster.
pub const CLUSTERS_PREFIX: &str = "/clusters/";

/// The workspaces virtual resource projected into every workspace.
const WORKSPACES_RESOURCE_PATH: &str = "/apis/tenancy.kcp.dev/v1beta1/workspaces";

/// Attach the full chain to a router, outermost layer first.
pub fn apply(router: Router) -> Router {
    // axum runs the most recently added layer first, so the stack is
    // attached in reverse of the documented order.
    router
        .layer(middleware::from_fn(with_wildcard_identity))
        .layer(middleware::from_fn(with_wildcard_guard))
        .layer(middleware::from_fn(with_request_info))
        .layer(middleware::from_fn(with_workspace_projection))
        .layer(middleware::from_fn(with_cluster_annotation))
        .layer(middleware::from_fn(with_audit_annotations))
        .layer(middleware::from_fn(with_cluster_scope))
        .layer(middleware::from_fn(with_service_account_rewrite))
        .layer(middleware::from_fn(with_user_agent))
        .layer(middleware::from_fn(with_accept_header))
        .layer(middleware::from_fn(with_private_headers))
}

/// Drop private headers a client must never set.
pub async fn with_private_headers(mut req: Request, next: Next) -> Response {
    req.headers_mut().remove(DISCOVERY_PASSTHROUGH_HEADER);
    next.run(req).await
}

/// Store the `Accept` header verbatim in the request extensions.
///
/// Wildcard requests need it later to decide whether a common CRD schema is
/// required or a PartialObjectMetadata rendering weakens that requirement.
pub async fn with_accept_header(mut req: Request, next: Next) -> Response {
    let accept = header_string(&req, axum::http::header::ACCEPT.as_str());
    req.extensions_mut().insert(AcceptHeader(accept));
    next.run(req).await
}

/// Store the `User-Agent` header in the request extensions.
pub async fn with_user_agent(mut req: Request, next: Next) -> Response {
    let agent = header_string(&req, axum::http::header::USER_AGENT.as_str());
    req.extensions_mut().insert(UserAgent(agent));
    next.run(req).await
}

/// Prefix `/clusters/<name>` for in-cluster service accounts.
///
/// In-cluster clients cannot be configured with a URL prefix, but their
/// bearer tokens carry the logical cluster in a claim. The token is parsed
/// without signature verification here; the downstream authenticator
/// verifies it, and no authorization decision may be derived from the
/// rewritten path alone. Every parse failure falls through unmodified.
pub async fn with_service_account_rewrite(mut req: Request, next: Next) -> Response {
    if !header_string(&req, CLUSTER_HEADER).is_empty()
        || !header_string(&req, SHARDED_REQUEST_HEADER).is_empty()
        || req.uri().path().starts_with(CLUSTERS_PREFIX)
    {
        return next.run(req).await;
    }

    let authorization = header_string(&req, axum::http::header::AUTHORIZATION.as_str());
    let Some(token) = authorization.strip_prefix("Bearer ") else {
        return next.run(req).await;
    };

    let Some(cluster_name) = cluster_claim_from_token(token) else {
        return next.run(req).await;
    };

    let prefixed = format!("/clusters/{}{}", cluster_name, req.uri().path());
    match rewrite_path(req.uri(), &prefixed) {
        Ok(uri) => {
            debug!(cluster = %cluster_name, "rewrote in-cluster service account request");
            *req.uri_mut() = uri;
        }
        Err(_) => {
            // A cluster name that does not form a valid URI falls through;
            // cluster-scope validation rejects it if it reappears.
        }
    }

    next.run(req).await
}

/// Extract the logical cluster claim from an unverified JWT.
fn cluster_claim_from_token(token: &str) -> Option<String> {
    let mut segments = token.split('.');
    let (_header, payload) = (segments.next()?, segments.next()?);
    segments.next()?;

    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

    // Bound tokens nest the claim; legacy tokens use a flat key.
    claims
        .get("kubernetes.io")
        .and_then(|v| v.get("clusterName"))
        .and_then(|v| v.as_str())
        .or_else(|| {
            claims
                .get("kubernetes.io/serviceaccount/clusterName")
                .and_then(|v| v.as_str())
        })
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Resolve the cluster attachment and strip any `/clusters/<name>` prefix.
pub async fn with_cluster_scope(
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let raw_name = if req.uri().path().starts_with(CLUSTERS_PREFIX) {
        let (name, rest) = split_cluster_path(req.uri().path())?;
        *req.uri_mut() = rewrite_path(req.uri(), &rest)?;
        name
    } else {
        header_string(&req, CLUSTER_HEADER)
    };

    let mut attachment = ClusterAttachment {
        // The storage layer needs to know about partial-metadata requests
        // to extract cluster names from storage keys on wildcard reads.
        partial_metadata_request: is_partial_metadata_accept(
            &accept_header_from(req.extensions()).0,
        ),
        ..Default::default()
    };

    if raw_name == weft_common::cluster::WILDCARD {
        attachment.wildcard = true;
        attachment.name = ClusterName::wildcard();
    } else if raw_name.is_empty() {
        attachment.name = ClusterName::local_admin();
    } else {
        attachment.name = ClusterName::parse(&raw_name)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }

    req.extensions_mut().insert(attachment);
    Ok(next.run(req).await)
}

/// Split `/clusters/<name>/<rest>` into the decoded cluster name and the
/// remaining path.
///
/// The URI path is the percent-encoded form, so the segment is sliced in
/// encoded space and decoded afterwards; a segment that fails to decode is
/// rejected loudly instead of being forwarded misaligned.
pub(crate) fn split_cluster_path(path: &str) -> Result<(String, String), ApiError> {
    let remainder = &path[CLUSTERS_PREFIX.len()..];
    let Some(slash) = remainder.find('/') else {
        return Err(ApiError::BadRequest(format!(
            "unable to parse cluster: no `/` found in path {remainder}"
        )));
    };
    let (encoded, rest) = remainder.split_at(slash);

    let decoded = percent_decode_str(encoded)
        .decode_utf8()
        .map_err(|e| {
            ApiError::BadRequest(format!(
                "unable to parse cluster: invalid encoding in segment {encoded:?}: {e}"
            ))
        })?
        .into_owned();

    Ok((decoded, rest.to_string()))
}

/// Install the request-scoped audit annotation map.
pub async fn with_audit_annotations(mut req: Request, next: Next) -> Response {
    req.extensions_mut().insert(AuditAnnotations::default());
    next.run(req).await
}

/// Record the resolved cluster in the audit annotations. Requires the audit
/// layer and the cluster-scope layer to have run.
pub async fn with_cluster_annotation(req: Request, next: Next) -> Response {
    if let (Some(cluster), Some(annotations)) = (
        cluster_from(req.extensions()),
        audit_annotations_from(req.extensions()),
    ) {
        annotations.add(WORKSPACE_ANNOTATION, cluster.name.as_str());
    }
    next.run(req).await
}

/// Project the `workspaces` virtual resource into every workspace's URL
/// space, so `kubectl get workspaces` works from any workspace.
pub async fn with_workspace_projection(mut req: Request, next: Next) -> Response {
    let Some(cluster) = cluster_from(req.extensions()) else {
        return next.run(req).await;
    };
    if cluster.name.is_empty() {
        return next.run(req).await;
    }

    let path = req.uri().path();
    let home_lookup = format!("{WORKSPACES_RESOURCE_PATH}/~");
    if cluster.name.is_root() && path == home_lookup {
        // `kubectl get workspace ~` resolves the caller's home workspace
        // further down the chain; it must not be projected.
        return next.run(req).await;
    }

    let projected = path == WORKSPACES_RESOURCE_PATH
        || path
            .strip_prefix(WORKSPACES_RESOURCE_PATH)
            .is_some_and(|rest| rest.starts_with('/'));
    if projected {
        let new_path = format!("/services/workspaces/{}/all{}", cluster.name, path);
        debug!(from = %path, to = %new_path, "projecting workspaces resource");
        if let Ok(uri) = rewrite_path(req.uri(), &new_path) {
            *req.uri_mut() = uri;
        }
    }

    next.run(req).await
}

/// Resolve Kubernetes request info from the (cluster-stripped) path.
pub async fn with_request_info(mut req: Request, next: Next) -> Response {
    let info = request_info::resolve(req.method(), req.uri().path(), req.uri().query());
    req.extensions_mut().insert(info);
    next.run(req).await
}

/// Reject wildcard resource requests outside list/watch.
pub async fn with_wildcard_guard(req: Request, next: Next) -> Result<Response, ApiError> {
    let Some(cluster) = cluster_from(req.extensions()) else {
        return Ok(next.run(req).await);
    };
    if !cluster.wildcard {
        return Ok(next.run(req).await);
    }

    let Some(info) = req.extensions().get::<RequestInfo>() else {
        return Err(ApiError::Internal("missing requestInfo".to_string()));
    };

    if info.is_resource_request && info.verb != "list" && info.verb != "watch" {
        return Err(
            ApiError::method_not_supported(&info.api_group, &info.resource, &info.verb)
                .with_message_suffix(" in the `*` logical cluster"),
        );
    }

    Ok(next.run(req).await)
}

/// Split an API-export identity off the resource on wildcard list/watch.
///
/// `/api/v1/services:identityabcd/...` places `identityabcd` in the context
/// and rewrites the path and request info to the bare resource.
pub async fn with_wildcard_identity(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let Some(cluster) = cluster_from(req.extensions()) else {
        return Ok(next.run(req).await);
    };
    if !cluster.wildcard {
        return Ok(next.run(req).await);
    }

    let Some(info) = req.extensions().get::<RequestInfo>().cloned() else {
        return Err(ApiError::Internal("missing requestInfo".to_string()));
    };
    if !info.is_resource_request {
        return Ok(next.run(req).await);
    }

    let Some(colon) = info.resource.find(':') else {
        return Ok(next.run(req).await);
    };
    debug!(resource = %info.resource, "splitting identity off wildcard resource");
    let (resource, identity) = (&info.resource[..colon], &info.resource[colon + 1..]);
    if identity.is_empty() {
        return Err(ApiError::Internal(format!(
            "invalid resource {resource:?}: missing identity"
        )));
    }

    let new_path = req.uri().path().replacen(&info.resource, resource, 1);
    *req.uri_mut() = rewrite_path(req.uri(), &new_path)?;

    let mut updated = info.clone();
    updated.resource = resource.to_string();
    updated.path = new_path;
    req.extensions_mut()
        .insert(ResourceIdentity(identity.to_string()));
    req.extensions_mut().insert(updated);

    Ok(next.run(req).await)
}

/// A header as a string, empty when absent or non-UTF-8.
fn header_string(req: &Request, name: &str) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Replace the path of a URI, preserving the query string.
fn rewrite_path(uri: &Uri, new_path: &str) -> Result<Uri, ApiError> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{new_path}?{query}"),
        None => new_path.to_string(),
    };
    let path_and_query: PathAndQuery = path_and_query.parse().map_err(|e| {
        ApiError::Internal(format!("unable to rewrite path {new_path:?}: {e}"))
    })?;
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts)
        .map_err(|e| ApiError::Internal(format!("unable to rewrite path {new_path:?}: {e}")))
}
