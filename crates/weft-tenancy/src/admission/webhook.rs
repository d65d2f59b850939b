//! AdmissionReview endpoints for ClusterWorkspace
//!
//! Shards call these endpoints during the admission phase of cluster-scoped
//! writes. The mutating endpoint stamps the owner annotation via a JSON
//! patch; the validating endpoint enforces the workspace invariants. The
//! logical cluster of the original request travels in the cluster header.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use tracing::{debug, error};

use weft_common::{ClusterName, CLUSTER_HEADER};

use crate::workspace::ClusterWorkspace;

use super::{Operation, WorkspaceAdmission};

/// Shared state for the admission handlers
pub struct WebhookState {
    /// The admission controller proper
    pub admission: WorkspaceAdmission,
}

/// Create the admission router.
///
/// - `POST /admit/clusterworkspaces` - mutation (owner stamping)
/// - `POST /validate/clusterworkspaces` - invariant validation
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/admit/clusterworkspaces", post(admit_handler))
        .route("/validate/clusterworkspaces", post(validate_handler))
        .with_state(state)
}

/// Resolve the logical cluster the admission request belongs to.
fn cluster_from_headers(headers: &HeaderMap) -> ClusterName {
    headers
        .get(CLUSTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ClusterName::new)
        .unwrap_or_else(ClusterName::local_admin)
}

fn operation(request: &AdmissionRequest<ClusterWorkspace>) -> Option<Operation> {
    match request.operation {
        kube::core::admission::Operation::Create => Some(Operation::Create),
        kube::core::admission::Operation::Update => Some(Operation::Update),
        _ => None,
    }
}

async fn admit_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<ClusterWorkspace>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<ClusterWorkspace> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(mutate(&state, &request).into_review())
}

async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    Json(body): Json<AdmissionReview<ClusterWorkspace>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<ClusterWorkspace> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(review(&state, &headers, &request).into_review())
}

/// Run the mutation phase against one request.
fn mutate(
    state: &WebhookState,
    request: &AdmissionRequest<ClusterWorkspace>,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    let (Some(op), Some(workspace)) = (operation(request), request.object.as_ref()) else {
        return response;
    };

    let mut mutated = workspace.clone();
    if let Err(e) = state.admission.admit(
        op,
        &request.resource.resource,
        &mut mutated,
        &request.user_info,
    ) {
        error!(uid = %request.uid, error = %e, "mutation failed");
        return response.deny(e.to_string());
    }

    let original = match serde_json::to_value(workspace) {
        Ok(value) => value,
        Err(e) => return response.deny(format!("serialization error: {e}")),
    };
    let changed = match serde_json::to_value(&mutated) {
        Ok(value) => value,
        Err(e) => return response.deny(format!("serialization error: {e}")),
    };

    let patch = json_patch::diff(&original, &changed);
    if patch.0.is_empty() {
        return response;
    }

    debug!(uid = %request.uid, ops = patch.0.len(), "applying owner patch");
    match response.with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %request.uid, error = %e, "failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Run the validation phase against one request.
fn review(
    state: &WebhookState,
    headers: &HeaderMap,
    request: &AdmissionRequest<ClusterWorkspace>,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    let (Some(op), Some(workspace)) = (operation(request), request.object.as_ref()) else {
        return response;
    };

    let cluster = cluster_from_headers(headers);
    match state.admission.validate(
        op,
        &request.resource.resource,
        &cluster,
        request.old_object.as_ref(),
        workspace,
        &request.user_info,
    ) {
        Ok(()) => response,
        Err(e) => {
            debug!(uid = %request.uid, error = %e, "validation rejected");
            response.deny(e.to_string())
        }
    }
}
