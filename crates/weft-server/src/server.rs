//! Server assembly
//!
//! Wires the handler chain around the terminal handlers: the core-group
//! fork (discovery merging, CRD/native arbitration), the virtual-workspace
//! surface under `/services/`, and the readiness probe. Requests the
//! front-end does not terminate itself fall through to a negotiated 404.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use crate::authorizer::{Attributes, Decision, VirtualWorkspaceAuthorizer};
use crate::buffer::ResponseBuffer;
use crate::chain;
use crate::context::VirtualWorkspaceName;
use crate::discovery::{CoreDiscovery, DirectHandler};
use crate::request_info::RequestInfo;
use crate::status::ApiError;

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub addr: SocketAddr,
    /// TLS certificate PEM
    pub cert_pem: String,
    /// TLS private key PEM
    pub key_pem: String,
}

/// Errors from server startup
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid TLS material or addresses
    #[error("configuration error: {0}")]
    Config(String),

    /// The serve loop failed
    #[error("server error: {0}")]
    Internal(String),
}

/// Shared state for the terminal handlers
#[derive(Clone)]
pub struct AppState {
    /// Core-group discovery merger and dispatch
    pub discovery: Arc<CoreDiscovery>,
    /// Per-virtual-workspace authorization dispatch
    pub authorizer: Arc<VirtualWorkspaceAuthorizer>,
    /// Serving seam for authorized virtual-workspace requests
    pub services: Arc<dyn DirectHandler>,
}

/// A services seam that rejects everything.
///
/// Virtual-workspace serving lives in its own processes; a front-end built
/// without one answers with a negotiated 404 rather than pretending.
pub struct UnimplementedServices;

impl DirectHandler for UnimplementedServices {
    fn serve(&self, _method: &axum::http::Method, path: &str, buffer: &mut ResponseBuffer) {
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("no virtual workspace backend is registered for {path}"),
            "reason": "NotFound",
            "code": 404,
        });
        buffer.write_header(axum::http::StatusCode::NOT_FOUND);
        buffer.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/json"),
        );
        buffer.write(body.to_string().as_bytes());
    }
}

/// Build the full router: handler chain wrapped around the terminals.
pub fn build_router(state: AppState) -> Router {
    chain::apply(base_router(state))
}

/// Same, with additional routes merged inside the handler chain. The shard
/// process mounts its workspace admission endpoints this way.
pub fn build_router_with(state: AppState, extra: Router) -> Router {
    chain::apply(base_router(state).merge(extra))
}

fn base_router(state: AppState) -> Router {
    Router::new()
        .route("/readyz", get(|| async { "ok" }))
        .route("/api/v1", any(core_handler))
        .route("/api/v1/{*rest}", any(core_handler))
        .route("/services/{name}", any(services_handler))
        .route("/services/{name}/{*rest}", any(services_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

/// Start the front-end server with TLS termination.
pub async fn start_server(config: ServerConfig, state: AppState) -> Result<(), ServerError> {
    let app = build_router(state);

    let tls_config =
        RustlsConfig::from_pem(config.cert_pem.into_bytes(), config.key_pem.into_bytes())
            .await
            .map_err(|e| ServerError::Config(format!("TLS config error: {e}")))?;

    info!(addr = %config.addr, "starting workspace front-end server");

    axum_server::bind_rustls(config.addr, tls_config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;

    Ok(())
}

/// Terminal for the core group: discovery merging plus CRD/native fork.
async fn core_handler(State(state): State<AppState>, req: Request) -> Response {
    let Some(info) = req.extensions().get::<RequestInfo>() else {
        return ApiError::Internal("no RequestInfo found in the context".to_string())
            .into_response();
    };

    state.discovery.serve(info, req.method(), req.uri().path())
}

/// Terminal for `/services/<virtual-workspace>/...` paths.
///
/// Path resolution stores the virtual-workspace name in the context, then
/// the per-workspace authorizer decides. A name that resolves to nothing is
/// a bug in path resolution and surfaces as a 500, never a silent allow.
async fn services_handler(State(state): State<AppState>, mut req: Request) -> Response {
    let name = req
        .uri()
        .path()
        .strip_prefix("/services/")
        .and_then(|rest| rest.split('/').next())
        .unwrap_or_default()
        .to_string();
    if !name.is_empty() {
        req.extensions_mut().insert(VirtualWorkspaceName(name));
    }

    let attributes = req
        .extensions()
        .get::<RequestInfo>()
        .map(Attributes::from_request_info)
        .unwrap_or_default();

    match state.authorizer.authorize(req.extensions(), &attributes) {
        Err(e) => ApiError::Internal(e.to_string()).into_response(),
        Ok((Decision::Deny, reason)) | Ok((Decision::NoOpinion, reason)) => {
            ApiError::Forbidden(reason).into_response()
        }
        Ok((Decision::Allow, _)) => {
            let mut buffer = ResponseBuffer::new();
            state
                .services
                .serve(req.method(), req.uri().path(), &mut buffer);
            buffer.into_response()
        }
    }
}

/// Negotiated 404 for paths no terminal claims; the generic API machinery
/// for non-core groups lives in the shard process, not here.
async fn fallback_handler(req: Request) -> Response {
    ApiError::NotFound(req.uri().path().to_string()).into_response()
}
