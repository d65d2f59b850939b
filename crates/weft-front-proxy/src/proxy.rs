//! Request forwarding
//!
//! Each mapping entry gets its own upstream client carrying the backend's
//! serving CA and the proxy's client certificate, so every forwarded
//! request authenticates to the shard over mTLS. Requests are matched to a
//! backend by longest path prefix and relayed with method, headers, and
//! body intact; private internal headers never cross the proxy.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::debug;

use weft_common::DISCOVERY_PASSTHROUGH_HEADER;

use crate::mapping::PathMapping;

/// Errors from proxy forwarding
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Certificate or key material could not be loaded
    #[error("failed to load backend credentials: {0}")]
    Credentials(String),

    /// The upstream client could not be built
    #[error("failed to build backend client: {0}")]
    Client(String),

    /// No mapping covers the request path
    #[error("no backend mapping for path {0}")]
    NoBackend(String),

    /// The forwarded request failed
    #[error("proxy error: {0}")]
    Upstream(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::NoBackend(_) => StatusCode::NOT_FOUND,
            ProxyError::Credentials(_) | ProxyError::Client(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };

        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": self.to_string(),
            "code": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// One backend: its mapping entry and the mTLS client that reaches it.
#[derive(Debug)]
pub struct Backend {
    mapping: PathMapping,
    client: reqwest::Client,
}

impl Backend {
    /// Build a backend client from a mapping entry. Relative credential
    /// paths resolve against `base_dir`.
    pub fn new(mapping: PathMapping, base_dir: &Path) -> Result<Self, ProxyError> {
        let mut builder = reqwest::Client::builder().use_rustls_tls();

        if !mapping.backend_server_ca.is_empty() {
            let ca = std::fs::read(base_dir.join(&mapping.backend_server_ca))
                .map_err(|e| ProxyError::Credentials(format!("backend CA: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&ca)
                .map_err(|e| ProxyError::Credentials(format!("backend CA: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        if !mapping.proxy_client_cert.is_empty() {
            let mut pem = std::fs::read(base_dir.join(&mapping.proxy_client_cert))
                .map_err(|e| ProxyError::Credentials(format!("client cert: {e}")))?;
            let key = std::fs::read(base_dir.join(&mapping.proxy_client_key))
                .map_err(|e| ProxyError::Credentials(format!("client key: {e}")))?;
            pem.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ProxyError::Credentials(format!("client identity: {e}")))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;

        Ok(Self { mapping, client })
    }

    /// The mapping entry this backend serves.
    pub fn mapping(&self) -> &PathMapping {
        &self.mapping
    }
}

/// Shared proxy state: backends in declaration order.
pub struct ProxyState {
    backends: Vec<Backend>,
}

impl ProxyState {
    /// Build per-mapping backends, preserving declaration order.
    pub fn new(mappings: Vec<PathMapping>, base_dir: &Path) -> Result<Self, ProxyError> {
        let backends = mappings
            .into_iter()
            .map(|mapping| Backend::new(mapping, base_dir))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { backends })
    }

    /// Longest-prefix backend for a request path; declaration order breaks
    /// ties.
    pub fn resolve(&self, request_path: &str) -> Option<&Backend> {
        let mut best: Option<&Backend> = None;
        for backend in &self.backends {
            if !request_path.starts_with(&backend.mapping.path) {
                continue;
            }
            let better = best
                .map(|b| backend.mapping.path.len() > b.mapping.path.len())
                .unwrap_or(true);
            if better {
                best = Some(backend);
            }
        }
        best
    }
}

/// Build the proxy router: a local readiness probe plus prefix forwarding
/// for everything else.
pub fn proxy_router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/readyz", get(|| async { "ok" }))
        .fallback(forward_handler)
        .with_state(state)
}

/// Forward one request to the backend its path prefix maps to.
async fn forward_handler(
    State(state): State<Arc<ProxyState>>,
    req: Request,
) -> Result<Response, ProxyError> {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let backend = state
        .resolve(&path)
        .ok_or_else(|| ProxyError::NoBackend(path.clone()))?;

    let mut target = format!("{}{}", backend.mapping.backend.trim_end_matches('/'), path);
    if let Some(query) = &query {
        target.push('?');
        target.push_str(query);
    }

    debug!(method = %req.method(), path = %path, backend = %backend.mapping.backend, "forwarding");

    let method = req.method().clone();
    let headers = forwardable_headers(req.headers());
    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| ProxyError::Upstream(format!("failed to read request body: {e}")))?;

    let mut request = backend.client.request(method, &target).headers(headers);
    if !body.is_empty() {
        request = request.body(body.to_vec());
    }

    let response = request
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let status = response.status();
    let response_headers = forwardable_headers(response.headers());
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(format!("failed to read backend response: {e}")))?;

    let mut out = Response::new(Body::from(bytes));
    *out.status_mut() = status;
    *out.headers_mut() = response_headers;
    Ok(out)
}

/// Copy headers, dropping hop-by-hop fields and private internal headers.
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if *name == header::HOST
            || *name == header::CONNECTION
            || *name == header::TRANSFER_ENCODING
            || *name == header::CONTENT_LENGTH
            || name.as_str().eq_ignore_ascii_case(DISCOVERY_PASSTHROUGH_HEADER)
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(path: &str, backend: &str) -> PathMapping {
        PathMapping {
            path: path.to_string(),
            backend: backend.to_string(),
            backend_server_ca: String::new(),
            proxy_client_cert: String::new(),
            proxy_client_key: String::new(),
        }
    }

    fn state(mappings: Vec<PathMapping>) -> ProxyState {
        ProxyState::new(mappings, Path::new(".")).unwrap()
    }

    #[test]
    fn test_resolve_longest_prefix_with_order_tiebreak() {
        let state = state(vec![
            mapping("/services/", "https://first:6444"),
            mapping("/services/", "https://second:6444"),
            mapping("/services/workspaces/", "https://vw:6444"),
        ]);

        assert_eq!(
            state.resolve("/services/workspaces/root").unwrap().mapping().backend,
            "https://vw:6444"
        );
        assert_eq!(
            state.resolve("/services/other").unwrap().mapping().backend,
            "https://first:6444"
        );
        assert!(state.resolve("/healthz").is_none());
    }

    #[test]
    fn test_missing_credential_files_fail_loudly() {
        let mut entry = mapping("/clusters/", "https://localhost:6444");
        entry.backend_server_ca = "does-not-exist.crt".to_string();
        let err = Backend::new(entry, Path::new("/nonexistent")).unwrap_err();
        assert!(matches!(err, ProxyError::Credentials(_)));
    }

    #[test]
    fn test_forwardable_headers_strip_private_and_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer token".parse().unwrap());
        headers.insert("accept", "application/json".parse().unwrap());
        headers.insert("host", "proxy.example.com".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert(DISCOVERY_PASSTHROUGH_HEADER, "1".parse().unwrap());

        let out = forwardable_headers(&headers);
        assert!(out.contains_key("authorization"));
        assert!(out.contains_key("accept"));
        assert!(!out.contains_key("host"));
        assert!(!out.contains_key("connection"));
        assert!(!out.contains_key(DISCOVERY_PASSTHROUGH_HEADER));
    }

    #[tokio::test]
    async fn test_forwarding_end_to_end() {
        use axum::routing::any;

        // Upstream echoing its path and the forwarded headers.
        let upstream = Router::new().fallback(any(|req: Request| async move {
            let passthrough = req.headers().contains_key(DISCOVERY_PASSTHROUGH_HEADER);
            axum::Json(serde_json::json!({
                "path": req.uri().path(),
                "query": req.uri().query(),
                "passthrough": passthrough,
            }))
        }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, upstream).await.unwrap();
        });

        let state = Arc::new(state(vec![mapping(
            "/clusters/",
            &format!("http://{addr}"),
        )]));
        let router = proxy_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let client = reqwest::Client::new();
        let response = client
            .get(format!(
                "http://{proxy_addr}/clusters/root/api/v1/pods?watch=true"
            ))
            .header(DISCOVERY_PASSTHROUGH_HEADER, "1")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let value: serde_json::Value = response.json().await.unwrap();
        assert_eq!(value["path"], "/clusters/root/api/v1/pods");
        assert_eq!(value["query"], "watch=true");
        // The private header must never cross the proxy.
        assert_eq!(value["passthrough"], false);

        // Unmapped prefixes are a negotiated 404.
        let response = client
            .get(format!("http://{proxy_addr}/unmapped"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        // The local readiness probe is served by the proxy itself.
        let response = client
            .get(format!("http://{proxy_addr}/readyz"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }
}
