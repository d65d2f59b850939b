//! Kubernetes request-info resolution
//!
//! Maps an API path plus HTTP method to `(verb, group, version, resource,
//! name, ...)` the way the Kubernetes apiserver does. The chain resolves
//! this once, after cluster stripping, and later layers (wildcard guard,
//! identity splitting) read it from the request extensions.

use axum::http::Method;

/// Parsed request attributes for one API request.
///
/// For non-resource requests (discovery, health, anything outside
/// `/api`/`/apis`) only `verb` and `path` are meaningful.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// True when the path addresses a resource (not discovery or health)
    pub is_resource_request: bool,
    /// Kubernetes verb: get, list, watch, create, update, patch, delete,
    /// deletecollection; or the lowercased HTTP method for non-resource paths
    pub verb: String,
    /// API group; empty for the core group
    pub api_group: String,
    /// API version
    pub api_version: String,
    /// Namespace, empty for cluster-scoped requests
    pub namespace: String,
    /// Resource plural, possibly still carrying a `:identity` qualifier
    pub resource: String,
    /// Subresource, e.g. `status`
    pub subresource: String,
    /// Object name
    pub name: String,
    /// The path the info was resolved from
    pub path: String,
}

/// True when a query string asks for a watch.
pub fn is_watch_query(query: &str) -> bool {
    query
        .split('&')
        .any(|pair| pair == "watch=true" || pair == "watch=1")
}

/// Resolve request info from method, path, and query string.
///
/// The path must already have any `/clusters/<name>` prefix stripped.
pub fn resolve(method: &Method, path: &str, query: Option<&str>) -> RequestInfo {
    let mut info = RequestInfo {
        verb: method.as_str().to_lowercase(),
        path: path.to_string(),
        ..Default::default()
    };

    // Trailing slashes are not path segments: /api/v1/ is still discovery.
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    // /api/<version>/... or /apis/<group>/<version>/...
    let after_version: &[&str] = match segments.first() {
        Some(&"api") if segments.len() >= 2 => {
            info.api_version = segments[1].to_string();
            &segments[2..]
        }
        Some(&"apis") if segments.len() >= 3 => {
            info.api_group = segments[1].to_string();
            info.api_version = segments[2].to_string();
            &segments[3..]
        }
        _ => return info,
    };

    let mut parts: &[&str] = after_version;
    if parts.is_empty() {
        // Version-level discovery, e.g. /api/v1.
        return info;
    }

    if parts[0] == "namespaces" && parts.len() > 1 {
        info.namespace = parts[1].to_string();
        if parts.len() > 2 {
            parts = &parts[2..];
        }
    }

    // parts: resource / name / subresource / ...
    info.is_resource_request = true;
    info.resource = parts[0].to_string();
    if parts.len() >= 2 {
        info.name = parts[1].to_string();
    }
    if parts.len() >= 3 {
        info.subresource = parts[2].to_string();
    }

    info.verb = match *method {
        Method::GET | Method::HEAD => {
            if !info.name.is_empty() {
                "get".to_string()
            } else if query.map(is_watch_query).unwrap_or(false) {
                "watch".to_string()
            } else {
                "list".to_string()
            }
        }
        Method::POST => "create".to_string(),
        Method::PUT => "update".to_string(),
        Method::PATCH => "patch".to_string(),
        Method::DELETE => {
            if info.name.is_empty() {
                "deletecollection".to_string()
            } else {
                "delete".to_string()
            }
        }
        _ => info.verb,
    };

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_group_list() {
        let info = resolve(&Method::GET, "/api/v1/namespaces", None);
        assert!(info.is_resource_request);
        assert_eq!(info.verb, "list");
        assert_eq!(info.api_group, "");
        assert_eq!(info.api_version, "v1");
        assert_eq!(info.resource, "namespaces");
        assert_eq!(info.name, "");
    }

    #[test]
    fn test_namespaced_get_with_subresource() {
        let info = resolve(
            &Method::GET,
            "/api/v1/namespaces/default/pods/nginx/log",
            None,
        );
        assert_eq!(info.namespace, "default");
        assert_eq!(info.resource, "pods");
        assert_eq!(info.name, "nginx");
        assert_eq!(info.subresource, "log");
        assert_eq!(info.verb, "get");
    }

    #[test]
    fn test_named_namespace_get() {
        let info = resolve(&Method::GET, "/api/v1/namespaces/default", None);
        assert_eq!(info.resource, "namespaces");
        assert_eq!(info.name, "default");
        assert_eq!(info.verb, "get");
    }

    #[test]
    fn test_grouped_resource_with_identity_suffix() {
        let info = resolve(&Method::GET, "/apis/foo/v1/widgets:idabc123", None);
        assert!(info.is_resource_request);
        assert_eq!(info.api_group, "foo");
        assert_eq!(info.api_version, "v1");
        // The identity qualifier stays in the resource until the wildcard
        // identity layer splits it.
        assert_eq!(info.resource, "widgets:idabc123");
        assert_eq!(info.verb, "list");
    }

    #[test]
    fn test_watch_query_verb() {
        let info = resolve(&Method::GET, "/api/v1/pods", Some("watch=true"));
        assert_eq!(info.verb, "watch");
        let info = resolve(&Method::GET, "/api/v1/pods", Some("labelSelector=a&watch=1"));
        assert_eq!(info.verb, "watch");
        let info = resolve(&Method::GET, "/api/v1/pods", Some("watch=false"));
        assert_eq!(info.verb, "list");
    }

    #[test]
    fn test_discovery_paths_are_non_resource() {
        for path in ["/api/v1", "/api/v1/", "/apis/apps/v1", "/api", "/apis"] {
            let info = resolve(&Method::GET, path, None);
            assert!(!info.is_resource_request, "{path} must be non-resource");
            assert_eq!(info.verb, "get");
        }
    }

    #[test]
    fn test_non_api_path_is_non_resource() {
        let info = resolve(&Method::GET, "/healthz", None);
        assert!(!info.is_resource_request);
        assert_eq!(info.verb, "get");
        assert_eq!(info.path, "/healthz");
    }

    #[test]
    fn test_mutating_verbs() {
        assert_eq!(resolve(&Method::POST, "/api/v1/pods", None).verb, "create");
        assert_eq!(
            resolve(&Method::PUT, "/api/v1/pods/nginx", None).verb,
            "update"
        );
        assert_eq!(
            resolve(&Method::PATCH, "/api/v1/pods/nginx", None).verb,
            "patch"
        );
        assert_eq!(
            resolve(&Method::DELETE, "/api/v1/pods/nginx", None).verb,
            "delete"
        );
        assert_eq!(
            resolve(&Method::DELETE, "/api/v1/pods", None).verb,
            "deletecollection"
        );
    }
}
