//! Core-group discovery merging
//!
//! The core group (`/api/v1`) is special: built-in types are served by the
//! generic control plane, but workspaces can also bind CRDs into the core
//! group. Discovery must present one fused `APIResourceList`, and resource
//! requests must be arbitrated per resource between the CRD machinery and
//! the native handler.
//!
//! The native handler is a direct callable writing into an in-memory
//! [`ResponseBuffer`], so fusing discovery never makes a network round-trip
//! and cannot recurse into itself.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList};
use tracing::debug;

use crate::buffer::ResponseBuffer;
use crate::request_info::RequestInfo;
use crate::status::ApiError;

/// Read-only view over the CRDs bound into this shard.
///
/// Shared across requests; writers publish a whole new lister via an
/// atomic `Arc` swap rather than mutating in place.
pub trait CrdLister: Send + Sync {
    /// Look up a CRD by its metadata name, e.g. `foos.core`.
    fn get(&self, name: &str) -> Option<CustomResourceDefinition>;

    /// All CRDs currently bound.
    fn list(&self) -> Vec<CustomResourceDefinition>;
}

/// A fixed in-memory CRD lister.
#[derive(Default)]
pub struct StaticCrdLister {
    by_name: HashMap<String, CustomResourceDefinition>,
}

impl StaticCrdLister {
    /// Build a lister from CRD objects, keyed by their metadata name.
    pub fn new<I>(crds: I) -> Self
    where
        I: IntoIterator<Item = CustomResourceDefinition>,
    {
        let by_name = crds
            .into_iter()
            .filter_map(|crd| Some((crd.metadata.name.clone()?, crd)))
            .collect();
        Self { by_name }
    }
}

impl CrdLister for StaticCrdLister {
    fn get(&self, name: &str) -> Option<CustomResourceDefinition> {
        self.by_name.get(name).cloned()
    }

    fn list(&self) -> Vec<CustomResourceDefinition> {
        self.by_name.values().cloned().collect()
    }
}

/// A core-group handler invoked directly, writing into a response buffer.
///
/// Both the generic control plane's native handler and the CRD machinery
/// are external collaborators behind this seam.
pub trait DirectHandler: Send + Sync {
    /// Serve a core-group request into the buffer.
    fn serve(&self, method: &Method, path: &str, buffer: &mut ResponseBuffer);
}

/// Which terminal a core-group resource request goes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreDispatch {
    /// The resource is backed by a CRD
    Crd,
    /// The resource is a built-in type
    Native,
}

/// Fuses built-in and CRD-backed discovery for the core group and
/// arbitrates per-resource dispatch.
pub struct CoreDiscovery {
    crds: Arc<dyn CrdLister>,
    native: Arc<dyn DirectHandler>,
    crd_handler: Arc<dyn DirectHandler>,
}

impl CoreDiscovery {
    /// Create the merger over a CRD lister and the two terminals.
    pub fn new(
        crds: Arc<dyn CrdLister>,
        native: Arc<dyn DirectHandler>,
        crd_handler: Arc<dyn DirectHandler>,
    ) -> Self {
        Self {
            crds,
            native,
            crd_handler,
        }
    }

    /// Decide which terminal serves a core-group resource request.
    pub fn dispatch(&self, info: &RequestInfo) -> CoreDispatch {
        let crd_name = format!("{}.core", info.resource);
        if self.crds.get(&crd_name).is_some() {
            CoreDispatch::Crd
        } else {
            CoreDispatch::Native
        }
    }

    /// Serve a core-group request: fused discovery for `/api/v1`, CRD or
    /// native terminal for resources.
    pub fn serve(&self, info: &RequestInfo, method: &Method, path: &str) -> Response {
        if !info.is_resource_request && (path == "/api/v1" || path == "/api/v1/") {
            return self.serve_v1_discovery(method);
        }

        let mut buffer = ResponseBuffer::new();
        match self.dispatch(info) {
            CoreDispatch::Crd => {
                debug!(resource = %info.resource, "dispatching core resource to CRD handler");
                self.crd_handler.serve(method, path, &mut buffer);
            }
            CoreDispatch::Native => self.native.serve(method, path, &mut buffer),
        }
        buffer.into_response()
    }

    /// Fused `/api/v1` discovery: native resources plus CRD-derived ones,
    /// stable-sorted by resource name.
    pub fn serve_v1_discovery(&self, method: &Method) -> Response {
        let crds = self.crds.list();
        let crd_resources = api_resources_for_group_version("", "v1", &crds);

        let mut buffer = ResponseBuffer::new();
        self.native.serve(method, "/api/v1", &mut buffer);

        let status = buffer.status().unwrap_or(StatusCode::OK);
        if status != StatusCode::OK {
            // Relay whatever the native handler said, untouched.
            return buffer.into_response();
        }

        let mut list: APIResourceList = match serde_json::from_slice(buffer.body()) {
            Ok(list) => list,
            Err(e) => {
                return ApiError::Internal(format!(
                    "unable to serve /api/v1 discovery: error decoding /api/v1 response from generic control plane: {e}"
                ))
                .into_response();
            }
        };

        list.resources.extend(crd_resources);
        list.resources.sort_by(|a, b| a.name.cmp(&b.name));
        list.resources.dedup_by(|a, b| a.name == b.name);

        Json(list).into_response()
    }
}

/// Build the `APIResource` entries a set of CRDs contributes to one
/// group/version.
pub fn api_resources_for_group_version(
    group: &str,
    version: &str,
    crds: &[CustomResourceDefinition],
) -> Vec<APIResource> {
    let mut resources = Vec::new();
    for crd in crds {
        let spec = &crd.spec;
        if spec.group != group {
            continue;
        }
        if !spec.versions.iter().any(|v| v.name == version && v.served) {
            continue;
        }

        resources.push(APIResource {
            name: spec.names.plural.clone(),
            singular_name: spec.names.singular.clone().unwrap_or_default(),
            kind: spec.names.kind.clone(),
            namespaced: spec.scope == "Namespaced",
            short_names: spec.names.short_names.clone(),
            categories: spec.names.categories.clone(),
            verbs: vec![
                "create".to_string(),
                "delete".to_string(),
                "deletecollection".to_string(),
                "get".to_string(),
                "list".to_string(),
                "patch".to_string(),
                "update".to_string(),
                "watch".to_string(),
            ],
            group: None,
            version: None,
            storage_version_hash: None,
        });
    }
    resources
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
        CustomResourceDefinitionVersion,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn core_crd(plural: &str, kind: &str) -> CustomResourceDefinition {
        CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some(format!("{plural}.core")),
                ..Default::default()
            },
            spec: CustomResourceDefinitionSpec {
                group: String::new(),
                scope: "Namespaced".to_string(),
                names: CustomResourceDefinitionNames {
                    plural: plural.to_string(),
                    singular: Some(plural.trim_end_matches('s').to_string()),
                    kind: kind.to_string(),
                    ..Default::default()
                },
                versions: vec![CustomResourceDefinitionVersion {
                    name: "v1".to_string(),
                    served: true,
                    storage: true,
                    ..Default::default()
                }],
                ..Default::default()
            },
            status: None,
        }
    }

    /// Native terminal serving a fixed discovery document.
    struct NativeStub;

    impl DirectHandler for NativeStub {
        fn serve(&self, _method: &Method, path: &str, buffer: &mut ResponseBuffer) {
            if path == "/api/v1" {
                let list = APIResourceList {
                    group_version: "v1".to_string(),
                    resources: vec![
                        APIResource {
                            name: "pods".to_string(),
                            singular_name: "pod".to_string(),
                            kind: "Pod".to_string(),
                            namespaced: true,
                            verbs: vec!["get".to_string(), "list".to_string()],
                            ..Default::default()
                        },
                        APIResource {
                            name: "services".to_string(),
                            singular_name: "service".to_string(),
                            kind: "Service".to_string(),
                            namespaced: true,
                            verbs: vec!["get".to_string(), "list".to_string()],
                            ..Default::default()
                        },
                    ],
                };
                buffer.write(&serde_json::to_vec(&list).unwrap());
            } else {
                buffer.write(b"native");
            }
        }
    }

    /// Native terminal that always fails.
    struct UnavailableStub;

    impl DirectHandler for UnavailableStub {
        fn serve(&self, _method: &Method, _path: &str, buffer: &mut ResponseBuffer) {
            buffer.write_header(StatusCode::SERVICE_UNAVAILABLE);
            buffer.write(b"shutting down");
        }
    }

    struct CrdStub;

    impl DirectHandler for CrdStub {
        fn serve(&self, _method: &Method, _path: &str, buffer: &mut ResponseBuffer) {
            buffer.write(b"crd");
        }
    }

    fn merger_with(native: Arc<dyn DirectHandler>) -> CoreDiscovery {
        let lister = Arc::new(StaticCrdLister::new(vec![core_crd("foos", "Foo")]));
        CoreDiscovery::new(lister, native, Arc::new(CrdStub))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_discovery_merges_and_sorts_by_name() {
        let merger = merger_with(Arc::new(NativeStub));
        let response = merger.serve_v1_discovery(&Method::GET);
        assert_eq!(response.status(), StatusCode::OK);

        let value = body_json(response).await;
        let names: Vec<&str> = value["resources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["foos", "pods", "services"]);
    }

    #[tokio::test]
    async fn test_discovery_deduplicates_on_name() {
        let lister = Arc::new(StaticCrdLister::new(vec![core_crd("pods", "Pod")]));
        let merger = CoreDiscovery::new(lister, Arc::new(NativeStub), Arc::new(CrdStub));

        let value = body_json(merger.serve_v1_discovery(&Method::GET)).await;
        let names: Vec<&str> = value["resources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["pods", "services"]);
    }

    #[tokio::test]
    async fn test_discovery_relays_native_failure_raw() {
        let merger = merger_with(Arc::new(UnavailableStub));
        let response = merger.serve_v1_discovery(&Method::GET);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"shutting down");
    }

    #[tokio::test]
    async fn test_discovery_decode_failure_is_internal_error() {
        struct GarbageStub;
        impl DirectHandler for GarbageStub {
            fn serve(&self, _m: &Method, _p: &str, buffer: &mut ResponseBuffer) {
                buffer.write(b"not json");
            }
        }

        let merger = merger_with(Arc::new(GarbageStub));
        let response = merger.serve_v1_discovery(&Method::GET);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_resource_dispatch_prefers_crd() {
        let merger = merger_with(Arc::new(NativeStub));

        let mut info = RequestInfo {
            is_resource_request: true,
            resource: "foos".to_string(),
            ..Default::default()
        };
        assert_eq!(merger.dispatch(&info), CoreDispatch::Crd);

        info.resource = "pods".to_string();
        assert_eq!(merger.dispatch(&info), CoreDispatch::Native);
    }

    #[tokio::test]
    async fn test_resource_requests_reach_the_right_terminal() {
        let merger = merger_with(Arc::new(NativeStub));

        let info = RequestInfo {
            is_resource_request: true,
            resource: "foos".to_string(),
            verb: "list".to_string(),
            ..Default::default()
        };
        let response = merger.serve(&info, &Method::GET, "/api/v1/foos");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"crd");

        let info = RequestInfo {
            is_resource_request: true,
            resource: "pods".to_string(),
            verb: "list".to_string(),
            ..Default::default()
        };
        let response = merger.serve(&info, &Method::GET, "/api/v1/pods");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"native");
    }

    #[test]
    fn test_api_resources_skip_other_groups_and_versions() {
        let mut other_group = core_crd("bars", "Bar");
        other_group.spec.group = "example.com".to_string();
        let mut unserved = core_crd("bazs", "Baz");
        unserved.spec.versions[0].served = false;

        let resources =
            api_resources_for_group_version("", "v1", &[other_group, unserved, core_crd("foos", "Foo")]);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name, "foos");
        assert_eq!(resources[0].kind, "Foo");
        assert!(resources[0].namespaced);
    }
}
