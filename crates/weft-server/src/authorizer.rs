//! Virtual-workspace authorization dispatch
//!
//! Virtual workspaces are synthetic API surfaces mounted under
//! `/services/<name>/`. Each one carries its own authorizer; this module
//! dispatches a decision to the right one based on the name that path
//! resolution stored in the request context. The registry is built once at
//! startup and shared immutably, so no locking is involved.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Extensions;
use thiserror::Error;

use crate::context::virtual_workspace_from;
use crate::request_info::RequestInfo;

/// Outcome of an authorization check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The request is allowed
    Allow,
    /// The request is denied
    Deny,
    /// This authorizer has nothing to say; a later one may decide
    NoOpinion,
}

/// Attributes an authorizer decides over.
#[derive(Clone, Debug, Default)]
pub struct Attributes {
    /// Authenticated username, empty when authentication is still pending
    pub user: String,
    /// Groups of the user
    pub groups: Vec<String>,
    /// Kubernetes verb
    pub verb: String,
    /// API group
    pub api_group: String,
    /// Resource plural
    pub resource: String,
    /// Object name
    pub name: String,
    /// Request path
    pub path: String,
}

impl Attributes {
    /// Build attributes from resolved request info.
    pub fn from_request_info(info: &RequestInfo) -> Self {
        Self {
            verb: info.verb.clone(),
            api_group: info.api_group.clone(),
            resource: info.resource.clone(),
            name: info.name.clone(),
            path: info.path.clone(),
            ..Default::default()
        }
    }
}

/// Errors from authorization dispatch.
///
/// An unknown virtual workspace means an earlier layer stored a name no
/// one registered; that is a bug that must surface, never a silent allow.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthorizerError {
    /// A name was resolved but no authorizer is registered for it
    #[error("virtual workspace {0:?} not found")]
    UnknownVirtualWorkspace(String),
}

/// A single authorization decision point.
pub trait Authorizer: Send + Sync {
    /// Decide, returning the decision and a human-readable reason.
    fn authorize(&self, attributes: &Attributes) -> Result<(Decision, String), AuthorizerError>;
}

/// Dispatches to per-virtual-workspace authorizers by resolved name.
#[derive(Default)]
pub struct VirtualWorkspaceAuthorizer {
    registry: HashMap<String, Arc<dyn Authorizer>>,
}

impl VirtualWorkspaceAuthorizer {
    /// Build the dispatcher from a fixed registry.
    pub fn new(registry: HashMap<String, Arc<dyn Authorizer>>) -> Self {
        Self { registry }
    }

    /// Authorize using the virtual-workspace name stored in the request
    /// extensions during path resolution.
    pub fn authorize(
        &self,
        extensions: &Extensions,
        attributes: &Attributes,
    ) -> Result<(Decision, String), AuthorizerError> {
        let name = virtual_workspace_from(extensions).0;
        if name.is_empty() {
            return Ok((
                Decision::NoOpinion,
                "Path not resolved to a valid virtual workspace".to_string(),
            ));
        }

        match self.registry.get(&name) {
            Some(authorizer) => authorizer.authorize(attributes),
            None => Err(AuthorizerError::UnknownVirtualWorkspace(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::context::VirtualWorkspaceName;

    use super::*;

    struct Fixed(Decision, &'static str);

    impl Authorizer for Fixed {
        fn authorize(&self, _: &Attributes) -> Result<(Decision, String), AuthorizerError> {
            Ok((self.0, self.1.to_string()))
        }
    }

    fn dispatcher() -> VirtualWorkspaceAuthorizer {
        let mut registry: HashMap<String, Arc<dyn Authorizer>> = HashMap::new();
        registry.insert(
            "workspaces".to_string(),
            Arc::new(Fixed(Decision::Allow, "delegated")),
        );
        registry.insert(
            "locked".to_string(),
            Arc::new(Fixed(Decision::Deny, "locked down")),
        );
        VirtualWorkspaceAuthorizer::new(registry)
    }

    fn extensions_with(name: Option<&str>) -> Extensions {
        let mut extensions = Extensions::new();
        if let Some(name) = name {
            extensions.insert(VirtualWorkspaceName(name.to_string()));
        }
        extensions
    }

    #[test]
    fn test_unresolved_path_is_no_opinion() {
        let (decision, reason) = dispatcher()
            .authorize(&extensions_with(None), &Attributes::default())
            .unwrap();
        assert_eq!(decision, Decision::NoOpinion);
        assert_eq!(reason, "Path not resolved to a valid virtual workspace");
    }

    #[test]
    fn test_registered_name_delegates() {
        let (decision, reason) = dispatcher()
            .authorize(&extensions_with(Some("workspaces")), &Attributes::default())
            .unwrap();
        assert_eq!(decision, Decision::Allow);
        assert_eq!(reason, "delegated");

        let (decision, _) = dispatcher()
            .authorize(&extensions_with(Some("locked")), &Attributes::default())
            .unwrap();
        assert_eq!(decision, Decision::Deny);
    }

    #[test]
    fn test_unknown_name_is_surfaced_as_error() {
        let err = dispatcher()
            .authorize(&extensions_with(Some("ghost")), &Attributes::default())
            .unwrap_err();
        assert_eq!(
            err,
            AuthorizerError::UnknownVirtualWorkspace("ghost".to_string())
        );
    }

    #[test]
    fn test_attributes_from_request_info() {
        let info = RequestInfo {
            verb: "list".to_string(),
            api_group: "tenancy.kcp.dev".to_string(),
            resource: "workspaces".to_string(),
            name: String::new(),
            path: "/services/workspaces/root/all".to_string(),
            ..Default::default()
        };
        let attributes = Attributes::from_request_info(&info);
        assert_eq!(attributes.verb, "list");
        assert_eq!(attributes.resource, "workspaces");
    }
}
