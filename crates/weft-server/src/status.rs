//! Negotiated Kubernetes Status errors
//!
//! Every error the pipeline puts on the wire is a `metav1.Status` document,
//! so kubectl and client-go render it natively. Client errors (bad cluster
//! name, wildcard verb violations) map to 4xx; invariant violations that
//! indicate a bug in an earlier layer map to 500.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Result type for pipeline handlers
pub type Result<T> = std::result::Result<T, ApiError>;

/// Error type for the request pipeline
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request is malformed (e.g. an invalid cluster name)
    #[error("{0}")]
    BadRequest(String),

    /// The verb is not allowed on this resource in this scope
    #[error("{message}")]
    MethodNotSupported {
        /// API group of the resource
        group: String,
        /// Resource plural
        resource: String,
        /// The rejected verb
        verb: String,
        /// Full message, including any scope suffix
        message: String,
    },

    /// The caller is not allowed to perform the request
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No handler serves the request path
    #[error("the server could not find the requested resource {0}")]
    NotFound(String),

    /// A prior layer broke an invariant (missing request info, decode
    /// failure, unresolved virtual workspace)
    #[error("Internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    /// A 405 for a verb outside the wildcard list/watch allowance.
    pub fn method_not_supported(group: &str, resource: &str, verb: &str) -> Self {
        let qualified = if group.is_empty() {
            resource.to_string()
        } else {
            format!("{resource}.{group}")
        };
        Self::MethodNotSupported {
            group: group.to_string(),
            resource: resource.to_string(),
            verb: verb.to_string(),
            message: format!("{verb} is not supported on resources of type {qualified:?}"),
        }
    }

    /// Append scope context to a method-not-supported message.
    pub fn with_message_suffix(self, suffix: &str) -> Self {
        match self {
            Self::MethodNotSupported {
                group,
                resource,
                verb,
                message,
            } => Self::MethodNotSupported {
                group,
                resource,
                verb,
                message: format!("{message}{suffix}"),
            },
            other => other,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotSupported { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BadRequest",
            Self::MethodNotSupported { .. } => "MethodNotAllowed",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::Internal(_) => "InternalError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();

        let mut body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": self.to_string(),
            "reason": self.reason(),
            "code": code.as_u16(),
        });
        if let ApiError::MethodNotSupported {
            group, resource, ..
        } = &self
        {
            body["details"] = serde_json::json!({
                "group": group,
                "kind": resource,
            });
        }

        (
            code,
            [(header::CONTENT_TYPE, "application/json")],
            Json(body),
        )
            .into_response()
    }
}
