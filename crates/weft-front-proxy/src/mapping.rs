//! Path-prefix to backend mapping
//!
//! The proxy routes by URL prefix. The mapping file is an ordered YAML list;
//! the longest matching prefix wins and declaration order breaks ties. The
//! file is read once at boot; there is no hot reload.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One mapping entry: a path prefix and how to reach its backend.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PathMapping {
    /// URL path prefix, e.g. `/clusters/`
    pub path: String,

    /// Backend base URL, e.g. `https://localhost:6444`
    pub backend: String,

    /// PEM file with the CA that signed the backend's serving cert
    #[serde(default)]
    pub backend_server_ca: String,

    /// PEM file with the client certificate presented to the backend
    #[serde(default)]
    pub proxy_client_cert: String,

    /// PEM file with the client key presented to the backend
    #[serde(default)]
    pub proxy_client_key: String,
}

/// Errors loading a mapping file
#[derive(Debug, Error)]
pub enum MappingError {
    /// The file could not be read
    #[error("failed to read mapping file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a valid mapping list
    #[error("failed to parse mapping file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The file parsed but contains no entries
    #[error("mapping file contains no entries")]
    Empty,
}

/// Load the ordered mapping list from a YAML file.
pub fn load_mappings(path: &Path) -> Result<Vec<PathMapping>, MappingError> {
    let raw = std::fs::read_to_string(path)?;
    let mappings: Vec<PathMapping> = serde_yaml::from_str(&raw)?;
    if mappings.is_empty() {
        return Err(MappingError::Empty);
    }
    Ok(mappings)
}

/// Pick the mapping for a request path: longest matching prefix, with
/// declaration order as the tiebreak.
pub fn resolve<'a>(mappings: &'a [PathMapping], request_path: &str) -> Option<&'a PathMapping> {
    let mut best: Option<&PathMapping> = None;
    for mapping in mappings {
        if !request_path.starts_with(&mapping.path) {
            continue;
        }
        // Strictly longer wins; equal length keeps the earlier entry.
        if best.map(|b| mapping.path.len() > b.path.len()).unwrap_or(true) {
            best = Some(mapping);
        }
    }
    best
}
