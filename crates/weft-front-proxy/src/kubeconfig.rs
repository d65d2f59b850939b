//! Kubeconfig emission and manipulation
//!
//! The launcher writes two client configurations: a minified root-shard
//! kubeconfig for the proxy's own upstream access, and the admin
//! kubeconfig with `root`, `default`, and `system:admin` contexts that
//! operators use through the proxy. Documents are flattened (referenced
//! cert files inlined as base64 data) before writing so they stay portable.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from kubeconfig operations
#[derive(Debug, Error)]
pub enum KubeconfigError {
    /// A referenced file could not be read or written
    #[error("kubeconfig io error: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid YAML
    #[error("kubeconfig parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Embedded data is not valid base64
    #[error("kubeconfig data error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The named context does not exist
    #[error("context {0:?} not found")]
    MissingContext(String),

    /// A context references a cluster that does not exist
    #[error("cluster {0:?} not found")]
    MissingCluster(String),

    /// A context references a user that does not exist
    #[error("user {0:?} not found")]
    MissingUser(String),
}

/// A client configuration document
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// Always `v1`
    pub api_version: String,
    /// Always `Config`
    pub kind: String,
    /// Cluster entries
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    /// User entries
    #[serde(default)]
    pub users: Vec<NamedUser>,
    /// Context entries
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    /// The context clients use by default
    #[serde(default)]
    pub current_context: String,
}

/// Named cluster entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NamedCluster {
    /// Entry name
    pub name: String,
    /// Cluster connection details
    pub cluster: ClusterEntry,
}

/// Cluster connection details
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    /// API server URL
    pub server: String,
    /// Path to the serving CA file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<String>,
    /// Inlined serving CA, base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

/// Named user entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NamedUser {
    /// Entry name
    pub name: String,
    /// Credential details
    pub user: UserEntry,
}

/// Client credential details
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    /// Path to the client certificate file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    /// Inlined client certificate, base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    /// Path to the client key file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    /// Inlined client key, base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
}

/// Named context entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NamedContext {
    /// Entry name
    pub name: String,
    /// Cluster/user pair
    pub context: ContextEntry,
}

/// Context details
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ContextEntry {
    /// Referenced cluster entry
    pub cluster: String,
    /// Referenced user entry
    pub user: String,
}

/// Resolved client material for one context, ready to build an HTTP client.
#[derive(Clone, Debug, Default)]
pub struct ClientMaterial {
    /// API server URL
    pub server: String,
    /// Serving CA in PEM bytes
    pub ca_pem: Option<Vec<u8>>,
    /// Client certificate in PEM bytes
    pub client_cert_pem: Option<Vec<u8>>,
    /// Client key in PEM bytes
    pub client_key_pem: Option<Vec<u8>>,
}

impl Kubeconfig {
    /// Load a kubeconfig from a YAML file.
    pub fn load(path: &Path) -> Result<Self, KubeconfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Write the kubeconfig as YAML.
    pub fn write(&self, path: &Path) -> Result<(), KubeconfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Drop every entry not reachable from the current context.
    pub fn minify(&mut self) -> Result<(), KubeconfigError> {
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == self.current_context)
            .cloned()
            .ok_or_else(|| KubeconfigError::MissingContext(self.current_context.clone()))?;

        if !self.clusters.iter().any(|c| c.name == context.context.cluster) {
            return Err(KubeconfigError::MissingCluster(context.context.cluster));
        }
        if !self.users.iter().any(|u| u.name == context.context.user) {
            return Err(KubeconfigError::MissingUser(context.context.user));
        }

        self.clusters.retain(|c| c.name == context.context.cluster);
        self.users.retain(|u| u.name == context.context.user);
        self.contexts.retain(|c| c.name == context.name);
        Ok(())
    }

    /// Inline every referenced certificate file as base64 data. Relative
    /// paths resolve against `base_dir`.
    pub fn flatten(&mut self, base_dir: &Path) -> Result<(), KubeconfigError> {
        fn inline(
            base_dir: &Path,
            file: &mut Option<String>,
            data: &mut Option<String>,
        ) -> Result<(), KubeconfigError> {
            if data.is_none() {
                if let Some(path) = file.take() {
                    let bytes = std::fs::read(base_dir.join(path))?;
                    *data = Some(STANDARD.encode(bytes));
                }
            } else {
                *file = None;
            }
            Ok(())
        }

        for cluster in &mut self.clusters {
            inline(
                base_dir,
                &mut cluster.cluster.certificate_authority,
                &mut cluster.cluster.certificate_authority_data,
            )?;
        }
        for user in &mut self.users {
            inline(
                base_dir,
                &mut user.user.client_certificate,
                &mut user.user.client_certificate_data,
            )?;
            inline(base_dir, &mut user.user.client_key, &mut user.user.client_key_data)?;
        }
        Ok(())
    }

    /// Resolve client material for a context (the current one when `None`).
    /// Inlined data wins over file references; files resolve against
    /// `base_dir`.
    pub fn client_material(
        &self,
        context: Option<&str>,
        base_dir: &Path,
    ) -> Result<ClientMaterial, KubeconfigError> {
        let name = context.unwrap_or(&self.current_context);
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| KubeconfigError::MissingContext(name.to_string()))?;

        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .ok_or_else(|| KubeconfigError::MissingCluster(context.context.cluster.clone()))?;
        let user = self
            .users
            .iter()
            .find(|u| u.name == context.context.user)
            .ok_or_else(|| KubeconfigError::MissingUser(context.context.user.clone()))?;

        fn resolve(
            base_dir: &Path,
            file: &Option<String>,
            data: &Option<String>,
        ) -> Result<Option<Vec<u8>>, KubeconfigError> {
            if let Some(data) = data {
                return Ok(Some(STANDARD.decode(data)?));
            }
            if let Some(file) = file {
                return Ok(Some(std::fs::read(base_dir.join(file))?));
            }
            Ok(None)
        }

        Ok(ClientMaterial {
            server: cluster.cluster.server.clone(),
            ca_pem: resolve(
                base_dir,
                &cluster.cluster.certificate_authority,
                &cluster.cluster.certificate_authority_data,
            )?,
            client_cert_pem: resolve(
                base_dir,
                &user.user.client_certificate,
                &user.user.client_certificate_data,
            )?,
            client_key_pem: resolve(base_dir, &user.user.client_key, &user.user.client_key_data)?,
        })
    }
}

/// Build the admin kubeconfig served to operators.
///
/// Three contexts over the same admin credentials: `root` addressing the
/// root workspace, `default` addressing `root:default`, and `system:admin`
/// addressing the shard directly. `default` is current.
pub fn admin_kubeconfig(
    base_host: &str,
    serving_ca_file: &str,
    client_cert_file: &str,
    client_key_file: &str,
) -> Kubeconfig {
    let cluster = |server: String| ClusterEntry {
        server,
        certificate_authority: Some(serving_ca_file.to_string()),
        certificate_authority_data: None,
    };

    Kubeconfig {
        api_version: "v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![
            NamedCluster {
                name: "root".to_string(),
                cluster: cluster(format!("{base_host}/clusters/root")),
            },
            NamedCluster {
                name: "root:default".to_string(),
                cluster: cluster(format!("{base_host}/clusters/root:default")),
            },
            NamedCluster {
                name: "system:admin".to_string(),
                cluster: cluster(base_host.to_string()),
            },
        ],
        users: vec![NamedUser {
            name: "admin".to_string(),
            user: UserEntry {
                client_certificate: Some(client_cert_file.to_string()),
                client_key: Some(client_key_file.to_string()),
                ..Default::default()
            },
        }],
        contexts: vec![
            NamedContext {
                name: "root".to_string(),
                context: ContextEntry {
                    cluster: "root".to_string(),
                    user: "admin".to_string(),
                },
            },
            NamedContext {
                name: "default".to_string(),
                context: ContextEntry {
                    cluster: "root:default".to_string(),
                    user: "admin".to_string(),
                },
            },
            NamedContext {
                name: "system:admin".to_string(),
                context: ContextEntry {
                    cluster: "system:admin".to_string(),
                    user: "admin".to_string(),
                },
            },
        ],
        current_context: "default".to_string(),
    }
}
