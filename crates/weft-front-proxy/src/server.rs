//! Proxy server startup
//!
//! Terminates TLS with the proxy's serving certificate and, when a client
//! CA is configured, requests (but does not require) client certificates so
//! certificate-bearing admins and token-bearing clients can share one port.
//! Client identity is authenticated by the shard behind the proxy.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use thiserror::Error;
use tracing::info;

use crate::mapping;
use crate::proxy::{proxy_router, ProxyError, ProxyState};

/// Front-proxy runtime configuration, mirroring the CLI flags.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Ordered mapping file
    pub mapping_file: PathBuf,
    /// Kubeconfig for the root shard (upstream administrative access)
    pub root_kubeconfig: PathBuf,
    /// CA bundle for optional client-certificate authentication
    pub client_ca_file: Option<PathBuf>,
    /// Serving certificate PEM file
    pub tls_cert_file: PathBuf,
    /// Serving key PEM file
    pub tls_private_key_file: PathBuf,
    /// Port to serve on
    pub secure_port: u16,
}

/// Errors from proxy startup
#[derive(Debug, Error)]
pub enum ServeError {
    /// The mapping file is unusable
    #[error(transparent)]
    Mapping(#[from] mapping::MappingError),

    /// A backend client could not be built
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// TLS material is unusable
    #[error("tls configuration error: {0}")]
    Tls(String),

    /// The serve loop failed
    #[error("server error: {0}")]
    Serve(String),
}

/// Run the front proxy until the process is terminated.
pub async fn run(config: ProxyConfig) -> Result<(), ServeError> {
    let mappings = mapping::load_mappings(&config.mapping_file)?;
    info!(
        mappings = mappings.len(),
        root_kubeconfig = %config.root_kubeconfig.display(),
        "loaded backend mappings"
    );

    let base_dir = config
        .mapping_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let state = Arc::new(ProxyState::new(mappings, &base_dir)?);
    let router = proxy_router(state);

    let tls = server_tls_config(
        &config.tls_cert_file,
        &config.tls_private_key_file,
        config.client_ca_file.as_deref(),
    )?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.secure_port));
    info!(addr = %addr, "starting front proxy");

    axum_server::bind_rustls(addr, RustlsConfig::from_config(Arc::new(tls)))
        .serve(router.into_make_service())
        .await
        .map_err(|e| ServeError::Serve(e.to_string()))?;

    Ok(())
}

/// Build the rustls server config: serving cert/key, plus optional client
/// certificate verification against the client CA.
pub fn server_tls_config(
    cert_file: &Path,
    key_file: &Path,
    client_ca_file: Option<&Path>,
) -> Result<rustls::ServerConfig, ServeError> {
    let certs = load_certs(cert_file)?;
    let key = load_key(key_file)?;

    let builder = rustls::ServerConfig::builder();
    let config = match client_ca_file {
        Some(ca_file) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_file)? {
                roots
                    .add(cert)
                    .map_err(|e| ServeError::Tls(format!("bad client CA certificate: {e}")))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()
                .map_err(|e| ServeError::Tls(format!("client verifier: {e}")))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    }
    .with_single_cert(certs, key)
    .map_err(|e| ServeError::Tls(format!("serving certificate: {e}")))?;

    Ok(config)
}

fn load_certs(
    path: &Path,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, ServeError> {
    let file = std::fs::File::open(path)
        .map_err(|e| ServeError::Tls(format!("failed to open {}: {e}", path.display())))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServeError::Tls(format!("failed to parse {}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>, ServeError> {
    let file = std::fs::File::open(path)
        .map_err(|e| ServeError::Tls(format!("failed to open {}: {e}", path.display())))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServeError::Tls(format!("failed to parse {}: {e}", path.display())))?
        .ok_or_else(|| ServeError::Tls(format!("no private key in {}", path.display())))
}
