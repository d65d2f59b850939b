use std::path::PathBuf;

use clap::Parser;

use weft_front_proxy::server::{run, ProxyConfig};

/// weft-front-proxy - TLS-terminating entry point mapping URL prefixes
/// onto weft shards
#[derive(Parser, Debug)]
#[command(name = "weft-front-proxy", version, about, long_about = None)]
struct Cli {
    /// Ordered YAML file mapping path prefixes to backends
    #[arg(long)]
    mapping_file: PathBuf,

    /// Kubeconfig granting administrative access to the root shard
    #[arg(long)]
    root_kubeconfig: PathBuf,

    /// CA bundle for optional client-certificate authentication
    #[arg(long)]
    client_ca_file: Option<PathBuf>,

    /// Serving certificate PEM file
    #[arg(long)]
    tls_cert_file: PathBuf,

    /// Serving private key PEM file
    #[arg(long)]
    tls_private_key_file: PathBuf,

    /// Port to serve on
    #[arg(long, default_value_t = 6443)]
    secure_port: u16,

    /// Log verbosity (accepted for compatibility, use RUST_LOG to filter)
    #[arg(long, default_value_t = 0)]
    v: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install crypto provider: {e:?}");
    }

    weft_common::telemetry::init("weft-front-proxy")
        .map_err(|e| anyhow::anyhow!("telemetry init failed: {e}"))?;

    let cli = Cli::parse();
    tracing::debug!(v = cli.v, "parsed flags");

    let config = ProxyConfig {
        mapping_file: cli.mapping_file,
        root_kubeconfig: cli.root_kubeconfig,
        client_ca_file: cli.client_ca_file,
        tls_cert_file: cli.tls_cert_file,
        tls_private_key_file: cli.tls_private_key_file,
        secure_port: cli.secure_port,
    };

    run(config).await?;
    Ok(())
}
