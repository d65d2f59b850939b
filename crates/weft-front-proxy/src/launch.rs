//! Front-proxy launcher
//!
//! Used by sharded test harnesses: prepares the proxy's working directory
//! (mapping file, root kubeconfig, serving certificate), spawns the proxy
//! binary, tees its output, and polls readiness until the proxy answers
//! `/readyz` with 200. The child is killed when the launcher's cancellation
//! token fires and never outlives the launcher.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::head_writer::HeadWriter;
use crate::kubeconfig::{Kubeconfig, KubeconfigError};
use crate::mapping::PathMapping;
use crate::pki::{PkiError, ServingCa};

/// Launcher configuration
#[derive(Clone, Debug)]
pub struct FrontProxyConfig {
    /// Proxy working directory (mapping, serving cert, log)
    pub work_dir: PathBuf,
    /// Shared shard material directory (serving CA, client CA, admin
    /// kubeconfig)
    pub shard_dir: PathBuf,
    /// Admin kubeconfig of the root shard, minified into the proxy's
    /// upstream credentials
    pub root_shard_kubeconfig: PathBuf,
    /// Path of the proxy binary to spawn
    pub binary: PathBuf,
    /// Host IP baked into the serving certificate SANs
    pub host_ip: String,
    /// Extra arguments passed through to the proxy
    pub extra_args: Vec<String>,
    /// Keep mirroring child output after readiness
    pub verbose: bool,
    /// Log file path; defaults to `<work_dir>/proxy.log`
    pub log_file: Option<PathBuf>,
}

/// Errors from the launcher
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Filesystem preparation failed
    #[error("launch io error: {0}")]
    Io(#[from] std::io::Error),

    /// Mapping or kubeconfig serialization failed
    #[error("launch config error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// Kubeconfig preparation failed
    #[error(transparent)]
    Kubeconfig(#[from] KubeconfigError),

    /// Serving certificate generation failed
    #[error(transparent)]
    Pki(#[from] PkiError),

    /// The launcher was canceled before the proxy became ready
    #[error("context canceled")]
    Canceled,

    /// The proxy exited before becoming ready
    #[error("front proxy terminated with exit code {0}")]
    Exited(i32),
}

/// Prepared launch: the argument list the child is spawned with.
#[derive(Debug)]
pub struct PreparedLaunch {
    /// Full argument list after the binary path
    pub args: Vec<String>,
    /// Where the admin kubeconfig for readiness probing lives
    pub admin_kubeconfig: PathBuf,
    /// Log file the child's output is teed into
    pub log_file: PathBuf,
}

/// Write the mapping file, root kubeconfig, and serving certificate, and
/// assemble the child's argument list.
pub fn prepare(config: &FrontProxyConfig, ca: &ServingCa) -> Result<PreparedLaunch, LaunchError> {
    std::fs::create_dir_all(&config.work_dir)?;
    std::fs::create_dir_all(&config.shard_dir)?;

    // Both public prefixes route to the root shard; the proxy presents its
    // request-header client certificate upstream.
    let serving_ca_path = config.shard_dir.join("serving-ca.crt");
    let mapping_path = config.work_dir.join("mapping.yaml");
    let mappings: Vec<PathMapping> = ["/services/", "/clusters/"]
        .into_iter()
        .map(|path| PathMapping {
            path: path.to_string(),
            backend: "https://localhost:6444".to_string(),
            backend_server_ca: serving_ca_path.to_string_lossy().into_owned(),
            proxy_client_cert: config
                .work_dir
                .join("requestheader.crt")
                .to_string_lossy()
                .into_owned(),
            proxy_client_key: config
                .work_dir
                .join("requestheader.key")
                .to_string_lossy()
                .into_owned(),
        })
        .collect();
    std::fs::write(&mapping_path, serde_yaml::to_string(&mappings)?)?;

    // Minified root-shard credentials for the proxy's upstream access.
    let mut root = Kubeconfig::load(&config.root_shard_kubeconfig)?;
    root.current_context = "system:admin".to_string();
    root.minify()?;
    let root_kubeconfig_path = config.shard_dir.join("root.kubeconfig");
    root.write(&root_kubeconfig_path)?;

    // Serving certificate for localhost and the advertised host IP.
    let hostnames = ["localhost", config.host_ip.as_str()];
    info!(hostnames = ?hostnames, "creating front-proxy serving cert");
    let (cert_pem, key_pem) = ca.make_server_cert(&hostnames)?;
    let cert_path = config.work_dir.join("apiserver.crt");
    let key_path = config.work_dir.join("apiserver.key");
    std::fs::write(&cert_path, cert_pem)?;
    std::fs::write(&key_path, key_pem)?;

    let mut args = vec![
        format!("--mapping-file={}", mapping_path.display()),
        format!("--root-kubeconfig={}", root_kubeconfig_path.display()),
        format!(
            "--client-ca-file={}",
            config.shard_dir.join("client-ca.crt").display()
        ),
        format!("--tls-cert-file={}", cert_path.display()),
        format!("--tls-private-key-file={}", key_path.display()),
        "--secure-port=6443".to_string(),
    ];
    args.extend(config.extra_args.iter().cloned());

    Ok(PreparedLaunch {
        args,
        admin_kubeconfig: config.shard_dir.join("admin.kubeconfig"),
        log_file: config
            .log_file
            .clone()
            .unwrap_or_else(|| config.work_dir.join("proxy.log")),
    })
}

/// Spawn the proxy and wait until it is ready.
///
/// Returns once `/readyz` answers 200. The child keeps running afterwards;
/// it is killed when `token` is canceled. Returns an error if the token is
/// canceled or the child exits before readiness.
pub async fn start_front_proxy(
    config: &FrontProxyConfig,
    ca: &ServingCa,
    token: CancellationToken,
) -> Result<(), LaunchError> {
    let prepared = prepare(config, ca)?;

    let command_line = format!(
        "{} {}",
        config.binary.display(),
        prepared.args.join(" ")
    );
    info!(command = %command_line, "running front proxy");

    let mut child = Command::new(&config.binary)
        .args(&prepared.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&prepared.log_file)?;
    let writer = HeadWriter::new(log_file, std::io::stdout(), "[proxy] ");

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(writer.clone().pump(stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(writer.clone().pump(stderr));
    }

    // The watcher owns the child: it reports the exit code if the proxy
    // dies, and kills it when the token fires so no orphan survives.
    let (exit_tx, exit_rx) = oneshot::channel();
    let child_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
                let _ = exit_tx.send(code);
            }
            _ = child_token.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill front proxy child");
                }
            }
        }
    });

    let shard_dir = config.shard_dir.clone();
    let admin_kubeconfig = prepared.admin_kubeconfig.clone();
    let factory = move || {
        // The admin kubeconfig is rewritten during startup, so it is
        // re-read on every probe iteration.
        let kubeconfig = Kubeconfig::load(&admin_kubeconfig).ok()?;
        let material = kubeconfig
            .client_material(Some("system:admin"), &shard_dir)
            .ok()?;

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(5));
        if let Some(ca_pem) = &material.ca_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(ca_pem).ok()?);
        }
        if let (Some(cert), Some(key)) = (&material.client_cert_pem, &material.client_key_pem) {
            let mut pem = cert.clone();
            pem.extend_from_slice(key);
            builder = builder.identity(reqwest::Identity::from_pem(&pem).ok()?);
        }

        let url = format!("{}/readyz", material.server.trim_end_matches('/'));
        Some((builder.build().ok()?, url))
    };

    info!("waiting for the front proxy to be ready");
    wait_for_ready(&token, exit_rx, factory).await?;

    if !config.verbose {
        writer.stop_out();
    }
    info!("front proxy is ready");

    Ok(())
}

/// Poll `/readyz` on a one-second cadence until it answers 200.
///
/// Cancellation and child exit are re-checked before every probe. The
/// client factory runs each iteration so credential changes during startup
/// are picked up.
pub(crate) async fn wait_for_ready<F>(
    token: &CancellationToken,
    mut exited: oneshot::Receiver<i32>,
    mut client_factory: F,
) -> Result<(), LaunchError>
where
    F: FnMut() -> Option<(reqwest::Client, String)>,
{
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;

        if token.is_cancelled() {
            return Err(LaunchError::Canceled);
        }
        if let Ok(code) = exited.try_recv() {
            return Err(LaunchError::Exited(code));
        }

        let Some((client, url)) = client_factory() else {
            debug!("front proxy not ready: admin kubeconfig not usable yet");
            continue;
        };

        match client.get(&url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => return Ok(()),
            Ok(response) => {
                debug!(status = %response.status(), "front proxy not ready");
            }
            Err(e) => {
                debug!(error = %e, "front proxy not ready");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use axum::routing::get;
    use axum::Router;

    use crate::kubeconfig::admin_kubeconfig;
    use crate::mapping::load_mappings;

    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("weft-launch-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_config(tag: &str) -> FrontProxyConfig {
        let base = temp_dir(tag);
        let root_shard = base.join("shard-0");
        std::fs::create_dir_all(&root_shard).unwrap();
        admin_kubeconfig("https://localhost:6444", "ca.crt", "admin.crt", "admin.key")
            .write(&root_shard.join("admin.kubeconfig"))
            .unwrap();

        FrontProxyConfig {
            work_dir: base.join("front-proxy"),
            shard_dir: base.join("shard"),
            root_shard_kubeconfig: root_shard.join("admin.kubeconfig"),
            binary: PathBuf::from("weft-front-proxy"),
            host_ip: "192.168.1.10".to_string(),
            extra_args: vec!["--v=3".to_string()],
            verbose: false,
            log_file: None,
        }
    }

    #[test]
    fn test_prepare_writes_mapping_and_certs() {
        let config = test_config("prepare");
        let ca = ServingCa::new("test CA").unwrap();

        let prepared = prepare(&config, &ca).unwrap();

        // Two prefixes, loadable back through the mapping loader.
        let mappings = load_mappings(&config.work_dir.join("mapping.yaml")).unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].path, "/services/");
        assert_eq!(mappings[1].path, "/clusters/");

        // Serving cert material exists.
        assert!(config.work_dir.join("apiserver.crt").exists());
        assert!(config.work_dir.join("apiserver.key").exists());

        // Root kubeconfig is minified to the system:admin context.
        let root = Kubeconfig::load(&config.shard_dir.join("root.kubeconfig")).unwrap();
        assert_eq!(root.current_context, "system:admin");
        assert_eq!(root.contexts.len(), 1);
        assert_eq!(root.clusters.len(), 1);

        // Flags cover the full contract.
        let flags = prepared.args.join(" ");
        for flag in [
            "--mapping-file=",
            "--root-kubeconfig=",
            "--client-ca-file=",
            "--tls-cert-file=",
            "--tls-private-key-file=",
            "--secure-port=6443",
        ] {
            assert!(flags.contains(flag), "missing {flag} in {flags}");
        }
        assert!(prepared.args.contains(&"--v=3".to_string()));

        std::fs::remove_dir_all(config.work_dir.parent().unwrap()).ok();
    }

    /// Readiness stub answering 503 twice, then 200.
    async fn readiness_stub() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = hits.clone();
        let app = Router::new().route(
            "/readyz",
            get(move || {
                let hits = state.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "not ready")
                    } else {
                        (axum::http::StatusCode::OK, "ok")
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/readyz"), hits)
    }

    #[tokio::test]
    async fn test_wait_for_ready_retries_until_200() {
        let (url, hits) = readiness_stub().await;
        let token = CancellationToken::new();
        let (_tx, rx) = oneshot::channel();

        let started = Instant::now();
        wait_for_ready(&token, rx, move || {
            Some((reqwest::Client::new(), url.clone()))
        })
        .await
        .unwrap();

        // Two failures plus the success probe, one second apart.
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_for_ready_returns_on_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        let (_tx, rx) = oneshot::channel();

        let err = wait_for_ready(&token, rx, || None).await.unwrap_err();
        assert!(matches!(err, LaunchError::Canceled));
    }

    #[tokio::test]
    async fn test_wait_for_ready_surfaces_child_exit() {
        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        tx.send(2).unwrap();

        let err = wait_for_ready(&token, rx, || None).await.unwrap_err();
        match err {
            LaunchError::Exited(code) => assert_eq!(code, 2),
            other => panic!("expected exit error, got {other}"),
        }
    }
}
