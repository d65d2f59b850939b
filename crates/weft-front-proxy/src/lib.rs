//! TLS-terminating front proxy for the weft control plane
//!
//! Maps URL path prefixes onto physical shards: clients address
//! `/clusters/<workspace>/...` on one stable endpoint, the proxy
//! terminates TLS and forwards to the owning shard over mTLS. Also home to
//! the launcher used by sharded test harnesses (spawn the proxy binary,
//! tee its logs, poll readiness) and the admin kubeconfig emitter.

#![deny(missing_docs)]

pub mod head_writer;
pub mod kubeconfig;
pub mod launch;
pub mod mapping;
pub mod pki;
pub mod proxy;
pub mod server;

pub use head_writer::HeadWriter;
pub use kubeconfig::{admin_kubeconfig, ClientMaterial, Kubeconfig, KubeconfigError};
pub use launch::{start_front_proxy, FrontProxyConfig, LaunchError};
pub use mapping::{load_mappings, MappingError, PathMapping};
pub use pki::{PkiError, ServingCa};
pub use proxy::{proxy_router, Backend, ProxyError, ProxyState};
pub use server::{run, ProxyConfig, ServeError};
