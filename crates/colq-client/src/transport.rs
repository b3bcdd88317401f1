// SPDX-License-Identifier: MIT OR Apache-2.0
//! The shared HTTP transport: one keep-alive client per resolved address.
//!
//! Retries dispatch to distinct addresses of the same hostname, so the
//! transport pins each client to one address while keeping the hostname as
//! the URL host (and therefore the TLS server name). Clients are built on
//! first use and cached for the cluster's lifetime.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use colq_error::Error;
use tracing::debug;

use crate::config::{ClusterOptions, ConnectionString, SecurityConfig};
use crate::request::REQUEST_PATH;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Cluster-owned HTTP transport, shared by every logical query.
#[derive(Debug)]
pub struct Transport {
    tls: bool,
    hostname: String,
    port: u16,
    connect_timeout: Duration,
    roots: Vec<reqwest::Certificate>,
    danger_disable_verification: bool,
    clients: Mutex<HashMap<SocketAddr, reqwest::Client>>,
}

impl Transport {
    /// Build a transport for the endpoint described by a connection string.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for conflicting trust sources, unreadable
    /// PEM material, or non-positive timeouts.
    pub fn new(conn: &ConnectionString, options: &ClusterOptions) -> Result<Self, Error> {
        options.validate()?;
        let roots = load_roots(&options.security)?;
        Ok(Self {
            tls: conn.tls,
            hostname: conn.host.clone(),
            port: conn.port,
            connect_timeout: options.connect_timeout,
            roots,
            danger_disable_verification: options
                .security
                .disable_server_certificate_verification,
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// The hostname queries resolve and authenticate against.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The endpoint port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The full request URL for the analytics service.
    #[must_use]
    pub fn request_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}{REQUEST_PATH}", self.hostname, self.port)
    }

    /// The keep-alive client pinned to `addr`, building it on first use.
    ///
    /// # Errors
    ///
    /// [`Error::Analytics`] when the client cannot be constructed.
    pub fn client_for(&self, addr: SocketAddr) -> Result<reqwest::Client, Error> {
        let mut clients = self.clients.lock().expect("transport client cache poisoned");
        if let Some(client) = clients.get(&addr) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .resolve(&self.hostname, addr)
            .tcp_nodelay(true)
            .pool_idle_timeout(Duration::from_secs(30));
        if self.tls {
            builder = builder
                .use_rustls_tls()
                .min_tls_version(reqwest::tls::Version::TLS_1_3);
            for root in &self.roots {
                builder = builder.add_root_certificate(root.clone());
            }
            if self.danger_disable_verification {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }
        let client = builder
            .build()
            .map_err(|e| Error::Analytics(format!("failed to build http client: {e}")))?;
        debug!(%addr, hostname = %self.hostname, "built transport client");
        clients.insert(addr, client.clone());
        Ok(client)
    }
}

fn load_roots(security: &SecurityConfig) -> Result<Vec<reqwest::Certificate>, Error> {
    if let Some(path) = &security.trust_only_pem_file {
        let pem = std::fs::read(path).map_err(|e| {
            Error::InvalidArgument(format!("cannot read trust PEM file {}: {e}", path.display()))
        })?;
        return parse_bundle(&pem);
    }
    if let Some(pem) = &security.trust_only_pem_string {
        return parse_bundle(pem.as_bytes());
    }
    if let Some(certs) = &security.trust_only_certificates {
        let mut roots = Vec::with_capacity(certs.len());
        for pem in certs {
            roots.push(reqwest::Certificate::from_pem(pem.as_bytes()).map_err(|e| {
                Error::InvalidArgument(format!("invalid trust certificate: {e}"))
            })?);
        }
        return Ok(roots);
    }
    // Bundled (or unspecified) trust: the TLS backend's built-in roots.
    Ok(Vec::new())
}

fn parse_bundle(pem: &[u8]) -> Result<Vec<reqwest::Certificate>, Error> {
    reqwest::Certificate::from_pem_bundle(pem)
        .map_err(|e| Error::InvalidArgument(format!("invalid trust PEM bundle: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
