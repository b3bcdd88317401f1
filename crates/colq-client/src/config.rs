// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection strings, timeouts, TLS trust configuration, and credentials.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use colq_error::Error;
use tracing::warn;

/// Default connect timeout applied to each attempt's socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default deadline budget for a logical query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(75);
/// Default retry cap; a query runs at most this many retries plus the
/// initial attempt.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 7;

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// A basic-auth credential. The client treats it as opaque.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Username sent in the `Authorization` header.
    pub username: String,
    /// Password sent in the `Authorization` header.
    pub password: String,
}

impl Credential {
    /// Create a credential.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SecurityConfig
// ---------------------------------------------------------------------------

/// Certificate trust configuration.
///
/// The four trust sources are mutually exclusive; leaving them all unset
/// trusts the TLS backend's bundled roots. Verification may be disabled
/// for development.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    /// Trust only the certificates in a PEM file at this path.
    pub trust_only_pem_file: Option<PathBuf>,
    /// Trust only the certificates in this PEM string.
    pub trust_only_pem_string: Option<String>,
    /// Trust only this explicit list of PEM certificates.
    pub trust_only_certificates: Option<Vec<String>>,
    /// Trust only the bundled roots, explicitly.
    pub trust_only_bundled: bool,
    /// Skip peer certificate verification entirely.
    pub disable_server_certificate_verification: bool,
}

impl SecurityConfig {
    /// Reject combinations of mutually exclusive trust sources.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when more than one source is set.
    pub fn validate(&self) -> Result<(), Error> {
        let sources = usize::from(self.trust_only_pem_file.is_some())
            + usize::from(self.trust_only_pem_string.is_some())
            + usize::from(self.trust_only_certificates.is_some())
            + usize::from(self.trust_only_bundled);
        if sources > 1 {
            return Err(Error::InvalidArgument(
                "trust sources are mutually exclusive; configure at most one of bundled roots, \
                 a PEM file, a PEM string, or an explicit certificate list"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ClusterOptions
// ---------------------------------------------------------------------------

/// Cluster-wide defaults consumed by the transport and the executor.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Socket connect budget per attempt (TLS handshake included).
    pub connect_timeout: Duration,
    /// Default deadline budget per logical query.
    pub query_timeout: Duration,
    /// Retry cap per logical query.
    pub max_retry_attempts: u32,
    /// TLS trust configuration.
    pub security: SecurityConfig,
    /// Fixed endpoint addresses that bypass DNS resolution. Each query
    /// still draws a distinct entry per attempt, so an address listed N
    /// times backs up to N attempts. Intended for bring-up and tests
    /// against endpoints without rotation-friendly DNS.
    pub seed_addresses: Option<Vec<SocketAddr>>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            security: SecurityConfig::default(),
            seed_addresses: None,
        }
    }
}

impl ClusterOptions {
    /// Reject non-positive timeouts and conflicting trust sources.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] describing the offending option.
    pub fn validate(&self) -> Result<(), Error> {
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidArgument(
                "connect timeout must be positive".to_string(),
            ));
        }
        if self.query_timeout.is_zero() {
            return Err(Error::InvalidArgument(
                "query timeout must be positive".to_string(),
            ));
        }
        self.security.validate()
    }
}

// ---------------------------------------------------------------------------
// ConnectionString
// ---------------------------------------------------------------------------

/// A parsed connection string: scheme, endpoint, and the recognised query
/// parameters folded into [`ClusterOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Whether the endpoint speaks TLS.
    pub tls: bool,
    /// The endpoint hostname; also the TLS server name.
    pub host: String,
    /// The endpoint port.
    pub port: u16,
}

impl ConnectionString {
    /// Parse a connection string such as
    /// `couchbases://analytics.example.com?timeout.query_timeout=2m`,
    /// applying the recognised parameters to `options`.
    ///
    /// Recognised parameters: `timeout.connect_timeout`,
    /// `timeout.query_timeout` (Go-syntax durations),
    /// `security.trust_only_pem_file`, and
    /// `security.disable_server_certificate_verification`
    /// (`true|false|1|0`). Anything else is logged at `warn` and ignored.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for unparseable strings, unsupported
    /// schemes, and malformed values of the recognised parameters.
    pub fn parse(raw: &str, options: &mut ClusterOptions) -> Result<Self, Error> {
        let url = reqwest::Url::parse(raw)
            .map_err(|e| Error::InvalidArgument(format!("invalid connection string: {e}")))?;

        let tls = match url.scheme() {
            "couchbases" | "https" => true,
            "couchbase" | "http" => false,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported connection-string scheme {other:?}"
                )));
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| {
                Error::InvalidArgument("connection string is missing a hostname".to_string())
            })?
            .to_string();
        let port = url.port().unwrap_or(if tls { 443 } else { 80 });

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "timeout.connect_timeout" => {
                    options.connect_timeout = parse_duration_param(&key, &value)?;
                }
                "timeout.query_timeout" => {
                    options.query_timeout = parse_duration_param(&key, &value)?;
                }
                "security.trust_only_pem_file" => {
                    options.security.trust_only_pem_file = Some(PathBuf::from(value.as_ref()));
                }
                "security.disable_server_certificate_verification" => {
                    options.security.disable_server_certificate_verification =
                        parse_bool_param(&key, &value)?;
                }
                other => {
                    warn!(parameter = other, "ignoring unrecognised connection-string parameter");
                }
            }
        }

        Ok(Self { tls, host, port })
    }
}

fn parse_duration_param(key: &str, value: &str) -> Result<Duration, Error> {
    let millis = colq_duration::parse_duration(value)
        .map_err(|e| Error::InvalidArgument(format!("invalid duration for {key}: {e}")))?;
    if millis <= 0.0 {
        return Err(Error::InvalidArgument(format!(
            "{key} must be positive, got {value:?}"
        )));
    }
    Ok(Duration::from_secs_f64(millis / 1_000.0))
}

fn parse_bool_param(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::InvalidArgument(format!(
            "invalid boolean for {key}: {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
