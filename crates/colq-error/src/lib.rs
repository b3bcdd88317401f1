// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod classify;
mod context;

pub use classify::{RequestBehaviour, ServerError, ServerErrorEntry, classify};
pub use context::RequestContext;

use std::fmt;

// ---------------------------------------------------------------------------
// Error: the public taxonomy
// ---------------------------------------------------------------------------

/// Error codes the analytics service reserves for invalid credentials.
pub const SERVER_CODE_INVALID_CREDENTIAL: i64 = 20000;
/// Error code the analytics service reserves for server-side timeouts.
pub const SERVER_CODE_TIMEOUT: i64 = 21002;

/// The errors a caller can observe from a logical query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Generic wrapper for anything not covered by a more specific kind.
    #[error("{0}")]
    Analytics(String),
    /// The server rejected the credential (HTTP 401 or server code 20000).
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    /// The caller deadline elapsed, an attempt outran its budget, the
    /// connect timer fired, or the server reported code 21002.
    #[error("{0}")]
    Timeout(String),
    /// A server-side query failure.
    #[error("query error {code}: {server_message}")]
    Query {
        /// The server's message, verbatim.
        server_message: String,
        /// The server's error code.
        code: i64,
    },
    /// The caller supplied an invalid option (non-positive timeout,
    /// conflicting trust sources, malformed connection string).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The query was cancelled. Propagated verbatim, never wrapped and
    /// never retried.
    #[error("operation was aborted")]
    Aborted,
}

impl Error {
    /// Rebuild the error with its message suffixed by the request
    /// context's string form. [`Error::Aborted`] is returned untouched.
    #[must_use]
    pub fn with_context(self, ctx: &RequestContext) -> Error {
        match self {
            Error::Analytics(msg) => Error::Analytics(ctx.attach_error_context(&msg)),
            Error::InvalidCredential(msg) => {
                Error::InvalidCredential(ctx.attach_error_context(&msg))
            }
            Error::Timeout(msg) => Error::Timeout(ctx.attach_error_context(&msg)),
            Error::Query {
                server_message,
                code,
            } => Error::Query {
                server_message: ctx.attach_error_context(&server_message),
                code,
            },
            Error::InvalidArgument(msg) => Error::InvalidArgument(ctx.attach_error_context(&msg)),
            Error::Aborted => Error::Aborted,
        }
    }
}

// ---------------------------------------------------------------------------
// AttemptFailure: internal per-attempt conditions
// ---------------------------------------------------------------------------

/// Everything a single attempt can raise before classification.
///
/// These never surface to the caller directly; the classifier maps each of
/// them into a [`RequestBehaviour`].
#[derive(Debug, thiserror::Error)]
pub enum AttemptFailure {
    /// The response carried an unexpected HTTP status.
    #[error("http status {0}")]
    HttpStatus(u16),
    /// The socket did not reach the connected state before the connect
    /// timer fired.
    #[error("connect timeout dialing {0}")]
    ConnectTimeout(String),
    /// A transport-level connection failure with a recovered cause.
    #[error("connection failed ({kind}): {detail}")]
    Connection {
        /// The recovered cause kind, which decides retriability.
        kind: ConnectCause,
        /// Human-readable failure detail.
        detail: String,
    },
    /// The rotation pool's own hostname resolution failed.
    #[error("dns resolution failed for {hostname}: {detail}")]
    DnsResolve {
        /// Hostname being resolved.
        hostname: String,
        /// Failure detail.
        detail: String,
    },
    /// Every resolved address has been used by this query.
    #[error("dns records exhausted for {0}")]
    DnsExhausted(String),
    /// The server reported an errors array.
    #[error("server reported {} error(s)", entries.len())]
    ServerErrors {
        /// Raw entries, either serialized fragments from the streamer or
        /// already-parsed objects from a buffered body.
        entries: Vec<ServerErrorEntry>,
    },
    /// An already-typed timeout; passed through by the classifier.
    #[error("{0}")]
    Timeout(String),
    /// The attempt was cancelled.
    #[error("operation was aborted")]
    Aborted,
    /// Anything else: stream teardown, parse failures, bad response bodies.
    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// ConnectCause: cause kinds and the retriability deny-list
// ---------------------------------------------------------------------------

/// Cause of a connection-level failure, recovered from the error chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectCause {
    /// The connect-phase hostname lookup failed.
    DnsResolution,
    /// The peer certificate failed validation.
    CertificateInvalid,
    /// The peer certificate does not cover the requested hostname.
    HostnameMismatch,
    /// The platform reported memory exhaustion.
    OutOfMemory,
    /// The peer refused the connection.
    ConnectionRefused,
    /// The connection was reset mid-flight.
    ConnectionReset,
    /// Any other transport failure.
    Other,
}

impl ConnectCause {
    /// A cause is non-retriable iff it is on the fixed deny-list:
    /// hostname/DNS failures, certificate/PKI validation failures,
    /// hostname mismatch, and out-of-memory. Everything else retries.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            ConnectCause::DnsResolution
                | ConnectCause::CertificateInvalid
                | ConnectCause::HostnameMismatch
                | ConnectCause::OutOfMemory
        )
    }

    /// Recover a cause kind from an error's rendered chain.
    ///
    /// Transport libraries bury the concrete cause several sources deep and
    /// behind unstable types, so the chain is matched textually the way the
    /// rest of the ecosystem does it.
    #[must_use]
    pub fn from_error_chain(err: &(dyn std::error::Error + 'static)) -> ConnectCause {
        let mut rendered = String::new();
        let mut cursor: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = cursor {
            rendered.push_str(&e.to_string().to_ascii_lowercase());
            rendered.push('\n');
            cursor = e.source();
        }
        Self::from_rendered(&rendered)
    }

    fn from_rendered(rendered: &str) -> ConnectCause {
        let has = |needles: &[&str]| needles.iter().any(|n| rendered.contains(n));
        if has(&["notvalidforname", "hostname mismatch", "certificate not valid for name"]) {
            ConnectCause::HostnameMismatch
        } else if has(&[
            "certificate",
            "unknownissuer",
            "invalid peer certificate",
            "self-signed",
            "pki",
        ]) {
            ConnectCause::CertificateInvalid
        } else if has(&[
            "dns error",
            "failed to lookup address",
            "name or service not known",
            "nodename nor servname",
            "no such host",
        ]) {
            ConnectCause::DnsResolution
        } else if has(&["out of memory", "cannot allocate memory"]) {
            ConnectCause::OutOfMemory
        } else if has(&["connection refused"]) {
            ConnectCause::ConnectionRefused
        } else if has(&["connection reset", "broken pipe"]) {
            ConnectCause::ConnectionReset
        } else {
            ConnectCause::Other
        }
    }
}

impl fmt::Display for ConnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectCause::DnsResolution => "dns resolution",
            ConnectCause::CertificateInvalid => "certificate invalid",
            ConnectCause::HostnameMismatch => "hostname mismatch",
            ConnectCause::OutOfMemory => "out of memory",
            ConnectCause::ConnectionRefused => "connection refused",
            ConnectCause::ConnectionReset => "connection reset",
            ConnectCause::Other => "transport failure",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Error display -----------------------------------------------------

    #[test]
    fn query_error_display_carries_code_and_message() {
        let err = Error::Query {
            server_message: "syntax error".into(),
            code: 24000,
        };
        assert_eq!(err.to_string(), "query error 24000: syntax error");
    }

    #[test]
    fn aborted_is_never_decorated() {
        let mut ctx = RequestContext::new(3);
        ctx.record_dispatch_to("10.0.0.1:8095");
        assert_eq!(Error::Aborted.with_context(&ctx), Error::Aborted);
    }

    #[test]
    fn with_context_suffixes_message() {
        let mut ctx = RequestContext::new(3);
        ctx.set_route("POST", "/api/v1/request");
        let err = Error::Analytics("boom".into()).with_context(&ctx);
        let Error::Analytics(msg) = err else {
            panic!("kind changed");
        };
        assert!(msg.starts_with("boom. ErrorContext:"));
        assert!(msg.contains("method=POST"));
    }

    // -- ConnectCause ------------------------------------------------------

    #[test]
    fn deny_list_is_non_retriable() {
        assert!(!ConnectCause::DnsResolution.is_retriable());
        assert!(!ConnectCause::CertificateInvalid.is_retriable());
        assert!(!ConnectCause::HostnameMismatch.is_retriable());
        assert!(!ConnectCause::OutOfMemory.is_retriable());
    }

    #[test]
    fn everything_else_is_retriable() {
        assert!(ConnectCause::ConnectionRefused.is_retriable());
        assert!(ConnectCause::ConnectionReset.is_retriable());
        assert!(ConnectCause::Other.is_retriable());
    }

    #[test]
    fn cause_recovered_from_io_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        assert_eq!(
            ConnectCause::from_error_chain(&io),
            ConnectCause::ConnectionRefused
        );
    }

    #[test]
    fn cause_recovered_from_tls_text() {
        assert_eq!(
            ConnectCause::from_rendered("invalid peer certificate: unknownissuer"),
            ConnectCause::CertificateInvalid
        );
        assert_eq!(
            ConnectCause::from_rendered("certificate error: notvalidforname"),
            ConnectCause::HostnameMismatch
        );
    }

    #[test]
    fn cause_recovered_from_dns_text() {
        assert_eq!(
            ConnectCause::from_rendered("dns error: failed to lookup address information"),
            ConnectCause::DnsResolution
        );
    }

    #[test]
    fn unknown_text_is_other_and_retriable() {
        let cause = ConnectCause::from_rendered("some transient socket weirdness");
        assert_eq!(cause, ConnectCause::Other);
        assert!(cause.is_retriable());
    }
}
