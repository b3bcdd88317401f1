// SPDX-License-Identifier: MIT OR Apache-2.0
//! Maps any per-attempt condition into a retry-or-fail decision.

use serde_json::Value;
use tracing::warn;

use crate::context::RequestContext;
use crate::{
    AttemptFailure, Error, SERVER_CODE_INVALID_CREDENTIAL, SERVER_CODE_TIMEOUT,
};

// ---------------------------------------------------------------------------
// RequestBehaviour
// ---------------------------------------------------------------------------

/// The classifier's verdict: retry the attempt or fail the query, together
/// with the typed error that represents the attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBehaviour {
    /// Whether the driver may run another attempt.
    pub retry: bool,
    /// The classified error; surfaced only on the fail branch or as the
    /// final error when retries run out.
    pub error: Error,
}

impl RequestBehaviour {
    /// A retriable verdict.
    #[must_use]
    pub fn retry(error: Error) -> Self {
        Self { retry: true, error }
    }

    /// A terminal verdict.
    #[must_use]
    pub fn fail(error: Error) -> Self {
        Self {
            retry: false,
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// Server error entries
// ---------------------------------------------------------------------------

/// One element of the server's `errors` array, as it arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerErrorEntry {
    /// A serialized fragment from the response streamer.
    Raw(String),
    /// An already-parsed object from a buffered HTTP body.
    Parsed(Value),
}

/// A decoded server error.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerError {
    /// The server's error code.
    pub code: i64,
    /// The server's message.
    pub msg: String,
    /// The server's retriability hint, when present.
    pub retriable: Option<bool>,
}

impl ServerError {
    fn retriable_truthy(&self) -> bool {
        self.retriable == Some(true)
    }

    fn render(&self) -> String {
        format!("{} (code {})", self.msg, self.code)
    }
}

fn decode_entry(entry: &ServerErrorEntry) -> ServerError {
    let value: Value = match entry {
        ServerErrorEntry::Parsed(v) => v.clone(),
        ServerErrorEntry::Raw(raw) => match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable server error entry");
                return ServerError {
                    code: 0,
                    msg: raw.clone(),
                    retriable: None,
                };
            }
        },
    };
    ServerError {
        code: value.get("code").and_then(Value::as_i64).unwrap_or(0),
        msg: value
            .get("msg")
            .or_else(|| value.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        retriable: value.get("retriable").and_then(Value::as_bool),
    }
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

/// Map a per-attempt condition into a [`RequestBehaviour`], updating the
/// request context with secondary server errors along the way.
pub fn classify(failure: AttemptFailure, ctx: &mut RequestContext) -> RequestBehaviour {
    match failure {
        AttemptFailure::HttpStatus(401) => RequestBehaviour::fail(Error::InvalidCredential(
            "server responded with 401 Unauthorized".to_string(),
        )),
        AttemptFailure::HttpStatus(503) => RequestBehaviour::retry(Error::Analytics(
            "503 received from the analytics service".to_string(),
        )),
        AttemptFailure::HttpStatus(status) => RequestBehaviour::fail(Error::Analytics(format!(
            "unexpected http status {status}"
        ))),
        AttemptFailure::Timeout(msg) => RequestBehaviour::fail(Error::Timeout(msg)),
        AttemptFailure::ConnectTimeout(addr) => {
            RequestBehaviour::retry(Error::Timeout(format!("connect timeout dialing {addr}")))
        }
        AttemptFailure::Connection { kind, detail } => {
            let error = Error::Analytics(format!("connection failed ({kind}): {detail}"));
            if kind.is_retriable() {
                RequestBehaviour::retry(error)
            } else {
                RequestBehaviour::fail(error)
            }
        }
        AttemptFailure::DnsResolve { hostname, detail } => RequestBehaviour::retry(
            Error::Analytics(format!("dns resolution failed for {hostname}: {detail}")),
        ),
        AttemptFailure::DnsExhausted(hostname) => RequestBehaviour::fail(Error::Analytics(
            format!("no unused dns records remain for {hostname}"),
        )),
        AttemptFailure::Aborted => RequestBehaviour::fail(Error::Aborted),
        AttemptFailure::ServerErrors { entries } => classify_server_errors(&entries, ctx),
        AttemptFailure::Other(detail) => {
            RequestBehaviour::fail(Error::Analytics(format!("Unknown error: {detail}")))
        }
    }
}

/// Decide on a server-reported errors array.
///
/// The primary error is the first entry whose `retriable` field is absent
/// or falsy, otherwise the first entry overall; every non-primary entry is
/// appended to the context's secondary-error list.
pub fn classify_server_errors(
    entries: &[ServerErrorEntry],
    ctx: &mut RequestContext,
) -> RequestBehaviour {
    let decoded: Vec<ServerError> = entries.iter().map(decode_entry).collect();
    if decoded.is_empty() {
        return RequestBehaviour::fail(Error::Analytics("empty error array".to_string()));
    }

    let primary_idx = decoded
        .iter()
        .position(|e| !e.retriable_truthy())
        .unwrap_or(0);
    for (idx, other) in decoded.iter().enumerate() {
        if idx != primary_idx {
            ctx.push_other_server_error(other.render());
        }
    }

    let primary = &decoded[primary_idx];
    if primary.code == SERVER_CODE_INVALID_CREDENTIAL {
        return RequestBehaviour::fail(Error::InvalidCredential(primary.render()));
    }
    if primary.code == SERVER_CODE_TIMEOUT {
        return RequestBehaviour::fail(Error::Timeout(primary.render()));
    }

    let error = Error::Query {
        server_message: primary.msg.clone(),
        code: primary.code,
    };
    let all_retriable = decoded.iter().all(ServerError::retriable_truthy);
    if primary.retriable_truthy() && all_retriable {
        RequestBehaviour::retry(error)
    } else {
        RequestBehaviour::fail(error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
