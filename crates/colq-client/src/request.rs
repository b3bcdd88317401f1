// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-query options and the request wire format.

use std::collections::BTreeMap;
use std::time::Duration;

use colq_error::Error;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::abort::AbortSignal;

/// Path every query is POSTed to.
pub const REQUEST_PATH: &str = "/api/v1/request";
/// Margin added to the caller's deadline budget for the body's server-side
/// `timeout` field.
pub const SERVER_TIMEOUT_MARGIN_MS: u64 = 5_000;
/// Header requesting elevated scheduling for the query.
pub(crate) const PRIORITY_HEADER: &str = "Analytics-Priority";

// ---------------------------------------------------------------------------
// ScanConsistency
// ---------------------------------------------------------------------------

/// The consistency guarantee requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanConsistency {
    /// No consistency bound.
    NotBounded,
    /// The query observes all mutations up to the request time.
    RequestPlus,
}

impl ScanConsistency {
    pub(crate) fn as_wire_str(self) -> &'static str {
        match self {
            Self::NotBounded => "not_bounded",
            Self::RequestPlus => "request_plus",
        }
    }
}

// ---------------------------------------------------------------------------
// QueryOptions
// ---------------------------------------------------------------------------

/// Per-query options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Deadline budget for this query; the cluster default applies when
    /// unset.
    pub timeout: Option<Duration>,
    /// Positional parameters, sent as `args`.
    pub positional_parameters: Option<Vec<Value>>,
    /// Named parameters; keys gain a `$` prefix when they lack one.
    pub named_parameters: Option<BTreeMap<String, Value>>,
    /// Marks the query read-only.
    pub readonly: Option<bool>,
    /// Requested consistency guarantee.
    pub scan_consistency: Option<ScanConsistency>,
    /// Ask the service to schedule the query with elevated priority.
    pub priority: bool,
    /// Database half of the query context.
    pub database: Option<String>,
    /// Scope half of the query context; only sent together with
    /// [`QueryOptions::database`].
    pub scope: Option<String>,
    /// Overrides the generated client context id.
    pub client_context_id: Option<String>,
    /// Raw key/value pass-through, merged into the body last.
    pub raw: Option<BTreeMap<String, Value>>,
    /// External cancellation signal combined with the query's own.
    pub abort_signal: Option<AbortSignal>,
}

/// Assemble the request body for one logical query.
///
/// # Errors
///
/// Currently infallible in practice; the `Result` mirrors the validation
/// seam the options surface grows through.
pub(crate) fn build_query_body(
    statement: &str,
    options: &QueryOptions,
    budget: Duration,
) -> Result<Map<String, Value>, Error> {
    let mut body = Map::new();
    body.insert("statement".to_string(), json!(statement));
    body.insert(
        "client_context_id".to_string(),
        json!(
            options
                .client_context_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string())
        ),
    );
    if let (Some(database), Some(scope)) = (&options.database, &options.scope) {
        body.insert(
            "query_context".to_string(),
            json!(format!("default:`{database}`.`{scope}`")),
        );
    }
    if let Some(args) = &options.positional_parameters {
        body.insert("args".to_string(), Value::Array(args.clone()));
    }
    if let Some(named) = &options.named_parameters {
        for (key, value) in named {
            let key = if key.starts_with('$') {
                key.clone()
            } else {
                format!("${key}")
            };
            body.insert(key, value.clone());
        }
    }
    if let Some(readonly) = options.readonly {
        body.insert("readonly".to_string(), json!(readonly));
    }
    if let Some(consistency) = options.scan_consistency {
        body.insert(
            "scan_consistency".to_string(),
            json!(consistency.as_wire_str()),
        );
    }
    let server_timeout_ms = budget.as_millis() as u64 + SERVER_TIMEOUT_MARGIN_MS;
    body.insert(
        "timeout".to_string(),
        json!(colq_duration::format_millis(server_timeout_ms)),
    );
    if let Some(raw) = &options.raw {
        for (key, value) in raw {
            body.insert(key.clone(), value.clone());
        }
    }
    Ok(body)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
