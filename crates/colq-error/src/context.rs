// SPDX-License-Identifier: MIT OR Apache-2.0
//! Diagnostic state accumulated across the attempts of one logical query.

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Cheap value object shared by the retry driver, the attempt executor, and
/// the classifier. Fields are either last-write-wins or append-only.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Attempts started so far. Monotonically non-decreasing; at least 1
    /// immediately before each attempt body runs, and an attempt counts
    /// even if it never reaches the socket.
    pub num_attempts: u32,
    /// Configured retry cap; the driver runs at most `max_retry_attempts
    /// + 1` attempts.
    pub max_retry_attempts: u32,
    /// Address the last attempt dispatched to (last win).
    pub last_dispatched_to: Option<String>,
    /// Local address of the last attempt, when the transport exposes it.
    pub last_dispatched_from: Option<String>,
    /// Request path; set once.
    pub path: Option<String>,
    /// Request method; set once.
    pub method: Option<String>,
    /// The SQL++ statement; set once.
    pub statement: Option<String>,
    /// Last HTTP response status observed.
    pub status_code: Option<u16>,
    /// The classified error of the previous attempt, overwritten each
    /// retry and preserved verbatim.
    pub previous_attempt_errors: Option<String>,
    /// Secondary server-reported errors not selected as the primary.
    /// Append-only.
    pub other_server_errors: Vec<String>,
}

impl RequestContext {
    /// Create a context for a query with the given retry cap.
    #[must_use]
    pub fn new(max_retry_attempts: u32) -> Self {
        Self {
            max_retry_attempts,
            ..Self::default()
        }
    }

    /// Record the route and statement; called once before the first attempt.
    pub fn set_route(&mut self, method: impl Into<String>, path: impl Into<String>) {
        self.method = Some(method.into());
        self.path = Some(path.into());
    }

    /// Record the statement being executed.
    pub fn set_statement(&mut self, statement: impl Into<String>) {
        self.statement = Some(statement.into());
    }

    /// Count the next attempt.
    pub fn increment_attempt(&mut self) {
        self.num_attempts += 1;
    }

    /// Record the address an attempt is dispatching to.
    pub fn record_dispatch_to(&mut self, addr: impl Into<String>) {
        self.last_dispatched_to = Some(addr.into());
    }

    /// Record the local address of an attempt, where known.
    pub fn record_dispatch_from(&mut self, addr: impl Into<String>) {
        self.last_dispatched_from = Some(addr.into());
    }

    /// Record an observed HTTP response status.
    pub fn record_status(&mut self, status: u16) {
        self.status_code = Some(status);
    }

    /// Overwrite the previous attempt's classified error.
    pub fn set_previous_attempt_error(&mut self, error: impl Into<String>) {
        self.previous_attempt_errors = Some(error.into());
    }

    /// Append a secondary server-reported error.
    pub fn push_other_server_error(&mut self, error: impl Into<String>) {
        self.other_server_errors.push(error.into());
    }

    /// Render `"<msg>. ErrorContext: k=v, k=v, …"` using only the
    /// populated fields, in a fixed order.
    #[must_use]
    pub fn attach_error_context(&self, msg: &str) -> String {
        let mut fields: Vec<String> = Vec::new();
        if let Some(v) = &self.last_dispatched_to {
            fields.push(format!("lastDispatchedTo={v}"));
        }
        if let Some(v) = &self.last_dispatched_from {
            fields.push(format!("lastDispatchedFrom={v}"));
        }
        if let Some(v) = &self.method {
            fields.push(format!("method={v}"));
        }
        if let Some(v) = &self.path {
            fields.push(format!("path={v}"));
        }
        if let Some(v) = self.status_code {
            fields.push(format!("statusCode={v}"));
        }
        if let Some(v) = &self.statement {
            fields.push(format!("statement={v}"));
        }
        if let Some(v) = &self.previous_attempt_errors {
            fields.push(format!("previousAttemptErrors={v}"));
        }
        fields.push(format!("numAttempts={}", self.num_attempts));
        if !self.other_server_errors.is_empty() {
            fields.push(format!(
                "otherServerErrors=[{}]",
                self.other_server_errors.join("; ")
            ));
        }
        format!("{msg}. ErrorContext: {}", fields.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
