// SPDX-License-Identifier: MIT OR Apache-2.0
//! One logical query: retry loop, per-attempt POST, and the streaming
//! response pipeline.
//!
//! Each attempt obtains a fresh address from the query's DNS pool, sends
//! the request, and binds the body to the tokenizer → parser → row-channel
//! pipeline. The attempt resolves as soon as the stream becomes readable
//! (first row, or end-of-stream with zero rows); failures before that point
//! reject the attempt and go through the classifier, failures after it
//! terminate the row stream instead.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use colq_dns::{DnsError, DnsPool};
use colq_error::{
    AttemptFailure, ConnectCause, Error, RequestContext, ServerErrorEntry, classify,
};
use colq_json::{FragmentParser, JsonTokenizer, ParseEvent};
use colq_retry::{Deadline, run_with_retry};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::abort::{AbortHandle, AbortSignal};
use crate::config::{ClusterOptions, ConnectionString, Credential};
use crate::metadata::parse_metadata;
use crate::request::{PRIORITY_HEADER, QueryOptions, REQUEST_PATH, build_query_body};
use crate::result::{QueryResult, ResultShared};
use crate::transport::Transport;

/// Bounded buffer between the parser and the caller; rows beyond this are
/// held back by the server connection.
const ROW_CHANNEL_CAPACITY: usize = 16;

fn lock_ctx(ctx: &Mutex<RequestContext>) -> std::sync::MutexGuard<'_, RequestContext> {
    ctx.lock().expect("request context lock poisoned")
}

// ---------------------------------------------------------------------------
// QueryExecutor
// ---------------------------------------------------------------------------

/// Executes SQL++ statements against the analytics service.
///
/// The executor owns the shared transport; everything else (request
/// context, DNS pool, abort signal, attempt state) is created per logical
/// query, so executors are cheap to share across concurrent queries.
#[derive(Debug)]
pub struct QueryExecutor {
    transport: Arc<Transport>,
    credential: Credential,
    default_query_timeout: Duration,
    max_retry_attempts: u32,
    seed_addresses: Option<Vec<SocketAddr>>,
}

impl QueryExecutor {
    /// Build an executor over an existing transport.
    #[must_use]
    pub fn new(transport: Arc<Transport>, credential: Credential, options: &ClusterOptions) -> Self {
        Self {
            transport,
            credential,
            default_query_timeout: options.query_timeout,
            max_retry_attempts: options.max_retry_attempts,
            seed_addresses: options.seed_addresses.clone(),
        }
    }

    fn new_pool(&self) -> DnsPool {
        match &self.seed_addresses {
            Some(addresses) => {
                DnsPool::from_records(self.transport.hostname().to_string(), addresses.clone())
            }
            None => DnsPool::new(self.transport.hostname().to_string(), self.transport.port()),
        }
    }

    /// Parse a connection string, build the transport, and return an
    /// executor.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for malformed connection strings or
    /// invalid options.
    pub fn connect(
        connection_string: &str,
        credential: Credential,
        mut options: ClusterOptions,
    ) -> Result<Self, Error> {
        let conn = ConnectionString::parse(connection_string, &mut options)?;
        let transport = Arc::new(Transport::new(&conn, &options)?);
        Ok(Self::new(transport, credential, &options))
    }

    /// The transport this executor dispatches through.
    #[must_use]
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Execute one SQL++ statement, streaming rows as they arrive.
    ///
    /// The query runs under a deadline of `options.timeout` (or the cluster
    /// default), retrying failed attempts against alternate DNS addresses
    /// with exponential-jitter backoff until the classifier fails the query
    /// or the deadline passes.
    ///
    /// # Errors
    ///
    /// Exactly one typed [`Error`]; every message except [`Error::Aborted`]
    /// carries the request context suffix.
    pub async fn execute_query(
        &self,
        statement: &str,
        options: QueryOptions,
    ) -> Result<QueryResult, Error> {
        let budget = options.timeout.unwrap_or(self.default_query_timeout);
        if budget.is_zero() {
            return Err(Error::InvalidArgument(
                "query timeout must be positive".to_string(),
            ));
        }
        let deadline = Deadline::after(budget);

        let ctx = Arc::new(Mutex::new(RequestContext::new(self.max_retry_attempts)));
        {
            let mut guard = lock_ctx(&ctx);
            guard.set_route("POST", REQUEST_PATH);
            guard.set_statement(statement);
        }

        let body = build_query_body(statement, &options, budget)?;
        let body = Bytes::from(serde_json::to_vec(&body).map_err(|e| {
            Error::InvalidArgument(format!("failed to encode request body: {e}"))
        })?);

        let pool = Arc::new(tokio::sync::Mutex::new(self.new_pool()));

        let (abort_handle, internal_signal) = AbortHandle::new();
        let signal = match options.abort_signal.clone() {
            Some(external) => AbortSignal::either(internal_signal, external),
            None => internal_signal,
        };
        let priority = options.priority;

        let attempt = || {
            run_attempt(AttemptState {
                transport: self.transport.clone(),
                credential: self.credential.clone(),
                body: body.clone(),
                priority,
                deadline,
                ctx: ctx.clone(),
                pool: pool.clone(),
                signal: signal.clone(),
                abort_handle: abort_handle.clone(),
            })
        };

        run_with_retry(attempt, classify, deadline, &ctx).await
    }
}

// ---------------------------------------------------------------------------
// One attempt
// ---------------------------------------------------------------------------

struct AttemptState {
    transport: Arc<Transport>,
    credential: Credential,
    body: Bytes,
    priority: bool,
    deadline: Deadline,
    ctx: Arc<Mutex<RequestContext>>,
    pool: Arc<tokio::sync::Mutex<DnsPool>>,
    signal: AbortSignal,
    abort_handle: AbortHandle,
}

async fn run_attempt(state: AttemptState) -> Result<QueryResult, AttemptFailure> {
    let addr = {
        let mut pool = state.pool.lock().await;
        let addr = pool.maybe_update_and_get().await.map_err(|e| match e {
            DnsError::Resolve { hostname, detail } => {
                AttemptFailure::DnsResolve { hostname, detail }
            }
            DnsError::RecordsExhausted { hostname } => AttemptFailure::DnsExhausted(hostname),
        })?;
        pool.mark_used(addr);
        addr
    };
    lock_ctx(&state.ctx).record_dispatch_to(addr.to_string());
    debug!(%addr, "dispatching query attempt");

    let client = state
        .transport
        .client_for(addr)
        .map_err(|e| AttemptFailure::Other(e.to_string()))?;
    let mut request = client
        .post(state.transport.request_url())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .basic_auth(&state.credential.username, Some(&state.credential.password))
        .body(state.body.clone());
    if state.priority {
        request = request.header(PRIORITY_HEADER, "-1");
    }

    let mut signal = state.signal.clone();
    let response = tokio::select! {
        _ = signal.aborted() => return Err(AttemptFailure::Aborted),
        result = request.send() => result.map_err(|e| failure_from_reqwest(&e, addr))?,
    };

    let status = response.status().as_u16();
    {
        let mut guard = lock_ctx(&state.ctx);
        guard.record_status(status);
        if let Some(remote) = response.remote_addr() {
            guard.record_dispatch_to(remote.to_string());
        }
    }
    if status == 401 {
        return Err(AttemptFailure::HttpStatus(401));
    }
    if !(200..300).contains(&status) {
        // Some failures still carry the error envelope in a buffered body;
        // prefer its entries over the bare status.
        let body = response.bytes().await.unwrap_or_default();
        if let Some(entries) = errors_from_body(&body) {
            return Err(AttemptFailure::ServerErrors { entries });
        }
        return Err(AttemptFailure::HttpStatus(status));
    }

    let (row_tx, row_rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
    let shared = Arc::new(ResultShared::new());
    let (readable_tx, readable_rx) = oneshot::channel();
    tokio::spawn(pipeline(Pipeline {
        response,
        rows: row_tx,
        shared: shared.clone(),
        readable: Some(readable_tx),
        signal: state.signal.clone(),
        ctx: state.ctx.clone(),
        addr,
    }));

    match readable_rx.await {
        Ok(Ok(())) => Ok(QueryResult::new(
            row_rx,
            shared,
            state.deadline,
            state.abort_handle.clone(),
            state.ctx.clone(),
        )),
        Ok(Err(failure)) => Err(failure),
        Err(_) => Err(AttemptFailure::Other(
            "response pipeline ended before signalling readability".to_string(),
        )),
    }
}

fn failure_from_reqwest(err: &reqwest::Error, addr: SocketAddr) -> AttemptFailure {
    if err.is_connect() && err.is_timeout() {
        return AttemptFailure::ConnectTimeout(addr.to_string());
    }
    if err.is_timeout() {
        return AttemptFailure::Timeout(format!("request to {addr} timed out"));
    }
    AttemptFailure::Connection {
        kind: ConnectCause::from_error_chain(err),
        detail: err.to_string(),
    }
}

fn errors_from_body(body: &[u8]) -> Option<Vec<ServerErrorEntry>> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let entries = value.get("errors")?.as_array()?;
    if entries.is_empty() {
        return None;
    }
    Some(entries.iter().cloned().map(ServerErrorEntry::Parsed).collect())
}

// ---------------------------------------------------------------------------
// Response pipeline
// ---------------------------------------------------------------------------

struct Pipeline {
    response: reqwest::Response,
    rows: mpsc::Sender<Result<String, Error>>,
    shared: Arc<ResultShared>,
    readable: Option<oneshot::Sender<Result<(), AttemptFailure>>>,
    signal: AbortSignal,
    ctx: Arc<Mutex<RequestContext>>,
    addr: SocketAddr,
}

async fn pipeline(p: Pipeline) {
    let Pipeline {
        response,
        rows,
        shared,
        mut readable,
        mut signal,
        ctx,
        addr,
    } = p;
    let mut stream = response.bytes_stream();
    let mut tokenizer = JsonTokenizer::new();
    let mut parser = FragmentParser::new();

    loop {
        let chunk = tokio::select! {
            _ = signal.aborted() => {
                deliver_failure(&mut readable, &rows, &ctx, AttemptFailure::Aborted).await;
                return;
            }
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                deliver_failure(&mut readable, &rows, &ctx, failure_from_reqwest(&e, addr)).await;
                return;
            }
        };
        tokenizer.feed(&bytes);
        if !drain(&mut tokenizer, &mut parser, &mut readable, &rows, &ctx, &mut signal).await {
            return;
        }
    }

    tokenizer.end();
    if !drain(&mut tokenizer, &mut parser, &mut readable, &rows, &ctx, &mut signal).await {
        return;
    }
    let residual = match parser.finish() {
        Ok(residual) => residual,
        Err(e) => {
            deliver_failure(
                &mut readable,
                &rows,
                &ctx,
                AttemptFailure::Other(format!("malformed response document: {e}")),
            )
            .await;
            return;
        }
    };
    match parse_metadata(&residual) {
        Ok(metadata) => {
            shared.complete(metadata);
            if let Some(tx) = readable.take() {
                // End-of-stream with zero rows still makes the result
                // readable.
                let _ = tx.send(Ok(()));
            }
        }
        Err(e) => {
            deliver_failure(&mut readable, &rows, &ctx, AttemptFailure::Other(e.to_string()))
                .await;
        }
    }
}

/// Pump buffered tokens through the parser. Returns `false` once the
/// pipeline has been torn down.
async fn drain(
    tokenizer: &mut JsonTokenizer,
    parser: &mut FragmentParser,
    readable: &mut Option<oneshot::Sender<Result<(), AttemptFailure>>>,
    rows: &mpsc::Sender<Result<String, Error>>,
    ctx: &Arc<Mutex<RequestContext>>,
    signal: &mut AbortSignal,
) -> bool {
    loop {
        let token = match tokenizer.next_token() {
            Ok(Some(token)) => token,
            Ok(None) => return true,
            Err(e) => {
                deliver_failure(
                    readable,
                    rows,
                    ctx,
                    AttemptFailure::Other(format!("malformed response body: {e}")),
                )
                .await;
                return false;
            }
        };
        let event = match parser.push(token) {
            Ok(event) => event,
            Err(e) => {
                deliver_failure(
                    readable,
                    rows,
                    ctx,
                    AttemptFailure::Other(format!("malformed response document: {e}")),
                )
                .await;
                return false;
            }
        };
        match event {
            None => {}
            Some(ParseEvent::Row(row)) => {
                if let Some(tx) = readable.take() {
                    let _ = tx.send(Ok(()));
                }
                tokio::select! {
                    _ = signal.aborted() => {
                        deliver_failure(readable, rows, ctx, AttemptFailure::Aborted).await;
                        return false;
                    }
                    sent = rows.send(Ok(row)) => {
                        if sent.is_err() {
                            debug!("result dropped; tearing down response pipeline");
                            return false;
                        }
                    }
                }
            }
            Some(ParseEvent::ErrorsComplete(entries)) => {
                if entries.is_empty() {
                    continue;
                }
                let entries = entries.into_iter().map(ServerErrorEntry::Raw).collect();
                deliver_failure(readable, rows, ctx, AttemptFailure::ServerErrors { entries })
                    .await;
                return false;
            }
        }
    }
}

/// Route a pipeline failure: reject the attempt when the result has not
/// surfaced yet, otherwise terminate the row stream with the classified
/// error.
async fn deliver_failure(
    readable: &mut Option<oneshot::Sender<Result<(), AttemptFailure>>>,
    rows: &mpsc::Sender<Result<String, Error>>,
    ctx: &Arc<Mutex<RequestContext>>,
    failure: AttemptFailure,
) {
    if let Some(tx) = readable.take() {
        let _ = tx.send(Err(failure));
        return;
    }
    let error = {
        let mut guard = lock_ctx(ctx);
        let behaviour = classify(failure, &mut guard);
        behaviour.error.with_context(&guard)
    };
    let _ = rows.send(Err(error)).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
