// SPDX-License-Identifier: MIT OR Apache-2.0
//! The caller-facing result surface over the streaming pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use colq_error::{Error, RequestContext};
use colq_retry::Deadline;
use futures::Stream;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::abort::AbortHandle;
use crate::metadata::QueryMetadata;

// ---------------------------------------------------------------------------
// ResultShared
// ---------------------------------------------------------------------------

/// State shared between the pipeline task and the result handle.
#[derive(Debug)]
pub(crate) struct ResultShared {
    metadata: Mutex<Option<QueryMetadata>>,
    ended: AtomicBool,
}

impl ResultShared {
    pub(crate) fn new() -> Self {
        Self {
            metadata: Mutex::new(None),
            ended: AtomicBool::new(false),
        }
    }

    /// Record the parsed metadata and mark the stream as cleanly ended.
    /// A stream that fails never reaches this, so metadata stays
    /// unavailable.
    pub(crate) fn complete(&self, metadata: QueryMetadata) {
        *self.metadata.lock().expect("metadata lock poisoned") = Some(metadata);
        self.ended.store(true, Ordering::Release);
    }

    fn ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn metadata(&self) -> Option<QueryMetadata> {
        self.metadata.lock().expect("metadata lock poisoned").clone()
    }
}

// ---------------------------------------------------------------------------
// QueryResult
// ---------------------------------------------------------------------------

const METADATA_UNAVAILABLE: &str =
    "metadata is only available once the result stream has been fully drained";

/// Streaming result of one logical query.
///
/// Rows arrive in server order as standalone JSON fragments; trailing
/// metadata becomes available once the underlying stream ends cleanly.
pub struct QueryResult {
    rows: mpsc::Receiver<Result<String, Error>>,
    shared: Arc<ResultShared>,
    deadline: Deadline,
    abort: AbortHandle,
    ctx: Arc<Mutex<RequestContext>>,
    terminated: bool,
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("ended", &self.shared.ended())
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

impl QueryResult {
    pub(crate) fn new(
        rows: mpsc::Receiver<Result<String, Error>>,
        shared: Arc<ResultShared>,
        deadline: Deadline,
        abort: AbortHandle,
        ctx: Arc<Mutex<RequestContext>>,
    ) -> Self {
        Self {
            rows,
            shared,
            deadline,
            abort,
            ctx,
            terminated: false,
        }
    }

    /// The next row fragment, or `None` once the stream has ended.
    ///
    /// Receiving is raced against the query deadline: when it fires the
    /// query is cancelled and the stream yields a final timeout error.
    /// After any error the stream is terminal.
    pub async fn next_row(&mut self) -> Option<Result<String, Error>> {
        if self.terminated {
            return None;
        }
        match tokio::time::timeout_at(self.deadline.instant(), self.rows.recv()).await {
            Err(_) => {
                self.terminated = true;
                self.abort.abort();
                let message = self
                    .ctx
                    .lock()
                    .expect("request context lock poisoned")
                    .attach_error_context("analytics result stream timed out");
                Some(Err(Error::Timeout(message)))
            }
            Ok(None) => {
                self.terminated = true;
                None
            }
            Ok(Some(item)) => {
                if item.is_err() {
                    self.terminated = true;
                }
                Some(item)
            }
        }
    }

    /// The next row, deserialized through `serde_json`.
    pub async fn next_row_as<T: DeserializeOwned>(&mut self) -> Option<Result<T, Error>> {
        self.next_row().await.map(|item| {
            item.and_then(|fragment| {
                serde_json::from_str(&fragment)
                    .map_err(|e| Error::Analytics(format!("failed to deserialize row: {e}")))
            })
        })
    }

    /// Collect every remaining row fragment.
    ///
    /// # Errors
    ///
    /// The first error the stream yields.
    pub async fn collect_rows(&mut self) -> Result<Vec<String>, Error> {
        let mut rows = Vec::new();
        while let Some(item) = self.next_row().await {
            rows.push(item?);
        }
        Ok(rows)
    }

    /// Cancel the query. Idempotent; the in-flight request and pipeline are
    /// torn down and the stream terminates with the abort error.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Trailing query metadata.
    ///
    /// # Errors
    ///
    /// [`Error::Analytics`] with a fixed message until the underlying
    /// stream has emitted its end-of-stream event; a stream that ends with
    /// an error never makes metadata available.
    pub fn metadata(&self) -> Result<QueryMetadata, Error> {
        if !self.shared.ended() {
            return Err(Error::Analytics(METADATA_UNAVAILABLE.to_string()));
        }
        self.shared
            .metadata()
            .ok_or_else(|| Error::Analytics(METADATA_UNAVAILABLE.to_string()))
    }

    /// Adapt the result into a `futures::Stream` of row fragments.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, Error>> {
        futures::stream::unfold(self, |mut result| async move {
            result.next_row().await.map(|item| (item, result))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
