// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod abort;
mod config;
mod executor;
mod metadata;
mod request;
mod result;
mod transport;

pub use abort::{AbortHandle, AbortSignal};
pub use config::{
    ClusterOptions, ConnectionString, Credential, SecurityConfig, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_QUERY_TIMEOUT,
};
pub use executor::QueryExecutor;
pub use metadata::{QueryMetadata, QueryMetrics, QueryWarning};
pub use request::{QueryOptions, ScanConsistency, REQUEST_PATH, SERVER_TIMEOUT_MARGIN_MS};
pub use result::QueryResult;
pub use transport::Transport;
