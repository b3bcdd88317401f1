// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use colq_client::{
    AbortHandle, AbortSignal, ClusterOptions, ConnectionString, Credential, QueryExecutor,
    QueryMetadata, QueryMetrics, QueryOptions, QueryResult, QueryWarning, ScanConsistency,
    SecurityConfig, Transport,
};
pub use colq_dns::{DnsError, DnsPool, DnsRecord};
pub use colq_duration::{DurationParseError, parse_duration};
pub use colq_error::{
    AttemptFailure, ConnectCause, Error, RequestBehaviour, RequestContext, ServerError,
    ServerErrorEntry, classify,
};
pub use colq_json::{
    FragmentParser, JsonToken, JsonTokenizer, ParseEvent, StructureError, TokenizeError,
};
pub use colq_retry::{Deadline, run_with_retry};
