// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trailing query metadata parsed from the residual response document.

use colq_error::Error;
use serde::Deserialize;

// ---------------------------------------------------------------------------
// QueryMetadata
// ---------------------------------------------------------------------------

/// A warning reported alongside the results.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryWarning {
    /// Warning code.
    pub code: i64,
    /// Warning message.
    pub message: String,
}

/// Execution metrics. Duration fields arrive as Go-syntax duration strings
/// and are measured in fractional milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryMetrics {
    /// Total elapsed time, in milliseconds.
    #[serde(with = "colq_duration::go_millis")]
    pub elapsed_time: f64,
    /// Server-side execution time, in milliseconds.
    #[serde(with = "colq_duration::go_millis")]
    pub execution_time: f64,
    /// Statement compile time, in milliseconds.
    #[serde(with = "colq_duration::go_millis")]
    pub compile_time: f64,
    /// Time spent queued, in milliseconds.
    #[serde(with = "colq_duration::go_millis")]
    pub queue_wait_time: f64,
    /// Number of result rows.
    pub result_count: u64,
    /// Total size of the result payload, in bytes.
    pub result_size: u64,
    /// Number of objects processed while executing.
    pub processed_objects: u64,
}

/// Metadata available once the row stream has fully drained.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryMetadata {
    /// The server-assigned request id.
    #[serde(rename = "requestID")]
    pub request_id: String,
    /// Warnings reported alongside the results.
    #[serde(default)]
    pub warnings: Vec<QueryWarning>,
    /// Terminal status reported by the server.
    #[serde(default)]
    pub status: Option<String>,
    /// Execution metrics.
    #[serde(default)]
    pub metrics: QueryMetrics,
}

/// Parse the residual document left behind by the streaming parser.
pub(crate) fn parse_metadata(residual: &str) -> Result<QueryMetadata, Error> {
    serde_json::from_str(residual)
        .map_err(|e| Error::Analytics(format!("failed to parse query metadata: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_metadata_document() {
        let metadata = parse_metadata(
            r#"{
                "requestID": "94c7f89f-3a29-4c9a-8a33-6e7a1a3bd0f1",
                "results": [],
                "warnings": [{"code": 2500, "message": "index not used"}],
                "status": "success",
                "metrics": {
                    "elapsedTime": "14.927542ms",
                    "executionTime": "12.1ms",
                    "compileTime": "1.5ms",
                    "queueWaitTime": "0s",
                    "resultCount": 2,
                    "resultSize": 44,
                    "processedObjects": 120
                }
            }"#,
        )
        .unwrap();

        assert_eq!(metadata.request_id, "94c7f89f-3a29-4c9a-8a33-6e7a1a3bd0f1");
        assert_eq!(metadata.warnings.len(), 1);
        assert_eq!(metadata.warnings[0].code, 2500);
        assert_eq!(metadata.status.as_deref(), Some("success"));
        assert!((metadata.metrics.elapsed_time - 14.927542).abs() < 1e-12);
        assert_eq!(metadata.metrics.result_count, 2);
        assert_eq!(metadata.metrics.processed_objects, 120);
    }

    #[test]
    fn missing_optional_fields_default() {
        let metadata = parse_metadata(r#"{"requestID": "r1"}"#).unwrap();
        assert!(metadata.warnings.is_empty());
        assert!(metadata.status.is_none());
        assert_eq!(metadata.metrics.result_count, 0);
        assert_eq!(metadata.metrics.elapsed_time, 0.0);
    }

    #[test]
    fn missing_request_id_is_an_error() {
        assert!(parse_metadata(r#"{"status":"success"}"#).is_err());
    }

    #[test]
    fn malformed_duration_in_metrics_is_an_error() {
        let err = parse_metadata(
            r#"{"requestID":"r","metrics":{"elapsedTime":"1h 30m"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Analytics(_)));
    }

    #[test]
    fn hour_scale_durations_convert_to_millis() {
        let metadata = parse_metadata(
            r#"{"requestID":"r","metrics":{"elapsedTime":"3h15m10s500ms"}}"#,
        )
        .unwrap();
        assert_eq!(metadata.metrics.elapsed_time, 11_710_500.0);
    }
}
