// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::fmt;

// ---------------------------------------------------------------------------
// DurationParseError
// ---------------------------------------------------------------------------

/// Error raised when a duration string does not match the grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationParseError {
    /// The input was empty (or consisted only of a sign).
    #[error("empty duration string")]
    Empty,
    /// Negative durations are not permitted on this wire format.
    #[error("negative duration: {0:?}")]
    Negative(String),
    /// A segment was missing its numeric part.
    #[error("missing number in duration {input:?} at byte {at}")]
    MissingNumber {
        /// The full input.
        input: String,
        /// Byte offset of the offending segment.
        at: usize,
    },
    /// A number was not followed by a recognised unit.
    #[error("missing or unknown unit in duration {input:?} at byte {at}")]
    MissingUnit {
        /// The full input.
        input: String,
        /// Byte offset where a unit was expected.
        at: usize,
    },
    /// The numeric part failed to parse.
    #[error("invalid number {number:?} in duration {input:?}")]
    InvalidNumber {
        /// The full input.
        input: String,
        /// The offending numeric slice.
        number: String,
    },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Millisecond factor per unit, longest spellings first so `ms` wins over `m`
/// and the two micro-sign spellings are recognised.
const UNITS: &[(&str, f64)] = &[
    ("ns", 1e-6),
    ("us", 1e-3),
    ("\u{00b5}s", 1e-3), // µs
    ("\u{03bc}s", 1e-3), // μs
    ("ms", 1.0),
    ("s", 1_000.0),
    ("m", 60_000.0),
    ("h", 3_600_000.0),
];

/// Parse a Go-syntax duration string into fractional milliseconds.
///
/// The grammar is a non-empty concatenation of `<decimal><unit>` segments
/// with units `ns`, `us`/`µs`/`μs`, `ms`, `s`, `m`, `h`. A leading `+` is
/// permitted, negatives are rejected, `"0"` alone is zero, and no
/// whitespace or other separators are allowed. Concatenated segments sum.
///
/// ```
/// assert_eq!(colq_duration::parse_duration("3h15m10s500ms").unwrap(), 11_710_500.0);
/// assert!(colq_duration::parse_duration("1h 30m").is_err());
/// ```
///
/// # Errors
///
/// Returns [`DurationParseError`] for any input outside the grammar.
pub fn parse_duration(input: &str) -> Result<f64, DurationParseError> {
    if input.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if input.starts_with('-') {
        return Err(DurationParseError::Negative(input.to_string()));
    }

    let s = input.strip_prefix('+').unwrap_or(input);
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if s == "0" {
        return Ok(0.0);
    }

    let bytes = s.as_bytes();
    let mut i = 0usize;
    let mut total = 0.0f64;

    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let mut saw_digits = i > start;
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            let frac_start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            saw_digits = saw_digits || i > frac_start;
        }
        if !saw_digits {
            return Err(DurationParseError::MissingNumber {
                input: input.to_string(),
                at: start,
            });
        }

        let number = &s[start..i];
        let value: f64 = number
            .parse()
            .map_err(|_| DurationParseError::InvalidNumber {
                input: input.to_string(),
                number: number.to_string(),
            })?;

        let rest = &s[i..];
        let (factor, unit_len) = UNITS
            .iter()
            .find(|(unit, _)| rest.starts_with(unit))
            .map(|(unit, factor)| (*factor, unit.len()))
            .ok_or_else(|| DurationParseError::MissingUnit {
                input: input.to_string(),
                at: i,
            })?;

        total += value * factor;
        i += unit_len;
    }

    Ok(total)
}

/// Format a whole-millisecond duration the way the request wire format
/// expects it (`"75000ms"`).
#[must_use]
pub fn format_millis(millis: u64) -> String {
    format!("{millis}ms")
}

/// A display wrapper over fractional milliseconds, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Millis(pub f64);

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ---------------------------------------------------------------------------
// Serde support
// ---------------------------------------------------------------------------

/// Serde helpers for Go-syntax duration strings represented as fractional
/// milliseconds (`f64`).
pub mod go_millis {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize fractional milliseconds as a `"<N>ms"` duration string.
    pub fn serialize<S: Serializer>(millis: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{millis}ms"))
    }

    /// Deserialize a Go-syntax duration string into fractional milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
