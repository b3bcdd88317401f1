// SPDX-License-Identifier: MIT OR Apache-2.0
//! Frame-stack parser over the token stream.
//!
//! The parser watches for the top-level `results` and `errors` keys of the
//! response document. Elements of the `results` array are emitted eagerly as
//! standalone row fragments and never accumulated; the `errors` array is
//! buffered and surfaced once, when it closes. Every other field is folded
//! back into a residual serialization of the top-level document, which is
//! what remains on the stack at end-of-stream.

use crate::token::JsonToken;

// ---------------------------------------------------------------------------
// Events and errors
// ---------------------------------------------------------------------------

/// An observable outcome of feeding one token.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// One element of the top-level `results` array, serialized as a
    /// complete standalone JSON value.
    Row(String),
    /// The top-level `errors` array closed; carries the serialization of
    /// each element.
    ErrorsComplete(Vec<String>),
}

/// Structural errors. The tokenizer rejects most malformed input first;
/// these guard direct token-stream use.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    /// An `endArray`/`endObject` token with no matching open context.
    #[error("close token with no matching open context")]
    UnmatchedClose,
    /// A value arrived after the top-level document was already complete.
    #[error("value token after the top-level document completed")]
    MisplacedValue,
    /// The token stream ended before the document completed.
    #[error("token stream ended with an incomplete document")]
    Incomplete,
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    Object,
    Array,
}

/// One stack frame. A `Key` frame is always the immediate parent of exactly
/// one value; a `Primitive` frame carries the completed top-level value.
#[derive(Debug)]
enum Frame {
    Context {
        template: Template,
        items: Vec<String>,
        is_results: bool,
        is_errors: bool,
        is_row: bool,
    },
    Key(String),
    Primitive(String),
}

fn json_string(s: &str) -> String {
    serde_json::to_string(s).expect("JSON string serialization is infallible")
}

// ---------------------------------------------------------------------------
// FragmentParser
// ---------------------------------------------------------------------------

/// Splits one response document into row fragments, a buffered errors
/// array, and a residual metadata document.
#[derive(Debug, Default)]
pub struct FragmentParser {
    stack: Vec<Frame>,
    in_results: bool,
}

impl FragmentParser {
    /// Create a parser for one top-level document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the parser is currently inside the top-level `results` array.
    #[must_use]
    pub fn in_results(&self) -> bool {
        self.in_results
    }

    /// Feed one token; returns the event it completed, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError`] when the token cannot be placed, e.g. a
    /// close token with no matching context.
    pub fn push(&mut self, token: JsonToken) -> Result<Option<ParseEvent>, StructureError> {
        match token {
            JsonToken::StartObject => {
                let is_row = self.top_is_results_array();
                self.stack.push(Frame::Context {
                    template: Template::Object,
                    items: Vec::new(),
                    is_results: false,
                    is_errors: false,
                    is_row,
                });
                Ok(None)
            }
            JsonToken::StartArray => {
                let is_row = self.top_is_results_array();
                let (is_results, is_errors) = if is_row {
                    (false, false)
                } else {
                    match self.pending_top_level_key() {
                        Some("results") => (true, false),
                        Some("errors") => (false, true),
                        _ => (false, false),
                    }
                };
                if is_results {
                    self.in_results = true;
                }
                self.stack.push(Frame::Context {
                    template: Template::Array,
                    items: Vec::new(),
                    is_results,
                    is_errors,
                    is_row,
                });
                Ok(None)
            }
            JsonToken::Key(key) => {
                self.stack.push(Frame::Key(key));
                Ok(None)
            }
            JsonToken::EndObject => self.close(Template::Object),
            JsonToken::EndArray => self.close(Template::Array),
            JsonToken::String(s) => self.scalar(json_string(&s)),
            JsonToken::Number(lexeme) => self.scalar(lexeme),
            JsonToken::True => self.scalar("true".to_string()),
            JsonToken::False => self.scalar("false".to_string()),
            JsonToken::Null => self.scalar("null".to_string()),
        }
    }

    /// Finish the document, returning the residual serialization: the
    /// top-level value with `results` replaced by `[]` (rows were siphoned
    /// off) and `errors` preserved as-is.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::Incomplete`] when the stack does not hold
    /// exactly the completed top-level value.
    pub fn finish(mut self) -> Result<String, StructureError> {
        match (self.stack.pop(), self.stack.pop()) {
            (Some(Frame::Primitive(residual)), None) => Ok(residual),
            _ => Err(StructureError::Incomplete),
        }
    }

    // -- internals --------------------------------------------------------

    fn top_is_results_array(&self) -> bool {
        matches!(
            self.stack.last(),
            Some(Frame::Context {
                template: Template::Array,
                is_results: true,
                ..
            })
        )
    }

    /// The pending key, but only when its owner is the top-level object.
    fn pending_top_level_key(&self) -> Option<&str> {
        if self.stack.len() != 2 {
            return None;
        }
        match self.stack.last() {
            Some(Frame::Key(key)) => Some(key.as_str()),
            _ => None,
        }
    }

    fn close(&mut self, template: Template) -> Result<Option<ParseEvent>, StructureError> {
        let frame = self.stack.pop().ok_or(StructureError::UnmatchedClose)?;
        let Frame::Context {
            template: found,
            items,
            is_results,
            is_errors,
            is_row,
        } = frame
        else {
            return Err(StructureError::UnmatchedClose);
        };
        if found != template {
            return Err(StructureError::UnmatchedClose);
        }

        let serialized = match template {
            Template::Object => format!("{{{}}}", items.join(",")),
            Template::Array => format!("[{}]", items.join(",")),
        };

        if is_row && self.top_is_results_array() {
            return Ok(Some(ParseEvent::Row(serialized)));
        }
        if is_results {
            self.in_results = false;
            self.consume_key_and_attach("[]")?;
            return Ok(None);
        }
        if is_errors {
            self.consume_key_and_attach(&serialized)?;
            return Ok(Some(ParseEvent::ErrorsComplete(items)));
        }
        self.attach(serialized)?;
        Ok(None)
    }

    fn scalar(&mut self, serialized: String) -> Result<Option<ParseEvent>, StructureError> {
        if self.top_is_results_array() {
            return Ok(Some(ParseEvent::Row(serialized)));
        }
        self.attach(serialized)?;
        Ok(None)
    }

    /// Attach a completed value serialization to its parent: pair it with a
    /// pending key, append it to the enclosing context, or, for a bare
    /// top-level value, leave it as the final frame.
    fn attach(&mut self, serialized: String) -> Result<(), StructureError> {
        match self.stack.last_mut() {
            Some(Frame::Key(_)) => {
                let Some(Frame::Key(key)) = self.stack.pop() else {
                    unreachable!("just matched a key frame");
                };
                let entry = format!("{}:{}", json_string(&key), serialized);
                match self.stack.last_mut() {
                    Some(Frame::Context { items, .. }) => {
                        items.push(entry);
                        Ok(())
                    }
                    _ => Err(StructureError::MisplacedValue),
                }
            }
            Some(Frame::Context { items, .. }) => {
                items.push(serialized);
                Ok(())
            }
            Some(Frame::Primitive(_)) => Err(StructureError::MisplacedValue),
            None => {
                self.stack.push(Frame::Primitive(serialized));
                Ok(())
            }
        }
    }

    fn consume_key_and_attach(&mut self, serialized: &str) -> Result<(), StructureError> {
        match self.stack.pop() {
            Some(Frame::Key(key)) => {
                let entry = format!("{}:{}", json_string(&key), serialized);
                match self.stack.last_mut() {
                    Some(Frame::Context { items, .. }) => {
                        items.push(entry);
                        Ok(())
                    }
                    _ => Err(StructureError::MisplacedValue),
                }
            }
            _ => Err(StructureError::UnmatchedClose),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::JsonTokenizer;

    /// Run a whole document through tokenizer + parser.
    fn run(doc: &str) -> (Vec<String>, Vec<Vec<String>>, String) {
        let mut tokenizer = JsonTokenizer::new();
        tokenizer.feed(doc.as_bytes());
        tokenizer.end();
        let mut parser = FragmentParser::new();
        let mut rows = Vec::new();
        let mut errors = Vec::new();
        while let Some(token) = tokenizer.next_token().expect("tokenize") {
            match parser.push(token).expect("parse") {
                Some(ParseEvent::Row(row)) => rows.push(row),
                Some(ParseEvent::ErrorsComplete(entries)) => errors.push(entries),
                None => {}
            }
        }
        let residual = parser.finish().expect("finish");
        (rows, errors, residual)
    }

    // -- Row extraction ---------------------------------------------------

    #[test]
    fn object_rows_in_source_order() {
        let (rows, errors, _) =
            run(r#"{"requestID":"r1","results":[{"id":1},{"id":2}],"status":"success"}"#);
        assert_eq!(rows, vec![r#"{"id":1}"#, r#"{"id":2}"#]);
        assert!(errors.is_empty());
    }

    #[test]
    fn scalar_rows_serialized_directly() {
        let (rows, _, _) =
            run(r#"{"results":[true,false,null,"s",1.5,{},[]],"status":"success"}"#);
        assert_eq!(rows, vec!["true", "false", "null", r#""s""#, "1.5", "{}", "[]"]);
    }

    #[test]
    fn nested_row_content_emitted_as_one_fragment() {
        let (rows, _, _) =
            run(r#"{"results":[{"a":{"b":[1,2]},"c":"x"}],"status":"success"}"#);
        assert_eq!(rows, vec![r#"{"a":{"b":[1,2]},"c":"x"}"#]);
    }

    #[test]
    fn array_rows_are_rows_too() {
        let (rows, _, _) = run(r#"{"results":[[1,2],["a"]],"status":"success"}"#);
        assert_eq!(rows, vec!["[1,2]", r#"["a"]"#]);
    }

    #[test]
    fn results_key_inside_a_row_is_not_special() {
        let (rows, _, residual) =
            run(r#"{"results":[{"x":{"results":[1,2]}}],"status":"success"}"#);
        assert_eq!(rows, vec![r#"{"x":{"results":[1,2]}}"#]);
        let doc: serde_json::Value = serde_json::from_str(&residual).unwrap();
        assert_eq!(doc["results"], serde_json::json!([]));
    }

    #[test]
    fn input_whitespace_not_preserved_in_rows() {
        let (rows, _, _) = run("{\"results\": [ { \"id\" : 1 } ],\n\"status\":\"x\"}");
        assert_eq!(rows, vec![r#"{"id":1}"#]);
    }

    #[test]
    fn unicode_and_empty_keys_roundtrip() {
        let (rows, _, _) = run(r#"{"results":[{"":"", "é":"漢字"}],"status":"x"}"#);
        let parsed: serde_json::Value = serde_json::from_str(&rows[0]).unwrap();
        assert_eq!(parsed[""], "");
        assert_eq!(parsed["é"], "漢字");
    }

    // -- Errors array -----------------------------------------------------

    #[test]
    fn errors_complete_fires_once_with_all_entries() {
        let (rows, errors, _) = run(
            r#"{"results":[{"id":1},{"id":2}],"errors":[{"code":232,"message":"error1"}],"status":"errors"}"#,
        );
        assert_eq!(rows, vec![r#"{"id":1}"#, r#"{"id":2}"#]);
        assert_eq!(errors, vec![vec![r#"{"code":232,"message":"error1"}"#.to_string()]]);
    }

    #[test]
    fn multiple_error_entries_preserved_in_order() {
        let (_, errors, _) = run(
            r#"{"errors":[{"code":1,"msg":"a"},{"code":2,"msg":"b","retriable":true}],"status":"errors"}"#,
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].len(), 2);
        assert_eq!(errors[0][0], r#"{"code":1,"msg":"a"}"#);
        assert_eq!(errors[0][1], r#"{"code":2,"msg":"b","retriable":true}"#);
    }

    #[test]
    fn no_rows_after_errors_complete() {
        // Rows precede the errors array in the document, so every Row event
        // must be observed before the ErrorsComplete event.
        let mut tokenizer = JsonTokenizer::new();
        tokenizer
            .feed(br#"{"results":[1,2],"errors":[{"code":5,"msg":"x"}],"status":"errors"}"#);
        tokenizer.end();
        let mut parser = FragmentParser::new();
        let mut seen_errors = false;
        let mut rows_after_errors = 0;
        while let Some(token) = tokenizer.next_token().unwrap() {
            match parser.push(token).unwrap() {
                Some(ParseEvent::Row(_)) if seen_errors => rows_after_errors += 1,
                Some(ParseEvent::ErrorsComplete(entries)) => {
                    assert_eq!(entries.len(), 1);
                    seen_errors = true;
                }
                _ => {}
            }
        }
        assert!(seen_errors);
        assert_eq!(rows_after_errors, 0);
    }

    #[test]
    fn errors_key_inside_a_row_is_not_special() {
        let (rows, errors, _) = run(r#"{"results":[{"errors":[1]}],"status":"x"}"#);
        assert_eq!(rows, vec![r#"{"errors":[1]}"#]);
        assert!(errors.is_empty());
    }

    // -- Residual document ------------------------------------------------

    #[test]
    fn residual_replaces_results_and_preserves_errors() {
        let (_, _, residual) = run(
            r#"{"requestID":"r1","results":[{"id":1}],"errors":[{"code":7,"msg":"boom"}],"status":"errors","metrics":{"resultCount":1}}"#,
        );
        let doc: serde_json::Value = serde_json::from_str(&residual).unwrap();
        assert_eq!(doc["requestID"], "r1");
        assert_eq!(doc["results"], serde_json::json!([]));
        assert_eq!(doc["errors"], serde_json::json!([{"code":7,"msg":"boom"}]));
        assert_eq!(doc["status"], "errors");
        assert_eq!(doc["metrics"]["resultCount"], 1);
    }

    #[test]
    fn residual_without_results_or_errors() {
        let (rows, errors, residual) = run(r#"{"requestID":"r2","status":"success"}"#);
        assert!(rows.is_empty());
        assert!(errors.is_empty());
        let doc: serde_json::Value = serde_json::from_str(&residual).unwrap();
        assert_eq!(doc["requestID"], "r2");
    }

    #[test]
    fn bare_top_level_scalar_becomes_the_residual() {
        let (rows, errors, residual) = run("42");
        assert!(rows.is_empty());
        assert!(errors.is_empty());
        assert_eq!(residual, "42");
    }

    // -- Failure ----------------------------------------------------------

    #[test]
    fn unmatched_close_is_fatal() {
        let mut parser = FragmentParser::new();
        assert_eq!(
            parser.push(JsonToken::EndArray),
            Err(StructureError::UnmatchedClose)
        );
    }

    #[test]
    fn mismatched_template_is_fatal() {
        let mut parser = FragmentParser::new();
        parser.push(JsonToken::StartObject).unwrap();
        assert_eq!(
            parser.push(JsonToken::EndArray),
            Err(StructureError::UnmatchedClose)
        );
    }

    #[test]
    fn incomplete_document_fails_finish() {
        let mut parser = FragmentParser::new();
        parser.push(JsonToken::StartObject).unwrap();
        assert_eq!(parser.finish().unwrap_err(), StructureError::Incomplete);
    }
}
