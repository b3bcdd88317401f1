// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structural round-trip properties for the streaming parser.

use colq_json::{FragmentParser, JsonTokenizer, ParseEvent};
use proptest::prelude::*;
use serde_json::{Value, json};

/// Drive a document through tokenizer + parser in chunks of `chunk` bytes.
fn run_chunked(doc: &str, chunk: usize) -> (Vec<String>, Vec<Vec<String>>, String) {
    let bytes = doc.as_bytes();
    let mut tokenizer = JsonTokenizer::new();
    let mut parser = FragmentParser::new();
    let mut rows = Vec::new();
    let mut errors = Vec::new();

    let mut drain = |tokenizer: &mut JsonTokenizer, parser: &mut FragmentParser| {
        while let Some(token) = tokenizer.next_token().expect("tokenize") {
            match parser.push(token).expect("parse") {
                Some(ParseEvent::Row(row)) => rows.push(row),
                Some(ParseEvent::ErrorsComplete(entries)) => errors.push(entries),
                None => {}
            }
        }
    };

    for piece in bytes.chunks(chunk.max(1)) {
        tokenizer.feed(piece);
        drain(&mut tokenizer, &mut parser);
    }
    tokenizer.end();
    drain(&mut tokenizer, &mut parser);

    let residual = parser.finish().expect("finish");
    (rows, errors, residual)
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        (-1.0e9f64..1.0e9f64).prop_map(|f| json!(f)),
        "\\PC{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
            prop::collection::btree_map("\\PC{0,8}", inner, 0..5)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    /// Every element of `results` comes back as one fragment, in order,
    /// structurally equal to the source element.
    #[test]
    fn rows_roundtrip_structurally(
        elements in prop::collection::vec(arb_json(), 0..6),
        chunk in 1usize..64,
    ) {
        let doc = json!({
            "requestID": "prop-run",
            "results": elements,
            "status": "success",
        });
        let (rows, errors, residual) = run_chunked(&doc.to_string(), chunk);

        prop_assert!(errors.is_empty());
        prop_assert_eq!(rows.len(), elements.len());
        for (fragment, expected) in rows.iter().zip(&elements) {
            let parsed: Value = serde_json::from_str(fragment).expect("row fragment parses");
            prop_assert_eq!(&parsed, expected);
        }

        let metadata: Value = serde_json::from_str(&residual).expect("residual parses");
        prop_assert_eq!(&metadata["requestID"], &json!("prop-run"));
        prop_assert_eq!(&metadata["results"], &json!([]));
    }

    /// `errorsComplete` fires exactly once, with one serialized entry per
    /// source element, and the residual preserves the array.
    #[test]
    fn errors_buffered_in_full(
        entries in prop::collection::vec(arb_json(), 1..5),
        chunk in 1usize..64,
    ) {
        let doc = json!({
            "requestID": "prop-run",
            "errors": entries,
            "status": "errors",
        });
        let (rows, errors, residual) = run_chunked(&doc.to_string(), chunk);

        prop_assert!(rows.is_empty());
        prop_assert_eq!(errors.len(), 1);
        prop_assert_eq!(errors[0].len(), entries.len());
        for (fragment, expected) in errors[0].iter().zip(&entries) {
            let parsed: Value = serde_json::from_str(fragment).expect("error fragment parses");
            prop_assert_eq!(&parsed, expected);
        }

        let metadata: Value = serde_json::from_str(&residual).expect("residual parses");
        prop_assert_eq!(&metadata["errors"], &Value::Array(entries));
    }

    /// Chunk size never changes the outcome.
    #[test]
    fn chunking_is_invisible(elements in prop::collection::vec(arb_json(), 0..4)) {
        let doc = json!({"requestID": "x", "results": elements, "status": "success"}).to_string();
        let whole = run_chunked(&doc, doc.len());
        let tiny = run_chunked(&doc, 1);
        prop_assert_eq!(whole, tiny);
    }
}
