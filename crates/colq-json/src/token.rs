// SPDX-License-Identifier: MIT OR Apache-2.0
//! Push-based incremental JSON tokenizer.
//!
//! Body chunks are appended with [`JsonTokenizer::feed`]; complete lexical
//! tokens are drained with [`JsonTokenizer::next_token`], which returns
//! `Ok(None)` whenever the buffered input ends mid-token. The tokenizer is
//! structure-aware just enough to emit object keys as a distinct token kind
//! and to reject mismatched brackets, trailing garbage, and empty input.
//! String unescaping and number validation are delegated to `serde_json`.

use std::fmt;

// ---------------------------------------------------------------------------
// JsonToken
// ---------------------------------------------------------------------------

/// One lexical token of a JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonToken {
    /// `{`
    StartObject,
    /// `}`
    EndObject,
    /// `[`
    StartArray,
    /// `]`
    EndArray,
    /// An object key (unescaped).
    Key(String),
    /// A string value (unescaped).
    String(String),
    /// A number value, carried as its source lexeme.
    Number(String),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
}

impl fmt::Display for JsonToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartObject => f.write_str("{"),
            Self::EndObject => f.write_str("}"),
            Self::StartArray => f.write_str("["),
            Self::EndArray => f.write_str("]"),
            Self::Key(k) => write!(f, "key {k:?}"),
            Self::String(s) => write!(f, "string {s:?}"),
            Self::Number(n) => write!(f, "number {n}"),
            Self::True => f.write_str("true"),
            Self::False => f.write_str("false"),
            Self::Null => f.write_str("null"),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenizeError
// ---------------------------------------------------------------------------

/// Error raised on malformed input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    /// A byte that cannot start or continue the expected construct.
    #[error("unexpected byte {byte:?} at offset {offset}")]
    UnexpectedByte {
        /// The offending byte, rendered as a char where printable.
        byte: char,
        /// Offset from the start of the current buffer window.
        offset: usize,
    },
    /// The input ended before the document was complete.
    #[error("unexpected end of input: {0}")]
    UnexpectedEof(&'static str),
    /// The input contained no JSON value at all.
    #[error("empty input")]
    Empty,
    /// Non-whitespace bytes after the top-level value.
    #[error("trailing characters after top-level value")]
    TrailingCharacters,
    /// A string or number token failed strict validation.
    #[error("invalid {kind} token: {lexeme}")]
    InvalidToken {
        /// `"string"` or `"number"`.
        kind: &'static str,
        /// The offending lexeme.
        lexeme: String,
    },
    /// The input was not valid UTF-8 at a token boundary.
    #[error("invalid utf-8 in input")]
    InvalidUtf8,
}

// ---------------------------------------------------------------------------
// JsonTokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// A value must follow (top level, after `:`, after `,` in an array).
    Value,
    /// A value or `]` (immediately after `[`).
    ValueOrEnd,
    /// A key or `}` (immediately after `{`).
    KeyOrEnd,
    /// A key must follow (after `,` in an object).
    Key,
    /// The `:` separator.
    Colon,
    /// `,` or the container's closing bracket.
    CommaOrEnd,
    /// The top-level value is complete; only whitespace may remain.
    Done,
}

/// Incremental tokenizer over one top-level JSON value.
#[derive(Debug)]
pub struct JsonTokenizer {
    buf: Vec<u8>,
    pos: usize,
    stack: Vec<Container>,
    expect: Expect,
    input_complete: bool,
    consumed_any: bool,
}

impl Default for JsonTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonTokenizer {
    /// Create a tokenizer with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            stack: Vec::new(),
            expect: Expect::Value,
            input_complete: false,
            consumed_any: false,
        }
    }

    /// Append a chunk of input.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Mark the input as complete; trailing partial tokens become errors.
    pub fn end(&mut self) {
        self.input_complete = true;
    }

    /// Whether the top-level value has been fully consumed.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.expect == Expect::Done
    }

    /// Produce the next token.
    ///
    /// Returns `Ok(None)` when the buffered input ends mid-token and more
    /// input is expected, or when the document is complete.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError`] for malformed input, including empty input
    /// and trailing garbage once [`JsonTokenizer::end`] has been called.
    pub fn next_token(&mut self) -> Result<Option<JsonToken>, TokenizeError> {
        loop {
            self.skip_whitespace();
            if self.pos >= self.buf.len() {
                if !self.input_complete {
                    return Ok(None);
                }
                return match self.expect {
                    Expect::Done => Ok(None),
                    _ if !self.consumed_any => Err(TokenizeError::Empty),
                    _ => Err(TokenizeError::UnexpectedEof("document is incomplete")),
                };
            }

            let byte = self.buf[self.pos];
            self.consumed_any = true;
            match self.expect {
                Expect::Value | Expect::ValueOrEnd => {
                    if byte == b']' && self.expect == Expect::ValueOrEnd {
                        return self.close(Container::Array, JsonToken::EndArray);
                    }
                    return self.lex_value(byte);
                }
                Expect::KeyOrEnd => {
                    if byte == b'}' {
                        return self.close(Container::Object, JsonToken::EndObject);
                    }
                    return self.lex_key(byte);
                }
                Expect::Key => return self.lex_key(byte),
                Expect::Colon => {
                    if byte != b':' {
                        return Err(self.unexpected(byte));
                    }
                    self.pos += 1;
                    self.expect = Expect::Value;
                    // No token for the separator itself.
                }
                Expect::CommaOrEnd => match byte {
                    b',' => {
                        self.pos += 1;
                        self.expect = match self.stack.last() {
                            Some(Container::Object) => Expect::Key,
                            Some(Container::Array) => Expect::Value,
                            None => return Err(self.unexpected(byte)),
                        };
                    }
                    b'}' => return self.close(Container::Object, JsonToken::EndObject),
                    b']' => return self.close(Container::Array, JsonToken::EndArray),
                    _ => return Err(self.unexpected(byte)),
                },
                Expect::Done => return Err(TokenizeError::TrailingCharacters),
            }
        }
    }

    // -- internals --------------------------------------------------------

    fn skip_whitespace(&mut self) {
        while self.pos < self.buf.len()
            && matches!(self.buf[self.pos], b' ' | b'\t' | b'\n' | b'\r')
        {
            self.pos += 1;
        }
    }

    fn unexpected(&self, byte: u8) -> TokenizeError {
        TokenizeError::UnexpectedByte {
            byte: byte as char,
            offset: self.pos,
        }
    }

    fn value_complete(&mut self) {
        self.expect = if self.stack.is_empty() {
            Expect::Done
        } else {
            Expect::CommaOrEnd
        };
    }

    fn close(
        &mut self,
        container: Container,
        token: JsonToken,
    ) -> Result<Option<JsonToken>, TokenizeError> {
        let byte = self.buf[self.pos];
        match self.stack.pop() {
            Some(top) if top == container => {
                self.pos += 1;
                self.value_complete();
                Ok(Some(token))
            }
            _ => Err(self.unexpected(byte)),
        }
    }

    fn lex_value(&mut self, byte: u8) -> Result<Option<JsonToken>, TokenizeError> {
        match byte {
            b'{' => {
                self.pos += 1;
                self.stack.push(Container::Object);
                self.expect = Expect::KeyOrEnd;
                Ok(Some(JsonToken::StartObject))
            }
            b'[' => {
                self.pos += 1;
                self.stack.push(Container::Array);
                self.expect = Expect::ValueOrEnd;
                Ok(Some(JsonToken::StartArray))
            }
            b'"' => match self.lex_string()? {
                Some(s) => {
                    self.value_complete();
                    Ok(Some(JsonToken::String(s)))
                }
                None => Ok(None),
            },
            b'-' | b'0'..=b'9' => match self.lex_number()? {
                Some(lexeme) => {
                    self.value_complete();
                    Ok(Some(JsonToken::Number(lexeme)))
                }
                None => Ok(None),
            },
            b't' => self.lex_literal("true", JsonToken::True),
            b'f' => self.lex_literal("false", JsonToken::False),
            b'n' => self.lex_literal("null", JsonToken::Null),
            _ => Err(self.unexpected(byte)),
        }
    }

    fn lex_key(&mut self, byte: u8) -> Result<Option<JsonToken>, TokenizeError> {
        if byte != b'"' {
            return Err(self.unexpected(byte));
        }
        match self.lex_string()? {
            Some(key) => {
                self.expect = Expect::Colon;
                Ok(Some(JsonToken::Key(key)))
            }
            None => Ok(None),
        }
    }

    /// Scan a quoted string starting at `self.pos`. Returns `None` when the
    /// closing quote has not arrived yet.
    fn lex_string(&mut self) -> Result<Option<String>, TokenizeError> {
        let start = self.pos;
        let mut i = start + 1;
        let mut escaped = false;
        loop {
            if i >= self.buf.len() {
                if self.input_complete {
                    return Err(TokenizeError::UnexpectedEof("unterminated string"));
                }
                return Ok(None);
            }
            let b = self.buf[i];
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                break;
            }
            i += 1;
        }

        let raw = std::str::from_utf8(&self.buf[start..=i])
            .map_err(|_| TokenizeError::InvalidUtf8)?;
        let unescaped: String =
            serde_json::from_str(raw).map_err(|_| TokenizeError::InvalidToken {
                kind: "string",
                lexeme: raw.to_string(),
            })?;
        self.pos = i + 1;
        Ok(Some(unescaped))
    }

    /// Scan a number lexeme. Returns `None` when the lexeme may continue in
    /// a later chunk.
    fn lex_number(&mut self) -> Result<Option<String>, TokenizeError> {
        let start = self.pos;
        let mut i = start;
        while i < self.buf.len()
            && matches!(self.buf[i], b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        {
            i += 1;
        }
        if i == self.buf.len() && !self.input_complete {
            return Ok(None);
        }

        let lexeme = std::str::from_utf8(&self.buf[start..i])
            .map_err(|_| TokenizeError::InvalidUtf8)?
            .to_string();
        serde_json::from_str::<serde_json::Number>(&lexeme).map_err(|_| {
            TokenizeError::InvalidToken {
                kind: "number",
                lexeme: lexeme.clone(),
            }
        })?;
        self.pos = i;
        Ok(Some(lexeme))
    }

    fn lex_literal(
        &mut self,
        literal: &'static str,
        token: JsonToken,
    ) -> Result<Option<JsonToken>, TokenizeError> {
        let end = self.pos + literal.len();
        if end > self.buf.len() {
            if self.input_complete {
                return Err(TokenizeError::UnexpectedEof("truncated literal"));
            }
            return Ok(None);
        }
        if &self.buf[self.pos..end] != literal.as_bytes() {
            return Err(self.unexpected(self.buf[self.pos]));
        }
        self.pos = end;
        self.value_complete();
        Ok(Some(token))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize_all(input: &str) -> Result<Vec<JsonToken>, TokenizeError> {
        let mut t = JsonTokenizer::new();
        t.feed(input.as_bytes());
        t.end();
        let mut out = Vec::new();
        while let Some(tok) = t.next_token()? {
            out.push(tok);
        }
        Ok(out)
    }

    // -- Whole documents --------------------------------------------------

    #[test]
    fn flat_object() {
        let tokens = tokenize_all(r#"{"a":1,"b":"x"}"#).unwrap();
        assert_eq!(
            tokens,
            vec![
                JsonToken::StartObject,
                JsonToken::Key("a".into()),
                JsonToken::Number("1".into()),
                JsonToken::Key("b".into()),
                JsonToken::String("x".into()),
                JsonToken::EndObject,
            ]
        );
    }

    #[test]
    fn nested_containers() {
        let tokens = tokenize_all(r#"{"a":[1,{"b":null}],"c":true}"#).unwrap();
        assert_eq!(tokens.len(), 12);
        assert_eq!(tokens[3], JsonToken::Number("1".into()));
        assert_eq!(tokens[5], JsonToken::Key("b".into()));
        assert_eq!(tokens[6], JsonToken::Null);
    }

    #[test]
    fn empty_containers() {
        assert_eq!(
            tokenize_all("{}").unwrap(),
            vec![JsonToken::StartObject, JsonToken::EndObject]
        );
        assert_eq!(
            tokenize_all("[]").unwrap(),
            vec![JsonToken::StartArray, JsonToken::EndArray]
        );
    }

    #[test]
    fn bare_scalars() {
        assert_eq!(tokenize_all("42").unwrap(), vec![JsonToken::Number("42".into())]);
        assert_eq!(tokenize_all("true").unwrap(), vec![JsonToken::True]);
        assert_eq!(
            tokenize_all(r#""hi""#).unwrap(),
            vec![JsonToken::String("hi".into())]
        );
    }

    #[test]
    fn string_escapes_are_unescaped() {
        let tokens = tokenize_all(r#"{"k":"a\"bé\n"}"#).unwrap();
        assert_eq!(tokens[2], JsonToken::String("a\"b\u{e9}\n".into()));
    }

    #[test]
    fn number_lexeme_preserved() {
        let tokens = tokenize_all("[1.5e3,-0.25]").unwrap();
        assert_eq!(tokens[1], JsonToken::Number("1.5e3".into()));
        assert_eq!(tokens[2], JsonToken::Number("-0.25".into()));
    }

    // -- Incremental feeding ----------------------------------------------

    #[test]
    fn token_split_across_chunks() {
        let mut t = JsonTokenizer::new();
        t.feed(br#"{"lon"#);
        assert_eq!(t.next_token().unwrap(), Some(JsonToken::StartObject));
        assert_eq!(t.next_token().unwrap(), None);
        t.feed(br#"g_key":"val"#);
        assert_eq!(t.next_token().unwrap(), Some(JsonToken::Key("long_key".into())));
        assert_eq!(t.next_token().unwrap(), None);
        t.feed(br#"ue"}"#);
        t.end();
        assert_eq!(t.next_token().unwrap(), Some(JsonToken::String("value".into())));
        assert_eq!(t.next_token().unwrap(), Some(JsonToken::EndObject));
        assert_eq!(t.next_token().unwrap(), None);
        assert!(t.finished());
    }

    #[test]
    fn trailing_number_needs_end_marker() {
        let mut t = JsonTokenizer::new();
        t.feed(b"12");
        // Could still grow into "123".
        assert_eq!(t.next_token().unwrap(), None);
        t.end();
        assert_eq!(t.next_token().unwrap(), Some(JsonToken::Number("12".into())));
        assert_eq!(t.next_token().unwrap(), None);
    }

    #[test]
    fn byte_at_a_time() {
        let doc = br#"{"a":[true,"x"],"b":-2}"#;
        let mut t = JsonTokenizer::new();
        let mut tokens = Vec::new();
        for b in doc {
            t.feed(&[*b]);
            while let Some(tok) = t.next_token().unwrap() {
                tokens.push(tok);
            }
        }
        t.end();
        while let Some(tok) = t.next_token().unwrap() {
            tokens.push(tok);
        }
        assert_eq!(tokens.len(), 9);
        assert!(t.finished());
    }

    // -- Failure modes ----------------------------------------------------

    #[test]
    fn empty_input_fails() {
        let mut t = JsonTokenizer::new();
        t.end();
        assert_eq!(t.next_token(), Err(TokenizeError::Empty));
    }

    #[test]
    fn whitespace_only_fails() {
        let mut t = JsonTokenizer::new();
        t.feed(b"  \n\t ");
        t.end();
        assert_eq!(t.next_token(), Err(TokenizeError::Empty));
    }

    #[test]
    fn trailing_garbage_fails() {
        let err = tokenize_all("{} x").unwrap_err();
        assert_eq!(err, TokenizeError::TrailingCharacters);
    }

    #[test]
    fn leading_garbage_fails() {
        assert!(matches!(
            tokenize_all("x{}"),
            Err(TokenizeError::UnexpectedByte { .. })
        ));
    }

    #[test]
    fn mismatched_brackets_fail() {
        assert!(tokenize_all(r#"{"a":1]"#).is_err());
        assert!(tokenize_all("[1}").is_err());
    }

    #[test]
    fn truncated_document_fails() {
        assert!(matches!(
            tokenize_all(r#"{"a":"#),
            Err(TokenizeError::UnexpectedEof(_))
        ));
        assert!(matches!(
            tokenize_all(r#""unterminated"#),
            Err(TokenizeError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn invalid_number_fails() {
        assert!(matches!(
            tokenize_all("[01]"),
            Err(TokenizeError::InvalidToken { kind: "number", .. })
        ));
        assert!(tokenize_all("[1e]").is_err());
    }

    #[test]
    fn missing_comma_fails() {
        assert!(matches!(
            tokenize_all(r#"[1 2]"#),
            Err(TokenizeError::UnexpectedByte { .. })
        ));
    }

    #[test]
    fn bad_escape_fails() {
        assert!(matches!(
            tokenize_all(r#"["\q"]"#),
            Err(TokenizeError::InvalidToken { kind: "string", .. })
        ));
    }
}
