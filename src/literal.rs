//! Constrained literal-expression parser for structuring replies.
//!
//! The structuring prompt asks the model for a dictionary literal. Rather
//! than evaluating that text, this module parses a deliberately small
//! grammar and fails closed on anything outside it:
//!
//! ```text
//! value  := string | object | array
//! object := '{' (string ':' value ','?)* '}'
//! array  := '[' (value ','?)* ']'
//! string := single- or double-quoted, backslash escapes
//! ```
//!
//! No numbers, booleans, nulls, identifiers, or code. Trailing commas are
//! accepted because models emit them.

/// A parsed literal value. Object entries keep source order.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// First entry with the given key, when this is an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Parse failure with the byte offset where parsing stopped.
#[derive(Debug)]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parse error at byte {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a complete literal expression. Trailing input after the value
/// (other than whitespace) is an error.
pub fn parse_literal(input: &str) -> Result<Value, ParseError> {
    let mut parser = Parser {
        bytes: input.as_bytes(),
        pos: 0,
    };
    parser.skip_ws();
    let value = parser.parse_value()?;
    parser.skip_ws();
    if parser.pos < parser.bytes.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> ParseError {
        ParseError {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), ParseError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        match self.peek() {
            Some(b'{') => self.parse_object(),
            Some(b'[') => self.parse_array(),
            Some(b'"') | Some(b'\'') => Ok(Value::Str(self.parse_string()?)),
            Some(_) => Err(self.error("expected string, object, or array")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_object(&mut self) -> Result<Value, ParseError> {
        self.expect(b'{')?;
        let mut entries = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Value::Map(entries));
                }
                Some(b'"') | Some(b'\'') => {}
                Some(_) => return Err(self.error("expected string key or '}'")),
                None => return Err(self.error("unterminated object")),
            }
            let key = self.parse_string()?;
            self.skip_ws();
            self.expect(b':')?;
            self.skip_ws();
            let value = self.parse_value()?;
            entries.push((key, value));
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                }
                Some(b'}') => {}
                Some(_) => return Err(self.error("expected ',' or '}'")),
                None => return Err(self.error("unterminated object")),
            }
        }
    }

    fn parse_array(&mut self) -> Result<Value, ParseError> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Value::List(items));
                }
                Some(_) => {}
                None => return Err(self.error("unterminated array")),
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                }
                Some(b']') => {}
                Some(_) => return Err(self.error("expected ',' or ']'")),
                None => return Err(self.error("unterminated array")),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, ParseError> {
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.error("expected string")),
        };
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b) if b == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        None => return Err(self.error("unterminated escape")),
                        Some(b'n') => {
                            out.push('\n');
                            self.pos += 1;
                        }
                        Some(b't') => {
                            out.push('\t');
                            self.pos += 1;
                        }
                        Some(b'r') => {
                            out.push('\r');
                            self.pos += 1;
                        }
                        Some(b'u') => {
                            self.pos += 1;
                            out.push(self.parse_unicode_escape()?);
                        }
                        // \\, \', \" and anything else escape to themselves
                        Some(other) => {
                            // multi-byte UTF-8 continuation after backslash is
                            // outside the grammar
                            if other >= 0x80 {
                                return Err(self.error("invalid escape"));
                            }
                            out.push(other as char);
                            self.pos += 1;
                        }
                    }
                }
                Some(_) => {
                    // consume one full UTF-8 character
                    let rest = &self.bytes[self.pos..];
                    let s = std::str::from_utf8(rest)
                        .map_err(|_| self.error("invalid UTF-8 in string"))?;
                    let ch = s.chars().next().unwrap();
                    out.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }

    fn parse_unicode_escape(&mut self) -> Result<char, ParseError> {
        if self.pos + 4 > self.bytes.len() {
            return Err(self.error("truncated \\u escape"));
        }
        let hex = std::str::from_utf8(&self.bytes[self.pos..self.pos + 4])
            .map_err(|_| self.error("invalid \\u escape"))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid \\u escape"))?;
        let ch = char::from_u32(code).ok_or_else(|| self.error("invalid \\u code point"))?;
        self.pos += 4;
        Ok(ch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_double_quoted_object() {
        let v = parse_literal(r#"{"document_type": "resume", "metadata": {"author": "A"}}"#)
            .unwrap();
        assert_eq!(v.get("document_type").unwrap().as_str(), Some("resume"));
        assert_eq!(
            v.get("metadata").unwrap().get("author").unwrap().as_str(),
            Some("A")
        );
    }

    #[test]
    fn parses_single_quoted_python_style() {
        let v = parse_literal("{'document_type': 'invoice', 'content': []}").unwrap();
        assert_eq!(v.get("document_type").unwrap().as_str(), Some("invoice"));
        assert_eq!(v.get("content").unwrap().as_list(), Some(&[][..]));
    }

    #[test]
    fn parses_array_of_objects() {
        let v = parse_literal(r#"[{"section_title": "Intro", "text": "hi"}]"#).unwrap();
        let items = v.as_list().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].get("text").unwrap().as_str(), Some("hi"));
    }

    #[test]
    fn accepts_trailing_commas() {
        let v = parse_literal(r#"{"a": "1", "b": ["x", "y",],}"#).unwrap();
        assert_eq!(v.get("b").unwrap().as_list().unwrap().len(), 2);
    }

    #[test]
    fn decodes_escapes() {
        let v = parse_literal(r#"{"text": "line1\nline2 é \"quoted\""}"#).unwrap();
        assert_eq!(
            v.get("text").unwrap().as_str(),
            Some("line1\nline2 é \"quoted\"")
        );
    }

    #[test]
    fn escaped_quote_inside_single_quoted_string() {
        let v = parse_literal(r"{'text': 'it\'s fine'}").unwrap();
        assert_eq!(v.get("text").unwrap().as_str(), Some("it's fine"));
    }

    #[test]
    fn rejects_numbers() {
        assert!(parse_literal(r#"{"count": 3}"#).is_err());
    }

    #[test]
    fn rejects_bare_words() {
        assert!(parse_literal(r#"{"flag": True}"#).is_err());
        assert!(parse_literal("None").is_err());
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(parse_literal(r#"{"a": "oops}"#).is_err());
    }

    #[test]
    fn rejects_trailing_garbage() {
        let err = parse_literal(r#"{"a": "b"} extra"#).unwrap_err();
        assert!(err.message.contains("trailing"));
    }

    #[test]
    fn rejects_non_string_keys() {
        assert!(parse_literal(r#"{[]: "v"}"#).is_err());
    }

    #[test]
    fn preserves_object_entry_order() {
        let v = parse_literal(r#"{"z": "1", "a": "2"}"#).unwrap();
        let keys: Vec<&str> = v.as_map().unwrap().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a"]);
    }
}
