//! Tolerant parser for truncated JSON documents.
//!
//! Streamed function arguments and structured content arrive as ever-growing
//! prefixes of a JSON document. This parser produces the best valid value the
//! prefix supports, controlled by an [`Allow`] bitmask saying which kinds of
//! values may be completed mid-token.

use serde_json::{Map, Value};

/// Bitmask of value kinds that may be completed from a truncated token.
///
/// A kind that is *not* allowed still parses when complete; the flag only
/// governs whether an incomplete token of that kind may be repaired (string
/// closed, number reparsed without its dangling exponent, container returned
/// with the elements seen so far).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allow(u16);

impl Allow {
    pub const STR: Allow = Allow(1 << 0);
    pub const NUM: Allow = Allow(1 << 1);
    pub const ARR: Allow = Allow(1 << 2);
    pub const OBJ: Allow = Allow(1 << 3);
    pub const NULL: Allow = Allow(1 << 4);
    pub const BOOL: Allow = Allow(1 << 5);
    pub const NAN: Allow = Allow(1 << 6);
    pub const INFINITY: Allow = Allow(1 << 7);
    pub const NEG_INFINITY: Allow = Allow(1 << 8);

    pub const COLLECTIONS: Allow = Allow(Self::ARR.0 | Self::OBJ.0);
    pub const ATOMS: Allow = Allow(
        Self::STR.0
            | Self::NUM.0
            | Self::NULL.0
            | Self::BOOL.0
            | Self::NAN.0
            | Self::INFINITY.0
            | Self::NEG_INFINITY.0,
    );
    pub const ALL: Allow = Allow(Self::COLLECTIONS.0 | Self::ATOMS.0);

    #[must_use]
    pub fn contains(self, other: Allow) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn without(self, other: Allow) -> Allow {
        Allow(self.0 & !other.0)
    }
}

impl std::ops::BitOr for Allow {
    type Output = Allow;
    fn bitor(self, rhs: Allow) -> Allow {
        Allow(self.0 | rhs.0)
    }
}

/// Parse failure taxonomy.
///
/// `Partial` means the input is a prefix that more bytes could turn into
/// valid JSON, but completing it was not permitted here. `Malformed` means
/// no continuation can make the input valid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartialJsonError {
    #[error("incomplete JSON: {0}")]
    Partial(String),
    #[error("malformed JSON: {0}")]
    Malformed(String),
}

/// Parse a possibly-truncated JSON document.
pub fn parse_partial_json(text: &str, allow: Allow) -> Result<Value, PartialJsonError> {
    Parser {
        bytes: text.as_bytes(),
        text,
        index: 0,
        allow,
    }
    .parse_document()
}

/// The streaming-accumulation default: everything may be completed except
/// numbers, whose digits may still change as more input arrives.
pub fn partial_parse(text: &str) -> Result<Value, PartialJsonError> {
    parse_partial_json(text, Allow::ALL.without(Allow::NUM))
}

fn partial(msg: &str) -> PartialJsonError {
    PartialJsonError::Partial(msg.to_string())
}

fn malformed(msg: &str) -> PartialJsonError {
    PartialJsonError::Malformed(msg.to_string())
}

struct Parser<'a> {
    bytes: &'a [u8],
    text: &'a str,
    index: usize,
    allow: Allow,
}

impl Parser<'_> {
    fn parse_document(mut self) -> Result<Value, PartialJsonError> {
        self.skip_ws();
        if self.at_end() {
            return Err(malformed("empty input"));
        }
        self.parse_any()
    }

    fn at_end(&self) -> bool {
        self.index >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.index += 1;
        }
    }

    fn parse_any(&mut self) -> Result<Value, PartialJsonError> {
        self.skip_ws();
        let Some(b) = self.peek() else {
            return Err(partial("unexpected end of input"));
        };
        match b {
            b'"' => self.parse_string().map(Value::String),
            b'{' => self.parse_object(),
            b'[' => self.parse_array(),
            _ => {
                if let Some(v) = self.try_literal("null", Allow::NULL, Value::Null)? {
                    return Ok(v);
                }
                if let Some(v) = self.try_literal("true", Allow::BOOL, Value::Bool(true))? {
                    return Ok(v);
                }
                if let Some(v) = self.try_literal("false", Allow::BOOL, Value::Bool(false))? {
                    return Ok(v);
                }
                // Non-finite tokens have no JSON representation; they map to
                // null rather than failing the whole document.
                if let Some(v) = self.try_literal("NaN", Allow::NAN, Value::Null)? {
                    return Ok(v);
                }
                if let Some(v) = self.try_literal("Infinity", Allow::INFINITY, Value::Null)? {
                    return Ok(v);
                }
                if let Some(v) = self.try_literal("-Infinity", Allow::NEG_INFINITY, Value::Null)? {
                    return Ok(v);
                }
                self.parse_number()
            }
        }
    }

    /// Match a keyword either in full or, when `flag` is allowed, as a
    /// truncated tail of the input. `-Infinity` needs two characters before
    /// a truncation counts, so a lone `-` stays a number prefix.
    fn try_literal(
        &mut self,
        keyword: &str,
        flag: Allow,
        value: Value,
    ) -> Result<Option<Value>, PartialJsonError> {
        let rest = &self.text[self.index..];
        if rest.starts_with(keyword) {
            self.index += keyword.len();
            return Ok(Some(value));
        }
        let min_prefix = if keyword.starts_with('-') { 2 } else { 1 };
        if rest.len() >= min_prefix && rest.len() < keyword.len() && keyword.starts_with(rest) {
            if self.allow.contains(flag) {
                self.index = self.bytes.len();
                return Ok(Some(value));
            }
            return Err(partial("truncated keyword"));
        }
        Ok(None)
    }

    /// Parse a string token starting at the current `"`.
    fn parse_string(&mut self) -> Result<String, PartialJsonError> {
        let start = self.index;
        self.index += 1;
        let mut escaped = false;
        let mut close = None;
        while let Some(b) = self.peek() {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                close = Some(self.index);
                break;
            }
            self.index += 1;
        }

        if let Some(close) = close {
            self.index = close + 1;
            let token = &self.text[start..self.index];
            return serde_json::from_str(token).map_err(|_| malformed("invalid string token"));
        }

        // Unterminated string.
        if !self.allow.contains(Allow::STR) {
            return Err(partial("unterminated string"));
        }
        let token = &self.text[start..];
        let mut repaired = String::with_capacity(token.len() + 1);
        repaired.push_str(token);
        repaired.push('"');
        if let Ok(s) = serde_json::from_str::<String>(&repaired) {
            return Ok(s);
        }
        // The tail is mid-escape (`\`, `\u00`, ...); drop everything from
        // the last backslash and close there instead.
        if let Some(cut) = token.rfind('\\') {
            let mut repaired = String::with_capacity(cut + 1);
            repaired.push_str(&token[..cut]);
            repaired.push('"');
            if let Ok(s) = serde_json::from_str::<String>(&repaired) {
                return Ok(s);
            }
        }
        Err(malformed("unrepairable string token"))
    }

    fn parse_object(&mut self) -> Result<Value, PartialJsonError> {
        self.index += 1;
        let mut map = Map::new();
        match self.parse_object_body(&mut map) {
            Ok(()) => Ok(Value::Object(map)),
            // Truncation is recoverable; malformed keys or values are not.
            Err(PartialJsonError::Partial(_)) if self.allow.contains(Allow::OBJ) => {
                Ok(Value::Object(map))
            }
            Err(e) => Err(e),
        }
    }

    fn parse_object_body(&mut self, map: &mut Map<String, Value>) -> Result<(), PartialJsonError> {
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'}') => {
                    self.index += 1;
                    return Ok(());
                }
                None => return Err(partial("unterminated object")),
                Some(b'"') => {}
                Some(_) => return Err(malformed("expected object key")),
            }
            let key = self.parse_string()?;
            self.skip_ws();
            match self.peek() {
                Some(b':') => self.index += 1,
                None => return Err(partial("expected ':' after object key")),
                Some(_) => return Err(malformed("expected ':' after object key")),
            }
            let value = self.parse_any()?;
            map.insert(key, value);
            self.skip_ws();
            if self.peek() == Some(b',') {
                self.index += 1;
            }
        }
    }

    fn parse_array(&mut self) -> Result<Value, PartialJsonError> {
        self.index += 1;
        let mut items = Vec::new();
        match self.parse_array_body(&mut items) {
            Ok(()) => Ok(Value::Array(items)),
            Err(PartialJsonError::Partial(_)) if self.allow.contains(Allow::ARR) => {
                Ok(Value::Array(items))
            }
            Err(e) => Err(e),
        }
    }

    fn parse_array_body(&mut self, items: &mut Vec<Value>) -> Result<(), PartialJsonError> {
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b']') => {
                    self.index += 1;
                    return Ok(());
                }
                None => return Err(partial("unterminated array")),
                Some(_) => {}
            }
            items.push(self.parse_any()?);
            self.skip_ws();
            if self.peek() == Some(b',') {
                self.index += 1;
            }
        }
    }

    /// Parse a number token: consume up to the next structural byte, then
    /// lean on serde_json for the actual grammar.
    fn parse_number(&mut self) -> Result<Value, PartialJsonError> {
        let start = self.index;
        while let Some(b) = self.peek() {
            if matches!(b, b',' | b']' | b'}') {
                break;
            }
            self.index += 1;
        }
        let token = self.text[start..self.index].trim_end();
        if token == "-" {
            // A lone sign can always become a valid number.
            return Err(partial("dangling number sign"));
        }
        if self.at_end() && !self.allow.contains(Allow::NUM) && is_number_prefix(token) {
            return Err(partial("number may still grow"));
        }
        if let Ok(v) = serde_json::from_str::<Value>(token) {
            if v.is_number() {
                return Ok(v);
            }
            return Err(malformed("expected a number token"));
        }
        // Trim a dangling fraction dot or exponent and retry.
        let trimmed = token.trim_end_matches(['.', 'e', 'E', '+', '-']);
        if trimmed.len() < token.len() && !trimmed.is_empty() && trimmed != "-" {
            if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
                if v.is_number() {
                    return Ok(v);
                }
            }
        }
        Err(malformed("invalid number token"))
    }
}

/// Whether some continuation could extend `token` into a valid JSON number.
fn is_number_prefix(token: &str) -> bool {
    let bytes = token.as_bytes();
    let mut i = usize::from(bytes.first() == Some(&b'-'));
    let int_start = i;
    while bytes.get(i).is_some_and(u8::is_ascii_digit) {
        i += 1;
    }
    if i == int_start {
        return i == bytes.len();
    }
    if bytes[int_start] == b'0' && i > int_start + 1 {
        // "01" has no valid continuation.
        return false;
    }
    if bytes.get(i) == Some(&b'.') {
        i += 1;
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
    }
    i == bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_documents_parse_unchanged() {
        let doc = r#"{"a": [1, 2.5, "x"], "b": {"c": true, "d": null}}"#;
        assert_eq!(
            parse_partial_json(doc, Allow::ALL).unwrap(),
            serde_json::from_str::<Value>(doc).unwrap()
        );
    }

    #[test]
    fn test_empty_input_is_malformed() {
        assert!(matches!(
            partial_parse(""),
            Err(PartialJsonError::Malformed(_))
        ));
        assert!(matches!(
            partial_parse("   \n"),
            Err(PartialJsonError::Malformed(_))
        ));
    }

    #[test]
    fn test_unterminated_string_closed() {
        assert_eq!(partial_parse(r#""hel"#).unwrap(), json!("hel"));
    }

    #[test]
    fn test_unterminated_string_without_allowance_is_partial() {
        let allow = Allow::ALL.without(Allow::STR);
        assert!(matches!(
            parse_partial_json(r#""hel"#, allow),
            Err(PartialJsonError::Partial(_))
        ));
    }

    #[test]
    fn test_string_mid_escape_truncates_at_backslash() {
        assert_eq!(partial_parse(r#""ab\"#).unwrap(), json!("ab"));
        assert_eq!(partial_parse(r#""ab\u00"#).unwrap(), json!("ab"));
        assert_eq!(partial_parse(r#""abA"#).unwrap(), json!("abA"));
    }

    #[test]
    fn test_object_drops_incomplete_member() {
        assert_eq!(partial_parse(r#"{"a": 1, "b"#).unwrap(), json!({"a": 1}));
        assert_eq!(partial_parse(r#"{"a": 1, "b""#).unwrap(), json!({"a": 1}));
        assert_eq!(partial_parse(r#"{"a": 1, "b":"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_object_keeps_completed_string_value() {
        assert_eq!(
            partial_parse(r#"{"msg": "hel"#).unwrap(),
            json!({"msg": "hel"})
        );
    }

    #[test]
    fn test_top_level_number_held_back_by_default() {
        // More digits could still arrive; the default allow set refuses to
        // guess.
        assert!(matches!(
            partial_parse("123"),
            Err(PartialJsonError::Partial(_))
        ));
        assert_eq!(parse_partial_json("123", Allow::ALL).unwrap(), json!(123));
    }

    #[test]
    fn test_trailing_number_dropped_from_array_by_default() {
        assert_eq!(partial_parse("[1, 2, 34").unwrap(), json!([1, 2]));
        assert_eq!(
            parse_partial_json("[1, 2, 34", Allow::ALL).unwrap(),
            json!([1, 2, 34])
        );
    }

    #[test]
    fn test_number_followed_by_delimiter_is_complete() {
        assert_eq!(partial_parse("[12, 3]").unwrap(), json!([12, 3]));
        assert_eq!(partial_parse(r#"{"n": 7}"#).unwrap(), json!({"n": 7}));
    }

    #[test]
    fn test_dangling_sign_is_partial_never_malformed() {
        assert!(matches!(
            parse_partial_json("-", Allow::ALL),
            Err(PartialJsonError::Partial(_))
        ));
        assert!(matches!(
            partial_parse("-"),
            Err(PartialJsonError::Partial(_))
        ));
    }

    #[test]
    fn test_dangling_exponent_trimmed() {
        assert_eq!(parse_partial_json("1.", Allow::ALL).unwrap(), json!(1));
        assert_eq!(parse_partial_json("12e", Allow::ALL).unwrap(), json!(12));
        assert_eq!(
            parse_partial_json("12e+", Allow::ALL).unwrap(),
            json!(12)
        );
        assert_eq!(
            parse_partial_json("-3.5e-", Allow::ALL).unwrap(),
            json!(-3.5)
        );
    }

    #[test]
    fn test_truncated_keywords() {
        assert_eq!(partial_parse("tru").unwrap(), json!(true));
        assert_eq!(partial_parse("fal").unwrap(), json!(false));
        assert_eq!(partial_parse("nul").unwrap(), Value::Null);
        let no_bool = Allow::ALL.without(Allow::BOOL);
        assert!(parse_partial_json("tru", no_bool).is_err());
    }

    #[test]
    fn test_non_finite_tokens_map_to_null() {
        assert_eq!(partial_parse("NaN").unwrap(), Value::Null);
        assert_eq!(partial_parse("Infinity").unwrap(), Value::Null);
        assert_eq!(partial_parse("-Infinity").unwrap(), Value::Null);
        assert_eq!(partial_parse("-Inf").unwrap(), Value::Null);
        assert_eq!(partial_parse(r#"{"x": NaN}"#).unwrap(), json!({"x": null}));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            partial_parse("@!#"),
            Err(PartialJsonError::Malformed(_))
        ));
        assert!(matches!(
            partial_parse("{3: 4}"),
            Err(PartialJsonError::Malformed(_))
        ));
    }

    #[test]
    fn test_garbage_inside_container_is_malformed() {
        assert!(matches!(
            partial_parse("[1, @]"),
            Err(PartialJsonError::Malformed(_))
        ));
        assert!(matches!(
            partial_parse(r#"{"a": 1, 3: 4"#),
            Err(PartialJsonError::Malformed(_))
        ));
    }

    #[test]
    fn test_non_numeric_token_at_end_is_malformed() {
        // Hitting end of input only defers judgement for plausible number
        // prefixes.
        assert!(matches!(
            partial_parse("12x"),
            Err(PartialJsonError::Malformed(_))
        ));
        assert!(matches!(
            partial_parse("[trx"),
            Err(PartialJsonError::Malformed(_))
        ));
        assert!(matches!(
            partial_parse("-12.5e"),
            Err(PartialJsonError::Partial(_))
        ));
    }

    #[test]
    fn test_nested_truncation() {
        assert_eq!(
            partial_parse(r#"{"a": {"b": [1, {"c": "de"#).unwrap(),
            json!({"a": {"b": [1, {"c": "de"}]}})
        );
    }

    #[test]
    fn test_container_truncation_without_allowance_is_partial() {
        let scalars_only = Allow::ATOMS;
        assert!(matches!(
            parse_partial_json(r#"{"a": 1"#, scalars_only),
            Err(PartialJsonError::Partial(_))
        ));
        assert!(matches!(
            parse_partial_json("[1, 2", scalars_only),
            Err(PartialJsonError::Partial(_))
        ));
    }

    #[test]
    fn test_every_prefix_of_valid_json_is_never_malformed() {
        // Monotonicity: growing prefixes may flip between partial results
        // and Partial errors but must never become Malformed.
        let doc = r#"{"items": [{"name": "café", "n": -12.5e+3, "ok": true}], "x": null}"#;
        for end in 1..=doc.len() {
            if !doc.is_char_boundary(end) {
                continue;
            }
            let prefix = &doc[..end];
            for allow in [Allow::ALL, Allow::ALL.without(Allow::NUM)] {
                match parse_partial_json(prefix, allow) {
                    Ok(_) | Err(PartialJsonError::Partial(_)) => {}
                    Err(PartialJsonError::Malformed(m)) => {
                        panic!("prefix {prefix:?} reported malformed: {m}")
                    }
                }
            }
        }
    }
}
