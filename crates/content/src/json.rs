//! JSON documents with a jq-style path query.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use seq::Seq;
use serde_json::Value;

use crate::FileEntry;

/// Parse permissively: strip a UTF-8 BOM, tolerate comments and trailing
/// commas. Empty input and hard parse failures both yield `None`.
pub fn parse_permissive(bytes: &[u8]) -> Option<Value> {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    if bytes.is_empty() {
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    let options = jsonc_parser::ParseOptions {
        allow_comments: true,
        allow_trailing_commas: true,
        ..Default::default()
    };
    jsonc_parser::parse_to_serde_value(text, &options)
        .ok()
        .flatten()
}

/// A parsed JSON document (or node of one), or the absence of one.
#[derive(Debug, Clone, Default)]
pub struct JsonDoc {
    value: Option<Arc<Value>>,
    path: Option<String>,
    remote_url: Option<String>,
}

impl JsonDoc {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entry(entry: &FileEntry) -> Self {
        JsonDoc {
            value: parse_permissive(&entry.bytes).map(Arc::new),
            path: Some(entry.path.clone()),
            remote_url: Some(entry.remote_url.clone()),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        JsonDoc {
            value: parse_permissive(bytes).map(Arc::new),
            path: None,
            remote_url: None,
        }
    }

    pub fn from_value(value: Value) -> Self {
        JsonDoc {
            value: Some(Arc::new(value)),
            path: None,
            remote_url: None,
        }
    }

    fn node(&self, value: Value) -> JsonDoc {
        JsonDoc {
            value: Some(Arc::new(value)),
            path: self.path.clone(),
            remote_url: self.remote_url.clone(),
        }
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    /// Evaluate a jq-style path query, yielding each matching node.
    ///
    /// Supported forms: `.` (identity), `.foo.bar`, `."quoted name"`,
    /// `.foo[]` (iterate), `.foo[2]` (index), and `..` (every descendant,
    /// self included). Missing fields simply yield nothing.
    pub fn query(&self, query: &str) -> Seq<JsonDoc> {
        let Some(value) = &self.value else {
            return Seq::empty();
        };
        let steps = parse_query(query);
        let mut out = Vec::new();
        collect(value, &steps, &mut out);
        let this = self.clone();
        Seq::of(out.into_iter().map(|node| this.node(node)).collect())
    }

    /// First match of `query`, or the empty document.
    pub fn first(&self, query: &str) -> JsonDoc {
        self.query(query).first_or(JsonDoc::empty())
    }

    /// The n-th match of `query`, or the empty document.
    pub fn nth(&self, query: &str, n: usize) -> JsonDoc {
        self.query(query).nth(n).unwrap_or_else(JsonDoc::empty)
    }

    /// The document's declared `$schema`, if any.
    pub fn schema(&self) -> Option<String> {
        self.first(".\"$schema\"").as_str()
    }

    pub fn as_str(&self) -> Option<String> {
        self.value()?.as_str().map(str::to_owned)
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.value()?.as_u64()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.value()?.as_i64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value()?.as_f64()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value()?.as_bool()
    }
}

impl PartialEq for JsonDoc {
    fn eq(&self, other: &Self) -> bool {
        match (&self.value, &other.value) {
            (Some(a), Some(b)) => a == b,
            (None, None) => true,
            _ => false,
        }
    }
}

impl PartialOrd for JsonDoc {
    /// Value comparison for scalars; `None` whenever either side is
    /// missing or the values aren't comparable. All derived comparison
    /// operators are therefore `false` against an empty document.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let (a, b) = (self.value()?, other.value()?);
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for JsonDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => match serde_json::to_string_pretty(value.as_ref()) {
                Ok(rendered) => f.write_str(&rendered),
                Err(_) => f.write_str("None"),
            },
            None => f.write_str("None"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Field(String),
    Index(usize),
    IterateAll,
    Recurse,
}

/// Parse a jq-style path. Panics on malformed queries — query strings are
/// written by the programmer, not read from data.
fn parse_query(query: &str) -> Vec<Step> {
    match try_parse_query(query) {
        Ok(steps) => steps,
        Err(reason) => panic!("invalid JSON path query {query:?}: {reason}"),
    }
}

fn try_parse_query(query: &str) -> Result<Vec<Step>, String> {
    let mut steps = Vec::new();
    let mut chars = query.chars().peekable();

    if chars.peek() != Some(&'.') {
        return Err("query must start with '.'".to_owned());
    }

    while chars.peek().is_some() {
        // A run of one dot separates steps; two dots is recursive descent.
        let mut dots = 0;
        while chars.peek() == Some(&'.') {
            chars.next();
            dots += 1;
        }
        match dots {
            0 | 1 => {}
            2 => steps.push(Step::Recurse),
            n => return Err(format!("{n} consecutive dots")),
        }

        match chars.peek() {
            None => break,
            Some('[') => {
                chars.next();
                let mut body = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    body.push(c);
                }
                if body.is_empty() {
                    steps.push(Step::IterateAll);
                } else {
                    let index: usize = body
                        .trim()
                        .parse()
                        .map_err(|_| format!("bad index '{body}'"))?;
                    steps.push(Step::Index(index));
                }
            }
            Some('"') => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                name.push(escaped);
                            }
                        }
                        Some(c) => name.push(c),
                        None => return Err("unterminated quoted field".to_owned()),
                    }
                }
                steps.push(Step::Field(name));
            }
            Some(c) if c.is_alphanumeric() || matches!(c, '_' | '$' | '-') => {
                let mut name = String::new();
                while let Some(c) = chars.peek() {
                    if c.is_alphanumeric() || matches!(c, '_' | '$' | '-') {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                steps.push(Step::Field(name));
            }
            Some(c) => return Err(format!("unexpected character {c:?}")),
        }
    }
    Ok(steps)
}

fn collect(value: &Value, steps: &[Step], out: &mut Vec<Value>) {
    let Some(step) = steps.first() else {
        out.push(value.clone());
        return;
    };
    let rest = &steps[1..];
    match step {
        Step::Field(name) => {
            if let Some(child) = value.get(name.as_str()) {
                collect(child, rest, out);
            }
        }
        Step::Index(index) => {
            if let Some(child) = value.get(index) {
                collect(child, rest, out);
            }
        }
        Step::IterateAll => match value {
            Value::Array(items) => {
                for item in items {
                    collect(item, rest, out);
                }
            }
            Value::Object(map) => {
                for item in map.values() {
                    collect(item, rest, out);
                }
            }
            _ => {}
        },
        Step::Recurse => {
            collect(value, rest, out);
            match value {
                Value::Array(items) => {
                    for item in items {
                        collect(item, steps, out);
                    }
                }
                Value::Object(map) => {
                    for item in map.values() {
                        collect(item, steps, out);
                    }
                }
                _ => {}
            }
        }
    }
}
