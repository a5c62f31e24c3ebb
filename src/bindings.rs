//! Statement parameters and their expansion into driver placeholders.
//!
//! Named parameters are written `$name` inside the statement text. Drivers
//! only understand numbered placeholders, so named bindings are rewritten
//! into `$1, $2, ...` (PostgreSQL) or `?1, ?2, ...` (SQLite) before the
//! statement is sent, one index per distinct name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// Error raised while matching named placeholders to their values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("no value bound for placeholder ${0}")]
    Missing(String),

    #[error("named bindings cannot be mixed with numbered placeholder {0}")]
    MixedPlaceholders(String),
}

/// Numbered placeholder syntax understood by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ...
    Dollar,
    /// `?1`, `?2`, ...
    Question,
}

impl PlaceholderStyle {
    fn placeholder(self, index: usize) -> String {
        match self {
            PlaceholderStyle::Dollar => format!("${index}"),
            PlaceholderStyle::Question => format!("?{index}"),
        }
    }
}

/// Parameter set of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Bindings {
    Positional(Vec<Value>),
    Named(BTreeMap<String, Value>),
}

impl Default for Bindings {
    fn default() -> Self {
        Bindings::Positional(Vec::new())
    }
}

impl Bindings {
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Bindings::Positional(values.into_iter().map(Into::into).collect())
    }

    pub fn named<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Bindings::Named(
            values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        match self {
            Bindings::Positional(values) => values.len(),
            Bindings::Named(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites `statement` into numbered placeholders and returns the values
    /// in placeholder order. Positional bindings pass through untouched.
    ///
    /// Quoted text, dollar-quoted text and comments are copied as they are.
    /// A statement bound by name must not also contain the driver's own
    /// numbered placeholders.
    pub fn expand(
        &self,
        statement: &str,
        style: PlaceholderStyle,
    ) -> Result<(String, Vec<Value>), BindingError> {
        let named = match self {
            Bindings::Positional(values) => return Ok((statement.to_owned(), values.clone())),
            Bindings::Named(named) => named,
        };

        let bytes = statement.as_bytes();
        let len = bytes.len();
        let mut sql = String::with_capacity(len);
        let mut order: Vec<&str> = Vec::new();
        let mut values = Vec::new();
        let mut copied = 0;
        let mut i = 0;

        while i < len {
            match bytes[i] {
                quote @ (b'\'' | b'"') => {
                    i = match statement[i + 1..].find(quote as char) {
                        Some(offset) => i + 1 + offset + 1,
                        None => len,
                    };
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => {
                    i = statement[i..].find('\n').map_or(len, |offset| i + offset);
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = statement[i + 2..]
                        .find("*/")
                        .map_or(len, |offset| i + 2 + offset + 2);
                }
                b'?' if style == PlaceholderStyle::Question => {
                    let end = digits_end(bytes, i + 1);
                    return Err(BindingError::MixedPlaceholders(statement[i..end].to_owned()));
                }
                b'$' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < len && is_ident_byte(bytes[end]) {
                        end += 1;
                    }

                    // `a$b` identifiers
                    if i > 0 && is_ident_byte(bytes[i - 1]) {
                        i = end.max(start);
                        continue;
                    }

                    if end > start && bytes[start].is_ascii_digit() {
                        let end = digits_end(bytes, start);
                        return Err(BindingError::MixedPlaceholders(statement[i..end].to_owned()));
                    }

                    // `$tag$ ... $tag$` dollar-quoted literal
                    if end < len && bytes[end] == b'$' {
                        let tag = &statement[i..=end];
                        i = match statement[end + 1..].find(tag) {
                            Some(offset) => end + 1 + offset + tag.len(),
                            None => len,
                        };
                        continue;
                    }

                    if end == start {
                        i = start;
                        continue;
                    }

                    let name = &statement[start..end];
                    let index = match order.iter().position(|seen| *seen == name) {
                        Some(position) => position + 1,
                        None => {
                            let value = named
                                .get(name)
                                .ok_or_else(|| BindingError::Missing(name.to_owned()))?;
                            order.push(name);
                            values.push(value.clone());
                            order.len()
                        }
                    };
                    sql.push_str(&statement[copied..i]);
                    sql.push_str(&style.placeholder(index));
                    copied = end;
                    i = end;
                }
                _ => i += 1,
            }
        }
        sql.push_str(&statement[copied..]);

        Ok((sql, values))
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn digits_end(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    i
}

impl From<Vec<Value>> for Bindings {
    fn from(values: Vec<Value>) -> Self {
        Bindings::Positional(values)
    }
}

impl From<BTreeMap<String, Value>> for Bindings {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Bindings::Named(values)
    }
}

/// Computes bindings at execution time.
pub type BindingProducer = Arc<dyn Fn() -> Bindings + Send + Sync>;

/// Where a task takes its bindings from: a fixed set, or a producer that is
/// called every time the task executes.
#[derive(Clone)]
pub enum BindingSource {
    Literal(Bindings),
    Producer(BindingProducer),
}

impl BindingSource {
    pub fn producer<F>(f: F) -> Self
    where
        F: Fn() -> Bindings + Send + Sync + 'static,
    {
        BindingSource::Producer(Arc::new(f))
    }

    /// Returns the bindings, invoking the producer if there is one.
    pub fn resolve(&self) -> Bindings {
        match self {
            BindingSource::Literal(bindings) => bindings.clone(),
            BindingSource::Producer(produce) => produce(),
        }
    }
}

impl Default for BindingSource {
    fn default() -> Self {
        BindingSource::Literal(Bindings::default())
    }
}

impl fmt::Debug for BindingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingSource::Literal(bindings) => f.debug_tuple("Literal").field(bindings).finish(),
            BindingSource::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

impl From<Bindings> for BindingSource {
    fn from(bindings: Bindings) -> Self {
        BindingSource::Literal(bindings)
    }
}

impl From<Option<Bindings>> for BindingSource {
    fn from(bindings: Option<Bindings>) -> Self {
        bindings.map(BindingSource::Literal).unwrap_or_default()
    }
}

impl From<Vec<Value>> for BindingSource {
    fn from(values: Vec<Value>) -> Self {
        BindingSource::Literal(Bindings::Positional(values))
    }
}
