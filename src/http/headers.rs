//! Ordered HTTP header map.
//!
//! Header order is load-bearing for the toolkit: entries are kept in
//! insertion order, duplicates are preserved rather than merged, and
//! serialization walks the map front to back. Lookup is case-insensitive
//! per RFC 9110.

use std::fmt;

/// An ordered, duplicate-preserving header map.
///
/// # Examples
///
/// ```
/// use taghttp::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.append("Accept-Encoding", "gzip, br");
/// headers.append("X-Trace", "a");
/// headers.append("X-Trace", "b");
///
/// assert_eq!(headers.get("accept-encoding"), Some("gzip, br"));
/// let traces: Vec<_> = headers.get_all("x-trace").collect();
/// assert_eq!(traces, vec!["a", "b"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, preserving any existing entries with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Returns the first value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for `name` in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` when at least one entry with `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Number of entries, counting duplicates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
