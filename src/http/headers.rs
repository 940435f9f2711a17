//! Ordered, case-insensitive header map.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::{Error, Result};

// ============================================================================
// Headers
// ============================================================================

/// HTTP header collection.
///
/// Names are stored lower-cased and kept in insertion order. Inserting an
/// existing name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, replacing any previous value.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref().trim().to_ascii_lowercase();
        let value = value.into();

        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Sets `name` to `value` unless it is already present.
    pub fn insert_if_absent(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        if !self.contains(name.as_ref()) {
            self.insert(name, value);
        }
    }

    /// Parses and inserts a raw `name: value` line.
    ///
    /// The value is trimmed of surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the line has no `:` or the name
    /// is empty.
    pub fn add_header_line(&mut self, line: &str) -> Result<()> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::invalid_argument(format!("header line has no ':' delimiter: {line:?}")))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_argument(format!("header line has an empty name: {line:?}")));
        }

        self.insert(name, value.trim());
        Ok(())
    }

    /// Returns the value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if `name` is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns `true` if the comma-separated value of `name` contains
    /// `token`, compared case-insensitively.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    /// Removes `name` and returns its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let position = self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(position).1)
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of headers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no headers.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
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

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut headers = Headers::new();
        headers.insert("Content-Length", "10");

        assert_eq!(headers.get("content-length"), Some("10"));
        assert_eq!(headers.get("CONTENT-LENGTH"), Some("10"));
        assert_eq!(headers.iter().next(), Some(("content-length", "10")));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut headers = Headers::new();
        headers.insert("a", "1");
        headers.insert("b", "2");
        headers.insert("A", "3");

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_add_header_line_trims() {
        let mut headers = Headers::new();
        headers.add_header_line("X-Thing:   spaced value  ").unwrap();
        headers.add_header_line("Empty:").unwrap();

        assert_eq!(headers.get("x-thing"), Some("spaced value"));
        assert_eq!(headers.get("empty"), Some(""));
    }

    #[test]
    fn test_add_header_line_without_colon_is_invalid_argument() {
        let mut headers = Headers::new();
        let err = headers.add_header_line("no delimiter here").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_value_may_contain_colon() {
        let mut headers = Headers::new();
        headers.add_header_line("Location: http://example.com:8080/").unwrap();
        assert_eq!(headers.get("location"), Some("http://example.com:8080/"));
    }

    #[test]
    fn test_has_token() {
        let headers: Headers = [("Connection", "keep-alive, Upgrade")].into_iter().collect();
        assert!(headers.has_token("connection", "upgrade"));
        assert!(!headers.has_token("connection", "close"));
    }
}
