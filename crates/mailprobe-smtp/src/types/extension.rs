//! SMTP extensions advertised in an EHLO reply.

use std::collections::HashMap;

use super::Reply;

/// Extensions negotiated by one successful EHLO.
///
/// A snapshot: the session swaps in a new value after each hello and never
/// edits one in place, so the capabilities seen before and after STARTTLS
/// stay distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    entries: HashMap<String, String>,
    auth: Vec<String>,
}

impl Extensions {
    /// An empty snapshot, as left by HELO or a failed EHLO.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Builds the snapshot from an EHLO reply.
    ///
    /// The first line is the server's greeting and is skipped. Every other
    /// line is `NAME[ PARAMS]`; names are stored upper-cased. An `AUTH` entry
    /// also fills the mechanism list, split on spaces.
    #[must_use]
    pub fn from_ehlo(reply: &Reply) -> Self {
        let entries: HashMap<String, String> = reply
            .message
            .iter()
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .map(|line| match line.split_once(' ') {
                Some((name, params)) => (name.to_ascii_uppercase(), params.to_string()),
                None => (line.to_ascii_uppercase(), String::new()),
            })
            .collect();

        let auth = entries
            .get("AUTH")
            .map(|mechs| mechs.split(' ').map(str::to_string).collect())
            .unwrap_or_default();

        Self { entries, auth }
    }

    /// Returns true if the server advertised `name`.
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_uppercase())
    }

    /// Returns the parameter string advertised for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Advertised authentication mechanisms, in server order.
    #[must_use]
    pub fn auth_mechanisms(&self) -> &[String] {
        &self.auth
    }

    /// Number of advertised extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ReplyCode;

    fn ehlo(lines: &[&str]) -> Reply {
        Reply::new(
            ReplyCode::OK,
            lines.iter().map(|l| (*l).to_string()).collect(),
        )
    }

    #[test]
    fn parses_names_and_params() {
        let ext = Extensions::from_ehlo(&ehlo(&["example.com", "SIZE 1000000", "AUTH PLAIN LOGIN"]));
        assert_eq!(ext.len(), 2);
        assert_eq!(ext.get("SIZE"), Some("1000000"));
        assert_eq!(ext.get("AUTH"), Some("PLAIN LOGIN"));
        assert_eq!(ext.auth_mechanisms(), ["PLAIN", "LOGIN"]);
    }

    #[test]
    fn greeting_line_is_not_an_extension() {
        let ext = Extensions::from_ehlo(&ehlo(&["mx.example.com Hello there"]));
        assert!(ext.is_empty());
        assert!(!ext.supports("mx.example.com"));
    }

    #[test]
    fn bare_names_have_empty_params() {
        let ext = Extensions::from_ehlo(&ehlo(&["example.com", "8BITMIME", "STARTTLS"]));
        assert!(ext.supports("8BITMIME"));
        assert_eq!(ext.get("STARTTLS"), Some(""));
        assert!(ext.auth_mechanisms().is_empty());
    }

    #[test]
    fn lookups_ignore_case() {
        let ext = Extensions::from_ehlo(&ehlo(&["example.com", "smtputf8", "Size 10"]));
        assert!(ext.supports("SMTPUTF8"));
        assert!(ext.supports("size"));
        assert_eq!(ext.get("SIZE"), Some("10"));
    }

    #[test]
    fn params_keep_inner_spaces() {
        let ext = Extensions::from_ehlo(&ehlo(&["example.com", "X-CUSTOM a b  c"]));
        assert_eq!(ext.get("X-CUSTOM"), Some("a b  c"));
    }

    #[test]
    fn none_is_empty() {
        assert!(Extensions::none().is_empty());
        assert!(!Extensions::none().supports("SIZE"));
    }
}
