//! Connection-string parsing.
//!
//! Accepts `scheme://host[:port][/path][?query]` for the `http`, `https`,
//! `ws` and `wss` schemes. Parsing is purely syntactic; nothing is resolved.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static URL_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"^(?i:(https?|wss?))://(\[[0-9A-Fa-f:.]+\]|[^/:?#\s\[\]]+)(?::(\d{1,5}))?(/[^?#\s]*)?(?:\?([^#\s]*))?$",
    )
});

/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Url {
    /// Lowercased scheme: `http`, `https`, `ws` or `wss`.
    pub scheme: String,
    /// Host name or address. IPv6 literals keep their brackets.
    pub host: String,
    /// Port as written, or empty when the string had none.
    pub port: String,
    /// Path, always starting with `/`.
    pub path: String,
    /// Query without the leading `?`, empty if absent.
    pub query_string: String,
}

impl Url {
    /// Parse a connection string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the string does not match
    /// `scheme://host[:port][/path][?query]`, the scheme is not one of
    /// `http`, `https`, `ws`, `wss`, or the port is out of range.
    pub fn parse(input: &str) -> Result<Self> {
        let pattern = URL_PATTERN
            .as_ref()
            .map_err(|e| Error::InvalidUrl(format!("connection-string pattern: {e}")))?;
        let caps = pattern
            .captures(input)
            .ok_or_else(|| Error::InvalidUrl(input.to_owned()))?;

        let port = caps.get(3).map_or("", |m| m.as_str());
        if !port.is_empty() && port.parse::<u16>().is_err() {
            return Err(Error::InvalidUrl(format!("port out of range in {input}")));
        }

        Ok(Self {
            scheme: caps[1].to_ascii_lowercase(),
            host: caps[2].to_owned(),
            port: port.to_owned(),
            path: caps
                .get(4)
                .map_or_else(|| "/".to_owned(), |m| m.as_str().to_owned()),
            query_string: caps.get(5).map_or("", |m| m.as_str()).to_owned(),
        })
    }

    /// Request target: path plus `?query` when a query is present.
    #[must_use]
    pub fn target(&self) -> String {
        if self.query_string.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string)
        }
    }

    /// `true` for `https` and `wss`.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        matches!(self.scheme.as_str(), "https" | "wss")
    }

    /// Port implied by the scheme when none is written.
    #[must_use]
    pub fn default_port(&self) -> u16 {
        if self.is_secure() { 443 } else { 80 }
    }

    /// Explicit port, or the scheme default.
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.parse().unwrap_or_else(|_| self.default_port())
    }

    /// `true` when no port was written or it equals the scheme default.
    #[must_use]
    pub fn has_default_port(&self) -> bool {
        self.port_or_default() == self.default_port()
    }

    /// Host without IPv6 brackets, suitable for resolution and SNI.
    #[must_use]
    pub fn bare_host(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host)
    }

    /// `host[:port]` with the port omitted when it is the scheme default.
    #[must_use]
    pub fn authority(&self) -> String {
        if self.has_default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port_or_default())
        }
    }
}

impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if !self.port.is_empty() {
            write!(f, ":{}", self.port)?;
        }
        write!(f, "{}", self.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_compiles() {
        assert!(URL_PATTERN.is_ok(), "{:?}", URL_PATTERN.as_ref().err());
    }

    #[test]
    fn test_parse_full() {
        let url = Url::parse("ws://example.com/path?x=1").unwrap();
        assert_eq!(url.scheme, "ws");
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, "");
        assert_eq!(url.path, "/path");
        assert_eq!(url.query_string, "x=1");
        assert_eq!(url.target(), "/path?x=1");
    }

    #[test]
    fn test_parse_defaults_path() {
        let url = Url::parse("wss://host:8443").unwrap();
        assert_eq!(url.path, "/");
        assert_eq!(url.port, "8443");
        assert_eq!(url.port_or_default(), 8443);
        assert_eq!(url.target(), "/");
    }

    #[test]
    fn test_parse_query_without_path() {
        let url = Url::parse("ws://host?a=b").unwrap();
        assert_eq!(url.path, "/");
        assert_eq!(url.target(), "/?a=b");
    }

    #[test]
    fn test_parse_all_schemes() {
        for scheme in ["http", "https", "ws", "wss"] {
            let url = Url::parse(&format!("{scheme}://h")).unwrap();
            assert_eq!(url.scheme, scheme);
        }
        assert_eq!(Url::parse("WSS://h").unwrap().scheme, "wss");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in [
            "",
            "example.com",
            "ftp://example.com",
            "ws//example.com",
            "ws://",
            "ws://host:",
            "ws://host:abc",
            "ws://host:99999",
            "ws://exa mple.com",
            "ws://host/path#frag",
        ] {
            assert!(
                matches!(Url::parse(input), Err(Error::InvalidUrl(_))),
                "{input:?} should not parse"
            );
        }
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Url::parse("ws://h").unwrap().port_or_default(), 80);
        assert_eq!(Url::parse("http://h").unwrap().port_or_default(), 80);
        assert_eq!(Url::parse("wss://h").unwrap().port_or_default(), 443);
        assert_eq!(Url::parse("https://h").unwrap().port_or_default(), 443);
    }

    #[test]
    fn test_authority() {
        assert_eq!(Url::parse("ws://h:80/").unwrap().authority(), "h");
        assert_eq!(Url::parse("ws://h:8080/").unwrap().authority(), "h:8080");
        assert_eq!(Url::parse("wss://h:443").unwrap().authority(), "h");
    }

    #[test]
    fn test_ipv6_literal() {
        let url = Url::parse("ws://[::1]:9000/x").unwrap();
        assert_eq!(url.host, "[::1]");
        assert_eq!(url.bare_host(), "::1");
        assert_eq!(url.authority(), "[::1]:9000");
    }

    #[test]
    fn test_display_round_trip() {
        let input = "wss://example.com:8443/chat?room=1";
        assert_eq!(Url::parse(input).unwrap().to_string(), input);
    }
}
