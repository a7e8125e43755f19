//! Opening handshake (RFC 6455 Section 4).
//!
//! The client side builds the upgrade request and verifies the server's
//! answer. The server side exists so in-process peers (test servers, local
//! bridges) can speak the same dialect without another dependency.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::url::Url;

/// GUID appended to the key before hashing (RFC 6455 Section 1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Headers the handshake itself owns; caller options cannot replace them.
const RESERVED_HEADERS: [&str; 4] = [
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// Base64(SHA-1(key + GUID)).
///
/// ```
/// use ws_bridge::protocol::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Fresh 16-byte nonce, Base64 encoded.
///
/// # Errors
///
/// Returns `Error::Io` if the OS random source is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(e.to_string()))?;
    Ok(BASE64.encode(nonce))
}

/// Whether `name` is a header the handshake generates itself.
#[must_use]
pub fn is_reserved_header(name: &str) -> bool {
    RESERVED_HEADERS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// Offset just past the blank line ending an HTTP head, if present.
#[must_use]
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn validate_header(name: &str, value: &str) -> Result<()> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic() && b != b':') {
        return Err(Error::InvalidHeaderValue {
            header: name.to_owned(),
            reason: "not a valid header name".into(),
        });
    }
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidHeaderValue {
            header: name.to_owned(),
            reason: "contains CR or LF characters".into(),
        });
    }
    Ok(())
}

/// Split an HTTP head into its first line and lowercased headers.
fn parse_head(data: &[u8]) -> Result<(&str, HashMap<String, String>)> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::InvalidHandshake("handshake is not UTF-8".into()))?;
    let mut lines = text.split("\r\n");
    let first = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Error::InvalidHandshake("empty handshake".into()))?;

    let mut headers = HashMap::new();
    for line in lines.take_while(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidHandshake(format!("malformed header line: {line}")))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
    }
    Ok((first, headers))
}

fn require<'a>(headers: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidHandshake(format!("missing {name} header")))
}

fn check_upgrade_headers(headers: &HashMap<String, String>) -> Result<()> {
    let upgrade = require(headers, "upgrade")?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::InvalidHandshake(format!("unexpected Upgrade: {upgrade}")));
    }
    let connection = require(headers, "connection")?;
    if !connection
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(Error::InvalidHandshake(format!(
            "unexpected Connection: {connection}"
        )));
    }
    Ok(())
}

/// An upgrade request ready to be written, plus what is needed to check the
/// reply.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    key: String,
    protocols: Vec<String>,
    headers: Vec<(String, String)>,
    target: String,
}

impl ClientHandshake {
    /// Build a request for `url` with a random key.
    ///
    /// `protocols` become one comma-separated `Sec-WebSocket-Protocol`
    /// header. Each entry in `extra_headers` is sent verbatim; one whose
    /// name matches a generated header (such as `Host`) replaces it.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHeaderValue` for names or values that cannot be
    /// written, `Error::Io` if no random key can be generated.
    pub fn new<'a>(
        url: &Url,
        protocols: &[String],
        extra_headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self> {
        Self::with_key(url, protocols, extra_headers, generate_key()?)
    }

    /// Build a request with a caller-chosen key.
    ///
    /// # Errors
    ///
    /// See [`ClientHandshake::new`].
    pub fn with_key<'a>(
        url: &Url,
        protocols: &[String],
        extra_headers: impl IntoIterator<Item = (&'a str, &'a str)>,
        key: String,
    ) -> Result<Self> {
        let mut headers: Vec<(String, String)> = vec![
            ("Host".into(), url.authority()),
            ("Upgrade".into(), "websocket".into()),
            ("Connection".into(), "Upgrade".into()),
            ("Sec-WebSocket-Key".into(), key.clone()),
            ("Sec-WebSocket-Version".into(), "13".into()),
        ];
        if !protocols.is_empty() {
            headers.push(("Sec-WebSocket-Protocol".into(), protocols.join(", ")));
        }

        for (name, value) in extra_headers {
            validate_header(name, value)?;
            if is_reserved_header(name) {
                tracing::warn!(header = name, "ignoring caller-supplied handshake header");
                continue;
            }
            match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some(slot) => slot.1 = value.to_owned(),
                None => headers.push((name.to_owned(), value.to_owned())),
            }
        }
        for protocol in protocols {
            validate_header("Sec-WebSocket-Protocol", protocol)?;
        }

        Ok(Self {
            key,
            protocols: protocols.to_vec(),
            headers,
            target: url.target(),
        })
    }

    /// The `Sec-WebSocket-Key` sent.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Request headers in the order they are written.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Serialize the request head.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("GET {} HTTP/1.1\r\n", self.target);
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }

    /// Check the server's reply head.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the status is not 101, upgrade headers
    /// are missing, the accept key is wrong, or the server selected a
    /// sub-protocol that was not offered.
    pub fn verify(&self, response: &[u8]) -> Result<HandshakeResponse> {
        let parsed = HandshakeResponse::parse(response)?;
        let expected = compute_accept_key(&self.key);
        if parsed.accept != expected {
            return Err(Error::InvalidHandshake(format!(
                "Sec-WebSocket-Accept mismatch: expected {expected}, got {}",
                parsed.accept
            )));
        }
        if let Some(chosen) = &parsed.protocol {
            if !self.protocols.iter().any(|p| p == chosen) {
                return Err(Error::InvalidHandshake(format!(
                    "server selected unrequested protocol {chosen}"
                )));
            }
        }
        Ok(parsed)
    }
}

/// Upgrade request as seen by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request target.
    pub path: String,
    /// `Sec-WebSocket-Key`.
    pub key: String,
    /// Offered sub-protocols, in order.
    pub protocols: Vec<String>,
    /// Every header, keyed by lowercased name.
    pub headers: HashMap<String, String>,
}

impl HandshakeRequest {
    /// Parse a request head.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the request line is not `GET <target>
    /// HTTP/1.1`, the upgrade headers are missing, the version is not 13 or
    /// the key is not a 16-byte nonce.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (request_line, headers) = parse_head(data)?;
        let mut parts = request_line.split_whitespace();
        let (Some("GET"), Some(path), Some("HTTP/1.1"), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidHandshake(format!(
                "bad request line: {request_line}"
            )));
        };

        check_upgrade_headers(&headers)?;
        require(&headers, "host")?;
        if require(&headers, "sec-websocket-version")? != "13" {
            return Err(Error::InvalidHandshake("unsupported version".into()));
        }
        let key = require(&headers, "sec-websocket-key")?.to_owned();
        if BASE64.decode(&key).map(|k| k.len()) != Ok(16) {
            return Err(Error::InvalidHandshake(format!("bad key: {key}")));
        }

        let protocols = headers
            .get("sec-websocket-protocol")
            .map(|p| p.split(',').map(|s| s.trim().to_owned()).collect())
            .unwrap_or_default();

        Ok(Self {
            path: path.to_owned(),
            key,
            protocols,
            headers,
        })
    }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Successful upgrade reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// `Sec-WebSocket-Accept`.
    pub accept: String,
    /// Selected sub-protocol.
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Accept `request`, selecting its first offered sub-protocol.
    #[must_use]
    pub fn from_request(request: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&request.key),
            protocol: request.protocols.first().cloned(),
        }
    }

    /// Serialize the 101 reply head.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::from(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n",
        );
        out.push_str(&format!("Sec-WebSocket-Accept: {}\r\n", self.accept));
        if let Some(protocol) = &self.protocol {
            out.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
        }
        out.push_str("\r\n");
        out.into_bytes()
    }

    /// Parse a reply head.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the status is not 101 or required
    /// headers are missing.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (status_line, headers) = parse_head(data)?;
        let mut parts = status_line.splitn(3, ' ');
        match (parts.next(), parts.next()) {
            (Some(version), Some("101")) if version.starts_with("HTTP/1.") => {}
            _ => {
                return Err(Error::InvalidHandshake(format!(
                    "unexpected status: {status_line}"
                )));
            }
        }
        check_upgrade_headers(&headers)?;
        Ok(Self {
            accept: require(&headers, "sec-websocket-accept")?.to_owned(),
            protocol: headers.get("sec-websocket-protocol").cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const NO_HEADERS: [(&str, &str); 0] = [];

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn request_text(handshake: &ClientHandshake) -> String {
        String::from_utf8(handshake.to_bytes()).unwrap()
    }

    #[test]
    fn test_compute_accept_key_rfc_example() {
        assert_eq!(compute_accept_key(RFC_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_generate_key_is_16_byte_nonce() {
        let key = generate_key().unwrap();
        assert_eq!(BASE64.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key().unwrap());
    }

    #[test]
    fn test_client_request_layout() {
        let hs = ClientHandshake::with_key(
            &url("ws://example.com:8080/chat?room=1"),
            &["chat".into(), "superchat".into()],
            [("X-Custom", "yes")],
            RFC_KEY.into(),
        )
        .unwrap();
        let text = request_text(&hs);
        assert!(text.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:8080\r\n"));
        assert!(text.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n"));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: chat, superchat\r\n"));
        assert!(text.contains("X-Custom: yes\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_client_request_default_port_host() {
        let hs = ClientHandshake::with_key(&url("wss://example.com"), &[], NO_HEADERS, RFC_KEY.into())
            .unwrap();
        let text = request_text(&hs);
        assert!(text.contains("Host: example.com\r\n"));
        assert!(!text.contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_extra_headers_override_and_reserved() {
        let hs = ClientHandshake::with_key(
            &url("ws://h/"),
            &[],
            [("host", "other"), ("Sec-WebSocket-Key", "forged")],
            RFC_KEY.into(),
        )
        .unwrap();
        let text = request_text(&hs);
        assert!(text.contains("Host: other\r\n"));
        assert!(!text.contains("forged"));
    }

    #[test]
    fn test_header_injection_rejected() {
        let err = ClientHandshake::with_key(
            &url("ws://h/"),
            &[],
            [("X-Evil", "a\r\nInjected: 1")],
            RFC_KEY.into(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidHeaderValue { .. }));
        assert!(
            ClientHandshake::with_key(&url("ws://h/"), &[], [("Bad Name", "v")], RFC_KEY.into())
                .is_err()
        );
    }

    #[test]
    fn test_server_round_trip() {
        let hs = ClientHandshake::with_key(
            &url("ws://localhost:9001/echo"),
            &["v1".into()],
            [("Origin", "http://localhost:9001")],
            RFC_KEY.into(),
        )
        .unwrap();
        let request = HandshakeRequest::parse(&hs.to_bytes()).unwrap();
        assert_eq!(request.path, "/echo");
        assert_eq!(request.protocols, vec!["v1"]);
        assert_eq!(request.header("origin"), Some("http://localhost:9001"));

        let response = HandshakeResponse::from_request(&request);
        let verified = hs.verify(&response.to_bytes()).unwrap();
        assert_eq!(verified.protocol.as_deref(), Some("v1"));
    }

    #[test]
    fn test_verify_rejects_bad_accept() {
        let hs = ClientHandshake::with_key(&url("ws://h/"), &[], NO_HEADERS, RFC_KEY.into()).unwrap();
        let reply = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\nConnection: Upgrade\r\n\
            Sec-WebSocket-Accept: bm9wZQ==\r\n\r\n";
        assert!(matches!(hs.verify(reply), Err(Error::InvalidHandshake(_))));
    }

    #[test]
    fn test_verify_rejects_non_101() {
        let hs = ClientHandshake::with_key(&url("ws://h/"), &[], NO_HEADERS, RFC_KEY.into()).unwrap();
        let err = hs
            .verify(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
            .unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[test]
    fn test_verify_rejects_unrequested_protocol() {
        let hs = ClientHandshake::with_key(&url("ws://h/"), &[], NO_HEADERS, RFC_KEY.into()).unwrap();
        let reply = HandshakeResponse {
            accept: compute_accept_key(RFC_KEY),
            protocol: Some("surprise".into()),
        };
        assert!(hs.verify(&reply.to_bytes()).is_err());
    }

    #[test]
    fn test_parse_request_rejects_bad_version() {
        let request = b"GET / HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\n\
            Connection: keep-alive, Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 8\r\n\r\n";
        assert!(HandshakeRequest::parse(request).is_err());
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"HTTP/1.1 101\r\n\r\nrest"), Some(16));
        assert_eq!(find_head_end(b"HTTP/1.1 101\r\n"), None);
    }
}
