//! Request headers derived from connect options.

use std::collections::HashMap;

use crate::url::Url;

/// `Origin` value for `url`: `ws` becomes `http`, `wss` becomes `https`,
/// and the port is kept only when it is not the scheme default.
pub(crate) fn origin_for(url: &Url) -> String {
    let scheme = if url.is_secure() { "https" } else { "http" };
    format!("{scheme}://{}", url.authority())
}

/// Caller headers in a stable order, plus a synthesized `Origin` when the
/// caller did not supply one under any capitalization.
pub(crate) fn request_headers(url: &Url, options: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = options
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    headers.sort();
    if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("origin")) {
        headers.push(("Origin".to_owned(), origin_for(url)));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(input: &str) -> String {
        origin_for(&Url::parse(input).unwrap())
    }

    #[test]
    fn test_origin_default_ports_omitted() {
        assert_eq!(origin("wss://example.com/chat"), "https://example.com");
        assert_eq!(origin("ws://example.com/"), "http://example.com");
        assert_eq!(origin("ws://example.com:80/"), "http://example.com");
        assert_eq!(origin("wss://example.com:443"), "https://example.com");
    }

    #[test]
    fn test_origin_keeps_explicit_port() {
        assert_eq!(origin("ws://example.com:8080"), "http://example.com:8080");
        assert_eq!(origin("wss://example.com:80"), "https://example.com:80");
        assert_eq!(origin("ws://[::1]:9000/"), "http://[::1]:9000");
    }

    #[test]
    fn test_explicit_origin_wins() {
        let url = Url::parse("ws://example.com:8080").unwrap();
        let mut options = HashMap::new();
        options.insert("origin".to_owned(), "app://local".to_owned());
        let headers = request_headers(&url, &options);
        assert_eq!(headers, vec![("origin".to_owned(), "app://local".to_owned())]);
    }

    #[test]
    fn test_options_pass_through() {
        let url = Url::parse("ws://example.com").unwrap();
        let mut options = HashMap::new();
        options.insert("Authorization".to_owned(), "Bearer t".to_owned());
        let headers = request_headers(&url, &options);
        assert_eq!(
            headers,
            vec![
                ("Authorization".to_owned(), "Bearer t".to_owned()),
                ("Origin".to_owned(), "http://example.com".to_owned()),
            ]
        );
    }
}
