//! Splitting `scheme://host[:port]/path?query` URLs into the pieces the
//! socket layer and the upgrade request need.

use std::fmt::Write as _;

/// Errors produced by [`UrlParts::parse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    /// No `://` separator was found.
    #[error("missing scheme in {0:?}")]
    MissingScheme(String),

    /// Nothing between the scheme and the port/path.
    #[error("missing host in {0:?}")]
    MissingHost(String),

    /// The port was not a number in `1..=65535`.
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// A parsed connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    /// Lower-cased scheme, e.g. `ws` or `wss`.
    pub scheme: String,
    /// Host name or IP literal (IPv6 literals without brackets).
    pub host: String,
    /// Explicit port, if one was given.
    pub port: Option<u16>,
    /// Everything after the host and port, without the leading `/`.
    pub path_and_query: String,
}

impl UrlParts {
    /// Parse a URL string.
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        let (scheme, rest) = url
            .split_once("://")
            .filter(|(scheme, _)| !scheme.is_empty())
            .ok_or_else(|| UrlError::MissingScheme(url.to_string()))?;

        let (authority, path_and_query) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };

        let (host, port) = split_authority(authority)?;
        if host.is_empty() {
            return Err(UrlError::MissingHost(url.to_string()));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            port,
            path_and_query: path_and_query.to_string(),
        })
    }

    /// Whether the scheme asks for TLS.
    pub fn is_secure(&self) -> bool {
        matches!(self.scheme.as_str(), "wss" | "https")
    }

    /// The explicit port or the scheme default (443 secure, 80 otherwise).
    pub fn port_or_default(&self) -> u16 {
        self.port
            .unwrap_or(if self.is_secure() { 443 } else { 80 })
    }

    /// `Host` header value: `host:port`, bracketing IPv6 literals.
    pub fn host_header(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port_or_default())
        } else {
            format!("{}:{}", self.host, self.port_or_default())
        }
    }
}

fn split_authority(authority: &str) -> Result<(&str, Option<u16>), UrlError> {
    // [v6]:port
    if let Some(stripped) = authority.strip_prefix('[') {
        let Some((host, tail)) = stripped.split_once(']') else {
            return Err(UrlError::MissingHost(authority.to_string()));
        };
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host, Some(parse_port(port)?))),
            None if tail.is_empty() => Ok((host, None)),
            None => Err(UrlError::InvalidPort(tail.to_string())),
        };
    }

    match authority.split_once(':') {
        Some((host, port)) => Ok((host, Some(parse_port(port)?))),
        None => Ok((authority, None)),
    }
}

fn parse_port(port: &str) -> Result<u16, UrlError> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(UrlError::InvalidPort(port.to_string())),
        Ok(port) => Ok(port),
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn url_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_url() {
        let url = UrlParts::parse("ws://127.0.0.1:7350/ws?lang=en&status=true&token=abc").unwrap();
        assert_eq!(url.scheme, "ws");
        assert_eq!(url.host, "127.0.0.1");
        assert_eq!(url.port, Some(7350));
        assert_eq!(url.path_and_query, "ws?lang=en&status=true&token=abc");
        assert!(!url.is_secure());
    }

    #[test]
    fn test_default_ports() {
        let url = UrlParts::parse("WSS://example.com/ws").unwrap();
        assert_eq!(url.scheme, "wss");
        assert_eq!(url.port, None);
        assert_eq!(url.port_or_default(), 443);
        assert_eq!(UrlParts::parse("ws://example.com").unwrap().port_or_default(), 80);
    }

    #[test]
    fn test_ipv6_literal() {
        let url = UrlParts::parse("ws://[::1]:9000/ws").unwrap();
        assert_eq!(url.host, "::1");
        assert_eq!(url.port, Some(9000));
        assert_eq!(url.host_header(), "[::1]:9000");
    }

    #[test]
    fn test_rejects_bad_ports() {
        assert!(matches!(
            UrlParts::parse("ws://host:0/ws"),
            Err(UrlError::InvalidPort(_))
        ));
        assert!(matches!(
            UrlParts::parse("ws://host:70000/ws"),
            Err(UrlError::InvalidPort(_))
        ));
        assert!(matches!(
            UrlParts::parse("ws://host:abc/ws"),
            Err(UrlError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_rejects_missing_parts() {
        assert!(matches!(
            UrlParts::parse("host:7350/ws"),
            Err(UrlError::MissingScheme(_))
        ));
        assert!(matches!(
            UrlParts::parse("ws://:7350/ws"),
            Err(UrlError::MissingHost(_))
        ));
    }

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode("abc-_.~XYZ09"), "abc-_.~XYZ09");
        assert_eq!(url_encode("a+b=c"), "a%2Bb%3Dc");
        assert_eq!(url_encode("tok en/é"), "tok%20en%2F%C3%A9");
    }
}
