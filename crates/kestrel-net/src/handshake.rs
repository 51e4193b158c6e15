//! HTTP/1.1 upgrade handshake for WebSocket connections (RFC 6455 §4).
//!
//! The client sends a `GET` with a random `Sec-WebSocket-Key`; the server
//! must answer `101` with `Sec-WebSocket-Accept` set to
//! `base64(SHA1(key + GUID))`. Bytes that arrive after the blank line ending
//! the response already belong to the frame stream.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::url::UrlParts;

/// Fixed GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the response header block.
pub const MAX_RESPONSE_HEADER: usize = 16 * 1024;

/// Ways the server's upgrade response can be unacceptable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    /// No header terminator within [`MAX_RESPONSE_HEADER`] bytes.
    #[error("response header exceeds {MAX_RESPONSE_HEADER} bytes")]
    ResponseTooLarge,

    /// The status line could not be parsed.
    #[error("malformed status line {0:?}")]
    MalformedStatusLine(String),

    /// The server answered with something other than `101`.
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    /// No `Sec-WebSocket-Accept` header.
    #[error("missing Sec-WebSocket-Accept header")]
    MissingAcceptKey,

    /// The accept key did not match the one derived from our key.
    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual}")]
    AcceptKeyMismatch {
        /// Value derived from the client key.
        expected: String,
        /// Value the server sent.
        actual: String,
    },
}

/// Random 16-byte nonce, base64 encoded.
pub fn generate_client_key() -> String {
    let nonce: [u8; 16] = rand::random();
    STANDARD.encode(nonce)
}

/// The accept value a conforming server derives from `client_key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// The upgrade request for `url`.
pub fn build_upgrade_request(url: &UrlParts, client_key: &str) -> String {
    format!(
        "GET /{path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: {client_key}\r\n\
         \r\n",
        path = url.path_and_query,
        host = url.host_header(),
    )
}

/// Inspect the bytes received so far.
///
/// Returns `Ok(None)` while the header block is incomplete, and
/// `Ok(Some(len))` once a valid response has been seen, where `len` is the
/// header length; anything in `buf[len..]` is frame data.
pub fn parse_upgrade_response(buf: &[u8], client_key: &str) -> Result<Option<usize>, HandshakeError> {
    let Some(end) = find_header_end(buf) else {
        if buf.len() > MAX_RESPONSE_HEADER {
            return Err(HandshakeError::ResponseTooLarge);
        }
        return Ok(None);
    };

    let header = String::from_utf8_lossy(&buf[..end]);
    let mut lines = header.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = parse_status(status_line)?;
    if status != 101 {
        return Err(HandshakeError::UnexpectedStatus(status));
    }

    let actual = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("sec-websocket-accept"))
        .map(|(_, value)| value.trim().to_string())
        .ok_or(HandshakeError::MissingAcceptKey)?;

    let expected = accept_key(client_key);
    if actual != expected {
        return Err(HandshakeError::AcceptKeyMismatch { expected, actual });
    }

    Ok(Some(end + 4))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status(line: &str) -> Result<u16, HandshakeError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| HandshakeError::MalformedStatusLine(line.to_string())),
        _ => Err(HandshakeError::MalformedStatusLine(line.to_string())),
    }
}
