//! The HTTP protocol handler ABI consumed by the Worker.
//!
//! FriendCore never parses a request body or most of a request's headers; it
//! treats HTTP as opaque bytes with exactly one header it understands
//! (`Content-Length`) and hands the rest to a [`HttpHandler`] implementation
//! supplied by the embedder.

use async_trait::async_trait;

use crate::conn::SocketAddr;

/// Per-connection metadata handed to the [`HttpHandler`] alongside the
/// request bytes.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ConnectionInfo {
    /// The client's address.
    pub remote_addr: SocketAddr,
    /// The address this connection was accepted on.
    pub local_addr: SocketAddr,
    /// Whether this connection is running over TLS.
    pub tls: bool,
}

/// What the Worker does with a [`HttpResponse`] after the handler returns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Discard the response without writing it to the connection.
    FreeOnly,
    /// Write the response bytes to the connection, then tear it down.
    WriteAndFree,
}

/// A response produced by a [`HttpHandler`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct HttpResponse {
    /// The raw bytes to write to the connection, including status line and
    /// headers. Ignored when `disposition` is [`WriteDisposition::FreeOnly`].
    pub bytes: Vec<u8>,
    /// What the Worker should do with `bytes`.
    pub disposition: WriteDisposition,
}

impl HttpResponse {
    /// A response that is written to the connection before teardown.
    #[must_use]
    pub fn write_and_free(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            disposition: WriteDisposition::WriteAndFree,
        }
    }

    /// A response that is discarded; the connection is torn down without
    /// writing anything.
    #[must_use]
    pub fn free_only() -> Self {
        Self {
            bytes: Vec::new(),
            disposition: WriteDisposition::FreeOnly,
        }
    }
}

/// The pluggable HTTP protocol handler.
///
/// The core treats this trait's implementation as total: it is always
/// expected to resolve to either `Some(response)` or `None`, never to panic.
/// A `None` return closes the connection without writing anything.
#[async_trait]
pub trait HttpHandler: Send + Sync + 'static {
    /// Handles one complete request (header plus declared body, per
    /// `Content-Length`) and produces a response, if any.
    async fn handle(&self, conn: &ConnectionInfo, buf: &[u8]) -> Option<HttpResponse>;
}

#[async_trait]
impl<F, Fut> HttpHandler for F
where
    F: Fn(ConnectionInfo, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Option<HttpResponse>> + Send + 'static,
{
    async fn handle(&self, conn: &ConnectionInfo, buf: &[u8]) -> Option<HttpResponse> {
        (self)(conn.clone(), buf.to_vec()).await
    }
}

/// The body of the plaintext-on-TLS redirect.
pub const REDIRECT_BODY: &str = "<html>please change to https!</html>";

/// Builds the `307 Temporary Redirect` response sent when a plaintext HTTP
/// request lands on the TLS port. `host` is taken from the request's
/// `Host:` header.
#[must_use]
pub fn redirect_response(host: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 307 Temporary Redirect\r\n\
         Location: https://{host}/webclient/index.html\r\n\
         Connection: close\r\n\
         \r\n\
         {REDIRECT_BODY}"
    )
    .into_bytes()
}

/// Extracts the value of the `Host:` header (case-insensitive) from a raw
/// request buffer, if present. Used only by the plaintext-on-TLS redirect
/// path, which never engages the main header scan in [`crate::worker`].
#[must_use]
pub fn find_host_header(buf: &[u8]) -> Option<&str> {
    for line in buf.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.len() < 6 {
            continue;
        }
        if line[..5].eq_ignore_ascii_case(b"host:") {
            let value = std::str::from_utf8(&line[5..]).ok()?.trim();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_exact_redirect_body() {
        let resp = redirect_response("example.com");
        let text = String::from_utf8(resp).unwrap();
        assert_eq!(
            text,
            "HTTP/1.1 307 Temporary Redirect\r\n\
             Location: https://example.com/webclient/index.html\r\n\
             Connection: close\r\n\
             \r\n\
             <html>please change to https!</html>"
        );
    }

    #[test]
    fn finds_host_header_case_insensitively() {
        let req = b"GET / HTTP/1.1\r\nHOST: example.com\r\n\r\n";
        assert_eq!(find_host_header(req), Some("example.com"));
    }

    #[test]
    fn missing_host_header_returns_none() {
        let req = b"GET / HTTP/1.1\r\n\r\n";
        assert_eq!(find_host_header(req), None);
    }
}
