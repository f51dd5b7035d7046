//! Reads a complete request off an accepted [`Connection`], dispatches it to
//! the [`HttpHandler`], writes the response, and tears the connection down.
//!
//! A tokio task is spawned per connection and self-joins the same way an
//! OS thread would: it simply ends when [`run`] returns, dropping the held
//! [`tokio::sync::OwnedSemaphorePermit`] and releasing the connection's slot
//! in the worker ceiling.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};

use crate::acceptor::Connection;
use crate::fuse::FuseEvent;
use crate::protocol::{HttpHandler, WriteDisposition};

/// Initial capacity of the request buffer. Sized generously so that typical
/// requests never need to reallocate.
const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;

/// Upper bound on retrying a stalled read once a `Content-Length` target is
/// known but not yet satisfied.
const MAX_STALL_RETRIES: u32 = 500;

/// Per-attempt timeout applied to retry #1.
const STALL_TIMEOUT_FIRST: Duration = Duration::from_millis(100);
/// Per-attempt timeout applied to retry #2 and beyond.
const STALL_TIMEOUT_REST: Duration = Duration::from_millis(250);

/// Spawns a task that services `conn` to completion: reads a full request,
/// dispatches it to `handler`, writes the response, and tears the
/// connection down. `permit` is held for the task's lifetime and dropped on
/// every exit path, releasing the connection's worker slot. `read_buffer_size`
/// sizes the scratch buffer each read lands in.
pub(crate) fn spawn(
    conn: Connection,
    handler: std::sync::Arc<dyn HttpHandler>,
    permit: OwnedSemaphorePermit,
    read_buffer_size: usize,
) {
    tokio::spawn(async move {
        run(conn, handler, read_buffer_size).await;
        drop(permit);
    });
}

async fn run(mut conn: Connection, handler: std::sync::Arc<dyn HttpHandler>, read_buffer_size: usize) {
    let remote_addr = conn.info.remote_addr;
    if let Some(fuse) = &conn.fuse {
        fuse.event(FuseEvent::WaitFrame);
    }

    let request = match read_request(&mut conn, read_buffer_size).await {
        Ok(buf) => buf,
        Err(err) => {
            // A read error behaves like "no more data"; whatever was
            // accumulated (nothing, here, since the error surfaced before
            // any successful read) is simply dropped.
            debug!(error = %err, %remote_addr, "request read failed");
            return;
        }
    };

    if let Some(fuse) = &conn.fuse {
        fuse.event(FuseEvent::RecvFrame);
    }

    if request.is_empty() {
        // No request ever arrived: close without invoking the handler.
        return;
    }

    let response = handler.handle(&conn.info, &request).await;

    match response {
        Some(resp) if resp.disposition == WriteDisposition::WriteAndFree => {
            if let Err(err) = conn.stream.write_all(&resp.bytes).await {
                warn!(error = %err, %remote_addr, "failed to write response");
            } else if let Some(fuse) = &conn.fuse {
                fuse.event(FuseEvent::WriteData(resp.bytes.len()));
            }
        }
        Some(_) | None => {
            // FREE_ONLY, or no response at all: close without writing.
        }
    }

    let _ = conn.stream.shutdown().await;
}

/// Reads a complete request (header plus any declared body) from `conn`,
/// using a fixed-size scratch buffer of `read_buffer_size` bytes for each
/// individual read.
async fn read_request(conn: &mut Connection, read_buffer_size: usize) -> std::io::Result<Vec<u8>> {
    let mut request = Vec::with_capacity(INITIAL_BUFFER_CAPACITY);
    let mut scratch = vec![0_u8; read_buffer_size];
    let mut expected_length: Option<usize> = None;
    let mut retries = 0_u32;

    loop {
        let n = conn.stream.read(&mut scratch).await?;
        if n > 0 {
            request.extend_from_slice(&scratch[..n]);
            if let Some(fuse) = &conn.fuse {
                fuse.event(FuseEvent::ReadData(n));
            }
        }

        if expected_length.is_none() {
            if let Some(header_len) = find_header_end(&request) {
                expected_length = Some(header_len + content_length(&request[..header_len]).unwrap_or(0));
            }
        }

        match expected_length {
            Some(expected) if expected > 0 => {
                if request.len() >= expected {
                    return Ok(request);
                }
                if n == 0 {
                    retries += 1;
                    if retries > MAX_STALL_RETRIES {
                        return Ok(request);
                    }
                    let timeout = if retries == 1 {
                        STALL_TIMEOUT_FIRST
                    } else {
                        STALL_TIMEOUT_REST
                    };
                    sleep(timeout).await;
                }
            }
            Some(_) => {
                // expected_length == 0: header seen, no Content-Length. The
                // read that delivered the terminator is itself treated as
                // the end of the request — a header-only request dispatches
                // immediately rather than waiting for the peer to close the
                // connection.
                return Ok(request);
            }
            None => {
                if n == 0 {
                    // No terminator ever seen and the peer is gone: dispatch
                    // whatever was accumulated.
                    return Ok(request);
                }
            }
        }
    }
}

/// Scans for `\r\n\r\n` and returns the header length (position + 4) when
/// found.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Case-insensitively finds `Content-Length:` within the header bytes and
/// parses the signed 64-bit integer following the colon-space.
fn content_length(header: &[u8]) -> Option<usize> {
    const NAME: &[u8] = b"content-length:";
    let lower: Vec<u8> = header.iter().map(u8::to_ascii_lowercase).collect();
    let pos = lower
        .windows(NAME.len())
        .position(|w| w == NAME)?;
    let rest = &header[pos + NAME.len()..];
    let line_end = rest.iter().position(|&b| b == b'\r' || b == b'\n').unwrap_or(rest.len());
    let value = std::str::from_utf8(&rest[..line_end]).ok()?.trim();
    let parsed: i64 = value.parse().ok()?;
    usize::try_from(parsed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_header_terminator() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(find_header_end(buf), Some(buf.len()));
    }

    #[test]
    fn missing_terminator_is_none() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n";
        assert_eq!(find_header_end(buf), None);
    }

    #[test]
    fn parses_content_length_case_insensitively() {
        let header = b"POST / HTTP/1.1\r\ncontent-LENGTH: 11\r\n\r\n";
        assert_eq!(content_length(header), Some(11));
    }

    #[test]
    fn absent_content_length_is_none() {
        let header = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(content_length(header), None);
    }

    #[test]
    fn negative_content_length_is_rejected() {
        let header = b"POST / HTTP/1.1\r\ncontent-length: -1\r\n\r\n";
        assert_eq!(content_length(header), None);
    }
}
