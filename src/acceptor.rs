//! Drains the listener, decides plaintext-vs-TLS, and drives the TLS
//! handshake.
//!
//! Every accepted socket gets its own spawned task: the handshake `.await`s
//! rather than being stepped by hand, so it yields to the runtime instead of
//! returning `WouldBlock`. A plaintext request arriving on the TLS port is
//! detected *before* a handshake is even attempted (see
//! [`looks_like_plaintext_http`]), so the handshake path itself never has to
//! distinguish a real `ClientHello` from a stray HTTP request.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::conn::SocketAddr;
use crate::fuse::{ArcFuseFactory, ArcFusewire, FuseInfo};
use crate::protocol::{ConnectionInfo, HttpHandler, find_host_header, redirect_response};

/// The HTTP verbs recognized by the peek-based plaintext detector. Any of
/// these marks the connection as a plaintext request arriving on the TLS
/// port rather than an attempted TLS handshake.
const PLAINTEXT_PREFIXES: &[&[u8]] = &[
    b"GET ", b"POST ", b"HEAD ", b"PUT ", b"DELETE ", b"OPTIONS ", b"CONNECT ", b"TRACE ",
    b"PATCH ",
];

/// The transport stream backing a [`Connection`]: either a bare TCP socket
/// (no TLS configured) or a completed TLS session.
#[derive(Debug)]
pub enum Stream {
    /// A plain TCP connection.
    Plain(TcpStream),
    /// A connection that has completed its TLS handshake.
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A connection ready to be handed to a Worker: the single owner of its
/// socket and, where present, its TLS session. Transferred by value from the
/// Acceptor to the Worker; there is never more than one owner at a time.
pub struct Connection {
    /// The underlying transport.
    pub stream: Stream,
    /// Metadata handed to the [`HttpHandler`] alongside the request bytes.
    pub info: ConnectionInfo,
    /// Slow-client protection for this connection, if a [`ArcFuseFactory`]
    /// was configured on the [`Acceptor`].
    pub fuse: Option<ArcFusewire>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("stream", &self.stream)
            .field("info", &self.info)
            .field("fuse", &self.fuse.is_some())
            .finish()
    }
}

/// The outcome of processing one accepted socket.
enum Outcome {
    /// Handshake (or plain accept) succeeded; ready for a Worker.
    Ready(Connection),
    /// A plaintext request hit the TLS port; the redirect was already
    /// written and the socket closed. No `Connection` is created.
    Redirected,
    /// The socket was closed without producing a `Connection` (handshake
    /// failure, peek failure, or shutdown mid-handshake).
    Rejected,
}

/// Drains the listener and turns accepted sockets into [`Connection`]s.
pub struct Acceptor {
    listener: crate::conn::TcpListener,
    tls: Option<TlsAcceptor>,
    shutdown: CancellationToken,
    worker_permits: std::sync::Arc<Semaphore>,
    fuse_factory: Option<ArcFuseFactory>,
    read_buffer_size: usize,
}

impl Acceptor {
    /// Creates an acceptor over `listener`. `tls` is `None` for a
    /// plaintext-only instance; TLS mode does not change for the lifetime of
    /// the acceptor. `fuse_factory` is optional slow-client protection
    /// layered on top of the Worker's own retry bound. `read_buffer_size` is
    /// handed to every spawned Worker's read loop.
    #[must_use]
    pub fn new(
        listener: crate::conn::TcpListener,
        tls: Option<TlsAcceptor>,
        shutdown: CancellationToken,
        worker_permits: std::sync::Arc<Semaphore>,
        fuse_factory: Option<ArcFuseFactory>,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            listener,
            tls,
            shutdown,
            worker_permits,
            fuse_factory,
            read_buffer_size,
        }
    }

    /// Runs the accept loop until shutdown is requested.
    pub async fn run(self: std::sync::Arc<Self>, handler: std::sync::Arc<dyn HttpHandler>) {
        loop {
            let accepted = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                res = self.listener.accept() => res,
            };
            let (stream, remote_addr) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    // Accept-time hard failure: log and keep draining; the
                    // listener itself remains usable.
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            let this = std::sync::Arc::clone(&self);
            let handler = std::sync::Arc::clone(&handler);
            tokio::spawn(async move {
                this.accept_one(stream, remote_addr, handler).await;
            });
        }
    }

    async fn accept_one(
        &self,
        stream: TcpStream,
        remote_addr: SocketAddr,
        handler: std::sync::Arc<dyn HttpHandler>,
    ) {
        let local_addr = self.listener.local_addr();
        match self.handshake(stream, remote_addr, local_addr).await {
            Outcome::Ready(conn) => {
                // The worker ceiling is a tunable cap; fresh accepts block
                // here rather than being rejected. This only blocks the
                // per-connection task, never the accept loop itself.
                let permit = match std::sync::Arc::clone(&self.worker_permits)
                    .acquire_owned()
                    .await
                {
                    Ok(permit) => permit,
                    Err(_) => return, // semaphore closed: instance is shutting down
                };
                crate::worker::spawn(conn, handler, permit, self.read_buffer_size);
            }
            Outcome::Redirected | Outcome::Rejected => {}
        }
    }

    async fn handshake(
        &self,
        stream: TcpStream,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Outcome {
        let Some(tls) = &self.tls else {
            return Outcome::Ready(Connection {
                stream: Stream::Plain(stream),
                info: ConnectionInfo {
                    remote_addr,
                    local_addr,
                    tls: false,
                },
                fuse: self.make_fusewire(remote_addr, local_addr),
            });
        };

        match looks_like_plaintext_http(&stream).await {
            Ok(true) => {
                self.redirect(stream).await;
                Outcome::Redirected
            }
            Ok(false) => {
                let fuse = self.make_fusewire(remote_addr, local_addr);
                if let Some(fuse) = &fuse {
                    fuse.event(crate::fuse::FuseEvent::TlsHandshaking);
                }
                let fused = fuse.clone();
                let handshake = tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => return Outcome::Rejected,
                    () = async { if let Some(f) = &fused { f.fused().await } else { std::future::pending().await } } => return Outcome::Rejected,
                    res = tls.accept(stream) => res,
                };
                match handshake {
                    Ok(tls_stream) => {
                        if let Some(fuse) = &fuse {
                            fuse.event(crate::fuse::FuseEvent::TlsHandshaked);
                        }
                        Outcome::Ready(Connection {
                            stream: Stream::Tls(Box::new(tls_stream)),
                            info: ConnectionInfo {
                                remote_addr,
                                local_addr,
                                tls: true,
                            },
                            fuse,
                        })
                    }
                    Err(err) => {
                        debug!(error = %err, %remote_addr, "tls handshake failed");
                        Outcome::Rejected
                    }
                }
            }
            Err(err) => {
                debug!(error = %err, %remote_addr, "peek before handshake failed");
                Outcome::Rejected
            }
        }
    }

    fn make_fusewire(&self, remote_addr: SocketAddr, local_addr: SocketAddr) -> Option<ArcFusewire> {
        self.fuse_factory.as_ref().map(|factory| {
            factory.create(FuseInfo {
                remote_addr,
                local_addr,
            })
        })
    }

    /// The plaintext-on-TLS redirect. Reads up to one buffer of the
    /// plaintext request, locates `Host:`, and writes the `307` directly
    /// over the raw TCP stream — no TLS is ever attempted.
    async fn redirect(&self, mut stream: TcpStream) {
        let mut buf = vec![0_u8; 8192];
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(err) => {
                debug!(error = %err, "failed to read plaintext request for redirect");
                return;
            }
        };
        buf.truncate(n);
        let host = find_host_header(&buf).unwrap_or("localhost");
        let response = redirect_response(host);
        if let Err(err) = stream.write_all(&response).await {
            debug!(error = %err, "failed to write plaintext-on-tls redirect");
        }
        let _ = stream.shutdown().await;
    }
}

/// Peeks the socket for one of the recognized HTTP request-line verbs
/// without consuming any bytes, so a real TLS `ClientHello` is left intact
/// for the handshake that follows when this returns `false`.
async fn looks_like_plaintext_http(stream: &TcpStream) -> io::Result<bool> {
    let mut buf = [0_u8; 16];
    let n = stream.peek(&mut buf).await?;
    Ok(PLAINTEXT_PREFIXES.iter().any(|prefix| buf[..n].starts_with(prefix)))
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    #[tokio::test]
    async fn recognizes_plaintext_get() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        });
        let (server, _) = listener.accept().await.unwrap();
        assert!(looks_like_plaintext_http(&server).await.unwrap());
    }

    #[tokio::test]
    async fn does_not_misdetect_a_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            // First bytes of a TLS record header, not an HTTP verb.
            stream.write_all(&[0x16, 0x03, 0x01, 0x00, 0xa5]).await.unwrap();
        });
        let (server, _) = listener.accept().await.unwrap();
        assert!(!looks_like_plaintext_http(&server).await.unwrap());
    }
}
