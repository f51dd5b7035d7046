//! The IPv6 listening socket.
use std::io::Result as IoResult;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;

use super::SocketAddr;

/// Owns the bound, non-blocking listening socket.
///
/// Binds IPv6 with `IPV6_V6ONLY` left off where the platform allows it, so a
/// single listener accepts both IPv6 and v4-mapped peers; falls back to a
/// plain IPv6-only bind if the platform rejects that option.
#[derive(Debug)]
pub struct TcpListener {
    inner: tokio::net::TcpListener,
    local_addr: SocketAddr,
}

impl TcpListener {
    /// Binds to the given port on all interfaces. Panics on failure; use
    /// [`try_bind`](Self::try_bind) to handle bind errors.
    #[inline]
    pub async fn bind(port: u16) -> Self {
        Self::try_bind(port).await.expect("bind failed")
    }

    /// Attempts to bind an IPv6 listener on the given port.
    ///
    /// Binding or `listen()` failure here is fatal: the caller
    /// (`FriendCore::try_bind`) propagates the error and the instance never
    /// starts.
    pub async fn try_bind(port: u16) -> IoResult<Self> {
        let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
        // Best-effort dual-stack; some platforms refuse this and we keep going IPv6-only.
        let _ = socket.set_only_v6(false);
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        let addr = std::net::SocketAddr::new(std::net::Ipv6Addr::UNSPECIFIED.into(), port);
        socket.bind(&addr.into())?;
        socket.listen(1024)?;
        let inner = tokio::net::TcpListener::from_std(socket.into())?;
        let local_addr: SocketAddr = inner.local_addr()?.into();
        Ok(Self { inner, local_addr })
    }

    /// The address this listener is bound to.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts one connection. Transient refusal (`WouldBlock`) is handled by
    /// tokio's readiness wait internally; whatever `io::Error` this returns
    /// is an actual accept failure.
    #[inline]
    pub async fn accept(&self) -> IoResult<(TcpStream, SocketAddr)> {
        let (stream, remote_addr) = self.inner.accept().await?;
        Ok((stream, remote_addr.into()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;

    #[tokio::test]
    async fn accepts_a_connection() {
        let listener = TcpListener::bind(0).await;
        let addr = listener.local_addr().into_std();

        tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_i32(150).await.unwrap();
        });

        let (mut stream, _remote) = listener.accept().await.unwrap();
        assert_eq!(stream.read_i32().await.unwrap(), 150);
    }
}
