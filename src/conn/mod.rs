//! Listening socket, peer address, and TLS plumbing.
//!
//! This module owns the [`TcpListener`] and the [`tls::TlsConfig`] / TLS
//! acceptor factory. The Acceptor that drains the listener and drives TLS
//! handshakes lives one level up in [`crate::acceptor`] since it also needs
//! the worker pool and shutdown token.

mod addr;
pub use addr::SocketAddr;

mod tcp;
pub use tcp::TcpListener;

pub mod tls;
pub use tls::{ClientAuth, Keycert, TlsConfig};
