//! The crate's error type.

use std::io;

/// Errors produced while binding, configuring, or running a [`crate::FriendCore`]
/// instance.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Binding or listening on the configured port failed.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    /// The TLS configuration (keycert, trust anchor) could not be built into
    /// a working `TlsAcceptor`.
    #[error("invalid tls configuration: {0}")]
    Tls(#[source] io::Error),

    /// A per-connection I/O error (read, write, or handshake failure). These
    /// are not fatal to the instance; the Worker logs them and tears the
    /// connection down.
    #[error("connection i/o error: {0}")]
    Io(#[source] io::Error),

    /// Dynamic library plugin loading failed (feature `plugins`).
    #[cfg(feature = "plugins")]
    #[error("failed to load plugin {name:?}: {source}")]
    Plugin {
        /// The plugin name that failed to load.
        name: String,
        /// The underlying `libloading` error.
        #[source]
        source: libloading::Error,
    },
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Convenience alias for this crate's fallible operations.
pub type Result<T> = std::result::Result<T, Error>;
