//! Construction-time configuration. The core reads no environment variables
//! directly; configuration is injected at construction.

use crate::conn::{ClientAuth, Keycert, TlsConfig};

/// Default worker ceiling.
pub const DEFAULT_MAX_WORKERS: usize = 256;

/// Default fixed scratch-buffer size used by each Worker's read loop.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Configuration for one [`crate::FriendCore`] instance.
///
/// Built with [`FriendCoreConfig::builder`]; every setter takes `self` by
/// value and returns it, so configuration reads as a single chained
/// expression.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct FriendCoreConfig {
    pub(crate) port: u16,
    pub(crate) tls: Option<TlsConfig>,
    pub(crate) max_workers: usize,
    pub(crate) read_buffer_size: usize,
    pub(crate) identifier: Option<String>,
}

impl Default for FriendCoreConfig {
    fn default() -> Self {
        Self {
            port: 0,
            tls: None,
            max_workers: DEFAULT_MAX_WORKERS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            identifier: None,
        }
    }
}

impl FriendCoreConfig {
    /// Starts a new configuration, listening on an ephemeral port with no
    /// TLS, 256 max workers, and an 8 KiB read buffer.
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    /// Sets the port to bind. `0` requests an OS-assigned ephemeral port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enables TLS with the given keycert (no client certificate
    /// authentication, no additional SNI names). Use
    /// [`with_tls_config`](Self::with_tls_config) for SNI or client-auth.
    #[must_use]
    pub fn tls(mut self, keycert: Keycert) -> Self {
        self.tls = Some(TlsConfig::new(keycert));
        self
    }

    /// Enables TLS with a fully assembled [`TlsConfig`] (SNI, client auth).
    #[must_use]
    pub fn with_tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Sets the client certificate authentication policy. Has no effect
    /// unless TLS has already been enabled via
    /// [`tls`](Self::tls)/[`with_tls_config`](Self::with_tls_config).
    #[must_use]
    pub fn client_auth(mut self, auth: ClientAuth) -> Self {
        if let Some(tls) = self.tls.take() {
            self.tls = Some(tls.with_client_auth(auth));
        }
        self
    }

    /// Sets the worker ceiling (default [`DEFAULT_MAX_WORKERS`]).
    #[must_use]
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Sets the fixed scratch-buffer size used by each Worker's read loop
    /// (default [`DEFAULT_READ_BUFFER_SIZE`]).
    #[must_use]
    pub fn read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }

    /// Sets an explicit instance identifier. If unset, one is derived at
    /// construction from a monotonically increasing counter, formatted as a
    /// 32-character zero-padded string.
    #[must_use]
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    #[must_use]
    pub(crate) fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_tls() {
        let config = FriendCoreConfig::builder();
        assert!(!config.is_tls());
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
    }

    #[test]
    fn tls_builder_enables_tls() {
        let config = FriendCoreConfig::builder().tls(Keycert::new());
        assert!(config.is_tls());
    }
}
