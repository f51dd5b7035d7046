//! The `FriendCore` instance itself — the composition root tying the
//! listener, TLS context, acceptor, worker pool, shutdown controller, and
//! plugin registry together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::info;

use crate::acceptor::Acceptor;
use crate::config::FriendCoreConfig;
use crate::conn::TcpListener;
use crate::error::{Error, Result};
use crate::fuse::ArcFuseFactory;
#[cfg(feature = "plugins")]
use crate::plugin::PluginRegistry;
use crate::protocol::HttpHandler;
use crate::shutdown::Shutdown;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// The instance's lifecycle state. Only `Draining` and `Closed` ever observe
/// shutdown having been requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FriendCoreState {
    /// Constructed but [`FriendCore::run`] has not yet been called.
    Initializing,
    /// Accepting and servicing connections.
    Running,
    /// Shutdown has been requested; draining outstanding workers.
    Draining,
    /// Fully torn down; safe to drop.
    Closed,
}

/// Formats `id` as a 32-character zero-padded identifier.
fn format_identifier(id: u64) -> String {
    format!("{id:0>32}")
}

/// A running (or not-yet-started) FriendCore connection core.
///
/// Binds one IPv6 listener, optionally negotiates TLS, and dispatches
/// complete HTTP requests to a caller-supplied [`HttpHandler`]. Construction
/// never starts accepting connections; call [`run`](Self::run) for that.
pub struct FriendCore {
    identifier: String,
    listener: Mutex<Option<TcpListener>>,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    max_workers: usize,
    read_buffer_size: usize,
    worker_permits: Arc<Semaphore>,
    shutdown: Shutdown,
    #[cfg(feature = "plugins")]
    plugins: PluginRegistry,
    state: Mutex<FriendCoreState>,
    fuse_factory: Option<ArcFuseFactory>,
}

impl std::fmt::Debug for FriendCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FriendCore")
            .field("identifier", &self.identifier)
            .field("tls", &self.tls_acceptor.is_some())
            .field("max_workers", &self.max_workers)
            .field("state", &self.state())
            .finish()
    }
}

impl FriendCore {
    /// Binds the configured listener and, if TLS is configured, builds the
    /// TLS acceptor. Bind/listen failure here is fatal; the error propagates
    /// to the caller and no instance is produced.
    pub async fn try_bind(config: FriendCoreConfig) -> Result<Self> {
        let listener = TcpListener::try_bind(config.port).await.map_err(Error::Bind)?;
        let tls_acceptor = config
            .tls
            .as_ref()
            .map(crate::conn::TlsConfig::build_acceptor)
            .transpose()
            .map_err(Error::Tls)?;

        let identifier = config
            .identifier
            .unwrap_or_else(|| format_identifier(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)));

        info!(
            identifier,
            port = listener.local_addr().port(),
            tls = tls_acceptor.is_some(),
            "friend core bound"
        );

        Ok(Self {
            identifier,
            listener: Mutex::new(Some(listener)),
            tls_acceptor,
            max_workers: config.max_workers,
            read_buffer_size: config.read_buffer_size,
            worker_permits: Arc::new(Semaphore::new(config.max_workers)),
            shutdown: Shutdown::new(),
            #[cfg(feature = "plugins")]
            plugins: PluginRegistry::new(),
            state: Mutex::new(FriendCoreState::Initializing),
            fuse_factory: None,
        })
    }

    /// Attaches slow-client protection: an additional, optional layer on top
    /// of the Worker's own retry bound. Has no effect once
    /// [`run`](Self::run) has started.
    #[must_use]
    pub fn with_fuse_factory(mut self, factory: ArcFuseFactory) -> Self {
        self.fuse_factory = Some(factory);
        self
    }

    /// The 32-character zero-padded instance identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FriendCoreState {
        *self.state.lock().expect("state mutex poisoned")
    }

    /// The plugin registry, if the `plugins` feature is enabled.
    #[cfg(feature = "plugins")]
    #[must_use]
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// A token for requesting shutdown from outside the instance (in
    /// addition to the `SIGINT`/`SIGTERM` handler installed by
    /// [`run`](Self::run)).
    #[must_use]
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Accepts connections and dispatches requests to `handler` until
    /// shutdown is requested, then drains outstanding workers and tears
    /// everything down.
    ///
    /// Consumes the listener; calling this twice on the same instance
    /// returns an error rather than panicking.
    pub async fn run(self: Arc<Self>, handler: Arc<dyn HttpHandler>) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .expect("listener mutex poisoned")
            .take()
            .ok_or_else(|| Error::Bind(std::io::Error::other("friend core already run")))?;

        *self.state.lock().expect("state mutex poisoned") = FriendCoreState::Running;
        self.shutdown.spawn_signal_listener();

        let acceptor = Arc::new(Acceptor::new(
            listener,
            self.tls_acceptor.clone(),
            self.shutdown.token(),
            Arc::clone(&self.worker_permits),
            self.fuse_factory.clone(),
            self.read_buffer_size,
        ));
        let accept_loop = tokio::spawn(acceptor.run(handler));

        self.shutdown.token().cancelled().await;
        *self.state.lock().expect("state mutex poisoned") = FriendCoreState::Draining;

        // Bounded wait for outstanding workers, then proceed regardless.
        self.shutdown
            .drain_workers(&self.worker_permits, self.max_workers as u32)
            .await;

        // The accept loop observed the same token and already exited its
        // `select!`; this just joins it.
        let _ = accept_loop.await;

        #[cfg(feature = "plugins")]
        self.plugins.close_all();

        *self.state.lock().expect("state mutex poisoned") = FriendCoreState::Closed;
        info!(identifier = %self.identifier, "friend core closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_32_chars_zero_padded() {
        assert_eq!(format_identifier(7).len(), 32);
        assert!(format_identifier(7).ends_with('7'));
        assert_eq!(format_identifier(7), "0".repeat(31) + "7");
    }

    #[tokio::test]
    async fn try_bind_succeeds_on_an_ephemeral_port() {
        let core = FriendCore::try_bind(FriendCoreConfig::builder().port(0))
            .await
            .unwrap();
        assert_eq!(core.state(), FriendCoreState::Initializing);
    }
}
