//! Protecting the server from slow HTTP attacks.

pub mod flex;
use std::sync::Arc;

use async_trait::async_trait;
pub use flex::{FlexFactory, FlexFusewire};

use crate::conn::SocketAddr;

/// A fuse event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuseEvent {
    /// Tls handshaking.
    TlsHandshaking,
    /// Tls handshaked.
    TlsHandshaked,
    /// Alive.
    Alive,
    /// ReadData.
    ReadData(usize),
    /// WriteData.
    WriteData(usize),
    /// WaitFrame.
    WaitFrame,
    /// RecvFrame.
    RecvFrame,
}

/// A thread-safe, shared fuse factory.
pub type ArcFuseFactory = Arc<dyn FuseFactory + Sync + Send + 'static>;
/// A thread-safe, shared fusewire.
pub type ArcFusewire = Arc<dyn Fusewire + Sync + Send + 'static>;

/// Connection metadata handed to a fuse factory.
#[derive(Clone, Debug)]
pub struct FuseInfo {
    /// The remote address of the connecting client.
    pub remote_addr: SocketAddr,
    /// The local address the connection was accepted on.
    pub local_addr: SocketAddr,
}

/// A fuse factory.
pub trait FuseFactory {
    /// Create a new fusewire.
    fn create(&self, info: FuseInfo) -> ArcFusewire;
}

/// A fusewire.
#[async_trait]
pub trait Fusewire {
    /// Recive a event report.
    fn event(&self, event: FuseEvent);
    /// Check if the fusewire is fused.
    async fn fused(&self);
}

impl<T, F> FuseFactory for T
where
    T: Fn(FuseInfo) -> F,
    F: Fusewire + Sync + Send + 'static,
{
    fn create(&self, info: FuseInfo) -> ArcFusewire {
        Arc::new((*self)(info))
    }
}
