//! Connection acceptance and request dispatch core for a long-running
//! HTTP(S) server.
//!
//! `friend_core` owns a listening socket, negotiates TLS where configured,
//! reads a complete HTTP request (header plus declared body) from each
//! connection, invokes a pluggable [`HttpHandler`], writes the response, and
//! tears the connection down — all while coordinating a bounded worker
//! pool, signal-driven shutdown, and a safety fallback that turns plaintext
//! requests hitting the TLS port into a redirect.
//!
//! The wire format of HTTP itself is out of scope: this crate understands
//! exactly one header (`Content-Length`) and one terminator (`\r\n\r\n`);
//! everything else is opaque bytes handed to the [`HttpHandler`] the
//! embedder supplies.
//!
//! # Feature flags
//!
//! | Feature | Description | Default? |
//! | --- | --- | :---: |
//! | `plugins` | Dynamic-library plugin registry (`libloading`) | ❌ |

/// Re-export `async_trait`, used by [`HttpHandler`] implementors.
pub use async_trait::async_trait;

pub mod acceptor;
pub mod conn;
pub mod config;
mod error;
pub mod fuse;
#[cfg(feature = "plugins")]
pub mod plugin;
pub mod protocol;
pub mod shutdown;
mod instance;
mod worker;

pub use self::acceptor::{Acceptor, Connection};
pub use self::config::FriendCoreConfig;
pub use self::error::{Error, Result};
pub use self::instance::{FriendCore, FriendCoreState};
#[cfg(feature = "plugins")]
pub use self::plugin::{LoadedLibrary, PluginRegistry};
pub use self::protocol::{ConnectionInfo, HttpHandler, HttpResponse, WriteDisposition};
pub use self::shutdown::Shutdown;

/// A list of things commonly imported together by an embedder wiring up a
/// [`FriendCore`] instance.
pub mod prelude {
    pub use crate::config::FriendCoreConfig;
    pub use crate::conn::{ClientAuth, Keycert, TlsConfig};
    pub use crate::instance::{FriendCore, FriendCoreState};
    pub use crate::protocol::{ConnectionInfo, HttpHandler, HttpResponse, WriteDisposition};
    #[cfg(feature = "plugins")]
    pub use crate::plugin::PluginRegistry;
    pub use crate::shutdown::Shutdown;
}
