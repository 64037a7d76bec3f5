//! Remote render workers for parbrick: JSON-lines protocol over TCP
//!
//! Expose a renderer on a render node:
//! ```ignore
//! let handler = Arc::new(Mutex::new(MyHandler::new()));
//! let server = RenderServer::start(handler, "0.0.0.0:31050").await?;
//! ```
//! and drive it from the compositing node with a [`RemoteClient`].

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::RemoteClient;
pub use error::RemoteError;
pub use protocol::*;
pub use server::{RenderHandler, RenderServer};

/// Default render server port
pub const DEFAULT_PORT: u16 = 31050;
