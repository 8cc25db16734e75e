//! Socket transport for streaming sessions.
//!
//! The session task only ever sees a [`Connector`] and the [`Socket`]s it
//! returns, so the state machine runs the same over a real WebSocket
//! ([`WsConnector`]) and over the in-memory [`MockConnector`] used in
//! tests.

pub mod mock;
mod socket;
pub mod websocket;

use async_trait::async_trait;

use crate::error::StreamError;
use crate::target::SessionTarget;

pub use mock::{MockConnector, MockServer};
pub use socket::{DEFAULT_QUEUE_DEPTH, Socket, SocketEvent};
pub use websocket::WsConnector;

/// Opens one socket for a target.
///
/// Returning `Ok` means the transport is open ("socket open"); nothing
/// has been sent yet.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &SessionTarget) -> Result<Socket, StreamError>;
}
