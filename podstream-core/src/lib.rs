//! # podstream-core
//!
//! Streaming session manager for pod log tailing and interactive
//! terminals over a WebSocket.
//!
//! This crate contains:
//! - **Codec**: `FrameCodec` mapping `Output`/`Input`/`Resize`/`ControlClose` frames to socket messages
//! - **State**: the `SessionState` machine and the observable `SessionStatus`
//! - **Reconnect**: `ReconnectPolicy` with capped exponential backoff and jitter
//! - **Token**: `SessionTokenSource` and the static, environment and cached sources
//! - **Network**: the `Connector` seam, the WebSocket transport and an in-memory mock
//! - **Session**: `SessionManager`, the per-session task and its output buffer
//! - **Error**: `StreamError`, a typed `thiserror`-based error hierarchy

pub mod codec;
pub mod error;
pub mod network;
pub mod reconnect;
pub mod session;
pub mod state;
pub mod target;
pub mod token;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{ABNORMAL_CLOSURE, Frame, FrameCodec, MAX_FRAME_SIZE, NORMAL_CLOSURE, WireMessage};
pub use error::{AuthError, DecodeError, FailureKind, SessionFailure, StreamError};
pub use network::{Connector, MockConnector, MockServer, Socket, SocketEvent, WsConnector};
pub use reconnect::{ReconnectAttemptCounter, ReconnectConfig, ReconnectDecision, ReconnectPolicy};
pub use session::{BufferPolicy, OutputBuffer, OutputChunk, SessionManager, SessionOptions};
pub use state::{SessionState, SessionStatus};
pub use target::{SessionMode, SessionTarget};
pub use token::{
    CachedTokenSource, DEFAULT_TOKEN_TTL, EnvTokenSource, SessionTokenSource, StaticTokenSource,
    TokenRefresher,
};
