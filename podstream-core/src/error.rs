//! Domain-specific error types for streaming sessions.
//!
//! All fallible operations return `Result<T, StreamError>`.
//! Every failure is scoped to the session that produced it; nothing here
//! is allowed to take down the host process.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::SessionState;

/// The canonical error type for streaming sessions.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Caller Misuse ────────────────────────────────────────────
    /// `send`/`resize` was called while the session is not streaming.
    #[error("session is not streaming (state: {0})")]
    NotStreaming(SessionState),

    /// `open` was called on a session that has already left `Idle`.
    #[error("session already opened (state: {0})")]
    AlreadyOpened(SessionState),

    /// The frame kind is not allowed for the session mode.
    #[error("{frame} frames are not supported in {mode} mode")]
    UnsupportedFrame {
        frame: &'static str,
        mode: &'static str,
    },

    /// A state machine transition was requested from the wrong state.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    // ── Authentication ───────────────────────────────────────────
    /// The token source failed or the server rejected the handshake.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    // ── Transient Network ────────────────────────────────────────
    /// The transport could not establish a socket.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The transport reported an error on a live socket.
    #[error("transport error: {0}")]
    Transport(String),

    /// The socket closed with a non-normal close code.
    #[error("connection closed unexpectedly (code {code}): {reason}")]
    UnexpectedClose { code: u16, reason: String },

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Terminal ─────────────────────────────────────────────────
    /// The reconnection policy refused another attempt.
    #[error("reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    // ── Protocol ─────────────────────────────────────────────────
    /// A single inbound or outbound frame could not be translated.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    // ── Configuration ────────────────────────────────────────────
    /// The server base URL or endpoint could not be built.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    // ── Internal ─────────────────────────────────────────────────
    /// The session task or a socket task went away.
    #[error("channel closed")]
    ChannelClosed,
}

impl StreamError {
    /// Errors that must never be retried automatically.
    pub fn is_terminal_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Errors the reconnection policy is allowed to recover from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::Transport(_)
                | Self::UnexpectedClose { .. }
                | Self::Timeout(_)
                | Self::ChannelClosed
        )
    }
}

// ── AuthError ────────────────────────────────────────────────────

/// Failures of the bearer-token handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The token source has no token to hand out.
    #[error("no session token available")]
    Missing,

    /// The token source tried to refresh and failed.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The server closed the socket instead of accepting the token.
    #[error("server rejected the session token (code {code}): {reason}")]
    Rejected { code: u16, reason: String },
}

// ── DecodeError ──────────────────────────────────────────────────

/// A single frame that could not be mapped to or from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A log chunk arrived as bytes that are not valid UTF-8.
    #[error("log chunk is not valid utf-8")]
    InvalidUtf8,

    /// The payload exceeds the configured frame limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A control message could not be serialized.
    #[error("control message encoding failed: {0}")]
    Control(String),
}

// ── SessionFailure ───────────────────────────────────────────────

/// Category of a caller-visible failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The user must sign in again.
    Reauthenticate,
    /// The reconnection budget ran out.
    ReconnectExhausted,
    /// A network error that was recorded while reconnecting.
    Network,
}

/// Cloneable snapshot of the last error, kept in the session status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Reconnect attempts made when the failure was recorded.
    pub attempts: u32,
}

impl SessionFailure {
    pub fn from_error(err: &StreamError, attempts: u32) -> Self {
        let kind = match err {
            StreamError::Auth(_) => FailureKind::Reauthenticate,
            StreamError::ReconnectExhausted { .. } => FailureKind::ReconnectExhausted,
            _ => FailureKind::Network,
        };
        Self {
            kind,
            message: err.to_string(),
            attempts,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<url::ParseError> for StreamError {
    fn from(e: url::ParseError) -> Self {
        StreamError::InvalidUrl(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        StreamError::Transport(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for StreamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        StreamError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for StreamError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        StreamError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = StreamError::NotStreaming(SessionState::Reconnecting);
        assert!(e.to_string().contains("Reconnecting"));

        let e = StreamError::ReconnectExhausted { attempts: 5 };
        assert!(e.to_string().contains('5'));

        let e = StreamError::UnsupportedFrame {
            frame: "resize",
            mode: "log",
        };
        assert_eq!(e.to_string(), "resize frames are not supported in log mode");
    }

    #[test]
    fn classification() {
        assert!(StreamError::Auth(AuthError::Missing).is_terminal_auth());
        assert!(!StreamError::Auth(AuthError::Missing).is_transient());
        assert!(StreamError::Connect("refused".into()).is_transient());
        assert!(
            StreamError::UnexpectedClose {
                code: 1011,
                reason: String::new()
            }
            .is_transient()
        );
        assert!(!StreamError::ReconnectExhausted { attempts: 2 }.is_transient());
    }

    #[test]
    fn failure_kind_from_error() {
        let f = SessionFailure::from_error(&StreamError::Auth(AuthError::Missing), 0);
        assert_eq!(f.kind, FailureKind::Reauthenticate);

        let f = SessionFailure::from_error(&StreamError::ReconnectExhausted { attempts: 3 }, 3);
        assert_eq!(f.kind, FailureKind::ReconnectExhausted);
        assert_eq!(f.attempts, 3);

        let f = SessionFailure::from_error(&StreamError::Timeout(Duration::from_secs(1)), 1);
        assert_eq!(f.kind, FailureKind::Network);
    }

    #[test]
    fn from_url_parse() {
        let e: StreamError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(e, StreamError::InvalidUrl(_)));
    }
}
