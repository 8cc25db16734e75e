//! Session lifecycle state machine.
//!
//! Provides a `SessionState` enum that models the full lifecycle of one
//! streaming session, with validated transitions that return `Result`
//! instead of panicking. The session task is the only writer.

use crate::error::StreamError;

// ── SessionState ─────────────────────────────────────────────────

/// The current state of a streaming session.
///
/// ```text
///  Idle ──► Connecting ──► Authenticating ──► Streaming
///             ▲   │              │               │  │
///             │   ▼              ▼               │  │
///           Reconnecting ◄───────┴───────────────┘  │
///             │                                     ▼
///             ├──────────► Failed        Closing ──► Closed
///             └───────────────────────────┘
/// ```
///
/// `Closed` and `Failed` are terminal: no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Constructed but never opened.
    #[default]
    Idle,

    /// Waiting for the transport to open a socket.
    Connecting,

    /// Socket is open and the bearer token was sent; waiting for the
    /// first inbound frame (or the grace period) as proof of acceptance.
    Authenticating,

    /// Handshake accepted; frames flow in both directions.
    Streaming,

    /// Socket lost; a reconnect timer is pending.
    Reconnecting,

    /// Graceful shutdown in progress.
    Closing,

    /// Shut down cleanly. Terminal.
    Closed,

    /// Gave up (auth failure or reconnect budget exhausted). Terminal.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Authenticating => "Authenticating",
            Self::Streaming => "Streaming",
            Self::Reconnecting => "Reconnecting",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// Returns `true` when frames may be sent.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Returns `true` for `Closed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Idle`, `Reconnecting`.
    pub fn begin_connect(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Idle | Self::Reconnecting => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot connect: not in Idle or Reconnecting state",
            )),
        }
    }

    /// Transition to `Authenticating` once the transport reports open.
    ///
    /// Valid from: `Connecting`.
    pub fn begin_authenticate(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting => {
                *self = Self::Authenticating;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot authenticate: not in Connecting state",
            )),
        }
    }

    /// Transition to `Streaming`.
    ///
    /// Valid from: `Authenticating`.
    pub fn accept(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Authenticating => {
                *self = Self::Streaming;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot accept handshake: not in Authenticating state",
            )),
        }
    }

    /// Transition to `Reconnecting` after a transient failure.
    ///
    /// Valid from: `Connecting`, `Authenticating`, `Streaming`.
    pub fn begin_reconnect(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting | Self::Authenticating | Self::Streaming => {
                *self = Self::Reconnecting;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot reconnect: no connection attempt in progress",
            )),
        }
    }

    /// Transition to `Closing`.
    ///
    /// Valid from: `Connecting`, `Authenticating`, `Streaming`,
    /// `Reconnecting`.
    pub fn begin_close(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting | Self::Authenticating | Self::Streaming | Self::Reconnecting => {
                *self = Self::Closing;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot close: session is idle or already shutting down",
            )),
        }
    }

    /// Transition to `Closed`.
    ///
    /// Valid from: `Closing`, `Idle` (never opened), `Streaming`
    /// (server closed normally).
    pub fn finish_close(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Closing | Self::Idle | Self::Streaming => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot finish close: not in a closable state",
            )),
        }
    }

    /// Transition to `Failed`.
    ///
    /// Valid from any non-terminal state except `Idle` and `Closing`.
    pub fn fail(&mut self) -> Result<(), StreamError> {
        match self {
            Self::Connecting | Self::Authenticating | Self::Streaming | Self::Reconnecting => {
                *self = Self::Failed;
                Ok(())
            }
            _ => Err(StreamError::InvalidTransition(
                "cannot fail: session is not active",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut state = SessionState::Idle;

        state.begin_connect().unwrap();
        assert_eq!(state, SessionState::Connecting);

        state.begin_authenticate().unwrap();
        assert_eq!(state, SessionState::Authenticating);

        state.accept().unwrap();
        assert!(state.is_streaming());

        state.begin_close().unwrap();
        assert_eq!(state, SessionState::Closing);

        state.finish_close().unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn reconnect_cycle() {
        let mut state = SessionState::Streaming;
        state.begin_reconnect().unwrap();
        assert_eq!(state, SessionState::Reconnecting);
        state.begin_connect().unwrap();
        assert_eq!(state, SessionState::Connecting);
        state.begin_reconnect().unwrap();
        state.fail().unwrap();
        assert_eq!(state, SessionState::Failed);
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [SessionState::Closed, SessionState::Failed] {
            let mut state = terminal;
            assert!(state.begin_connect().is_err());
            assert!(state.begin_authenticate().is_err());
            assert!(state.accept().is_err());
            assert!(state.begin_reconnect().is_err());
            assert!(state.begin_close().is_err());
            assert!(state.finish_close().is_err());
            assert!(state.fail().is_err());
            assert_eq!(state, terminal);
        }
    }

    #[test]
    fn invalid_transition_accept_from_connecting() {
        let mut state = SessionState::Connecting;
        assert!(state.accept().is_err());
        assert_eq!(state, SessionState::Connecting);
    }

    #[test]
    fn idle_closes_directly() {
        let mut state = SessionState::Idle;
        assert!(state.begin_close().is_err());
        state.finish_close().unwrap();
        assert_eq!(state, SessionState::Closed);
    }

    #[test]
    fn server_normal_close_from_streaming() {
        let mut state = SessionState::Streaming;
        state.finish_close().unwrap();
        assert_eq!(state, SessionState::Closed);
    }

    #[test]
    fn close_cancels_reconnect() {
        let mut state = SessionState::Reconnecting;
        state.begin_close().unwrap();
        assert!(state.fail().is_err());
        state.finish_close().unwrap();
        assert_eq!(state, SessionState::Closed);
    }

    #[test]
    fn display_format() {
        assert_eq!(SessionState::Idle.to_string(), "Idle");
        assert_eq!(SessionState::Authenticating.to_string(), "Authenticating");
        assert_eq!(SessionState::Reconnecting.to_string(), "Reconnecting");
        assert_eq!(SessionState::Failed.to_string(), "Failed");
    }

    #[test]
    fn default_state_is_idle() {
        assert_eq!(SessionState::default(), SessionState::Idle);
    }
}
