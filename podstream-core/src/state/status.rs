//! Caller-visible session status.

use crate::error::SessionFailure;
use crate::state::SessionState;

/// Snapshot published by the session task on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current lifecycle state.
    pub state: SessionState,
    /// Last recorded error, if any. Cleared on entry to `Streaming`.
    pub last_error: Option<SessionFailure>,
    /// Reconnect attempts since the last successful `Streaming` entry.
    pub attempts: u32,
    /// Number of connections that reached `Streaming` so far.
    pub connection: u64,
}

impl SessionStatus {
    /// Whether the UI should prompt the user to sign in again.
    pub fn needs_reauthentication(&self) -> bool {
        matches!(
            &self.last_error,
            Some(f) if f.kind == crate::error::FailureKind::Reauthenticate
        ) && self.state == SessionState::Failed
    }
}
