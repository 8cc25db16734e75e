//! Per-session tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::MAX_FRAME_SIZE;
use crate::error::StreamError;
use crate::reconnect::ReconnectConfig;
use crate::session::buffer::BufferPolicy;

/// Settings shared by every session a client opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Backoff and attempt ceilings.
    pub reconnect: ReconnectConfig,
    /// Deadline for the transport to open a socket.
    pub connect_timeout_ms: u64,
    /// How long to wait after sending the token for a rejection before
    /// treating the handshake as accepted.
    pub auth_grace_ms: u64,
    /// How long `close()` waits for the peer to answer the close frame.
    pub close_timeout_ms: u64,
    /// Largest inbound or outbound payload.
    pub max_frame_size: usize,
    /// Undelivered output policy.
    pub buffer: BufferPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            connect_timeout_ms: 10_000,
            auth_grace_ms: 1_500,
            close_timeout_ms: 2_000,
            max_frame_size: MAX_FRAME_SIZE,
            buffer: BufferPolicy::Unbounded,
        }
    }
}

impl SessionOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auth_grace(&self) -> Duration {
        Duration::from_millis(self.auth_grace_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        self.reconnect.validate()?;
        if self.connect_timeout_ms == 0 {
            return Err(StreamError::Config("connect_timeout_ms must be > 0".into()));
        }
        if self.max_frame_size == 0 {
            return Err(StreamError::Config("max_frame_size must be > 0".into()));
        }
        if let BufferPolicy::DropOldest { capacity: 0 } = self.buffer {
            return Err(StreamError::Config("buffer capacity must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = SessionOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.auth_grace(), Duration::from_millis(1_500));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let options: SessionOptions =
            serde_json::from_str(r#"{"auth_grace_ms": 250, "reconnect": {"terminal_max_attempts": 2}}"#)
                .unwrap();
        assert_eq!(options.auth_grace_ms, 250);
        assert_eq!(options.reconnect.terminal_max_attempts, Some(2));
        assert_eq!(options.reconnect.base_delay_ms, 500);
        assert_eq!(options.close_timeout_ms, 2_000);
    }

    #[test]
    fn zero_capacity_rejected() {
        let options = SessionOptions {
            buffer: BufferPolicy::DropOldest { capacity: 0 },
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(StreamError::Config(_))));
    }
}
