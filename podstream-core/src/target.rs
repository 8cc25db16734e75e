//! What a session streams: one resource in one mode.
//!
//! # Endpoints
//!
//! ```text
//! LOG       {base}/api/ws/logs/{resource_id}
//! TERMINAL  {base}/api/ws/terminal/{resource_id}
//! ```
//!
//! `http`/`https` bases are rewritten to `ws`/`wss`.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::StreamError;

// ── SessionMode ──────────────────────────────────────────────────

/// Streaming mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// One-way log tail.
    Log,
    /// Interactive bidirectional shell.
    Terminal,
}

impl SessionMode {
    /// Lowercase name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Terminal => "terminal",
        }
    }

    fn path_segment(&self) -> &'static str {
        match self {
            Self::Log => "logs",
            Self::Terminal => "terminal",
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── SessionTarget ────────────────────────────────────────────────

/// The (resource, mode) pair a session is bound to. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionTarget {
    resource_id: String,
    mode: SessionMode,
}

impl SessionTarget {
    pub fn new(resource_id: impl Into<String>, mode: SessionMode) -> Self {
        Self {
            resource_id: resource_id.into(),
            mode,
        }
    }

    /// Log stream of `resource_id`.
    pub fn logs(resource_id: impl Into<String>) -> Self {
        Self::new(resource_id, SessionMode::Log)
    }

    /// Interactive terminal of `resource_id`.
    pub fn terminal(resource_id: impl Into<String>) -> Self {
        Self::new(resource_id, SessionMode::Terminal)
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Build the socket URL for this target under `base`.
    pub fn endpoint(&self, base: &Url) -> Result<Url, StreamError> {
        if self.resource_id.is_empty() {
            return Err(StreamError::InvalidUrl("empty resource id".into()));
        }

        let mut url = base.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(StreamError::InvalidUrl(format!(
                    "unsupported scheme: {other}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| StreamError::InvalidUrl(format!("cannot use scheme {scheme}")))?;
        url.set_query(None);
        url.set_fragment(None);

        url.path_segments_mut()
            .map_err(|_| StreamError::InvalidUrl("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["api", "ws", self.mode.path_segment(), &self.resource_id]);

        Ok(url)
    }
}

impl std::fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.mode, self.resource_id)
    }
}
