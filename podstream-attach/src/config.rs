//! Attach client configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use podstream_core::{
    CachedTokenSource, DEFAULT_TOKEN_TTL, EnvTokenSource, SessionOptions, SessionTokenSource,
    StaticTokenSource, StreamError,
};
use serde::{Deserialize, Serialize};
use url::Url;

/// Top-level configuration for the attach client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachConfig {
    /// Dashboard server.
    pub server: ServerConfig,
    /// Where the session token comes from.
    pub auth: AuthConfig,
    /// Session tuning (reconnect, timeouts, buffering).
    pub session: SessionOptions,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Dashboard server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL; `http`/`https` are switched to `ws`/`wss` when connecting.
    pub base_url: String,
}

/// Session token settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Fixed token. Takes precedence over `token_env` when non-empty.
    pub token: String,
    /// Environment variable holding the token.
    pub token_env: String,
    /// How long a token read from `token_env` is reused before it is
    /// read again.
    pub token_ttl_secs: u64,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, overridden by `RUST_LOG`.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            token_env: "PODSTREAM_TOKEN".into(),
            token_ttl_secs: DEFAULT_TOKEN_TTL.as_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("token_env", &self.token_env)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

// ── Token source ─────────────────────────────────────────────────

impl AuthConfig {
    /// The token source sessions should use.
    pub fn token_source(&self) -> Arc<dyn SessionTokenSource> {
        if !self.token.is_empty() {
            return Arc::new(StaticTokenSource::new(self.token.clone()));
        }
        Arc::new(CachedTokenSource::with_ttl(
            EnvTokenSource::new(self.token_env.clone()),
            Duration::from_secs(self.token_ttl_secs),
        ))
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AttachConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Check the values a session cannot start without.
    pub fn validate(&self) -> Result<(), StreamError> {
        Url::parse(&self.server.base_url)?;
        if self.auth.token.is_empty() && self.auth.token_env.is_empty() {
            return Err(StreamError::Config(
                "either auth.token or auth.token_env must be set".into(),
            ));
        }
        self.session.validate()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use podstream_core::BufferPolicy;

    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = AttachConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("base_url"));
        assert!(text.contains("token_env"));
        assert!(text.contains("auth_grace_ms"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = AttachConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: AttachConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.base_url, "http://127.0.0.1:8080");
        assert_eq!(parsed.session, SessionOptions::default());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let text = r#"
            [server]
            base_url = "https://tigron-server.lan"

            [session.reconnect]
            terminal_max_attempts = 3

            [session.buffer]
            policy = "drop_oldest"
            capacity = 512
        "#;
        let cfg: AttachConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.server.base_url, "https://tigron-server.lan");
        assert_eq!(cfg.session.reconnect.terminal_max_attempts, Some(3));
        assert_eq!(cfg.session.reconnect.log_max_attempts, None);
        assert_eq!(
            cfg.session.buffer,
            BufferPolicy::DropOldest { capacity: 512 }
        );
        assert_eq!(cfg.auth.token_env, "PODSTREAM_TOKEN");
        assert_eq!(cfg.logging.level, "warn");
    }

    #[test]
    fn bad_base_url_rejected() {
        let mut cfg = AttachConfig::default();
        cfg.server.base_url = "not a url".into();
        assert!(matches!(cfg.validate(), Err(StreamError::InvalidUrl(_))));
    }

    #[test]
    fn token_is_redacted() {
        let mut cfg = AttachConfig::default();
        cfg.auth.token = "secret-session-key".into();
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("secret-session-key"));
    }

    #[tokio::test]
    async fn explicit_token_wins() {
        let mut auth = AuthConfig::default();
        auth.token = "abc".into();
        assert_eq!(auth.token_source().get_token().await.unwrap(), "abc");
    }
}
