//! Session token sources.
//!
//! The session manager never stores credentials itself; it asks an
//! injected [`SessionTokenSource`] for the current bearer token on every
//! connection attempt. Sources are shared across sessions and must be
//! safe to call concurrently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::AuthError;

/// Lifetime of a dashboard session key.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60 * 3);

/// Supplies the bearer token sent as the first message of every socket.
#[async_trait]
pub trait SessionTokenSource: Send + Sync {
    async fn get_token(&self) -> Result<String, AuthError>;
}

#[async_trait]
impl<T: SessionTokenSource + ?Sized> SessionTokenSource for Arc<T> {
    async fn get_token(&self) -> Result<String, AuthError> {
        (**self).get_token().await
    }
}

// ── StaticTokenSource ────────────────────────────────────────────

/// A fixed token, e.g. one passed on the command line.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionTokenSource for StaticTokenSource {
    async fn get_token(&self) -> Result<String, AuthError> {
        if self.token.is_empty() {
            return Err(AuthError::Missing);
        }
        Ok(self.token.clone())
    }
}

// ── EnvTokenSource ───────────────────────────────────────────────

/// Reads the token from an environment variable on every call, so a
/// rotated value is picked up by the next reconnect.
#[derive(Debug, Clone)]
pub struct EnvTokenSource {
    var: String,
}

impl EnvTokenSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl SessionTokenSource for EnvTokenSource {
    async fn get_token(&self) -> Result<String, AuthError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_owned()),
            _ => Err(AuthError::Missing),
        }
    }
}

#[async_trait]
impl TokenRefresher for EnvTokenSource {
    async fn refresh(&self) -> Result<String, AuthError> {
        self.get_token().await
    }
}

// ── CachedTokenSource ────────────────────────────────────────────

/// Obtains a fresh token, e.g. by logging in again.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<String, AuthError>;
}

struct CachedToken {
    value: String,
    fetched_at: Instant,
}

/// Caches a token for `ttl` and refreshes it before handing out a value
/// known to be expired.
///
/// Concurrent callers that find the cache stale wait on a single refresh
/// instead of each starting their own.
pub struct CachedTokenSource<R> {
    refresher: R,
    ttl: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl<R: TokenRefresher> CachedTokenSource<R> {
    pub fn new(refresher: R) -> Self {
        Self::with_ttl(refresher, DEFAULT_TOKEN_TTL)
    }

    pub fn with_ttl(refresher: R, ttl: Duration) -> Self {
        Self {
            refresher,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Seed the cache with a token obtained elsewhere (e.g. at login).
    pub async fn store(&self, token: impl Into<String>) {
        *self.cached.lock().await = Some(CachedToken {
            value: token.into(),
            fetched_at: Instant::now(),
        });
    }

    /// Drop the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[async_trait]
impl<R: TokenRefresher> SessionTokenSource for CachedTokenSource<R> {
    async fn get_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.fetched_at.elapsed() < self.ttl {
                return Ok(token.value.clone());
            }
            debug!("cached session token expired; refreshing");
        }

        let value = self.refresher.refresh().await?;
        if value.is_empty() {
            return Err(AuthError::Missing);
        }
        *cached = Some(CachedToken {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[derive(Default)]
    struct CountingRefresher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self) -> Result<String, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(format!("token-{n}"))
        }
    }

    struct FailingRefresher;

    #[async_trait]
    impl TokenRefresher for FailingRefresher {
        async fn refresh(&self) -> Result<String, AuthError> {
            Err(AuthError::RefreshFailed("login endpoint returned 401".into()))
        }
    }

    #[tokio::test]
    async fn static_source() {
        let token = assert_ok!(StaticTokenSource::new("abc").get_token().await);
        assert_eq!(token, "abc");
        let err = assert_err!(StaticTokenSource::new("").get_token().await);
        assert_eq!(err, AuthError::Missing);
    }

    #[tokio::test]
    async fn env_source_missing_var() {
        let source = EnvTokenSource::new("PODSTREAM_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert_eq!(source.get_token().await, Err(AuthError::Missing));
    }

    #[tokio::test(start_paused = true)]
    async fn cached_until_ttl_then_refreshed() {
        let source = CachedTokenSource::with_ttl(
            CountingRefresher::default(),
            Duration::from_secs(60),
        );

        assert_eq!(source.get_token().await.unwrap(), "token-1");
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(source.get_token().await.unwrap(), "token-1");

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(source.get_token().await.unwrap(), "token-2");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_refresh() {
        let source = Arc::new(CachedTokenSource::new(CountingRefresher::default()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let source = Arc::clone(&source);
            handles.push(tokio::spawn(async move { source.get_token().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(source.refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stored_token_and_invalidate() {
        let source = CachedTokenSource::new(CountingRefresher::default());
        source.store("from-login").await;
        assert_eq!(source.get_token().await.unwrap(), "from-login");

        source.invalidate().await;
        assert_eq!(source.get_token().await.unwrap(), "token-1");
    }

    #[tokio::test]
    async fn refresh_failure_surfaces() {
        let source = CachedTokenSource::new(FailingRefresher);
        let err = assert_err!(source.get_token().await);
        assert!(matches!(err, AuthError::RefreshFailed(_)));
    }
}
