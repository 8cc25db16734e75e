//! Reconnection policy for streaming sessions.
//!
//! Exponential backoff with a cap, plus additive jitter so sessions that
//! lost their socket for the same reason (a server restart) do not all
//! come back in the same instant.
//!
//! ```text
//! delay(n) = min(base * factor^(n-1), cap) * (1 + U[0, jitter_ratio])
//! ```
//!
//! Log sessions retry forever by default; terminal sessions give up after
//! a few attempts so the user sees the failure.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::target::SessionMode;

const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_FACTOR: f64 = 2.0;
const DEFAULT_JITTER_RATIO: f64 = 0.2;
const DEFAULT_TERMINAL_MAX_ATTEMPTS: u32 = 5;

// ── ReconnectConfig ──────────────────────────────────────────────

/// Serializable backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub base_delay_ms: u64,
    /// Upper bound on the un-jittered delay.
    pub max_delay_ms: u64,
    /// Growth factor between attempts.
    pub factor: f64,
    /// Extra random delay as a fraction of the computed delay (0.0 - 1.0).
    pub jitter_ratio: f64,
    /// Attempt ceiling for log sessions (`None` = unlimited).
    pub log_max_attempts: Option<u32>,
    /// Attempt ceiling for terminal sessions (`None` = unlimited).
    pub terminal_max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            factor: DEFAULT_FACTOR,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            log_max_attempts: None,
            terminal_max_attempts: Some(DEFAULT_TERMINAL_MAX_ATTEMPTS),
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.base_delay_ms == 0 {
            return Err(StreamError::Config("base_delay_ms must be > 0".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(StreamError::Config(
                "max_delay_ms must be >= base_delay_ms".into(),
            ));
        }
        if !(self.factor >= 1.0) {
            return Err(StreamError::Config("factor must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(StreamError::Config(
                "jitter_ratio must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

// ── ReconnectAttemptCounter ──────────────────────────────────────

/// Attempts made since the session last reached `Streaming`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectAttemptCounter {
    attempts: u32,
    next_delay: Duration,
}

impl ReconnectAttemptCounter {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay chosen for the most recent attempt.
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Called on every successful entry to `Streaming`.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ── ReconnectDecision ────────────────────────────────────────────

/// Outcome of consulting the policy after an unexpected close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then open attempt number `attempt` (1-based).
    Retry { attempt: u32, delay: Duration },
    /// The budget is spent.
    GiveUp { attempts: u32 },
}

// ── ReconnectPolicy ──────────────────────────────────────────────

/// Decides whether and when to re-establish a lost connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    max_attempts: Option<u32>,
    base: Duration,
    cap: Duration,
    factor: f64,
    jitter_ratio: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::for_mode(SessionMode::Log, &ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    /// Policy with default backoff and the given attempt ceiling.
    pub fn new(max_attempts: Option<u32>) -> Self {
        Self {
            max_attempts,
            base: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            cap: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            factor: DEFAULT_FACTOR,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }

    /// Build the per-mode policy from configuration.
    pub fn for_mode(mode: SessionMode, config: &ReconnectConfig) -> Self {
        let max_attempts = match mode {
            SessionMode::Log => config.log_max_attempts,
            SessionMode::Terminal => config.terminal_max_attempts,
        };
        Self {
            max_attempts,
            base: Duration::from_millis(config.base_delay_ms),
            cap: Duration::from_millis(config.max_delay_ms),
            factor: config.factor,
            jitter_ratio: config.jitter_ratio,
        }
    }

    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Un-jittered delay for attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base.as_millis() as f64 * self.factor.powi(exp);
        let capped = millis.min(self.cap.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Consult the policy, advancing `counter` on a retry.
    pub fn decide(&self, counter: &mut ReconnectAttemptCounter) -> ReconnectDecision {
        if let Some(max) = self.max_attempts {
            if counter.attempts >= max {
                return ReconnectDecision::GiveUp {
                    attempts: counter.attempts,
                };
            }
        }

        counter.attempts = counter.attempts.saturating_add(1);
        counter.next_delay = self.jittered(self.backoff(counter.attempts));

        ReconnectDecision::Retry {
            attempt: counter.attempts,
            delay: counter.next_delay,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        delay.mul_f64(1.0 + extra)
    }
}
