//! Bounded reconnection policy as an explicit state machine.
//!
//! The transport never decides on its own when to retry. Every connect error
//! (and every unexpected disconnect) is fed to a [`Reconnector`], which answers
//! with a [`ReconnectDecision`]. The session applies it: a retry is handed back
//! to the transport as `retry_in(delay)`, giving up releases the handle.
//!
//! ```text
//!          on_failure() [attempts < max]
//!   ┌──────────────┐ ───────────────────▶ Retry { attempt: n+1, delay }
//!   │ attempts = n │
//!   └──────────────┘ ───────────────────▶ GiveUp { attempts: n }
//!         ▲          on_failure() [attempts == max or disabled]
//!         │
//!   on_connected() / reset()  →  attempts = 0
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_RECONNECT_DELAY, DEFAULT_RECONNECT_MAX_ATTEMPTS};

/// How the delay grows between attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// Every attempt waits the base delay.
    #[default]
    Fixed,
    /// Delay doubles per attempt, capped at `max_delay_ms`.
    Exponential { max_delay_ms: u64 },
}

/// Reconnection bounds. Loaded from config; durations are milliseconds on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub delay_ms: u64,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            backoff: Backoff::Fixed,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Fixed-delay policy with the given bounds.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            enabled: true,
            delay_ms: delay.as_millis() as u64,
            max_attempts,
            backoff: Backoff::Fixed,
        }
    }

    /// Base delay between attempts.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Delay before the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay(),
            Backoff::Exponential { max_delay_ms } => {
                let shift = attempt.saturating_sub(1).min(32);
                let scaled = self.delay_ms.saturating_mul(1u64 << shift);
                Duration::from_millis(scaled.min(max_delay_ms))
            }
        }
    }
}

/// What to do after a failed connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again after `delay`. `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// Stop retrying; `attempts` retries were made.
    GiveUp { attempts: u32 },
}

/// Attempt counter driven by transport lifecycle events.
#[derive(Clone, Debug)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Retries made since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A connection succeeded; the next failure starts from attempt 1.
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }

    /// A connection attempt failed or an established link dropped.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if !self.policy.enabled || self.attempts >= self.policy.max_attempts {
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.policy.delay_for(self.attempts),
        }
    }

    /// Forget all attempts (explicit disconnect or fresh connect).
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================
