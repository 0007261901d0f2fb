//! Bounded retry state machine with exponential backoff.
//!
//! `RetryMachine` is a pure state machine (Attempting -> Backoff ->
//! Attempting -> ... -> Succeeded | Exhausted). The delay itself is performed
//! by a [`Sleeper`], so tests can record delays instead of waiting.

use std::time::Duration;

use runloom_types::workflow::{MAX_RETRY_ATTEMPTS, RetryPolicy};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Delay before the attempt following `attempt` (1-based):
/// `backoff_ms * 2^(attempt-1)`, saturating, capped at `ceiling_ms`.
pub fn backoff_delay(backoff_ms: u64, attempt: u32, ceiling_ms: u64) -> Duration {
    let factor = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(backoff_ms.saturating_mul(factor).min(ceiling_ms))
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt `attempt` is (about to be) running.
    Attempting { attempt: u32 },
    /// Waiting `delay` before attempt `next_attempt`.
    Backoff { next_attempt: u32, delay: Duration },
    Succeeded { attempt: u32 },
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct RetryMachine {
    max_attempts: u32,
    backoff_ms: u64,
    ceiling_ms: u64,
    state: RetryState,
}

impl RetryMachine {
    /// `max_attempts` is clamped to 1..=5.
    pub fn new(policy: &RetryPolicy, ceiling_ms: u64) -> Self {
        Self {
            max_attempts: policy.max_attempts.clamp(1, MAX_RETRY_ATTEMPTS),
            backoff_ms: policy.backoff_ms,
            ceiling_ms,
            state: RetryState::Attempting { attempt: 1 },
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The attempt currently running, or the last one that ran.
    pub fn attempt(&self) -> u32 {
        match self.state {
            RetryState::Attempting { attempt } | RetryState::Succeeded { attempt } => attempt,
            RetryState::Backoff { next_attempt, .. } => next_attempt - 1,
            RetryState::Exhausted { attempts } => attempts,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            RetryState::Succeeded { .. } | RetryState::Exhausted { .. }
        )
    }

    /// The running attempt succeeded.
    pub fn succeed(&mut self) -> RetryState {
        if let RetryState::Attempting { attempt } = self.state {
            self.state = RetryState::Succeeded { attempt };
        }
        self.state
    }

    /// The running attempt failed: back off if attempts remain, else exhaust.
    pub fn fail(&mut self) -> RetryState {
        if let RetryState::Attempting { attempt } = self.state {
            self.state = if attempt < self.max_attempts {
                RetryState::Backoff {
                    next_attempt: attempt + 1,
                    delay: backoff_delay(self.backoff_ms, attempt, self.ceiling_ms),
                }
            } else {
                RetryState::Exhausted { attempts: attempt }
            };
        }
        self.state
    }

    /// The backoff delay elapsed; start the next attempt.
    pub fn resume(&mut self) -> RetryState {
        if let RetryState::Backoff { next_attempt, .. } = self.state {
            self.state = RetryState::Attempting {
                attempt: next_attempt,
            };
        }
        self.state
    }
}

// ---------------------------------------------------------------------------
// Sleeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    #[error("retry backoff cancelled")]
    Cancelled,
}

/// Performs backoff delays.
pub trait Sleeper: Send + Sync {
    fn sleep(
        &self,
        delay: Duration,
    ) -> impl std::future::Future<Output = Result<(), RetryError>> + Send;
}

/// Real-time sleeper that aborts when its token is cancelled.
#[derive(Debug, Clone, Default)]
pub struct TokioSleeper {
    cancel: CancellationToken,
}

impl TokioSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) -> Result<(), RetryError> {
        if self.cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
