//! Retry controller for external calls.
//!
//! Each call goes through a small state machine:
//!
//! ```text
//! Idle -> Attempting -> Succeeded
//!              |
//!              +-> Waiting -> Attempting ...
//!              +-> Exhausted   (transient failure, no attempts left)
//!              +-> Failed      (permanent failure)
//! ```
//!
//! Only transient failures (see [`PodError::is_transient`]) lead to `Waiting`.

use crate::error::{PodError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay doubles after each failed attempt, capped at `max_delay`.
    Exponential,
}

/// Retry limits for one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            backoff: Backoff::Fixed,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before attempt `next_attempt` (2 for the first retry).
    pub fn delay_before(&self, next_attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let exponent = next_attempt.saturating_sub(2).min(16);
                self.delay.saturating_mul(1 << exponent).min(self.max_delay)
            }
        }
    }
}

/// State of a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempting { attempt: u32 },
    Waiting { next_attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
    Failed { attempts: u32 },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Succeeded { .. } | RetryState::Exhausted { .. } | RetryState::Failed { .. }
        )
    }
}

/// Outcome of a single attempt, fed into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Transient,
    Permanent,
}

/// Pure transition logic, kept separate from the async driver so it can be
/// inspected and tested without timers.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Begin the next attempt. Valid from `Idle` and `Waiting`.
    pub fn start(&mut self) -> RetryState {
        self.state = match self.state {
            RetryState::Idle => RetryState::Attempting { attempt: 1 },
            RetryState::Waiting { next_attempt, .. } => RetryState::Attempting {
                attempt: next_attempt,
            },
            other => other,
        };
        self.state
    }

    /// Record the outcome of the current attempt.
    pub fn record(&mut self, outcome: AttemptOutcome) -> RetryState {
        let RetryState::Attempting { attempt } = self.state else {
            return self.state;
        };
        let max_attempts = self.policy.max_attempts.max(1);

        self.state = match outcome {
            AttemptOutcome::Success => RetryState::Succeeded { attempts: attempt },
            AttemptOutcome::Permanent => RetryState::Failed { attempts: attempt },
            AttemptOutcome::Transient if attempt >= max_attempts => {
                RetryState::Exhausted { attempts: attempt }
            }
            AttemptOutcome::Transient => RetryState::Waiting {
                next_attempt: attempt + 1,
                delay: self.policy.delay_before(attempt + 1),
            },
        };
        self.state
    }
}

/// Run `operation` under `policy`, retrying transient failures.
///
/// Permanent failures are returned unchanged. When attempts run out the last
/// transient error is wrapped in [`PodError::RetriesExhausted`].
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut machine = RetryMachine::new(policy.clone());

    loop {
        let RetryState::Attempting { attempt } = machine.start() else {
            return Err(PodError::Configuration(format!(
                "retry state machine for {} did not start an attempt",
                label
            )));
        };

        let error = match operation(attempt).await {
            Ok(value) => {
                machine.record(AttemptOutcome::Success);
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let outcome = if error.is_transient() {
            AttemptOutcome::Transient
        } else {
            AttemptOutcome::Permanent
        };

        match machine.record(outcome) {
            RetryState::Waiting {
                next_attempt,
                delay,
            } => {
                warn!(
                    "{} attempt {}/{} failed ({}): {}. Retrying in {:?}",
                    label,
                    attempt,
                    policy.max_attempts,
                    error.kind(),
                    error,
                    delay
                );
                tokio::time::sleep(delay).await;
                debug!("{} starting attempt {}", label, next_attempt);
            }
            RetryState::Exhausted { attempts } => {
                warn!("{} gave up after {} attempt(s): {}", label, attempts, error);
                return Err(PodError::RetriesExhausted {
                    operation: label.to_string(),
                    attempts,
                    last: Box::new(error),
                });
            }
            _ => {
                debug!("{} failed permanently ({}): {}", label, error.kind(), error);
                return Err(error);
            }
        }
    }
}
