//! Bounded, backed-off re-attempts for a single lookup.
//!
//! Transient errors are retried up to `max_transient_attempts`; blocks up to
//! `max_blocked_attempts` and always on a fresh session. Success, not-found
//! and fatal outcomes end the lookup immediately, as does an open circuit.

use std::time::Duration;

use async_trait::async_trait;

use skuscout_core::{BackoffSettings, EngineConfig};

use crate::outcome::AttemptOutcome;
use crate::session::RotationReason;
use crate::stop::StopSignal;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_transient_attempts: u32,
    pub max_blocked_attempts: u32,
    pub backoff: BackoffSettings,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_transient_attempts: config.max_transient_attempts.max(1),
            max_blocked_attempts: config.max_blocked_attempts.max(1),
            backoff: config.backoff.clone(),
        }
    }

    /// Delay before retry number `retry` (1-based) for a jitter sample in
    /// `[0, 1)`: `base * 2^(retry-1) * (1 + jitter * sample)`, capped at `max`.
    #[must_use]
    pub fn delay_for(&self, retry: u32, sample: f64) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let exponential = self
            .backoff
            .base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff.max);
        let factor = 1.0 + self.backoff.jitter.clamp(0.0, 1.0) * sample.clamp(0.0, 1.0);
        exponential.mul_f64(factor).min(self.backoff.max)
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.delay_for(retry, rand::random::<f64>())
    }

    /// What to do after `outcome`, given the attempts made so far
    /// (including the one that produced `outcome`).
    #[must_use]
    pub fn decide(&self, outcome: &AttemptOutcome, tally: &AttemptTally) -> RetryDecision {
        match outcome {
            AttemptOutcome::TransientError(_) if tally.transient < self.max_transient_attempts => {
                RetryDecision::Retry {
                    delay: self.backoff(tally.total),
                    rotate: None,
                }
            }
            AttemptOutcome::Blocked(_) if tally.blocked < self.max_blocked_attempts => {
                RetryDecision::Retry {
                    delay: self.backoff(tally.total),
                    rotate: Some(RotationReason::Blocked),
                }
            }
            _ => RetryDecision::Finish,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Finish,
    Retry {
        delay: Duration,
        /// Rotate the session before the next attempt.
        rotate: Option<RotationReason>,
    },
}

/// Attempts made for one lookup, by outcome class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptTally {
    pub total: u32,
    pub transient: u32,
    pub blocked: u32,
}

impl AttemptTally {
    fn count(&mut self, outcome: &AttemptOutcome) {
        self.total += 1;
        match outcome {
            AttemptOutcome::TransientError(_) => self.transient += 1,
            AttemptOutcome::Blocked(_) => self.blocked += 1,
            _ => {}
        }
    }
}

/// Result of one gated attempt.
#[derive(Debug)]
pub(crate) enum Attempt {
    Ran(AttemptOutcome),
    CircuitOpen { retry_in: Duration },
}

/// Runs one attempt: circuit gate, session, pacing, adapter, detection.
#[async_trait]
pub(crate) trait AttemptExecutor: Send {
    async fn attempt(&mut self, number: u32, rotate: Option<RotationReason>) -> Attempt;
}

#[derive(Debug)]
pub(crate) enum RetryEnd {
    Finished(AttemptOutcome),
    CircuitOpen {
        retry_in: Duration,
        last: Option<AttemptOutcome>,
    },
    Stopped {
        last: Option<AttemptOutcome>,
    },
}

#[derive(Debug)]
pub(crate) struct RetryRun {
    pub end: RetryEnd,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub(crate) async fn execute<E: AttemptExecutor>(
        &self,
        executor: &mut E,
        stop: &mut StopSignal,
        site: &str,
        sku: &str,
    ) -> RetryRun {
        let mut tally = AttemptTally::default();
        let mut last: Option<AttemptOutcome> = None;
        let mut rotate = None;

        loop {
            if stop.is_stopped() {
                return RetryRun {
                    end: RetryEnd::Stopped { last },
                    attempts: tally.total,
                };
            }

            let outcome = match executor.attempt(tally.total + 1, rotate.take()).await {
                Attempt::Ran(outcome) => outcome,
                Attempt::CircuitOpen { retry_in } => {
                    return RetryRun {
                        end: RetryEnd::CircuitOpen { retry_in, last },
                        attempts: tally.total,
                    };
                }
            };
            tally.count(&outcome);

            let RetryDecision::Retry {
                delay,
                rotate: next_rotation,
            } = self.policy.decide(&outcome, &tally)
            else {
                return RetryRun {
                    end: RetryEnd::Finished(outcome),
                    attempts: tally.total,
                };
            };

            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(
                site,
                sku,
                attempt = tally.total,
                outcome = outcome.label(),
                delay_ms,
                rotate = next_rotation.is_some(),
                "attempt failed; retrying after backoff"
            );
            last = Some(outcome);
            rotate = next_rotation;

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = stop.stopped() => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
