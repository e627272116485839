//! One worker: a session manager draining SKUs from the batch queue.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;

use skuscout_core::LookupRequest;

use crate::adapter::RegisteredSite;
use crate::circuit::{Admission, CircuitBreaker, CircuitSignal};
use crate::outcome::{
    AttemptOutcome, Failure, FailureKind, LookupResult, Rejected, TerminalOutcome,
};
use crate::rate_limit::{PaceSignal, RateLimiter};
use crate::retry::{Attempt, AttemptExecutor, RetryController, RetryEnd, RetryRun};
use crate::session::{RotationReason, SessionManager};
use crate::step::{Checkpoint, StepGate};
use crate::stop::StopSignal;
use crate::validate::{validate, Verdict};

/// Shared services every worker reports to.
#[derive(Clone)]
pub(crate) struct WorkerServices {
    pub circuits: Arc<CircuitBreaker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub step_gate: Arc<dyn StepGate>,
    pub retry: RetryController,
    /// Upper bound on one adapter call, all navigations included.
    pub attempt_timeout: Duration,
}

/// What one worker produced for its share of a chunk.
#[derive(Debug, Default)]
pub(crate) struct WorkerOutput {
    pub results: Vec<LookupResult>,
    /// Dequeued but stopped before the first attempt.
    pub unstarted: Vec<String>,
    /// A lookup was cut short between retries by a stop.
    pub interrupted: bool,
}

pub(crate) struct Worker {
    id: usize,
    sessions: SessionManager,
    services: WorkerServices,
    stop: StopSignal,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        sessions: SessionManager,
        services: WorkerServices,
        stop: StopSignal,
    ) -> Self {
        Self {
            id,
            sessions,
            services,
            stop,
        }
    }

    /// Pops SKUs until the queue is empty or a stop is observed.
    pub(crate) async fn drain(
        &mut self,
        site: &RegisteredSite,
        queue: &Mutex<VecDeque<String>>,
    ) -> WorkerOutput {
        let mut output = WorkerOutput::default();
        loop {
            if self.stop.is_stopped() {
                break;
            }
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(sku) = next else { break };

            match self.lookup(site, &sku).await {
                Lookup::Done { result, interrupted } => {
                    output.interrupted |= interrupted;
                    output.results.push(result);
                }
                Lookup::Unstarted => output.unstarted.push(sku),
            }
        }
        output
    }

    pub(crate) async fn shutdown(&mut self) {
        self.sessions.shutdown().await;
    }

    async fn lookup(&mut self, site: &RegisteredSite, sku: &str) -> Lookup {
        let site_id = site.config.id.as_str();
        let mut executor = SkuAttempts {
            worker: self.id,
            sessions: &mut self.sessions,
            services: &self.services,
            site,
            request: LookupRequest::new(sku, site_id),
        };
        let RetryRun { end, attempts } = self
            .services
            .retry
            .execute(&mut executor, &mut self.stop, site_id, sku)
            .await;

        let (outcome, note, interrupted) = match end {
            RetryEnd::Finished(outcome) => (outcome, None, false),
            RetryEnd::CircuitOpen { retry_in, last } => {
                let note = format!(
                    "circuit open for {site_id}; next probe in {}s",
                    retry_in.as_secs()
                );
                match last {
                    Some(outcome) => (outcome, Some(note), false),
                    None => {
                        tracing::warn!(site = site_id, sku, "lookup rejected by open circuit");
                        return Lookup::Done {
                            result: LookupResult::failed(sku, 0, FailureKind::CircuitOpen, note),
                            interrupted: false,
                        };
                    }
                }
            }
            RetryEnd::Stopped { last: None } => return Lookup::Unstarted,
            RetryEnd::Stopped { last: Some(outcome) } => {
                (outcome, Some("stopped before retry".to_string()), true)
            }
        };

        let result = self.finish(site, sku, attempts, outcome, note).await;
        tracing::info!(
            site = site_id,
            sku,
            worker = self.id,
            attempts,
            status = result.status().as_str(),
            "lookup finished"
        );
        Lookup::Done {
            result,
            interrupted,
        }
    }

    /// Turns the last attempt outcome into a terminal result, validating
    /// extracted records.
    async fn finish(
        &self,
        site: &RegisteredSite,
        sku: &str,
        attempts: u32,
        outcome: AttemptOutcome,
        note: Option<String>,
    ) -> LookupResult {
        let with_note = |reason: String| match &note {
            Some(note) => format!("{reason} ({note})"),
            None => reason,
        };

        let outcome = match outcome {
            AttemptOutcome::Success(record) => {
                match validate(&site.profile, sku, &site.config.id, record) {
                    Verdict::Accepted(record) => TerminalOutcome::Found(record),
                    Verdict::Rejected { reason, rejected } => {
                        tracing::warn!(
                            site = %site.config.id,
                            sku,
                            score = rejected.quality_score,
                            reason = %reason,
                            "record rejected by validation"
                        );
                        low_quality(with_note(reason), rejected)
                    }
                }
            }
            AttemptOutcome::NotFound => TerminalOutcome::NotFound,
            AttemptOutcome::Blocked(reason) => {
                return LookupResult::failed(
                    sku,
                    attempts,
                    FailureKind::Blocked,
                    with_note(format!("{reason} after {attempts} attempt(s)")),
                );
            }
            AttemptOutcome::TransientError(cause) => {
                return LookupResult::failed(
                    sku,
                    attempts,
                    FailureKind::Transient,
                    with_note(format!("{cause} after {attempts} attempt(s)")),
                );
            }
            AttemptOutcome::FatalError(cause) => {
                return LookupResult::failed(sku, attempts, FailureKind::Fatal, with_note(cause));
            }
        };

        let result = LookupResult {
            sku: sku.to_string(),
            attempts,
            outcome,
        };
        self.services
            .step_gate
            .pause(
                Checkpoint::RecordFinalized,
                &format!(
                    "site={} sku={sku} status={}",
                    site.config.id,
                    result.status().as_str()
                ),
            )
            .await;
        result
    }
}

fn low_quality(reason: String, rejected: Rejected) -> TerminalOutcome {
    TerminalOutcome::Failed(Failure {
        kind: FailureKind::LowQuality,
        reason,
        rejected: Some(rejected),
    })
}

enum Lookup {
    Done {
        result: LookupResult,
        interrupted: bool,
    },
    Unstarted,
}

/// Attempt pipeline for one SKU: circuit gate, session, pacing, adapter
/// call, block detection, then feedback to the circuit and rate limiter.
struct SkuAttempts<'a> {
    worker: usize,
    sessions: &'a mut SessionManager,
    services: &'a WorkerServices,
    site: &'a RegisteredSite,
    request: LookupRequest,
}

enum AdapterCall {
    Finished(AttemptOutcome),
    Panicked(String),
    TimedOut,
}

#[async_trait]
impl<'a> AttemptExecutor for SkuAttempts<'a> {
    async fn attempt(&mut self, number: u32, rotate: Option<RotationReason>) -> Attempt {
        let site = self.site;
        let site_id = site.config.id.as_str();
        let admission = self.services.circuits.admit(site_id);
        let probe = match admission {
            Admission::Rejected { retry_in } => return Attempt::CircuitOpen { retry_in },
            Admission::Probe => true,
            Admission::Allowed => false,
        };

        let outcome = self.run_once(number, rotate).await;
        tracing::debug!(
            site = site_id,
            sku = %self.request.identifier,
            worker = self.worker,
            attempt = number,
            probe,
            outcome = outcome.label(),
            "attempt finished"
        );

        self.services
            .circuits
            .record(site_id, circuit_signal(&outcome), probe);
        self.services
            .rate_limiter
            .record(site_id, pace_signal(&outcome));
        Attempt::Ran(outcome)
    }
}

impl SkuAttempts<'_> {
    async fn run_once(&mut self, number: u32, rotate: Option<RotationReason>) -> AttemptOutcome {
        let site = self.site;
        let site_id = site.config.id.as_str();
        let services = self.services;
        let gate = &services.step_gate;
        let detail = format!(
            "site={site_id} sku={} attempt={number}",
            self.request.identifier
        );

        let previous = self.sessions.current().map(crate::session::Session::id);
        let acquired = match rotate {
            Some(reason) => self.sessions.rotate(reason).await,
            None => self.sessions.acquire().await,
        };
        let session = match acquired {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(site = site_id, worker = self.worker, error = %e, "no session available");
                return AttemptOutcome::FatalError(format!("session unavailable: {e}"));
            }
        };
        if previous != Some(session.id()) {
            gate.pause(Checkpoint::SessionReady, &detail).await;
        }

        session.begin_attempt();
        services.rate_limiter.wait(site_id).await;
        gate.pause(Checkpoint::BeforeExtraction, &detail).await;

        let call = AssertUnwindSafe(site.adapter.lookup(session, &self.request)).catch_unwind();
        let call = match tokio::time::timeout(services.attempt_timeout, call).await {
            Ok(Ok(outcome)) => AdapterCall::Finished(outcome),
            Ok(Err(panic)) => AdapterCall::Panicked(panic_message(panic.as_ref())),
            Err(_) => AdapterCall::TimedOut,
        };
        let pages = session.take_attempt_pages();

        let (outcome, discard) = match call {
            AdapterCall::Finished(outcome) => (site.detector.apply(outcome, &pages), false),
            AdapterCall::TimedOut => {
                let outcome = AttemptOutcome::TransientError(format!(
                    "attempt timed out after {}s",
                    services.attempt_timeout.as_secs()
                ));
                (site.detector.apply(outcome, &pages), true)
            }
            AdapterCall::Panicked(message) => {
                tracing::error!(
                    site = site_id,
                    sku = %self.request.identifier,
                    worker = self.worker,
                    panic = %message,
                    "adapter panicked"
                );
                (
                    AttemptOutcome::FatalError(format!("adapter panicked: {message}")),
                    true,
                )
            }
        };

        if matches!(outcome, AttemptOutcome::Blocked(_)) {
            self.sessions.mark_blocked();
            gate.pause(Checkpoint::BlockDetected, &detail).await;
        }
        if discard {
            self.sessions.discard().await;
        }
        outcome
    }
}

fn circuit_signal(outcome: &AttemptOutcome) -> CircuitSignal {
    match outcome {
        AttemptOutcome::Success(_) | AttemptOutcome::NotFound => CircuitSignal::Success,
        AttemptOutcome::Blocked(_) => CircuitSignal::Blocked,
        AttemptOutcome::TransientError(_) => CircuitSignal::Transient,
        AttemptOutcome::FatalError(_) => CircuitSignal::Fatal,
    }
}

fn pace_signal(outcome: &AttemptOutcome) -> PaceSignal {
    match outcome {
        AttemptOutcome::Success(_) | AttemptOutcome::NotFound => PaceSignal::Success,
        AttemptOutcome::Blocked(_) => PaceSignal::Blocked,
        AttemptOutcome::TransientError(_) => PaceSignal::Transient,
        AttemptOutcome::FatalError(_) => PaceSignal::Neutral,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
