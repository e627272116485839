//! Batch orchestration: splits SKU lists into chunks, runs a bounded pool of
//! workers over each chunk and collects one terminal result per SKU.

mod worker;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use skuscout_core::{EngineConfig, OutputRecord, RecordStatus};

use crate::adapter::AdapterRegistry;
use crate::circuit::CircuitBreaker;
use crate::error::EngineError;
use crate::fingerprint::FingerprintProvider;
use crate::outcome::{FailureKind, LookupResult};
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryController, RetryPolicy};
use crate::session::{ProxyPool, SessionLauncher, SessionManager};
use crate::step::{NoopStepGate, StdinStepGate, StepGate};
use crate::stop::StopHandle;

use worker::{Worker, WorkerOutput, WorkerServices};

/// Adapter calls may chain several navigations; each one is bounded by the
/// request timeout, the whole call by this many of them.
const NAVIGATIONS_PER_ATTEMPT: u32 = 4;

/// SKUs to look up on one site.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchInput {
    pub skus: Vec<String>,
    /// Overrides the configured chunk size.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl BatchInput {
    #[must_use]
    pub fn new<I, S>(skus: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            skus: skus.into_iter().map(Into::into).collect(),
            batch_size: None,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Counts per terminal status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub by_status: BTreeMap<RecordStatus, usize>,
    pub unprocessed: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    #[must_use]
    pub fn count(&self, status: RecordStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (status, count) in &self.by_status {
            write!(f, "{status}={count} ")?;
        }
        write!(f, "unprocessed={}", self.unprocessed)?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Everything a batch produced.
#[derive(Debug, Clone)]
pub struct BatchReport {
    site_id: String,
    /// Distinct SKUs in input order.
    order: Vec<String>,
    results: HashMap<String, LookupResult>,
    unprocessed: Vec<String>,
    cancelled: bool,
    elapsed: Duration,
}

impl BatchReport {
    #[must_use]
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Terminal results in input order.
    pub fn results(&self) -> impl Iterator<Item = &LookupResult> {
        self.order.iter().filter_map(|sku| self.results.get(sku))
    }

    #[must_use]
    pub fn get(&self, sku: &str) -> Option<&LookupResult> {
        self.results.get(sku.trim())
    }

    /// Output rows in input order, unprocessed SKUs excluded.
    #[must_use]
    pub fn records(&self) -> Vec<OutputRecord> {
        self.results().map(LookupResult::to_output).collect()
    }

    /// SKUs never attempted because the batch was stopped.
    #[must_use]
    pub fn unprocessed(&self) -> &[String] {
        &self.unprocessed
    }

    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        let mut by_status = BTreeMap::new();
        for result in self.results.values() {
            *by_status.entry(result.status()).or_insert(0) += 1;
        }
        BatchSummary {
            by_status,
            unprocessed: self.unprocessed.len(),
            cancelled: self.cancelled,
        }
    }

    /// 0 for a batch that ran to completion, whatever the per-SKU statuses;
    /// 1 if it was stopped early.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(self.cancelled)
    }
}

/// Runs SKU batches against registered sites.
///
/// Circuit breaker and rate limiter state lives here and persists across
/// batches; sessions live only as long as one batch.
pub struct Orchestrator {
    config: EngineConfig,
    registry: Arc<AdapterRegistry>,
    launcher: Arc<dyn SessionLauncher>,
    fingerprints: Arc<FingerprintProvider>,
    proxies: Arc<ProxyPool>,
    circuits: Arc<CircuitBreaker>,
    rate_limiter: Arc<RateLimiter>,
    step_gate: Arc<dyn StepGate>,
    retry: RetryController,
    stop: StopHandle,
}

impl Orchestrator {
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] when the engine settings are
    /// inconsistent (no workers, empty circuit window, floor above ceiling).
    pub fn new(
        config: EngineConfig,
        registry: AdapterRegistry,
        launcher: Arc<dyn SessionLauncher>,
    ) -> Result<Self, EngineError> {
        check_config(&config)?;

        let step_gate: Arc<dyn StepGate> = if config.debug_step {
            Arc::new(StdinStepGate::new())
        } else {
            Arc::new(NoopStepGate)
        };
        Ok(Self {
            registry: Arc::new(registry),
            launcher,
            fingerprints: Arc::new(FingerprintProvider::new()),
            proxies: Arc::new(ProxyPool::new(config.proxies.clone())),
            circuits: Arc::new(CircuitBreaker::new(config.circuit.clone())),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            step_gate,
            retry: RetryController::new(RetryPolicy::from_config(&config)),
            stop: StopHandle::new(),
            config,
        })
    }

    #[must_use]
    pub fn with_step_gate(mut self, gate: Arc<dyn StepGate>) -> Self {
        self.step_gate = gate;
        self
    }

    #[must_use]
    pub fn with_fingerprints(mut self, provider: FingerprintProvider) -> Self {
        self.fingerprints = Arc::new(provider);
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    #[must_use]
    pub fn circuits(&self) -> &CircuitBreaker {
        &self.circuits
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Handle that stops every batch run by this orchestrator.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Looks up every SKU in `input` on `site_id`.
    ///
    /// Duplicate SKUs are looked up once. Blank SKUs fail as fatal without
    /// touching the site. SKUs still queued when a stop or the batch
    /// deadline hits come back in [`BatchReport::unprocessed`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownSite`] if no adapter is registered for
    /// `site_id`.
    pub async fn run_batch(
        &self,
        site_id: &str,
        input: &BatchInput,
    ) -> Result<BatchReport, EngineError> {
        let site = self
            .registry
            .get(site_id)
            .ok_or_else(|| EngineError::UnknownSite(site_id.to_string()))?;
        let started = Instant::now();
        // A deadline past the clock's range never fires.
        let deadline = self
            .config
            .batch_deadline
            .and_then(|d| started.checked_add(d));
        let chunk_size = input.batch_size.unwrap_or(self.config.batch_size).max(1);

        let mut order = Vec::new();
        let mut results = HashMap::new();
        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        for raw in &input.skus {
            let sku = raw.trim();
            if !seen.insert(sku.to_string()) {
                tracing::warn!(site = site_id, sku, "duplicate sku in batch; looking it up once");
                continue;
            }
            order.push(sku.to_string());
            if sku.is_empty() {
                results.insert(
                    String::new(),
                    LookupResult::failed(sku, 0, FailureKind::Fatal, "empty identifier".to_string()),
                );
            } else {
                pending.push(sku.to_string());
            }
        }

        tracing::info!(
            site = site_id,
            skus = pending.len(),
            chunk_size,
            workers = self.config.workers,
            "batch started"
        );

        let services = WorkerServices {
            circuits: Arc::clone(&self.circuits),
            rate_limiter: Arc::clone(&self.rate_limiter),
            step_gate: Arc::clone(&self.step_gate),
            retry: self.retry.clone(),
            attempt_timeout: self
                .config
                .request_timeout
                .saturating_mul(NAVIGATIONS_PER_ATTEMPT),
        };
        let budget = site.config.session_budget(self.config.session);
        let mut workers: Vec<Worker> = (0..self.config.workers)
            .map(|id| {
                Worker::new(
                    id,
                    SessionManager::new(
                        id,
                        Arc::clone(&self.launcher),
                        Arc::clone(&self.fingerprints),
                        Arc::clone(&self.proxies),
                        budget,
                        self.config.headless,
                        self.config.request_timeout,
                    ),
                    services.clone(),
                    self.stop.signal(deadline),
                )
            })
            .collect();

        let stop = self.stop.signal(deadline);
        let mut unprocessed = Vec::new();
        let mut cancelled = false;
        let mut chunks = pending.chunks(chunk_size).enumerate();

        for (index, chunk) in chunks.by_ref() {
            if stop.is_stopped() {
                unprocessed.extend_from_slice(chunk);
                break;
            }
            tracing::debug!(site = site_id, chunk = index, skus = chunk.len(), "chunk started");

            let queue = Mutex::new(chunk.iter().cloned().collect::<VecDeque<_>>());
            let outputs =
                futures::future::join_all(workers.iter_mut().map(|w| w.drain(site, &queue))).await;
            for WorkerOutput {
                results: finished,
                unstarted,
                interrupted,
            } in outputs
            {
                cancelled |= interrupted;
                unprocessed.extend(unstarted);
                for result in finished {
                    results.insert(result.sku.clone(), result);
                }
            }
            unprocessed.extend(
                queue
                    .into_inner()
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
        for (_, chunk) in chunks {
            unprocessed.extend_from_slice(chunk);
        }

        for worker in &mut workers {
            worker.shutdown().await;
        }

        cancelled |= !unprocessed.is_empty();
        // Keep unprocessed in input order regardless of which worker saw them.
        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, sku)| (sku.as_str(), i))
            .collect();
        unprocessed.sort_by_key(|sku| position.get(sku.as_str()).copied().unwrap_or(usize::MAX));

        let report = BatchReport {
            site_id: site_id.to_string(),
            order,
            results,
            unprocessed,
            cancelled,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            site = site_id,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            summary = %report.summary(),
            "batch finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("sites", &self.registry.site_ids())
            .field("workers", &self.config.workers)
            .field("proxies", &self.proxies.len())
            .finish_non_exhaustive()
    }
}

fn check_config(config: &EngineConfig) -> Result<(), EngineError> {
    let invalid = |reason: &str| Err(EngineError::InvalidConfig(reason.to_string()));
    if config.workers == 0 {
        return invalid("workers must be at least 1");
    }
    if config.batch_size == 0 {
        return invalid("batch_size must be at least 1");
    }
    if config.circuit.window == 0 || config.circuit.failure_threshold == 0 {
        return invalid("circuit window and failure threshold must be at least 1");
    }
    if config.rate_limit.floor > config.rate_limit.ceiling {
        return invalid("rate limit floor is above its ceiling");
    }
    let factor = config.rate_limit.backoff_factor;
    if !factor.is_finite() || factor < 1.0 {
        return invalid("rate limit backoff factor must be a finite number of at least 1");
    }
    if config.backoff.base > config.backoff.max {
        return invalid("backoff base delay is above its maximum");
    }
    if !(0.0..=1.0).contains(&config.quality_threshold) {
        return invalid("quality threshold must be within 0..=1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_workers() {
        let config = EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(check_config(&config), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_inverted_rate_limit_bounds() {
        let mut config = EngineConfig::default();
        config.rate_limit.floor = Duration::from_secs(10);
        config.rate_limit.ceiling = Duration::from_secs(1);
        assert!(matches!(check_config(&config), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_non_finite_backoff_factor() {
        let mut config = EngineConfig::default();
        config.rate_limit.backoff_factor = f64::NAN;
        assert!(matches!(check_config(&config), Err(EngineError::InvalidConfig(_))));
        config.rate_limit.backoff_factor = f64::INFINITY;
        assert!(matches!(check_config(&config), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(check_config(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn batch_input_reads_optional_chunk_size() {
        let input: BatchInput = serde_json::from_str(r#"{"skus": ["a", "b"]}"#).unwrap();
        assert_eq!(input.skus, vec!["a", "b"]);
        assert_eq!(input.batch_size, None);

        let input: BatchInput =
            serde_json::from_str(r#"{"skus": ["a"], "batch_size": 5}"#).unwrap();
        assert_eq!(input.batch_size, Some(5));
    }

    #[test]
    fn summary_display_lists_statuses() {
        let summary = BatchSummary {
            by_status: BTreeMap::from([(RecordStatus::Found, 2), (RecordStatus::Blocked, 1)]),
            unprocessed: 3,
            cancelled: true,
        };
        assert_eq!(summary.to_string(), "found=2 blocked=1 unprocessed=3 (cancelled)");
        assert_eq!(summary.count(RecordStatus::NotFound), 0);
    }
}
