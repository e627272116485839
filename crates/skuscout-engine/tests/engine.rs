//! End-to-end tests for `Orchestrator::run_batch`.
//!
//! Sessions come from an in-memory launcher and lookups from a scripted
//! adapter, so every scenario runs on paused tokio time with no network.
//! Pacing and backoff are zeroed unless a test needs them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use skuscout_core::{
    BackoffSettings, CircuitSettings, EngineConfig, LookupRequest, RateLimitSettings, RawRecord,
    RecordStatus, SessionBudget, SiteConfig, FIELD_BRAND, FIELD_IMAGE_URLS, FIELD_NAME,
};
use skuscout_engine::{
    AdapterRegistry, AttemptOutcome, BatchInput, BlockReason, BrowserContext, CircuitState,
    EngineError, Fingerprint, FingerprintProvider, LaunchError, LaunchSpec, NavigationError,
    Orchestrator, PageSnapshot, Session, SessionLauncher, SiteAdapter, TerminalOutcome,
};

const SITE: &str = "test-shop";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LauncherStats {
    launched: AtomicUsize,
    closed: AtomicUsize,
    proxies: Mutex<Vec<Option<String>>>,
}

/// Opens in-memory contexts. Launches through a proxy listed in `dead`
/// fail.
struct StubLauncher {
    stats: Arc<LauncherStats>,
    dead: Vec<String>,
}

impl StubLauncher {
    fn new() -> Self {
        Self {
            stats: Arc::new(LauncherStats::default()),
            dead: Vec::new(),
        }
    }
}

#[async_trait]
impl SessionLauncher for StubLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn BrowserContext>, LaunchError> {
        self.stats.proxies.lock().unwrap().push(spec.proxy.clone());
        if let Some(proxy) = spec.proxy.as_ref().filter(|p| self.dead.contains(p)) {
            return Err(LaunchError::Proxy {
                proxy: proxy.clone(),
                reason: "connection refused".to_string(),
            });
        }
        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubContext {
            stats: Arc::clone(&self.stats),
            open: true,
        }))
    }
}

/// Answers 403 for any URL containing `/blocked`, 200 otherwise.
struct StubContext {
    stats: Arc<LauncherStats>,
    open: bool,
}

#[async_trait]
impl BrowserContext for StubContext {
    async fn goto(&mut self, url: &str) -> Result<PageSnapshot, NavigationError> {
        if !self.open {
            return Err(NavigationError::Closed);
        }
        let status = if url.contains("/blocked") { 403 } else { 200 };
        Ok(PageSnapshot {
            requested_url: url.to_string(),
            final_url: url.to_string(),
            status,
            title: None,
            body: String::new(),
        })
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Clone)]
enum Step {
    Return(AttemptOutcome),
    Panic,
    Sleep(Duration),
    /// Navigate to the URL, then report success anyway.
    Visit(&'static str),
}

/// Plays back a per-SKU script, then returns a complete record for every
/// further call.
#[derive(Default)]
struct ScriptedAdapter {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, Uuid, Fingerprint)>>,
}

impl ScriptedAdapter {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(self: &Arc<Self>, sku: &str, steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        self.scripts
            .lock()
            .unwrap()
            .insert(sku.to_string(), steps.into_iter().collect());
        Arc::clone(self)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn sessions_seen(&self) -> Vec<(Uuid, Fingerprint)> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, id, fp)| (*id, fp.clone()))
            .collect()
    }
}

fn complete_record(sku: &str) -> RawRecord {
    RawRecord::new()
        .with(FIELD_NAME, format!("Widget {sku}"))
        .with(FIELD_BRAND, "Acme")
        .with(
            FIELD_IMAGE_URLS,
            vec![format!("https://cdn.example.com/{sku}.jpg")],
        )
}

#[async_trait]
impl SiteAdapter for ScriptedAdapter {
    fn kind(&self) -> &str {
        "scripted"
    }

    async fn lookup(&self, session: &mut Session, request: &LookupRequest) -> AttemptOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((
            request.identifier.clone(),
            session.id(),
            session.fingerprint().clone(),
        ));
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.identifier)
            .and_then(VecDeque::pop_front);

        match step {
            Some(Step::Return(outcome)) => outcome,
            Some(Step::Panic) => panic!("adapter bug for {}", request.identifier),
            Some(Step::Sleep(duration)) => {
                tokio::time::sleep(duration).await;
                AttemptOutcome::Success(complete_record(&request.identifier))
            }
            Some(Step::Visit(url)) => {
                if let Err(e) = session.navigate(url).await {
                    return AttemptOutcome::TransientError(e.to_string());
                }
                AttemptOutcome::Success(complete_record(&request.identifier))
            }
            None => AttemptOutcome::Success(complete_record(&request.identifier)),
        }
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        workers: 1,
        batch_size: 10,
        backoff: BackoffSettings {
            base: Duration::ZERO,
            max: Duration::ZERO,
            jitter: 0.0,
        },
        rate_limit: RateLimitSettings {
            base_interval: Duration::ZERO,
            floor: Duration::ZERO,
            ceiling: Duration::ZERO,
            backoff_factor: 2.0,
            recovery_step: Duration::ZERO,
            recovery_after: 1,
        },
        circuit: CircuitSettings {
            window: 50,
            failure_threshold: 1_000,
            blocked_weight: 2,
            cooldown: Duration::from_secs(60),
            cooldown_max: Duration::from_secs(900),
        },
        ..EngineConfig::default()
    }
}

/// Shipped circuit and retry defaults: three SKUs blocked on every attempt
/// open the circuit on the sixth blocked attempt.
fn tripping_config() -> EngineConfig {
    let defaults = EngineConfig::default();
    let mut config = test_config();
    config.max_blocked_attempts = defaults.max_blocked_attempts;
    config.circuit = defaults.circuit;
    config
}

struct Harness {
    orchestrator: Orchestrator,
    adapter: Arc<ScriptedAdapter>,
    stats: Arc<LauncherStats>,
}

fn harness(config: EngineConfig, adapter: Arc<ScriptedAdapter>) -> Harness {
    harness_with_launcher(config, adapter, StubLauncher::new())
}

fn harness_with_launcher(
    config: EngineConfig,
    adapter: Arc<ScriptedAdapter>,
    launcher: StubLauncher,
) -> Harness {
    let mut registry = AdapterRegistry::new();
    registry
        .register(
            SiteConfig::new(SITE, "scripted", "https://shop.example.com"),
            Arc::clone(&adapter) as Arc<dyn SiteAdapter>,
            config.quality_threshold,
        )
        .expect("register scripted site");
    let stats = Arc::clone(&launcher.stats);
    let orchestrator = Orchestrator::new(config, registry, Arc::new(launcher))
        .expect("valid test config")
        .with_fingerprints(FingerprintProvider::seeded(7));
    Harness {
        orchestrator,
        adapter,
        stats,
    }
}

fn blocked() -> Step {
    Step::Return(AttemptOutcome::Blocked(BlockReason::HttpStatus(403)))
}

fn transient() -> Step {
    Step::Return(AttemptOutcome::TransientError("connection reset".to_string()))
}

/// Runs three SKUs that are blocked on every attempt, opening the circuit.
async fn trip_circuit(h: &Harness) {
    for sku in ["b1", "b2", "b3"] {
        h.adapter.script(sku, [blocked(), blocked()]);
    }
    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["b1", "b2", "b3"]))
        .await
        .unwrap();
    assert!(report
        .results()
        .all(|r| r.status() == RecordStatus::Blocked));
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn complete_record_is_found_with_full_score() {
    let h = harness(test_config(), ScriptedAdapter::new());

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["000111222333"]))
        .await
        .unwrap();

    let result = report.get("000111222333").expect("result for sku");
    assert_eq!(result.status(), RecordStatus::Found);
    assert_eq!(result.attempts, 1);
    let record = result.record().unwrap();
    assert!((record.quality_score - 1.0).abs() < f64::EPSILON);
    assert!(record.flags.is_empty());

    let rows = report.records();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, RecordStatus::Found);
    assert_eq!(rows[0].fields.text(FIELD_NAME), Some("Widget 000111222333"));

    assert!(!report.cancelled());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(h.stats.launched.load(Ordering::SeqCst), 1);
    assert_eq!(h.stats.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn results_follow_input_order_across_chunks_and_workers() {
    let mut config = test_config();
    config.workers = 3;
    let h = harness(config, ScriptedAdapter::new());
    let skus: Vec<String> = (1..=7).map(|i| format!("sku-{i}")).collect();

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(skus.clone()).with_batch_size(2))
        .await
        .unwrap();

    let order: Vec<&str> = report.results().map(|r| r.sku.as_str()).collect();
    assert_eq!(order, skus.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(report.summary().count(RecordStatus::Found), 7);
    assert_eq!(h.adapter.calls(), 7);
}

#[tokio::test(start_paused = true)]
async fn workers_run_lookups_concurrently() {
    let mut config = test_config();
    config.workers = 3;
    let adapter = ScriptedAdapter::new();
    for sku in ["a", "b", "c"] {
        adapter.script(sku, [Step::Sleep(Duration::from_secs(10))]);
    }
    let h = harness(config, adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["a", "b", "c"]))
        .await
        .unwrap();

    assert_eq!(report.summary().count(RecordStatus::Found), 3);
    assert!(report.elapsed() < Duration::from_secs(15));
    assert_eq!(h.stats.launched.load(Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Retries
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried_until_success() {
    let adapter = ScriptedAdapter::new().script("t1", [transient(), transient()]);
    let h = harness(test_config(), adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["t1"]))
        .await
        .unwrap();

    let result = report.get("t1").unwrap();
    assert_eq!(result.status(), RecordStatus::Found);
    assert_eq!(result.attempts, 3);
    assert_eq!(h.adapter.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_stop_at_attempt_cap() {
    let adapter = ScriptedAdapter::new().script("t1", [transient(), transient(), transient()]);
    let h = harness(test_config(), adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["t1"]))
        .await
        .unwrap();

    let result = report.get("t1").unwrap();
    assert_eq!(result.status(), RecordStatus::Transient);
    assert_eq!(result.attempts, 3);
    assert!(result
        .failure()
        .unwrap()
        .reason
        .contains("connection reset"));
}

#[tokio::test(start_paused = true)]
async fn not_found_is_not_retried() {
    let adapter =
        ScriptedAdapter::new().script("gone", [Step::Return(AttemptOutcome::NotFound)]);
    let h = harness(test_config(), adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["gone"]))
        .await
        .unwrap();

    assert_eq!(report.get("gone").unwrap().status(), RecordStatus::NotFound);
    assert_eq!(h.adapter.calls(), 1);
    assert_eq!(
        report.records()[0].failure_reason.as_deref(),
        Some("product not found on site")
    );
}

// ---------------------------------------------------------------------------
// Blocking, circuit breaker
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn blocked_skus_exhaust_retries_and_open_circuit() {
    let h = harness(tripping_config(), ScriptedAdapter::new());

    trip_circuit(&h).await;

    assert_eq!(h.adapter.calls(), 6);
    // Every attempt after a block runs on a fresh session.
    assert_eq!(h.stats.launched.load(Ordering::SeqCst), 6);
    assert_eq!(h.stats.closed.load(Ordering::SeqCst), 6);
    assert_eq!(h.orchestrator.circuits().snapshot(SITE).state, CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_fails_fast_without_calling_adapter() {
    let h = harness(tripping_config(), ScriptedAdapter::new());
    trip_circuit(&h).await;
    let calls_before = h.adapter.calls();

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["x1", "x2"]))
        .await
        .unwrap();

    for sku in ["x1", "x2"] {
        let result = report.get(sku).unwrap();
        assert_eq!(result.status(), RecordStatus::CircuitOpen);
        assert_eq!(result.attempts, 0);
    }
    assert_eq!(h.adapter.calls(), calls_before);
    assert!(!report.cancelled());
}

#[tokio::test(start_paused = true)]
async fn circuit_closes_after_successful_probe() {
    let h = harness(tripping_config(), ScriptedAdapter::new());
    trip_circuit(&h).await;

    tokio::time::advance(Duration::from_secs(61)).await;
    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["ok"]))
        .await
        .unwrap();

    assert_eq!(report.get("ok").unwrap().status(), RecordStatus::Found);
    let snapshot = h.orchestrator.circuits().snapshot(SITE);
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn block_rotates_to_a_different_fingerprint() {
    let adapter = ScriptedAdapter::new().script("r1", [blocked()]);
    let h = harness(test_config(), adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["r1"]))
        .await
        .unwrap();

    assert_eq!(report.get("r1").unwrap().status(), RecordStatus::Found);
    let seen = h.adapter.sessions_seen();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0].0, seen[1].0);
    assert_ne!(seen[0].1, seen[1].1);
    assert_eq!(h.stats.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn final_block_still_retires_the_session_for_the_next_sku() {
    let adapter = ScriptedAdapter::new().script("r1", [blocked(), blocked()]);
    let h = harness(test_config(), adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["r1", "r2"]))
        .await
        .unwrap();

    assert_eq!(report.get("r1").unwrap().status(), RecordStatus::Blocked);
    assert_eq!(report.get("r2").unwrap().status(), RecordStatus::Found);
    let seen = h.adapter.sessions_seen();
    assert_eq!(seen.len(), 3);
    assert_ne!(seen[1].0, seen[2].0);
    assert_ne!(seen[1].1, seen[2].1);
    assert_eq!(h.stats.launched.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn single_blocked_attempt_cap_still_rotates() {
    let mut config = test_config();
    config.max_blocked_attempts = 1;
    let adapter = ScriptedAdapter::new().script("r1", [blocked()]);
    let h = harness(config, adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["r1", "r2"]))
        .await
        .unwrap();

    let r1 = report.get("r1").unwrap();
    assert_eq!(r1.status(), RecordStatus::Blocked);
    assert_eq!(r1.attempts, 1);
    let seen = h.adapter.sessions_seen();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0].0, seen[1].0);
    assert_ne!(seen[0].1, seen[1].1);
}

#[tokio::test(start_paused = true)]
async fn detector_overrides_adapter_success_on_block_page() {
    let adapter = ScriptedAdapter::new()
        .script("d1", [Step::Visit("https://shop.example.com/blocked")]);
    let h = harness(test_config(), adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["d1"]))
        .await
        .unwrap();

    let result = report.get("d1").unwrap();
    assert_eq!(result.status(), RecordStatus::Found);
    assert_eq!(result.attempts, 2);
    assert_eq!(h.orchestrator.rate_limiter().interval(SITE), Duration::ZERO);
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn session_rotates_after_request_budget() {
    let mut config = test_config();
    config.session = SessionBudget {
        max_requests: 2,
        max_age: Duration::from_secs(3_600),
    };
    let h = harness(config, ScriptedAdapter::new());

    h.orchestrator
        .run_batch(SITE, &BatchInput::new(["a", "b", "c", "d", "e"]))
        .await
        .unwrap();

    let ids: Vec<Uuid> = h.adapter.sessions_seen().into_iter().map(|s| s.0).collect();
    assert_eq!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert_eq!(ids[2], ids[3]);
    assert_ne!(ids[3], ids[4]);
    assert_eq!(h.stats.launched.load(Ordering::SeqCst), 3);
    assert_eq!(h.stats.closed.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn dead_proxy_is_skipped_at_launch() {
    let mut config = test_config();
    config.proxies = vec![
        "http://dead.proxy:8080".to_string(),
        "http://live.proxy:8080".to_string(),
    ];
    let mut launcher = StubLauncher::new();
    launcher.dead = vec!["http://dead.proxy:8080".to_string()];
    let h = harness_with_launcher(config, ScriptedAdapter::new(), launcher);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["p1"]))
        .await
        .unwrap();

    assert_eq!(report.get("p1").unwrap().status(), RecordStatus::Found);
    let tried = h.stats.proxies.lock().unwrap().clone();
    assert_eq!(
        tried,
        vec![
            Some("http://dead.proxy:8080".to_string()),
            Some("http://live.proxy:8080".to_string())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn no_launchable_session_is_fatal() {
    let mut config = test_config();
    config.proxies = vec!["http://dead.proxy:8080".to_string()];
    let mut launcher = StubLauncher::new();
    launcher.dead = config.proxies.clone();
    let h = harness_with_launcher(config, ScriptedAdapter::new(), launcher);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["p1"]))
        .await
        .unwrap();

    let result = report.get("p1").unwrap();
    assert_eq!(result.status(), RecordStatus::Fatal);
    assert!(result.failure().unwrap().reason.contains("session unavailable"));
    assert_eq!(h.adapter.calls(), 0);
}

// ---------------------------------------------------------------------------
// Isolation of adapter faults
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn adapter_panic_is_fatal_and_closes_session() {
    let adapter = ScriptedAdapter::new().script("boom", [Step::Panic]);
    let h = harness(test_config(), adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["boom", "after"]))
        .await
        .unwrap();

    let result = report.get("boom").unwrap();
    assert_eq!(result.status(), RecordStatus::Fatal);
    assert!(result.failure().unwrap().reason.contains("adapter bug for boom"));
    assert_eq!(report.get("after").unwrap().status(), RecordStatus::Found);
    assert_eq!(
        h.stats.launched.load(Ordering::SeqCst),
        h.stats.closed.load(Ordering::SeqCst)
    );
    assert_eq!(h.stats.launched.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn hung_attempt_times_out_and_is_retried_on_fresh_session() {
    let mut config = test_config();
    config.request_timeout = Duration::from_secs(1);
    let adapter =
        ScriptedAdapter::new().script("slow", [Step::Sleep(Duration::from_secs(3_600))]);
    let h = harness(config, adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["slow"]))
        .await
        .unwrap();

    let result = report.get("slow").unwrap();
    assert_eq!(result.status(), RecordStatus::Found);
    assert_eq!(result.attempts, 2);
    assert_eq!(h.stats.launched.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn record_without_name_is_low_quality() {
    let partial = RawRecord::new()
        .with(FIELD_BRAND, "Acme")
        .with(FIELD_IMAGE_URLS, vec!["https://cdn.example.com/x.jpg".to_string()]);
    let adapter =
        ScriptedAdapter::new().script("nameless", [Step::Return(AttemptOutcome::Success(partial))]);
    let h = harness(test_config(), adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["nameless"]))
        .await
        .unwrap();

    let result = report.get("nameless").unwrap();
    assert_eq!(result.status(), RecordStatus::LowQuality);
    assert!(!matches!(result.outcome, TerminalOutcome::Found(_)));
    let row = &report.records()[0];
    assert_eq!(row.fields.text(FIELD_BRAND), Some("Acme"));
    assert!(row.quality_score.unwrap() < 1.0);
    assert!(row.failure_reason.as_deref().unwrap().contains(FIELD_NAME));
}

// ---------------------------------------------------------------------------
// Input handling, cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn duplicates_collapse_and_blank_skus_fail_fast() {
    let h = harness(test_config(), ScriptedAdapter::new());

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["a", " a ", "", "b"]))
        .await
        .unwrap();

    let order: Vec<&str> = report.results().map(|r| r.sku.as_str()).collect();
    assert_eq!(order, vec!["a", "", "b"]);
    let blank = report.get("").unwrap();
    assert_eq!(blank.status(), RecordStatus::Fatal);
    assert_eq!(blank.failure().unwrap().reason, "empty identifier");
    assert_eq!(h.adapter.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn unknown_site_is_rejected() {
    let h = harness(test_config(), ScriptedAdapter::new());

    let err = h
        .orchestrator
        .run_batch("nowhere", &BatchInput::new(["a"]))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::UnknownSite(site) if site == "nowhere"));
}

#[tokio::test(start_paused = true)]
async fn stop_before_batch_leaves_everything_unprocessed() {
    let h = harness(test_config(), ScriptedAdapter::new());
    h.orchestrator.stop_handle().stop();

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["a", "b"]))
        .await
        .unwrap();

    assert_eq!(report.unprocessed(), ["a".to_string(), "b".to_string()]);
    assert_eq!(report.results().count(), 0);
    assert!(report.cancelled());
    assert_eq!(report.exit_code(), 1);
    assert_eq!(h.adapter.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_mid_batch_finishes_in_flight_lookup() {
    let adapter = ScriptedAdapter::new().script("first", [Step::Sleep(Duration::from_secs(10))]);
    let h = harness(test_config(), adapter);
    let stop = h.orchestrator.stop_handle();

    let input = BatchInput::new(["first", "second", "third"]);
    let (report, ()) = tokio::join!(h.orchestrator.run_batch(SITE, &input), async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        stop.stop();
    });
    let report = report.unwrap();

    assert_eq!(report.get("first").unwrap().status(), RecordStatus::Found);
    assert_eq!(
        report.unprocessed(),
        ["second".to_string(), "third".to_string()]
    );
    assert!(report.cancelled());
    assert_eq!(h.adapter.calls(), 1);
    assert_eq!(
        h.stats.launched.load(Ordering::SeqCst),
        h.stats.closed.load(Ordering::SeqCst)
    );
}

#[tokio::test(start_paused = true)]
async fn batch_deadline_leaves_remaining_skus_unprocessed() {
    let mut config = test_config();
    config.batch_deadline = Some(Duration::from_secs(5));
    let adapter = ScriptedAdapter::new().script("first", [Step::Sleep(Duration::from_secs(10))]);
    let h = harness(config, adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["first", "second"]).with_batch_size(1))
        .await
        .unwrap();

    assert_eq!(report.get("first").unwrap().status(), RecordStatus::Found);
    assert_eq!(report.unprocessed(), ["second".to_string()]);
    assert!(report.cancelled());
}

#[tokio::test(start_paused = true)]
async fn deadline_beyond_clock_range_never_fires() {
    let mut config = test_config();
    config.batch_deadline = Some(Duration::from_secs(u64::MAX));
    let h = harness(config, ScriptedAdapter::new());

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["first", "second"]).with_batch_size(1))
        .await
        .unwrap();

    assert!(report.results().all(|r| r.status() == RecordStatus::Found));
    assert!(!report.cancelled());
}

#[tokio::test(start_paused = true)]
async fn huge_pacing_backoff_factor_saturates_instead_of_panicking() {
    let mut config = test_config();
    config.max_transient_attempts = 1;
    config.rate_limit.base_interval = Duration::from_secs(1);
    config.rate_limit.ceiling = Duration::from_secs(2);
    config.rate_limit.backoff_factor = 1e20;
    let adapter = ScriptedAdapter::new().script("flaky", [transient()]);
    let h = harness(config, adapter);

    let report = h
        .orchestrator
        .run_batch(SITE, &BatchInput::new(["flaky"]))
        .await
        .unwrap();

    assert_eq!(report.get("flaky").unwrap().status(), RecordStatus::Transient);
    assert_eq!(h.orchestrator.rate_limiter().interval(SITE), Duration::from_secs(2));
}
