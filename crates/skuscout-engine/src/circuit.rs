//! Per-site circuit breaker.
//!
//! Closed: every attempt is admitted and its outcome lands in a sliding
//! window. Once the weighted failures in the window reach the threshold the
//! circuit opens and rejects attempts for the cooldown. After the cooldown a
//! single probe is admitted (half-open); its outcome closes the circuit or
//! reopens it with a doubled cooldown.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use skuscout_core::CircuitSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Outcome classes the breaker distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitSignal {
    Success,
    Transient,
    Fatal,
    Blocked,
}

/// Answer to "may this site be attempted right now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Allowed as the single half-open probe; its result must be recorded
    /// with `probe = true`.
    Probe,
    Rejected { retry_in: Duration },
}

impl Admission {
    #[must_use]
    pub fn is_allowed(self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    /// Weighted failures currently in the window.
    pub failure_count: u32,
    pub last_transition: Instant,
    pub cooldown: Duration,
}

#[derive(Debug)]
struct SiteCircuit {
    state: CircuitState,
    window: VecDeque<u32>,
    opened_at: Instant,
    cooldown: Duration,
    probe_in_flight: bool,
    last_transition: Instant,
}

impl SiteCircuit {
    fn new(cooldown: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: now,
            cooldown,
            probe_in_flight: false,
            last_transition: now,
        }
    }

    fn failures(&self) -> u32 {
        self.window.iter().sum()
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.last_transition = Instant::now();
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    settings: CircuitSettings,
    sites: Mutex<HashMap<String, SiteCircuit>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(settings: CircuitSettings) -> Self {
        Self {
            settings,
            sites: Mutex::new(HashMap::new()),
        }
    }

    fn weight(&self, signal: CircuitSignal) -> u32 {
        match signal {
            CircuitSignal::Success => 0,
            CircuitSignal::Transient | CircuitSignal::Fatal => 1,
            CircuitSignal::Blocked => self.settings.blocked_weight,
        }
    }

    /// Decides whether an attempt against `site` may start.
    pub fn admit(&self, site: &str) -> Admission {
        let mut sites = self.sites.lock().unwrap_or_else(PoisonError::into_inner);
        let circuit = sites
            .entry(site.to_string())
            .or_insert_with(|| SiteCircuit::new(self.settings.cooldown));

        match circuit.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let open_for = Instant::now().saturating_duration_since(circuit.opened_at);
                if open_for >= circuit.cooldown {
                    circuit.transition(CircuitState::HalfOpen);
                    circuit.probe_in_flight = true;
                    tracing::info!(site, "circuit half-open; admitting probe");
                    Admission::Probe
                } else {
                    Admission::Rejected {
                        retry_in: circuit.cooldown - open_for,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    Admission::Rejected {
                        retry_in: Duration::ZERO,
                    }
                } else {
                    circuit.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Records the outcome of an admitted attempt.
    pub fn record(&self, site: &str, signal: CircuitSignal, probe: bool) {
        let weight = self.weight(signal);
        let mut sites = self.sites.lock().unwrap_or_else(PoisonError::into_inner);
        let circuit = sites
            .entry(site.to_string())
            .or_insert_with(|| SiteCircuit::new(self.settings.cooldown));

        match circuit.state {
            CircuitState::HalfOpen if probe => {
                circuit.probe_in_flight = false;
                if weight == 0 {
                    circuit.window.clear();
                    circuit.cooldown = self.settings.cooldown;
                    circuit.transition(CircuitState::Closed);
                    tracing::info!(site, "circuit closed after successful probe");
                } else {
                    circuit.cooldown = circuit
                        .cooldown
                        .saturating_mul(2)
                        .min(self.settings.cooldown_max);
                    circuit.opened_at = Instant::now();
                    circuit.transition(CircuitState::Open);
                    tracing::warn!(
                        site,
                        signal = ?signal,
                        cooldown_secs = circuit.cooldown.as_secs(),
                        "circuit reopened after failed probe"
                    );
                }
            }
            CircuitState::Closed => {
                circuit.window.push_back(weight);
                while circuit.window.len() > self.settings.window.max(1) {
                    circuit.window.pop_front();
                }
                let failures = circuit.failures();
                if failures >= self.settings.failure_threshold {
                    circuit.opened_at = Instant::now();
                    circuit.transition(CircuitState::Open);
                    tracing::warn!(
                        site,
                        failures,
                        threshold = self.settings.failure_threshold,
                        cooldown_secs = circuit.cooldown.as_secs(),
                        "circuit opened"
                    );
                }
            }
            // Late results from attempts admitted before the circuit tripped.
            CircuitState::Open | CircuitState::HalfOpen => {}
        }
    }

    #[must_use]
    pub fn snapshot(&self, site: &str) -> CircuitSnapshot {
        let sites = self.sites.lock().unwrap_or_else(PoisonError::into_inner);
        match sites.get(site) {
            Some(circuit) => CircuitSnapshot {
                state: circuit.state,
                failure_count: circuit.failures(),
                last_transition: circuit.last_transition,
                cooldown: circuit.cooldown,
            },
            None => CircuitSnapshot {
                state: CircuitState::Closed,
                failure_count: 0,
                last_transition: Instant::now(),
                cooldown: self.settings.cooldown,
            },
        }
    }
}
