//! Adaptive per-site request pacing.
//!
//! Every site has one minimum interval between request starts, shared by all
//! workers. Block and transient signals stretch the interval by the backoff
//! factor; a run of clean successes shrinks it back by one recovery step.
//! The interval never leaves `[floor, ceiling]`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use skuscout_core::RateLimitSettings;

/// Feedback from one finished attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceSignal {
    Success,
    Blocked,
    Transient,
    /// Outcome says nothing about server pressure (e.g. bad input).
    Neutral,
}

#[derive(Debug)]
struct SiteSlot {
    interval: Duration,
    next_start: Option<Instant>,
    consecutive_successes: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    slots: Mutex<HashMap<String, SiteSlot>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn clamp(&self, interval: Duration) -> Duration {
        interval.clamp(self.settings.floor, self.settings.ceiling)
    }

    /// `interval * backoff_factor`, saturating at the ceiling.
    fn stretch(&self, interval: Duration) -> Duration {
        Duration::try_from_secs_f64(interval.as_secs_f64() * self.settings.backoff_factor)
            .map_or(self.settings.ceiling, |stretched| self.clamp(stretched))
    }

    fn new_slot(&self) -> SiteSlot {
        SiteSlot {
            interval: self.clamp(self.settings.base_interval),
            next_start: None,
            consecutive_successes: 0,
        }
    }

    /// Books the next request start for `site` and returns it.
    fn reserve(&self, site: &str) -> Instant {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots
            .entry(site.to_string())
            .or_insert_with(|| self.new_slot());
        let now = Instant::now();
        let start = slot.next_start.map_or(now, |next| next.max(now));
        slot.next_start = Some(start.checked_add(slot.interval).unwrap_or(start));
        start
    }

    /// Sleeps until `site` may receive another request.
    pub async fn wait(&self, site: &str) {
        let start = self.reserve(site);
        let delay = start.saturating_duration_since(Instant::now());
        if !delay.is_zero() {
            tracing::debug!(
                site,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "pacing request"
            );
            tokio::time::sleep_until(start).await;
        }
    }

    /// Adjusts the site's interval after an attempt.
    pub fn record(&self, site: &str, signal: PaceSignal) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots
            .entry(site.to_string())
            .or_insert_with(|| self.new_slot());
        let before = slot.interval;

        match signal {
            PaceSignal::Blocked | PaceSignal::Transient => {
                slot.consecutive_successes = 0;
                slot.interval = self.stretch(slot.interval);
            }
            PaceSignal::Success => {
                slot.consecutive_successes += 1;
                if slot.consecutive_successes >= self.settings.recovery_after.max(1) {
                    slot.consecutive_successes = 0;
                    slot.interval =
                        self.clamp(slot.interval.saturating_sub(self.settings.recovery_step));
                }
            }
            PaceSignal::Neutral => {}
        }

        if slot.interval != before {
            tracing::info!(
                site,
                signal = ?signal,
                interval_ms = u64::try_from(slot.interval.as_millis()).unwrap_or(u64::MAX),
                "adjusted request interval"
            );
        }
    }

    /// Current minimum interval for `site`.
    #[must_use]
    pub fn interval(&self, site: &str) -> Duration {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(site)
            .map_or_else(|| self.clamp(self.settings.base_interval), |slot| slot.interval)
    }
}
