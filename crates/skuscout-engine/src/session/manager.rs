use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use skuscout_core::{redact_proxy, SessionBudget};

use super::backend::{LaunchError, LaunchSpec, SessionLauncher};
use super::proxy::ProxyPool;
use super::Session;
use crate::error::SessionError;
use crate::fingerprint::{Fingerprint, FingerprintProvider};

/// Why a session was retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    RequestBudget,
    AgeBudget,
    Blocked,
}

impl RotationReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RotationReason::RequestBudget => "request_budget",
            RotationReason::AgeBudget => "age_budget",
            RotationReason::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for RotationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns at most one live [`Session`] for a single worker and replaces it
/// when its budget runs out or the site starts blocking it.
pub struct SessionManager {
    worker: usize,
    launcher: Arc<dyn SessionLauncher>,
    fingerprints: Arc<FingerprintProvider>,
    proxies: Arc<ProxyPool>,
    budget: SessionBudget,
    headless: bool,
    navigation_timeout: Duration,
    current: Option<Session>,
    last_fingerprint: Option<Fingerprint>,
    /// Set when the live session was blocked; the next `acquire` replaces it.
    burned: bool,
    rotations: u32,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        worker: usize,
        launcher: Arc<dyn SessionLauncher>,
        fingerprints: Arc<FingerprintProvider>,
        proxies: Arc<ProxyPool>,
        budget: SessionBudget,
        headless: bool,
        navigation_timeout: Duration,
    ) -> Self {
        Self {
            worker,
            launcher,
            fingerprints,
            proxies,
            budget,
            headless,
            navigation_timeout,
            current: None,
            last_fingerprint: None,
            burned: false,
            rotations: 0,
        }
    }

    /// Sessions retired so far by budget or block rotation.
    #[must_use]
    pub fn rotations(&self) -> u32 {
        self.rotations
    }

    #[must_use]
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Marks the live session as blocked by the site so it is not handed
    /// out again.
    pub fn mark_blocked(&mut self) {
        if self.current.is_some() {
            self.burned = true;
        }
    }

    /// The live session, opened lazily and rotated first if it was blocked
    /// or its request or age budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LaunchFailed`] when no replacement can be
    /// launched through any proxy.
    pub async fn acquire(&mut self) -> Result<&mut Session, SessionError> {
        let exhausted = if self.burned {
            Some(RotationReason::Blocked)
        } else {
            self.current
                .as_ref()
                .and_then(|session| session.exhausted(self.budget))
        };
        if let Some(reason) = exhausted {
            return self.rotate(reason).await;
        }

        let session = match self.current.take() {
            Some(session) => session,
            None => self.launch().await?,
        };
        Ok(self.current.insert(session))
    }

    /// Closes the current session and opens a replacement with a different
    /// fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LaunchFailed`] when the replacement cannot be
    /// launched.
    pub async fn rotate(&mut self, reason: RotationReason) -> Result<&mut Session, SessionError> {
        self.burned = false;
        if let Some(old) = self.current.take() {
            tracing::info!(
                worker = self.worker,
                session_id = %old.id(),
                requests = old.request_count(),
                reason = reason.as_str(),
                "rotating session"
            );
            old.close().await;
            self.rotations += 1;
        }
        let session = self.launch().await?;
        Ok(self.current.insert(session))
    }

    /// Closes the current session without replacing it. Used after a hung or
    /// panicked attempt left the context in an unknown state.
    pub async fn discard(&mut self) {
        self.burned = false;
        if let Some(old) = self.current.take() {
            tracing::warn!(
                worker = self.worker,
                session_id = %old.id(),
                "discarding session after failed attempt"
            );
            old.close().await;
        }
    }

    pub async fn shutdown(&mut self) {
        self.burned = false;
        if let Some(session) = self.current.take() {
            session.close().await;
        }
    }

    /// Tries each proxy in turn until one launches.
    async fn launch(&mut self) -> Result<Session, SessionError> {
        let attempts = self.proxies.len().max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            let fingerprint = self.fingerprints.next_distinct(self.last_fingerprint.as_ref());
            let spec = LaunchSpec {
                session_id: Uuid::new_v4(),
                fingerprint,
                proxy: self.proxies.next(),
                headless: self.headless,
                navigation_timeout: self.navigation_timeout,
            };
            let proxy_label = spec.proxy.as_deref().map_or_else(|| "direct".to_string(), redact_proxy);

            match Session::start(self.launcher.as_ref(), spec).await {
                Ok(session) => {
                    self.last_fingerprint = Some(session.fingerprint().clone());
                    tracing::info!(
                        worker = self.worker,
                        session_id = %session.id(),
                        proxy = %proxy_label,
                        "session opened"
                    );
                    return Ok(session);
                }
                Err(err) => {
                    tracing::warn!(
                        worker = self.worker,
                        attempt,
                        proxy = %proxy_label,
                        error = %err,
                        "session launch failed"
                    );
                    last_err = Some(err);
                }
            }
        }

        Err(SessionError::LaunchFailed {
            attempts,
            source: last_err
                .unwrap_or_else(|| LaunchError::Backend("no launch attempted".to_string())),
        })
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("worker", &self.worker)
            .field("budget", &self.budget)
            .field("current", &self.current)
            .field("burned", &self.burned)
            .field("rotations", &self.rotations)
            .finish_non_exhaustive()
    }
}
