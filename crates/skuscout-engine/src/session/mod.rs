//! Browser sessions: identity, lifecycle and rotation.

mod backend;
mod http;
mod manager;
mod proxy;

use tokio::time::Instant;
use uuid::Uuid;

use skuscout_core::SessionBudget;

use crate::fingerprint::Fingerprint;

pub use backend::{
    BrowserContext, LaunchError, LaunchSpec, NavigationError, PageSnapshot, SessionLauncher,
};
pub use http::HttpLauncher;
pub use manager::{RotationReason, SessionManager};
pub use proxy::ProxyPool;

/// One live browser context plus the bookkeeping needed to decide when to
/// rotate it. Owned by exactly one worker at a time.
pub struct Session {
    id: Uuid,
    fingerprint: Fingerprint,
    proxy: Option<String>,
    created_at: Instant,
    last_used: Instant,
    request_count: u32,
    context: Option<Box<dyn BrowserContext>>,
    attempt_pages: Vec<PageSnapshot>,
}

impl Session {
    /// Opens a new context through `launcher`.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the backend cannot open the context.
    pub async fn start(launcher: &dyn SessionLauncher, spec: LaunchSpec) -> Result<Self, LaunchError> {
        let context = launcher.launch(&spec).await?;
        let now = Instant::now();
        tracing::debug!(
            session_id = %spec.session_id,
            user_agent = %spec.fingerprint.user_agent,
            viewport = %spec.fingerprint.viewport,
            headless = spec.headless,
            "session started"
        );
        Ok(Self {
            id: spec.session_id,
            fingerprint: spec.fingerprint,
            proxy: spec.proxy,
            created_at: now,
            last_used: now,
            request_count: 0,
            context: Some(context),
            attempt_pages: Vec::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Adapter invocations made through this session.
    #[must_use]
    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Loads `url` in this session's context. Every page loaded during an
    /// attempt is kept for the block detector.
    ///
    /// # Errors
    ///
    /// Returns [`NavigationError`] if the page cannot be loaded or the
    /// session was already closed.
    pub async fn navigate(&mut self, url: &str) -> Result<PageSnapshot, NavigationError> {
        let context = self.context.as_mut().ok_or(NavigationError::Closed)?;
        self.last_used = Instant::now();
        let page = context.goto(url).await?;
        self.attempt_pages.push(page.clone());
        Ok(page)
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.request_count = self.request_count.saturating_add(1);
        self.last_used = Instant::now();
        self.attempt_pages.clear();
    }

    pub(crate) fn take_attempt_pages(&mut self) -> Vec<PageSnapshot> {
        std::mem::take(&mut self.attempt_pages)
    }

    /// Why this session should be retired before its next use, if at all.
    pub(crate) fn exhausted(&self, budget: SessionBudget) -> Option<RotationReason> {
        if self.request_count >= budget.max_requests {
            Some(RotationReason::RequestBudget)
        } else if self.created_at.elapsed() >= budget.max_age {
            Some(RotationReason::AgeBudget)
        } else {
            None
        }
    }

    /// Closes the underlying context.
    pub async fn close(mut self) {
        if let Some(mut context) = self.context.take() {
            context.close().await;
            tracing::debug!(
                session_id = %self.id,
                requests = self.request_count,
                "session closed"
            );
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.context.is_some() {
            tracing::warn!(
                session_id = %self.id,
                requests = self.request_count,
                "session dropped without close; context released without cleanup"
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint)
            .field("proxy", &self.proxy.as_deref().map(skuscout_core::redact_proxy))
            .field("request_count", &self.request_count)
            .field("open", &self.context.is_some())
            .finish_non_exhaustive()
    }
}
