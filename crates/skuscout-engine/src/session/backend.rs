//! Seam between the session manager and whatever drives the pages.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::fingerprint::Fingerprint;

/// What a page looked like after navigation finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub requested_url: String,
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub title: Option<String>,
    pub body: String,
}

impl PageSnapshot {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("navigation to {url} timed out")]
    Timeout { url: String },

    #[error("network error loading {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("browser context is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("proxy {proxy} rejected: {reason}")]
    Proxy { proxy: String, reason: String },

    #[error("browser launch failed: {0}")]
    Backend(String),
}

/// Everything a backend needs to open one isolated browser context.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub session_id: Uuid,
    pub fingerprint: Fingerprint,
    pub proxy: Option<String>,
    pub headless: bool,
    pub navigation_timeout: Duration,
}

/// One isolated browser context: its own cookies, storage and identity.
#[async_trait]
pub trait BrowserContext: Send {
    /// Navigates to `url` and returns the settled page.
    async fn goto(&mut self, url: &str) -> Result<PageSnapshot, NavigationError>;

    /// Releases the context. Further navigation fails with
    /// [`NavigationError::Closed`].
    async fn close(&mut self);
}

#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn BrowserContext>, LaunchError>;
}
