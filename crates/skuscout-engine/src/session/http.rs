//! HTTP-level session backend built on `reqwest`.
//!
//! Each context is its own `reqwest::Client` with a private cookie jar,
//! the fingerprint's user agent and language, and the assigned proxy. Pages
//! are fetched without running scripts, which is enough for sites that
//! render product data server-side or expose JSON endpoints.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;

use super::backend::{BrowserContext, LaunchError, LaunchSpec, NavigationError, PageSnapshot, SessionLauncher};

/// Bytes of a response body kept per navigation; the rest is discarded.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));

/// Launches [`HttpContext`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpLauncher {
    probe_url: Option<String>,
}

impl HttpLauncher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch `url` once on launch so a dead proxy fails the launch instead
    /// of the first lookup.
    #[must_use]
    pub fn with_probe(mut self, url: impl Into<String>) -> Self {
        self.probe_url = Some(url.into());
        self
    }

    fn build_client(spec: &LaunchSpec) -> Result<Client, LaunchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
        );
        let language = HeaderValue::from_str(&spec.fingerprint.accept_language)
            .map_err(|e| LaunchError::Backend(format!("invalid accept-language: {e}")))?;
        headers.insert(ACCEPT_LANGUAGE, language);
        headers.insert(
            "viewport-width",
            HeaderValue::from(spec.fingerprint.viewport.width),
        );

        let mut builder = Client::builder()
            .cookie_store(true)
            .user_agent(spec.fingerprint.user_agent.as_str())
            .default_headers(headers)
            .timeout(spec.navigation_timeout)
            .connect_timeout(Duration::from_secs(10));

        if let Some(proxy) = &spec.proxy {
            let proxy_cfg = reqwest::Proxy::all(proxy).map_err(|e| LaunchError::Proxy {
                proxy: skuscout_core::redact_proxy(proxy),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy_cfg);
        }

        builder
            .build()
            .map_err(|e| LaunchError::Backend(e.to_string()))
    }
}

#[async_trait]
impl SessionLauncher for HttpLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn BrowserContext>, LaunchError> {
        if !spec.headless {
            tracing::debug!(
                session_id = %spec.session_id,
                "http backend has no visible window; headless=false only affects logging"
            );
        }

        let client = Self::build_client(spec)?;

        if let Some(probe) = &self.probe_url {
            client.get(probe).send().await.map_err(|e| match &spec.proxy {
                Some(proxy) => LaunchError::Proxy {
                    proxy: skuscout_core::redact_proxy(proxy),
                    reason: e.to_string(),
                },
                None => LaunchError::Backend(format!("probe {probe} failed: {e}")),
            })?;
        }

        Ok(Box::new(HttpContext {
            client: Some(client),
        }))
    }
}

/// A cookie-isolated HTTP client standing in for a browser context.
pub struct HttpContext {
    client: Option<Client>,
}

#[async_trait]
impl BrowserContext for HttpContext {
    async fn goto(&mut self, url: &str) -> Result<PageSnapshot, NavigationError> {
        let client = self.client.as_ref().ok_or(NavigationError::Closed)?;
        let parsed = reqwest::Url::parse(url).map_err(|e| NavigationError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut response = client
            .get(parsed)
            .send()
            .await
            .map_err(|e| classify(url, &e))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = read_capped(&mut response, MAX_BODY_BYTES)
            .await
            .map_err(|e| classify(url, &e))?;

        Ok(PageSnapshot {
            requested_url: url.to_string(),
            final_url,
            status,
            title: extract_title(&body),
            body,
        })
    }

    async fn close(&mut self) {
        self.client = None;
    }
}

/// Reads at most `limit` bytes of the body, decoding lossily as UTF-8.
async fn read_capped(response: &mut reqwest::Response, limit: usize) -> Result<String, reqwest::Error> {
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - buf.len();
        if chunk.len() >= room {
            buf.extend_from_slice(&chunk[..room]);
            tracing::warn!(
                url = %response.url(),
                limit,
                "response body truncated"
            );
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn classify(url: &str, err: &reqwest::Error) -> NavigationError {
    if err.is_timeout() {
        NavigationError::Timeout {
            url: url.to_string(),
        }
    } else {
        NavigationError::Network {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

fn extract_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
