//! Anti-bot signal detection over the pages an attempt loaded.

use std::sync::LazyLock;

use regex::Regex;

use skuscout_core::SiteConfig;

use crate::error::EngineError;
use crate::outcome::{AttemptOutcome, BlockReason};
use crate::session::PageSnapshot;

const BLOCK_STATUSES: [u16; 3] = [401, 403, 429];

const LOGIN_PATHS: [&str; 6] = [
    "/login",
    "/signin",
    "/sign-in",
    "/ap/signin",
    "/account/login",
    "/auth",
];

const INTERSTITIAL_PATHS: [&str; 4] = ["/captcha", "/sorry/", "/blocked", "/errors/validatecaptcha"];

const CHALLENGE_TITLES: [&str; 5] = [
    "just a moment",
    "attention required",
    "access denied",
    "robot check",
    "are you a human",
];

static MARKUP_MARKERS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("captcha form", r"(?i)validateCaptcha"),
        ("datadome challenge", r"(?i)captcha-delivery\.com"),
        ("perimeterx challenge", r"(?i)px-captcha"),
        ("cloudflare challenge", r#"(?i)cf-chl-|/cdn-cgi/challenge-platform/|id=["']challenge-form"#),
        ("unusual traffic notice", r"(?i)unusual traffic from your (computer )?network"),
        ("robot check", r"(?i)make sure you(')?re not a robot"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("valid regex")))
    .collect()
});

/// Per-site block detector: built-in heuristics plus the site's own
/// `block_patterns` and `login_paths`.
#[derive(Debug, Clone)]
pub struct BlockDetector {
    login_paths: Vec<String>,
    site_patterns: Vec<Regex>,
}

impl BlockDetector {
    /// Detector with only the built-in heuristics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            login_paths: LOGIN_PATHS.iter().map(|p| (*p).to_string()).collect(),
            site_patterns: Vec::new(),
        }
    }

    /// # Errors
    ///
    /// Returns [`EngineError::InvalidPattern`] if a `block_patterns` entry is
    /// not a valid regex.
    pub fn for_site(site: &SiteConfig) -> Result<Self, EngineError> {
        let mut detector = Self::new();
        for path in &site.login_paths {
            let path = path.trim().to_ascii_lowercase();
            if !path.is_empty() {
                detector.login_paths.push(path);
            }
        }
        for pattern in &site.block_patterns {
            let regex = Regex::new(pattern).map_err(|source| EngineError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
            detector.site_patterns.push(regex);
        }
        Ok(detector)
    }

    /// First block signal found in `pages`, in load order.
    #[must_use]
    pub fn inspect(&self, pages: &[PageSnapshot]) -> Option<BlockReason> {
        pages.iter().find_map(|page| self.inspect_page(page))
    }

    /// Replaces `outcome` with `Blocked` when any page shows a block signal.
    #[must_use]
    pub fn apply(&self, outcome: AttemptOutcome, pages: &[PageSnapshot]) -> AttemptOutcome {
        match self.inspect(pages) {
            Some(reason) => {
                if !matches!(outcome, AttemptOutcome::Blocked(_)) {
                    tracing::warn!(
                        adapter_outcome = outcome.label(),
                        reason = %reason,
                        "block detected; overriding adapter outcome"
                    );
                }
                AttemptOutcome::Blocked(reason)
            }
            None => outcome,
        }
    }

    fn inspect_page(&self, page: &PageSnapshot) -> Option<BlockReason> {
        if BLOCK_STATUSES.contains(&page.status) {
            return Some(BlockReason::HttpStatus(page.status));
        }

        if let Some(reason) = self.inspect_redirect(page) {
            return Some(reason);
        }

        if let Some(title) = &page.title {
            let title = title.to_lowercase();
            if let Some(marker) = CHALLENGE_TITLES.iter().find(|t| title.contains(*t)) {
                return Some(BlockReason::Challenge(format!("title \"{marker}\"")));
            }
        }

        if let Some((label, _)) = MARKUP_MARKERS.iter().find(|(_, re)| re.is_match(&page.body)) {
            return Some(BlockReason::Challenge((*label).to_string()));
        }

        self.site_patterns
            .iter()
            .find(|re| re.is_match(&page.body))
            .map(|re| BlockReason::Challenge(format!("site pattern {}", re.as_str())))
    }

    fn inspect_redirect(&self, page: &PageSnapshot) -> Option<BlockReason> {
        if page.final_url == page.requested_url {
            return None;
        }
        let final_path = url_path(&page.final_url)?;

        if INTERSTITIAL_PATHS.iter().any(|p| final_path.contains(p)) {
            return Some(BlockReason::Interstitial(page.final_url.clone()));
        }

        let requested_path = url_path(&page.requested_url).unwrap_or_default();
        if self.is_login_path(&final_path) && !self.is_login_path(&requested_path) {
            return Some(BlockReason::LoginRedirect(page.final_url.clone()));
        }
        None
    }

    fn is_login_path(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        self.login_paths.iter().any(|login| {
            let login = login.trim_end_matches('/');
            path == login || path.starts_with(&format!("{login}/"))
        })
    }
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn url_path(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .map(|u| u.path().to_ascii_lowercase())
}
