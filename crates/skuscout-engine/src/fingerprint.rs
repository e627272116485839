//! Browser identity presented by a session: user agent, viewport and
//! language. Rotation always moves to a different identity.

use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0",
];

const VIEWPORTS: &[Viewport] = &[
    Viewport { width: 1920, height: 1080 },
    Viewport { width: 1536, height: 864 },
    Viewport { width: 1440, height: 900 },
    Viewport { width: 1366, height: 768 },
    Viewport { width: 1280, height: 800 },
];

const ACCEPT_LANGUAGES: &[&str] = &["en-US,en;q=0.9", "en-US,en;q=0.8", "en-GB,en;q=0.9,en-US;q=0.8"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: Viewport,
    pub accept_language: String,
}

/// Hands out fingerprints from a fixed catalog.
pub struct FingerprintProvider {
    rng: Mutex<StdRng>,
}

impl FingerprintProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic provider for tests.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    #[must_use]
    pub fn next(&self) -> Fingerprint {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let ua = rng.random_range(0..USER_AGENTS.len());
        let vp = rng.random_range(0..VIEWPORTS.len());
        let lang = rng.random_range(0..ACCEPT_LANGUAGES.len());
        build(ua, vp, lang)
    }

    /// A fingerprint that differs from `previous` in at least the user agent
    /// or the viewport.
    #[must_use]
    pub fn next_distinct(&self, previous: Option<&Fingerprint>) -> Fingerprint {
        let candidate = self.next();
        let Some(previous) = previous else {
            return candidate;
        };
        if candidate.user_agent != previous.user_agent || candidate.viewport != previous.viewport {
            return candidate;
        }

        let ua_index = USER_AGENTS
            .iter()
            .position(|ua| *ua == previous.user_agent)
            .unwrap_or(0);
        let lang_index = ACCEPT_LANGUAGES
            .iter()
            .position(|l| *l == candidate.accept_language)
            .unwrap_or(0);
        let vp_index = VIEWPORTS
            .iter()
            .position(|v| *v == candidate.viewport)
            .unwrap_or(0);
        build((ua_index + 1) % USER_AGENTS.len(), vp_index, lang_index)
    }
}

impl Default for FingerprintProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn build(ua: usize, vp: usize, lang: usize) -> Fingerprint {
    Fingerprint {
        user_agent: USER_AGENTS[ua].to_string(),
        viewport: VIEWPORTS[vp],
        accept_language: ACCEPT_LANGUAGES[lang].to_string(),
    }
}
