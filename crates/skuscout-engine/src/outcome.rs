//! Attempt-level and terminal per-SKU outcome types.

use skuscout_core::{OutputRecord, RawRecord, RecordStatus, ValidatedRecord};

/// Anti-bot signal observed on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// Challenge or CAPTCHA markup matched; carries the marker label.
    Challenge(String),
    /// HTTP status the session surfaced (401, 403, 429).
    HttpStatus(u16),
    /// Navigation ended on a login page the request did not ask for.
    LoginRedirect(String),
    /// Navigation ended on an interstitial / "are you human" page.
    Interstitial(String),
    /// The adapter itself recognized a block page.
    Adapter(String),
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::Challenge(marker) => write!(f, "challenge page detected ({marker})"),
            BlockReason::HttpStatus(status) => write!(f, "blocked with HTTP status {status}"),
            BlockReason::LoginRedirect(url) => write!(f, "redirected to login page {url}"),
            BlockReason::Interstitial(url) => write!(f, "redirected to interstitial page {url}"),
            BlockReason::Adapter(detail) => write!(f, "adapter reported block: {detail}"),
        }
    }
}

/// What one adapter invocation observed. Exactly one is produced per
/// `(request, attempt)` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(RawRecord),
    NotFound,
    Blocked(BlockReason),
    TransientError(String),
    FatalError(String),
}

impl AttemptOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success(_) => "success",
            AttemptOutcome::NotFound => "not_found",
            AttemptOutcome::Blocked(_) => "blocked",
            AttemptOutcome::TransientError(_) => "transient",
            AttemptOutcome::FatalError(_) => "fatal",
        }
    }
}

/// Terminal failure classification of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Blocked,
    Transient,
    LowQuality,
    Fatal,
    CircuitOpen,
}

impl FailureKind {
    #[must_use]
    pub fn status(self) -> RecordStatus {
        match self {
            FailureKind::Blocked => RecordStatus::Blocked,
            FailureKind::Transient => RecordStatus::Transient,
            FailureKind::LowQuality => RecordStatus::LowQuality,
            FailureKind::Fatal => RecordStatus::Fatal,
            FailureKind::CircuitOpen => RecordStatus::CircuitOpen,
        }
    }
}

/// A record that extracted but did not pass validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub fields: RawRecord,
    pub quality_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
    pub rejected: Option<Rejected>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Found(ValidatedRecord),
    NotFound,
    Failed(Failure),
}

/// Final result for one SKU in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult {
    pub sku: String,
    /// Adapter invocations spent on this SKU.
    pub attempts: u32,
    pub outcome: TerminalOutcome,
}

impl LookupResult {
    pub(crate) fn failed(sku: &str, attempts: u32, kind: FailureKind, reason: String) -> Self {
        Self {
            sku: sku.to_string(),
            attempts,
            outcome: TerminalOutcome::Failed(Failure {
                kind,
                reason,
                rejected: None,
            }),
        }
    }

    #[must_use]
    pub fn status(&self) -> RecordStatus {
        match &self.outcome {
            TerminalOutcome::Found(_) => RecordStatus::Found,
            TerminalOutcome::NotFound => RecordStatus::NotFound,
            TerminalOutcome::Failed(failure) => failure.kind.status(),
        }
    }

    #[must_use]
    pub fn record(&self) -> Option<&ValidatedRecord> {
        match &self.outcome {
            TerminalOutcome::Found(record) => Some(record),
            _ => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            TerminalOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_output(&self) -> OutputRecord {
        match &self.outcome {
            TerminalOutcome::Found(record) => OutputRecord::found(record),
            TerminalOutcome::NotFound => OutputRecord::failed(
                &self.sku,
                RecordStatus::NotFound,
                "product not found on site",
            ),
            TerminalOutcome::Failed(failure) => {
                let row = OutputRecord::failed(&self.sku, failure.kind.status(), &failure.reason);
                match &failure.rejected {
                    Some(rejected) => row.with_partial(rejected.fields.clone(), rejected.quality_score),
                    None => row,
                }
            }
        }
    }
}
