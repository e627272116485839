use thiserror::Error;

use crate::session::LaunchError;

/// Engine-level faults. Per-attempt failures are never reported through this
/// type; they travel as [`crate::AttemptOutcome`] values.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown site id: {0}")]
    UnknownSite(String),

    #[error("site '{site}' uses unknown adapter kind '{adapter}'")]
    UnknownAdapter { site: String, adapter: String },

    #[error("invalid configuration for site '{site}': {reason}")]
    InvalidSiteConfig { site: String, reason: String },

    #[error("invalid block pattern \"{pattern}\": {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] skuscout_core::ConfigError),
}

/// Failure to obtain a live session for an attempt.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session launch failed after {attempts} attempt(s): {source}")]
    LaunchFailed {
        attempts: usize,
        #[source]
        source: LaunchError,
    },
}
