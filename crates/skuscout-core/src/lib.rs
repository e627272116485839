pub mod config;
pub mod engine_config;
pub mod records;
pub mod sites;

use thiserror::Error;

pub use config::{load_engine_config, load_engine_config_from_env};
pub use engine_config::{
    redact_proxy, BackoffSettings, CircuitSettings, EngineConfig, RateLimitSettings,
    SessionBudget,
};
pub use records::{
    FieldFlag, FieldValue, LookupRequest, OutputRecord, RawRecord, RecordStatus, ValidatedRecord,
    FIELD_BRAND, FIELD_CATEGORY, FIELD_IMAGE_URLS, FIELD_NAME, FIELD_PRICE, FIELD_PRODUCT_TYPE,
    FIELD_SKU, FIELD_URL, FIELD_WEIGHT,
};
pub use sites::{load_sites, SiteConfig, SiteSessionOverrides, SitesFile};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read sites file {path}: {source}")]
    SitesFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse sites file: {0}")]
    SitesFileParse(#[from] serde_yaml::Error),

    #[error("sites validation failed: {0}")]
    Validation(String),
}
