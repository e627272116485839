use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine_config::SessionBudget;
use crate::records::{FIELD_BRAND, FIELD_IMAGE_URLS, FIELD_NAME};
use crate::ConfigError;

/// Per-site overrides of the global session rotation budget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSessionOverrides {
    #[serde(default)]
    pub max_requests: Option<u32>,
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

/// One vendor site entry from `sites.yaml`. The engine treats everything
/// here as opaque adapter parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub id: String,
    /// Adapter kind name, e.g. `"jsonld"` or `"shopify"`.
    pub adapter: String,
    pub base_url: String,
    /// Search page template; `{sku}` is replaced by the URL-encoded identifier.
    #[serde(default)]
    pub search_url: Option<String>,
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
    /// Relative weight per field for the quality score. Fields listed here
    /// but not in `required_fields` still count toward the score.
    #[serde(default)]
    pub field_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub quality_threshold: Option<f64>,
    #[serde(default)]
    pub session: SiteSessionOverrides,
    /// Name of the env var holding login credentials, never the secret itself.
    #[serde(default)]
    pub credentials_env: Option<String>,
    /// Extra regexes matched against page bodies by the block detector.
    #[serde(default)]
    pub block_patterns: Vec<String>,
    /// Extra path fragments that mark a redirect to a login page.
    #[serde(default)]
    pub login_paths: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_required_fields() -> Vec<String> {
    vec![
        FIELD_NAME.to_string(),
        FIELD_BRAND.to_string(),
        FIELD_IMAGE_URLS.to_string(),
    ]
}

impl SiteConfig {
    /// Minimal entry with default quality profile and no overrides.
    #[must_use]
    pub fn new(id: &str, adapter: &str, base_url: &str) -> Self {
        Self {
            id: id.to_string(),
            adapter: adapter.to_string(),
            base_url: base_url.to_string(),
            search_url: None,
            required_fields: default_required_fields(),
            field_weights: BTreeMap::new(),
            quality_threshold: None,
            session: SiteSessionOverrides::default(),
            credentials_env: None,
            block_patterns: Vec::new(),
            login_paths: Vec::new(),
            notes: None,
        }
    }

    /// Global budget with this site's overrides applied.
    #[must_use]
    pub fn session_budget(&self, global: SessionBudget) -> SessionBudget {
        SessionBudget {
            max_requests: self.session.max_requests.unwrap_or(global.max_requests),
            max_age: self
                .session
                .max_age_secs
                .map_or(global.max_age, Duration::from_secs),
        }
    }

    /// Resolve `credentials_env` against the process environment.
    #[must_use]
    pub fn credentials(&self) -> Option<String> {
        self.credentials_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SitesFile {
    pub sites: Vec<SiteConfig>,
}

impl SitesFile {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.id == id)
    }
}

/// Load and validate the site registry from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_sites(path: &Path) -> Result<SitesFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SitesFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let sites_file: SitesFile = serde_yaml::from_str(&content)?;

    validate_sites(&sites_file)?;

    Ok(sites_file)
}

fn is_valid_site_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn validate_sites(sites_file: &SitesFile) -> Result<(), ConfigError> {
    let mut seen_ids = HashSet::new();

    for site in &sites_file.sites {
        if !is_valid_site_id(&site.id) {
            return Err(ConfigError::Validation(format!(
                "site id '{}' must be non-empty lowercase ascii, digits, '-' or '_'",
                site.id
            )));
        }

        if !seen_ids.insert(site.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate site id: '{}'",
                site.id
            )));
        }

        if site.adapter.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "site '{}' has no adapter",
                site.id
            )));
        }

        if !(site.base_url.starts_with("http://") || site.base_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "site '{}' base_url must start with http:// or https://",
                site.id
            )));
        }

        if let Some(search_url) = &site.search_url {
            if !search_url.contains("{sku}") {
                return Err(ConfigError::Validation(format!(
                    "site '{}' search_url must contain the {{sku}} placeholder",
                    site.id
                )));
            }
        }

        if site.required_fields.iter().any(|f| f.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "site '{}' lists an empty required field",
                site.id
            )));
        }

        for (field, weight) in &site.field_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "site '{}' has invalid weight {weight} for field '{field}'",
                    site.id
                )));
            }
        }

        if let Some(threshold) = site.quality_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::Validation(format!(
                    "site '{}' quality_threshold {threshold} is outside [0, 1]",
                    site.id
                )));
            }
        }

        if site.session.max_requests == Some(0) {
            return Err(ConfigError::Validation(format!(
                "site '{}' session.max_requests must be at least 1",
                site.id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "sites_test.rs"]
mod tests;
