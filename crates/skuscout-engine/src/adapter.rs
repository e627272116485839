//! Site adapter contract and the registry mapping site ids to adapters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use skuscout_core::{LookupRequest, SiteConfig, SitesFile};

use crate::adapters;
use crate::detect::BlockDetector;
use crate::error::EngineError;
use crate::outcome::AttemptOutcome;
use crate::session::Session;
use crate::validate::QualityProfile;

/// One vendor's navigate/search/extract pass.
///
/// Implementations perform exactly one pass per call. They never retry and
/// never sleep for pacing; those belong to the engine. Everything observed
/// goes back as an [`AttemptOutcome`].
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Adapter kind name used in `sites.yaml`.
    fn kind(&self) -> &str;

    async fn lookup(&self, session: &mut Session, request: &LookupRequest) -> AttemptOutcome;
}

/// A site ready to run: its config, adapter, quality profile and block
/// detector.
#[derive(Clone)]
pub struct RegisteredSite {
    pub config: SiteConfig,
    pub adapter: Arc<dyn SiteAdapter>,
    pub profile: QualityProfile,
    pub detector: BlockDetector,
}

impl std::fmt::Debug for RegisteredSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredSite")
            .field("id", &self.config.id)
            .field("adapter", &self.adapter.kind())
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    sites: HashMap<String, RegisteredSite>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every site in `sites` with the built-in adapter named by its
    /// `adapter` field.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownAdapter`] for an adapter kind with no
    /// built-in implementation, or a site-config error from the adapter or
    /// block detector.
    pub fn from_sites(sites: &SitesFile, default_threshold: f64) -> Result<Self, EngineError> {
        let mut registry = Self::new();
        for site in &sites.sites {
            let adapter = adapters::build(site)?;
            registry.register(site.clone(), adapter, default_threshold)?;
        }
        Ok(registry)
    }

    /// Registers `adapter` for `site`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidPattern`] if the site's block patterns
    /// do not compile.
    pub fn register(
        &mut self,
        site: SiteConfig,
        adapter: Arc<dyn SiteAdapter>,
        default_threshold: f64,
    ) -> Result<(), EngineError> {
        let detector = BlockDetector::for_site(&site)?;
        let profile = QualityProfile::for_site(&site, default_threshold);
        tracing::debug!(
            site = %site.id,
            adapter = adapter.kind(),
            required = ?profile.required(),
            "registered site adapter"
        );
        if let Some(previous) = self.sites.insert(
            site.id.clone(),
            RegisteredSite {
                config: site,
                adapter,
                profile,
                detector,
            },
        ) {
            tracing::warn!(site = %previous.config.id, "replaced existing site registration");
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, site_id: &str) -> Option<&RegisteredSite> {
        self.sites.get(site_id)
    }

    /// Registered site ids, sorted.
    #[must_use]
    pub fn site_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sites.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl SiteAdapter for Fixed {
        fn kind(&self) -> &str {
            "fixed"
        }

        async fn lookup(&self, _session: &mut Session, _request: &LookupRequest) -> AttemptOutcome {
            AttemptOutcome::NotFound
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = AdapterRegistry::new();
        let site = SiteConfig::new("acme", "fixed", "https://acme.example.com");
        registry.register(site, Arc::new(Fixed), 0.6).unwrap();
        let entry = registry.get("acme").unwrap();
        assert_eq!(entry.adapter.kind(), "fixed");
        assert!(registry.get("pantry").is_none());
        assert_eq!(registry.site_ids(), vec!["acme"]);
    }

    #[test]
    fn from_sites_rejects_unknown_adapter_kind() {
        let sites = SitesFile {
            sites: vec![SiteConfig::new("acme", "selenium", "https://acme.example.com")],
        };
        let err = AdapterRegistry::from_sites(&sites, 0.6).unwrap_err();
        assert!(matches!(err, EngineError::UnknownAdapter { .. }));
    }

    #[test]
    fn from_sites_builds_builtin_kinds() {
        let mut jsonld = SiteConfig::new("acme", "jsonld", "https://acme.example.com");
        jsonld.search_url = Some("https://acme.example.com/search?q={sku}".to_string());
        let shopify = SiteConfig::new("pantry", "shopify", "https://pantry.example.com");
        let sites = SitesFile {
            sites: vec![jsonld, shopify],
        };
        let registry = AdapterRegistry::from_sites(&sites, 0.6).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("acme").unwrap().adapter.kind(), "jsonld");
        assert_eq!(registry.get("pantry").unwrap().adapter.kind(), "shopify");
    }
}
