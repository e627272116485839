//! Built-in adapter kinds, constructed from site config by name.

mod jsonld;
mod shopify;

use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use skuscout_core::SiteConfig;

use crate::adapter::SiteAdapter;
use crate::error::EngineError;
use crate::outcome::AttemptOutcome;
use crate::session::{NavigationError, PageSnapshot};

pub use jsonld::JsonLdAdapter;
pub use shopify::ShopifyAdapter;

/// Characters left unescaped in query values, per RFC 3986 "unreserved".
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Adapter for `site.adapter`.
///
/// # Errors
///
/// Returns [`EngineError::UnknownAdapter`] for an unrecognized kind, or
/// [`EngineError::InvalidSiteConfig`] if the site lacks parameters the kind
/// needs.
pub fn build(site: &SiteConfig) -> Result<Arc<dyn SiteAdapter>, EngineError> {
    match site.adapter.as_str() {
        jsonld::KIND => Ok(Arc::new(JsonLdAdapter::from_site(site)?)),
        shopify::KIND => Ok(Arc::new(ShopifyAdapter::from_site(site)?)),
        other => Err(EngineError::UnknownAdapter {
            site: site.id.clone(),
            adapter: other.to_string(),
        }),
    }
}

pub(crate) fn encode_query_value(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

/// Outcome for a navigation that never produced a page.
pub(crate) fn navigation_failure(err: &NavigationError) -> AttemptOutcome {
    match err {
        NavigationError::InvalidUrl { .. } => AttemptOutcome::FatalError(err.to_string()),
        NavigationError::Timeout { .. }
        | NavigationError::Network { .. }
        | NavigationError::Closed => AttemptOutcome::TransientError(err.to_string()),
    }
}

/// Outcome implied by a non-success status, if any. Blocking statuses are
/// left to the block detector.
pub(crate) fn status_failure(page: &PageSnapshot) -> Option<AttemptOutcome> {
    match page.status {
        200..=299 => None,
        404 | 410 => Some(AttemptOutcome::NotFound),
        408 | 500..=599 => Some(AttemptOutcome::TransientError(format!(
            "HTTP {} from {}",
            page.status, page.final_url
        ))),
        status => Some(AttemptOutcome::TransientError(format!(
            "unexpected HTTP {status} from {}",
            page.final_url
        ))),
    }
}
