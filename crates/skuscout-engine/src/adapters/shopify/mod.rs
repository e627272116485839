//! Shopify storefront adapter.
//!
//! Finds candidate products through predictive search, then loads each
//! candidate's `/products/{handle}.json` and keeps the variant whose SKU or
//! barcode equals the identifier.

mod origin;
mod types;

use async_trait::async_trait;

use skuscout_core::{
    LookupRequest, RawRecord, SiteConfig, FIELD_BRAND, FIELD_IMAGE_URLS, FIELD_NAME, FIELD_PRICE,
    FIELD_PRODUCT_TYPE, FIELD_URL, FIELD_WEIGHT,
};

use super::{encode_query_value, navigation_failure, status_failure};
use crate::adapter::SiteAdapter;
use crate::error::EngineError;
use crate::outcome::{AttemptOutcome, BlockReason};
use crate::session::{PageSnapshot, Session};

use origin::extract_store_origin;
use types::{PredictiveSearchResponse, ProductResponse, ShopifyProduct, ShopifyVariant};

pub(super) const KIND: &str = "shopify";

/// Candidates loaded per lookup.
const MAX_CANDIDATES: usize = 3;

#[derive(Debug, Clone)]
pub struct ShopifyAdapter {
    origin: String,
}

impl ShopifyAdapter {
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSiteConfig`] if `base_url` has no host.
    pub fn from_site(site: &SiteConfig) -> Result<Self, EngineError> {
        let origin = extract_store_origin(&site.base_url);
        if !reqwest::Url::parse(&origin).is_ok_and(|u| u.host_str().is_some()) {
            return Err(EngineError::InvalidSiteConfig {
                site: site.id.clone(),
                reason: format!("base_url {} has no host", site.base_url),
            });
        }
        Ok(Self { origin })
    }

    fn search_url(&self, identifier: &str) -> String {
        format!(
            "{}/search/suggest.json?q={}&resources%5Btype%5D=product&resources%5Blimit%5D={MAX_CANDIDATES}",
            self.origin,
            encode_query_value(identifier)
        )
    }

    fn product_url(&self, handle: &str) -> String {
        format!("{}/products/{}.json", self.origin, encode_query_value(handle))
    }
}

#[async_trait]
impl SiteAdapter for ShopifyAdapter {
    fn kind(&self) -> &str {
        KIND
    }

    async fn lookup(&self, session: &mut Session, request: &LookupRequest) -> AttemptOutcome {
        let page = match session.navigate(&self.search_url(&request.identifier)).await {
            Ok(page) => page,
            Err(err) => return navigation_failure(&err),
        };
        if page.status == 404 {
            return AttemptOutcome::FatalError(format!(
                "{} does not expose predictive search",
                self.origin
            ));
        }
        if let Some(outcome) = status_failure(&page).or_else(|| markup_instead_of_json(&page)) {
            return outcome;
        }
        let search: PredictiveSearchResponse = match serde_json::from_str(&page.body) {
            Ok(search) => search,
            Err(e) => {
                return AttemptOutcome::TransientError(format!(
                    "unexpected predictive search response: {e}"
                ))
            }
        };

        for candidate in search.resources.results.products.iter().take(MAX_CANDIDATES) {
            let page = match session.navigate(&self.product_url(&candidate.handle)).await {
                Ok(page) => page,
                Err(err) => return navigation_failure(&err),
            };
            if page.status == 404 {
                continue;
            }
            if let Some(outcome) = status_failure(&page).or_else(|| markup_instead_of_json(&page)) {
                return outcome;
            }
            let product = match serde_json::from_str::<ProductResponse>(&page.body) {
                Ok(response) => response.product,
                Err(e) => {
                    return AttemptOutcome::TransientError(format!(
                        "unexpected product response for {}: {e}",
                        candidate.handle
                    ))
                }
            };
            if let Some(variant) = matching_variant(&product, &request.identifier) {
                tracing::debug!(
                    sku = %request.identifier,
                    product_id = product.id,
                    variant_id = variant.id,
                    "matched shopify variant"
                );
                return AttemptOutcome::Success(self.record(&product, variant));
            }
            tracing::debug!(
                sku = %request.identifier,
                handle = %candidate.handle,
                title = candidate.title.as_deref().unwrap_or_default(),
                "no variant matches identifier"
            );
        }

        AttemptOutcome::NotFound
    }
}

impl ShopifyAdapter {
    fn record(&self, product: &ShopifyProduct, variant: &ShopifyVariant) -> RawRecord {
        let name = if variant.title.is_empty() || variant.title == "Default Title" {
            product.title.clone()
        } else {
            format!("{} - {}", product.title, variant.title)
        };

        let mut images: Vec<String> = Vec::new();
        if let Some(image) = variant
            .image_id
            .and_then(|id| product.images.iter().find(|img| img.id == Some(id)))
        {
            images.push(image.src.clone());
        }
        for image in &product.images {
            if !images.contains(&image.src) {
                images.push(image.src.clone());
            }
        }

        let mut record = RawRecord::new()
            .with(FIELD_NAME, name)
            .with(FIELD_IMAGE_URLS, images)
            .with(FIELD_PRICE, variant.price.clone())
            .with(
                FIELD_URL,
                format!(
                    "{}/products/{}?variant={}",
                    self.origin, product.handle, variant.id
                ),
            );
        if let Some(vendor) = &product.vendor {
            record.insert(FIELD_BRAND, vendor.as_str());
        }
        if let Some(product_type) = &product.product_type {
            record.insert(FIELD_PRODUCT_TYPE, product_type.as_str());
        }
        if let Some(weight) = variant_weight(variant) {
            record.insert(FIELD_WEIGHT, weight);
        }
        if let Some(tags) = product.tags.as_deref().filter(|t| !t.trim().is_empty()) {
            record.insert("Tags", tags);
        }
        record
    }
}

/// The storefront JSON endpoints never answer with markup; an HTML page
/// there is a bot wall or a storefront lock screen.
fn markup_instead_of_json(page: &PageSnapshot) -> Option<AttemptOutcome> {
    page.body.trim_start().starts_with('<').then(|| {
        AttemptOutcome::Blocked(BlockReason::Adapter(format!(
            "HTML page instead of JSON at {}",
            page.final_url
        )))
    })
}

fn matching_variant<'a>(product: &'a ShopifyProduct, identifier: &str) -> Option<&'a ShopifyVariant> {
    let identifier = identifier.trim();
    product.variants.iter().find(|v| {
        [v.sku.as_deref(), v.barcode.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .any(|code| !code.is_empty() && code.eq_ignore_ascii_case(identifier))
    })
}

/// Declared weight, falling back to grams. Zero means "not set" in Shopify.
fn variant_weight(variant: &ShopifyVariant) -> Option<String> {
    if let (Some(weight), Some(unit)) = (variant.weight, variant.weight_unit.as_deref()) {
        if weight > 0.0 {
            return Some(format!("{weight} {unit}"));
        }
    }
    variant
        .grams
        .filter(|g| *g > 0)
        .map(|g| format!("{g} g"))
}
