//! schema.org JSON-LD adapter.
//!
//! Loads the site's search page for the identifier and reads the `Product`
//! node from its `application/ld+json` blocks. When the search page only
//! carries an `ItemList`, the first listed item page is loaded instead.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use skuscout_core::{
    LookupRequest, RawRecord, SiteConfig, FIELD_BRAND, FIELD_CATEGORY, FIELD_IMAGE_URLS,
    FIELD_NAME, FIELD_PRICE, FIELD_URL, FIELD_WEIGHT,
};

use super::{encode_query_value, navigation_failure, status_failure};
use crate::adapter::SiteAdapter;
use crate::error::EngineError;
use crate::outcome::AttemptOutcome;
use crate::session::{PageSnapshot, Session};

pub(super) const KIND: &str = "jsonld";

static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]+type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .expect("valid regex")
});

const IDENTIFIER_KEYS: [&str; 7] = ["sku", "gtin", "gtin8", "gtin12", "gtin13", "gtin14", "mpn"];

#[derive(Debug, Clone)]
pub struct JsonLdAdapter {
    search_url: String,
}

impl JsonLdAdapter {
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidSiteConfig`] if the site has no
    /// `search_url`.
    pub fn from_site(site: &SiteConfig) -> Result<Self, EngineError> {
        let search_url = site
            .search_url
            .clone()
            .ok_or_else(|| EngineError::InvalidSiteConfig {
                site: site.id.clone(),
                reason: "jsonld adapter needs a search_url".to_string(),
            })?;
        Ok(Self { search_url })
    }

    fn search_url_for(&self, identifier: &str) -> String {
        self.search_url
            .replace("{sku}", &encode_query_value(identifier))
    }
}

#[async_trait]
impl SiteAdapter for JsonLdAdapter {
    fn kind(&self) -> &str {
        KIND
    }

    async fn lookup(&self, session: &mut Session, request: &LookupRequest) -> AttemptOutcome {
        let url = self.search_url_for(&request.identifier);
        let page = match session.navigate(&url).await {
            Ok(page) => page,
            Err(err) => return navigation_failure(&err),
        };
        if let Some(outcome) = status_failure(&page) {
            return outcome;
        }

        let nodes = extract_jsonld_nodes(&page.body);
        if let Some(product) = pick_product(&nodes, &request.identifier) {
            return AttemptOutcome::Success(product_record(product, &page));
        }

        let Some(item_url) = first_list_item_url(&nodes, &page.final_url) else {
            return AttemptOutcome::NotFound;
        };

        let item_page = match session.navigate(&item_url).await {
            Ok(page) => page,
            Err(err) => return navigation_failure(&err),
        };
        if let Some(outcome) = status_failure(&item_page) {
            return outcome;
        }
        let nodes = extract_jsonld_nodes(&item_page.body);
        match pick_product(&nodes, &request.identifier) {
            Some(product) => AttemptOutcome::Success(product_record(product, &item_page)),
            None => AttemptOutcome::NotFound,
        }
    }
}

/// Every JSON-LD object on the page, with arrays and `@graph` containers
/// flattened.
fn extract_jsonld_nodes(html: &str) -> Vec<Value> {
    let mut nodes = Vec::new();
    for cap in SCRIPT_RE.captures_iter(html) {
        let Some(text) = cap.get(1) else { continue };
        let Ok(value) = serde_json::from_str::<Value>(text.as_str().trim()) else {
            continue;
        };
        flatten(value, &mut nodes);
    }
    nodes
}

fn flatten(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten(item, out);
            }
        }
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten(graph, out);
            }
            if map.contains_key("@type") {
                out.push(Value::Object(map));
            }
        }
        _ => {}
    }
}

/// `@type` may be a string or an array of strings.
fn has_type(node: &Value, wanted: &str) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t.eq_ignore_ascii_case(wanted),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| t.eq_ignore_ascii_case(wanted)),
        _ => false,
    }
}

/// The product whose identifiers match `identifier`, else the only/first
/// product on the page.
fn pick_product<'a>(nodes: &'a [Value], identifier: &str) -> Option<&'a Value> {
    let products: Vec<&Value> = nodes.iter().filter(|n| has_type(n, "Product")).collect();
    products
        .iter()
        .copied()
        .find(|p| matches_identifier(p, identifier))
        .or_else(|| products.first().copied())
}

fn matches_identifier(product: &Value, identifier: &str) -> bool {
    let wanted = identifier.trim_start_matches('0');
    let mut candidates: Vec<&Value> = vec![product];
    if let Some(offers) = product.get("offers") {
        match offers {
            Value::Array(items) => candidates.extend(items),
            other => candidates.push(other),
        }
    }
    candidates.iter().any(|node| {
        IDENTIFIER_KEYS.iter().any(|key| {
            scalar_text(node.get(*key))
                .is_some_and(|v| v.eq_ignore_ascii_case(identifier) || v.trim_start_matches('0') == wanted)
        })
    })
}

fn first_list_item_url(nodes: &[Value], base: &str) -> Option<String> {
    let list = nodes.iter().find(|n| has_type(n, "ItemList"))?;
    let first = list.get("itemListElement")?.as_array()?.first()?;
    let url = scalar_text(first.get("url"))
        .or_else(|| first.get("item").and_then(|item| scalar_text(item.get("url"))))
        .or_else(|| first.get("item").and_then(|item| scalar_text(Some(item))))?;
    resolve_url(base, &url)
}

fn product_record(product: &Value, page: &PageSnapshot) -> RawRecord {
    let mut record = RawRecord::new();

    if let Some(name) = scalar_text(product.get("name")) {
        record.insert(FIELD_NAME, name);
    }
    if let Some(brand) = named(product.get("brand")) {
        record.insert(FIELD_BRAND, brand);
    }
    if let Some(weight) = weight_text(product.get("weight")) {
        record.insert(FIELD_WEIGHT, weight);
    }

    let images: Vec<String> = image_urls(product.get("image"))
        .into_iter()
        .filter_map(|u| resolve_url(&page.final_url, &u))
        .collect();
    record.insert(FIELD_IMAGE_URLS, images);

    if let Some(price) = price_text(product.get("offers")) {
        record.insert(FIELD_PRICE, price);
    }
    if let Some(category) = named(product.get("category")) {
        record.insert(FIELD_CATEGORY, category);
    }

    let url = scalar_text(product.get("url"))
        .and_then(|u| resolve_url(&page.final_url, &u))
        .unwrap_or_else(|| page.final_url.clone());
    record.insert(FIELD_URL, url);

    record
}

/// A string or number rendered as text.
fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Plain text or the `name` of a nested object (`Brand`, `Organization`).
fn named(value: Option<&Value>) -> Option<String> {
    let value = value?;
    match value {
        Value::Object(_) => scalar_text(value.get("name")),
        Value::Array(items) => items.iter().find_map(|item| named(Some(item))),
        other => scalar_text(Some(other)),
    }
}

/// `QuantitativeValue` (`value` plus `unitText` or `unitCode`) or plain text.
fn weight_text(value: Option<&Value>) -> Option<String> {
    let value = value?;
    if !value.is_object() {
        return scalar_text(Some(value));
    }
    let amount = scalar_text(value.get("value"))?;
    let unit = scalar_text(value.get("unitText"))
        .or_else(|| scalar_text(value.get("unitCode")).map(|code| unit_from_code(&code)));
    Some(match unit {
        Some(unit) => format!("{amount} {unit}"),
        None => amount,
    })
}

/// UN/CEFACT common codes seen in product weights.
fn unit_from_code(code: &str) -> String {
    match code.to_ascii_uppercase().as_str() {
        "GRM" => "g".to_string(),
        "KGM" => "kg".to_string(),
        "LBR" => "lb".to_string(),
        "ONZ" => "oz".to_string(),
        "MLT" => "ml".to_string(),
        "LTR" => "l".to_string(),
        _ => code.to_string(),
    }
}

fn image_urls(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(url)) => vec![url.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .flat_map(|item| image_urls(Some(item)))
            .collect(),
        Some(obj @ Value::Object(_)) => scalar_text(obj.get("url"))
            .or_else(|| scalar_text(obj.get("contentUrl")))
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

/// `Offer` or `AggregateOffer`, possibly inside an array; currency appended
/// when present.
fn price_text(value: Option<&Value>) -> Option<String> {
    let offer = match value? {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let amount = scalar_text(offer.get("price"))
        .or_else(|| scalar_text(offer.get("lowPrice")))
        .or_else(|| {
            offer
                .get("priceSpecification")
                .and_then(|spec| scalar_text(spec.get("price")))
        })?;
    Some(match scalar_text(offer.get("priceCurrency")) {
        Some(currency) => format!("{amount} {currency}"),
        None => amount,
    })
}

fn resolve_url(base: &str, candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }
    match reqwest::Url::parse(candidate) {
        Ok(url) => Some(url.to_string()),
        Err(_) => reqwest::Url::parse(base)
            .ok()?
            .join(candidate)
            .ok()
            .map(|u| u.to_string()),
    }
}
