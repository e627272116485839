//! Shopify storefront response types.
//!
//! ### Predictive search (`/search/suggest.json`)
//! Products sit under `resources.results.products`. Each entry carries at
//! least `handle` and `title`; stores that index variant SKUs return the
//! product when the query is a SKU or barcode.
//!
//! ### Product (`/products/{handle}.json`)
//! One product wrapped in `{"product": {...}}`. Variants carry `sku` and
//! `barcode`, either of which may be `null` or `""`. `grams` is an integer;
//! `weight` + `weight_unit` are present on most stores but not all.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PredictiveSearchResponse {
    pub resources: PredictiveResources,
}

#[derive(Debug, Deserialize)]
pub struct PredictiveResources {
    pub results: PredictiveResults,
}

#[derive(Debug, Default, Deserialize)]
pub struct PredictiveResults {
    #[serde(default)]
    pub products: Vec<PredictiveProduct>,
}

#[derive(Debug, Deserialize)]
pub struct PredictiveProduct {
    pub handle: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProductResponse {
    pub product: ShopifyProduct,
}

#[derive(Debug, Deserialize)]
pub struct ShopifyProduct {
    pub id: i64,
    pub title: String,
    pub handle: String,
    /// May be `""`; treated as absent.
    #[serde(default)]
    pub product_type: Option<String>,
    /// Brand name as configured in the store.
    #[serde(default)]
    pub vendor: Option<String>,
    /// Comma-separated on this endpoint (unlike `products.json`, which
    /// returns an array).
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub images: Vec<ShopifyImage>,
    pub variants: Vec<ShopifyVariant>,
}

#[derive(Debug, Deserialize)]
pub struct ShopifyVariant {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    /// Decimal string, e.g. `"30.00"`.
    pub price: String,
    #[serde(default)]
    pub grams: Option<i64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub weight_unit: Option<String>,
    #[serde(default)]
    pub image_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ShopifyImage {
    #[serde(default)]
    pub id: Option<i64>,
    pub src: String,
}
